use std::fmt;

use serde::{Deserialize, Serialize};

/// Which operation of each step a pipeline run invokes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verb {
    /// Read: steps must not durably mutate the subject.
    Get,
    /// Write: steps may mutate, persist and delegate.
    Post,
}

impl Verb {
    /// Map an HTTP method name. `GET` and `HEAD` read; everything else writes.
    pub fn from_method(method: &str) -> Self {
        if method.eq_ignore_ascii_case("GET") || method.eq_ignore_ascii_case("HEAD") {
            Verb::Get
        } else {
            Verb::Post
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verb::Get => f.write_str("get"),
            Verb::Post => f.write_str("post"),
        }
    }
}
