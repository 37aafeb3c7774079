//! Template loading.
//!
//! Every `*.html` file directly inside the configured directory becomes a
//! template named after its file stem (`post.html` is `post`).

use std::path::Path;

use ql_core::{Error, Result};
use ql_pipeline::TemplateSet;

/// Load the templates in `dir`. No directory means no templates.
pub fn load_templates(dir: Option<&Path>) -> Result<TemplateSet> {
    let mut set = TemplateSet::new();
    let Some(dir) = dir else {
        return Ok(set);
    };

    let entries = std::fs::read_dir(dir).map_err(|e| {
        Error::Configuration(format!("cannot read template dir {}: {e}", dir.display()))
    })?;

    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("html") {
            continue;
        }
        let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let source = std::fs::read_to_string(&path)?;
        set.insert(name, source);
    }

    tracing::debug!(dir = %dir.display(), count = set.len(), "Templates loaded");
    Ok(set)
}
