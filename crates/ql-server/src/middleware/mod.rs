//! HTTP middleware: request ID and caller resolution.

pub mod auth;
pub mod request_id;
