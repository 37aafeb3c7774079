//! Database query modules.

pub mod auth;
pub mod changes;
pub mod subjects;
pub mod users;
