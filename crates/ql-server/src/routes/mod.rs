//! Route handlers for the HTTP surface.

pub mod actions;
pub mod admin;
pub mod auth;
pub mod events;
pub mod health;
