//! # ql-rules
//!
//! Side-effect-free predicates over a request: who is calling, what state
//! the subject is in, and what the request carries.
//!
//! ## Overview
//!
//! - [`Facts`] -- the read-only view a predicate is evaluated against.
//! - [`Condition`] -- leaf predicates that test a single fact.
//! - [`Expr`] -- expression tree combining conditions with AND/OR/NOT.
//! - [`access`] -- authorization of an action, distinguishing
//!   "sign in first" from "not allowed".

pub mod access;
pub mod condition;
pub mod expr;
pub mod facts;

pub use access::authorize;
pub use condition::Condition;
pub use expr::{evaluate, Expr};
pub use facts::Facts;
