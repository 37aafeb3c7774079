//! Action authorization.

use ql_core::{Error, Result};

use crate::expr::{evaluate, Expr};
use crate::facts::Facts;

/// Check `permit` for the action named `action`.
///
/// A denied anonymous caller gets [`Error::Unauthorized`] so the client can
/// prompt for sign-in; a denied identified caller gets [`Error::Forbidden`].
pub fn authorize<F: Facts + ?Sized>(permit: &Expr, facts: &F, action: &str) -> Result<()> {
    if evaluate(permit, facts) {
        return Ok(());
    }
    if facts.is_authenticated() {
        Err(Error::Forbidden(format!("not permitted to {action}")))
    } else {
        Err(Error::Unauthorized(format!("sign in to {action}")))
    }
}
