//! Operation-level authorization guard.
//!
//! Handlers call [`authorize_operation`] before doing any work, so the
//! decision is made against the declared requirement for that operation and
//! the principal of this request only.

use trustgate_auth::OperationRegistry;

use crate::app::errors::ApiError;
use crate::context::PrincipalContext;

pub fn authorize_operation(
    registry: &OperationRegistry,
    operation: &str,
    principal: Option<&PrincipalContext>,
    path: &str,
) -> Result<(), ApiError> {
    registry
        .check(operation, principal.map(PrincipalContext::principal))
        .into_result()
        .map_err(|deny| ApiError::from_deny(deny, path))
}
