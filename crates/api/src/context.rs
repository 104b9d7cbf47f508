use trustgate_auth::{AuthoritySet, Principal};
use trustgate_core::Subject;

/// Principal context for a request (verified identity + authorities).
///
/// Inserted by the service middleware after full verification and passed
/// explicitly to handlers; it lives exactly as long as the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalContext {
    principal: Principal,
}

impl PrincipalContext {
    pub fn new(principal: Principal) -> Self {
        Self { principal }
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn subject(&self) -> &Subject {
        &self.principal.subject
    }

    pub fn authorities(&self) -> &AuthoritySet {
        &self.principal.authorities
    }
}
