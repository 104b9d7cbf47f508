use std::collections::HashMap;

use thiserror::Error;

use crate::{Authority, AuthoritySet, Principal};

/// What an operation demands of its caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorityRequirement {
    /// Any verified principal.
    Authenticated,

    /// At least one of these authorities (OR semantics). An empty set admits
    /// nobody.
    AnyOf(AuthoritySet),
}

impl AuthorityRequirement {
    pub fn any_of<I, A>(authorities: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Authority>,
    {
        Self::AnyOf(authorities.into_iter().collect())
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Deny {
    #[error("authentication required")]
    Unauthenticated,

    #[error("insufficient authority")]
    Forbidden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(Deny),
}

impl Decision {
    pub fn is_allow(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    pub fn into_result(self) -> Result<(), Deny> {
        match self {
            Decision::Allow => Ok(()),
            Decision::Deny(reason) => Err(reason),
        }
    }
}

/// Decide whether `principal` satisfies `requirement`.
///
/// - No IO
/// - No panics
/// - Exact, case-sensitive authority matching
pub fn authorize(principal: Option<&Principal>, requirement: &AuthorityRequirement) -> Decision {
    let Some(principal) = principal else {
        return Decision::Deny(Deny::Unauthenticated);
    };

    match requirement {
        AuthorityRequirement::Authenticated => Decision::Allow,
        AuthorityRequirement::AnyOf(acceptable) => {
            if principal.authorities.intersects(acceptable) {
                Decision::Allow
            } else {
                Decision::Deny(Deny::Forbidden)
            }
        }
    }
}

/// Per-operation requirements declared once, when routes are registered.
///
/// The same [`authorize`] algorithm serves the request-level gate and the
/// per-operation gate; only the requirement differs.
#[derive(Debug, Clone, Default)]
pub struct OperationRegistry {
    requirements: HashMap<String, AuthorityRequirement>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the requirement for `operation_id`, replacing any earlier one.
    pub fn register(
        mut self,
        operation_id: impl Into<String>,
        requirement: AuthorityRequirement,
    ) -> Self {
        self.requirements.insert(operation_id.into(), requirement);
        self
    }

    pub fn requirement(&self, operation_id: &str) -> Option<&AuthorityRequirement> {
        self.requirements.get(operation_id)
    }

    /// Decision for a declared operation. Undeclared operations carry no
    /// per-operation gate and are allowed for any authenticated principal.
    pub fn check(&self, operation_id: &str, principal: Option<&Principal>) -> Decision {
        let decision = match self.requirement(operation_id) {
            Some(requirement) => authorize(principal, requirement),
            None => authorize(principal, &AuthorityRequirement::Authenticated),
        };
        if let Decision::Deny(reason) = decision {
            tracing::info!(
                operation = operation_id,
                subject = principal.map(|p| p.subject.as_str()),
                %reason,
                "operation denied"
            );
        }
        decision
    }

    pub fn len(&self) -> usize {
        self.requirements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }
}
