use trustgate_core::Subject;

use crate::{AuthoritySet, TokenClaims};

/// Verified identity for exactly one request.
///
/// Built fresh from a verified access token and passed explicitly to the
/// authorization check and business logic; never stored in ambient state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub subject: Subject,
    pub authorities: AuthoritySet,
}

impl Principal {
    pub fn new(subject: Subject, authorities: AuthoritySet) -> Self {
        Self { subject, authorities }
    }

    pub(crate) fn from_claims(claims: TokenClaims) -> Self {
        Self {
            subject: claims.sub,
            authorities: claims.authorities,
        }
    }

    pub fn has_authority(&self, authority: &str) -> bool {
        self.authorities.contains(authority)
    }
}
