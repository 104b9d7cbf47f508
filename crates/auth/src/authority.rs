use std::borrow::Cow;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// A capability marker carried in tokens (role name or scoped permission,
/// e.g. `"ROLE_ADMIN"` or `"order:read"`).
///
/// Authorities are opaque and compared exactly (case-sensitive). Naming
/// conventions are applied once, at issuance, through [`Authority::role`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Authority(Cow<'static, str>);

impl Authority {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    /// Canonicalize a stored role name: prepend `prefix` unless already present.
    pub fn role(name: &str, prefix: &str) -> Self {
        if name.starts_with(prefix) {
            Self(Cow::Owned(name.to_string()))
        } else {
            Self(Cow::Owned(format!("{prefix}{name}")))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Authority {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for Authority {
    fn from(value: &'static str) -> Self {
        Self(Cow::Borrowed(value))
    }
}

impl From<String> for Authority {
    fn from(value: String) -> Self {
        Self(Cow::Owned(value))
    }
}

/// Set of granted authorities.
///
/// Duplicates collapse and insertion order is irrelevant; serialized as a
/// sorted JSON array.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthoritySet(BTreeSet<Authority>);

impl AuthoritySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, authority: impl Into<Authority>) -> bool {
        self.0.insert(authority.into())
    }

    pub fn contains(&self, authority: &str) -> bool {
        self.0.iter().any(|a| a.as_str() == authority)
    }

    /// True if at least one authority is present in both sets.
    pub fn intersects(&self, other: &AuthoritySet) -> bool {
        // Iterate the smaller side.
        let (small, large) = if self.0.len() <= other.0.len() {
            (&self.0, &other.0)
        } else {
            (&other.0, &self.0)
        };
        small.iter().any(|a| large.contains(a))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Authority> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_strings(&self) -> Vec<String> {
        self.0.iter().map(|a| a.as_str().to_string()).collect()
    }
}

impl<A: Into<Authority>> FromIterator<A> for AuthoritySet {
    fn from_iter<T: IntoIterator<Item = A>>(iter: T) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl IntoIterator for AuthoritySet {
    type Item = Authority;
    type IntoIter = std::collections::btree_set::IntoIter<Authority>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a AuthoritySet {
    type Item = &'a Authority;
    type IntoIter = std::collections::btree_set::Iter<'a, Authority>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
