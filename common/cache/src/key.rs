use std::fmt;

use common_catalog::CatalogEntity;

/// A cache key of the form `<prefix><kind>:<id>`.
///
/// Kinds never contain `:`, so the first separator always splits kind from id and keys of
/// different kinds cannot collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(kind: &str, id: impl fmt::Display) -> Self {
        Self::with_prefix("", kind, id)
    }

    pub fn with_prefix(prefix: &str, kind: &str, id: impl fmt::Display) -> Self {
        debug_assert!(!kind.contains(':'), "cache kind must not contain ':'");
        CacheKey(format!("{prefix}{kind}:{id}"))
    }

    pub fn for_entity<T: CatalogEntity>(id: impl fmt::Display) -> Self {
        Self::new(T::KIND, id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
