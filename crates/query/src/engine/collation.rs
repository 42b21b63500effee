use crate::engine::runtime::{DynamicContext, Error, StaticContext};
use std::collections::HashMap;
use std::sync::Arc;

/// String comparison rule used by comparisons, ordering and grouping keys.
pub trait Collation: Send + Sync {
    fn uri(&self) -> &str;
    fn compare(&self, a: &str, b: &str) -> core::cmp::Ordering;
    /// Collation key: two strings compare equal iff their keys are equal.
    fn key(&self, s: &str) -> String {
        s.to_string()
    }
}

pub use crate::consts::CODEPOINT_URI;
pub use crate::consts::SIMPLE_ACCENT_URI;
pub use crate::consts::SIMPLE_CASE_ACCENT_URI;
pub use crate::consts::SIMPLE_CASE_URI;

/// Resolves an explicit collation URI, falling back to the static default.
pub fn resolve_collation(
    dyn_ctx: &DynamicContext,
    static_ctx: &StaticContext,
    uri: Option<&str>,
) -> Result<Arc<dyn Collation>, Error> {
    dyn_ctx.collation(uri.unwrap_or(&static_ctx.default_collation))
}

pub struct CodepointCollation;

impl Collation for CodepointCollation {
    fn uri(&self) -> &str {
        CODEPOINT_URI
    }
    fn compare(&self, a: &str, b: &str) -> core::cmp::Ordering {
        a.cmp(b)
    }
}

/// Simple case-insensitive collation
pub struct SimpleCaseCollation;

impl Collation for SimpleCaseCollation {
    fn uri(&self) -> &str {
        SIMPLE_CASE_URI
    }
    fn compare(&self, a: &str, b: &str) -> core::cmp::Ordering {
        self.key(a).cmp(&self.key(b))
    }
    fn key(&self, s: &str) -> String {
        s.to_lowercase()
    }
}

/// Simple accent-insensitive collation (NFD + remove combining marks)
pub struct SimpleAccentCollation;

impl Collation for SimpleAccentCollation {
    fn uri(&self) -> &str {
        SIMPLE_ACCENT_URI
    }
    fn compare(&self, a: &str, b: &str) -> core::cmp::Ordering {
        self.key(a).cmp(&self.key(b))
    }
    fn key(&self, s: &str) -> String {
        strip_marks(s)
    }
}

pub struct SimpleCaseAccentCollation;

impl Collation for SimpleCaseAccentCollation {
    fn uri(&self) -> &str {
        SIMPLE_CASE_ACCENT_URI
    }
    fn compare(&self, a: &str, b: &str) -> core::cmp::Ordering {
        self.key(a).cmp(&self.key(b))
    }
    fn key(&self, s: &str) -> String {
        strip_marks(s).to_lowercase()
    }
}

fn strip_marks(s: &str) -> String {
    use unicode_normalization::UnicodeNormalization;
    use unicode_normalization::char::canonical_combining_class as ccc;
    s.nfd().filter(|&ch| ccc(ch) == 0).collect()
}

/// Registry of available collations, keyed by their URI
pub struct CollationRegistry {
    by_uri: HashMap<String, Arc<dyn Collation>>,
    codepoint: Arc<dyn Collation>,
}

impl Default for CollationRegistry {
    fn default() -> Self {
        let codepoint: Arc<dyn Collation> = Arc::new(CodepointCollation);
        let mut reg = Self { by_uri: HashMap::new(), codepoint: codepoint.clone() };
        reg.insert(codepoint);
        reg.insert(Arc::new(SimpleCaseCollation));
        reg.insert(Arc::new(SimpleAccentCollation));
        reg.insert(Arc::new(SimpleCaseAccentCollation));
        reg
    }
}

impl CollationRegistry {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn get(&self, uri: &str) -> Option<Arc<dyn Collation>> {
        self.by_uri.get(uri).cloned()
    }
    pub fn codepoint(&self) -> Arc<dyn Collation> {
        self.codepoint.clone()
    }
    pub fn insert(&mut self, collation: Arc<dyn Collation>) {
        self.by_uri.insert(collation.uri().to_string(), collation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_accent_key_folds_both() {
        let c = SimpleCaseAccentCollation;
        assert_eq!(c.key("Éclair"), c.key("eclair"));
        assert_ne!(CodepointCollation.key("Éclair"), CodepointCollation.key("eclair"));
    }

    #[test]
    fn registry_knows_builtin_uris() {
        let reg = CollationRegistry::default();
        for uri in [CODEPOINT_URI, SIMPLE_CASE_URI, SIMPLE_ACCENT_URI, SIMPLE_CASE_ACCENT_URI] {
            assert_eq!(reg.get(uri).map(|c| c.uri().to_string()).as_deref(), Some(uri));
        }
    }
}
