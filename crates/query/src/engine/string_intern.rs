use crate::model::ExpandedName;
use string_cache::DefaultAtom;

/// Thin accessors over the global `string_cache` interner. Element,
/// attribute and function names are compared far more often than they are
/// created, so every name in the crate is an atom.
pub fn intern_name(name: &str) -> DefaultAtom {
    DefaultAtom::from(name)
}

pub fn intern_namespace(uri: &str) -> DefaultAtom {
    DefaultAtom::from(uri)
}

/// Builds an expanded name from an optional namespace URI and a local part.
/// An empty namespace URI is the same as no namespace.
pub fn expanded(ns_uri: Option<&str>, local: &str) -> ExpandedName {
    ExpandedName {
        ns_uri: ns_uri.filter(|u| !u.is_empty()).map(intern_namespace),
        local: intern_name(local),
    }
}
