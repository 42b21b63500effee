/// Unicode codepoint collation URI (default collation).
pub const CODEPOINT_URI: &str = "http://www.w3.org/2005/xpath-functions/collation/codepoint";

/// Simple case-insensitive collation URI.
pub const SIMPLE_CASE_URI: &str = "urn:basalt:collation:simple-case-insensitive";

/// Simple accent-insensitive collation URI.
pub const SIMPLE_ACCENT_URI: &str = "urn:basalt:collation:simple-accent-insensitive";

/// Simple case- and accent-insensitive collation URI.
pub const SIMPLE_CASE_ACCENT_URI: &str = "urn:basalt:collation:simple-case-accent-insensitive";

/// Namespace of the builtin function library.
pub const FN_NS: &str = "http://www.w3.org/2005/xpath-functions";

/// Tracing target used for compiler rewrite diagnostics.
pub const COMPILE_TARGET: &str = "basalt_query::compile";

/// Tracing target used by the evaluator.
pub const EVAL_TARGET: &str = "basalt_query::eval";
