pub mod collation;
pub mod evaluator;
pub mod runtime;
pub mod string_intern;
