pub mod compile;
pub mod expr;
pub mod functions;
pub mod plan;
pub mod var;
