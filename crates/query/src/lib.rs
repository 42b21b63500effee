pub mod compiler;
pub mod consts;
pub mod engine;
pub mod index;
pub mod mem;
pub mod model;
pub mod path;
pub mod xdm;

pub use compiler::compile::{CompileContext, CompiledQuery, compile, compile_with_data};
pub use compiler::expr::{Clause, Expr, ExprKind, GroupBy, GroupSpec, OrderBy, OrderKey};
pub use compiler::functions::{Function, function_table};
pub use compiler::var::{Var, VarId, VarKind, VarScope};
pub use engine::evaluator::{EvalContext, evaluate, evaluate_single, evaluate_stream};
pub use engine::runtime::{
    DynamicContext, DynamicContextBuilder, Error, ErrorCode, SourcePos, StaticContext, StaticContextBuilder,
};
pub use mem::{MemStore, attr, comment, doc, elem, pi, text};
pub use model::{Data, ExpandedName, IndexKind, Node, NodeId, NodeKind, PathSummary, TreeStore, ValueIndex};
pub use path::{Axis, KindTest, NameTest, NodeTest};
pub use xdm::{AtomicType, AtomicValue, Item, ItemStream, ItemType, Occurrence, SeqType, SequenceCursor, Value};
