use crate::compiler::var::{Var, VarId};
use crate::engine::collation::{CODEPOINT_URI, Collation, CollationRegistry};
use crate::model::Data;
use crate::xdm::{Item, Value};
use core::fmt;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::time::Instant;

/// Position of an expression in the query source (1-based line and column).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SourcePos {
    pub line: u32,
    pub column: u32,
}

impl SourcePos {
    pub const fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for SourcePos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Typed failure taxonomy surfaced to the query caller.
///
/// W3C codes are used where a matching code exists; the remaining variants
/// carry project specific codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// A node was required but something else was found (or vice versa).
    ContextType,
    /// More (or fewer) items than the static or dynamic type allows.
    Cardinality,
    /// A grouping key evaluated to more than one item.
    GroupingCardinality,
    /// Type refinement produced a type disjoint from the previous one.
    TypeConflict,
    IndexUnavailable,
    /// The deadline passed or the cancel flag was raised.
    DeadlineExceeded,
    /// Internal consistency fault: a variable reference without binding.
    UnboundVariable,
    InvalidArgument,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ContextType => "err:XPTY0020",
            ErrorCode::Cardinality => "err:XPTY0004",
            ErrorCode::GroupingCardinality => "basalt:GRP0001",
            ErrorCode::TypeConflict => "basalt:TYP0001",
            ErrorCode::IndexUnavailable => "basalt:IDX0001",
            ErrorCode::DeadlineExceeded => "basalt:TMO0001",
            ErrorCode::UnboundVariable => "err:XPST0008",
            ErrorCode::InvalidArgument => "err:XPST0017",
        }
    }

    pub fn from_code(s: &str) -> Option<Self> {
        use ErrorCode::*;
        Some(match s {
            "err:XPTY0020" => ContextType,
            "err:XPTY0004" => Cardinality,
            "basalt:GRP0001" => GroupingCardinality,
            "basalt:TYP0001" => TypeConflict,
            "basalt:IDX0001" => IndexUnavailable,
            "basalt:TMO0001" => DeadlineExceeded,
            "err:XPST0008" => UnboundVariable,
            "err:XPST0017" => InvalidArgument,
            _ => return None,
        })
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub position: Option<SourcePos>,
    #[source]
    pub source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    pub fn from_code(code: ErrorCode, msg: impl Into<String>) -> Self {
        Self { code, message: msg.into(), position: None, source: None }
    }

    /// Attaches the position of the offending expression. The innermost
    /// known position wins: an error that already carries one is left
    /// untouched, and the default (unknown) position is never attached.
    pub fn at(mut self, pos: SourcePos) -> Self {
        if pos != SourcePos::default() {
            self.position.get_or_insert(pos);
        }
        self
    }

    pub fn with_source(mut self, source: impl Into<Option<Arc<dyn std::error::Error + Send + Sync>>>) -> Self {
        self.source = source.into();
        self
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub(crate) fn context_type(msg: impl Into<String>) -> Self {
        Self::from_code(ErrorCode::ContextType, msg)
    }

    pub(crate) fn cardinality(msg: impl Into<String>) -> Self {
        Self::from_code(ErrorCode::Cardinality, msg)
    }

    pub(crate) fn deadline() -> Self {
        Self::from_code(ErrorCode::DeadlineExceeded, "evaluation cancelled")
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)?;
        if let Some(pos) = self.position {
            write!(f, " at {pos}")?;
        }
        Ok(())
    }
}

/// Compile-time settings. The compiled query captures its own copy; a
/// different static context at evaluation time has no effect.
#[derive(Debug, Clone)]
pub struct StaticContext {
    pub default_collation: String,
    pub path_pruning: bool,
    pub index_rewrites: bool,
    pub constant_propagation: bool,
}

impl Default for StaticContext {
    fn default() -> Self {
        Self {
            default_collation: CODEPOINT_URI.to_string(),
            path_pruning: true,
            index_rewrites: true,
            constant_propagation: true,
        }
    }
}

pub struct StaticContextBuilder {
    ctx: StaticContext,
}

impl Default for StaticContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl StaticContextBuilder {
    pub fn new() -> Self {
        Self { ctx: StaticContext::default() }
    }

    pub fn with_default_collation(mut self, uri: impl Into<String>) -> Self {
        self.ctx.default_collation = uri.into();
        self
    }

    /// Allow the compiler to consult the path summary for pruning and leaf
    /// detection.
    pub fn with_path_pruning(mut self, on: bool) -> Self {
        self.ctx.path_pruning = on;
        self
    }

    /// Allow the compiler to replace path/predicate combinations with index access.
    pub fn with_index_rewrites(mut self, on: bool) -> Self {
        self.ctx.index_rewrites = on;
        self
    }

    pub fn with_constant_propagation(mut self, on: bool) -> Self {
        self.ctx.constant_propagation = on;
        self
    }

    pub fn build(self) -> StaticContext {
        self.ctx
    }
}

#[derive(Clone)]
pub struct DynamicContext {
    pub data: Option<Data>,
    pub context_item: Option<Item>,
    pub globals: HashMap<VarId, Value>,
    pub collations: Arc<CollationRegistry>,
    pub cancel_flag: Option<Arc<AtomicBool>>,
    pub deadline: Option<Instant>,
}

impl Default for DynamicContext {
    fn default() -> Self {
        Self {
            data: None,
            context_item: None,
            globals: HashMap::new(),
            collations: Arc::new(CollationRegistry::default()),
            cancel_flag: None,
            deadline: None,
        }
    }
}

impl DynamicContext {
    /// Cooperative cancellation point. Long running traversals and index
    /// scans call this between items.
    pub fn check_deadline(&self) -> Result<(), Error> {
        if self.cancel_flag.as_ref().is_some_and(|flag| flag.load(AtomicOrdering::Relaxed)) {
            return Err(Error::deadline());
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(Error::from_code(ErrorCode::DeadlineExceeded, "deadline exceeded"));
        }
        Ok(())
    }

    pub fn data(&self) -> Result<&Data, Error> {
        self.data.as_ref().ok_or_else(|| Error::context_type("no database bound to the dynamic context"))
    }

    /// Looks up a collation by URI in the registry.
    pub fn collation(&self, uri: &str) -> Result<Arc<dyn Collation>, Error> {
        self.collations
            .get(uri)
            .ok_or_else(|| Error::from_code(ErrorCode::InvalidArgument, format!("unknown collation URI: {uri}")))
    }
}

pub struct DynamicContextBuilder {
    ctx: DynamicContext,
}

impl Default for DynamicContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DynamicContextBuilder {
    pub fn new() -> Self {
        Self { ctx: DynamicContext::default() }
    }

    pub fn with_data(mut self, data: Data) -> Self {
        self.ctx.data = Some(data);
        self
    }

    pub fn with_context_item(mut self, item: impl Into<Item>) -> Self {
        self.ctx.context_item = Some(item.into());
        self
    }

    /// Binds an externally supplied value to a global variable.
    pub fn with_variable(mut self, var: &Var, value: Value) -> Self {
        self.ctx.globals.insert(var.id, value);
        self
    }

    pub fn with_collations(mut self, reg: Arc<CollationRegistry>) -> Self {
        self.ctx.collations = reg;
        self
    }

    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.ctx.cancel_flag = Some(flag);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.ctx.deadline = Some(deadline);
        self
    }

    pub fn build(self) -> DynamicContext {
        self.ctx
    }
}
