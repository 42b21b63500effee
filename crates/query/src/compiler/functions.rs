//! Builtin function table.
//!
//! The table is built once per process and shared immutably by every
//! compilation.
use crate::compiler::expr::{Expr, Use};
use crate::consts::FN_NS;
use crate::engine::runtime::{Error, ErrorCode};
use crate::engine::string_intern::expanded;
use crate::model::ExpandedName;
use crate::xdm::{Occurrence, SeqType};
use std::collections::HashMap;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Function {
    True,
    False,
    Empty,
    Exists,
    Boolean,
    Not,
    ZeroOrOne,
    ExactlyOne,
    OneOrMore,
    Unordered,
    Count,
    Position,
    Last,
    Data,
    String,
    StartsWith,
    DeepEqual,
    RandomNumber,
}

pub type Arity = usize;

#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub func: Function,
    pub local: &'static str,
    pub min: Arity,
    pub max: Arity,
    pub ret: SeqType,
}

impl FunctionDef {
    pub fn name(&self) -> ExpandedName {
        expanded(Some(FN_NS), self.local)
    }
}

const DEFS: &[FunctionDef] = &[
    FunctionDef { func: Function::True, local: "true", min: 0, max: 0, ret: SeqType::BOOLEAN },
    FunctionDef { func: Function::False, local: "false", min: 0, max: 0, ret: SeqType::BOOLEAN },
    FunctionDef { func: Function::Empty, local: "empty", min: 1, max: 1, ret: SeqType::BOOLEAN },
    FunctionDef { func: Function::Exists, local: "exists", min: 1, max: 1, ret: SeqType::BOOLEAN },
    FunctionDef { func: Function::Boolean, local: "boolean", min: 1, max: 1, ret: SeqType::BOOLEAN },
    FunctionDef { func: Function::Not, local: "not", min: 1, max: 1, ret: SeqType::BOOLEAN },
    FunctionDef { func: Function::ZeroOrOne, local: "zero-or-one", min: 1, max: 1, ret: SeqType::ITEM_ZM.with_occ(Occurrence::ZeroOrOne) },
    FunctionDef { func: Function::ExactlyOne, local: "exactly-one", min: 1, max: 1, ret: SeqType::ITEM_ONE },
    FunctionDef { func: Function::OneOrMore, local: "one-or-more", min: 1, max: 1, ret: SeqType::ITEM_ZM.with_occ(Occurrence::OneOrMore) },
    FunctionDef { func: Function::Unordered, local: "unordered", min: 1, max: 1, ret: SeqType::ITEM_ZM },
    FunctionDef { func: Function::Count, local: "count", min: 1, max: 1, ret: SeqType::INTEGER },
    FunctionDef { func: Function::Position, local: "position", min: 0, max: 0, ret: SeqType::INTEGER },
    FunctionDef { func: Function::Last, local: "last", min: 0, max: 0, ret: SeqType::INTEGER },
    FunctionDef { func: Function::Data, local: "data", min: 1, max: 1, ret: SeqType::ATOMIC_ZM },
    FunctionDef { func: Function::String, local: "string", min: 0, max: 1, ret: SeqType::STRING },
    FunctionDef { func: Function::StartsWith, local: "starts-with", min: 2, max: 3, ret: SeqType::BOOLEAN },
    FunctionDef { func: Function::DeepEqual, local: "deep-equal", min: 2, max: 3, ret: SeqType::BOOLEAN },
    FunctionDef { func: Function::RandomNumber, local: "random-number", min: 0, max: 0, ret: SeqType::DOUBLE },
];

impl Function {
    pub fn def(self) -> &'static FunctionDef {
        // DEFS is declared in enum order
        &DEFS[self as usize]
    }

    pub fn is_ndt(self) -> bool {
        self == Function::RandomNumber
    }

    /// Flags the function itself contributes, independent of its arguments.
    pub fn uses(self, u: Use, arity: Arity) -> bool {
        match u {
            Use::Pos => matches!(self, Function::Position | Function::Last),
            Use::Ctx => self == Function::String && arity == 0,
            Use::Ndt => self.is_ndt(),
            _ => false,
        }
    }

    pub fn check_arity(self, arity: Arity) -> Result<(), Error> {
        let d = self.def();
        if arity < d.min || arity > d.max {
            return Err(Error::from_code(
                ErrorCode::InvalidArgument,
                format!("fn:{} expects {}..={} arguments, got {arity}", d.local, d.min, d.max),
            ));
        }
        Ok(())
    }
}

/// Error type returned by function resolution.
#[derive(Debug, Clone)]
pub enum ResolveError {
    Unknown(ExpandedName),
    WrongArity { name: ExpandedName, min: Arity, max: Arity },
}

impl From<ResolveError> for Error {
    fn from(e: ResolveError) -> Self {
        match e {
            ResolveError::Unknown(name) => {
                Error::from_code(ErrorCode::InvalidArgument, format!("unknown function: {name}"))
            }
            ResolveError::WrongArity { name, min, max } => Error::from_code(
                ErrorCode::InvalidArgument,
                format!("function {name} expects {min}..={max} arguments"),
            ),
        }
    }
}

pub struct FunctionTable {
    by_name: HashMap<ExpandedName, Function>,
}

impl FunctionTable {
    fn build() -> Self {
        let mut by_name = HashMap::with_capacity(DEFS.len());
        for d in DEFS {
            by_name.insert(d.name(), d.func);
        }
        Self { by_name }
    }

    pub fn get(&self, name: &ExpandedName) -> Option<Function> {
        self.by_name.get(name).copied()
    }

    /// Resolves a function by name and arity. Names without namespace are
    /// looked up in the builtin function namespace.
    pub fn resolve(&self, name: &ExpandedName, arity: Arity) -> Result<Function, ResolveError> {
        let effective = if name.ns_uri.is_none() { expanded(Some(FN_NS), &name.local) } else { name.clone() };
        let f = self.get(&effective).ok_or_else(|| ResolveError::Unknown(effective.clone()))?;
        let d = f.def();
        if arity < d.min || arity > d.max {
            return Err(ResolveError::WrongArity { name: effective, min: d.min, max: d.max });
        }
        Ok(f)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

static TABLE: OnceLock<FunctionTable> = OnceLock::new();

pub fn function_table() -> &'static FunctionTable {
    TABLE.get_or_init(FunctionTable::build)
}

/// Builds a call by function name, the way a front end would.
pub fn call_by_name(local: &str, args: Vec<Expr>) -> Result<Expr, Error> {
    let f = function_table().resolve(&ExpandedName::local(local), args.len())?;
    Ok(Expr::call(f, args))
}
