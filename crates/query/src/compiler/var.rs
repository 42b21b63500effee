//! Variables, their identity and the slot scope used at evaluation time.
use crate::engine::runtime::{Error, ErrorCode};
use crate::model::ExpandedName;
use crate::xdm::{SeqType, Value};
use core::fmt;
use core::hash::{Hash, Hasher};
use smallvec::SmallVec;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

static NEXT_VAR_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique variable identity. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(u64);

impl VarId {
    fn fresh() -> Self {
        VarId(NEXT_VAR_ID.fetch_add(1, AtomicOrdering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VarKind {
    Local,
    Global,
    FunctionParam,
}

/// A variable binding site.
///
/// Equality and hashing look at the identity only; name, types and slot are
/// payload that the compiler may refine.
#[derive(Debug, Clone)]
pub struct Var {
    pub id: VarId,
    pub name: Option<ExpandedName>,
    /// Declared type; `None` means the binding is not checked.
    pub declared: Option<SeqType>,
    /// Inferred type, narrowed during compilation.
    pub ty: SeqType,
    /// Statically known number of items, `-1` if unknown.
    pub size: i64,
    /// Storage slot in the evaluation frame, `-1` until assigned.
    pub slot: i32,
    pub kind: VarKind,
}

impl Var {
    pub fn new(name: Option<&str>, declared: Option<SeqType>, kind: VarKind) -> Self {
        Self {
            id: VarId::fresh(),
            name: name.map(ExpandedName::local),
            declared,
            ty: declared.unwrap_or(SeqType::ITEM_ZM),
            size: -1,
            slot: -1,
            kind,
        }
    }

    pub fn local(name: &str) -> Self {
        Self::new(Some(name), None, VarKind::Local)
    }

    /// Whether binding a value requires a runtime type check.
    pub fn checks_type(&self) -> bool {
        self.declared.is_some()
    }

    /// Narrows the inferred type. Fails if the new type is disjoint from
    /// what was proven before.
    pub fn refine_type(&mut self, ty: SeqType) -> Result<(), Error> {
        match self.ty.refine(ty) {
            Some(t) => {
                self.ty = t;
                let s = t.occ.static_size();
                if s >= 0 {
                    self.size = s;
                }
                Ok(())
            }
            None => Err(Error::from_code(
                ErrorCode::TypeConflict,
                format!("{}: inferred type {} conflicts with {}", self, self.ty, ty),
            )),
        }
    }

    /// Checks a bound value against the declared type.
    pub fn check(&self, value: &Value) -> Result<(), Error> {
        let Some(t) = self.declared else { return Ok(()) };
        match t.mismatch(value) {
            Some(code) => Err(Error::from_code(
                code,
                format!("{self}: value of type {} does not match declared type {t}", value.seq_type()),
            )),
            None => Ok(()),
        }
    }
}

impl PartialEq for Var {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Var {}

impl Hash for Var {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(n) => write!(f, "${n}_{}", self.id),
            None => write!(f, "$_{}", self.id),
        }
    }
}

/// Compile-time scope: assigns frame slots to variables in declaration order.
#[derive(Debug, Default, Clone)]
pub struct VarScope {
    vars: Vec<Var>,
}

impl VarScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `var` and assigns its slot. Adding the same binding twice
    /// keeps the first slot.
    pub fn add(&mut self, var: &mut Var) -> i32 {
        if let Some(existing) = self.vars.iter().find(|v| v.id == var.id) {
            var.slot = existing.slot;
            return var.slot;
        }
        var.slot = self.vars.len() as i32;
        self.vars.push(var.clone());
        var.slot
    }

    /// Records a refined copy of a registered variable.
    pub fn update(&mut self, var: &Var) {
        if let Some(v) = self.vars.iter_mut().find(|v| v.id == var.id) {
            *v = var.clone();
        }
    }

    pub fn get(&self, id: VarId) -> Option<&Var> {
        self.vars.iter().find(|v| v.id == id)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// Evaluation-time variable frame indexed by slot.
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    slots: SmallVec<[Option<Value>; 8]>,
}

impl Bindings {
    pub fn with_size(n: usize) -> Self {
        let mut slots = SmallVec::new();
        slots.resize(n, None);
        Self { slots }
    }

    pub fn bind(&mut self, var: &Var, value: Value) -> Result<(), Error> {
        let idx = usize::try_from(var.slot).map_err(|_| unbound(var))?;
        if idx >= self.slots.len() {
            self.slots.resize(idx + 1, None);
        }
        self.slots[idx] = Some(value);
        Ok(())
    }

    pub fn lookup(&self, var: &Var) -> Result<&Value, Error> {
        usize::try_from(var.slot)
            .ok()
            .and_then(|i| self.slots.get(i))
            .and_then(Option::as_ref)
            .ok_or_else(|| unbound(var))
    }
}

pub(crate) fn unbound(var: &Var) -> Error {
    Error::from_code(ErrorCode::UnboundVariable, format!("variable {var} is not bound"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xdm::{AtomicType, ItemType, Occurrence};

    #[test]
    fn refinement_keeps_identity() {
        let mut v = Var::local("x");
        let before = v.clone();
        v.refine_type(SeqType::INTEGER).unwrap();
        assert_eq!(v, before);
        assert_eq!(v.size, 1);
    }

    #[test]
    fn disjoint_refinement_conflicts() {
        let mut v = Var::local("x");
        v.refine_type(SeqType::new(ItemType::Atomic(AtomicType::Numeric), Occurrence::One)).unwrap();
        let err = v.refine_type(SeqType::NODE_ONE).unwrap_err();
        assert_eq!(err.code, ErrorCode::TypeConflict);
    }

    #[test]
    fn scope_add_is_idempotent() {
        let mut scope = VarScope::new();
        let mut a = Var::local("a");
        let mut b = Var::local("b");
        assert_eq!(scope.add(&mut a), 0);
        assert_eq!(scope.add(&mut b), 1);
        let mut a2 = a.clone();
        assert_eq!(scope.add(&mut a2), 0);
        assert_eq!(scope.len(), 2);
    }

    #[test]
    fn unassigned_slot_is_unbound() {
        let b = Bindings::default();
        let v = Var::local("x");
        assert_eq!(b.lookup(&v).unwrap_err().code, ErrorCode::UnboundVariable);
    }
}
