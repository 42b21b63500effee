use crate::engine::runtime::{Error, ErrorCode};
use crate::model::{Node, NodeKind};
use compact_str::CompactString;
use core::fmt;
use std::sync::Arc;

/// Atomic value universe understood by the core.
///
/// The set is deliberately small: the expression machinery needs booleans for
/// effective boolean values, integers for positions and counts, doubles for
/// numeric comparisons and index ranges, and strings/untyped values for
/// atomized node content.
#[derive(Debug, Clone, PartialEq)]
pub enum AtomicValue {
    Boolean(bool),
    Integer(i64),
    Double(f64),
    String(CompactString),
    UntypedAtomic(CompactString),
}

impl AtomicValue {
    pub fn string(s: impl Into<CompactString>) -> Self {
        AtomicValue::String(s.into())
    }

    pub fn untyped(s: impl Into<CompactString>) -> Self {
        AtomicValue::UntypedAtomic(s.into())
    }

    pub fn atomic_type(&self) -> AtomicType {
        match self {
            AtomicValue::Boolean(_) => AtomicType::Boolean,
            AtomicValue::Integer(_) => AtomicType::Integer,
            AtomicValue::Double(_) => AtomicType::Double,
            AtomicValue::String(_) => AtomicType::String,
            AtomicValue::UntypedAtomic(_) => AtomicType::Untyped,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, AtomicValue::Integer(_) | AtomicValue::Double(_))
    }

    /// Numeric view of the value; untyped content is parsed leniently and
    /// yields NaN when it is not a number.
    pub fn to_double(&self) -> Option<f64> {
        match self {
            AtomicValue::Integer(i) => Some(*i as f64),
            AtomicValue::Double(d) => Some(*d),
            AtomicValue::UntypedAtomic(s) => Some(parse_double(s)),
            AtomicValue::Boolean(_) | AtomicValue::String(_) => None,
        }
    }

    pub fn lexical(&self) -> CompactString {
        match self {
            AtomicValue::Boolean(b) => CompactString::const_new(if *b { "true" } else { "false" }),
            AtomicValue::Integer(i) => CompactString::from(i.to_string()),
            AtomicValue::Double(d) => CompactString::from(format_double(*d)),
            AtomicValue::String(s) | AtomicValue::UntypedAtomic(s) => s.clone(),
        }
    }
}

/// Lenient xs:double parse used for untyped node content. Surrounding
/// whitespace is ignored; anything unparsable becomes NaN.
pub fn parse_double(s: &str) -> f64 {
    match s.trim() {
        "INF" | "+INF" => f64::INFINITY,
        "-INF" => f64::NEG_INFINITY,
        t => t.parse::<f64>().unwrap_or(f64::NAN),
    }
}

fn format_double(d: f64) -> String {
    if d.is_nan() {
        "NaN".to_string()
    } else if d.is_infinite() {
        if d > 0.0 { "INF".to_string() } else { "-INF".to_string() }
    } else if d.fract() == 0.0 && d.abs() < 1e15 {
        format!("{}", d as i64)
    } else {
        format!("{d}")
    }
}

impl fmt::Display for AtomicValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AtomicValue::String(s) => write!(f, "\"{s}\""),
            other => f.write_str(&other.lexical()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Atomic(AtomicValue),
    Node(Node),
}

impl Item {
    pub fn as_node(&self) -> Option<&Node> {
        match self {
            Item::Node(n) => Some(n),
            Item::Atomic(_) => None,
        }
    }

    pub fn is_node(&self) -> bool {
        matches!(self, Item::Node(_))
    }

    /// Relevance score attached to the item, if any.
    pub fn score(&self) -> Option<f64> {
        match self {
            Item::Node(n) => n.score(),
            Item::Atomic(_) => None,
        }
    }
}

impl From<AtomicValue> for Item {
    fn from(a: AtomicValue) -> Self {
        Item::Atomic(a)
    }
}

impl From<Node> for Item {
    fn from(n: Node) -> Self {
        Item::Node(n)
    }
}

impl From<bool> for Item {
    fn from(b: bool) -> Self {
        Item::Atomic(AtomicValue::Boolean(b))
    }
}

impl From<i64> for Item {
    fn from(i: i64) -> Self {
        Item::Atomic(AtomicValue::Integer(i))
    }
}

impl From<&str> for Item {
    fn from(s: &str) -> Self {
        Item::Atomic(AtomicValue::string(s))
    }
}

/// An ordered, possibly empty, immutable sequence of items.
///
/// Cloning is cheap: the items live behind an `Arc` so that variable bindings
/// and literal expressions can hand out the same value many times.
#[derive(Debug, Clone, PartialEq)]
pub struct Value(Arc<[Item]>);

impl Default for Value {
    fn default() -> Self {
        Value(Arc::from(Vec::new()))
    }
}

impl Value {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn single(item: impl Into<Item>) -> Self {
        Value(Arc::from(vec![item.into()]))
    }

    pub fn from_vec(items: Vec<Item>) -> Self {
        Value(Arc::from(items))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn items(&self) -> &[Item] {
        &self.0
    }

    pub fn iter(&self) -> core::slice::Iter<'_, Item> {
        self.0.iter()
    }

    pub fn item_at(&self, idx: usize) -> Option<&Item> {
        self.0.get(idx)
    }

    pub fn concat(&self, other: &Value) -> Value {
        if self.is_empty() {
            return other.clone();
        }
        if other.is_empty() {
            return self.clone();
        }
        let mut v = Vec::with_capacity(self.len() + other.len());
        v.extend(self.iter().cloned());
        v.extend(other.iter().cloned());
        Value::from_vec(v)
    }

    /// Most specific sequence type describing this value.
    pub fn seq_type(&self) -> SeqType {
        let occ = match self.len() {
            0 => return SeqType::EMPTY,
            1 => Occurrence::One,
            _ => Occurrence::OneOrMore,
        };
        let mut item: Option<ItemType> = None;
        for it in self.iter() {
            let t = match it {
                Item::Atomic(a) => ItemType::Atomic(a.atomic_type()),
                Item::Node(n) => ItemType::Node(Some(n.kind())),
            };
            item = Some(match item {
                None => t,
                Some(prev) => prev.union(t),
            });
        }
        SeqType { item: item.unwrap_or(ItemType::Item), occ }
    }

    pub fn stream<'a>(&self) -> ItemStream<'a> {
        ItemStream::from_value(self.clone())
    }
}

impl FromIterator<Item> for Value {
    fn from_iter<T: IntoIterator<Item = Item>>(iter: T) -> Self {
        Value::from_vec(iter.into_iter().collect())
    }
}

impl<'v> IntoIterator for &'v Value {
    type Item = &'v Item;
    type IntoIter = core::slice::Iter<'v, Item>;
    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AtomicType {
    AnyAtomic,
    Numeric,
    Boolean,
    Integer,
    Double,
    String,
    Untyped,
}

impl AtomicType {
    fn is_subtype_of(self, other: AtomicType) -> bool {
        use AtomicType::*;
        self == other
            || other == AnyAtomic
            || (other == Numeric && matches!(self, Integer | Double))
    }

    fn union(self, other: AtomicType) -> AtomicType {
        if self.is_subtype_of(other) {
            other
        } else if other.is_subtype_of(self) {
            self
        } else if matches!(self, AtomicType::Integer | AtomicType::Double | AtomicType::Numeric)
            && matches!(other, AtomicType::Integer | AtomicType::Double | AtomicType::Numeric)
        {
            AtomicType::Numeric
        } else {
            AtomicType::AnyAtomic
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AtomicType::AnyAtomic => "xs:anyAtomicType",
            AtomicType::Numeric => "xs:numeric",
            AtomicType::Boolean => "xs:boolean",
            AtomicType::Integer => "xs:integer",
            AtomicType::Double => "xs:double",
            AtomicType::String => "xs:string",
            AtomicType::Untyped => "xs:untypedAtomic",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemType {
    /// item()
    Item,
    /// node() when `None`, otherwise a specific node kind
    Node(Option<NodeKind>),
    Atomic(AtomicType),
}

impl ItemType {
    pub fn is_subtype_of(self, other: ItemType) -> bool {
        match (self, other) {
            (_, ItemType::Item) => true,
            (ItemType::Node(_), ItemType::Node(None)) => true,
            (ItemType::Node(Some(a)), ItemType::Node(Some(b))) => a == b,
            (ItemType::Atomic(a), ItemType::Atomic(b)) => a.is_subtype_of(b),
            _ => false,
        }
    }

    /// Greatest common subtype, `None` when the two types share no instance.
    pub fn intersect(self, other: ItemType) -> Option<ItemType> {
        if self.is_subtype_of(other) {
            Some(self)
        } else if other.is_subtype_of(self) {
            Some(other)
        } else {
            None
        }
    }

    pub fn union(self, other: ItemType) -> ItemType {
        match (self, other) {
            (a, b) if a.is_subtype_of(b) => b,
            (a, b) if b.is_subtype_of(a) => a,
            (ItemType::Node(_), ItemType::Node(_)) => ItemType::Node(None),
            (ItemType::Atomic(a), ItemType::Atomic(b)) => ItemType::Atomic(a.union(b)),
            _ => ItemType::Item,
        }
    }

    pub fn is_node(self) -> bool {
        matches!(self, ItemType::Node(_))
    }

    /// Whether an instance of this type may be numeric (untyped content
    /// counts, as it is promoted in numeric contexts).
    pub fn may_be_number(self) -> bool {
        match self {
            ItemType::Item => true,
            ItemType::Node(_) => false,
            ItemType::Atomic(a) => matches!(
                a,
                AtomicType::AnyAtomic | AtomicType::Numeric | AtomicType::Integer | AtomicType::Double
            ),
        }
    }

    pub fn matches(self, item: &Item) -> bool {
        match (self, item) {
            (ItemType::Item, _) => true,
            (ItemType::Node(None), Item::Node(_)) => true,
            (ItemType::Node(Some(k)), Item::Node(n)) => n.kind() == k,
            (ItemType::Atomic(t), Item::Atomic(a)) => a.atomic_type().is_subtype_of(t),
            _ => false,
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemType::Item => f.write_str("item()"),
            ItemType::Node(None) => f.write_str("node()"),
            ItemType::Node(Some(k)) => write!(f, "{}()", k.test_name()),
            ItemType::Atomic(a) => f.write_str(a.name()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Occurrence {
    Zero,
    ZeroOrOne,
    One,
    OneOrMore,
    ZeroOrMore,
}

impl Occurrence {
    pub fn min(self) -> u8 {
        match self {
            Occurrence::One | Occurrence::OneOrMore => 1,
            _ => 0,
        }
    }

    /// Upper bound, `None` for unbounded.
    pub fn max(self) -> Option<u8> {
        match self {
            Occurrence::Zero => Some(0),
            Occurrence::ZeroOrOne | Occurrence::One => Some(1),
            Occurrence::OneOrMore | Occurrence::ZeroOrMore => None,
        }
    }

    fn from_bounds(min: u8, max: Option<u8>) -> Option<Occurrence> {
        Some(match (min, max) {
            (0, Some(0)) => Occurrence::Zero,
            (0, Some(1)) => Occurrence::ZeroOrOne,
            (1, Some(1)) => Occurrence::One,
            (1, None) => Occurrence::OneOrMore,
            (0, None) => Occurrence::ZeroOrMore,
            _ => return None,
        })
    }

    pub fn intersect(self, other: Occurrence) -> Option<Occurrence> {
        let min = self.min().max(other.min());
        let max = match (self.max(), other.max()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) | (None, Some(a)) => Some(a),
            (None, None) => None,
        };
        if max.is_some_and(|m| m < min) {
            return None;
        }
        Occurrence::from_bounds(min, max)
    }

    pub fn union(self, other: Occurrence) -> Occurrence {
        let min = self.min().min(other.min());
        let max = match (self.max(), other.max()) {
            (Some(a), Some(b)) => Some(a.max(b)),
            _ => None,
        };
        Occurrence::from_bounds(min, max).unwrap_or(Occurrence::ZeroOrMore)
    }

    pub fn allows(self, n: usize) -> bool {
        n >= usize::from(self.min()) && self.max().is_none_or(|m| n <= usize::from(m))
    }

    /// Statically known number of items, `-1` if it depends on evaluation.
    pub fn static_size(self) -> i64 {
        match self {
            Occurrence::Zero => 0,
            Occurrence::One => 1,
            _ => -1,
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            Occurrence::Zero | Occurrence::One => "",
            Occurrence::ZeroOrOne => "?",
            Occurrence::OneOrMore => "+",
            Occurrence::ZeroOrMore => "*",
        }
    }
}

/// Declared or inferred sequence type: an item type plus an occurrence indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SeqType {
    pub item: ItemType,
    pub occ: Occurrence,
}

impl SeqType {
    pub const EMPTY: SeqType = SeqType { item: ItemType::Item, occ: Occurrence::Zero };
    pub const ITEM_ZM: SeqType = SeqType { item: ItemType::Item, occ: Occurrence::ZeroOrMore };
    pub const ITEM_ONE: SeqType = SeqType { item: ItemType::Item, occ: Occurrence::One };
    pub const NODE_ZM: SeqType = SeqType { item: ItemType::Node(None), occ: Occurrence::ZeroOrMore };
    pub const NODE_ONE: SeqType = SeqType { item: ItemType::Node(None), occ: Occurrence::One };
    pub const BOOLEAN: SeqType = SeqType { item: ItemType::Atomic(AtomicType::Boolean), occ: Occurrence::One };
    pub const INTEGER: SeqType = SeqType { item: ItemType::Atomic(AtomicType::Integer), occ: Occurrence::One };
    pub const DOUBLE: SeqType = SeqType { item: ItemType::Atomic(AtomicType::Double), occ: Occurrence::One };
    pub const STRING: SeqType = SeqType { item: ItemType::Atomic(AtomicType::String), occ: Occurrence::One };
    pub const ATOMIC_ZO: SeqType = SeqType { item: ItemType::Atomic(AtomicType::AnyAtomic), occ: Occurrence::ZeroOrOne };
    pub const ATOMIC_ZM: SeqType = SeqType { item: ItemType::Atomic(AtomicType::AnyAtomic), occ: Occurrence::ZeroOrMore };

    pub const fn new(item: ItemType, occ: Occurrence) -> Self {
        Self { item, occ }
    }

    pub const fn with_occ(self, occ: Occurrence) -> Self {
        Self { item: self.item, occ }
    }

    pub fn node(kind: NodeKind, occ: Occurrence) -> Self {
        Self { item: ItemType::Node(Some(kind)), occ }
    }

    /// Narrows `self` by `other`. Returns `None` if the two types are
    /// disjoint, i.e. no non-trivial value can be an instance of both.
    pub fn refine(self, other: SeqType) -> Option<SeqType> {
        if self.occ == Occurrence::Zero || other.occ == Occurrence::Zero {
            let allows_zero = self.occ.min() == 0 && other.occ.min() == 0;
            return allows_zero.then_some(SeqType::EMPTY);
        }
        let item = self.item.intersect(other.item)?;
        let occ = self.occ.intersect(other.occ)?;
        Some(SeqType { item, occ })
    }

    pub fn union(self, other: SeqType) -> SeqType {
        if self.occ == Occurrence::Zero {
            return other.with_occ(other.occ.union(Occurrence::Zero));
        }
        if other.occ == Occurrence::Zero {
            return self.with_occ(self.occ.union(Occurrence::Zero));
        }
        SeqType { item: self.item.union(other.item), occ: self.occ.union(other.occ) }
    }

    pub fn is_subtype_of(self, other: SeqType) -> bool {
        if self.occ == Occurrence::Zero {
            return other.occ.min() == 0;
        }
        self.item.is_subtype_of(other.item)
            && other.occ.min() <= self.occ.min()
            && match (self.occ.max(), other.occ.max()) {
                (_, None) => true,
                (Some(a), Some(b)) => a <= b,
                (None, Some(_)) => false,
            }
    }

    pub fn zero_or_one(self) -> bool {
        self.occ.max().is_some_and(|m| m <= 1)
    }

    pub fn one(self) -> bool {
        self.occ == Occurrence::One
    }

    pub fn may_be_number(self) -> bool {
        self.occ != Occurrence::Zero && self.item.may_be_number()
    }

    pub fn matches(self, value: &Value) -> bool {
        self.mismatch(value).is_none()
    }

    /// Why `value` is not an instance of this type: the item count comes
    /// first, then the item type.
    pub fn mismatch(self, value: &Value) -> Option<ErrorCode> {
        if !self.occ.allows(value.len()) {
            Some(ErrorCode::Cardinality)
        } else if !value.iter().all(|it| self.item.matches(it)) {
            Some(ErrorCode::TypeConflict)
        } else {
            None
        }
    }
}

impl fmt::Display for SeqType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.occ == Occurrence::Zero {
            return f.write_str("empty-sequence()");
        }
        write!(f, "{}{}", self.item, self.occ.suffix())
    }
}

pub type ItemResult = Result<Item, Error>;

/// Pull protocol for lazy sequences: every call yields at most one item.
pub trait SequenceCursor {
    fn next_item(&mut self) -> Option<ItemResult>;

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, None)
    }
}

/// Cursor over an already materialized value.
pub(crate) struct ValueCursor {
    value: Value,
    idx: usize,
}

impl ValueCursor {
    pub(crate) fn new(value: Value) -> Self {
        Self { value, idx: 0 }
    }
}

impl SequenceCursor for ValueCursor {
    fn next_item(&mut self) -> Option<ItemResult> {
        let it = self.value.item_at(self.idx)?.clone();
        self.idx += 1;
        Some(Ok(it))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let rest = self.value.len().saturating_sub(self.idx);
        (rest, Some(rest))
    }
}

/// A lazily produced sequence of items.
pub struct ItemStream<'a> {
    cursor: Box<dyn SequenceCursor + 'a>,
}

impl<'a> ItemStream<'a> {
    pub fn new(cursor: impl SequenceCursor + 'a) -> Self {
        Self { cursor: Box::new(cursor) }
    }

    pub fn from_value(value: Value) -> Self {
        Self::new(ValueCursor::new(value))
    }

    pub fn empty() -> Self {
        Self::from_value(Value::empty())
    }

    pub fn next_item(&mut self) -> Option<ItemResult> {
        self.cursor.next_item()
    }

    /// Pulls all remaining items into a value.
    pub fn materialize(mut self) -> Result<Value, Error> {
        let (lower, _) = self.cursor.size_hint();
        let mut out = Vec::with_capacity(lower);
        while let Some(it) = self.cursor.next_item() {
            out.push(it?);
        }
        Ok(Value::from_vec(out))
    }
}

impl Iterator for ItemStream<'_> {
    type Item = ItemResult;

    fn next(&mut self) -> Option<Self::Item> {
        self.cursor.next_item()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.cursor.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatch_reports_count_before_item_type() {
        assert_eq!(SeqType::INTEGER.mismatch(&Value::single(3_i64)), None);
        assert_eq!(SeqType::INTEGER.mismatch(&Value::single("x")), Some(ErrorCode::TypeConflict));
        let two = Value::from_vec(vec![Item::from("x"), Item::from("y")]);
        assert_eq!(SeqType::INTEGER.mismatch(&two), Some(ErrorCode::Cardinality));
    }

    #[test]
    fn refine_narrows_occurrence() {
        let t = SeqType::ITEM_ZM.refine(SeqType::INTEGER).unwrap();
        assert_eq!(t, SeqType::INTEGER);
    }

    #[test]
    fn refine_rejects_disjoint_item_types() {
        let numeric = SeqType::new(ItemType::Atomic(AtomicType::Numeric), Occurrence::One);
        assert!(numeric.refine(SeqType::NODE_ONE).is_none());
    }

    #[test]
    fn empty_refines_with_optional() {
        assert_eq!(SeqType::EMPTY.refine(SeqType::ATOMIC_ZO), Some(SeqType::EMPTY));
        assert!(SeqType::EMPTY.refine(SeqType::INTEGER).is_none());
    }

    #[test]
    fn value_type_is_most_specific() {
        let v = Value::from_vec(vec![Item::from(1), Item::Atomic(AtomicValue::Double(2.5))]);
        assert_eq!(v.seq_type(), SeqType::new(ItemType::Atomic(AtomicType::Numeric), Occurrence::OneOrMore));
        assert_eq!(Value::empty().seq_type(), SeqType::EMPTY);
    }

    #[test]
    fn untyped_parse_is_lenient() {
        assert_eq!(parse_double(" 42 "), 42.0);
        assert!(parse_double("abc").is_nan());
        assert_eq!(parse_double("-INF"), f64::NEG_INFINITY);
    }
}
