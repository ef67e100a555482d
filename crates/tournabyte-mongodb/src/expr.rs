//! Expression nodes for sort, projection, filter and update documents
//!
//! Every node is a plain immutable value. Nothing is computed when a node is
//! constructed; the BSON entry is produced by [`Node::evaluate`], and
//! [`merge`] is the only way entries become a composite document.
//!
//! # Examples
//!
//! ```ignore
//! use tournabyte_mongodb::expr::{self, and, eq, gt};
//!
//! let filter = expr::merge([and(vec![eq("age", 25), gt("age", 18)])]).into_document()?;
//! // { "$and": [ { "age": 25 }, { "age": { "$gt": 18 } } ] }
//! ```
//!
//! Note that `and(vec![])` and `or(vec![])` both evaluate to an empty clause
//! list. The server does not treat an empty `$or` as "always true".

use bson::{Bson, Document as BsonDocument};

use crate::{Result, StoreError};

/// A single key/value entry produced by a node
pub type Entry = (String, Bson);

/// Anything that evaluates to one document entry
pub trait Node {
    /// Produce the entry. Calling this twice yields identical output.
    fn evaluate(&self) -> Entry;

    /// Evaluate into a one-entry document
    fn to_document(&self) -> BsonDocument {
        let (key, value) = self.evaluate();
        single(key, value)
    }
}

impl<N: Node + ?Sized> Node for &N {
    fn evaluate(&self) -> Entry {
        (**self).evaluate()
    }
}

fn single(key: impl Into<String>, value: Bson) -> BsonDocument {
    let mut document = BsonDocument::new();
    document.insert(key.into(), value);
    document
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    /// Returns the wire value (`1` or `-1`)
    pub fn value(&self) -> i32 {
        match self {
            SortOrder::Ascending => 1,
            SortOrder::Descending => -1,
        }
    }
}

/// Projection inclusion marker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionState {
    Discard,
    Retain,
}

impl ProjectionState {
    /// Returns the wire value (`0` or `1`)
    pub fn value(&self) -> i32 {
        match self {
            ProjectionState::Discard => 0,
            ProjectionState::Retain => 1,
        }
    }
}

/// Query filter operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOperator {
    /// Greater than ($gt)
    Gt,
    /// Greater than or equal ($gte)
    Gte,
    /// Less than ($lt)
    Lt,
    /// Less than or equal ($lte)
    Lte,
    /// Value in array ($in)
    In,
    /// Value not in array ($nin)
    NotIn,
    /// Logical conjunction ($and)
    And,
    /// Logical disjunction ($or)
    Or,
    /// Logical negation ($not)
    Not,
    /// Field presence ($exists)
    Exists,
}

impl FilterOperator {
    /// Returns the operator token.
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOperator::Gt => "$gt",
            FilterOperator::Gte => "$gte",
            FilterOperator::Lt => "$lt",
            FilterOperator::Lte => "$lte",
            FilterOperator::In => "$in",
            FilterOperator::NotIn => "$nin",
            FilterOperator::And => "$and",
            FilterOperator::Or => "$or",
            FilterOperator::Not => "$not",
            FilterOperator::Exists => "$exists",
        }
    }
}

/// Update operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOperator {
    /// Set a field ($set)
    Set,
    /// Increment a field ($inc)
    Increment,
    /// Decrement a field ($dec)
    Decrement,
    /// Multiply a field ($mul)
    Multiply,
}

impl UpdateOperator {
    /// Returns the operator token.
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateOperator::Set => "$set",
            UpdateOperator::Increment => "$inc",
            UpdateOperator::Decrement => "$dec",
            UpdateOperator::Multiply => "$mul",
        }
    }
}

/// Sort key: `{ field: 1 | -1 }`
#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    field: String,
    order: SortOrder,
}

impl SortKey {
    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn order(&self) -> SortOrder {
        self.order
    }
}

impl Node for SortKey {
    fn evaluate(&self) -> Entry {
        (self.field.clone(), Bson::Int32(self.order.value()))
    }
}

/// Projection selector: `{ field: 0 | 1 }`
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    field: String,
    state: ProjectionState,
}

impl Projection {
    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn state(&self) -> ProjectionState {
        self.state
    }
}

impl Node for Projection {
    fn evaluate(&self) -> Entry {
        (self.field.clone(), Bson::Int32(self.state.value()))
    }
}

/// Filter condition
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Direct equality: `{ field: value }`
    Eq { field: String, value: Bson },
    /// Operator on a field: `{ field: { op: value } }`
    Field {
        field: String,
        operator: FilterOperator,
        value: Bson,
    },
    /// `{ $and: [ ... ] }`
    And(Vec<Filter>),
    /// `{ $or: [ ... ] }`
    Or(Vec<Filter>),
    /// `{ $not: { ... } }`, never simplified
    Not(Box<Filter>),
}

impl Filter {
    fn clauses(conditions: &[Filter]) -> Bson {
        Bson::Array(
            conditions
                .iter()
                .map(|condition| Bson::Document(condition.to_document()))
                .collect(),
        )
    }
}

impl Node for Filter {
    fn evaluate(&self) -> Entry {
        match self {
            Filter::Eq { field, value } => (field.clone(), value.clone()),
            Filter::Field {
                field,
                operator,
                value,
            } => (
                field.clone(),
                Bson::Document(single(operator.as_str(), value.clone())),
            ),
            Filter::And(conditions) => (
                FilterOperator::And.as_str().to_string(),
                Self::clauses(conditions),
            ),
            Filter::Or(conditions) => (
                FilterOperator::Or.as_str().to_string(),
                Self::clauses(conditions),
            ),
            Filter::Not(condition) => (
                FilterOperator::Not.as_str().to_string(),
                Bson::Document(condition.to_document()),
            ),
        }
    }
}

/// Update instruction: `{ op: { field: value } }`
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateInstruction {
    operator: UpdateOperator,
    field: String,
    value: Bson,
}

impl UpdateInstruction {
    pub fn operator(&self) -> UpdateOperator {
        self.operator
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn value(&self) -> &Bson {
        &self.value
    }
}

impl Node for UpdateInstruction {
    fn evaluate(&self) -> Entry {
        (
            self.operator.as_str().to_string(),
            Bson::Document(single(self.field.clone(), self.value.clone())),
        )
    }
}

/// Any node, for merging entries of different categories into one document
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Sort(SortKey),
    Projection(Projection),
    Filter(Filter),
    Update(UpdateInstruction),
}

impl Node for Expression {
    fn evaluate(&self) -> Entry {
        match self {
            Expression::Sort(node) => node.evaluate(),
            Expression::Projection(node) => node.evaluate(),
            Expression::Filter(node) => node.evaluate(),
            Expression::Update(node) => node.evaluate(),
        }
    }
}

impl From<SortKey> for Expression {
    fn from(node: SortKey) -> Self {
        Expression::Sort(node)
    }
}

impl From<Projection> for Expression {
    fn from(node: Projection) -> Self {
        Expression::Projection(node)
    }
}

impl From<Filter> for Expression {
    fn from(node: Filter) -> Self {
        Expression::Filter(node)
    }
}

impl From<UpdateInstruction> for Expression {
    fn from(node: UpdateInstruction) -> Self {
        Expression::Update(node)
    }
}

/// Ordered sequence of entries produced by [`merge`].
///
/// Entries are only ever appended, so a key may appear more than once and
/// every evaluated entry is kept in call order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompositeDocument {
    entries: Vec<Entry>,
}

impl CompositeDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate `node` and append its entry at the end
    pub fn append<N: Node>(&mut self, node: N) {
        self.entries.push(node.evaluate());
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Keys in call order, repeats included
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Convert into a driver document.
    ///
    /// A `bson::Document` holds one value per key, so a repeated key is
    /// rejected with `StoreError::DuplicateKey` instead of being overwritten.
    pub fn into_document(self) -> Result<BsonDocument> {
        let mut document = BsonDocument::new();
        for (key, value) in self.entries {
            if document.contains_key(&key) {
                return Err(StoreError::DuplicateKey(key));
            }
            document.insert(key, value);
        }
        Ok(document)
    }
}

impl IntoIterator for CompositeDocument {
    type Item = Entry;
    type IntoIter = std::vec::IntoIter<Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Evaluate each node once, in call order, appending its entry to a
/// [`CompositeDocument`]. Nothing is combined or deduplicated.
pub fn merge<N: Node>(nodes: impl IntoIterator<Item = N>) -> CompositeDocument {
    let mut merged = CompositeDocument::new();
    for node in nodes {
        merged.append(node);
    }
    merged
}

/// Ascending sort key: `{ field: 1 }`
pub fn asc(field: impl Into<String>) -> SortKey {
    SortKey {
        field: field.into(),
        order: SortOrder::Ascending,
    }
}

/// Descending sort key: `{ field: -1 }`
pub fn des(field: impl Into<String>) -> SortKey {
    SortKey {
        field: field.into(),
        order: SortOrder::Descending,
    }
}

/// Include `field` in returned documents: `{ field: 1 }`
pub fn retain(field: impl Into<String>) -> Projection {
    Projection {
        field: field.into(),
        state: ProjectionState::Retain,
    }
}

/// Exclude `field` from returned documents: `{ field: 0 }`
pub fn discard(field: impl Into<String>) -> Projection {
    Projection {
        field: field.into(),
        state: ProjectionState::Discard,
    }
}

fn field_condition(field: impl Into<String>, operator: FilterOperator, value: Bson) -> Filter {
    Filter::Field {
        field: field.into(),
        operator,
        value,
    }
}

/// `{ field: value }`
pub fn eq(field: impl Into<String>, value: impl Into<Bson>) -> Filter {
    Filter::Eq {
        field: field.into(),
        value: value.into(),
    }
}

/// `{ field: { $gt: min_value } }`
pub fn gt(field: impl Into<String>, min_value: impl Into<Bson>) -> Filter {
    field_condition(field, FilterOperator::Gt, min_value.into())
}

/// `{ field: { $gte: min_value_included } }`
pub fn gte(field: impl Into<String>, min_value_included: impl Into<Bson>) -> Filter {
    field_condition(field, FilterOperator::Gte, min_value_included.into())
}

/// `{ field: { $lt: max_value } }`
pub fn lt(field: impl Into<String>, max_value: impl Into<Bson>) -> Filter {
    field_condition(field, FilterOperator::Lt, max_value.into())
}

/// `{ field: { $lte: max_value_included } }`
pub fn lte(field: impl Into<String>, max_value_included: impl Into<Bson>) -> Filter {
    field_condition(field, FilterOperator::Lte, max_value_included.into())
}

fn value_list<V: Into<Bson>>(values: impl IntoIterator<Item = V>) -> Bson {
    Bson::Array(values.into_iter().map(Into::into).collect())
}

/// `{ field: { $in: [values] } }`
pub fn is_in<V: Into<Bson>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Filter {
    field_condition(field, FilterOperator::In, value_list(values))
}

/// `{ field: { $nin: [values] } }`
pub fn not_in<V: Into<Bson>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Filter {
    field_condition(field, FilterOperator::NotIn, value_list(values))
}

/// `{ field: { $exists: true } }`
pub fn exists(field: impl Into<String>) -> Filter {
    field_condition(field, FilterOperator::Exists, Bson::Boolean(true))
}

/// `{ field: { $exists: false } }`
pub fn not_exists(field: impl Into<String>) -> Filter {
    field_condition(field, FilterOperator::Exists, Bson::Boolean(false))
}

/// `{ $and: [...] }`, one clause per condition in order. Empty input gives an empty list.
pub fn and(conditions: impl IntoIterator<Item = Filter>) -> Filter {
    Filter::And(conditions.into_iter().collect())
}

/// `{ $or: [...] }`, one clause per condition in order. Empty input gives an empty list.
pub fn or(conditions: impl IntoIterator<Item = Filter>) -> Filter {
    Filter::Or(conditions.into_iter().collect())
}

/// `{ $not: { ... } }`
pub fn not(condition: Filter) -> Filter {
    Filter::Not(Box::new(condition))
}

fn instruction(operator: UpdateOperator, field: impl Into<String>, value: Bson) -> UpdateInstruction {
    UpdateInstruction {
        operator,
        field: field.into(),
        value,
    }
}

/// `{ $set: { field: value } }`
pub fn set(field: impl Into<String>, value: impl Into<Bson>) -> UpdateInstruction {
    instruction(UpdateOperator::Set, field, value.into())
}

/// `{ $inc: { field: step } }`
pub fn increment(field: impl Into<String>, step: impl Into<Bson>) -> UpdateInstruction {
    instruction(UpdateOperator::Increment, field, step.into())
}

/// `{ $dec: { field: step } }`
pub fn decrement(field: impl Into<String>, step: impl Into<Bson>) -> UpdateInstruction {
    instruction(UpdateOperator::Decrement, field, step.into())
}

/// `{ $mul: { field: factor } }`
pub fn scale(field: impl Into<String>, factor: impl Into<Bson>) -> UpdateInstruction {
    instruction(UpdateOperator::Multiply, field, factor.into())
}
