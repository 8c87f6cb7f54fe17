//! Fetch request descriptors evaluated against managed objects.
//!
//! # Responsibility
//! - Describe which objects of one entity a caller wants, and in which order.
//! - Evaluate predicates and ordering in memory, identically for every tier.
//!
//! # Invariants
//! - A request is scoped to exactly one entity name.
//! - Building a request has no side effects.
//! - Offset and limit apply after filtering and sorting.

use crate::model::object::ManagedObject;
use crate::model::value::Value;
use std::cmp::Ordering;

/// Filter over attribute values.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Equals(String, Value),
    NotEquals(String, Value),
    LessThan(String, Value),
    LessOrEqual(String, Value),
    GreaterThan(String, Value),
    GreaterOrEqual(String, Value),
    IsNull(String),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn equals(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Equals(key.into(), value.into())
    }

    pub fn not_equals(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::NotEquals(key.into(), value.into())
    }

    pub fn less_than(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::LessThan(key.into(), value.into())
    }

    pub fn less_or_equal(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::LessOrEqual(key.into(), value.into())
    }

    pub fn greater_than(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::GreaterThan(key.into(), value.into())
    }

    pub fn greater_or_equal(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::GreaterOrEqual(key.into(), value.into())
    }

    pub fn is_null(key: impl Into<String>) -> Self {
        Self::IsNull(key.into())
    }

    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// Returns whether `object` satisfies this predicate.
    ///
    /// Comparisons between values that cannot be ordered never match.
    pub fn evaluate(&self, object: &ManagedObject) -> bool {
        match self {
            Self::Equals(key, value) => compare(object, key, value) == Some(Ordering::Equal),
            Self::NotEquals(key, value) => compare(object, key, value) != Some(Ordering::Equal),
            Self::LessThan(key, value) => compare(object, key, value) == Some(Ordering::Less),
            Self::LessOrEqual(key, value) => matches!(
                compare(object, key, value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Self::GreaterThan(key, value) => {
                compare(object, key, value) == Some(Ordering::Greater)
            }
            Self::GreaterOrEqual(key, value) => matches!(
                compare(object, key, value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Self::IsNull(key) => object.get(key).is_null(),
            Self::And(all) => all.iter().all(|predicate| predicate.evaluate(object)),
            Self::Or(any) => any.iter().any(|predicate| predicate.evaluate(object)),
            Self::Not(inner) => !inner.evaluate(object),
        }
    }
}

fn compare(object: &ManagedObject, key: &str, value: &Value) -> Option<Ordering> {
    object.get(key).compare(value)
}

/// Ordering by one attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortDescriptor {
    pub key: String,
    pub ascending: bool,
}

impl SortDescriptor {
    pub fn ascending(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ascending: true,
        }
    }

    pub fn descending(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ascending: false,
        }
    }
}

/// Query descriptor scoped to one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    entity_name: String,
    predicate: Option<Predicate>,
    sort_descriptors: Vec<SortDescriptor>,
    fetch_limit: Option<usize>,
    fetch_offset: usize,
}

impl FetchRequest {
    pub fn new(entity_name: impl Into<String>) -> Self {
        Self {
            entity_name: entity_name.into(),
            predicate: None,
            sort_descriptors: Vec::new(),
            fetch_limit: None,
            fetch_offset: 0,
        }
    }

    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    pub fn sorted_by(mut self, descriptor: SortDescriptor) -> Self {
        self.sort_descriptors.push(descriptor);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.fetch_limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.fetch_offset = offset;
        self
    }

    pub fn entity_name(&self) -> &str {
        &self.entity_name
    }

    pub fn predicate(&self) -> Option<&Predicate> {
        self.predicate.as_ref()
    }

    pub fn sort_descriptors(&self) -> &[SortDescriptor] {
        &self.sort_descriptors
    }

    pub fn fetch_limit(&self) -> Option<usize> {
        self.fetch_limit
    }

    pub fn fetch_offset(&self) -> usize {
        self.fetch_offset
    }

    /// Same entity and predicate, without ordering or paging.
    ///
    /// Parent tiers answer with this form so the asking tier can overlay its
    /// own pending changes before paging.
    pub(crate) fn unbounded(&self) -> Self {
        Self {
            entity_name: self.entity_name.clone(),
            predicate: self.predicate.clone(),
            sort_descriptors: Vec::new(),
            fetch_limit: None,
            fetch_offset: 0,
        }
    }

    /// Returns whether `object` belongs to this request's result set.
    pub fn matches(&self, object: &ManagedObject) -> bool {
        object.entity() == self.entity_name
            && self
                .predicate
                .as_ref()
                .map_or(true, |predicate| predicate.evaluate(object))
    }

    /// Sorts, then applies offset and limit.
    pub(crate) fn finish(&self, mut objects: Vec<ManagedObject>) -> Vec<ManagedObject> {
        if !self.sort_descriptors.is_empty() {
            objects.sort_by(|left, right| self.order(left, right));
        }
        objects
            .into_iter()
            .skip(self.fetch_offset)
            .take(self.fetch_limit.unwrap_or(usize::MAX))
            .collect()
    }

    fn order(&self, left: &ManagedObject, right: &ManagedObject) -> Ordering {
        for descriptor in &self.sort_descriptors {
            let ordering = left
                .get(&descriptor.key)
                .compare(right.get(&descriptor.key))
                .unwrap_or(Ordering::Equal);
            let ordering = if descriptor.ascending {
                ordering
            } else {
                ordering.reverse()
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

#[cfg(test)]
mod tests {
    use super::{FetchRequest, Predicate, SortDescriptor};
    use crate::model::object::ManagedObject;
    use crate::model::value::Value;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn product(name: &str, price: f64) -> ManagedObject {
        let mut attributes = BTreeMap::new();
        attributes.insert("name".to_string(), Value::from(name));
        attributes.insert("price".to_string(), Value::from(price));
        ManagedObject::with_id(Uuid::new_v4(), "Product", attributes)
    }

    #[test]
    fn matches_requires_entity_and_predicate() {
        let request = FetchRequest::new("Product")
            .with_predicate(Predicate::greater_than("price", 10.0));
        assert!(request.matches(&product("Widget", 12.5)));
        assert!(!request.matches(&product("Bolt", 2.0)));

        let other = FetchRequest::new("Order");
        assert!(!other.matches(&product("Widget", 12.5)));
    }

    #[test]
    fn compound_predicates_combine() {
        let cheap_or_named = Predicate::Or(vec![
            Predicate::less_than("price", 5_i64),
            Predicate::equals("name", "Widget"),
        ]);
        assert!(cheap_or_named.evaluate(&product("Bolt", 1.0)));
        assert!(cheap_or_named.evaluate(&product("Widget", 50.0)));
        assert!(!cheap_or_named.evaluate(&product("Gear", 50.0)));
        assert!(cheap_or_named.negate().evaluate(&product("Gear", 50.0)));
        assert!(Predicate::is_null("sku").evaluate(&product("Gear", 1.0)));
    }

    #[test]
    fn inclusive_bounds_match_the_boundary() {
        let at_most = Predicate::less_or_equal("price", 10.0);
        let at_least = Predicate::greater_or_equal("price", 10_i64);
        assert!(at_most.evaluate(&product("Widget", 10.0)));
        assert!(at_least.evaluate(&product("Widget", 10.0)));
        assert!(!at_most.evaluate(&product("Gear", 10.5)));
        assert!(!at_least.evaluate(&product("Bolt", 9.5)));
        assert!(!Predicate::greater_or_equal("name", 1_i64).evaluate(&product("Bolt", 1.0)));
    }

    #[test]
    fn finish_sorts_then_pages() {
        let request = FetchRequest::new("Product")
            .sorted_by(SortDescriptor::descending("price"))
            .with_offset(1)
            .with_limit(2);
        let objects = vec![
            product("a", 1.0),
            product("b", 4.0),
            product("c", 3.0),
            product("d", 2.0),
        ];

        let names = request
            .finish(objects)
            .iter()
            .map(|object| object.text("name").unwrap_or_default().to_string())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["c", "d"]);
    }
}
