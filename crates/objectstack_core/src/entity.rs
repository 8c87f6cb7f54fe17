//! Typed helpers over managed objects.
//!
//! # Responsibility
//! - Map a Rust record type onto one model entity.
//! - Offer insert, fetch-request, get-all and count shortcuts that run
//!   against a caller-supplied context on that context's thread.
//!
//! # Invariants
//! - Helpers never save; inserted objects stay pending until the context
//!   is saved.
//! - Queries with no matches return an empty vector or zero, never an
//!   error.

use crate::context::ObjectContext;
use crate::error::StackResult;
use crate::fetch::{FetchRequest, Predicate};
use crate::model::object::{ManagedObject, ObjectId};
use crate::model::value::Value;

/// A record type stored as one model entity.
pub trait PersistedEntity: Sized {
    /// Entity name in the model; defaults to the unqualified type name.
    fn entity_name() -> &'static str {
        let full = std::any::type_name::<Self>();
        let path = full.split('<').next().unwrap_or(full);
        path.rsplit("::").next().unwrap_or(path)
    }

    /// Attribute values written on insert.
    fn to_values(&self) -> Vec<(String, Value)>;

    /// Rebuilds the record from a fetched object.
    fn from_object(object: &ManagedObject) -> StackResult<Self>;

    /// Registers `self` as a new object in `context`; not saved.
    fn insert(&self, context: &mut ObjectContext) -> StackResult<ObjectId> {
        self.insert_named(context, Self::entity_name())
    }

    fn insert_named(&self, context: &mut ObjectContext, entity_name: &str) -> StackResult<ObjectId> {
        context.insert_with_values(entity_name, self.to_values())
    }

    /// Inserts an object carrying only the model defaults.
    fn insert_blank(context: &mut ObjectContext) -> StackResult<ObjectId> {
        context.insert_object(Self::entity_name())
    }

    fn fetch_request() -> FetchRequest {
        FetchRequest::new(Self::entity_name())
    }

    fn fetch_request_with_entity_name(entity_name: &str) -> FetchRequest {
        FetchRequest::new(entity_name)
    }

    fn get_all(context: &ObjectContext) -> StackResult<Vec<Self>> {
        decode_all(context.execute_fetch(&Self::fetch_request())?)
    }

    fn get_all_matching(context: &ObjectContext, predicate: Predicate) -> StackResult<Vec<Self>> {
        let request = Self::fetch_request().with_predicate(predicate);
        decode_all(context.execute_fetch(&request)?)
    }

    fn count(context: &ObjectContext) -> StackResult<usize> {
        context.count(&Self::fetch_request())
    }

    fn count_matching(context: &ObjectContext, predicate: Predicate) -> StackResult<usize> {
        context.count(&Self::fetch_request().with_predicate(predicate))
    }
}

fn decode_all<T: PersistedEntity>(objects: Vec<ManagedObject>) -> StackResult<Vec<T>> {
    objects.iter().map(T::from_object).collect()
}

#[cfg(test)]
mod tests {
    use super::PersistedEntity;
    use crate::context::ObjectContext;
    use crate::error::{StackError, StackResult};
    use crate::fetch::Predicate;
    use crate::model::object::ManagedObject;
    use crate::model::schema::{AttributeDescription, AttributeType, EntityDescription, ObjectModel};
    use crate::model::value::Value;
    use crate::store::StoreCoordinator;
    use std::sync::Arc;

    #[derive(Debug, PartialEq)]
    struct Product {
        name: String,
        stock: i64,
    }

    impl PersistedEntity for Product {
        fn to_values(&self) -> Vec<(String, Value)> {
            vec![
                ("name".to_string(), Value::from(self.name.as_str())),
                ("stock".to_string(), Value::from(self.stock)),
            ]
        }

        fn from_object(object: &ManagedObject) -> StackResult<Self> {
            Ok(Self {
                name: object
                    .text("name")
                    .ok_or_else(|| StackError::decode(object.entity(), "name"))?
                    .to_string(),
                stock: object.integer("stock").unwrap_or(0),
            })
        }
    }

    struct LegacyItem;

    impl PersistedEntity for LegacyItem {
        fn entity_name() -> &'static str {
            "Product"
        }

        fn to_values(&self) -> Vec<(String, Value)> {
            Vec::new()
        }

        fn from_object(_object: &ManagedObject) -> StackResult<Self> {
            Ok(Self)
        }
    }

    fn context() -> ObjectContext {
        let model = Arc::new(
            ObjectModel::new("Catalog").with_entity(
                EntityDescription::new("Product")
                    .with_attribute(AttributeDescription::required("name", AttributeType::Text))
                    .with_attribute(
                        AttributeDescription::optional("stock", AttributeType::Integer)
                            .with_default(0_i64),
                    ),
            ),
        );
        let store = StoreCoordinator::open_in_memory(model.clone()).expect("store opens");
        ObjectContext::for_writer(model, store)
    }

    #[test]
    fn entity_name_defaults_to_type_name() {
        assert_eq!(Product::entity_name(), "Product");
        assert_eq!(LegacyItem::fetch_request().entity_name(), "Product");
    }

    #[test]
    fn empty_queries_return_nothing() {
        let context = context();
        assert!(Product::get_all(&context).expect("get_all").is_empty());
        assert_eq!(Product::count(&context).expect("count"), 0);
    }

    #[test]
    fn insert_then_query_before_and_after_save() {
        let mut context = context();
        let widget = Product {
            name: "Widget".to_string(),
            stock: 4,
        };
        widget.insert(&mut context).expect("insert");
        Product {
            name: "Bolt".to_string(),
            stock: 0,
        }
        .insert(&mut context)
        .expect("insert");

        assert_eq!(Product::count(&context).expect("count"), 2);
        context.save().expect("save");

        let in_stock = Product::get_all_matching(&context, Predicate::greater_than("stock", 0_i64))
            .expect("get_all_matching");
        assert_eq!(in_stock, vec![widget]);
        assert_eq!(
            Product::count_matching(&context, Predicate::equals("name", "Bolt")).expect("count"),
            1
        );
    }

    #[test]
    fn blank_insert_fails_decode_and_save() {
        let mut context = context();
        Product::insert_blank(&mut context).expect("insert");

        assert!(matches!(
            Product::get_all(&context),
            Err(StackError::Decode { .. })
        ));
        assert!(matches!(context.save(), Err(StackError::Validation(_))));
    }
}
