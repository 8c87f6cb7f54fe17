use objectstack_core::{
    AttributeDescription, AttributeType, ChangeSummary, DurableWriteError, EntityDescription,
    FetchRequest, ManagedObject, ModelSource, ObjectModel, PersistedEntity, PersistenceStack,
    RetryPolicy, SavePhase, StackConfig, StackError, StackResult, StoreCoordinator,
    ValidationError, Value,
};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, PartialEq)]
struct Product {
    name: String,
}

impl PersistedEntity for Product {
    fn to_values(&self) -> Vec<(String, Value)> {
        vec![("name".to_string(), Value::from(self.name.as_str()))]
    }

    fn from_object(object: &ManagedObject) -> StackResult<Self> {
        let name = object
            .text("name")
            .ok_or_else(|| StackError::decode(object.entity(), "name"))?;
        Ok(Self {
            name: name.to_string(),
        })
    }
}

fn catalog_model() -> ObjectModel {
    ObjectModel::new("Catalog").with_entity(
        EntityDescription::new("Product")
            .with_attribute(AttributeDescription::required("name", AttributeType::Text))
            .with_attribute(AttributeDescription::optional("price", AttributeType::Real)),
    )
}

fn catalog_config(dir: &Path) -> StackConfig {
    StackConfig::new("Catalog")
        .unwrap()
        .with_model_source(ModelSource::Embedded(vec![catalog_model()]))
        .with_store_directory(dir)
}

fn reject_inserts(path: &Path) -> Connection {
    let side = Connection::open(path).unwrap();
    side.execute_batch(
        "CREATE TRIGGER reject_inserts BEFORE INSERT ON objects
         BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
    )
    .unwrap();
    side
}

fn stored_names(path: &Path) -> Vec<String> {
    let store = StoreCoordinator::open(Arc::new(catalog_model()), path).unwrap();
    store
        .fetch_matching(&FetchRequest::new("Product"))
        .unwrap()
        .iter()
        .map(|object| object.text("name").unwrap().to_string())
        .collect()
}

#[test]
fn save_without_changes_touches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let stack = PersistenceStack::new(catalog_config(dir.path()));
    let main = stack.main_context().unwrap();

    main.insert_with_values("Product", [("name", "Widget")])
        .unwrap();
    stack.save_and_wait().unwrap();

    let path = stack.store_path().unwrap();
    let before = std::fs::read(&path).unwrap();

    let outcome = stack.save().unwrap();
    assert!(outcome.is_no_op());
    assert_eq!(outcome.phase(), SavePhase::Idle);
    assert_eq!(outcome.wait().unwrap(), ChangeSummary::default());
    stack.flush().unwrap();

    assert_eq!(std::fs::read(&path).unwrap(), before);
    assert!(!main.has_changes().unwrap());
    assert!(stack.durable_pending().unwrap().is_empty());
}

#[test]
fn successive_saves_become_durable_in_issue_order() {
    let dir = tempfile::tempdir().unwrap();
    let stack = PersistenceStack::new(catalog_config(dir.path()));
    let main = stack.main_context().unwrap();

    let a = main.insert_with_values("Product", [("name", "A")]).unwrap();
    main.insert_with_values("Product", [("name", "B")]).unwrap();
    let first = stack.save().unwrap();

    main.insert_with_values("Product", [("name", "C")]).unwrap();
    main.set_value(a, "name", "A2").unwrap();
    let second = stack.save().unwrap();

    assert_eq!(second.wait().unwrap().inserted, 1);
    assert_eq!(first.phase(), SavePhase::Durable);
    let path = stack.store_path().unwrap();
    stack.shutdown();

    let names = stored_names(&path);
    assert_eq!(names.len(), 3);
    assert_eq!(names[2], "C");
    let mut earlier = names[..2].to_vec();
    earlier.sort();
    assert_eq!(earlier, vec!["A2".to_string(), "B".to_string()]);
}

#[test]
fn validation_failure_keeps_entity_in_foreground() {
    let dir = tempfile::tempdir().unwrap();
    let stack = PersistenceStack::new(catalog_config(dir.path()));
    let main = stack.main_context().unwrap();

    let id = main.insert_with_values("Product", [("price", 2.5)]).unwrap();
    let err = stack.save().unwrap_err();
    assert!(matches!(err, StackError::Validation(_)));
    assert!(!err.is_precondition_violation());

    assert!(main.has_changes().unwrap());
    assert_eq!(main.pending_changes().unwrap().inserted, 1);
    assert!(main.object(id).unwrap().is_some());
    assert!(stack.durable_pending().unwrap().is_empty());

    main.set_value(id, "name", "Widget").unwrap();
    assert_eq!(stack.save_and_wait().unwrap().inserted, 1);
}

#[test]
fn catalog_widget_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let stack = PersistenceStack::new(catalog_config(dir.path()));
        let main = stack.main_context().unwrap();
        main.perform(|context| {
            Product {
                name: "Widget".to_string(),
            }
            .insert(context)
        })
        .unwrap();
        let outcome = stack.save().unwrap();
        assert_ne!(outcome.phase(), SavePhase::Idle);
        stack.flush().unwrap();
        assert_eq!(outcome.phase(), SavePhase::Durable);
    }

    let reopened = PersistenceStack::new(catalog_config(dir.path()));
    let main = reopened.main_context().unwrap();
    let products = main.perform(|context| Product::get_all(context)).unwrap();
    assert_eq!(
        products,
        vec![Product {
            name: "Widget".to_string()
        }]
    );
}

#[test]
fn failed_durable_write_is_reported_and_retained() {
    let dir = tempfile::tempdir().unwrap();
    let reported: Arc<Mutex<Vec<DurableWriteError>>> = Arc::default();
    let sink = Arc::clone(&reported);
    let config = catalog_config(dir.path())
        .with_retry_policy(RetryPolicy {
            max_attempts: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 1,
        })
        .on_durable_write_error(move |err| sink.lock().unwrap().push(err.clone()));
    let stack = PersistenceStack::new(config);
    let main = stack.main_context().unwrap();

    let side = reject_inserts(&stack.store_path().unwrap());

    let id = main.insert_with_values("Product", [("name", "Widget")]).unwrap();
    let outcome = stack.save().unwrap();
    match outcome.wait() {
        Err(StackError::DurableWrite(err)) => {
            assert_eq!(err.attempts, 2);
            assert_eq!(err.pending.inserted, 1);
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(outcome.phase(), SavePhase::Failed);
    assert_eq!(reported.lock().unwrap().len(), 1);

    assert!(!main.has_changes().unwrap());
    assert!(main.object(id).unwrap().is_some());
    assert_eq!(stack.durable_pending().unwrap().inserted, 1);

    side.execute_batch("DROP TRIGGER reject_inserts;").unwrap();
    let retried = stack.retry_durable_write().unwrap();
    assert_eq!(retried.wait().unwrap().inserted, 1);
    assert!(stack.durable_pending().unwrap().is_empty());
    assert!(stack.retry_durable_write().unwrap().is_no_op());

    let stored: i64 = side
        .query_row("SELECT COUNT(*) FROM objects;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(stored, 1);
}

#[test]
fn retry_backoff_leaves_the_foreground_responsive() {
    let dir = tempfile::tempdir().unwrap();
    let config = catalog_config(dir.path()).with_retry_policy(RetryPolicy {
        max_attempts: 3,
        initial_backoff_ms: 400,
        max_backoff_ms: 400,
    });
    let stack = PersistenceStack::new(config);
    let main = stack.main_context().unwrap();
    let side = reject_inserts(&stack.store_path().unwrap());

    main.insert_with_values("Product", [("name", "Widget")]).unwrap();
    let first = stack.save().unwrap();

    let started = Instant::now();
    stack.flush().unwrap();
    assert_eq!(main.count(&FetchRequest::new("Product")).unwrap(), 1);
    main.insert_with_values("Product", [("name", "Bolt")]).unwrap();
    let second = stack.save().unwrap();
    assert!(started.elapsed() < Duration::from_millis(300));
    assert_eq!(first.phase(), SavePhase::QueuedForDurableWrite);

    match first.wait() {
        Err(StackError::DurableWrite(err)) => assert_eq!(err.attempts, 3),
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(matches!(second.wait(), Err(StackError::DurableWrite(_))));
    assert_eq!(stack.durable_pending().unwrap().inserted, 2);

    side.execute_batch("DROP TRIGGER reject_inserts;").unwrap();
    assert_eq!(stack.retry_durable_write().unwrap().wait().unwrap().inserted, 2);
}

#[test]
fn non_finite_price_never_reaches_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let stack = PersistenceStack::new(catalog_config(dir.path()));
    let main = stack.main_context().unwrap();

    for price in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
        let err = main
            .insert_with_values(
                "Product",
                [("name", Value::from("Gear")), ("price", Value::from(price))],
            )
            .unwrap_err();
        assert!(matches!(
            err,
            StackError::Validation(ValidationError::NonFiniteReal { .. })
        ));
    }
    assert!(!main.has_changes().unwrap());

    let id = main.insert_with_values("Product", [("name", "Widget")]).unwrap();
    let err = main.set_value(id, "price", f64::INFINITY).unwrap_err();
    assert!(matches!(
        err,
        StackError::Validation(ValidationError::NonFiniteReal { .. })
    ));
    main.set_value(id, "price", 9.5).unwrap();
    stack.save_and_wait().unwrap();

    let request = FetchRequest::new("Product");
    assert_eq!(main.count(&request).unwrap(), 1);
    assert_eq!(main.execute_fetch(&request).unwrap()[0].real("price"), Some(9.5));
    let path = stack.store_path().unwrap();
    stack.shutdown();
    assert_eq!(stored_names(&path), vec!["Widget".to_string()]);
}
