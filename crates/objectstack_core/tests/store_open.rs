use objectstack_core::db::migrations::{latest_version, schema_version};
use objectstack_core::db::{open_store, DbError};
use objectstack_core::{
    AttributeDescription, AttributeType, EntityDescription, ModelError, ModelSource, ObjectModel,
    PersistenceStack, StackConfig, StackError, StoreError,
};
use rusqlite::Connection;

fn catalog_model() -> ObjectModel {
    ObjectModel::new("Catalog").with_entity(
        EntityDescription::new("Product")
            .with_attribute(AttributeDescription::required("name", AttributeType::Text)),
    )
}

#[test]
fn open_store_creates_directory_and_schema() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("docs").join("Catalog.sqlite");

    let conn = open_store(&path).unwrap();
    assert_eq!(schema_version(&conn).unwrap(), latest_version());
    drop(conn);

    let conn = open_store(&path).unwrap();
    assert_eq!(schema_version(&conn).unwrap(), latest_version());
}

#[test]
fn newer_store_schema_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.sqlite");
    Connection::open(&path)
        .unwrap()
        .execute_batch("PRAGMA user_version = 999;")
        .unwrap();

    match open_store(&path).unwrap_err() {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn store_from_other_model_is_fatal_and_kept() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = StackConfig::new("Catalog")
        .unwrap()
        .with_model_source(ModelSource::Embedded(vec![catalog_model()]))
        .with_store_directory(dir.path());
    {
        let stack = PersistenceStack::new(catalog);
        stack
            .main_context()
            .unwrap()
            .insert_with_values("Product", [("name", "Widget")])
            .unwrap();
        stack.save_and_wait().unwrap();
    }

    let inventory = ObjectModel::new("Inventory").with_entity(
        EntityDescription::new("Bin")
            .with_attribute(AttributeDescription::required("label", AttributeType::Text)),
    );
    let stack = PersistenceStack::new(
        StackConfig::new("Inventory")
            .unwrap()
            .with_model_source(ModelSource::Embedded(vec![inventory]))
            .with_store_directory(dir.path())
            .with_store_file_name("Catalog.sqlite"),
    );

    let err = stack.main_context().err().unwrap();
    assert!(err.is_fatal());
    assert!(matches!(
        err,
        StackError::Store(StoreError::IncompatibleModel { .. })
    ));

    let rows: i64 = Connection::open(dir.path().join("Catalog.sqlite"))
        .unwrap()
        .query_row("SELECT COUNT(*) FROM objects;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(rows, 1);
}

#[test]
fn model_is_loaded_from_directory_resource() {
    let models = tempfile::tempdir().unwrap();
    let docs = tempfile::tempdir().unwrap();
    std::fs::write(
        models.path().join("Catalog.model.json"),
        serde_json::to_string_pretty(&catalog_model()).unwrap(),
    )
    .unwrap();

    let stack = PersistenceStack::new(
        StackConfig::new("Catalog")
            .unwrap()
            .with_model_source(ModelSource::Directory(models.path().to_path_buf()))
            .with_store_directory(docs.path()),
    );
    let model = stack.managed_object_model().unwrap();
    assert_eq!(**model, catalog_model());
    assert_eq!(
        stack.store_path().unwrap(),
        docs.path().join("Catalog.sqlite")
    );
}

#[test]
fn malformed_model_resource_is_fatal() {
    let models = tempfile::tempdir().unwrap();
    std::fs::write(models.path().join("Catalog.model.json"), "{ not json").unwrap();

    let stack = PersistenceStack::new(
        StackConfig::new("Catalog")
            .unwrap()
            .with_model_source(ModelSource::Directory(models.path().to_path_buf())),
    );
    let err = stack.managed_object_model().unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(err, StackError::Model(ModelError::Parse(_))));
    assert!(!stack.is_built());
}
