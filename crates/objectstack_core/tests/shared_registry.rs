use objectstack_core::{
    configure, is_configured, shared_manager, AttributeDescription, AttributeType, ConfigError,
    EntityDescription, FetchRequest, ModelSource, ObjectModel, StackConfig,
};
use std::sync::{Arc, Barrier};

const RACERS: usize = 8;

// Registry state is process-wide, so this binary holds a single test.
#[test]
fn concurrent_first_access_builds_one_stack() {
    let dir = tempfile::tempdir().unwrap();
    let model = ObjectModel::new("Catalog").with_entity(
        EntityDescription::new("Product")
            .with_attribute(AttributeDescription::required("name", AttributeType::Text)),
    );
    configure(
        StackConfig::new("Catalog")
            .unwrap()
            .with_model_source(ModelSource::Embedded(vec![model]))
            .with_store_directory(dir.path()),
    )
    .unwrap();
    assert!(is_configured());

    let barrier = Arc::new(Barrier::new(RACERS));
    let racers: Vec<_> = (0..RACERS)
        .map(|_| {
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                let stack = shared_manager().unwrap();
                let writer = stack.writer_context().unwrap();
                let model = stack.managed_object_model().unwrap();
                let main = stack.main_context().unwrap();
                (
                    stack as *const _ as usize,
                    Arc::as_ptr(model) as usize,
                    writer.handle().thread_id(),
                    main as *const _ as usize,
                )
            })
        })
        .collect();
    let observed: Vec<_> = racers.into_iter().map(|racer| racer.join().unwrap()).collect();

    assert!(observed.windows(2).all(|pair| pair[0] == pair[1]));
    let stack = shared_manager().unwrap();
    assert_eq!(observed[0].0, stack as *const _ as usize);
    assert_eq!(observed[0].3, stack.main_context().unwrap() as *const _ as usize);

    let store_files: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name())
        .collect();
    assert_eq!(store_files, vec![std::ffi::OsString::from("Catalog.sqlite")]);

    assert!(matches!(
        configure(StackConfig::new("Catalog").unwrap()),
        Err(ConfigError::AlreadyBuilt)
    ));

    let main = stack.main_context().unwrap();
    main.insert_with_values("Product", [("name", "Widget")])
        .unwrap();
    stack.save_and_wait().unwrap();
    assert_eq!(main.count(&FetchRequest::new("Product")).unwrap(), 1);
}
