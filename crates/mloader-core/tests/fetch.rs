//! Integration tests for identifiers served by a transport

use mloader_core::{
    FetchRequest, Fetched, Loader, LoaderError, LoaderSettings, MemoryTransport, ModuleDescriptor,
    Source, Transport,
};
use mloader_promise::{Promise, SchedulerRef, State, TurnQueue, Value};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;

fn loader_with(transport: MemoryTransport) -> (Arc<TurnQueue>, Arc<MemoryTransport>, Loader) {
    let queue = TurnQueue::shared();
    let transport = Arc::new(transport);
    let loader = Loader::builder()
        .scheduler(queue.clone())
        .transport(transport.clone())
        .build();
    (queue, transport, loader)
}

fn loader_error(p: &Promise) -> Option<LoaderError> {
    p.value()?.first()?.downcast_error::<LoaderError>().cloned()
}

#[test]
fn test_fetched_value_becomes_module() {
    let (q, transport, loader) = loader_with(MemoryTransport::new().with_value("cfg", "loaded"));

    let p = loader.import("cfg");
    q.flush();

    assert_eq!(p.value(), Some(vec![Value::from("loaded")]));
    assert_eq!(transport.fetch_count("cfg"), 1);
}

#[test]
fn test_fetch_happens_once_per_identifier() {
    let bundle = |deps: &[&str]| {
        Source::Descriptors(vec![ModuleDescriptor::anonymous(
            deps.iter().map(|d| d.to_string()).collect::<Vec<_>>(),
            |values| Ok(Value::list(values.iter().cloned())),
        )])
    };
    let transport = MemoryTransport::new()
        .with("top", bundle(&["left", "right"]))
        .with("left", bundle(&["base"]))
        .with("right", bundle(&["base"]))
        .with_value("base", 1);
    let (q, transport, loader) = loader_with(transport);

    let first = loader.import("top");
    let second = loader.import(["top", "base"]);
    q.flush();

    assert_eq!(first.state(), State::Resolved);
    assert_eq!(second.state(), State::Resolved);
    for locator in ["top", "left", "right", "base"] {
        assert_eq!(transport.fetch_count(locator), 1, "{}", locator);
    }
    assert_eq!(transport.total_fetches(), 4);
}

#[test]
fn test_anonymous_script_is_paired_with_request() {
    let transport = MemoryTransport::new().with_script("anon", |define| {
        define.anonymous(&["dep"], |deps| Ok(deps[0].clone()))
    });
    let (q, _, loader) = loader_with(transport);
    loader.define(ModuleDescriptor::named_value("dep", "d")).unwrap();

    let p = loader.import("anon");
    q.flush();

    assert_eq!(p.value(), Some(vec![Value::from("d")]));
    assert_eq!(loader.registry().stats().anonymous, 0);
}

#[test]
fn test_script_may_define_requested_name() {
    let transport = MemoryTransport::new().with_script("named", |define| define.value("named", 3));
    let (q, _, loader) = loader_with(transport);

    let p = loader.import("named");
    q.flush();
    assert_eq!(p.value(), Some(vec![Value::from(3)]));
}

#[test]
fn test_script_defining_nothing_useful_rejects() {
    let transport =
        MemoryTransport::new().with_script("wrong", |define| define.value("elsewhere", 1));
    let (q, _, loader) = loader_with(transport);

    let p = loader.import("wrong");
    q.flush();

    assert_eq!(
        loader_error(&p),
        Some(LoaderError::UnresolvedIdentifier("wrong".into()))
    );
    // the stray definition is still usable
    let other = loader.import("elsewhere");
    q.flush();
    assert_eq!(other.value(), Some(vec![Value::from(1)]));
}

#[test]
fn test_script_error_rejects() {
    let transport = MemoryTransport::new().with_script("broken", |_| {
        Err(LoaderError::InvalidDefinition("syntax".into()))
    });
    let (q, _, loader) = loader_with(transport);

    let p = loader.import("broken");
    q.flush();
    assert_eq!(
        loader_error(&p),
        Some(LoaderError::InvalidDefinition("syntax".into()))
    );
}

#[test]
fn test_bundle_registers_siblings() {
    let transport = MemoryTransport::new().with(
        "main",
        Source::Descriptors(vec![
            ModuleDescriptor::named("main", ["helper"], |deps| Ok(deps[0].clone())),
            ModuleDescriptor::named_value("helper", "help"),
        ]),
    );
    let (q, transport, loader) = loader_with(transport);

    let p = loader.import("main");
    q.flush();

    assert_eq!(p.value(), Some(vec![Value::from("help")]));
    assert_eq!(transport.fetch_count("helper"), 0);
}

#[test]
fn test_transport_failure_is_forwarded() {
    let transport = MemoryTransport::new().with("down", Source::Failure("offline".into()));
    let (q, _, loader) = loader_with(transport);

    let p = loader.import("down");
    q.flush();
    assert_eq!(
        loader_error(&p),
        Some(LoaderError::Transport {
            id: "down".into(),
            reason: "offline".into(),
        })
    );
}

struct RawTransport;

impl Transport for RawTransport {
    fn fetch(&self, request: FetchRequest) -> Promise {
        let scheduler = request.scheduler().clone();
        match request.id() {
            "raw-error" => Promise::rejected(scheduler, vec![Value::from("raw"), Value::from(404)]),
            id => Promise::resolved(scheduler, vec![Value::from(format!("plain {}", id))]),
        }
    }
}

#[test]
fn test_custom_transport_plain_values_and_raw_rejections() {
    let q = TurnQueue::shared();
    let loader = Loader::builder()
        .scheduler(q.clone())
        .transport(Arc::new(RawTransport))
        .build();

    let ok = loader.import("thing");
    let err = loader.import("raw-error");
    q.flush();

    assert_eq!(ok.value(), Some(vec![Value::from("plain thing")]));
    assert_eq!(err.state(), State::Rejected);
    assert_eq!(err.value(), Some(vec![Value::from("raw"), Value::from(404)]));
}

#[test]
fn test_transforms_run_in_order() {
    let q = TurnQueue::shared();
    let transport = Arc::new(MemoryTransport::new().with_value("m", 1));
    let loader = Loader::builder()
        .scheduler(q.clone())
        .transport(transport)
        .transform(|id: &str, _d: ModuleDescriptor| -> Result<ModuleDescriptor, LoaderError> {
            Ok(ModuleDescriptor::named_value(id, "first"))
        })
        .transform(|id: &str, d: ModuleDescriptor| -> Result<ModuleDescriptor, LoaderError> {
            Ok(ModuleDescriptor::named("m", ["dep"], |deps| Ok(deps[0].clone()))
                .with_inline_deps(d.all_deps())
                .with_scoped_factory({
                    let id = id.to_string();
                    move |scope, deps| {
                        assert_eq!(scope.id(), id);
                        Ok(Value::list([deps[0].clone(), Value::from("second")]))
                    }
                }))
        })
        .build();
    loader.define(ModuleDescriptor::named_value("dep", 0)).unwrap();

    let p = loader.import("m");
    q.flush();
    assert_eq!(
        p.value(),
        Some(vec![Value::list([Value::from(0), Value::from("second")])])
    );
}

#[test]
fn test_transform_error_rejects() {
    let q = TurnQueue::shared();
    let loader = Loader::builder()
        .scheduler(q.clone())
        .transport(Arc::new(MemoryTransport::new().with_value("m", 1)))
        .transform(|_: &str, _: ModuleDescriptor| -> Result<ModuleDescriptor, LoaderError> {
            Err(LoaderError::InvalidDefinition("rejected by transform".into()))
        })
        .build();

    let p = loader.import("m");
    q.flush();
    assert_eq!(
        loader_error(&p),
        Some(LoaderError::InvalidDefinition("rejected by transform".into()))
    );
}

#[test]
fn test_settings_drive_locators() {
    let transport = MemoryTransport::new()
        .with_value("js/vendor/jquery", "$")
        .with_value("js/vendor/jquery?v=2", "wrong");
    let (q, transport, loader) = loader_with(transport);
    loader.configure(
        LoaderSettings::from_toml_str(
            r#"
base_url = "js"
url_args = "v=2"

[paths]
jq = "vendor/jquery"
"#,
        )
        .unwrap(),
    );

    let p = loader.import("jq");
    q.flush();

    assert_eq!(p.value(), Some(vec![Value::from("$")]));
    assert_eq!(transport.fetch_count("js/vendor/jquery"), 1);
}

#[test]
fn test_fetched_wrapper_values() {
    struct Wrapped;
    impl Transport for Wrapped {
        fn fetch(&self, request: FetchRequest) -> Promise {
            let value = Fetched::Value(Value::from(request.id().len() as i64)).into_value();
            Promise::resolved(request.scheduler().clone(), vec![value])
        }
    }

    let q = TurnQueue::shared();
    let loader = Loader::builder()
        .scheduler(q.clone())
        .transport(Arc::new(Wrapped))
        .build();

    let p = loader.import(["abc", "hello"]);
    q.flush();
    assert_eq!(p.value(), Some(vec![Value::from(3), Value::from(5)]));
}

#[test]
fn test_failed_import_is_logged() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("mloader_core=debug")
        .with_test_writer()
        .try_init();

    let (q, _, loader) = loader_with(MemoryTransport::new());
    let p = loader.import("nowhere");
    q.flush();

    assert_eq!(p.state(), State::Rejected);
    assert_eq!(
        loader_error(&p),
        Some(LoaderError::UnresolvedIdentifier("nowhere".into()))
    );
}

/// Hands out one pending promise per identifier for the test to settle
#[derive(Default)]
struct GatedTransport {
    gates: Mutex<FxHashMap<String, Promise>>,
}

impl GatedTransport {
    fn gate(&self, id: &str, scheduler: &SchedulerRef) -> Promise {
        self.gates
            .lock()
            .entry(id.to_string())
            .or_insert_with(|| Promise::new(scheduler.clone()))
            .clone()
    }
}

impl Transport for GatedTransport {
    fn fetch(&self, request: FetchRequest) -> Promise {
        self.gate(request.id(), request.scheduler())
    }
}

#[test]
fn test_dependencies_keep_declared_order_when_settling_out_of_order() {
    let q = TurnQueue::shared();
    let scheduler: SchedulerRef = q.clone();
    let transport = Arc::new(GatedTransport::default());
    let loader = Loader::builder()
        .scheduler(scheduler.clone())
        .transport(transport.clone())
        .build();
    loader
        .define(ModuleDescriptor::named("pair", ["a", "b"], |deps| {
            Ok(Value::list(deps.iter().cloned()))
        }))
        .unwrap();

    let p = loader.import("pair");
    q.flush();
    assert!(p.is_pending());

    transport.gate("b", &scheduler).resolve(vec![Value::from("b")]);
    q.flush();
    assert_eq!(loader.resolve("b").state(), State::Resolved);
    assert!(p.is_pending());

    transport.gate("a", &scheduler).resolve(vec![Value::from("a")]);
    q.flush();
    assert_eq!(
        p.value(),
        Some(vec![Value::list([Value::from("a"), Value::from("b")])])
    );
}
