use std::{
    collections::HashMap,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Mutex,
        atomic::{AtomicU32, AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use settle_api::{CallContext, MemoryStore, ObjectStore, StoreError};
use settle_engine::{
    CallArgument, ErrorCategory, Operation, OrchestrationError, Orchestrator, OrchestratorConfig, RenderError, args,
};
use settle_types::{Bindings, GroupVersionKind, ListSelector, ObjectKey, ResourceHandle, TypedResource};

const CONFIG_MAP: &str = "
    apiVersion: v1
    kind: ConfigMap
    metadata:
      name: ${{ name }}
      namespace: ${{ namespace }}
      labels:
        app: ${{ app }}
    data:
      mode: ${{ mode }}
";

const TWO_CONFIG_MAPS: &str = "
    apiVersion: v1
    kind: ConfigMap
    metadata:
      name: ${{ name }}-a
      namespace: ${{ namespace }}
    ---
    apiVersion: v1
    kind: ConfigMap
    metadata:
      name: ${{ name }}-b
      namespace: ${{ namespace }}
";

fn config() -> OrchestratorConfig {
    OrchestratorConfig::default()
        .with_timeout(Duration::from_secs(2))
        .with_interval(Duration::from_millis(20))
        .with_binding("namespace", "default")
        .with_binding("app", "web")
        .with_binding("mode", "fast")
}

fn orchestrator<S: ObjectStore>(store: S) -> Orchestrator<S> {
    Orchestrator::with_config(store, config())
}

fn named(name: &str) -> Bindings {
    Bindings::new().with("name", name)
}

fn key(name: &str) -> ObjectKey {
    ObjectKey::new(
        GroupVersionKind::from_api_version("v1", "ConfigMap").expect("gvk"),
        Some("default".into()),
        name,
    )
}

/// Fails the first `failures` reads with a transport error.
struct FlakyReads {
    inner: MemoryStore,
    failures: AtomicU32,
}

impl FlakyReads {
    fn new(failures: u32) -> Self {
        Self {
            inner: MemoryStore::new(),
            failures: AtomicU32::new(failures),
        }
    }
}

impl ObjectStore for FlakyReads {
    fn get(&self, context: &CallContext, key: &ObjectKey) -> Result<Value, StoreError> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Transport("connection reset".into()));
        }
        self.inner.get(context, key)
    }

    fn create(&self, context: &CallContext, document: &Value) -> Result<Value, StoreError> {
        self.inner.create(context, document)
    }

    fn update(&self, context: &CallContext, document: &Value) -> Result<Value, StoreError> {
        self.inner.update(context, document)
    }

    fn patch(&self, context: &CallContext, key: &ObjectKey, merge_patch: &Value) -> Result<Value, StoreError> {
        self.inner.patch(context, key, merge_patch)
    }

    fn delete(&self, context: &CallContext, key: &ObjectKey) -> Result<(), StoreError> {
        self.inner.delete(context, key)
    }

    fn list(&self, context: &CallContext, selector: &ListSelector) -> Result<Vec<Value>, StoreError> {
        self.inner.list(context, selector)
    }
}

/// Serves the pre-write state of an object for the next `lag` reads after each write.
struct LaggingReads {
    inner: MemoryStore,
    lag: u32,
    extra_lag: HashMap<ObjectKey, u32>,
    stale: Mutex<HashMap<ObjectKey, (Option<Value>, u32)>>,
    reads: Mutex<HashMap<ObjectKey, usize>>,
}

impl LaggingReads {
    fn new(lag: u32) -> Self {
        Self {
            inner: MemoryStore::new(),
            lag,
            extra_lag: HashMap::new(),
            stale: Mutex::new(HashMap::new()),
            reads: Mutex::new(HashMap::new()),
        }
    }

    /// `key` stays stale for `extra` more reads than the others.
    fn slower(mut self, key: ObjectKey, extra: u32) -> Self {
        self.extra_lag.insert(key, extra);
        self
    }

    fn reads(&self, key: &ObjectKey) -> usize {
        self.reads.lock().expect("lock").get(key).copied().unwrap_or(0)
    }

    fn remember(&self, context: &CallContext, key: ObjectKey) {
        let previous = self.inner.get(context, &key).ok();
        let lag = self.lag + self.extra_lag.get(&key).copied().unwrap_or(0);
        self.stale.lock().expect("lock").insert(key, (previous, lag));
    }
}

impl ObjectStore for LaggingReads {
    fn get(&self, context: &CallContext, key: &ObjectKey) -> Result<Value, StoreError> {
        *self.reads.lock().expect("lock").entry(key.clone()).or_default() += 1;
        let mut stale = self.stale.lock().expect("lock");
        if let Some((previous, remaining)) = stale.get_mut(key)
            && *remaining > 0
        {
            *remaining -= 1;
            return previous.clone().ok_or_else(|| StoreError::NotFound { key: key.clone() });
        }
        drop(stale);
        self.inner.get(context, key)
    }

    fn create(&self, context: &CallContext, document: &Value) -> Result<Value, StoreError> {
        self.remember(context, ObjectKey::from_document(document).expect("key"));
        self.inner.create(context, document)
    }

    fn update(&self, context: &CallContext, document: &Value) -> Result<Value, StoreError> {
        self.remember(context, ObjectKey::from_document(document).expect("key"));
        self.inner.update(context, document)
    }

    fn patch(&self, context: &CallContext, key: &ObjectKey, merge_patch: &Value) -> Result<Value, StoreError> {
        self.remember(context, key.clone());
        self.inner.patch(context, key, merge_patch)
    }

    fn delete(&self, context: &CallContext, key: &ObjectKey) -> Result<(), StoreError> {
        self.remember(context, key.clone());
        self.inner.delete(context, key)
    }

    fn list(&self, context: &CallContext, selector: &ListSelector) -> Result<Vec<Value>, StoreError> {
        self.inner.list(context, selector)
    }
}

/// Counts every call that reaches the store.
#[derive(Default)]
struct CountingStore {
    inner: MemoryStore,
    calls: AtomicUsize,
}

impl CountingStore {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn count(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

impl ObjectStore for CountingStore {
    fn get(&self, context: &CallContext, key: &ObjectKey) -> Result<Value, StoreError> {
        self.count();
        self.inner.get(context, key)
    }

    fn create(&self, context: &CallContext, document: &Value) -> Result<Value, StoreError> {
        self.count();
        self.inner.create(context, document)
    }

    fn update(&self, context: &CallContext, document: &Value) -> Result<Value, StoreError> {
        self.count();
        self.inner.update(context, document)
    }

    fn patch(&self, context: &CallContext, key: &ObjectKey, merge_patch: &Value) -> Result<Value, StoreError> {
        self.count();
        self.inner.patch(context, key, merge_patch)
    }

    fn delete(&self, context: &CallContext, key: &ObjectKey) -> Result<(), StoreError> {
        self.count();
        self.inner.delete(context, key)
    }

    fn list(&self, context: &CallContext, selector: &ListSelector) -> Result<Vec<Value>, StoreError> {
        self.count();
        self.inner.list(context, selector)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Secret {
    metadata: serde_json::Map<String, Value>,
    #[serde(default)]
    data: std::collections::BTreeMap<String, String>,
}

impl TypedResource for Secret {
    const API_VERSION: &'static str = "v1";
    const KIND: &'static str = "Secret";
}

#[test]
fn create_and_wait_fills_handle_with_stored_state() {
    let orchestrator = orchestrator(MemoryStore::new());
    let context = CallContext::background();
    let mut handle = ResourceHandle::new();

    orchestrator.create_and_wait(&context, args![CONFIG_MAP, named("settings"), &mut handle]);

    assert_eq!(handle.key().expect("key"), key("settings"));
    assert!(handle.resource_version().is_some());
    let stored = orchestrator.store().get(&context, &key("settings")).expect("stored");
    assert_eq!(handle.state(), Some(&stored));
    assert_eq!(stored["metadata"]["labels"]["app"], "web");
}

#[test]
fn transient_read_failures_are_retried_on_the_interval() {
    let orchestrator = Orchestrator::with_config(FlakyReads::new(2), config().with_interval(Duration::from_millis(50)));
    let context = CallContext::background();
    let mut handle = ResourceHandle::new();

    let started = Instant::now();
    orchestrator
        .try_create_and_wait(&context, args![CONFIG_MAP, named("flaky"), &mut handle])
        .expect("create and wait");
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(100), "elapsed: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(1), "elapsed: {elapsed:?}");
    assert!(handle.resource_version().is_some());
}

#[test]
fn lagging_reads_are_polled_until_visible() {
    let orchestrator = orchestrator(LaggingReads::new(3));
    let context = CallContext::background();
    let mut handles = Vec::new();

    orchestrator.create_and_wait(&context, args![TWO_CONFIG_MAPS, named("lag"), &mut handles]);
    assert_eq!(handles.len(), 2);

    let mut first = handles.remove(0);
    let created_version = first.resource_version().expect("version");
    let mut state = first.state().cloned().expect("state");
    state["data"] = json!({ "mode": "slow" });
    first.set_state(state);
    orchestrator.update_and_wait(&context, args![&mut first]);
    let updated_version = first.resource_version().expect("version");
    assert!(updated_version.is_at_least(&created_version));
    assert_ne!(updated_version, created_version);
    assert_eq!(first.state().expect("state")["data"]["mode"], "slow");

    orchestrator.delete_and_wait(&context, args![&mut first]);
    assert!(!orchestrator.store().inner.contains(&key("lag-a")));
}

#[test]
fn repeated_updates_never_go_back_in_version() {
    let orchestrator = orchestrator(LaggingReads::new(1));
    let context = CallContext::background();
    let mut handle = ResourceHandle::new();
    orchestrator.create_and_wait(&context, args![CONFIG_MAP, named("counter"), &mut handle]);

    let mut previous = handle.resource_version().expect("version");
    for mode in ["a", "b", "c"] {
        let bindings = named("counter").with("mode", mode);
        orchestrator.update_and_wait(&context, args![CONFIG_MAP, bindings, &mut handle, "1s"]);
        let current = handle.resource_version().expect("version");
        assert!(current.is_at_least(&previous), "{current} < {previous}");
        assert_eq!(handle.state().expect("state")["data"]["mode"], mode);
        previous = current;
    }
}

#[test]
fn batch_update_waits_for_every_resource_under_one_budget() {
    let template = "
        apiVersion: v1
        kind: ConfigMap
        metadata:
          name: ${{ name }}-a
          namespace: ${{ namespace }}
        data:
          mode: ${{ mode }}
        ---
        apiVersion: v1
        kind: ConfigMap
        metadata:
          name: ${{ name }}-b
          namespace: ${{ namespace }}
        data:
          mode: ${{ mode }}
    ";
    let orchestrator = orchestrator(LaggingReads::new(1).slower(key("batch-b"), 3));
    let context = CallContext::background();
    let mut handles = Vec::new();
    orchestrator.create_and_wait(&context, args![template, named("batch"), &mut handles]);
    let before: Vec<_> = handles.iter().map(|handle| handle.resource_version().expect("version")).collect();
    let reads_before = [orchestrator.store().reads(&key("batch-a")), orchestrator.store().reads(&key("batch-b"))];

    orchestrator
        .try_update_and_wait(&context, args![template, named("batch").with("mode", "slow"), &mut handles])
        .expect("update and wait");

    for (handle, previous) in handles.iter().zip(&before) {
        let current = handle.resource_version().expect("version");
        assert!(current.is_at_least(previous), "{current} < {previous}");
        assert_ne!(&current, previous);
        assert_eq!(handle.state().expect("state")["data"]["mode"], "slow");
    }
    // batch-a is visible after two reads but is re-read on every tick until batch-b catches up.
    let reads_a = orchestrator.store().reads(&key("batch-a")) - reads_before[0];
    let reads_b = orchestrator.store().reads(&key("batch-b")) - reads_before[1];
    assert_eq!(reads_b, 5);
    assert_eq!(reads_a, reads_b);
}

#[test]
fn delete_of_absent_resource_fails_every_time() {
    let orchestrator = orchestrator(MemoryStore::new());
    let context = CallContext::background();
    orchestrator.create(&context, args![CONFIG_MAP, named("once")]).expect("create");
    orchestrator.delete(&context, args![CONFIG_MAP, named("once")]).expect("delete");

    for _ in 0..2 {
        let error = orchestrator.delete(&context, args![CONFIG_MAP, named("once")]).expect_err("absent");
        assert_eq!(error.category(), ErrorCategory::StoreMutation);
        assert!(error.store_error().is_some_and(StoreError::is_not_found), "{error}");
    }
}

#[test]
fn malformed_document_stops_before_any_mutation() {
    let orchestrator = orchestrator(CountingStore::default());
    let context = CallContext::background();
    let template = "
        apiVersion: v1
        kind: ConfigMap
        metadata:
          name: first
        ---
        apiVersion: v1
        kind: ConfigMap
        metadata: [broken
    ";

    let error = orchestrator.try_create_and_wait(&context, args![template]).expect_err("malformed");
    assert!(matches!(
        error,
        OrchestrationError::InvalidTemplateOrBindings(RenderError::Syntax { document: 2, .. })
    ));
    assert_eq!(orchestrator.store().calls(), 0);
}

#[test]
fn malformed_document_stops_batch_update_before_any_mutation() {
    let orchestrator = orchestrator(CountingStore::default());
    let context = CallContext::background();
    let template = "
        apiVersion: v1
        kind: ConfigMap
        metadata:
          name: first
        ---
        apiVersion: v1
        kind: ConfigMap
        metadata:
          name: second
        data: {mode: [broken
    ";
    let mut handles = Vec::new();

    let error = orchestrator
        .try_update_and_wait(&context, args![template, &mut handles])
        .expect_err("malformed");
    assert_eq!(error.category(), ErrorCategory::InvalidTemplateOrBindings);
    assert!(matches!(
        error,
        OrchestrationError::InvalidTemplateOrBindings(RenderError::Syntax { document: 2, .. })
    ));
    assert!(handles.is_empty());
    assert_eq!(orchestrator.store().calls(), 0);
}

#[test]
fn undefined_binding_stops_before_any_mutation() {
    let orchestrator = orchestrator(CountingStore::default());
    let context = CallContext::background();
    let error = orchestrator.create(&context, args![CONFIG_MAP]).expect_err("undefined name");
    assert_eq!(error.category(), ErrorCategory::InvalidTemplateOrBindings);
    assert!(error.to_string().contains("'name'"), "{error}");
    assert_eq!(orchestrator.store().calls(), 0);
}

#[test]
fn timeout_not_above_interval_fails_before_any_io() {
    let orchestrator = orchestrator(CountingStore::default());
    let context = CallContext::background();
    let error = orchestrator
        .try_create_and_wait(
            &context,
            args![
                CONFIG_MAP,
                named("x"),
                CallArgument::timeout(Duration::from_millis(100)),
                CallArgument::interval(Duration::from_millis(200)),
            ],
        )
        .expect_err("invalid wait");
    assert_eq!(error.category(), ErrorCategory::InvalidArguments);
    assert_eq!(orchestrator.store().calls(), 0);
}

#[test]
fn object_and_objects_conflict_everywhere() {
    let orchestrator = orchestrator(CountingStore::default());
    let context = CallContext::background();
    for operation in Operation::ALL {
        let mut handle = ResourceHandle::new();
        let mut handles = Vec::new();
        let arguments = args![CONFIG_MAP, named("x"), &mut handle, &mut handles];
        let error = match operation {
            Operation::Create => orchestrator.create(&context, arguments),
            Operation::CreateAndWait => orchestrator.try_create_and_wait(&context, arguments),
            Operation::Update => orchestrator.update(&context, arguments),
            Operation::UpdateAndWait => orchestrator.try_update_and_wait(&context, arguments),
            Operation::Delete => orchestrator.delete(&context, arguments),
            Operation::DeleteAndWait => orchestrator.try_delete_and_wait(&context, arguments),
            Operation::Get => orchestrator.get(&context, arguments),
            Operation::List => orchestrator.list(&context, arguments),
            Operation::Render => orchestrator.render(arguments).map(|_| ()),
        }
        .expect_err("conflict");
        assert_eq!(error.category(), ErrorCategory::InvalidArguments, "{operation}");
    }
    assert_eq!(orchestrator.store().calls(), 0);
}

#[test]
fn failed_batch_leaves_destinations_untouched() {
    let orchestrator = orchestrator(MemoryStore::new());
    let context = CallContext::background();
    orchestrator.create(&context, args![CONFIG_MAP, named("dup-b")]).expect("seed");

    let mut handles = Vec::new();
    let error = orchestrator
        .create(&context, args![TWO_CONFIG_MAPS, named("dup"), &mut handles])
        .expect_err("second create conflicts");
    match &error {
        OrchestrationError::StoreMutation { key: failed, source, .. } => {
            assert_eq!(failed, &key("dup-b"));
            assert!(matches!(source, StoreError::AlreadyExists { .. }));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(handles.is_empty());
    assert!(orchestrator.store().contains(&key("dup-a")));
}

#[test]
fn typed_destination_mismatch_is_caught_before_mutation() {
    let orchestrator = orchestrator(CountingStore::default());
    let context = CallContext::background();
    let mut secret = ResourceHandle::for_type::<Secret>();

    let error = orchestrator
        .create(&context, args![CONFIG_MAP, named("typed"), &mut secret])
        .expect_err("type mismatch");
    assert_eq!(error.category(), ErrorCategory::StateCopy);
    assert_eq!(secret.state(), None);
    assert_eq!(orchestrator.store().calls(), 0);
}

#[test]
fn wait_failure_is_reported_as_fatal() {
    let orchestrator = Orchestrator::with_config(
        FlakyReads::new(u32::MAX),
        config()
            .with_timeout(Duration::from_millis(100))
            .with_interval(Duration::from_millis(20)),
    );
    let context = CallContext::background();

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        orchestrator.create_and_wait(&context, args![CONFIG_MAP, named("unreachable")]);
    }));
    let payload = outcome.expect_err("create_and_wait must not return");
    let message = payload
        .downcast_ref::<String>()
        .cloned()
        .or_else(|| payload.downcast_ref::<&str>().map(|text| text.to_string()))
        .expect("panic message");
    assert!(
        message.starts_with("[FATAL] ConsistencyTimeoutError: create_and_wait failed:"),
        "{message}"
    );
    assert!(message.contains("connection reset"), "{message}");
    // The mutation itself succeeded.
    assert!(orchestrator.store().inner.contains(&key("unreachable")));
}

#[test]
fn cancelled_context_fails_the_mutation() {
    let orchestrator = orchestrator(MemoryStore::new());
    let context = CallContext::background();
    context.cancel();
    let error = orchestrator.create(&context, args![CONFIG_MAP, named("late")]).expect_err("cancelled");
    assert_eq!(error.store_error(), Some(&StoreError::Cancelled));
}

#[test]
fn get_refreshes_handles_and_reports_missing_resources() {
    let orchestrator = orchestrator(MemoryStore::new());
    let context = CallContext::background();
    let mut handle = ResourceHandle::new();
    orchestrator.create(&context, args![CONFIG_MAP, named("read-me"), &mut handle]).expect("create");
    orchestrator
        .update(&context, args![CONFIG_MAP, named("read-me").with("mode", "slow")])
        .expect("update");

    orchestrator.get(&context, args![&mut handle]).expect("get");
    assert_eq!(handle.state().expect("state")["data"]["mode"], "slow");

    let mut missing = ResourceHandle::new();
    let error = orchestrator
        .get(&context, args![CONFIG_MAP, named("nobody"), &mut missing])
        .expect_err("missing");
    assert_eq!(error.category(), ErrorCategory::StoreRead);
    assert_eq!(missing.state(), None);
}

#[test]
fn list_replaces_destination_contents() {
    let orchestrator = orchestrator(MemoryStore::new());
    let context = CallContext::background();
    orchestrator.create(&context, args![TWO_CONFIG_MAPS, named("listed")]).expect("create");
    orchestrator
        .create(&context, args![CONFIG_MAP, named("other"), Bindings::new().with("namespace", "elsewhere")])
        .expect("create other");

    let selector = ListSelector::new(GroupVersionKind::from_api_version("v1", "ConfigMap").expect("gvk")).in_namespace("default");
    let mut handles = vec![ResourceHandle::new()];
    orchestrator.list(&context, args![selector, &mut handles]).expect("list");
    let names: Vec<String> = handles.iter().map(|handle| handle.key().expect("key").name).collect();
    assert_eq!(names, ["listed-a", "listed-b"]);
}

#[test]
fn render_never_touches_the_store() {
    let orchestrator = orchestrator(CountingStore::default());
    let mut handles = Vec::new();
    let documents = orchestrator
        .render(args![TWO_CONFIG_MAPS, named("preview"), &mut handles])
        .expect("render");
    assert_eq!(documents.len(), 2);
    assert_eq!(documents[0]["metadata"]["namespace"], "default");
    assert_eq!(handles.len(), 2);
    assert_eq!(orchestrator.store().calls(), 0);
}

#[test]
fn dynamic_values_act_as_bindings_and_text() {
    let orchestrator = orchestrator(MemoryStore::new());
    let context = CallContext::background();
    let mut handle = ResourceHandle::new();
    orchestrator
        .try_create_and_wait(
            &context,
            args![json!({ "name": "dynamic" }), json!(CONFIG_MAP), json!("1s"), &mut handle],
        )
        .expect("create");
    assert_eq!(handle.key().expect("key").name, "dynamic");

    let error = orchestrator.create(&context, args![CONFIG_MAP, json!(true)]).expect_err("boolean");
    assert_eq!(error.to_string(), "unexpected argument type: boolean");
}

#[test]
fn template_files_and_file_config_drive_a_call() {
    let dir = tempfile::tempdir().expect("tempdir");
    let template = dir.path().join("config-map.yaml");
    std::fs::write(
        &template,
        "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: ${{ name }}\n  namespace: ${{ namespace }}\n",
    )
    .expect("write template");
    let config_path = dir.path().join("settle.yaml");
    std::fs::write(&config_path, "bindings:\n  namespace: staging\n  name: from-file\ninterval: 10ms\n").expect("write config");

    let config = temp_env::with_vars(
        [
            ("SETTLE_CONFIG_PATH", config_path.to_str()),
            ("SETTLE_TIMEOUT", Some("3s")),
            ("SETTLE_INTERVAL", None),
        ],
        OrchestratorConfig::load,
    )
    .expect("config");
    assert_eq!(config.timeout, Duration::from_secs(3));

    let orchestrator = Orchestrator::with_config(MemoryStore::new(), config);
    let context = CallContext::background();
    let mut handle = ResourceHandle::new();
    let path = template.to_str().expect("utf-8 path").to_string();
    orchestrator
        .try_create_and_wait(&context, args![path, &mut handle])
        .expect("create from file");
    let created = handle.key().expect("key");
    assert_eq!(created.name, "from-file");
    assert_eq!(created.namespace.as_deref(), Some("staging"));

    let missing = dir.path().join("missing.yaml");
    let error = orchestrator
        .create(&context, args![CallArgument::template_file(missing)])
        .expect_err("missing template file");
    assert_eq!(error.category(), ErrorCategory::InvalidArguments);
    assert!(error.to_string().starts_with("cannot read template file"), "{error}");
}
