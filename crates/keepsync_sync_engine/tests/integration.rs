//! Integration tests for the sync engine against an in-memory server.

use keepsync_model::{Element, Mirror};
use keepsync_sync_engine::{
    HttpTransport, LoopbackClient, LoopbackServer, MemorySyncApplier, RetryConfig, SyncApplier,
    SyncConfig, SyncEngine, SyncError, SyncResult, SyncTransport, TokenProvider,
};
use keepsync_sync_protocol::{ApiReply, ChangesRequest, ChangesResponse};
use keepsync_testkit::prelude::*;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A transport that connects to an in-memory server.
struct InMemoryTransport {
    server: Arc<FakeKeepServer>,
    fail_next: AtomicBool,
}

impl InMemoryTransport {
    fn new(server: Arc<FakeKeepServer>) -> Self {
        Self {
            server,
            fail_next: AtomicBool::new(false),
        }
    }
}

impl SyncTransport for InMemoryTransport {
    fn changes(&self, request: &ChangesRequest) -> SyncResult<ChangesResponse> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(SyncError::transport_retryable("connection reset"));
        }
        match self.server.handle_changes(request) {
            ApiReply::Changes(response) => Ok(response),
            ApiReply::Error(error) => Err(SyncError::Api {
                code: error.code,
                message: error.message,
            }),
        }
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn close(&self) -> SyncResult<()> {
        Ok(())
    }
}

fn engine(
    server: &Arc<FakeKeepServer>,
    mirror: Mirror,
) -> SyncEngine<InMemoryTransport, MemorySyncApplier> {
    init_tracing();
    SyncEngine::new(
        SyncConfig::new("s--1--test"),
        InMemoryTransport::new(Arc::clone(server)),
        MemorySyncApplier::new(mirror),
    )
}

#[test]
fn truncated_pages_converge() {
    let server = Arc::new(FakeKeepServer::new().with_page_size(2));
    for i in 0..5 {
        server.put_node(NodeRecord::note(&format!("n{i}")).title("remote").build());
    }

    let engine = engine(&server, seeded_mirror(1));
    let result = engine.sync(false).unwrap();

    assert!(result.success);
    assert_eq!(result.pages, 3);
    assert_eq!(result.nodes_created, 5);
    assert_eq!(result.version.as_deref(), Some("5"));

    let targets: Vec<Option<String>> = server
        .requests()
        .into_iter()
        .map(|r| r.target_version)
        .collect();
    assert_eq!(targets, vec![None, Some("2".into()), Some("4".into())]);

    let mirror = engine.applier().lock();
    assert_eq!(mirror.version(), Some("5"));
    assert_eq!(mirror.all().len(), 5);
}

#[test]
fn local_changes_reach_the_server_once() {
    let server = Arc::new(FakeKeepServer::new());
    let mut mirror = seeded_mirror(2);
    let note = mirror.create_note("groceries", "milk").unwrap();
    mirror
        .create_list("todo", &[("one", false), ("two", true)])
        .unwrap();

    let engine = engine(&server, mirror);
    let first = engine.sync(false).unwrap();
    // The note's text lives in a child item.
    assert_eq!(first.nodes_sent, 5);
    assert_eq!(server.node_count(), 5);

    {
        let mirror = engine.applier().lock();
        let synced = mirror.get(&note).unwrap();
        assert!(synced.server_id().is_some_and(|s| s.starts_with("srv.")));
        assert_eq!(mirror.version().map(str::to_owned), Some(server.version()));
    }

    let second = engine.sync(false).unwrap();
    assert_eq!(second.nodes_sent, 0);
    assert!(server.requests()[1].nodes.is_empty());
}

#[test]
fn full_resync_leaves_store_untouched_until_requested() {
    let server = Arc::new(FakeKeepServer::new());
    server.put_node(NodeRecord::note("a").title("first").build());
    let engine = engine(&server, seeded_mirror(3));
    engine.sync(false).unwrap();

    server.demand_full_resync();
    server.put_node(NodeRecord::note("b").title("second").build());
    let pending = engine.applier().lock().create_note("local", "").unwrap();

    let err = engine.sync(false).unwrap_err();
    assert!(matches!(err, SyncError::ResyncRequired));
    assert!(err.requires_resync());
    {
        let mirror = engine.applier().lock();
        assert_eq!(mirror.version(), Some("1"));
        assert!(mirror.get("b").is_none());
        assert!(mirror.get(&pending).unwrap().dirty());
    }

    let result = engine.sync(true).unwrap();
    assert_eq!(result.nodes_created, 2);
    let mirror = engine.applier().lock();
    assert!(mirror.get("a").is_some());
    assert!(mirror.get("b").is_some());
    assert!(mirror.get(&pending).is_none());
    assert_eq!(mirror.version().map(str::to_owned), Some(server.version()));
}

#[test]
fn upgrade_recommendation_is_retryable() {
    let server = Arc::new(FakeKeepServer::new());
    server.put_node(NodeRecord::note("a").build());
    server.recommend_upgrade();
    let engine = engine(&server, seeded_mirror(4));

    let err = engine.sync(false).unwrap_err();
    assert!(matches!(err, SyncError::UpgradeRecommended));
    assert!(err.is_retryable());
    assert!(engine.applier().lock().get("a").is_none());

    engine.sync(false).unwrap();
    assert!(engine.applier().lock().get("a").is_some());
    assert_eq!(engine.stats().cycles_completed, 1);
}

#[test]
fn remote_deletion_removes_subtree() {
    let server = Arc::new(FakeKeepServer::new());
    server.put_node(NodeRecord::list("l").title("chores").build());
    server.put_node(NodeRecord::list_item("i1", "l").text("sweep").build());
    server.put_node(NodeRecord::list_item("i2", "l").text("mop").build());
    let engine = engine(&server, seeded_mirror(5));
    engine.sync(false).unwrap();
    assert_eq!(engine.applier().lock().store().list_items("l").unwrap().len(), 2);

    server.delete_node("l");
    let result = engine.sync(false).unwrap();
    assert_eq!(result.nodes_deleted, 3);

    let mirror = engine.applier().lock();
    assert!(mirror.get("l").is_none());
    assert!(mirror.get("i1").is_none());
    assert!(mirror.get("i2").is_none());
}

#[test]
fn remote_nesting_changes_list_order() {
    let server = Arc::new(FakeKeepServer::new());
    server.put_node(NodeRecord::list("l").title("Chores").build());
    server.put_node(NodeRecord::list_item("a", "l").text("a").sort(3_000).build());
    server.put_node(NodeRecord::list_item("b", "l").text("b").sort(2_000).build());
    server.put_node(NodeRecord::list_item("c", "l").text("c").sort(1_000).build());
    let engine = engine(&server, seeded_mirror(6));
    engine.sync(false).unwrap();
    assert_eq!(
        engine.applier().lock().store().list_items("l").unwrap(),
        vec!["a", "b", "c"]
    );

    server.nest_item("c", Some("a"));
    engine.sync(false).unwrap();
    {
        let mirror = engine.applier().lock();
        assert_eq!(mirror.store().list_items("l").unwrap(), vec!["a", "c", "b"]);
        let item = mirror.get("c").unwrap().list_item().unwrap();
        assert_eq!(item.parent_item(), Some("a"));
        assert_eq!(mirror.text_of("l").unwrap(), "Chores\n☐ a\n  ☐ c\n☐ b");
    }

    server.nest_item("c", None);
    engine.sync(false).unwrap();
    let mirror = engine.applier().lock();
    assert_eq!(mirror.store().list_items("l").unwrap(), vec!["a", "b", "c"]);
    assert!(mirror.get("a").unwrap().list_item().unwrap().subitems().is_empty());
}

#[test]
fn failed_exchange_resends_local_changes() {
    let server = Arc::new(FakeKeepServer::new());
    let mut mirror = seeded_mirror(7);
    let note = mirror.create_note("draft", "body").unwrap();
    let engine = engine(&server, mirror);

    engine.transport().fail_next.store(true, Ordering::SeqCst);
    let err = engine.sync(false).unwrap_err();
    assert!(err.is_retryable());
    assert!(engine.applier().lock().get(&note).unwrap().dirty());
    assert_eq!(server.node_count(), 0);

    let result = engine.sync(false).unwrap();
    assert_eq!(result.nodes_sent, 2);
    assert!(server.node(&note).is_some());
}

#[test]
fn labels_flow_both_ways() {
    let server = Arc::new(FakeKeepServer::new());
    let mut mirror = seeded_mirror(8);
    let note = mirror.create_note("tagged", "").unwrap();
    let work = mirror.create_label("Work").unwrap();
    mirror.label_node(&note, &work).unwrap();
    let engine = engine(&server, mirror);

    let first = engine.sync(false).unwrap();
    assert_eq!(first.labels_sent, 1);
    assert_eq!(server.labels().len(), 1);

    let mut labels = server.labels();
    labels.push(label_record("tag.home", "Home"));
    server.set_labels(labels);
    server.put_node(NodeRecord::note("remote").label("tag.home").build());

    engine.sync(false).unwrap();
    let mirror = engine.applier().lock();
    assert_eq!(mirror.labels().len(), 2);
    assert!(mirror.labels().find("home").is_some());
    let remote = mirror.get("remote").unwrap().top_level().unwrap();
    assert!(remote.labels().contains("tag.home"));
    let local = mirror.get(&note).unwrap().top_level().unwrap();
    assert!(local.labels().contains(&work));
}

/// Routes loopback posts into a shared fake server.
struct KeepEndpoint(Arc<FakeKeepServer>);

impl LoopbackServer for KeepEndpoint {
    fn handle_post(&self, path: &str, body: &[u8], token: Option<&str>) -> Result<Vec<u8>, String> {
        Ok(self.0.handle_post(path, body, token))
    }
}

/// Hands out tokens from a fixed sequence, advancing on refresh.
struct RotatingTokens {
    tokens: Vec<String>,
    current: Mutex<usize>,
}

impl RotatingTokens {
    fn new(tokens: &[&str]) -> Self {
        Self {
            tokens: tokens.iter().map(|t| (*t).to_owned()).collect(),
            current: Mutex::new(0),
        }
    }
}

impl TokenProvider for RotatingTokens {
    fn token(&self) -> Option<String> {
        self.tokens.get(*self.current.lock()).cloned()
    }

    fn refresh(&self) -> Result<String, String> {
        let mut current = self.current.lock();
        *current += 1;
        self.tokens
            .get(*current)
            .cloned()
            .ok_or_else(|| "no more tokens".to_string())
    }
}

#[test]
fn http_loopback_refreshes_rotated_token() {
    init_tracing();
    let server = Arc::new(FakeKeepServer::new().with_token("t0"));
    server.put_node(NodeRecord::note("a").build());

    let config = SyncConfig::new("s--2--test").with_retry(RetryConfig::immediate(2));
    let transport = HttpTransport::new(
        &config,
        LoopbackClient::new(KeepEndpoint(Arc::clone(&server))),
        RotatingTokens::new(&["t0", "t1"]),
    );
    let engine = SyncEngine::new(config, transport, MemorySyncApplier::new(seeded_mirror(9)));

    engine.sync(false).unwrap();
    assert!(engine.applier().lock().get("a").is_some());

    server.rotate_token("t1");
    server.put_node(NodeRecord::note("b").build());
    engine.sync(false).unwrap();
    assert!(engine.applier().lock().get("b").is_some());

    server.rotate_token("t2");
    let err = engine.sync(false).unwrap_err();
    assert!(matches!(err, SyncError::AuthenticationFailed(_)));
    assert!(engine.stats().last_error.is_some());
}
