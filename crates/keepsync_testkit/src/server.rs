//! An in-memory changes endpoint.
//!
//! `FakeKeepServer` keeps one versioned record per node id, assigns server
//! ids, pages results by version and can be scripted to reject tokens,
//! demand a full resync or recommend an upgrade.

use keepsync_model::timestamps::{epoch, str_to_dt};
use keepsync_sync_protocol::{ApiErrorBody, ApiReply, ChangesRequest, ChangesResponse, UserInfo};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::debug;

/// Default number of records per page.
pub const DEFAULT_PAGE_SIZE: usize = 100;

#[derive(Debug)]
struct Stored {
    record: Value,
    version: u64,
}

#[derive(Debug)]
struct ServerState {
    version: u64,
    nodes: BTreeMap<String, Stored>,
    tombstones: BTreeMap<String, u64>,
    labels: Vec<Value>,
    labels_version: u64,
    page_size: usize,
    force_resync: bool,
    upgrade_once: bool,
    token: Option<String>,
    next_server_id: u64,
    requests: Vec<ChangesRequest>,
}

impl Default for ServerState {
    fn default() -> Self {
        Self {
            version: 0,
            nodes: BTreeMap::new(),
            tombstones: BTreeMap::new(),
            labels: Vec::new(),
            labels_version: 0,
            page_size: DEFAULT_PAGE_SIZE,
            force_resync: false,
            upgrade_once: false,
            token: None,
            next_server_id: 1,
            requests: Vec::new(),
        }
    }
}

impl ServerState {
    fn bump(&mut self) -> u64 {
        self.version += 1;
        self.version
    }

    fn store(&mut self, mut record: Value) {
        let Some(id) = record.get("id").and_then(Value::as_str).map(str::to_owned) else {
            return;
        };
        if record.get("parentId").map_or(true, Value::is_null) {
            return;
        }
        if is_deleted(&record) {
            self.remove(&id);
            return;
        }

        let version = self.bump();
        let server_id = self
            .nodes
            .get(&id)
            .and_then(|s| s.record.get("serverId").cloned())
            .or_else(|| record.get("serverId").cloned())
            .unwrap_or_else(|| {
                let n = self.next_server_id;
                self.next_server_id += 1;
                json!(format!("srv.{n}"))
            });
        record["serverId"] = server_id;
        record["baseVersion"] = json!(version.to_string());
        self.tombstones.remove(&id);
        self.nodes.insert(id, Stored { record, version });
    }

    fn remove(&mut self, id: &str) {
        if self.nodes.remove(id).is_some() {
            let version = self.bump();
            self.tombstones.insert(id.to_owned(), version);
        }
    }

    fn page(&self, since: u64) -> ChangesResponse {
        let mut changes: Vec<(u64, Value)> = self
            .nodes
            .values()
            .filter(|s| s.version > since)
            .map(|s| (s.version, s.record.clone()))
            .chain(
                self.tombstones
                    .iter()
                    .filter(|(_, v)| **v > since)
                    .map(|(id, v)| (*v, json!({ "id": id, "kind": "notes#node" }))),
            )
            .collect();
        changes.sort_by_key(|(v, _)| *v);

        let truncated = changes.len() > self.page_size;
        changes.truncate(self.page_size);
        let to_version = match changes.last() {
            Some((v, _)) if truncated => *v,
            _ => self.version,
        };

        let mut response = ChangesResponse::new(to_version.to_string());
        response.truncated = truncated;
        response.nodes = changes.into_iter().map(|(_, record)| record).collect();
        if self.labels_version > since {
            response.user_info = Some(UserInfo {
                labels: Some(self.labels.clone()),
            });
        }
        response
    }
}

fn is_deleted(record: &Value) -> bool {
    record
        .pointer("/timestamps/deleted")
        .and_then(Value::as_str)
        .and_then(str_to_dt)
        .is_some_and(|dt| dt > epoch())
}

/// An in-memory implementation of the changes endpoint.
#[derive(Debug, Default)]
pub struct FakeKeepServer {
    state: Mutex<ServerState>,
}

impl FakeKeepServer {
    /// Creates an empty server.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of records per page.
    pub fn with_page_size(self, page_size: usize) -> Self {
        self.state.lock().page_size = page_size.max(1);
        self
    }

    /// Requires `token` on every post.
    pub fn with_token(self, token: &str) -> Self {
        self.state.lock().token = Some(token.to_owned());
        self
    }

    /// Stores a record as if written by another client.
    pub fn put_node(&self, record: Value) {
        self.state.lock().store(record);
    }

    /// Deletes a node as if by another client.
    pub fn delete_node(&self, id: &str) {
        self.state.lock().remove(id);
    }

    /// Nests a stored list item under `super_item`, or un-nests it.
    pub fn nest_item(&self, id: &str, super_item: Option<&str>) {
        let mut state = self.state.lock();
        let Some(mut record) = state.nodes.get(id).map(|s| s.record.clone()) else {
            return;
        };
        let prev = record
            .get("superListItemId")
            .cloned()
            .unwrap_or_else(|| json!(""));
        let next = super_item.unwrap_or("");
        record["superListItemId"] = json!(next);
        record["listItem"] = json!({
            "id": id,
            "prevSuperListItemId": prev,
            "superListItemId": next,
        });
        state.store(record);
    }

    /// Replaces the label list.
    pub fn set_labels(&self, labels: Vec<Value>) {
        let mut state = self.state.lock();
        state.labels = labels;
        state.labels_version = state.bump();
    }

    /// Makes every incremental request answer with `forceFullResync` until
    /// the client syncs from scratch.
    pub fn demand_full_resync(&self) {
        self.state.lock().force_resync = true;
    }

    /// Answers the next request with `upgradeRecommended`.
    pub fn recommend_upgrade(&self) {
        self.state.lock().upgrade_once = true;
    }

    /// Changes the required token.
    pub fn rotate_token(&self, token: &str) {
        self.state.lock().token = Some(token.to_owned());
    }

    /// Current version.
    pub fn version(&self) -> String {
        self.state.lock().version.to_string()
    }

    /// The stored record for `id`.
    pub fn node(&self, id: &str) -> Option<Value> {
        self.state.lock().nodes.get(id).map(|s| s.record.clone())
    }

    /// Number of stored nodes.
    pub fn node_count(&self) -> usize {
        self.state.lock().nodes.len()
    }

    /// The stored label list.
    pub fn labels(&self) -> Vec<Value> {
        self.state.lock().labels.clone()
    }

    /// Requests handled so far.
    pub fn requests(&self) -> Vec<ChangesRequest> {
        self.state.lock().requests.clone()
    }

    /// Number of requests handled so far.
    pub fn request_count(&self) -> usize {
        self.state.lock().requests.len()
    }

    /// Handles one decoded request.
    pub fn handle_changes(&self, request: &ChangesRequest) -> ApiReply {
        let mut state = self.state.lock();
        state.requests.push(request.clone());

        let since = match &request.target_version {
            Some(v) => match v.parse::<u64>() {
                Ok(v) => v,
                Err(_) => {
                    return ApiReply::Error(ApiErrorBody {
                        code: 400,
                        message: format!("bad targetVersion {v}"),
                    })
                }
            },
            None => {
                state.force_resync = false;
                0
            }
        };

        if state.force_resync {
            let mut response = ChangesResponse::new(state.version.to_string());
            response.force_full_resync = Some(true);
            return ApiReply::Changes(response);
        }
        if state.upgrade_once {
            state.upgrade_once = false;
            let mut response = ChangesResponse::new(state.version.to_string());
            response.upgrade_recommended = Some(true);
            return ApiReply::Changes(response);
        }

        for record in &request.nodes {
            state.store(record.clone());
        }
        if let Some(labels) = request.labels() {
            state.labels = labels.to_vec();
            state.labels_version = state.bump();
        }

        let response = state.page(since);
        debug!(
            since,
            to_version = %response.to_version,
            nodes = response.nodes.len(),
            truncated = response.truncated,
            "served page"
        );
        ApiReply::Changes(response)
    }

    /// Handles a raw POST, checking the bearer token.
    pub fn handle_post(&self, path: &str, body: &[u8], token: Option<&str>) -> Vec<u8> {
        let reply = self.route(path, body, token);
        reply.encode().unwrap_or_default()
    }

    fn route(&self, path: &str, body: &[u8], token: Option<&str>) -> ApiReply {
        let error = |code: i64, message: String| ApiReply::Error(ApiErrorBody { code, message });
        if path != "changes" {
            return error(404, format!("no such endpoint {path}"));
        }
        let required = self.state.lock().token.clone();
        if let Some(required) = required {
            if token != Some(required.as_str()) {
                return error(401, "invalid credentials".into());
            }
        }
        match ChangesRequest::decode(body) {
            Ok(request) => self.handle_changes(&request),
            Err(e) => error(400, e.to_string()),
        }
    }
}
