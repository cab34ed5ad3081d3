//! The paging sync loop and its state machine.
//!
//! One cycle exchanges pages with the changes endpoint until the server
//! stops truncating, applying labels before nodes on every page.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use keepsync_model::{now_millis, Mirror, Outgoing};
use keepsync_sync_protocol::ChangesRequest;
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Where the engine is within a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No cycle running.
    Idle,
    /// Engine is exchanging a page with the server.
    Sending,
    /// Engine is applying a received page.
    Applying,
    /// The last cycle failed.
    Error,
}

impl SyncState {
    /// True while a page is being sent or applied.
    pub fn is_active(&self) -> bool {
        matches!(self, SyncState::Sending | SyncState::Applying)
    }

    /// True if `sync` may be called.
    pub fn can_start_sync(&self) -> bool {
        matches!(self, SyncState::Idle | SyncState::Error)
    }
}

/// Counters accumulated across cycles.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Cycles that ran to an untruncated page.
    pub cycles_completed: u64,
    /// Total number of pages exchanged.
    pub pages_exchanged: u64,
    /// Total number of node records sent.
    pub nodes_sent: u64,
    /// Total number of node records applied.
    pub nodes_applied: u64,
    /// Total number of merge conflicts reported.
    pub merge_conflicts: u64,
    /// Last successful sync time.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Outcome of one `sync` call.
#[derive(Debug, Clone, Default)]
pub struct SyncCycleResult {
    /// Pages exchanged.
    pub pages: u32,
    /// Node records sent.
    pub nodes_sent: usize,
    /// Label records sent.
    pub labels_sent: usize,
    /// Nodes created from server records.
    pub nodes_created: usize,
    /// Nodes updated from server records.
    pub nodes_updated: usize,
    /// Nodes removed by server tombstones.
    pub nodes_deleted: usize,
    /// Server records that could not be loaded.
    pub nodes_discarded: usize,
    /// Labels created, updated or removed.
    pub labels_changed: usize,
    /// Ids of nodes the server reported merge conflicts for.
    pub merge_conflicts: Vec<String>,
    /// Version confirmed by the last page.
    pub version: Option<String>,
    /// Whether the cycle completed.
    pub success: bool,
    /// Wall time spent in the cycle.
    pub duration: Duration,
}

impl SyncCycleResult {
    /// Node records applied from the server.
    pub fn nodes_applied(&self) -> usize {
        self.nodes_created + self.nodes_updated + self.nodes_deleted
    }
}

/// Owner of the mirror a sync engine reads from and applies into.
pub trait SyncApplier: Send + Sync {
    /// Locks the mirror for the duration of a cycle.
    fn lock(&self) -> MutexGuard<'_, Mirror>;

    /// Called after every applied page.
    fn persist(&self, mirror: &mut Mirror) -> SyncResult<()>;
}

/// The sync engine drives the delta loop against a remote server.
pub struct SyncEngine<T: SyncTransport, A: SyncApplier> {
    config: SyncConfig,
    transport: Arc<T>,
    applier: Arc<A>,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
    cancelled: AtomicBool,
}

impl<T: SyncTransport, A: SyncApplier> SyncEngine<T, A> {
    /// Wraps a transport and an applier.
    pub fn new(config: SyncConfig, transport: T, applier: A) -> Self {
        Self {
            config,
            transport: Arc::new(transport),
            applier: Arc::new(applier),
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// A copy of the counters.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// The configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The applier.
    pub fn applier(&self) -> &A {
        &self.applier
    }

    /// Requests cancellation. Honored between pages.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Withdraws a pending cancel.
    pub fn reset_cancel(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    fn check_cancelled(&self) -> SyncResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn set_state(&self, state: SyncState) {
        *self.state.write() = state;
    }

    /// Runs one sync cycle, following truncated pages until caught up.
    ///
    /// With `resync` the mirror is cleared first and the full account is
    /// fetched from version zero.
    pub fn sync(&self, resync: bool) -> SyncResult<SyncCycleResult> {
        let start = Instant::now();

        if !self.state().can_start_sync() {
            return Err(SyncError::InvalidStateTransition {
                from: format!("{:?}", self.state()),
                to: "Sending".into(),
            });
        }
        if !self.transport.is_connected() {
            let err = SyncError::NotConnected;
            self.handle_error(&err);
            return Err(err);
        }

        let mut result = SyncCycleResult::default();
        let mut mirror = self.applier.lock();
        if resync {
            info!("clearing local state for full resync");
            mirror.clear();
        }

        let outcome = self.run_pages(&mut mirror, &mut result);
        result.duration = start.elapsed();
        if let Err(e) = outcome {
            self.handle_error(&e);
            return Err(e);
        }

        result.success = true;
        self.reset_cancel();
        self.set_state(SyncState::Idle);
        {
            let mut stats = self.stats.write();
            stats.cycles_completed += 1;
            stats.last_sync_time = Some(Instant::now());
            stats.last_error = None;
        }
        info!(
            pages = result.pages,
            sent = result.nodes_sent,
            applied = result.nodes_applied(),
            version = result.version.as_deref().unwrap_or(""),
            "sync cycle complete"
        );
        Ok(result)
    }

    fn run_pages(&self, mirror: &mut Mirror, result: &mut SyncCycleResult) -> SyncResult<()> {
        loop {
            if result.pages >= self.config.max_pages {
                return Err(SyncError::Protocol(format!(
                    "server still truncated after {} pages",
                    result.pages
                )));
            }
            self.set_state(SyncState::Sending);

            let Outgoing {
                nodes,
                node_ids,
                labels,
                label_ids,
            } = mirror.outgoing();
            let sent = Outgoing {
                node_ids,
                label_ids,
                ..Outgoing::default()
            };
            let nodes_sent = nodes.len();
            let labels_sent = labels.as_ref().map_or(0, Vec::len);
            let request = ChangesRequest::new(self.config.request_header(), now_millis())
                .with_target_version(mirror.version().map(str::to_owned))
                .with_nodes(nodes)
                .with_labels(labels);
            debug!(
                target_version = mirror.version().unwrap_or(""),
                nodes = nodes_sent,
                labels = labels_sent,
                "sending page"
            );

            let response = match self.transport.changes(&request) {
                Ok(response) => response,
                Err(e) => {
                    warn!(error = %e, "exchange failed, keeping local changes dirty");
                    mirror.remark_dirty(&sent);
                    return Err(e);
                }
            };
            result.pages += 1;
            result.nodes_sent += nodes_sent;
            result.labels_sent += labels_sent;
            {
                let mut stats = self.stats.write();
                stats.pages_exchanged += 1;
                stats.nodes_sent += nodes_sent as u64;
            }

            if response.requires_full_resync() {
                mirror.remark_dirty(&sent);
                return Err(SyncError::ResyncRequired);
            }
            if response.recommends_upgrade() {
                mirror.remark_dirty(&sent);
                return Err(SyncError::UpgradeRecommended);
            }

            self.set_state(SyncState::Applying);
            let applied = match mirror.apply_page(response.labels(), &response.nodes) {
                Ok(applied) => applied,
                Err(e) => {
                    warn!(error = %e, "page rejected, keeping local changes dirty");
                    mirror.remark_dirty(&sent);
                    return Err(e.into());
                }
            };
            if let Some(labels) = &applied.labels {
                result.labels_changed += labels.created + labels.updated + labels.removed;
            }
            let report = applied.nodes;
            for id in &report.merge_conflicts {
                warn!(node = %id, "server reported a merge conflict");
            }
            result.nodes_created += report.created;
            result.nodes_updated += report.updated;
            result.nodes_deleted += report.deleted;
            result.nodes_discarded += report.discarded;
            {
                let mut stats = self.stats.write();
                stats.nodes_applied += (report.created + report.updated + report.deleted) as u64;
                stats.merge_conflicts += report.merge_conflicts.len() as u64;
            }
            result.merge_conflicts.extend(report.merge_conflicts);

            mirror.set_version(Some(response.to_version.clone()));
            result.version = Some(response.to_version);
            self.applier.persist(mirror)?;

            if !response.truncated {
                return Ok(());
            }
            self.check_cancelled()?;
        }
    }

    fn handle_error(&self, error: &SyncError) {
        self.reset_cancel();
        self.set_state(SyncState::Error);
        self.stats.write().last_error = Some(error.to_string());
    }
}

/// An in-memory sync applier.
#[derive(Debug, Default)]
pub struct MemorySyncApplier {
    mirror: Mutex<Mirror>,
    persisted: AtomicU64,
}

impl MemorySyncApplier {
    /// Creates an applier owning `mirror`.
    pub fn new(mirror: Mirror) -> Self {
        Self {
            mirror: Mutex::new(mirror),
            persisted: AtomicU64::new(0),
        }
    }

    /// Number of pages persisted.
    pub fn persist_count(&self) -> u64 {
        self.persisted.load(Ordering::SeqCst)
    }

    /// Consumes the applier, returning the mirror.
    pub fn into_inner(self) -> Mirror {
        self.mirror.into_inner()
    }
}

impl SyncApplier for MemorySyncApplier {
    fn lock(&self) -> MutexGuard<'_, Mirror> {
        self.mirror.lock()
    }

    fn persist(&self, _mirror: &mut Mirror) -> SyncResult<()> {
        self.persisted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
