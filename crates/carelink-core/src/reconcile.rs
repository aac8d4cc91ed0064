//! Reconciliation: drain the sync queue, then refresh cached collections.
//!
//! Queued operations are replayed one at a time in enqueue order. Each
//! acknowledged operation is removed from the persisted queue before the next
//! one is sent, so an interruption leaves exactly the unacknowledged suffix.
//! A failed item stays queued and the drain moves on. After the drain the
//! shared collections are refreshed concurrently.
//!
//! Every item is re-read from the persisted queue right before it is sent.
//! Work withdrawn while the drain was running is skipped, and a create that
//! was withdrawn while already in flight is undone with a delete.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::models::{
    Appointment, AppointmentId, Collection, DomainPayload, HealthCenter, Notification,
    OperationId, PendingOperation, Service, SyncAction, LOCAL_ID_PREFIX,
};
use crate::queue::SyncQueue;
use crate::refresh::fetch_and_cache;
use crate::remote::{ApiRequest, ApiResponse, RemoteService};
use crate::store::CacheStore;

const ALREADY_RUNNING: &str = "sync already in progress";

/// Result of one reconciliation pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSummary {
    /// No queued operation failed
    pub success: bool,
    /// `"<N> successful, <M> failed"`, or a reason the pass did not run
    pub message: String,
    pub succeeded: usize,
    pub failed: usize,
    /// Collections whose cache entry was overwritten with fresh data
    pub refreshed: Vec<Collection>,
    /// Another pass was already running; nothing was done
    pub in_progress: bool,
}

impl SyncSummary {
    fn completed(succeeded: usize, failed: usize, refreshed: Vec<Collection>) -> Self {
        Self {
            success: failed == 0,
            message: format!("{succeeded} successful, {failed} failed"),
            succeeded,
            failed,
            refreshed,
            in_progress: false,
        }
    }

    fn already_running() -> Self {
        Self {
            success: false,
            message: ALREADY_RUNNING.to_string(),
            succeeded: 0,
            failed: 0,
            refreshed: Vec::new(),
            in_progress: true,
        }
    }
}

impl fmt::Display for SyncSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

struct Shared<R> {
    remote: Arc<R>,
    store: CacheStore,
    queue: SyncQueue,
    running: AtomicBool,
}

/// Drain-then-refresh engine
pub struct Reconciler<R> {
    shared: Arc<Shared<R>>,
}

impl<R> Clone for Reconciler<R> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

/// Releases the reentrancy flag when a pass ends, however it ends.
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<R: RemoteService> Reconciler<R> {
    pub fn new(remote: Arc<R>, store: CacheStore, queue: SyncQueue) -> Self {
        Self {
            shared: Arc::new(Shared {
                remote,
                store,
                queue,
                running: AtomicBool::new(false),
            }),
        }
    }

    /// Whether a pass is currently running
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Replay the queue against the remote service, then refresh the cache.
    ///
    /// A call made while another pass is running returns immediately with
    /// an `in_progress` summary and touches nothing.
    pub async fn sync_with_remote(&self) -> SyncSummary {
        let Some(_guard) = RunGuard::acquire(&self.shared.running) else {
            tracing::info!("Sync requested while another sync is running; skipping");
            return SyncSummary::already_running();
        };

        let (succeeded, failed) = self.drain().await;
        let refreshed = self.refresh_shared_collections().await;

        let summary = SyncSummary::completed(succeeded, failed, refreshed);
        if summary.success {
            tracing::info!("Sync finished: {}", summary);
        } else {
            tracing::warn!("Sync finished with failures: {}", summary);
        }
        summary
    }

    async fn drain(&self) -> (usize, usize) {
        let mut pending: VecDeque<OperationId> = self
            .shared
            .queue
            .list()
            .await
            .into_iter()
            .map(|operation| operation.id)
            .collect();
        if pending.is_empty() {
            return (0, 0);
        }
        tracing::info!("Replaying {} queued operations", pending.len());

        let mut succeeded = 0;
        let mut failed = 0;
        // Local ids whose create did not replay in this pass.
        let mut unresolved: HashSet<String> = HashSet::new();

        while let Some(id) = pending.pop_front() {
            let Some(operation) = self.shared.queue.get(id).await else {
                tracing::debug!("Operation {} left the queue during sync; skipping", id);
                continue;
            };

            if let Some(local_id) = blocked_by(&operation, &unresolved) {
                tracing::debug!(
                    "Holding operation {} until {} is created remotely",
                    operation.id,
                    local_id
                );
                failed += 1;
                continue;
            }

            match self.replay(&operation).await {
                Ok(response) => {
                    succeeded += 1;
                    let dequeued = match self.shared.queue.remove(operation.id).await {
                        Ok(dequeued) => dequeued,
                        Err(error) => {
                            tracing::warn!(
                                "Replayed operation {} but could not dequeue it: {}",
                                operation.id,
                                error
                            );
                            true
                        }
                    };
                    let (Some(local_id), Some(server_id)) =
                        (&operation.local_id, response.record_id())
                    else {
                        continue;
                    };
                    self.adopt_server_id(&operation, local_id, &server_id, &response)
                        .await;
                    if !dequeued {
                        if let Some(undo) = self.undo_withdrawn_create(&operation, &server_id).await {
                            pending.push_back(undo);
                        }
                    }
                }
                Err(reason) => {
                    failed += 1;
                    tracing::warn!(
                        "Replay of {} {} (operation {}) failed: {}",
                        operation.action,
                        operation.endpoint,
                        operation.id,
                        reason
                    );
                    if operation.action == SyncAction::Create {
                        if let Some(local_id) = &operation.local_id {
                            unresolved.insert(local_id.clone());
                        }
                    }
                }
            }
        }

        (succeeded, failed)
    }

    async fn replay(&self, operation: &PendingOperation) -> Result<ApiResponse, String> {
        operation.validate()?;
        let body = match &operation.payload {
            Some(payload) => payload.to_body().map_err(|error| error.to_string())?,
            None => None,
        };
        let request = ApiRequest {
            method: operation.action.into(),
            endpoint: operation.endpoint.clone(),
            body,
        };

        tracing::debug!("Replaying operation {}: {} {}", operation.id, request.method, request.endpoint);
        match self.shared.remote.request(request).await {
            Ok(response) if response.success => Ok(response),
            Ok(response) => Err(response.failure_message()),
            Err(error) => Err(error.to_string()),
        }
    }

    /// Replace a local id with the server's everywhere it is still in use
    async fn adopt_server_id(
        &self,
        operation: &PendingOperation,
        local_id: &str,
        server_id: &str,
        response: &ApiResponse,
    ) {
        if let Err(error) = self.shared.queue.retarget(local_id, server_id).await {
            tracing::warn!(
                "Could not point queued operations from {} to {}: {}",
                local_id,
                server_id,
                error
            );
        }

        if !matches!(operation.payload, Some(DomainPayload::CreateAppointment(_))) {
            return;
        }
        let created: Option<Appointment> = response.decode().ok();
        let rewritten = self
            .shared
            .store
            .update_collection(Collection::Appointments, |rows: &mut Vec<Appointment>| {
                let Some(row) = rows.iter_mut().find(|row| row.id.as_str() == local_id) else {
                    return;
                };
                match &created {
                    Some(created) => row.clone_from(created),
                    None => row.id = AppointmentId::new(server_id),
                }
            })
            .await;
        if let Err(error) = rewritten {
            tracing::warn!("Could not rename cached appointment {}: {}", local_id, error);
        }
    }

    /// Queue a delete for a create that was withdrawn while it was in flight
    async fn undo_withdrawn_create(
        &self,
        operation: &PendingOperation,
        server_id: &str,
    ) -> Option<OperationId> {
        let endpoint = format!("{}/{}", operation.endpoint.trim_end_matches('/'), server_id);
        match self
            .shared
            .queue
            .enqueue(SyncAction::Delete, endpoint.as_str(), None)
            .await
        {
            Ok(id) => {
                tracing::info!(
                    "Create {} was withdrawn during replay; deleting {} remotely",
                    operation.id,
                    endpoint
                );
                Some(id)
            }
            Err(error) => {
                tracing::warn!("Could not queue removal of {}: {}", endpoint, error);
                None
            }
        }
    }

    async fn refresh_shared_collections(&self) -> Vec<Collection> {
        let remote = self.shared.remote.as_ref();
        let store = &self.shared.store;

        let (appointments, notifications, health_centers, services) = tokio::join!(
            fetch_and_cache::<R, Vec<Appointment>>(remote, store, Collection::Appointments),
            fetch_and_cache::<R, Vec<Notification>>(remote, store, Collection::Notifications),
            fetch_and_cache::<R, Vec<HealthCenter>>(remote, store, Collection::HealthCenters),
            fetch_and_cache::<R, Vec<Service>>(remote, store, Collection::Services),
        );

        let outcomes = [
            (Collection::Appointments, appointments.map(|_| ())),
            (Collection::Notifications, notifications.map(|_| ())),
            (Collection::HealthCenters, health_centers.map(|_| ())),
            (Collection::Services, services.map(|_| ())),
        ];

        let mut refreshed = Vec::new();
        for (collection, outcome) in outcomes {
            match outcome {
                Ok(()) => refreshed.push(collection),
                Err(reason) => {
                    tracing::warn!("Keeping stale {} cache: {}", collection, reason);
                }
            }
        }
        refreshed
    }
}

/// Local id in the operation's endpoint whose create has not replayed yet
fn blocked_by<'a>(operation: &PendingOperation, unresolved: &'a HashSet<String>) -> Option<&'a str> {
    operation
        .endpoint
        .split('/')
        .filter(|segment| segment.starts_with(LOCAL_ID_PREFIX))
        .find_map(|segment| unresolved.get(segment).map(String::as_str))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AppointmentStatus, DomainPayload, NewAppointment};
    use crate::remote::{endpoints, Method};
    use crate::testing::{FakeRemote, Reply};
    use pretty_assertions::assert_eq;

    async fn setup(remote: FakeRemote) -> (Reconciler<FakeRemote>, SyncQueue, CacheStore) {
        let store = CacheStore::open_in_memory().await.unwrap();
        let queue = SyncQueue::new(store.clone());
        let reconciler = Reconciler::new(Arc::new(remote), store.clone(), queue.clone());
        (reconciler, queue, store)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn empty_queue_still_refreshes_every_shared_collection() {
        let remote = FakeRemote::with_empty_collections();
        let (reconciler, _queue, store) = setup(remote.clone()).await;

        let summary = reconciler.sync_with_remote().await;

        assert!(summary.success);
        assert_eq!(summary.message, "0 successful, 0 failed");
        assert_eq!(summary.refreshed, Collection::SHARED.to_vec());
        for endpoint in [
            endpoints::APPOINTMENTS,
            endpoints::NOTIFICATIONS,
            endpoints::HEALTH_CENTERS,
            endpoints::SERVICES,
        ] {
            assert_eq!(remote.count(Method::Get, endpoint), 1);
        }
        assert!(store.last_sync().await.is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_items_stay_queued_and_do_not_block_others() {
        let remote = FakeRemote::with_empty_collections();
        remote.respond(Method::Delete, "/appointments/a-1", Reply::Ok(serde_json::json!({})));
        remote.respond(
            Method::Delete,
            "/appointments/a-2",
            Reply::Reject("already gone".to_string()),
        );
        remote.respond(Method::Delete, "/appointments/a-3", Reply::Ok(serde_json::json!({})));
        let (reconciler, queue, _store) = setup(remote.clone()).await;

        for id in ["a-1", "a-2", "a-3"] {
            queue
                .enqueue(SyncAction::Delete, endpoints::appointment(id), None)
                .await
                .unwrap();
        }

        let summary = reconciler.sync_with_remote().await;

        assert!(!summary.success);
        assert_eq!(summary.message, "2 successful, 1 failed");
        let remaining = queue.list().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].endpoint, "/appointments/a-2");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn replays_in_enqueue_order() {
        let remote = FakeRemote::with_empty_collections();
        for id in ["a-1", "a-2", "a-3"] {
            remote.respond(
                Method::Put,
                &endpoints::appointment_status(id),
                Reply::Ok(serde_json::json!({})),
            );
        }
        let (reconciler, queue, _store) = setup(remote.clone()).await;
        for id in ["a-3", "a-1", "a-2"] {
            queue
                .enqueue(
                    SyncAction::Update,
                    endpoints::appointment_status(id),
                    Some(DomainPayload::AppointmentStatus {
                        status: AppointmentStatus::Confirmed,
                    }),
                )
                .await
                .unwrap();
        }

        reconciler.sync_with_remote().await;

        let replayed: Vec<_> = remote
            .requests()
            .into_iter()
            .filter(|request| request.method == Method::Put)
            .map(|request| request.endpoint)
            .collect();
        assert_eq!(
            replayed,
            vec![
                "/appointments/a-3/status",
                "/appointments/a-1/status",
                "/appointments/a-2/status",
            ]
        );
        assert!(queue.is_empty().await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn created_entity_id_is_propagated_to_later_operations() {
        let remote = FakeRemote::with_empty_collections();
        remote.respond(
            Method::Post,
            endpoints::APPOINTMENTS,
            Reply::Ok(serde_json::json!({ "id": "a-100", "patient": "P1", "slot": "T1" })),
        );
        remote.respond(
            Method::Put,
            "/appointments/a-100/status",
            Reply::Ok(serde_json::json!({})),
        );
        let (reconciler, queue, _store) = setup(remote.clone()).await;

        queue
            .enqueue_local_create(
                endpoints::APPOINTMENTS,
                DomainPayload::CreateAppointment(NewAppointment::new("P1", "T1")),
                "local_abc",
            )
            .await
            .unwrap();
        queue
            .enqueue(
                SyncAction::Update,
                endpoints::appointment_status("local_abc"),
                Some(DomainPayload::AppointmentStatus {
                    status: AppointmentStatus::Cancelled,
                }),
            )
            .await
            .unwrap();

        let summary = reconciler.sync_with_remote().await;

        assert_eq!(summary.message, "2 successful, 0 failed");
        assert_eq!(remote.count(Method::Put, "/appointments/a-100/status"), 1);
        assert!(queue.is_empty().await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn operations_on_an_uncreated_entity_wait_for_the_create() {
        let remote = FakeRemote::with_empty_collections();
        remote.respond(Method::Post, endpoints::APPOINTMENTS, Reply::Fail);
        let (reconciler, queue, _store) = setup(remote.clone()).await;

        queue
            .enqueue_local_create(
                endpoints::APPOINTMENTS,
                DomainPayload::CreateAppointment(NewAppointment::new("P1", "T1")),
                "local_abc",
            )
            .await
            .unwrap();
        queue
            .enqueue(
                SyncAction::Update,
                endpoints::appointment_status("local_abc"),
                Some(DomainPayload::AppointmentStatus {
                    status: AppointmentStatus::Cancelled,
                }),
            )
            .await
            .unwrap();

        let summary = reconciler.sync_with_remote().await;

        assert_eq!(summary.message, "0 successful, 2 failed");
        assert_eq!(remote.count(Method::Put, "/appointments/local_abc/status"), 0);
        assert_eq!(queue.len().await, 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn work_withdrawn_mid_drain_is_not_sent() {
        let remote = FakeRemote::with_empty_collections();
        remote.respond(Method::Delete, "/appointments/a-0", Reply::Ok(serde_json::json!({})));
        let (reconciler, queue, _store) = setup(remote.clone()).await;
        queue
            .enqueue(SyncAction::Delete, endpoints::appointment("a-0"), None)
            .await
            .unwrap();
        queue
            .enqueue_local_create(
                endpoints::APPOINTMENTS,
                DomainPayload::CreateAppointment(NewAppointment::new("P1", "T1")),
                "local_abc",
            )
            .await
            .unwrap();
        let hold = remote.hold_requests();

        let sync = tokio::spawn({
            let reconciler = reconciler.clone();
            async move { reconciler.sync_with_remote().await }
        });
        hold.entered().await;
        assert_eq!(queue.discard_for_entity("local_abc").await.unwrap(), 1);
        hold.release();
        let summary = sync.await.unwrap();

        assert_eq!(summary.message, "1 successful, 0 failed");
        assert_eq!(remote.count(Method::Post, endpoints::APPOINTMENTS), 0);
        assert!(queue.is_empty().await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn create_withdrawn_in_flight_is_deleted_remotely() {
        let remote = FakeRemote::with_empty_collections();
        remote.respond(
            Method::Post,
            endpoints::APPOINTMENTS,
            Reply::Ok(serde_json::json!({ "id": "a-9", "patient": "P1", "slot": "T1" })),
        );
        remote.respond(Method::Delete, "/appointments/a-9", Reply::Ok(serde_json::json!({})));
        let (reconciler, queue, _store) = setup(remote.clone()).await;
        queue
            .enqueue_local_create(
                endpoints::APPOINTMENTS,
                DomainPayload::CreateAppointment(NewAppointment::new("P1", "T1")),
                "local_abc",
            )
            .await
            .unwrap();
        let hold = remote.hold_requests();

        let sync = tokio::spawn({
            let reconciler = reconciler.clone();
            async move { reconciler.sync_with_remote().await }
        });
        hold.entered().await;
        queue.discard_for_entity("local_abc").await.unwrap();
        hold.release();
        let summary = sync.await.unwrap();

        assert_eq!(summary.message, "2 successful, 0 failed");
        assert_eq!(remote.count(Method::Post, endpoints::APPOINTMENTS), 1);
        assert_eq!(remote.count(Method::Delete, "/appointments/a-9"), 1);
        assert!(queue.is_empty().await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn replayed_create_renames_cached_row_when_refresh_fails() {
        let remote = FakeRemote::with_empty_collections();
        remote.respond(
            Method::Post,
            endpoints::APPOINTMENTS,
            Reply::Ok(serde_json::json!({
                "id": "a-9", "patient": "P1", "slot": "T1", "status": "confirmed"
            })),
        );
        remote.respond(Method::Get, endpoints::APPOINTMENTS, Reply::Fail);
        let (reconciler, queue, store) = setup(remote.clone()).await;
        let request = NewAppointment::new("P1", "T1");
        let local = Appointment::local(&request);
        let other = Appointment::local(&NewAppointment::new("P2", "T2"));
        store
            .update_collection(Collection::Appointments, |rows: &mut Vec<Appointment>| {
                rows.push(local.clone());
                rows.push(other.clone());
            })
            .await
            .unwrap();
        queue
            .enqueue_local_create(
                endpoints::APPOINTMENTS,
                DomainPayload::CreateAppointment(request),
                local.id.as_str(),
            )
            .await
            .unwrap();

        let summary = reconciler.sync_with_remote().await;

        assert_eq!(summary.message, "1 successful, 0 failed");
        assert!(!summary.refreshed.contains(&Collection::Appointments));
        let cached: Vec<Appointment> = store
            .get_collection(Collection::Appointments)
            .await
            .unwrap()
            .data;
        assert_eq!(cached.len(), 2);
        assert_eq!(cached[0].id.as_str(), "a-9");
        assert_eq!(cached[0].status, AppointmentStatus::Confirmed);
        assert_eq!(cached[1], other);
        assert_eq!(queue.resolve_id(local.id.as_str()).await.as_deref(), Some("a-9"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn invalid_operation_counts_as_failure_without_dispatch() {
        let remote = FakeRemote::with_empty_collections();
        let (reconciler, queue, _store) = setup(remote.clone()).await;
        queue
            .enqueue(SyncAction::Create, endpoints::APPOINTMENTS, None)
            .await
            .unwrap();

        let summary = reconciler.sync_with_remote().await;

        assert_eq!(summary.message, "0 successful, 1 failed");
        assert_eq!(remote.mutation_count(), 0);
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn overlapping_sync_is_a_no_op() {
        let remote = FakeRemote::with_empty_collections();
        remote.respond(Method::Delete, "/appointments/a-1", Reply::Ok(serde_json::json!({})));
        let hold = remote.hold_requests();
        let (reconciler, queue, _store) = setup(remote.clone()).await;
        queue
            .enqueue(SyncAction::Delete, endpoints::appointment("a-1"), None)
            .await
            .unwrap();

        let first = tokio::spawn({
            let reconciler = reconciler.clone();
            async move { reconciler.sync_with_remote().await }
        });
        hold.entered().await;
        assert!(reconciler.is_running());

        let second = reconciler.sync_with_remote().await;
        assert!(second.in_progress);
        assert!(!second.success);
        assert_eq!(second.message, "sync already in progress");

        hold.release();
        let first = first.await.unwrap();
        assert_eq!(first.message, "1 successful, 0 failed");
        assert_eq!(remote.count(Method::Delete, "/appointments/a-1"), 1);
        assert!(!reconciler.is_running());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_refresh_keeps_previous_cache() {
        let remote = FakeRemote::with_empty_collections();
        remote.respond(Method::Get, endpoints::SERVICES, Reply::Fail);
        let (reconciler, _queue, store) = setup(remote).await;
        store
            .put_collection(
                Collection::Services,
                &serde_json::json!([{ "id": "s-1", "name": "Dental" }]),
            )
            .await
            .unwrap();

        let summary = reconciler.sync_with_remote().await;

        assert!(summary.success);
        assert!(!summary.refreshed.contains(&Collection::Services));
        let services: Vec<Service> = store
            .get_collection(Collection::Services)
            .await
            .map(|entry| entry.data)
            .unwrap();
        assert_eq!(services[0].id, "s-1");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn refresh_replaces_cached_collections_wholesale() {
        let remote = FakeRemote::with_empty_collections();
        remote.respond(
            Method::Get,
            endpoints::APPOINTMENTS,
            Reply::Ok(serde_json::json!([{ "id": "a-1", "patient": "P1", "slot": "T1", "status": "confirmed" }])),
        );
        let (reconciler, _queue, store) = setup(remote).await;
        let local = Appointment::local(&NewAppointment::new("P2", "T2"));
        store
            .put_collection(Collection::Appointments, &vec![local])
            .await
            .unwrap();

        reconciler.sync_with_remote().await;

        let cached: Vec<Appointment> = store
            .get_collection(Collection::Appointments)
            .await
            .map(|entry| entry.data)
            .unwrap();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].id.as_str(), "a-1");
        assert_eq!(cached[0].status, AppointmentStatus::Confirmed);
    }
}
