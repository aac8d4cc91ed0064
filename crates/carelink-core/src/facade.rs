//! Offline-aware service façade
//!
//! `OfflineService` is the single entry point the application talks to. It
//! decides per call whether to go to the remote service or to the local
//! cache and queue:
//!
//! - reads try the remote service and fall back to the cached snapshot
//! - offline-capable writes queue the mutation when the service cannot be
//!   reached, then apply an optimistic change to the cache
//! - online-only operations fail with [`Error::ConnectionRequired`]

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::ClientConfig;
use crate::connectivity::{ConnectivityMonitor, ConnectivityPhase, ConnectivityState, MonitorConfig};
use crate::error::{Error, Result};
use crate::models::{
    ActivityLog, AdminStats, Appointment, AppointmentId, AppointmentStatus, AppointmentUpdate,
    Collection, DeviceRegistration, DomainPayload, HealthCenter, NewAppointment, NewService,
    Notification, OperationId, PendingOperation, ProfileUpdate, Service, ServiceUpdate,
    SyncAction, UserProfile,
};
use crate::queue::SyncQueue;
use crate::reconcile::{Reconciler, SyncSummary};
use crate::refresh::fetch_and_cache;
use crate::remote::{endpoints, ApiRequest, ApiResponse, HttpRemote, RemoteService};
use crate::store::CacheStore;

/// Where the data of an [`Outcome`] came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Fresh answer from the remote service
    Remote,
    /// Cached snapshot served because the service was unavailable
    Cache,
    /// Applied locally and queued for replay
    Queued(OperationId),
    /// Applied locally with nothing left to replay
    Local,
}

/// Result of a façade call together with its origin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome<T> {
    pub data: T,
    pub origin: Origin,
}

impl<T> Outcome<T> {
    const fn new(data: T, origin: Origin) -> Self {
        Self { data, origin }
    }

    /// Short user-facing note for non-remote results
    pub const fn message(&self) -> Option<&'static str> {
        match self.origin {
            Origin::Queued(_) => Some("queued for sync"),
            Origin::Cache => Some("showing cached data"),
            Origin::Remote | Origin::Local => None,
        }
    }

    pub const fn is_queued(&self) -> bool {
        matches!(self.origin, Origin::Queued(_))
    }
}

/// Offline-first access to the scheduling service
pub struct OfflineService<R> {
    remote: Arc<R>,
    store: CacheStore,
    queue: SyncQueue,
    monitor: ConnectivityMonitor<R>,
    reconciler: Reconciler<R>,
}

impl<R> Clone for OfflineService<R> {
    fn clone(&self) -> Self {
        Self {
            remote: self.remote.clone(),
            store: self.store.clone(),
            queue: self.queue.clone(),
            monitor: self.monitor.clone(),
            reconciler: self.reconciler.clone(),
        }
    }
}

impl OfflineService<HttpRemote> {
    /// Open the cache database and HTTP client described by `config`
    pub async fn open(config: &ClientConfig) -> Result<Self> {
        config.validate()?;
        let remote = HttpRemote::from_config(config)?;
        let store = CacheStore::open(config.database_path()).await?;
        Ok(Self::new(Arc::new(remote), store, config.monitor_config()))
    }
}

fn decode<T: DeserializeOwned>(response: &ApiResponse) -> Result<T> {
    response
        .decode()
        .map_err(|error| Error::Remote(error.to_string()))
}

impl<R: RemoteService> OfflineService<R> {
    pub fn new(remote: Arc<R>, store: CacheStore, config: MonitorConfig) -> Self {
        let queue = SyncQueue::new(store.clone());
        let reconciler = Reconciler::new(remote.clone(), store.clone(), queue.clone());
        let monitor = ConnectivityMonitor::new(remote.clone(), store.clone(), config)
            .with_reconciler(reconciler.clone());
        Self {
            remote,
            store,
            queue,
            monitor,
            reconciler,
        }
    }

    /// Start connectivity monitoring
    pub fn start(&self) {
        self.monitor.start();
    }

    pub fn shutdown(&self) {
        self.monitor.shutdown();
    }

    pub const fn monitor(&self) -> &ConnectivityMonitor<R> {
        &self.monitor
    }

    pub const fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    pub const fn store(&self) -> &CacheStore {
        &self.store
    }

    pub const fn reconciler(&self) -> &Reconciler<R> {
        &self.reconciler
    }

    /// Probe the service now
    pub async fn check_connectivity(&self) -> ConnectivityState {
        self.monitor.force_check().await
    }

    /// Replay queued operations and refresh the cache immediately
    pub async fn sync_now(&self) -> SyncSummary {
        self.reconciler.sync_with_remote().await
    }

    pub async fn pending_operations(&self) -> Vec<PendingOperation> {
        self.queue.list().await
    }

    /// Whether calls should skip the remote service
    ///
    /// Before the first probe completes the persisted offline flag decides.
    pub async fn is_offline(&self) -> bool {
        match self.monitor.phase() {
            ConnectivityPhase::Online => false,
            ConnectivityPhase::Offline => true,
            ConnectivityPhase::Unknown => self.store.offline_mode().await,
        }
    }

    // Reads

    pub async fn profile(&self) -> Outcome<Option<UserProfile>> {
        self.read(Collection::User).await
    }

    pub async fn appointments(&self) -> Outcome<Vec<Appointment>> {
        self.read(Collection::Appointments).await
    }

    pub async fn notifications(&self) -> Outcome<Vec<Notification>> {
        self.read(Collection::Notifications).await
    }

    pub async fn health_centers(&self) -> Outcome<Vec<HealthCenter>> {
        self.read(Collection::HealthCenters).await
    }

    pub async fn services(&self) -> Outcome<Vec<Service>> {
        self.read(Collection::Services).await
    }

    async fn read<T>(&self, collection: Collection) -> Outcome<T>
    where
        T: DeserializeOwned + Serialize + Default,
    {
        if !self.is_offline().await {
            match fetch_and_cache::<R, T>(&self.remote, &self.store, collection).await {
                Ok(data) => return Outcome::new(data, Origin::Remote),
                Err(reason) => {
                    tracing::warn!("Serving cached {} after failed fetch: {}", collection, reason);
                }
            }
        }

        let data = self
            .store
            .get_collection(collection)
            .await
            .map(|entry| entry.data)
            .unwrap_or_default();
        Outcome::new(data, Origin::Cache)
    }

    // Offline-capable writes

    /// Book an appointment; offline bookings get a temporary local id
    pub async fn create_appointment(&self, request: NewAppointment) -> Result<Outcome<Appointment>> {
        if !self.is_offline().await {
            let body = serde_json::to_value(&request)?;
            if let Some(response) = self.send(ApiRequest::post(endpoints::APPOINTMENTS, body)).await? {
                let created: Appointment = decode(&response)?;
                self.refresh_appointments(Some(&created)).await;
                return Ok(Outcome::new(created, Origin::Remote));
            }
        }

        let appointment = Appointment::local(&request);
        let id = self
            .queue
            .enqueue_local_create(
                endpoints::APPOINTMENTS,
                DomainPayload::CreateAppointment(request),
                appointment.id.as_str(),
            )
            .await?;
        self.edit_cached(Collection::Appointments, |appointments: &mut Vec<Appointment>| {
            appointments.push(appointment.clone());
        })
        .await;
        tracing::info!("Queued appointment {} for sync", appointment.id);
        Ok(Outcome::new(appointment, Origin::Queued(id)))
    }

    pub async fn update_appointment(
        &self,
        id: &AppointmentId,
        update: AppointmentUpdate,
    ) -> Result<Outcome<Option<Appointment>>> {
        let id = &self.resolve(id).await;
        let endpoint = endpoints::appointment(id.as_str());
        if self.goes_remote(id).await {
            let body = serde_json::to_value(&update)?;
            if let Some(response) = self.send(ApiRequest::put(&endpoint, Some(body))).await? {
                let updated: Option<Appointment> = decode(&response).ok();
                self.refresh_appointments(updated.as_ref()).await;
                return Ok(Outcome::new(self.cached_appointment(id).await, Origin::Remote));
            }
        }

        let queued = self
            .queue
            .enqueue(
                SyncAction::Update,
                endpoint,
                Some(DomainPayload::UpdateAppointment(update.clone())),
            )
            .await?;
        let updated = self
            .edit_cached(Collection::Appointments, |appointments: &mut Vec<Appointment>| {
                let found = appointments.iter_mut().find(|appointment| appointment.id == *id)?;
                found.apply(&update);
                Some(found.clone())
            })
            .await
            .flatten();
        Ok(Outcome::new(updated, Origin::Queued(queued)))
    }

    pub async fn update_appointment_status(
        &self,
        id: &AppointmentId,
        status: AppointmentStatus,
    ) -> Result<Outcome<Option<Appointment>>> {
        let id = &self.resolve(id).await;
        let endpoint = endpoints::appointment_status(id.as_str());
        let payload = DomainPayload::AppointmentStatus { status };
        if self.goes_remote(id).await {
            let body = payload.to_body()?;
            if let Some(response) = self.send(ApiRequest::put(&endpoint, body)).await? {
                let updated: Option<Appointment> = decode(&response).ok();
                self.refresh_appointments(updated.as_ref()).await;
                return Ok(Outcome::new(self.cached_appointment(id).await, Origin::Remote));
            }
        }

        let queued = self
            .queue
            .enqueue(SyncAction::Update, endpoint, Some(payload))
            .await?;
        let updated = self
            .edit_cached(Collection::Appointments, |appointments: &mut Vec<Appointment>| {
                let found = appointments.iter_mut().find(|appointment| appointment.id == *id)?;
                found.status = status;
                Some(found.clone())
            })
            .await
            .flatten();
        Ok(Outcome::new(updated, Origin::Queued(queued)))
    }

    pub async fn cancel_appointment(&self, id: &AppointmentId) -> Result<Outcome<Option<Appointment>>> {
        self.update_appointment_status(id, AppointmentStatus::Cancelled)
            .await
    }

    /// Delete an appointment
    ///
    /// Deleting an appointment that only exists locally drops it together
    /// with its queued operations; nothing is sent or queued.
    pub async fn delete_appointment(&self, id: &AppointmentId) -> Result<Outcome<()>> {
        let id = &self.resolve(id).await;
        if id.is_local() {
            let discarded = self.queue.discard_for_entity(id.as_str()).await?;
            self.remove_cached_appointment(id).await;
            tracing::info!(
                "Dropped unsynced appointment {} and {} queued operations",
                id,
                discarded
            );
            return Ok(Outcome::new((), Origin::Local));
        }

        let endpoint = endpoints::appointment(id.as_str());
        if !self.is_offline().await && self.send(ApiRequest::delete(&endpoint)).await?.is_some() {
            self.remove_cached_appointment(id).await;
            self.refresh_appointments(None).await;
            return Ok(Outcome::new((), Origin::Remote));
        }

        let queued = self.queue.enqueue(SyncAction::Delete, endpoint, None).await?;
        self.remove_cached_appointment(id).await;
        Ok(Outcome::new((), Origin::Queued(queued)))
    }

    pub async fn mark_notification_read(&self, id: &str) -> Result<Outcome<()>> {
        let endpoint = endpoints::notification_read(id);
        self.mark_read(endpoint, |notification| notification.id == id)
            .await
    }

    pub async fn mark_all_notifications_read(&self) -> Result<Outcome<()>> {
        self.mark_read(endpoints::NOTIFICATIONS_READ_ALL.to_string(), |_| true)
            .await
    }

    async fn mark_read<F>(&self, endpoint: String, matches: F) -> Result<Outcome<()>>
    where
        F: Fn(&Notification) -> bool + Send + Sync,
    {
        if !self.is_offline().await && self.send(ApiRequest::put(&endpoint, None)).await?.is_some() {
            self.refresh::<Vec<Notification>>(Collection::Notifications).await;
            return Ok(Outcome::new((), Origin::Remote));
        }

        let queued = self
            .queue
            .enqueue(SyncAction::Update, endpoint, Some(DomainPayload::MarkRead))
            .await?;
        self.edit_cached(Collection::Notifications, |notifications: &mut Vec<Notification>| {
            notifications
                .iter_mut()
                .filter(|notification| matches(notification))
                .for_each(|notification| notification.read = true);
        })
        .await;
        Ok(Outcome::new((), Origin::Queued(queued)))
    }

    /// Register this device for push notifications
    pub async fn register_device_token(
        &self,
        token: impl Into<String>,
        platform: impl Into<String>,
    ) -> Result<Outcome<()>> {
        let registration = DeviceRegistration {
            token: token.into(),
            platform: platform.into(),
        };
        if !self.is_offline().await {
            let body = serde_json::to_value(&registration)?;
            if self
                .send(ApiRequest::post(endpoints::DEVICE_TOKENS, body))
                .await?
                .is_some()
            {
                return Ok(Outcome::new((), Origin::Remote));
            }
        }

        let queued = self
            .queue
            .enqueue(
                SyncAction::Create,
                endpoints::DEVICE_TOKENS,
                Some(DomainPayload::RegisterDevice(registration)),
            )
            .await?;
        Ok(Outcome::new((), Origin::Queued(queued)))
    }

    // Online-only operations

    pub async fn update_profile(&self, update: ProfileUpdate) -> Result<UserProfile> {
        let body = serde_json::to_value(&update)?;
        let response = self
            .online_only("update your profile", ApiRequest::put(endpoints::PROFILE, Some(body)))
            .await?;
        let profile: UserProfile = decode(&response)?;
        self.store.put_collection(Collection::User, &profile).await?;
        Ok(profile)
    }

    pub async fn create_service(&self, service: NewService) -> Result<Service> {
        let body = serde_json::to_value(&service)?;
        let response = self
            .online_only("create a service", ApiRequest::post(endpoints::SERVICES, body))
            .await?;
        let created = decode(&response)?;
        self.refresh::<Vec<Service>>(Collection::Services).await;
        Ok(created)
    }

    pub async fn update_service(&self, id: &str, update: ServiceUpdate) -> Result<Service> {
        let body = serde_json::to_value(&update)?;
        let response = self
            .online_only(
                "update a service",
                ApiRequest::put(endpoints::service(id), Some(body)),
            )
            .await?;
        let updated = decode(&response)?;
        self.refresh::<Vec<Service>>(Collection::Services).await;
        Ok(updated)
    }

    pub async fn delete_service(&self, id: &str) -> Result<()> {
        self.online_only("delete a service", ApiRequest::delete(endpoints::service(id)))
            .await?;
        self.refresh::<Vec<Service>>(Collection::Services).await;
        Ok(())
    }

    pub async fn admin_stats(&self) -> Result<AdminStats> {
        let response = self
            .online_only("view statistics", ApiRequest::get(endpoints::ADMIN_STATS))
            .await?;
        decode(&response)
    }

    pub async fn activity_logs(&self, limit: usize) -> Result<Vec<ActivityLog>> {
        let response = self
            .online_only(
                "view activity logs",
                ApiRequest::get(endpoints::activity_logs(limit)),
            )
            .await?;
        decode(&response)
    }

    // Helpers

    /// Send a request while believed online
    ///
    /// `Ok(None)` means no answer was obtained and the caller may degrade.
    async fn send(&self, request: ApiRequest) -> Result<Option<ApiResponse>> {
        let label = format!("{} {}", request.method, request.endpoint);
        match self.remote.request(request).await {
            Ok(response) if response.success => Ok(Some(response)),
            Ok(response) => Err(Error::Remote(response.failure_message())),
            Err(error) => {
                tracing::warn!("{} failed, falling back to offline handling: {}", label, error);
                Ok(None)
            }
        }
    }

    async fn online_only(&self, operation: &'static str, request: ApiRequest) -> Result<ApiResponse> {
        if self.is_offline().await {
            return Err(Error::ConnectionRequired { operation });
        }
        self.send(request)
            .await?
            .ok_or(Error::ConnectionRequired { operation })
    }

    /// Entities that only exist locally are always changed through the queue
    async fn goes_remote(&self, id: &AppointmentId) -> bool {
        !id.is_local() && !self.is_offline().await
    }

    /// Server id for a local id whose create has already replayed
    async fn resolve(&self, id: &AppointmentId) -> AppointmentId {
        if !id.is_local() {
            return id.clone();
        }
        match self.queue.resolve_id(id.as_str()).await {
            Some(server_id) => AppointmentId::new(server_id),
            None => id.clone(),
        }
    }

    async fn refresh<T>(&self, collection: Collection)
    where
        T: DeserializeOwned + Serialize,
    {
        if let Err(reason) = fetch_and_cache::<R, T>(&self.remote, &self.store, collection).await {
            tracing::warn!("Could not refresh {} after write: {}", collection, reason);
        }
    }

    /// Refresh cached appointments, upserting `record` if the refresh fails
    async fn refresh_appointments(&self, record: Option<&Appointment>) {
        let refreshed =
            fetch_and_cache::<R, Vec<Appointment>>(&self.remote, &self.store, Collection::Appointments)
                .await;
        let (Err(reason), Some(record)) = (refreshed, record) else {
            return;
        };
        tracing::warn!("Could not refresh appointments after write: {}", reason);
        self.edit_cached(Collection::Appointments, |appointments: &mut Vec<Appointment>| {
            match appointments.iter_mut().find(|appointment| appointment.id == record.id) {
                Some(existing) => existing.clone_from(record),
                None => appointments.push(record.clone()),
            }
        })
        .await;
    }

    async fn cached_appointment(&self, id: &AppointmentId) -> Option<Appointment> {
        self.store
            .get_collection::<Vec<Appointment>>(Collection::Appointments)
            .await?
            .data
            .into_iter()
            .find(|appointment| appointment.id == *id)
    }

    async fn remove_cached_appointment(&self, id: &AppointmentId) {
        self.edit_cached(Collection::Appointments, |appointments: &mut Vec<Appointment>| {
            appointments.retain(|appointment| appointment.id != *id);
        })
        .await;
    }

    /// Apply an optimistic edit to a cached collection
    ///
    /// Runs after the matching mutation is queued or acknowledged, so a
    /// failed edit only leaves the cache stale until the next refresh.
    async fn edit_cached<T, F, O>(&self, collection: Collection, edit: F) -> Option<O>
    where
        T: DeserializeOwned + Serialize + Default,
        F: FnOnce(&mut T) -> O,
    {
        match self.store.update_collection(collection, edit).await {
            Ok(output) => Some(output),
            Err(error) => {
                tracing::warn!("Failed to update cached {}: {}", collection, error);
                None
            }
        }
    }
}
