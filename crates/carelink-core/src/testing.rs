//! Scripted remote service double shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Notify, Semaphore};

use crate::remote::{endpoints, ApiRequest, ApiResponse, Method, RemoteError, RemoteService};

/// Canned answer for one request
#[derive(Debug, Clone)]
pub enum Reply {
    /// `success: true` with the given data
    Ok(serde_json::Value),
    /// `success: false` with the given message
    Reject(String),
    /// No answer at all (network failure)
    Fail,
}

/// Canned answer for one health probe
#[derive(Debug, Clone, Copy)]
pub enum Probe {
    Ok,
    Unreachable,
    Status(u16),
    /// Never answers; the monitor's timeout must cut it off
    Hang,
}

type Route = (Method, String);

#[derive(Default)]
struct State {
    once: HashMap<Route, VecDeque<Reply>>,
    always: HashMap<Route, Reply>,
    probes: VecDeque<Probe>,
    default_probe: Option<Probe>,
    log: Vec<ApiRequest>,
    hold: Option<(Arc<Notify>, Arc<Semaphore>)>,
}

#[derive(Clone, Default)]
pub struct FakeRemote {
    state: Arc<Mutex<State>>,
}

/// Handle to requests parked by [`FakeRemote::hold_requests`]
pub struct Hold {
    entered: Arc<Notify>,
    release: Arc<Semaphore>,
}

impl Hold {
    /// Wait until a request is parked
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Let every parked and future request through
    pub fn release(&self) {
        self.release.add_permits(1024);
    }
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer the four shared collections and the profile with empty data
    pub fn with_empty_collections() -> Self {
        let remote = Self::new();
        for endpoint in [
            endpoints::APPOINTMENTS,
            endpoints::NOTIFICATIONS,
            endpoints::HEALTH_CENTERS,
            endpoints::SERVICES,
        ] {
            remote.respond(Method::Get, endpoint, Reply::Ok(serde_json::json!([])));
        }
        remote
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Answer every matching request with `reply`
    pub fn respond(&self, method: Method, endpoint: &str, reply: Reply) {
        self.lock()
            .always
            .insert((method, endpoint.to_string()), reply);
    }

    /// Answer the next matching request with `reply`, ahead of `respond`
    pub fn respond_once(&self, method: Method, endpoint: &str, reply: Reply) {
        self.lock()
            .once
            .entry((method, endpoint.to_string()))
            .or_default()
            .push_back(reply);
    }

    /// Script the next health probes; afterwards `default_probe` applies
    pub fn script_probes(&self, probes: impl IntoIterator<Item = Probe>) {
        self.lock().probes.extend(probes);
    }

    pub fn set_default_probe(&self, probe: Probe) {
        self.lock().default_probe = Some(probe);
    }

    /// Park every request until the returned hold is released
    pub fn hold_requests(&self) -> Hold {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Semaphore::new(0));
        self.lock().hold = Some((entered.clone(), release.clone()));
        Hold { entered, release }
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.lock().log.clone()
    }

    /// Number of received requests matching a verb and endpoint
    pub fn count(&self, method: Method, endpoint: &str) -> usize {
        self.lock()
            .log
            .iter()
            .filter(|request| request.method == method && request.endpoint == endpoint)
            .count()
    }

    /// Number of received requests that were not collection reads
    pub fn mutation_count(&self) -> usize {
        self.lock()
            .log
            .iter()
            .filter(|request| request.method != Method::Get)
            .count()
    }
}

impl RemoteService for FakeRemote {
    async fn request(&self, request: ApiRequest) -> Result<ApiResponse, RemoteError> {
        let hold = self.lock().hold.clone();
        if let Some((entered, release)) = hold {
            entered.notify_one();
            let permit = release
                .acquire()
                .await
                .map_err(|error| RemoteError::Transport(error.to_string()))?;
            permit.forget();
        }

        let reply = {
            let mut state = self.lock();
            state.log.push(request.clone());
            let route = (request.method, request.endpoint.clone());
            state
                .once
                .get_mut(&route)
                .and_then(VecDeque::pop_front)
                .or_else(|| state.always.get(&route).cloned())
        };

        match reply {
            Some(Reply::Ok(data)) => Ok(ApiResponse::ok(data)),
            Some(Reply::Reject(message)) => Ok(ApiResponse::failure(message)),
            Some(Reply::Fail) => Err(RemoteError::Transport("connection refused".to_string())),
            None => Err(RemoteError::Transport(format!(
                "no route for {} {}",
                request.method, request.endpoint
            ))),
        }
    }

    async fn health_check(&self) -> Result<(), RemoteError> {
        let probe = {
            let mut state = self.lock();
            state
                .probes
                .pop_front()
                .or(state.default_probe)
                .unwrap_or(Probe::Ok)
        };

        match probe {
            Probe::Ok => Ok(()),
            Probe::Unreachable => Err(RemoteError::Transport("network unreachable".to_string())),
            Probe::Status(code) => Err(RemoteError::Status(code)),
            Probe::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }
}
