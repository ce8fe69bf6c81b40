//! Awaitable wrappers around one-shot platform callbacks.
//!
//! The host reports activity and permission results through plain callbacks
//! keyed by a caller-chosen request id. [`AsyncResultBroker`] hands out those
//! ids from two independent monotonic counters, parks a oneshot sender per
//! outstanding id, and gives the caller a [`PendingResult`] to `.await`.
//!
//! Ids are never reused for the lifetime of the broker. When the broker is
//! dropped (or [`AsyncResultBroker::cancel_all`] is called) every outstanding
//! future resolves to [`BrokerError::Cancelled`] instead of dangling.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, trace};
use utoipa::ToSchema;

use crate::platform::{granted, ActivityHost, ActivityRequest, Grant, Permission};

/// Identifier attached to an outstanding request.
pub type RequestId = u64;

/// Result code reported by a finished activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ResultCode {
    /// The activity completed successfully.
    Ok,
    /// The user backed out or the activity failed.
    Canceled,
    /// Any application-defined code.
    Other(i32),
}

/// Result of a finished activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ActivityResult {
    /// Result code.
    pub code: ResultCode,
    /// Optional payload returned by the activity.
    #[schema(value_type = Option<Object>)]
    pub data: Option<serde_json::Value>,
}

/// Answer to a permission prompt.
///
/// `grant_results` is index-aligned with `permissions`. An empty list means the
/// prompt was dismissed without an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PermissionResult {
    /// Permissions that were asked for.
    pub permissions: Vec<Permission>,
    /// Grant state of each permission.
    pub grant_results: Vec<Grant>,
}

/// Kind of outstanding request. Each kind has its own id space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// An activity launched for a result.
    ActivityResult,
    /// A runtime permission prompt.
    PermissionResult,
}

/// Errors surfaced by broker futures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    /// The broker was torn down before the platform answered.
    #[error("request was cancelled before the platform delivered a result")]
    Cancelled,
}

/// Whether a delivered result matched an outstanding request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The result completed an outstanding request.
    Delivered,
    /// No request had that id; the result went to the fallback handler.
    Forwarded,
}

/// Receives results for ids the broker does not own.
///
/// Components that issue requests outside the broker install one of these to
/// see their own results.
pub trait UnhandledResults: Send + Sync {
    /// An activity result with an unknown id.
    fn on_activity_result(&self, id: RequestId, result: ActivityResult);

    /// A permission result with an unknown id.
    fn on_permission_result(&self, id: RequestId, result: PermissionResult);
}

/// Fallback that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogUnhandled;

impl UnhandledResults for LogUnhandled {
    fn on_activity_result(&self, id: RequestId, result: ActivityResult) {
        debug!(id, code = ?result.code, "Activity result for unknown request");
    }

    fn on_permission_result(&self, id: RequestId, result: PermissionResult) {
        debug!(id, grants = ?result.grant_results, "Permission result for unknown request");
    }
}

/// Future returned for every issued request.
#[derive(Debug)]
#[must_use = "a pending result does nothing unless awaited"]
pub struct PendingResult<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> PendingResult<T> {
    fn ready(value: T) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(value);
        Self { rx }
    }
}

impl<T> Future for PendingResult<T> {
    type Output = Result<T, BrokerError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.map_err(|_| BrokerError::Cancelled))
    }
}

struct Outstanding<T> {
    next_id: RequestId,
    pending: HashMap<RequestId, oneshot::Sender<T>>,
}

impl<T> Outstanding<T> {
    fn new() -> Self {
        Self {
            next_id: 0,
            pending: HashMap::new(),
        }
    }

    fn register(&mut self, tx: oneshot::Sender<T>) -> RequestId {
        let id = self.next_id;
        self.next_id += 1;
        self.pending.insert(id, tx);
        id
    }
}

struct BrokerInner {
    activities: Mutex<Outstanding<Option<ActivityResult>>>,
    permissions: Mutex<Outstanding<PermissionResult>>,
    fallback: Arc<dyn UnhandledResults>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl BrokerInner {
    fn complete_activity(&self, id: RequestId, result: ActivityResult) -> Delivery {
        let tx = lock(&self.activities).pending.remove(&id);
        match tx {
            Some(tx) => {
                trace!(id, "Completing activity request");
                let _ = tx.send(Some(result));
                Delivery::Delivered
            }
            None => {
                self.fallback.on_activity_result(id, result);
                Delivery::Forwarded
            }
        }
    }

    fn complete_permission(&self, id: RequestId, result: PermissionResult) -> Delivery {
        let tx = lock(&self.permissions).pending.remove(&id);
        match tx {
            Some(tx) => {
                trace!(id, "Completing permission request");
                let _ = tx.send(result);
                Delivery::Delivered
            }
            None => {
                self.fallback.on_permission_result(id, result);
                Delivery::Forwarded
            }
        }
    }
}

/// Handle the host uses to report results back to the broker.
///
/// Holds only a weak reference: once the broker is gone, late results are
/// dropped.
#[derive(Clone)]
pub struct ResultDispatcher {
    inner: Weak<BrokerInner>,
}

impl ResultDispatcher {
    /// Report the result of the activity launched under `id`.
    pub fn on_activity_result(&self, id: RequestId, result: ActivityResult) -> Option<Delivery> {
        let delivery = self.inner.upgrade()?.complete_activity(id, result);
        Some(delivery)
    }

    /// Report the answer to the permission prompt issued under `id`.
    pub fn on_permission_result(
        &self,
        id: RequestId,
        result: PermissionResult,
    ) -> Option<Delivery> {
        let delivery = self.inner.upgrade()?.complete_permission(id, result);
        Some(delivery)
    }
}

impl std::fmt::Debug for ResultDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultDispatcher")
            .field("live", &(self.inner.strong_count() > 0))
            .finish()
    }
}

/// Turns one-shot platform callbacks into awaitable futures.
pub struct AsyncResultBroker {
    host: Arc<dyn ActivityHost>,
    inner: Arc<BrokerInner>,
}

impl AsyncResultBroker {
    /// Create a broker that logs results it does not recognise.
    pub fn new(host: Arc<dyn ActivityHost>) -> Self {
        Self::with_fallback(host, Arc::new(LogUnhandled))
    }

    /// Create a broker with a custom handler for unknown ids.
    pub fn with_fallback(host: Arc<dyn ActivityHost>, fallback: Arc<dyn UnhandledResults>) -> Self {
        Self {
            host,
            inner: Arc::new(BrokerInner {
                activities: Mutex::new(Outstanding::new()),
                permissions: Mutex::new(Outstanding::new()),
                fallback,
            }),
        }
    }

    /// A dispatcher bound to this broker.
    #[must_use]
    pub fn dispatcher(&self) -> ResultDispatcher {
        ResultDispatcher {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// The host this broker dispatches to.
    #[must_use]
    pub fn host(&self) -> &Arc<dyn ActivityHost> {
        &self.host
    }

    /// Launch `request` and await its result.
    ///
    /// Resolves to `Ok(None)` straight away, without registering anything,
    /// when the host has no handler for the request.
    pub fn issue_activity_request(
        &self,
        request: ActivityRequest,
    ) -> PendingResult<Option<ActivityResult>> {
        if !self.host.can_resolve(request) {
            debug!(?request, "No handler for activity request");
            return PendingResult::ready(None);
        }

        let (tx, rx) = oneshot::channel();
        // Register before dispatching: the host may answer synchronously.
        let id = lock(&self.inner.activities).register(tx);
        debug!(id, ?request, "Issuing activity request");
        self.host
            .start_activity_for_result(request, id, self.dispatcher());
        PendingResult { rx }
    }

    /// Ask for `permissions` and await the answer.
    ///
    /// Resolves immediately with an all-granted result when the host has no
    /// runtime prompts or every permission is already held.
    pub fn issue_permission_request(
        &self,
        permissions: Vec<Permission>,
    ) -> PendingResult<PermissionResult> {
        let already_held = !self.host.runtime_permissions()
            || permissions
                .iter()
                .all(|p| self.host.check_permission(*p) == Grant::Granted);
        if already_held {
            trace!(?permissions, "Permissions already held");
            return PendingResult::ready(granted(permissions));
        }

        let (tx, rx) = oneshot::channel();
        let id = lock(&self.inner.permissions).register(tx);
        debug!(id, ?permissions, "Issuing permission request");
        self.host
            .request_permissions(permissions, id, self.dispatcher());
        PendingResult { rx }
    }

    /// Platform entry point for activity results.
    pub fn on_activity_result(&self, id: RequestId, result: ActivityResult) -> Delivery {
        self.inner.complete_activity(id, result)
    }

    /// Platform entry point for permission results.
    pub fn on_permission_result(&self, id: RequestId, result: PermissionResult) -> Delivery {
        self.inner.complete_permission(id, result)
    }

    /// Number of outstanding requests of `kind`.
    #[must_use]
    pub fn outstanding(&self, kind: RequestKind) -> usize {
        match kind {
            RequestKind::ActivityResult => lock(&self.inner.activities).pending.len(),
            RequestKind::PermissionResult => lock(&self.inner.permissions).pending.len(),
        }
    }

    /// Resolve every outstanding future with [`BrokerError::Cancelled`].
    ///
    /// Counters are left untouched so ids stay unique.
    pub fn cancel_all(&self) {
        let activities = std::mem::take(&mut lock(&self.inner.activities).pending);
        let permissions = std::mem::take(&mut lock(&self.inner.permissions).pending);
        let total = activities.len() + permissions.len();
        if total > 0 {
            debug!(total, "Cancelling outstanding requests");
        }
    }
}

impl Drop for AsyncResultBroker {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
