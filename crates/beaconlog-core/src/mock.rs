//! In-process stand-ins for the host platform and the ranging stack.
//!
//! Used by the test-suite and by `--features mock-bluetooth` builds of the
//! server so the whole session lifecycle can run without a radio.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::bluetooth::{Beacon, BluetoothError, RangeNotifier, RangingSource, Region};
use crate::broker::{ActivityResult, PermissionResult, RequestId, ResultCode, ResultDispatcher};
use crate::platform::{
    ActivityHost, ActivityRequest, BoxFuture, DeviceStatus, Grant, Permission,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
struct PlatformState {
    radio_on: bool,
    location_on: bool,
    runtime_permissions: bool,
    granted: HashSet<Permission>,
    unresolvable: HashSet<ActivityRequest>,
    activity_reply: Option<ResultCode>,
    permission_reply: Option<Grant>,
    activity_ids: Vec<RequestId>,
    permission_ids: Vec<RequestId>,
    launched: Vec<ActivityRequest>,
    dispatcher: Option<ResultDispatcher>,
}

/// Scriptable host platform.
///
/// Defaults: radio and location on, runtime permissions enabled with nothing
/// granted, every activity resolvable, and no automatic replies (requests stay
/// outstanding until answered by hand).
#[derive(Debug)]
pub struct MockPlatform {
    state: Mutex<PlatformState>,
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPlatform {
    /// Create a mock with the defaults described above.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PlatformState {
                radio_on: true,
                location_on: true,
                runtime_permissions: true,
                granted: HashSet::new(),
                unresolvable: HashSet::new(),
                activity_reply: None,
                permission_reply: None,
                activity_ids: Vec::new(),
                permission_ids: Vec::new(),
                launched: Vec::new(),
                dispatcher: None,
            }),
        }
    }

    /// A mock where every prerequisite is already satisfied.
    #[must_use]
    pub fn ready() -> Self {
        let mock = Self::new();
        mock.grant(Permission::CoarseLocation);
        mock.grant(Permission::FineLocation);
        mock
    }

    /// Set the radio state.
    pub fn set_radio_on(&self, on: bool) {
        lock(&self.state).radio_on = on;
    }

    /// Set the location-provider state.
    pub fn set_location_on(&self, on: bool) {
        lock(&self.state).location_on = on;
    }

    /// Toggle whether permissions are prompted for at runtime.
    pub fn set_runtime_permissions(&self, enabled: bool) {
        lock(&self.state).runtime_permissions = enabled;
    }

    /// Mark `permission` as held.
    pub fn grant(&self, permission: Permission) {
        lock(&self.state).granted.insert(permission);
    }

    /// Control whether a handler exists for `request`.
    pub fn set_resolvable(&self, request: ActivityRequest, resolvable: bool) {
        let mut state = lock(&self.state);
        if resolvable {
            state.unresolvable.remove(&request);
        } else {
            state.unresolvable.insert(request);
        }
    }

    /// Answer activity requests synchronously with `code`, or not at all.
    pub fn reply_to_activities(&self, code: Option<ResultCode>) {
        lock(&self.state).activity_reply = code;
    }

    /// Answer permission prompts synchronously with `grant`, or not at all.
    pub fn reply_to_permissions(&self, grant: Option<Grant>) {
        lock(&self.state).permission_reply = grant;
    }

    /// Ids of every activity request issued so far.
    #[must_use]
    pub fn issued_activity_ids(&self) -> Vec<RequestId> {
        lock(&self.state).activity_ids.clone()
    }

    /// Ids of every permission prompt issued so far.
    #[must_use]
    pub fn issued_permission_ids(&self) -> Vec<RequestId> {
        lock(&self.state).permission_ids.clone()
    }

    /// Fire-and-forget activities launched so far.
    #[must_use]
    pub fn launched(&self) -> Vec<ActivityRequest> {
        lock(&self.state).launched.clone()
    }

    /// The dispatcher handed over with the most recent request.
    #[must_use]
    pub fn last_dispatcher(&self) -> Option<ResultDispatcher> {
        lock(&self.state).dispatcher.clone()
    }
}

impl ActivityHost for MockPlatform {
    fn can_resolve(&self, request: ActivityRequest) -> bool {
        !lock(&self.state).unresolvable.contains(&request)
    }

    fn start_activity_for_result(
        &self,
        request: ActivityRequest,
        id: RequestId,
        dispatcher: ResultDispatcher,
    ) {
        let reply = {
            let mut state = lock(&self.state);
            state.activity_ids.push(id);
            state.dispatcher = Some(dispatcher.clone());
            let reply = state.activity_reply;
            if reply == Some(ResultCode::Ok) && request == ActivityRequest::EnableBluetooth {
                state.radio_on = true;
            }
            reply
        };
        if let Some(code) = reply {
            dispatcher.on_activity_result(id, ActivityResult { code, data: None });
        }
    }

    fn start_activity(&self, request: ActivityRequest) {
        debug!(?request, "Mock launching activity");
        lock(&self.state).launched.push(request);
    }

    fn runtime_permissions(&self) -> bool {
        lock(&self.state).runtime_permissions
    }

    fn check_permission(&self, permission: Permission) -> Grant {
        if lock(&self.state).granted.contains(&permission) {
            Grant::Granted
        } else {
            Grant::Denied
        }
    }

    fn request_permissions(
        &self,
        permissions: Vec<Permission>,
        id: RequestId,
        dispatcher: ResultDispatcher,
    ) {
        let reply = {
            let mut state = lock(&self.state);
            state.permission_ids.push(id);
            state.dispatcher = Some(dispatcher.clone());
            if state.permission_reply == Some(Grant::Granted) {
                state.granted.extend(permissions.iter().copied());
            }
            state.permission_reply
        };
        if let Some(grant) = reply {
            let grant_results = vec![grant; permissions.len()];
            dispatcher.on_permission_result(
                id,
                PermissionResult {
                    permissions,
                    grant_results,
                },
            );
        }
    }
}

impl DeviceStatus for MockPlatform {
    fn radio_enabled(&self) -> BoxFuture<'_, bool> {
        let on = lock(&self.state).radio_on;
        Box::pin(async move { on })
    }

    fn location_enabled(&self) -> BoxFuture<'_, bool> {
        let on = lock(&self.state).location_on;
        Box::pin(async move { on })
    }
}

#[derive(Default)]
struct RangingState {
    notifiers: Vec<RangeNotifier>,
    ranging: Option<Region>,
    fail_next_start: Option<String>,
    starts: usize,
    stops: usize,
}

/// Ranging stack driven by hand through [`MockRanging::deliver`].
#[derive(Default)]
pub struct MockRanging {
    state: Mutex<RangingState>,
}

impl std::fmt::Debug for MockRanging {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("MockRanging")
            .field("notifiers", &state.notifiers.len())
            .field("ranging", &state.ranging)
            .finish_non_exhaustive()
    }
}

impl MockRanging {
    /// Create an idle mock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `start_ranging` call fail with `message`.
    pub fn fail_next_start(&self, message: impl Into<String>) {
        lock(&self.state).fail_next_start = Some(message.into());
    }

    /// Deliver a detection batch to every registered notifier.
    ///
    /// Returns how many notifiers were called. Nothing is delivered while
    /// ranging is stopped.
    pub fn deliver(&self, beacons: Vec<Beacon>) -> usize {
        let (notifiers, region) = {
            let state = lock(&self.state);
            match &state.ranging {
                Some(region) => (state.notifiers.clone(), region.clone()),
                None => return 0,
            }
        };
        let batch: Vec<Beacon> = beacons.into_iter().filter(|b| region.matches(b)).collect();
        for notifier in &notifiers {
            notifier(batch.clone(), &region);
        }
        notifiers.len()
    }

    /// Number of registered notifiers.
    #[must_use]
    pub fn notifier_count(&self) -> usize {
        lock(&self.state).notifiers.len()
    }

    /// Whether ranging is active.
    #[must_use]
    pub fn is_ranging(&self) -> bool {
        lock(&self.state).ranging.is_some()
    }

    /// `(starts, stops)` seen so far.
    #[must_use]
    pub fn start_stop_counts(&self) -> (usize, usize) {
        let state = lock(&self.state);
        (state.starts, state.stops)
    }
}

impl RangingSource for MockRanging {
    fn add_range_notifier(&self, notifier: RangeNotifier) {
        lock(&self.state).notifiers.push(notifier);
    }

    fn remove_all_range_notifiers(&self) {
        lock(&self.state).notifiers.clear();
    }

    fn start_ranging(&self, region: Region) -> BoxFuture<'_, Result<(), BluetoothError>> {
        let result = {
            let mut state = lock(&self.state);
            state.starts += 1;
            match state.fail_next_start.take() {
                Some(message) => Err(BluetoothError::RangingFailed { message }),
                None => {
                    state.ranging = Some(region);
                    Ok(())
                }
            }
        };
        Box::pin(async move { result })
    }

    fn stop_ranging(&self, _region: &Region) -> BoxFuture<'_, Result<(), BluetoothError>> {
        {
            let mut state = lock(&self.state);
            state.stops += 1;
            state.ranging = None;
        }
        Box::pin(async { Ok(()) })
    }
}
