//! Telemetry context
//!
//! Every flushed item carries tags describing the application, device,
//! location, session, user, SDK internals and current operation. The
//! sections form a closed set composed into one [`ContextSnapshot`];
//! [`TelemetryContext`] owns the mutable state and hands out a cached,
//! shared tag dictionary so items in a bundle do not recompute it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ordered_map::OrderedMap;

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationContext {
    pub version: Option<String>,
    pub build: Option<String>,
}

impl ApplicationContext {
    fn append_tags(&self, tags: &mut OrderedMap) {
        tags.insert_opt("ai.application.ver", self.version.clone());
        tags.insert_opt("ai.application.build", self.build.clone());
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceContext {
    pub id: Option<String>,
    pub model: Option<String>,
    pub os: Option<String>,
    pub os_version: Option<String>,
    pub locale: Option<String>,
    pub device_type: Option<String>,
    pub network: Option<String>,
}

impl DeviceContext {
    /// Collects non-identifying device information from the running system.
    ///
    /// Never includes hostname or username. The device id is a random
    /// per-process value.
    pub fn collect() -> Self {
        Self {
            id: Some(Uuid::new_v4().to_string()),
            model: Some(std::env::consts::ARCH.to_string()),
            os: Some(std::env::consts::OS.to_string()),
            os_version: read_kernel_version(),
            locale: std::env::var("LANG").ok().filter(|l| !l.is_empty()),
            device_type: Some("pc".to_string()),
            network: None,
        }
    }

    fn append_tags(&self, tags: &mut OrderedMap) {
        tags.insert_opt("ai.device.id", self.id.clone());
        tags.insert_opt("ai.device.model", self.model.clone());
        tags.insert_opt("ai.device.os", self.os.clone());
        tags.insert_opt("ai.device.osVersion", self.os_version.clone());
        tags.insert_opt("ai.device.locale", self.locale.clone());
        tags.insert_opt("ai.device.type", self.device_type.clone());
        tags.insert_opt("ai.device.network", self.network.clone());
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationContext {
    pub ip: Option<String>,
}

impl LocationContext {
    fn append_tags(&self, tags: &mut OrderedMap) {
        tags.insert_opt("ai.location.ip", self.ip.clone());
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    pub id: Option<String>,
    pub is_first: bool,
    pub is_new: bool,
}

impl SessionContext {
    fn append_tags(&self, tags: &mut OrderedMap) {
        if let Some(id) = &self.id {
            tags.insert("ai.session.id", id.clone());
            tags.insert("ai.session.isFirst", self.is_first.to_string());
            tags.insert("ai.session.isNew", self.is_new.to_string());
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserContext {
    pub id: Option<String>,
    pub account_id: Option<String>,
    pub auth_user_id: Option<String>,
}

impl UserContext {
    fn append_tags(&self, tags: &mut OrderedMap) {
        tags.insert_opt("ai.user.id", self.id.clone());
        tags.insert_opt("ai.user.accountId", self.account_id.clone());
        tags.insert_opt("ai.user.authUserId", self.auth_user_id.clone());
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalContext {
    pub sdk_version: String,
    pub agent_version: Option<String>,
}

impl Default for InternalContext {
    fn default() -> Self {
        Self {
            sdk_version: format!("rust:{}", env!("CARGO_PKG_VERSION")),
            agent_version: None,
        }
    }
}

impl InternalContext {
    fn append_tags(&self, tags: &mut OrderedMap) {
        tags.insert("ai.internal.sdkVersion", self.sdk_version.clone());
        tags.insert_opt("ai.internal.agentVersion", self.agent_version.clone());
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationContext {
    pub id: Option<String>,
    pub name: Option<String>,
    pub parent_id: Option<String>,
    pub synthetic_source: Option<String>,
}

impl OperationContext {
    fn append_tags(&self, tags: &mut OrderedMap) {
        tags.insert_opt("ai.operation.id", self.id.clone());
        tags.insert_opt("ai.operation.name", self.name.clone());
        tags.insert_opt("ai.operation.parentId", self.parent_id.clone());
        tags.insert_opt("ai.operation.syntheticSource", self.synthetic_source.clone());
    }
}

// ============================================================================
// ContextSnapshot
// ============================================================================

/// All context sections at one point in time.
///
/// `device` stays `None` until first needed; [`TelemetryContext`] fills it
/// lazily.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub application: ApplicationContext,
    pub device: Option<DeviceContext>,
    pub location: LocationContext,
    pub session: SessionContext,
    pub user: UserContext,
    pub internal: InternalContext,
    pub operation: OperationContext,
}

impl ContextSnapshot {
    /// Flattens every section into the tag dictionary, in a fixed section order.
    pub fn to_tags(&self) -> OrderedMap {
        let mut tags = OrderedMap::new();
        self.application.append_tags(&mut tags);
        if let Some(device) = &self.device {
            device.append_tags(&mut tags);
        }
        self.location.append_tags(&mut tags);
        self.session.append_tags(&mut tags);
        self.user.append_tags(&mut tags);
        self.internal.append_tags(&mut tags);
        self.operation.append_tags(&mut tags);
        tags
    }
}

// ============================================================================
// TelemetryContext
// ============================================================================

/// Owner of the mutable context state.
///
/// Mutations go through `update_*` methods, which bump the state generation
/// under the state lock. A cached tag dictionary is only served while its
/// generation is current. Readers (the channel) only ever see immutable
/// snapshots.
#[derive(Debug)]
pub struct TelemetryContext {
    instrumentation_key: Option<String>,
    state: RwLock<ContextSnapshot>,
    generation: AtomicU64,
    cached_tags: RwLock<Option<(u64, Arc<OrderedMap>)>>,
}

impl TelemetryContext {
    pub fn new(application: ApplicationContext, instrumentation_key: Option<String>) -> Self {
        let snapshot = ContextSnapshot {
            application,
            ..Default::default()
        };
        Self::from_snapshot(snapshot, instrumentation_key)
    }

    /// Builds a context from a fully populated snapshot, e.g. in tests.
    pub fn from_snapshot(snapshot: ContextSnapshot, instrumentation_key: Option<String>) -> Self {
        Self {
            instrumentation_key,
            state: RwLock::new(snapshot),
            generation: AtomicU64::new(0),
            cached_tags: RwLock::new(None),
        }
    }

    pub fn instrumentation_key(&self) -> Option<&str> {
        self.instrumentation_key.as_deref()
    }

    /// Returns a copy of the current state, collecting device info if needed.
    pub fn snapshot(&self) -> ContextSnapshot {
        self.ensure_device();
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the shared tag dictionary, rebuilding it only after a mutation.
    pub fn tags(&self) -> Arc<OrderedMap> {
        self.ensure_device();

        let current = self.generation.load(Ordering::SeqCst);
        if let Some((generation, tags)) = self
            .cached_tags
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            if *generation == current {
                return Arc::clone(tags);
            }
        }

        // Generation and tags are read under the same state lock, so the
        // pair always describes one consistent state.
        let (generation, tags) = {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            (
                self.generation.load(Ordering::SeqCst),
                Arc::new(state.to_tags()),
            )
        };

        let mut cached = self
            .cached_tags
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if cached.as_ref().map_or(true, |(g, _)| *g < generation) {
            *cached = Some((generation, Arc::clone(&tags)));
        }
        tags
    }

    pub fn update_application(&self, f: impl FnOnce(&mut ApplicationContext)) {
        self.mutate(|s| f(&mut s.application));
    }

    pub fn update_device(&self, f: impl FnOnce(&mut DeviceContext)) {
        self.ensure_device();
        self.mutate(|s| f(s.device.get_or_insert_with(DeviceContext::default)));
    }

    pub fn update_location(&self, f: impl FnOnce(&mut LocationContext)) {
        self.mutate(|s| f(&mut s.location));
    }

    pub fn update_user(&self, f: impl FnOnce(&mut UserContext)) {
        self.mutate(|s| f(&mut s.user));
    }

    pub fn update_operation(&self, f: impl FnOnce(&mut OperationContext)) {
        self.mutate(|s| f(&mut s.operation));
    }

    pub fn update_internal(&self, f: impl FnOnce(&mut InternalContext)) {
        self.mutate(|s| f(&mut s.internal));
    }

    /// Starts a new session and returns its id.
    ///
    /// The first session of a context is flagged `is_first`.
    pub fn renew_session(&self) -> String {
        let id = Uuid::new_v4().to_string();
        let new_id = id.clone();
        self.mutate(move |s| {
            let is_first = s.session.id.is_none();
            s.session = SessionContext {
                id: Some(new_id),
                is_first,
                is_new: true,
            };
        });
        id
    }

    fn ensure_device(&self) {
        let missing = self
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .device
            .is_none();
        if missing {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            if state.device.is_none() {
                state.device = Some(DeviceContext::collect());
                self.generation.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn mutate(&self, f: impl FnOnce(&mut ContextSnapshot)) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut state);
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}

fn read_kernel_version() -> Option<String> {
    std::fs::read_to_string("/proc/version")
        .ok()
        .and_then(|v| v.split_whitespace().nth(2).map(String::from))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> TelemetryContext {
        TelemetryContext::new(
            ApplicationContext {
                version: Some("1.2.3".into()),
                build: Some("42".into()),
            },
            Some("ikey".into()),
        )
    }

    #[test]
    fn test_tags_are_cached_until_mutation() {
        let ctx = context();
        let first = ctx.tags();
        let second = ctx.tags();
        assert!(Arc::ptr_eq(&first, &second));

        ctx.update_user(|u| u.id = Some("user-1".into()));
        let third = ctx.tags();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(third.get("ai.user.id"), Some("user-1"));
    }

    #[test]
    fn test_concurrent_readers_never_keep_old_tags() {
        let ctx = Arc::new(context());
        let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let ctx = Arc::clone(&ctx);
                let stop = Arc::clone(&stop);
                std::thread::spawn(move || {
                    while !stop.load(Ordering::Relaxed) {
                        let _ = ctx.tags();
                    }
                })
            })
            .collect();

        for round in 0..400 {
            let id = format!("user-{round}");
            ctx.update_user(|u| u.id = Some(id.clone()));
            assert_eq!(ctx.tags().get("ai.user.id"), Some(id.as_str()));
        }

        stop.store(true, Ordering::Relaxed);
        for reader in readers {
            reader.join().unwrap();
        }
    }

    #[test]
    fn test_device_collected_lazily() {
        let ctx = context();
        let tags = ctx.tags();
        assert!(tags.contains_key("ai.device.id"));
        assert!(tags.contains_key("ai.device.os"));

        // The device id is stable across rebuilds.
        let id = tags.get("ai.device.id").map(String::from);
        ctx.update_location(|l| l.ip = Some("10.0.0.1".into()));
        assert_eq!(ctx.tags().get("ai.device.id").map(String::from), id);
    }

    #[test]
    fn test_tag_order_follows_sections() {
        let ctx = context();
        ctx.renew_session();
        let tags = ctx.tags();
        let keys: Vec<&str> = tags.keys().collect();
        let app = keys.iter().position(|k| *k == "ai.application.ver").unwrap();
        let session = keys.iter().position(|k| *k == "ai.session.id").unwrap();
        let internal = keys.iter().position(|k| *k == "ai.internal.sdkVersion").unwrap();
        assert!(app < session);
        assert!(session < internal);
    }

    #[test]
    fn test_renew_session_flags_first() {
        let ctx = context();
        let first = ctx.renew_session();
        assert_eq!(ctx.snapshot().session.id.as_deref(), Some(first.as_str()));
        assert!(ctx.snapshot().session.is_first);

        let second = ctx.renew_session();
        assert_ne!(first, second);
        assert!(!ctx.snapshot().session.is_first);
        assert_eq!(ctx.tags().get("ai.session.isFirst"), Some("false"));
    }

    #[test]
    fn test_update_device_overrides_collected_values() {
        let ctx = context();
        ctx.update_device(|d| d.network = Some("wifi".into()));
        let snapshot = ctx.snapshot();
        let device = snapshot.device.unwrap();
        assert_eq!(device.network.as_deref(), Some("wifi"));
        assert!(device.id.is_some());
    }
}
