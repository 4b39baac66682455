//! Per-connection mission context
//!
//! One manager instance is bound to each agent connection; there is no
//! process-global active-mission table. Readers take an atomic snapshot of
//! an immutable record, so the executor's background logging can observe a
//! consistent state while a `set` is in flight.

use std::sync::{Arc, RwLock};

use uuid::Uuid;

/// Immutable snapshot of the connection's active context.
#[derive(Debug, Clone, Default)]
pub struct MissionContextSnapshot {
    pub active_mission_id: Option<Uuid>,
    pub active_cookie_profile: Option<String>,
}

/// Session-scoped active mission and cookie profile.
#[derive(Default)]
pub struct MissionContext {
    inner: RwLock<Arc<MissionContextSnapshot>>,
}

impl MissionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the active mission, optionally switching the cookie profile.
    ///
    /// Passing no profile keeps the previous one; mission existence is
    /// validated by the calling tool against the store.
    pub fn set(&self, mission_id: Uuid, cookie_profile: Option<String>) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let previous_profile = guard.active_cookie_profile.clone();
        *guard = Arc::new(MissionContextSnapshot {
            active_mission_id: Some(mission_id),
            active_cookie_profile: cookie_profile.or(previous_profile),
        });
    }

    /// Reset both fields.
    pub fn clear(&self) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(MissionContextSnapshot::default());
    }

    /// Consistent point-in-time view of the state.
    pub fn snapshot(&self) -> Arc<MissionContextSnapshot> {
        Arc::clone(&self.inner.read().unwrap_or_else(|e| e.into_inner()))
    }

    /// Explicit value wins; otherwise fall back to the active mission.
    pub fn resolve_mission(&self, explicit: Option<Uuid>) -> Option<Uuid> {
        explicit.or(self.snapshot().active_mission_id)
    }

    /// Explicit value wins; otherwise fall back to the active profile.
    pub fn resolve_cookie_profile(&self, explicit: Option<&str>) -> Option<String> {
        explicit
            .map(str::to_string)
            .or_else(|| self.snapshot().active_cookie_profile.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_empty() {
        let ctx = MissionContext::new();
        let snap = ctx.snapshot();
        assert!(snap.active_mission_id.is_none());
        assert!(snap.active_cookie_profile.is_none());
    }

    #[test]
    fn test_set_and_clear() {
        let ctx = MissionContext::new();
        let mission = Uuid::new_v4();
        ctx.set(mission, Some("admin".into()));
        let snap = ctx.snapshot();
        assert_eq!(snap.active_mission_id, Some(mission));
        assert_eq!(snap.active_cookie_profile.as_deref(), Some("admin"));

        ctx.clear();
        let snap = ctx.snapshot();
        assert!(snap.active_mission_id.is_none());
        assert!(snap.active_cookie_profile.is_none());
    }

    #[test]
    fn test_set_without_profile_keeps_previous() {
        let ctx = MissionContext::new();
        ctx.set(Uuid::new_v4(), Some("admin".into()));
        ctx.set(Uuid::new_v4(), None);
        assert_eq!(
            ctx.snapshot().active_cookie_profile.as_deref(),
            Some("admin")
        );
    }

    #[test]
    fn test_explicit_values_win_resolution() {
        let ctx = MissionContext::new();
        let active = Uuid::new_v4();
        let explicit = Uuid::new_v4();
        ctx.set(active, Some("viewer".into()));

        assert_eq!(ctx.resolve_mission(Some(explicit)), Some(explicit));
        assert_eq!(ctx.resolve_mission(None), Some(active));
        assert_eq!(
            ctx.resolve_cookie_profile(Some("admin")).as_deref(),
            Some("admin")
        );
        assert_eq!(ctx.resolve_cookie_profile(None).as_deref(), Some("viewer"));
    }

    #[test]
    fn test_snapshot_is_stable_across_set() {
        let ctx = MissionContext::new();
        let first = Uuid::new_v4();
        ctx.set(first, None);
        let snap = ctx.snapshot();
        ctx.set(Uuid::new_v4(), Some("other".into()));
        // The earlier snapshot still reads the state it captured.
        assert_eq!(snap.active_mission_id, Some(first));
    }
}
