//! Session registry: live call lookups across two keyspaces.
//!
//! Maps carrier call ids and AI session ids to the handles of running call
//! sessions. Entries carry a TTL and a worker-scoped record shaped for
//! cross-process lookup; every read purges expired entries before answering.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Default entry lifetime. Sessions are refreshed on keepalive ticks, so a
/// record older than this belongs to a dead call or a dead worker.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(6 * 60 * 60);

/// Commands deliverable to a running call session from outside its loop.
#[derive(Debug)]
pub enum SessionCommand {
    Hangup,
}

/// Cheap clonable handle onto a live call session.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    pub call_id: String,
    pub call_sid: Option<String>,
    commands: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    pub fn new(
        call_id: String,
        call_sid: Option<String>,
        commands: mpsc::Sender<SessionCommand>,
    ) -> Self {
        Self {
            call_id,
            call_sid,
            commands,
        }
    }

    /// Ask the owning session to hang up. Best effort: a session already
    /// tearing down may have dropped its receiver.
    pub async fn hangup(&self) {
        let _ = self.commands.send(SessionCommand::Hangup).await;
    }
}

/// Persisted cross-worker record.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub call_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_sid: Option<String>,
    pub worker_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_address: Option<String>,
    /// Epoch seconds.
    pub expires_at: u64,
}

struct Entry {
    handle: SessionHandle,
    ai_session_id: Option<String>,
    record: SessionRecord,
}

/// Outcome of [`SessionRegistry::resolve_active_session`].
#[derive(Debug)]
pub enum SessionResolution {
    Found(SessionHandle),
    NotFound,
    /// More than one live session and no explicit id: the caller must
    /// disambiguate.
    Ambiguous(usize),
}

/// Shared registry of active call sessions for this worker.
pub struct SessionRegistry {
    worker_id: String,
    worker_address: Option<String>,
    ttl: Duration,
    by_call_id: DashMap<String, Entry>,
    ai_to_call: DashMap<String, String>,
}

impl SessionRegistry {
    pub fn new(worker_id: String, worker_address: Option<String>, ttl: Duration) -> Self {
        Self {
            worker_id,
            worker_address,
            ttl,
            by_call_id: DashMap::new(),
            ai_to_call: DashMap::new(),
        }
    }

    fn fresh_record(&self, call_id: &str, call_sid: Option<&str>) -> SessionRecord {
        SessionRecord {
            call_id: call_id.to_string(),
            call_sid: call_sid.map(String::from),
            worker_id: self.worker_id.clone(),
            worker_address: self.worker_address.clone(),
            expires_at: now_secs() + self.ttl.as_secs(),
        }
    }

    /// Register a session under its call id. Idempotent upsert: a prior
    /// mapping for the same call id is replaced, including its AI-session
    /// alias.
    pub fn register(&self, handle: SessionHandle) {
        let record = self.fresh_record(&handle.call_id, handle.call_sid.as_deref());
        let entry = Entry {
            ai_session_id: None,
            record,
            handle,
        };
        if let Some(previous) = self.by_call_id.insert(entry.handle.call_id.clone(), entry) {
            if let Some(ai_id) = previous.ai_session_id {
                self.ai_to_call.remove(&ai_id);
            }
        }
        debug!(total = self.by_call_id.len(), "Session registered");
    }

    /// Alias an AI session id to an already-registered call.
    pub fn bind_ai_session(&self, call_id: &str, ai_session_id: &str) {
        if let Some(mut entry) = self.by_call_id.get_mut(call_id) {
            if let Some(old) = entry.ai_session_id.replace(ai_session_id.to_string()) {
                if old != ai_session_id {
                    self.ai_to_call.remove(&old);
                }
            }
            self.ai_to_call
                .insert(ai_session_id.to_string(), call_id.to_string());
        }
    }

    /// Remove both keyspace mappings for a call. Idempotent.
    pub fn unregister(&self, call_id: &str) {
        if let Some((_, entry)) = self.by_call_id.remove(call_id) {
            if let Some(ai_id) = entry.ai_session_id {
                self.ai_to_call.remove(&ai_id);
            }
        }
    }

    pub fn find_by_call_id(&self, call_id: &str) -> Option<SessionHandle> {
        self.purge_expired();
        self.by_call_id.get(call_id).map(|e| e.handle.clone())
    }

    pub fn find_by_ai_session_id(&self, ai_session_id: &str) -> Option<SessionHandle> {
        self.purge_expired();
        let call_id = self.ai_to_call.get(ai_session_id)?.clone();
        self.by_call_id.get(&call_id).map(|e| e.handle.clone())
    }

    /// Refresh the TTL of a live entry.
    pub fn touch(&self, call_id: &str) {
        if let Some(mut entry) = self.by_call_id.get_mut(call_id) {
            entry.record.expires_at = now_secs() + self.ttl.as_secs();
        }
    }

    /// The persisted cross-worker record for a call, if live.
    pub fn record(&self, call_id: &str) -> Option<SessionRecord> {
        self.purge_expired();
        self.by_call_id.get(call_id).map(|e| e.record.clone())
    }

    /// Drop every entry belonging to the named worker. Run at startup with
    /// this worker's own id to purge records a crashed predecessor left
    /// behind.
    pub fn clear_all_for_worker(&self, worker_id: &str) {
        let stale: Vec<String> = self
            .by_call_id
            .iter()
            .filter(|e| e.record.worker_id == worker_id)
            .map(|e| e.key().clone())
            .collect();
        for call_id in &stale {
            self.unregister(call_id);
        }
        if !stale.is_empty() {
            info!(worker_id, count = stale.len(), "Cleared stale worker sessions");
        }
    }

    /// Resolve "the" active session: an explicit id wins; otherwise a sole
    /// live session is unambiguous, and anything else needs the caller to
    /// disambiguate.
    pub fn resolve_active_session(&self, explicit_call_id: Option<&str>) -> SessionResolution {
        self.purge_expired();

        if let Some(call_id) = explicit_call_id {
            return match self.by_call_id.get(call_id) {
                Some(entry) => SessionResolution::Found(entry.handle.clone()),
                None => SessionResolution::NotFound,
            };
        }

        match self.by_call_id.len() {
            0 => SessionResolution::NotFound,
            1 => {
                let handle = self
                    .by_call_id
                    .iter()
                    .next()
                    .map(|e| e.handle.clone());
                match handle {
                    Some(h) => SessionResolution::Found(h),
                    None => SessionResolution::NotFound,
                }
            }
            n => SessionResolution::Ambiguous(n),
        }
    }

    /// Handles of every live session, for shutdown sweeps.
    pub fn handles(&self) -> Vec<SessionHandle> {
        self.purge_expired();
        self.by_call_id.iter().map(|e| e.handle.clone()).collect()
    }

    pub fn active_count(&self) -> usize {
        self.purge_expired();
        self.by_call_id.len()
    }

    fn purge_expired(&self) {
        let now = now_secs();
        let expired: Vec<String> = self
            .by_call_id
            .iter()
            .filter(|e| e.record.expires_at <= now)
            .map(|e| e.key().clone())
            .collect();
        for call_id in expired {
            debug!(call_id = %call_id, "Purging expired session entry");
            self.unregister(&call_id);
        }
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(call_id: &str) -> SessionHandle {
        let (tx, _rx) = mpsc::channel(1);
        SessionHandle::new(call_id.to_string(), Some(format!("CA-{call_id}")), tx)
    }

    fn registry() -> SessionRegistry {
        SessionRegistry::new("worker-1".into(), None, Duration::from_secs(60))
    }

    #[test]
    fn test_register_and_find_by_call_id() {
        let reg = registry();
        reg.register(handle("call-a"));
        assert!(reg.find_by_call_id("call-a").is_some());
        assert!(reg.find_by_call_id("call-b").is_none());
    }

    #[test]
    fn test_register_is_idempotent_upsert() {
        let reg = registry();
        reg.register(handle("call-a"));
        reg.bind_ai_session("call-a", "rc-1");
        reg.register(handle("call-a"));
        assert_eq!(reg.active_count(), 1);
        // the replaced entry's alias went with it
        assert!(reg.find_by_ai_session_id("rc-1").is_none());
    }

    #[test]
    fn test_ai_session_alias() {
        let reg = registry();
        reg.register(handle("call-a"));
        reg.bind_ai_session("call-a", "rc-1");
        let found = reg.find_by_ai_session_id("rc-1").unwrap();
        assert_eq!(found.call_id, "call-a");

        reg.bind_ai_session("call-a", "rc-2");
        assert!(reg.find_by_ai_session_id("rc-1").is_none());
        assert!(reg.find_by_ai_session_id("rc-2").is_some());
    }

    #[test]
    fn test_unregister_releases_both_keyspaces() {
        let reg = registry();
        reg.register(handle("call-a"));
        reg.bind_ai_session("call-a", "rc-1");
        reg.unregister("call-a");
        assert!(reg.find_by_call_id("call-a").is_none());
        assert!(reg.find_by_ai_session_id("rc-1").is_none());
        // repeated teardown is a no-op
        reg.unregister("call-a");
    }

    #[test]
    fn test_expired_entries_invisible_to_reads() {
        let reg = SessionRegistry::new("worker-1".into(), None, Duration::ZERO);
        reg.register(handle("call-a"));
        reg.bind_ai_session("call-a", "rc-1");
        assert!(reg.find_by_call_id("call-a").is_none());
        assert!(reg.find_by_ai_session_id("rc-1").is_none());
        assert!(matches!(
            reg.resolve_active_session(None),
            SessionResolution::NotFound
        ));
    }

    #[test]
    fn test_touch_refreshes_expiry() {
        let reg = registry();
        reg.register(handle("call-a"));
        let before = reg.record("call-a").unwrap().expires_at;
        reg.touch("call-a");
        assert!(reg.record("call-a").unwrap().expires_at >= before);
    }

    #[test]
    fn test_clear_all_for_worker() {
        let reg = registry();
        reg.register(handle("call-a"));
        reg.register(handle("call-b"));
        reg.clear_all_for_worker("worker-1");
        assert_eq!(reg.active_count(), 0);
    }

    #[test]
    fn test_clear_all_for_worker_ignores_other_workers() {
        let reg = registry();
        reg.register(handle("call-a"));
        reg.clear_all_for_worker("worker-2");
        assert_eq!(reg.active_count(), 1);
    }

    #[test]
    fn test_resolve_single_session_without_explicit_id() {
        let reg = registry();
        reg.register(handle("call-a"));
        match reg.resolve_active_session(None) {
            SessionResolution::Found(h) => assert_eq!(h.call_id, "call-a"),
            other => panic!("expected sole session, got {other:?}"),
        }
    }

    #[test]
    fn test_resolve_requires_explicit_id_when_multiple() {
        let reg = registry();
        reg.register(handle("call-a"));
        reg.register(handle("call-b"));
        assert!(matches!(
            reg.resolve_active_session(None),
            SessionResolution::Ambiguous(2)
        ));
        match reg.resolve_active_session(Some("call-b")) {
            SessionResolution::Found(h) => assert_eq!(h.call_id, "call-b"),
            other => panic!("expected explicit match, got {other:?}"),
        }
    }

    #[test]
    fn test_record_shape() {
        let reg = SessionRegistry::new(
            "worker-1".into(),
            Some("10.0.0.5:8080".into()),
            Duration::from_secs(60),
        );
        reg.register(handle("call-a"));
        let record = reg.record("call-a").unwrap();
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["callId"], "call-a");
        assert_eq!(json["callSid"], "CA-call-a");
        assert_eq!(json["workerId"], "worker-1");
        assert_eq!(json["workerAddress"], "10.0.0.5:8080");
        assert!(json["expiresAt"].is_u64());
    }
}
