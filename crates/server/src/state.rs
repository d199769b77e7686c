//! Relay state: the session and viewer registries.
//!
//! The two registries are independent. A viewer may attach before, during or
//! after the session it names is registered; a viewer with no session simply
//! never receives anything.

use std::sync::Arc;

use dashmap::DashMap;
use seeshell_protocol::{RelaySnapshot, SessionKey, ViewerId};

use crate::config::SharedSettings;
use crate::session::Session;
use crate::viewer::Viewer;

type ViewerSet = DashMap<ViewerId, Arc<Viewer>>;

/// Process-wide relay engine, built once at start-up
#[derive(Default)]
pub struct Relay {
    sessions: DashMap<SessionKey, Arc<Session>>,
    viewers: DashMap<SessionKey, ViewerSet>,
}

impl Relay {
    pub fn new() -> Self {
        Self::default()
    }

    // -- Sessions --

    /// Register a session, returning whatever previously held its key.
    pub fn register_session(&self, session: Arc<Session>) -> Option<Arc<Session>> {
        self.sessions.insert(session.key().clone(), session)
    }

    /// Unregister `session`, unless its key has since been taken over by a
    /// newer session.
    pub fn unregister_session(&self, session: &Arc<Session>) -> bool {
        self.sessions
            .remove_if(session.key(), |_, current| Arc::ptr_eq(current, session))
            .is_some()
    }

    pub fn lookup_session(&self, key: &SessionKey) -> Option<Arc<Session>> {
        self.sessions.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Keys of all live sessions, sorted
    pub fn session_keys(&self) -> Vec<SessionKey> {
        let mut keys: Vec<SessionKey> = self.sessions.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    // -- Viewers --

    pub fn attach_viewer(&self, viewer: Arc<Viewer>) {
        // The entry guard is held across the insert so a concurrent detach
        // cannot drop the set between creation and insertion.
        self.viewers
            .entry(viewer.key().clone())
            .or_default()
            .insert(viewer.id(), viewer);
    }

    /// Remove a viewer; the key's entry goes away with its last viewer.
    pub fn detach_viewer(&self, key: &SessionKey, id: ViewerId) -> Option<Arc<Viewer>> {
        let removed = self
            .viewers
            .get(key)
            .and_then(|set| set.remove(&id).map(|(_, viewer)| viewer));

        self.viewers.remove_if(key, |_, set| set.is_empty());
        removed
    }

    /// Visit every viewer attached under `key`.
    pub fn for_each_viewer(&self, key: &SessionKey, mut f: impl FnMut(&Arc<Viewer>)) {
        for viewer in self.viewers_for(key) {
            f(&viewer);
        }
    }

    /// Snapshot of the viewers attached under `key`, safe to hold across `.await`
    pub fn viewers_for(&self, key: &SessionKey) -> Vec<Arc<Viewer>> {
        self.viewers
            .get(key)
            .map(|set| set.iter().map(|e| Arc::clone(e.value())).collect())
            .unwrap_or_default()
    }

    pub fn viewer_count(&self, key: &SessionKey) -> usize {
        self.viewers.get(key).map(|set| set.len()).unwrap_or(0)
    }

    #[cfg(test)]
    pub fn has_viewer_entry(&self, key: &SessionKey) -> bool {
        self.viewers.contains_key(key)
    }

    // -- Introspection --

    /// On-demand view of both registries.
    pub fn snapshot(&self) -> RelaySnapshot {
        let sessions = self
            .session_keys()
            .into_iter()
            .filter_map(|key| self.lookup_session(&key))
            .map(|session| session.summary(self.viewer_count(session.key())))
            .collect();

        let keys: Vec<SessionKey> = self.viewers.iter().map(|e| e.key().clone()).collect();
        let mut viewers = Vec::new();
        for key in keys {
            let dangling = !self.sessions.contains_key(&key);
            self.for_each_viewer(&key, |viewer| viewers.push(viewer.summary(dangling)));
        }
        viewers.sort_by_key(|v| v.id);

        RelaySnapshot { sessions, viewers }
    }
}

/// State handed to the HTTP routes
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<Relay>,
    pub settings: SharedSettings,
}

impl AppState {
    pub fn new(relay: Arc<Relay>, settings: SharedSettings) -> Self {
        Self { relay, settings }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::viewer::OutboundMessage;
    use seeshell_protocol::ViewMode;
    use tokio::sync::mpsc;

    fn viewer(key: &str) -> (Arc<Viewer>, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(8);
        (
            Arc::new(Viewer::new(SessionKey::new(key), ViewMode::Observe, tx)),
            rx,
        )
    }

    fn session(key: &str) -> Arc<Session> {
        let (_client, server) = tokio::io::duplex(16);
        Arc::new(Session::new(SessionKey::new(key), Box::new(server)))
    }

    #[tokio::test]
    async fn sessions_register_lookup_unregister() {
        let relay = Relay::new();
        let key = SessionKey::new("10.0.0.1:4000");
        assert!(relay.lookup_session(&key).is_none());

        let first = session("10.0.0.1:4000");
        relay.register_session(Arc::clone(&first));
        relay.register_session(session("10.0.0.2:4000"));
        assert!(relay.lookup_session(&key).is_some());
        assert_eq!(
            relay.session_keys(),
            vec![SessionKey::new("10.0.0.1:4000"), SessionKey::new("10.0.0.2:4000")]
        );

        assert!(relay.unregister_session(&first));
        assert!(relay.lookup_session(&key).is_none());
        assert!(!relay.unregister_session(&first));
    }

    #[tokio::test]
    async fn stale_session_does_not_unregister_its_replacement() {
        let relay = Relay::new();
        let key = SessionKey::new("10.0.0.3:4000");
        let old = session("10.0.0.3:4000");
        let new = session("10.0.0.3:4000");
        relay.register_session(Arc::clone(&old));
        assert!(relay.register_session(Arc::clone(&new)).is_some());

        assert!(!relay.unregister_session(&old));
        let current = relay.lookup_session(&key).expect("replacement was removed");
        assert!(Arc::ptr_eq(&current, &new));
    }

    #[test]
    fn last_detach_removes_key_and_reattach_starts_fresh() {
        let relay = Relay::new();
        let key = SessionKey::new("k");
        let (a, _rx_a) = viewer("k");
        let (b, _rx_b) = viewer("k");
        relay.attach_viewer(Arc::clone(&a));
        relay.attach_viewer(Arc::clone(&b));
        assert_eq!(relay.viewer_count(&key), 2);

        relay.detach_viewer(&key, a.id());
        assert!(relay.has_viewer_entry(&key));
        relay.detach_viewer(&key, b.id());
        assert!(!relay.has_viewer_entry(&key));

        let (c, _rx_c) = viewer("k");
        relay.attach_viewer(Arc::clone(&c));
        let ids: Vec<_> = relay.viewers_for(&key).iter().map(|v| v.id()).collect();
        assert_eq!(ids, vec![c.id()]);
    }

    #[test]
    fn detaching_unknown_viewer_is_harmless() {
        let relay = Relay::new();
        let key = SessionKey::new("nobody");
        assert!(relay.detach_viewer(&key, 42).is_none());
        assert!(!relay.has_viewer_entry(&key));
    }

    #[tokio::test]
    async fn snapshot_marks_dangling_viewers() {
        let relay = Relay::new();
        relay.register_session(session("live"));
        let (attached, _rx1) = viewer("live");
        let (dangling, _rx2) = viewer("gone");
        attached.mark_initialized();
        relay.attach_viewer(Arc::clone(&attached));
        relay.attach_viewer(Arc::clone(&dangling));

        let snapshot = relay.snapshot();
        assert_eq!(snapshot.sessions.len(), 1);
        assert_eq!(snapshot.sessions[0].viewers, 1);

        let find = |id| snapshot.viewers.iter().find(|v| v.id == id).unwrap();
        assert!(!find(attached.id()).dangling);
        assert!(find(attached.id()).initialized);
        assert!(find(dangling.id()).dangling);
    }

    #[test]
    fn concurrent_attach_and_detach_leave_no_empty_sets() {
        let relay = Arc::new(Relay::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let relay = Arc::clone(&relay);
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        let (v, _rx) = viewer("shared");
                        relay.attach_viewer(Arc::clone(&v));
                        relay.for_each_viewer(v.key(), |_| {});
                        relay.detach_viewer(v.key(), v.id());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(!relay.has_viewer_entry(&SessionKey::new("shared")));
    }
}
