use crate::session::SessionHandle;
use aronia_core::Pubkey;
use dashmap::DashMap;

/// Concurrent pubkey → session-handle table.
///
/// Admission keeps the existing session when a duplicate stream for the
/// same key arrives, so insertion is first-wins; removal is guarded by
/// the session's admit timestamp so a torn-down session can never evict
/// its successor.
#[derive(Default)]
pub(crate) struct SessionTable {
    sessions: DashMap<Pubkey, SessionHandle>,
}

impl SessionTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Insert a handle unless one already exists for the key. Returns
    /// `true` if the handle was stored.
    pub(crate) fn insert_if_absent(&self, handle: SessionHandle) -> bool {
        match self.sessions.entry(handle.remote) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(handle);
                true
            }
        }
    }

    /// Remove the entry only if it was admitted at the given timestamp.
    pub(crate) fn remove_if(&self, pubkey: &Pubkey, connected_at_ms: u64) {
        self.sessions
            .remove_if(pubkey, |_k, v| v.connected_at_ms == connected_at_ms);
    }

    /// Look up a session handle by public key.
    pub(crate) fn get(&self, pubkey: &Pubkey) -> Option<SessionHandle> {
        self.sessions.get(pubkey).map(|entry| entry.value().clone())
    }

    /// Snapshot of all live handles.
    pub(crate) fn handles(&self) -> Vec<SessionHandle> {
        self.sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Remove and return every handle (used by `stop()`).
    pub(crate) fn drain(&self) -> Vec<SessionHandle> {
        let keys: Vec<Pubkey> = self.sessions.iter().map(|e| *e.key()).collect();
        keys.iter()
            .filter_map(|k| self.sessions.remove(k).map(|(_, v)| v))
            .collect()
    }

    /// Number of active sessions.
    pub(crate) fn len(&self) -> usize {
        self.sessions.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::PeerInfo;
    use std::sync::atomic::AtomicU64;
    use std::sync::{Arc, RwLock};
    use tokio::sync::mpsc;

    fn make_handle(pubkey: Pubkey, connected_at_ms: u64) -> SessionHandle {
        let (cmd_tx, _cmd_rx) = mpsc::channel(1);
        SessionHandle {
            remote: pubkey,
            connected_at_ms,
            cmd_tx,
            next_request: Arc::new(AtomicU64::new(0)),
            info: Arc::new(RwLock::new(PeerInfo {
                pubkey,
                capabilities: None,
                connected_at_ms,
                last_seen_ms: connected_at_ms,
                online: true,
            })),
        }
    }

    fn make_pubkey(id: u8) -> Pubkey {
        let mut key = [0u8; 32];
        key[0] = id;
        key
    }

    #[test]
    fn insert_and_get_returns_handle() {
        let table = SessionTable::new();
        let pubkey = make_pubkey(1);

        assert!(table.insert_if_absent(make_handle(pubkey, 100)));
        let retrieved = table.get(&pubkey).unwrap();
        assert_eq!(retrieved.remote, pubkey);
    }

    #[test]
    fn duplicate_insert_keeps_original() {
        let table = SessionTable::new();
        let pubkey = make_pubkey(1);

        assert!(table.insert_if_absent(make_handle(pubkey, 100)));
        assert!(!table.insert_if_absent(make_handle(pubkey, 200)));
        assert_eq!(table.get(&pubkey).unwrap().connected_at_ms, 100);
    }

    #[test]
    fn remove_if_with_matching_timestamp_removes() {
        let table = SessionTable::new();
        let pubkey = make_pubkey(1);
        let _ = table.insert_if_absent(make_handle(pubkey, 100));

        table.remove_if(&pubkey, 100);
        assert!(table.get(&pubkey).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn remove_if_with_stale_timestamp_keeps_entry() {
        let table = SessionTable::new();
        let pubkey = make_pubkey(1);
        let _ = table.insert_if_absent(make_handle(pubkey, 200));

        table.remove_if(&pubkey, 100);
        assert!(table.get(&pubkey).is_some());
    }

    #[test]
    fn drain_empties_the_table() {
        let table = SessionTable::new();
        let _ = table.insert_if_absent(make_handle(make_pubkey(1), 1));
        let _ = table.insert_if_absent(make_handle(make_pubkey(2), 2));
        assert_eq!(table.len(), 2);

        let drained = table.drain();
        assert_eq!(drained.len(), 2);
        assert!(table.is_empty());
    }
}
