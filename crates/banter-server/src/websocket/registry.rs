//! Live connection registry.
//!
//! Single source of truth for which WebSocket connections exist right
//! now, indexed three ways (user, session, tenant) so fan-out never
//! scans the full connection table. One `RwLock` guards the table and
//! all indices together, so readers always observe a consistent view
//! and index entries can never outlive their connection.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use banter_core::{ConnectionId, OutboundFrame, SessionId, TenantId, UserId};
use metrics::{counter, gauge};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::metrics::{WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL};
use crate::websocket::connection::ClientConnection;
use crate::websocket::stats::RegistryStats;

#[derive(Debug, Default)]
struct RegistryInner {
    connections: HashMap<ConnectionId, Arc<ClientConnection>>,
    by_user: HashMap<UserId, HashSet<ConnectionId>>,
    by_session: HashMap<SessionId, HashSet<ConnectionId>>,
    by_tenant: HashMap<TenantId, HashSet<ConnectionId>>,
}

impl RegistryInner {
    fn insert(&mut self, connection: Arc<ClientConnection>) {
        let id = connection.id.clone();
        let _ = self
            .by_user
            .entry(connection.user_id.clone())
            .or_default()
            .insert(id.clone());
        let _ = self
            .by_session
            .entry(connection.session_id.clone())
            .or_default()
            .insert(id.clone());
        let _ = self
            .by_tenant
            .entry(connection.tenant_id.clone())
            .or_default()
            .insert(id.clone());
        let _ = self.connections.insert(id, connection);
    }

    fn remove(&mut self, id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        let connection = self.connections.remove(id)?;
        prune(&mut self.by_user, &connection.user_id, id);
        prune(&mut self.by_session, &connection.session_id, id);
        prune(&mut self.by_tenant, &connection.tenant_id, id);
        Some(connection)
    }
}

/// Drop `id` from the index set under `key`, removing the key entirely
/// once its set is empty so indices never accumulate dead keys.
fn prune<K>(index: &mut HashMap<K, HashSet<ConnectionId>>, key: &K, id: &ConnectionId)
where
    K: std::hash::Hash + Eq,
{
    if let Some(set) = index.get_mut(key) {
        let _ = set.remove(id);
        if set.is_empty() {
            let _ = index.remove(key);
        }
    }
}

/// Registry of live connections with user / session / tenant indices.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    inner: RwLock<RegistryInner>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection for the given identity, backed by `tx`
    /// (the sending half of its writer task's buffer).
    ///
    /// Assigns a fresh connection id, updates all three indices, and
    /// immediately queues the `connection` greeting frame. Never fails:
    /// a registered connection is whatever the indices say it is.
    pub fn connect(
        &self,
        user_id: UserId,
        tenant_id: TenantId,
        session_id: SessionId,
        tx: mpsc::Sender<Arc<String>>,
    ) -> Arc<ClientConnection> {
        let id = ConnectionId::new();
        let connection = Arc::new(ClientConnection::new(
            id.clone(),
            user_id,
            tenant_id,
            session_id,
            tx,
        ));

        {
            let mut inner = self.inner.write();
            inner.insert(Arc::clone(&connection));
        }

        counter!(WS_CONNECTIONS_TOTAL).increment(1);
        gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
        info!(
            connection_id = %connection.id,
            user_id = %connection.user_id,
            tenant_id = %connection.tenant_id,
            session_id = %connection.session_id,
            "connection registered"
        );

        if !connection.send_frame(&OutboundFrame::connected(id)) {
            warn!(connection_id = %connection.id, "failed to queue connection greeting");
        }

        connection
    }

    /// Remove a connection and all its index entries. Idempotent:
    /// returns `false` when the id is not (or no longer) registered.
    pub fn disconnect(&self, id: &ConnectionId) -> bool {
        let removed = {
            let mut inner = self.inner.write();
            inner.remove(id)
        };

        match removed {
            Some(connection) => {
                // Wake the connection task so the socket closes instead
                // of lingering unregistered.
                connection.cancel();
                counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
                gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
                info!(
                    connection_id = %connection.id,
                    user_id = %connection.user_id,
                    session_id = %connection.session_id,
                    age_secs = connection.age().as_secs(),
                    dropped_frames = connection.drop_count(),
                    "connection removed"
                );
                true
            }
            None => {
                debug!(connection_id = %id, "disconnect of unknown connection ignored");
                false
            }
        }
    }

    /// The connection registered under `id`, if any.
    pub fn lookup(&self, id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        self.inner.read().connections.get(id).cloned()
    }

    /// Snapshot of every connection a user currently has, across all
    /// sessions and devices.
    pub fn user_connections(&self, user_id: &UserId) -> Vec<Arc<ClientConnection>> {
        let inner = self.inner.read();
        collect(&inner, inner.by_user.get(user_id))
    }

    /// Snapshot of every connection currently in a session.
    pub fn session_connections(&self, session_id: &SessionId) -> Vec<Arc<ClientConnection>> {
        let inner = self.inner.read();
        collect(&inner, inner.by_session.get(session_id))
    }

    /// Snapshot of every connection currently under a tenant.
    pub fn tenant_connections(&self, tenant_id: &TenantId) -> Vec<Arc<ClientConnection>> {
        let inner = self.inner.read();
        collect(&inner, inner.by_tenant.get(tenant_id))
    }

    /// Whether a user has at least one live connection.
    pub fn is_user_online(&self, user_id: &UserId) -> bool {
        self.inner.read().by_user.contains_key(user_id)
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.inner.read().connections.len()
    }

    /// Number of sessions with at least one live connection.
    pub fn session_count(&self) -> usize {
        self.inner.read().by_session.len()
    }

    /// Aggregate counts over one consistent view of the registry.
    pub fn stats(&self) -> RegistryStats {
        let inner = self.inner.read();
        let connections_by_tenant: BTreeMap<String, usize> = inner
            .by_tenant
            .iter()
            .map(|(tenant, set)| (tenant.to_string(), set.len()))
            .collect();
        RegistryStats {
            total_connections: inner.connections.len(),
            active_users: inner.by_user.len(),
            active_sessions: inner.by_session.len(),
            active_tenants: inner.by_tenant.len(),
            connections_by_tenant,
        }
    }
}

fn collect(
    inner: &RegistryInner,
    ids: Option<&HashSet<ConnectionId>>,
) -> Vec<Arc<ClientConnection>> {
    ids.map(|set| {
        set.iter()
            .filter_map(|id| inner.connections.get(id).cloned())
            .collect()
    })
    .unwrap_or_default()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
