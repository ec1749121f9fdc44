//! Registry statistics and session participant listings.

use std::collections::BTreeMap;
use std::sync::Arc;

use banter_core::{ConnectionId, SessionId, TenantId, UserId};
use serde::Serialize;

use crate::websocket::registry::ConnectionRegistry;

/// Aggregate connection counts, taken from one consistent registry
/// snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    /// Registered connections.
    pub total_connections: usize,
    /// Users with at least one connection.
    pub active_users: usize,
    /// Sessions with at least one connection.
    pub active_sessions: usize,
    /// Tenants with at least one connection.
    pub active_tenants: usize,
    /// Connection count per tenant, keyed by tenant id.
    pub connections_by_tenant: BTreeMap<String, usize>,
}

/// One connection currently participating in a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionParticipant {
    /// The user behind the connection.
    pub user_id: UserId,
    /// The connection itself.
    pub connection_id: ConnectionId,
    /// The tenant the user belongs to.
    pub tenant_id: TenantId,
}

/// Read-only reporting over the registry for the ops endpoints.
#[derive(Debug, Clone)]
pub struct StatsReporter {
    registry: Arc<ConnectionRegistry>,
}

impl StatsReporter {
    /// Create a reporter over `registry`.
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Current aggregate counts.
    pub fn stats(&self) -> RegistryStats {
        self.registry.stats()
    }

    /// Who is currently connected to `session_id`. A user with several
    /// tabs open appears once per connection.
    pub fn participants(&self, session_id: &SessionId) -> Vec<SessionParticipant> {
        self.registry
            .session_connections(session_id)
            .into_iter()
            .map(|connection| SessionParticipant {
                user_id: connection.user_id.clone(),
                connection_id: connection.id.clone(),
                tenant_id: connection.tenant_id.clone(),
            })
            .collect()
    }
}
