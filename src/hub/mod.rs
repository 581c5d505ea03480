//! Connection hubs
//!
//! One hub per channel class (public, tenant, regulator). A hub owns its
//! registration set exclusively; the visibility rules deciding *what* reaches
//! a hub live in the ingest point, not here.
//!
//! Broadcast takes a snapshot of its targets, delivers to each independently,
//! and only after the pass disconnects every target whose delivery failed. A
//! disconnect racing with a broadcast is safe: targets removed mid-pass are
//! skipped and removal is idempotent.

mod connection;
mod dispatcher;
pub mod message;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::ScopeError;
use crate::observability::TelemetryMetrics;
use crate::types::{Channel, TenantId};

pub use connection::{ChannelConnection, Connection, ConnectionId};
pub use dispatcher::{BroadcastChannel, BroadcastJob, BroadcastQueue};
pub use message::{control_reply, Frame, PushMessage};

struct Registration {
    connection: Arc<dyn Connection>,
    tenant_id: Option<TenantId>,
}

#[derive(Default)]
struct Registry {
    connections: HashMap<ConnectionId, Registration>,
    by_tenant: HashMap<TenantId, HashSet<ConnectionId>>,
}

/// Outcome of one broadcast pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Targets in the snapshot
    pub targeted: usize,
    /// Successful deliveries
    pub delivered: usize,
    /// Targets dropped after a failed delivery
    pub failed: usize,
    /// Targets disconnected before their turn
    pub skipped: usize,
}

/// Registry of live connections for one channel
pub struct ConnectionHub {
    channel: Channel,
    registry: RwLock<Registry>,
    metrics: Arc<TelemetryMetrics>,
}

impl std::fmt::Debug for ConnectionHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHub")
            .field("channel", &self.channel)
            .field("connections", &self.len())
            .finish()
    }
}

impl ConnectionHub {
    pub fn new(channel: Channel, metrics: Arc<TelemetryMetrics>) -> Self {
        Self {
            channel,
            registry: RwLock::new(Registry::default()),
            metrics,
        }
    }

    /// Channel served by this hub
    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Register a live connection.
    ///
    /// Tenant-scoped hubs require a tenant id and index the connection under it.
    pub fn connect(
        &self,
        connection: Arc<dyn Connection>,
        tenant_id: Option<TenantId>,
    ) -> Result<ConnectionId, ScopeError> {
        if self.channel.is_tenant_scoped() && tenant_id.is_none() {
            return Err(ScopeError::MissingTenant(self.channel.as_str()));
        }

        let id = connection.id();
        let count = {
            let mut registry = self.registry.write();
            if self.channel.is_tenant_scoped() {
                if let Some(tenant) = &tenant_id {
                    registry
                        .by_tenant
                        .entry(tenant.clone())
                        .or_default()
                        .insert(id);
                }
            }
            registry.connections.insert(
                id,
                Registration {
                    connection,
                    tenant_id: tenant_id.clone(),
                },
            );
            registry.connections.len()
        };

        self.update_gauge(count);
        tracing::debug!(
            channel = %self.channel,
            connection = %id,
            tenant_id = tenant_id.as_deref().unwrap_or("-"),
            "Connection registered"
        );
        Ok(id)
    }

    /// Remove a connection from every index. Safe to call repeatedly.
    ///
    /// Returns `true` if the connection was registered.
    pub fn disconnect(&self, id: ConnectionId) -> bool {
        let (removed, count) = {
            let mut registry = self.registry.write();
            let removed = registry.connections.remove(&id);
            if let Some(tenant) = removed.as_ref().and_then(|r| r.tenant_id.as_ref()) {
                if let Some(ids) = registry.by_tenant.get_mut(tenant) {
                    ids.remove(&id);
                    if ids.is_empty() {
                        registry.by_tenant.remove(tenant);
                    }
                }
            }
            (removed.is_some(), registry.connections.len())
        };

        if removed {
            self.update_gauge(count);
            tracing::debug!(channel = %self.channel, connection = %id, "Connection removed");
        }
        removed
    }

    /// Whether a connection is currently registered
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.registry.read().connections.contains_key(&id)
    }

    /// Registered connections
    pub fn len(&self) -> usize {
        self.registry.read().connections.len()
    }

    /// Whether no connection is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered connections for one tenant
    pub fn tenant_len(&self, tenant_id: &str) -> usize {
        self.registry
            .read()
            .by_tenant
            .get(tenant_id)
            .map(HashSet::len)
            .unwrap_or(0)
    }

    /// Deliver a frame to the channel, or to one tenant's connections.
    ///
    /// Never fails: a scope error is a programming mistake, asserted in debug
    /// builds and turned into a logged no-op otherwise so nothing leaks across
    /// tenants.
    pub async fn broadcast(&self, frame: Frame, tenant_id: Option<&str>) -> BroadcastReport {
        match self.broadcast_checked(frame, tenant_id).await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(channel = %self.channel, error = %e, "Broadcast dropped");
                if cfg!(debug_assertions) {
                    panic!("invalid broadcast scope: {e}");
                }
                BroadcastReport::default()
            }
        }
    }

    /// Like [`broadcast`](Self::broadcast) but reports scope errors
    pub async fn broadcast_checked(
        &self,
        frame: Frame,
        tenant_id: Option<&str>,
    ) -> Result<BroadcastReport, ScopeError> {
        let targets = self.snapshot_targets(tenant_id)?;
        let mut report = BroadcastReport {
            targeted: targets.len(),
            ..Default::default()
        };
        let mut failed = Vec::new();

        for (id, connection) in targets {
            if !self.contains(id) {
                report.skipped += 1;
                continue;
            }
            match connection.send(frame.clone()).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    tracing::debug!(
                        channel = %self.channel,
                        connection = %id,
                        error = %e,
                        "Delivery failed, dropping connection"
                    );
                    failed.push(id);
                }
            }
        }

        report.failed = failed.len();
        for id in failed {
            self.disconnect(id);
        }

        let label = [self.channel.as_str()];
        self.metrics
            .deliveries
            .with_label_values(&label)
            .inc_by(report.delivered as u64);
        self.metrics
            .delivery_failures
            .with_label_values(&label)
            .inc_by(report.failed as u64);

        Ok(report)
    }

    /// Copy the target set so delivery runs without holding the lock
    fn snapshot_targets(
        &self,
        tenant_id: Option<&str>,
    ) -> Result<Vec<(ConnectionId, Arc<dyn Connection>)>, ScopeError> {
        let registry = self.registry.read();
        let targets = match (self.channel.is_tenant_scoped(), tenant_id) {
            (true, Some(tenant)) => registry
                .by_tenant
                .get(tenant)
                .into_iter()
                .flatten()
                .filter_map(|id| {
                    registry
                        .connections
                        .get(id)
                        .map(|r| (*id, r.connection.clone()))
                })
                .collect(),
            (true, None) => return Err(ScopeError::MissingTenant(self.channel.as_str())),
            (false, Some(_)) => return Err(ScopeError::NotTenantScoped(self.channel.as_str())),
            (false, None) => registry
                .connections
                .iter()
                .map(|(id, r)| (*id, r.connection.clone()))
                .collect(),
        };
        Ok(targets)
    }

    fn update_gauge(&self, count: usize) {
        self.metrics
            .connections
            .with_label_values(&[self.channel.as_str()])
            .set(count as i64);
    }
}
