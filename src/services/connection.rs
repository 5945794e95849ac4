use crate::error::{MoverError, Result};
use crate::services::metadata::OrganizationQueries;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// A pooled connection whose authorization expires.
#[async_trait]
pub trait ManagedConnection: Clone + Send + Sync + 'static {
    /// Liveness probe, one round trip.
    async fn probe(&self) -> Result<()>;
    async fn release(self) -> Result<()>;
    /// Query façade bound to this connection.
    fn queries(&self) -> Arc<dyn OrganizationQueries>;
}

/// Produces a fresh connection together with how long its authorization lasts.
#[async_trait]
pub trait ConnectionSupplier: Send + Sync + 'static {
    type Connection: ManagedConnection;

    async fn connect(&self) -> Result<(Self::Connection, Duration)>;
}

struct ActiveConnection<C> {
    connection: C,
    queries: Arc<dyn OrganizationQueries>,
    expires_at: Instant,
}

/// Owns the relational connection and replaces it when its authorization
/// runs out or it stops answering. Connection and façade are swapped together
/// under one lock, so callers never see a half-replaced pair.
pub struct ConnectionManager<S: ConnectionSupplier> {
    supplier: S,
    active: Mutex<Option<ActiveConnection<S::Connection>>>,
}

impl<S: ConnectionSupplier> ConnectionManager<S> {
    /// Creates the manager with an initial connection; failing to reach the
    /// database here is fatal for the caller.
    pub async fn connect(supplier: S) -> Result<Self> {
        let manager = Self::lazy(supplier);
        {
            let mut active = manager.active.lock().await;
            manager.check_connection(&mut active).await?;
        }
        Ok(manager)
    }

    /// Creates the manager without connecting; the first access connects.
    pub fn lazy(supplier: S) -> Self {
        Self {
            supplier,
            active: Mutex::new(None),
        }
    }

    pub async fn get_connection(&self) -> Result<S::Connection> {
        let mut active = self.active.lock().await;
        let current = self.check_connection(&mut active).await?;
        Ok(current.connection.clone())
    }

    pub async fn get_queries(&self) -> Result<Arc<dyn OrganizationQueries>> {
        let mut active = self.active.lock().await;
        let current = self.check_connection(&mut active).await?;
        Ok(current.queries.clone())
    }

    pub async fn close(&self) -> Result<()> {
        let mut active = self.active.lock().await;
        if let Some(current) = active.take() {
            current.connection.release().await?;
            tracing::info!("🔌 Database connection closed");
        }
        Ok(())
    }

    async fn check_connection<'a>(
        &self,
        active: &'a mut Option<ActiveConnection<S::Connection>>,
    ) -> Result<&'a ActiveConnection<S::Connection>> {
        let healthy = match active.as_ref() {
            Some(current) if Instant::now() < current.expires_at => {
                match current.connection.probe().await {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::warn!("Database connection failed liveness probe: {}", e);
                        false
                    }
                }
            }
            Some(_) => {
                tracing::info!("🔑 Database authorization expired, reconnecting");
                false
            }
            None => false,
        };

        if !healthy {
            if let Some(stale) = active.take()
                && let Err(e) = stale.connection.release().await
            {
                tracing::warn!("Failed to close stale database connection: {}", e);
            }

            let (connection, auth_duration) = self
                .supplier
                .connect()
                .await
                .map_err(|e| MoverError::ConnectionRefresh(e.to_string()))?;

            if let Err(e) = connection.probe().await {
                if let Err(close_err) = connection.release().await {
                    tracing::warn!("Failed to close unhealthy connection: {}", close_err);
                }
                return Err(MoverError::ConnectionRefresh(format!(
                    "new connection failed liveness probe: {}",
                    e
                )));
            }

            tracing::info!(
                "✅ Database connection refreshed (authorized for {:?})",
                auth_duration
            );
            *active = Some(ActiveConnection {
                queries: connection.queries(),
                connection,
                expires_at: Instant::now() + auth_duration,
            });
        }

        active
            .as_ref()
            .ok_or_else(|| MoverError::ConnectionRefresh("no active connection".to_string()))
    }
}
