//! Catalog change events.
//!
//! Catalog mutations call `pg_notify('catalog_changed', <json>)` inside their
//! transaction, so a notification exists only for committed changes.
//! [`CatalogEventBridge`] LISTENs on that channel and republishes each event
//! on the in-process [`EventBus`]; any number of subscribers can react.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use sqlx::postgres::PgListener;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Postgres notification channel for catalog changes.
pub const CATALOG_CHANNEL: &str = "catalog_changed";

const BUS_CAPACITY: usize = 64;
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Which catalog table changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogEntity {
    Category,
    Goods,
    Sku,
    GoodsBanner,
    PromotionBanner,
    CategoryGoods,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    Upserted,
    Deleted,
}

/// A committed catalog change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CatalogEvent {
    Changed {
        entity: CatalogEntity,
        action: ChangeAction,
        id: i32,
    },
    /// Notifications may have been lost; treat everything as changed.
    Resync,
}

impl CatalogEvent {
    #[must_use]
    pub const fn upserted(entity: CatalogEntity, id: i32) -> Self {
        Self::Changed {
            entity,
            action: ChangeAction::Upserted,
            id,
        }
    }

    #[must_use]
    pub const fn deleted(entity: CatalogEntity, id: i32) -> Self {
        Self::Changed {
            entity,
            action: ChangeAction::Deleted,
            id,
        }
    }

    /// Notification payload.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_payload(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a notification payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not a catalog event.
    pub fn from_payload(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }
}

/// In-process fan-out of catalog events.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CatalogEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(BUS_CAPACITY)
    }
}

impl EventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event; returns how many subscribers received it.
    pub fn publish(&self, event: CatalogEvent) -> usize {
        self.tx.send(event).unwrap_or_else(|_| {
            tracing::debug!(?event, "No catalog event subscribers");
            0
        })
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CatalogEvent> {
        self.tx.subscribe()
    }
}

/// Forwards `catalog_changed` notifications onto the [`EventBus`].
pub struct CatalogEventBridge {
    pool: PgPool,
    bus: EventBus,
}

impl CatalogEventBridge {
    #[must_use]
    pub const fn new(pool: PgPool, bus: EventBus) -> Self {
        Self { pool, bus }
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// The listener reconnects by itself after a dropped connection. Anything
    /// sent while it was down is lost, so a `Resync` event is published.
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(channel = CATALOG_CHANNEL, "Catalog event bridge started");

        let mut listener = loop {
            match self.connect().await {
                Ok(listener) => break listener,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to LISTEN for catalog changes");
                    tokio::select! {
                        () = shutdown.cancelled() => return,
                        () = tokio::time::sleep(RECONNECT_DELAY) => {}
                    }
                }
            }
        };

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                notification = listener.try_recv() => match notification {
                    Ok(Some(notification)) => self.forward(notification.payload()),
                    Ok(None) => {
                        tracing::warn!("Catalog listener reconnected, resyncing");
                        self.bus.publish(CatalogEvent::Resync);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Catalog listener failed");
                        self.bus.publish(CatalogEvent::Resync);
                        tokio::select! {
                            () = shutdown.cancelled() => break,
                            () = tokio::time::sleep(RECONNECT_DELAY) => {}
                        }
                    }
                },
            }
        }

        tracing::info!("Catalog event bridge stopped");
    }

    async fn connect(&self) -> Result<PgListener, sqlx::Error> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(CATALOG_CHANNEL).await?;
        Ok(listener)
    }

    fn forward(&self, payload: &str) {
        match CatalogEvent::from_payload(payload) {
            Ok(event) => {
                tracing::debug!(?event, "Catalog changed");
                self.bus.publish(event);
            }
            Err(e) => tracing::warn!(error = %e, payload, "Ignoring malformed catalog event"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_shape() {
        let event = CatalogEvent::upserted(CatalogEntity::GoodsBanner, 4);
        assert_eq!(
            event.to_payload().unwrap(),
            r#"{"kind":"changed","entity":"goods_banner","action":"upserted","id":4}"#
        );
        assert_eq!(
            CatalogEvent::Resync.to_payload().unwrap(),
            r#"{"kind":"resync"}"#
        );
    }

    #[test]
    fn test_payload_parse() {
        let event = CatalogEvent::from_payload(
            r#"{"kind":"changed","entity":"category","action":"deleted","id":2}"#,
        )
        .unwrap();
        assert_eq!(event, CatalogEvent::deleted(CatalogEntity::Category, 2));
        assert!(CatalogEvent::from_payload("not json").is_err());
    }

    #[tokio::test]
    async fn test_bus_fans_out() {
        let bus = EventBus::default();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        let event = CatalogEvent::upserted(CatalogEntity::Sku, 9);
        assert_eq!(bus.publish(event), 2);
        assert_eq!(a.recv().await.unwrap(), event);
        assert_eq!(b.recv().await.unwrap(), event);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new(4);
        assert_eq!(bus.publish(CatalogEvent::Resync), 0);
    }
}
