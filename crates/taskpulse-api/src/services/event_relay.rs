//! Redis pub/sub relay between API processes.
//!
//! Envelopes published on this node's [`EventBus`] are forwarded to a shared
//! Redis channel. Envelopes arriving on that channel from other nodes are
//! handed to [`EventBus::deliver_remote`], which drops this node's own echoes.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use taskpulse_core::defaults::EVENT_RELAY_CHANNEL;
use taskpulse_core::{Error, EventBus, EventEnvelope, Result};

const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Decode an envelope received from the relay channel.
pub fn decode_envelope(payload: &str) -> Option<EventEnvelope> {
    match serde_json::from_str(payload) {
        Ok(envelope) => Some(envelope),
        Err(e) => {
            warn!(subsystem = "events", component = "relay", error = %e, "Dropping malformed relay message");
            None
        }
    }
}

/// Deliver a raw relay message to local subscribers.
///
/// Returns the number of local subscribers reached.
pub fn deliver_payload(events: &EventBus, payload: &str) -> usize {
    decode_envelope(payload)
        .map(|envelope| events.deliver_remote(envelope))
        .unwrap_or(0)
}

/// Bridges the local [`EventBus`] and a Redis channel.
pub struct RedisEventRelay {
    client: redis::Client,
    events: Arc<EventBus>,
    channel: String,
}

impl RedisEventRelay {
    pub fn new(redis_url: &str, events: Arc<EventBus>) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| Error::Config(format!("Invalid REDIS_URL for event relay: {}", e)))?;
        Ok(Self {
            client,
            events,
            channel: EVENT_RELAY_CHANNEL.to_string(),
        })
    }

    /// Run both directions until `shutdown` flips to `true`.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        info!(
            subsystem = "events",
            component = "relay",
            channel = %self.channel,
            node_id = %self.events.node_id(),
            "Event relay starting"
        );

        // Subscribe to the local feed before spawning so nothing published
        // during startup is missed.
        let feed = self.events.local_feed();
        let outbound = tokio::spawn(publish_loop(
            self.client.clone(),
            self.channel.clone(),
            feed,
            shutdown.clone(),
        ));
        let inbound = tokio::spawn(subscribe_loop(
            self.client,
            self.channel,
            self.events,
            shutdown,
        ));

        tokio::spawn(async move {
            let _ = tokio::join!(outbound, inbound);
            info!(subsystem = "events", component = "relay", "Event relay stopped");
        })
    }
}

async fn publish_loop(
    client: redis::Client,
    channel: String,
    mut feed: broadcast::Receiver<EventEnvelope>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut conn = loop {
        match ConnectionManager::new(client.clone()).await {
            Ok(conn) => break conn,
            Err(e) => {
                error!(subsystem = "events", component = "relay", error = %e, "Relay publisher cannot connect");
                tokio::select! {
                    _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                    _ = shutdown.changed() => return,
                }
            }
        }
    };

    loop {
        tokio::select! {
            received = feed.recv() => match received {
                Ok(envelope) => {
                    let payload = match serde_json::to_string(&envelope) {
                        Ok(payload) => payload,
                        Err(e) => {
                            error!(subsystem = "events", component = "relay", error = %e, "Failed to encode envelope");
                            continue;
                        }
                    };
                    match conn.publish::<_, _, ()>(&channel, payload).await {
                        Ok(()) => debug!(
                            subsystem = "events",
                            component = "relay",
                            event_id = %envelope.event_id,
                            "Envelope relayed"
                        ),
                        Err(e) => error!(
                            subsystem = "events",
                            component = "relay",
                            event_id = %envelope.event_id,
                            error = %e,
                            "Redis PUBLISH error"
                        ),
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(subsystem = "events", component = "relay", skipped, "Relay publisher lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

async fn subscribe_loop(
    client: redis::Client,
    channel: String,
    events: Arc<EventBus>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let mut pubsub = match client.get_async_pubsub().await {
            Ok(pubsub) => pubsub,
            Err(e) => {
                error!(subsystem = "events", component = "relay", error = %e, "Relay subscriber cannot connect");
                tokio::select! {
                    _ = tokio::time::sleep(RECONNECT_DELAY) => continue,
                    _ = shutdown.changed() => return,
                }
            }
        };
        if let Err(e) = pubsub.subscribe(&channel).await {
            error!(subsystem = "events", component = "relay", error = %e, "Redis SUBSCRIBE error");
            tokio::time::sleep(RECONNECT_DELAY).await;
            continue;
        }

        let mut messages = pubsub.on_message();
        loop {
            tokio::select! {
                message = messages.next() => match message {
                    Some(message) => match message.get_payload::<String>() {
                        Ok(payload) => {
                            deliver_payload(&events, &payload);
                        }
                        Err(e) => warn!(subsystem = "events", component = "relay", error = %e, "Unreadable relay payload"),
                    },
                    None => {
                        warn!(subsystem = "events", component = "relay", "Relay subscription closed, reconnecting");
                        break;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }
}
