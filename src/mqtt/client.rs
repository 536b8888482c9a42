//! MQTT broker connection management.

use crate::config::MqttConfig;
use crate::error::BrokerError;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

const RECONNECT_INTERVAL: Duration = Duration::from_secs(5);
const KEEP_ALIVE: Duration = Duration::from_secs(30);
const ACK_WAIT: Duration = Duration::from_secs(2);

/// Shared state the background event-loop pump updates and `Client::publish`
/// reads to learn whether its message has been acknowledged.
struct AckTracker {
    connected: AtomicBool,
    acked: AtomicU64,
    notify: Notify,
}

/// Broker connection (C6). Owns the `rumqttc` client handle and drives its
/// event loop on a background task so publish/ack correlation doesn't block
/// the poll cycle.
pub struct Client {
    inner: Option<AsyncClient>,
    tracker: Arc<AckTracker>,
}

impl Client {
    pub fn new() -> Self {
        Self {
            inner: None,
            tracker: Arc::new(AckTracker {
                connected: AtomicBool::new(false),
                acked: AtomicU64::new(0),
                notify: Notify::new(),
            }),
        }
    }

    pub async fn connect(&mut self, cfg: &MqttConfig) -> Result<(), BrokerError> {
        let mut options = MqttOptions::new(cfg.client_id.clone(), cfg.broker.clone(), cfg.port);
        options.set_keep_alive(KEEP_ALIVE);
        options.set_clean_session(true);

        if let (Some(user), Some(password)) = (&cfg.user, &cfg.password) {
            options.set_credentials(user.clone(), password.clone());
        }

        if cfg.scheme() == "ssl" {
            options.set_transport(rumqttc::Transport::tls_with_default_config());
        }

        let (client, eventloop) = AsyncClient::new(options, 64);
        self.tracker.connected.store(false, Ordering::SeqCst);
        spawn_event_pump(eventloop, Arc::clone(&self.tracker));

        // Wait briefly for the pump to observe the initial ConnAck.
        let deadline = tokio::time::Instant::now() + RECONNECT_INTERVAL;
        while !self.tracker.connected.load(Ordering::SeqCst) {
            if tokio::time::Instant::now() >= deadline {
                return Err(BrokerError::Connect("timed out waiting for CONNACK".into()));
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        self.inner = Some(client);
        Ok(())
    }

    pub fn disconnect(&mut self) {
        self.inner = None;
        self.tracker.connected.store(false, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.inner.is_some() && self.tracker.connected.load(Ordering::SeqCst)
    }

    /// Publish one message. QoS 0 is fire-and-forget; QoS >= 1 waits up to
    /// `ACK_WAIT` for an acknowledgement (spec §4.6).
    pub async fn publish(
        &self,
        topic: &str,
        qos: u8,
        payload: Vec<u8>,
    ) -> Result<(), BrokerError> {
        let client = self.inner.as_ref().ok_or(BrokerError::NotConnected)?;
        let qos = match qos {
            0 => QoS::AtMostOnce,
            2 => QoS::ExactlyOnce,
            _ => QoS::AtLeastOnce,
        };

        let acked_before = self.tracker.acked.load(Ordering::SeqCst);
        client
            .publish(topic, qos, false, payload)
            .await
            .map_err(|e| BrokerError::Connect(e.to_string()))?;

        if qos == QoS::AtMostOnce {
            return Ok(());
        }

        let wait = async {
            loop {
                if self.tracker.acked.load(Ordering::SeqCst) != acked_before {
                    return;
                }
                self.tracker.notify.notified().await;
            }
        };
        tokio::time::timeout(ACK_WAIT, wait)
            .await
            .map_err(|_| BrokerError::Connect("publish ack timed out".into()))
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

fn spawn_event_pump(mut eventloop: EventLoop, tracker: Arc<AckTracker>) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    tracker.connected.store(true, Ordering::SeqCst);
                }
                Ok(Event::Incoming(Packet::PubAck(_))) | Ok(Event::Incoming(Packet::PubComp(_))) => {
                    tracker.acked.fetch_add(1, Ordering::SeqCst);
                    tracker.notify.notify_waiters();
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    tracker.connected.store(false, Ordering::SeqCst);
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "MQTT event loop error, reconnecting");
                    tracker.connected.store(false, Ordering::SeqCst);
                    tokio::time::sleep(RECONNECT_INTERVAL).await;
                }
            }
        }
    });
}
