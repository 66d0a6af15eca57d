//! Publish/subscribe channels.
//!
//! A channel is an explicitly constructed connection object: the relay owns
//! it, lends it to the publisher, and shuts it down. Messages arriving on a
//! subscribed topic are forwarded to an `mpsc` receiver; dropping the sender
//! side on `disconnect` is what ends the subscriber's loop.

use rumqttc::v5::{mqttbytes::QoS, Client, Connection, Event, Incoming, MqttOptions};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use super::broker::{MqttEndpoint, TlsMaterials};
use crate::config::MqttSettings;
use crate::error::PipelineError;

/// Requests buffered between the client handle and the dispatch thread.
const REQUEST_CAPACITY: usize = 10;

/// A message delivered on a subscribed topic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Connection lifecycle. Transitions only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChannelState {
    Connected,
    Subscribed,
    Disconnected,
}

pub trait MessageChannel: Send + Sync {
    /// Short transport name for logs ("mqtt", "loopback").
    fn kind(&self) -> &'static str;

    /// Publish a payload with at-least-once delivery.
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), PipelineError>;

    /// Subscribe to a topic filter. Matching messages arrive on the returned
    /// receiver until the channel disconnects.
    fn subscribe(&self, topic: &str) -> Result<Receiver<InboundMessage>, PipelineError>;

    /// Stop delivery and close the connection. Idempotent.
    fn disconnect(&self) -> Result<(), PipelineError>;

    fn state(&self) -> ChannelState;
}

struct Subscription {
    filter: String,
    sender: Sender<InboundMessage>,
}

#[derive(Clone, Default)]
struct Subscriptions {
    inner: Arc<Mutex<Vec<Subscription>>>,
}

impl Subscriptions {
    fn lock(&self) -> Result<MutexGuard<'_, Vec<Subscription>>, PipelineError> {
        self.inner
            .lock()
            .map_err(|_| PipelineError::Channel("subscription table lock poisoned".into()))
    }

    fn add(&self, filter: &str) -> Result<Receiver<InboundMessage>, PipelineError> {
        let (tx, rx) = mpsc::channel();
        self.lock()?.push(Subscription {
            filter: filter.to_string(),
            sender: tx,
        });
        Ok(rx)
    }

    /// Deliver to every matching subscriber, pruning receivers that hung up.
    fn dispatch(&self, topic: &str, payload: &[u8]) -> Result<usize, PipelineError> {
        let mut subs = self.lock()?;
        let mut delivered = 0;
        subs.retain(|sub| {
            if !topic_matches(&sub.filter, topic) {
                return true;
            }
            let msg = InboundMessage {
                topic: topic.to_string(),
                payload: payload.to_vec(),
            };
            match sub.sender.send(msg) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => false,
            }
        });
        Ok(delivered)
    }

    fn clear(&self) -> Result<(), PipelineError> {
        self.lock()?.clear();
        Ok(())
    }
}

struct StateCell(Mutex<ChannelState>);

impl StateCell {
    fn new() -> Self {
        Self(Mutex::new(ChannelState::Connected))
    }

    fn get(&self) -> ChannelState {
        self.0
            .lock()
            .map(|state| *state)
            .unwrap_or(ChannelState::Disconnected)
    }

    /// Move forward to `next`; never moves backwards.
    fn advance(&self, next: ChannelState) -> Result<(), PipelineError> {
        let mut state = self
            .0
            .lock()
            .map_err(|_| PipelineError::Channel("channel state lock poisoned".into()))?;
        if next > *state {
            *state = next;
        }
        Ok(())
    }

    fn ensure_open(&self, action: &str) -> Result<(), PipelineError> {
        if self.get() == ChannelState::Disconnected {
            return Err(PipelineError::Channel(format!(
                "cannot {} on a disconnected channel",
                action
            )));
        }
        Ok(())
    }
}

/// MQTT v5 channel backed by rumqttc.
///
/// A dispatch thread drives the connection and forwards incoming PUBLISH
/// packets to subscribers.
pub struct MqttChannel {
    client: Client,
    subscriptions: Subscriptions,
    state: StateCell,
    dispatch_handle: Mutex<Option<JoinHandle<()>>>,
}

impl MqttChannel {
    pub fn connect(settings: &MqttSettings) -> anyhow::Result<Self> {
        let endpoint = MqttEndpoint::parse(&settings.broker, settings.use_tls)?;
        if !settings.allow_remote {
            endpoint.require_loopback()?;
        } else {
            log::warn!("Remote MQTT enabled - ensure broker is in a trusted network");
        }
        let tls = TlsMaterials::from_settings(settings)?;

        let client_id = unique_client_id(&settings.client_id);
        let mut options = MqttOptions::new(&client_id, &endpoint.host, endpoint.port);
        options.set_keep_alive(settings.keep_alive);
        options.set_clean_start(true);
        if let Some(user) = settings.username.as_deref() {
            options.set_credentials(user, settings.password.as_deref().unwrap_or_default());
        }
        options.set_transport(tls.transport_for(&endpoint)?);

        let (client, connection) = Client::new(options, REQUEST_CAPACITY);
        let subscriptions = Subscriptions::default();
        let handle = spawn_dispatch(connection, subscriptions.clone())?;

        log::info!(
            "MqttChannel: connecting to {} as {} (auth: {})",
            endpoint,
            client_id,
            settings.username.is_some()
        );
        Ok(Self {
            client,
            subscriptions,
            state: StateCell::new(),
            dispatch_handle: Mutex::new(Some(handle)),
        })
    }
}

fn spawn_dispatch(
    mut connection: Connection,
    subscriptions: Subscriptions,
) -> anyhow::Result<JoinHandle<()>> {
    let handle = std::thread::Builder::new()
        .name("mqtt-dispatch".into())
        .spawn(move || {
            for event in connection.iter() {
                match event {
                    Ok(Event::Incoming(Incoming::Publish(publish))) => {
                        let topic = match std::str::from_utf8(&publish.topic) {
                            Ok(topic) => topic,
                            Err(e) => {
                                log::warn!("Skipping publish with invalid topic: {}", e);
                                continue;
                            }
                        };
                        if let Err(e) = subscriptions.dispatch(topic, &publish.payload) {
                            log::warn!("MQTT dispatch stopped: {}", e);
                            break;
                        }
                    }
                    Ok(Event::Incoming(Incoming::Disconnect(_))) => {
                        log::info!("MQTT broker closed the session");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        log::warn!("MQTT connection error: {}", e);
                        break;
                    }
                }
            }
            // Dropping the senders ends every subscriber loop.
            if let Err(e) = subscriptions.clear() {
                log::warn!("MQTT dispatch cleanup failed: {}", e);
            }
        })?;
    Ok(handle)
}

impl MessageChannel for MqttChannel {
    fn kind(&self) -> &'static str {
        "mqtt"
    }

    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), PipelineError> {
        self.state.ensure_open("publish")?;
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload.to_vec())
            .map_err(|e| PipelineError::Channel(format!("publish to {} failed: {}", topic, e)))
    }

    fn subscribe(&self, topic: &str) -> Result<Receiver<InboundMessage>, PipelineError> {
        self.state.ensure_open("subscribe")?;
        let rx = self.subscriptions.add(topic)?;
        self.client
            .subscribe(topic, QoS::AtLeastOnce)
            .map_err(|e| PipelineError::Channel(format!("subscribe to {} failed: {}", topic, e)))?;
        self.state.advance(ChannelState::Subscribed)?;
        log::info!("MqttChannel: subscribed to {}", topic);
        Ok(rx)
    }

    fn disconnect(&self) -> Result<(), PipelineError> {
        if self.state.get() == ChannelState::Disconnected {
            return Ok(());
        }
        self.state.advance(ChannelState::Disconnected)?;
        if let Err(e) = self.client.disconnect() {
            // The dispatch thread already exited; nothing left to close.
            log::debug!("MQTT disconnect request not delivered: {}", e);
        }
        let handle = self
            .dispatch_handle
            .lock()
            .map_err(|_| PipelineError::Channel("dispatch handle lock poisoned".into()))?
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::warn!("MQTT dispatch thread panicked");
            }
        }
        self.subscriptions.clear()?;
        log::info!("MqttChannel: disconnected");
        Ok(())
    }

    fn state(&self) -> ChannelState {
        self.state.get()
    }
}

impl Drop for MqttChannel {
    fn drop(&mut self) {
        if let Err(e) = self.disconnect() {
            log::warn!("MQTT disconnect on drop failed: {}", e);
        }
    }
}

/// In-process channel: a publish is delivered synchronously to every
/// matching subscriber.
pub struct LoopbackChannel {
    subscriptions: Subscriptions,
    state: StateCell,
}

impl LoopbackChannel {
    pub fn new() -> Self {
        Self {
            subscriptions: Subscriptions::default(),
            state: StateCell::new(),
        }
    }
}

impl Default for LoopbackChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageChannel for LoopbackChannel {
    fn kind(&self) -> &'static str {
        "loopback"
    }

    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), PipelineError> {
        self.state.ensure_open("publish")?;
        let delivered = self.subscriptions.dispatch(topic, payload)?;
        log::debug!("LoopbackChannel: {} -> {} subscriber(s)", topic, delivered);
        Ok(())
    }

    fn subscribe(&self, topic: &str) -> Result<Receiver<InboundMessage>, PipelineError> {
        self.state.ensure_open("subscribe")?;
        let rx = self.subscriptions.add(topic)?;
        self.state.advance(ChannelState::Subscribed)?;
        Ok(rx)
    }

    fn disconnect(&self) -> Result<(), PipelineError> {
        self.state.advance(ChannelState::Disconnected)?;
        self.subscriptions.clear()
    }

    fn state(&self) -> ChannelState {
        self.state.get()
    }
}

/// MQTT topic filter matching with `+` (one level) and `#` (remaining levels).
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');
    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Suffix the configured id so concurrent relays do not evict each other.
fn unique_client_id(base: &str) -> String {
    format!("{}-{:04x}", base, rand::random::<u16>())
}
