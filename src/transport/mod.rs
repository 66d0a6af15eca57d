//! Message transport: MQTT broker addressing and TLS, plus the channel
//! abstraction the publisher and logger talk through.

mod broker;
mod channel;

pub use broker::{ClientIdentity, MqttEndpoint, TlsMaterials};
pub use channel::{
    topic_matches, ChannelState, InboundMessage, LoopbackChannel, MessageChannel, MqttChannel,
};
