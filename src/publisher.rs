use crate::detect::DetectionRecord;
use crate::error::PipelineError;
use crate::message::DetectionMessage;
use crate::transport::MessageChannel;

/// Publishes detection records on one topic of a borrowed channel.
pub struct Publisher<'a, C: MessageChannel + ?Sized> {
    channel: &'a C,
    topic: String,
}

impl<'a, C: MessageChannel + ?Sized> Publisher<'a, C> {
    pub fn new(channel: &'a C, topic: impl Into<String>) -> Self {
        Self {
            channel,
            topic: topic.into(),
        }
    }

    /// Stamp the record with the current time and publish it at QoS 1.
    ///
    /// Returns the message that was sent. A channel failure is returned as
    /// `PipelineError::Channel`; nothing is retried here.
    pub fn publish(&self, record: &DetectionRecord) -> Result<DetectionMessage, PipelineError> {
        let message = DetectionMessage::now(record.clone())?;
        let payload = message.encode()?;
        self.channel.publish(&self.topic, &payload)?;
        log::info!(
            "Published to {}: {}",
            self.topic,
            String::from_utf8_lossy(&payload)
        );
        Ok(message)
    }
}
