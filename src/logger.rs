//! Subscriber side: decode inbound detection messages and append them to the
//! detection log.

use std::sync::mpsc::Receiver;
use std::thread::JoinHandle;

use crate::detect::BoxConvention;
use crate::error::PipelineError;
use crate::message::{decode_inbound, format_timestamp, Inbound};
use crate::storage::{DetectionLog, NewLogEntry};
use crate::transport::InboundMessage;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogOutcome {
    /// Row appended with this id.
    Logged(i64),
    /// Payload carried no detection.
    Skipped,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoggerStats {
    pub logged: u64,
    pub skipped: u64,
    pub failed: u64,
}

pub struct DetectionLogger<L: DetectionLog> {
    store: L,
    convention: BoxConvention,
    stats: LoggerStats,
}

impl<L: DetectionLog> DetectionLogger<L> {
    pub fn new(store: L, convention: BoxConvention) -> Self {
        Self {
            store,
            convention,
            stats: LoggerStats::default(),
        }
    }

    /// Decode one payload and append it as one row.
    pub fn handle_payload(&mut self, payload: &[u8]) -> Result<LogOutcome, PipelineError> {
        let message = match decode_inbound(payload)? {
            Inbound::Empty => return Ok(LogOutcome::Skipped),
            Inbound::Detection(message) => message,
        };
        let entry = NewLogEntry {
            timestamp: format_timestamp(message.timestamp)?,
            label: message.objects.label,
            confidence: message.objects.confidence,
            corners: self.convention.to_corners(message.objects.bbox),
        };
        let id = self.store.append(&entry)?;
        log::info!(
            "Logged detection #{}: {} ({:.3}) at {}",
            id,
            entry.label,
            entry.confidence,
            entry.timestamp
        );
        Ok(LogOutcome::Logged(id))
    }

    /// `handle_payload` with failures logged and counted instead of returned.
    pub fn process(&mut self, message: &InboundMessage) -> Option<LogOutcome> {
        match self.handle_payload(&message.payload) {
            Ok(outcome) => {
                match outcome {
                    LogOutcome::Logged(_) => self.stats.logged += 1,
                    LogOutcome::Skipped => {
                        self.stats.skipped += 1;
                        log::debug!("No detection in message on {}", message.topic);
                    }
                }
                Some(outcome)
            }
            Err(e) => {
                self.stats.failed += 1;
                log::warn!("Failed to log message on {}: {}", message.topic, e);
                None
            }
        }
    }

    pub fn stats(&self) -> LoggerStats {
        self.stats
    }

    pub fn store(&self) -> &L {
        &self.store
    }

    pub fn into_store(self) -> L {
        self.store
    }
}

impl<L: DetectionLog + 'static> DetectionLogger<L> {
    /// Run on a dedicated thread until every sender for `rx` is dropped.
    pub fn spawn(mut self, rx: Receiver<InboundMessage>) -> Result<LoggerHandle<L>, PipelineError> {
        let handle = std::thread::Builder::new()
            .name("detection-logger".into())
            .spawn(move || {
                for message in rx {
                    self.process(&message);
                }
                log::info!("Detection logger stopped: {:?}", self.stats);
                self
            })
            .map_err(|e| PipelineError::Channel(format!("failed to spawn logger thread: {}", e)))?;
        Ok(LoggerHandle { handle })
    }
}

pub struct LoggerHandle<L: DetectionLog> {
    handle: JoinHandle<DetectionLogger<L>>,
}

impl<L: DetectionLog> LoggerHandle<L> {
    /// Wait for the logger to drain and return its final stats and store.
    pub fn join(self) -> Result<(LoggerStats, L), PipelineError> {
        let logger = self
            .handle
            .join()
            .map_err(|_| PipelineError::Channel("logger thread panicked".into()))?;
        Ok((logger.stats(), logger.into_store()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryDetectionLog;
    use std::sync::mpsc;

    fn logger() -> DetectionLogger<InMemoryDetectionLog> {
        DetectionLogger::new(InMemoryDetectionLog::default(), BoxConvention::default())
    }

    const CAR: &[u8] = br#"{"timestamp": 1700000000.0, "objects": {"class_id": 1, "label": "car", "confidence": 0.91, "bbox": [0.5, 0.5, 0.25, 0.5]}}"#;

    #[test]
    fn logs_one_row_per_detection() {
        let mut logger = logger();
        assert_eq!(logger.handle_payload(CAR).unwrap(), LogOutcome::Logged(1));

        let entries = logger.store().entries().unwrap();
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.label, "car");
        assert_eq!(entry.confidence, 0.91);
        assert_eq!((entry.x1, entry.y1, entry.x2, entry.y2), (240, 160, 400, 480));
        assert_eq!(entry.timestamp.len(), 19);
    }

    #[test]
    fn message_without_objects_is_skipped() {
        let mut logger = logger();
        assert_eq!(
            logger.handle_payload(br#"{"foo": 1}"#).unwrap(),
            LogOutcome::Skipped
        );
        assert_eq!(logger.store().count().unwrap(), 0);
    }

    #[test]
    fn bad_payloads_are_typed_errors() {
        let mut logger = logger();
        assert!(matches!(
            logger.handle_payload(b"not json").unwrap_err(),
            PipelineError::Decode(_)
        ));
        assert!(matches!(
            logger
                .handle_payload(br#"{"timestamp": "now", "objects": {"label": "car"}}"#)
                .unwrap_err(),
            PipelineError::Schema(_)
        ));
        assert_eq!(logger.store().count().unwrap(), 0);
    }

    #[test]
    fn process_counts_outcomes() {
        let mut logger = logger();
        let msg = |payload: &[u8]| InboundMessage {
            topic: "t".to_string(),
            payload: payload.to_vec(),
        };
        logger.process(&msg(CAR));
        logger.process(&msg(br#"{}"#));
        logger.process(&msg(b"\xff"));
        assert_eq!(
            logger.stats(),
            LoggerStats {
                logged: 1,
                skipped: 1,
                failed: 1
            }
        );
    }

    #[test]
    fn spawned_logger_drains_until_senders_drop() {
        let (tx, rx) = mpsc::channel();
        let handle = logger().spawn(rx).unwrap();
        for _ in 0..3 {
            tx.send(InboundMessage {
                topic: "t".to_string(),
                payload: CAR.to_vec(),
            })
            .unwrap();
        }
        drop(tx);

        let (stats, store) = handle.join().unwrap();
        assert_eq!(stats.logged, 3);
        let ids: Vec<i64> = store.entries().unwrap().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
