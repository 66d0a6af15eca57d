//! Detection relay
//!
//! Captures a still frame, runs an object detector over it, publishes the
//! top detection as JSON on a pub/sub topic, and logs every detection that
//! arrives on that topic into a local SQLite table.
//!
//! # Architecture
//!
//! Two activities share only the channel and the database file:
//!
//! 1. **Publish side** (`pipeline`): capture -> preprocess -> detect ->
//!    extract -> publish, on a fixed schedule.
//! 2. **Subscribe side** (`logger`): decode -> convert bbox -> append one
//!    row, on its own thread, until the channel disconnects.
//!
//! # Module Structure
//!
//! - `ingest`: Frame sources (V4L2 devices, still images, synthetic cameras)
//! - `preprocess`: Frame -> normalized model input tensor
//! - `detect`: Detector backends and result extraction
//! - `transport`: MQTT and in-process message channels
//! - `storage`: Append-only detection log
//! - `report`: Fixed-width rendering of the log
//!
//! # Features
//!
//! - `backend-tract`: ONNX inference through tract. Without it the default
//!   detector backend is `stub`.
//! - `ingest-v4l2`: capture from `/dev/video*` devices. Without it the
//!   default camera is the synthetic `stub://camera`.
//!
//! A build with neither feature runs end to end on synthetic frames and
//! detections; a deployment build enables both.

use rand::RngCore;

pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod labels;
pub mod logger;
pub mod message;
pub mod pipeline;
pub mod preprocess;
pub mod publisher;
pub mod report;
pub mod storage;
pub mod transport;

pub use config::{ModelSettings, MqttSettings, RelayConfig};
pub use detect::{load_backend, BoxConvention, BoxLayout, DetectionRecord, DetectorBackend};
pub use error::PipelineError;
pub use frame::{ChannelOrder, Frame};
pub use ingest::{open_source, FrameSource, V4l2Config};
pub use labels::LabelTable;
pub use logger::{DetectionLogger, LogOutcome, LoggerHandle, LoggerStats};
pub use message::DetectionMessage;
pub use pipeline::{CycleOutcome, DetectionPipeline, PublishSchedule, ScheduleReport};
pub use preprocess::{prepare_tensor, InputTensor, ModelInput, TensorLayout};
pub use publisher::Publisher;
pub use report::{render_entries, render_report};
pub use storage::{DetectionLog, InMemoryDetectionLog, LogEntry, NewLogEntry, SqliteDetectionLog};
pub use transport::{ChannelState, InboundMessage, LoopbackChannel, MessageChannel, MqttChannel};

/// A fresh shared-cache in-memory SQLite URI, usable by several connections.
pub fn shared_memory_uri() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!(
        "file:detection_relay_{:x}?mode=memory&cache=shared",
        u64::from_le_bytes(bytes)
    )
}
