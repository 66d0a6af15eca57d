//! Error taxonomy for the detection relay.
//!
//! Startup errors (`Resource`, `ModelLoad`, `Config`) abort the process.
//! Cycle errors (`Preprocess`, `Inference`, `LabelLookup`, `Channel`) skip one
//! publish cycle. Message errors (`Decode`, `Schema`, `Store`) drop one
//! inbound message. Nothing is retried automatically.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("resource {} unavailable: {source}", path.display())]
    Resource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("model load failed: {0}")]
    ModelLoad(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("preprocess failed: {0}")]
    Preprocess(String),

    #[error("class id {class_id} not in label table ({len} labels)")]
    LabelLookup { class_id: i64, len: usize },

    #[error("message decode failed: {0}")]
    Decode(String),

    #[error("message schema invalid: {0}")]
    Schema(String),

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("channel error: {0}")]
    Channel(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    pub(crate) fn resource(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Resource {
            path: path.into(),
            source,
        }
    }

    /// True when the failed operation could succeed if attempted again later.
    ///
    /// Only channel failures qualify: the message was not handed to the broker.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Channel(_))
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() {
            Self::Schema(err.to_string())
        } else {
            Self::Decode(err.to_string())
        }
    }
}
