//! Frame sources.
//!
//! This module provides the sources a capture cycle can read from:
//! - USB/V4L2 devices (feature: ingest-v4l2)
//! - Still image files (.jpg, .jpeg, .png)
//! - Synthetic `stub://` cameras (testing)
//!
//! A source never fails a capture with an error. A read that produces no
//! frame is logged and reported as `None`; the caller decides whether to
//! skip the cycle.

#[cfg(any(feature = "ingest-v4l2", test))]
mod normalize;
pub mod still;
pub mod v4l2;

pub use still::StillImageSource;
pub use v4l2::{V4l2Config, V4l2Source, V4l2Stats, DEFAULT_DEVICE};

use crate::error::PipelineError;
use crate::frame::Frame;

/// A source of single still frames.
pub trait FrameSource: Send {
    /// Source identifier.
    fn name(&self) -> &'static str;

    /// Read exactly one frame, or `None` when the read failed.
    fn capture_frame(&mut self) -> Option<Frame>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn capture_frame(&mut self) -> Option<Frame> {
        (**self).capture_frame()
    }
}

/// Open the source named by a device string.
///
/// Image file paths select `StillImageSource`; everything else, including
/// `stub://` cameras, goes to `V4l2Source`.
pub fn open_source(config: V4l2Config) -> Result<Box<dyn FrameSource>, PipelineError> {
    if still::is_image_path(&config.device) {
        return Ok(Box::new(StillImageSource::new(&config.device)?));
    }
    Ok(Box::new(V4l2Source::new(config)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_devices_open_synthetic_camera() {
        let source = open_source(V4l2Config {
            device: "stub://bench".to_string(),
            width: 8,
            height: 8,
        })
        .unwrap();
        assert_eq!(source.name(), "v4l2");
    }

    #[test]
    fn image_paths_open_still_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("still.png");
        image::RgbImage::new(2, 2).save(&path).unwrap();

        let mut source = open_source(V4l2Config {
            device: path.display().to_string(),
            ..V4l2Config::default()
        })
        .unwrap();
        assert_eq!(source.name(), "still");
        assert!(source.capture_frame().is_some());
    }
}
