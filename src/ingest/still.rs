//! Still-image frame source.
//!
//! Decodes a local image file on every capture. Used on hosts without a
//! camera and for reproducible runs against a fixed scene.

use std::path::{Path, PathBuf};

use super::FrameSource;
use crate::error::PipelineError;
use crate::frame::{ChannelOrder, Frame};

pub struct StillImageSource {
    path: PathBuf,
}

impl StillImageSource {
    /// The file must exist when the source is created; decode failures on
    /// later captures are reported as a missing frame.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        std::fs::metadata(path).map_err(|e| PipelineError::resource(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FrameSource for StillImageSource {
    fn name(&self) -> &'static str {
        "still"
    }

    fn capture_frame(&mut self) -> Option<Frame> {
        match image::open(&self.path) {
            Ok(img) => {
                let rgb = img.into_rgb8();
                let (width, height) = rgb.dimensions();
                Some(Frame::new(
                    width,
                    height,
                    ChannelOrder::Rgb,
                    rgb.into_raw(),
                ))
            }
            Err(err) => {
                log::warn!(
                    "StillImageSource: failed to decode {}: {}",
                    self.path.display(),
                    err
                );
                None
            }
        }
    }
}

/// True when the device string names an image file rather than a camera.
pub(crate) fn is_image_path(device: &str) -> bool {
    let lower = device.to_ascii_lowercase();
    [".jpg", ".jpeg", ".png"]
        .iter()
        .any(|ext| lower.ends_with(ext))
}
