//! V4L2 frame source.
//!
//! `V4l2Source` captures single frames from a local V4L2 device node
//! (e.g. /dev/video0). The device is opened on the first capture and kept
//! open for the lifetime of the source.
//!
//! `stub://` device paths select a synthetic camera for tests and demos.
//! `stub://offline` never delivers a frame.

use std::time::Instant;

use super::FrameSource;
use crate::error::PipelineError;
use crate::frame::{ChannelOrder, Frame};

#[cfg(feature = "ingest-v4l2")]
use super::normalize::{normalize_to_rgb, PixelFormat};
#[cfg(feature = "ingest-v4l2")]
use ouroboros::self_referencing;

const OFFLINE_STUB: &str = "stub://offline";

#[cfg(feature = "ingest-v4l2")]
pub const DEFAULT_DEVICE: &str = "/dev/video0";
#[cfg(not(feature = "ingest-v4l2"))]
pub const DEFAULT_DEVICE: &str = "stub://camera";

/// Configuration for a V4L2 source.
#[derive(Clone, Debug)]
pub struct V4l2Config {
    /// Device path (e.g., "/dev/video0")
    pub device: String,
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
}

impl Default for V4l2Config {
    fn default() -> Self {
        Self {
            device: DEFAULT_DEVICE.to_string(),
            width: 640,
            height: 480,
        }
    }
}

pub struct V4l2Source {
    backend: V4l2Backend,
}

enum V4l2Backend {
    Synthetic(SyntheticV4l2Source),
    #[cfg(feature = "ingest-v4l2")]
    Device(DeviceV4l2Source),
}

impl V4l2Source {
    pub fn new(config: V4l2Config) -> Result<Self, PipelineError> {
        if config.device.starts_with("stub://") {
            return Ok(Self {
                backend: V4l2Backend::Synthetic(SyntheticV4l2Source::new(config)),
            });
        }

        #[cfg(feature = "ingest-v4l2")]
        {
            Ok(Self {
                backend: V4l2Backend::Device(DeviceV4l2Source::new(config)),
            })
        }
        #[cfg(not(feature = "ingest-v4l2"))]
        {
            Err(PipelineError::Config(format!(
                "capture from {} requires the ingest-v4l2 feature",
                config.device
            )))
        }
    }

    pub fn stats(&self) -> V4l2Stats {
        match &self.backend {
            V4l2Backend::Synthetic(source) => source.stats(),
            #[cfg(feature = "ingest-v4l2")]
            V4l2Backend::Device(source) => source.stats(),
        }
    }
}

impl FrameSource for V4l2Source {
    fn name(&self) -> &'static str {
        "v4l2"
    }

    fn capture_frame(&mut self) -> Option<Frame> {
        match &mut self.backend {
            V4l2Backend::Synthetic(source) => source.capture_frame(),
            #[cfg(feature = "ingest-v4l2")]
            V4l2Backend::Device(source) => source.capture_frame(),
        }
    }
}

/// Statistics for a V4L2 source.
#[derive(Clone, Debug)]
pub struct V4l2Stats {
    pub frames_captured: u64,
    pub failed_reads: u64,
    pub last_frame_at: Option<Instant>,
    pub device: String,
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests
// ----------------------------------------------------------------------------

struct SyntheticV4l2Source {
    config: V4l2Config,
    frame_count: u64,
    failed_reads: u64,
    last_frame_at: Option<Instant>,
}

impl SyntheticV4l2Source {
    fn new(config: V4l2Config) -> Self {
        log::info!("V4l2Source: using synthetic camera {}", config.device);
        Self {
            config,
            frame_count: 0,
            failed_reads: 0,
            last_frame_at: None,
        }
    }

    fn capture_frame(&mut self) -> Option<Frame> {
        if self.config.device == OFFLINE_STUB || self.config.width == 0 || self.config.height == 0
        {
            self.failed_reads += 1;
            log::warn!("V4l2Source: no frame ready on {}", self.config.device);
            return None;
        }

        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        Some(Frame::new(
            self.config.width,
            self.config.height,
            ChannelOrder::Bgr,
            self.generate_synthetic_pixels(),
        ))
    }

    /// Horizontal gradient shifted by the frame counter, packed BGR.
    fn generate_synthetic_pixels(&self) -> Vec<u8> {
        let width = self.config.width as usize;
        let pixel_count = width * self.config.height as usize * 3;
        let mut pixels = vec![0u8; pixel_count];
        for (i, px) in pixels.chunks_exact_mut(3).enumerate() {
            let x = (i % width) as u64;
            let shade = ((x * 255 / width.max(1) as u64 + self.frame_count) % 256) as u8;
            px.copy_from_slice(&[shade, shade / 2, 255 - shade]);
        }
        pixels
    }

    fn stats(&self) -> V4l2Stats {
        V4l2Stats {
            frames_captured: self.frame_count,
            failed_reads: self.failed_reads,
            last_frame_at: self.last_frame_at,
            device: self.config.device.clone(),
        }
    }
}

// ----------------------------------------------------------------------------
// Production V4L2 source using libv4l
// ----------------------------------------------------------------------------

#[cfg(feature = "ingest-v4l2")]
struct DeviceV4l2Source {
    config: V4l2Config,
    state: Option<DeviceV4l2State>,
    frame_count: u64,
    failed_reads: u64,
    last_frame_at: Option<Instant>,
    active_width: u32,
    active_height: u32,
    active_format: PixelFormat,
}

#[cfg(feature = "ingest-v4l2")]
#[self_referencing]
struct DeviceV4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

#[cfg(feature = "ingest-v4l2")]
impl DeviceV4l2Source {
    fn new(config: V4l2Config) -> Self {
        Self {
            active_width: config.width,
            active_height: config.height,
            active_format: PixelFormat::Rgb24,
            config,
            state: None,
            frame_count: 0,
            failed_reads: 0,
            last_frame_at: None,
        }
    }

    fn connect(&mut self) -> anyhow::Result<()> {
        use anyhow::{anyhow, Context};
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.config.device)
            .with_context(|| format!("open v4l2 device {}", self.config.device))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.config.width;
        format.height = self.config.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Source: failed to set format on {}: {}",
                    self.config.device,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };

        self.active_format = PixelFormat::from_fourcc(&format.fourcc.repr)
            .ok_or_else(|| anyhow!("unsupported v4l2 pixel format {}", format.fourcc))?;
        self.active_width = format.width;
        self.active_height = format.height;

        let state = DeviceV4l2StateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;
        self.state = Some(state);

        log::info!(
            "V4l2Source: connected to {} ({}x{} {:?})",
            self.config.device,
            self.active_width,
            self.active_height,
            self.active_format
        );
        Ok(())
    }

    fn capture_frame(&mut self) -> Option<Frame> {
        use v4l::io::traits::CaptureStream;

        if self.state.is_none() {
            if let Err(err) = self.connect() {
                self.failed_reads += 1;
                log::warn!("V4l2Source: {:#}", err);
                return None;
            }
        }

        let state = self.state.as_mut()?;
        let (width, height, format) = (self.active_width, self.active_height, self.active_format);
        let captured = state.with_mut(|fields| {
            fields
                .stream
                .next()
                .map_err(|err| PipelineError::Preprocess(format!("capture v4l2 frame: {}", err)))
                .and_then(|(buf, _meta)| normalize_to_rgb(buf, width, height, format))
        });

        match captured {
            Ok(rgb) => {
                self.frame_count += 1;
                self.last_frame_at = Some(Instant::now());
                Some(Frame::new(width, height, ChannelOrder::Rgb, rgb))
            }
            Err(err) => {
                self.failed_reads += 1;
                log::warn!("V4l2Source: {} on {}", err, self.config.device);
                None
            }
        }
    }

    fn stats(&self) -> V4l2Stats {
        V4l2Stats {
            frames_captured: self.frame_count,
            failed_reads: self.failed_reads,
            last_frame_at: self.last_frame_at,
            device: self.config.device.clone(),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
