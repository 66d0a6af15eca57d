//! Frame -> model input tensor.

use image::imageops::{self, FilterType};
use image::RgbImage;
use serde::Deserialize;

use crate::error::PipelineError;
use crate::frame::{ChannelOrder, Frame};

/// Fixed spatial input size of the loaded model.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModelInput {
    pub width: u32,
    pub height: u32,
}

impl Default for ModelInput {
    fn default() -> Self {
        Self {
            width: 640,
            height: 640,
        }
    }
}

impl ModelInput {
    /// NHWC shape of a prepared tensor: `[1, height, width, 3]`.
    pub fn nhwc_shape(&self) -> [usize; 4] {
        [1, self.height as usize, self.width as usize, 3]
    }
}

/// Memory layout the model graph expects for its input.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    #[default]
    Nhwc,
    Nchw,
}

/// Normalized f32 tensor in NHWC order with a leading batch dimension.
#[derive(Clone, Debug, PartialEq)]
pub struct InputTensor {
    pub shape: [usize; 4],
    pub data: Vec<f32>,
}

impl InputTensor {
    pub fn height(&self) -> usize {
        self.shape[1]
    }

    pub fn width(&self) -> usize {
        self.shape[2]
    }

    /// Copy the data into NCHW order.
    pub fn to_nchw(&self) -> Vec<f32> {
        let (h, w) = (self.height(), self.width());
        let mut out = vec![0.0f32; self.data.len()];
        for y in 0..h {
            for x in 0..w {
                for c in 0..3 {
                    out[c * h * w + y * w + x] = self.data[(y * w + x) * 3 + c];
                }
            }
        }
        out
    }
}

/// Convert a captured frame into the model's input tensor.
///
/// Reorders channels to RGB, resizes to the model input, scales pixel
/// values to `[0, 1]` and adds a batch dimension of 1. Deterministic: the
/// same frame always yields a bit-identical tensor.
pub fn prepare_tensor(frame: &Frame, input: ModelInput) -> Result<InputTensor, PipelineError> {
    if frame.is_empty() {
        return Err(PipelineError::Preprocess(format!(
            "frame is empty ({}x{}, {} bytes)",
            frame.width,
            frame.height,
            frame.pixels().len()
        )));
    }
    if input.width == 0 || input.height == 0 {
        return Err(PipelineError::Preprocess(
            "model input size must be non-zero".into(),
        ));
    }

    let expected = frame
        .expected_len()
        .ok_or_else(|| PipelineError::Preprocess("frame dimensions overflow".into()))?;
    if frame.pixels().len() != expected {
        return Err(PipelineError::Preprocess(format!(
            "expected {} bytes for {}x{} frame, received {}",
            expected,
            frame.width,
            frame.height,
            frame.pixels().len()
        )));
    }

    let mut pixels = frame.pixels().to_vec();
    if frame.order == ChannelOrder::Bgr {
        for px in pixels.chunks_exact_mut(3) {
            px.swap(0, 2);
        }
    }

    let rgb = RgbImage::from_raw(frame.width, frame.height, pixels)
        .ok_or_else(|| PipelineError::Preprocess("pixel buffer does not fit frame".into()))?;
    let rgb = if rgb.dimensions() == (input.width, input.height) {
        rgb
    } else {
        imageops::resize(&rgb, input.width, input.height, FilterType::Triangle)
    };

    let data = rgb.as_raw().iter().map(|&p| p as f32 / 255.0).collect();

    Ok(InputTensor {
        shape: input.nhwc_shape(),
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_input() -> ModelInput {
        ModelInput {
            width: 4,
            height: 4,
        }
    }

    #[test]
    fn output_shape_is_batched_nhwc() {
        let frame = Frame::new(10, 6, ChannelOrder::Rgb, vec![128; 10 * 6 * 3]);
        let tensor = prepare_tensor(&frame, small_input()).unwrap();
        assert_eq!(tensor.shape, [1, 4, 4, 3]);
        assert_eq!(tensor.data.len(), 4 * 4 * 3);
    }

    #[test]
    fn bgr_frames_are_reordered_and_scaled() {
        let frame = Frame::new(1, 1, ChannelOrder::Bgr, vec![0, 51, 255]);
        let tensor = prepare_tensor(
            &frame,
            ModelInput {
                width: 1,
                height: 1,
            },
        )
        .unwrap();
        assert_eq!(tensor.data, vec![1.0, 0.2, 0.0]);
    }

    #[test]
    fn preparation_is_deterministic() {
        let pixels: Vec<u8> = (0..(7 * 5 * 3)).map(|i| (i * 13 % 256) as u8).collect();
        let frame = Frame::new(7, 5, ChannelOrder::Bgr, pixels);
        let a = prepare_tensor(&frame, small_input()).unwrap();
        let b = prepare_tensor(&frame, small_input()).unwrap();
        let bits = |t: &InputTensor| t.data.iter().map(|v| v.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&a), bits(&b));
    }

    #[test]
    fn values_stay_in_unit_range() {
        let frame = Frame::new(3, 3, ChannelOrder::Rgb, vec![255; 27]);
        let tensor = prepare_tensor(&frame, small_input()).unwrap();
        assert!(tensor.data.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn zero_dimension_frame_is_rejected() {
        let frame = Frame::new(0, 4, ChannelOrder::Rgb, Vec::new());
        let err = prepare_tensor(&frame, small_input()).unwrap_err();
        assert!(matches!(err, PipelineError::Preprocess(_)));
    }

    #[test]
    fn mismatched_buffer_is_rejected() {
        let frame = Frame::new(2, 2, ChannelOrder::Rgb, vec![0; 5]);
        let err = prepare_tensor(&frame, small_input()).unwrap_err();
        assert!(matches!(err, PipelineError::Preprocess(_)));
    }

    #[test]
    fn nchw_copy_moves_channels_to_planes() {
        let tensor = InputTensor {
            shape: [1, 1, 2, 3],
            data: vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
        };
        assert_eq!(tensor.to_nchw(), vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn layout_deserializes_from_lowercase_names() {
        let layout: TensorLayout = serde_json::from_str(r#""nchw""#).unwrap();
        assert_eq!(layout, TensorLayout::Nchw);
        assert!(serde_json::from_str::<TensorLayout>(r#""chw""#).is_err());
    }
}
