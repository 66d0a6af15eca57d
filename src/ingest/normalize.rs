use crate::error::PipelineError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PixelFormat {
    Rgb24,
    Bgr24,
    Yuyv,
    Nv12,
}

impl PixelFormat {
    /// Map a V4L2 fourcc to a supported pixel format.
    pub(crate) fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"RGB3" => Some(Self::Rgb24),
            b"BGR3" => Some(Self::Bgr24),
            b"YUYV" => Some(Self::Yuyv),
            b"NV12" => Some(Self::Nv12),
            _ => None,
        }
    }
}

/// Convert a raw device buffer to packed RGB24.
///
/// Device buffers may be padded past the image payload; only the leading
/// bytes the format needs are read.
pub(crate) fn normalize_to_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<Vec<u8>, PipelineError> {
    let w = width as usize;
    let h = height as usize;
    let plane = w
        .checked_mul(h)
        .ok_or_else(|| PipelineError::Preprocess("frame dimensions overflow".into()))?;

    match format {
        PixelFormat::Rgb24 => Ok(take(pixels, plane * 3, "RGB24")?.to_vec()),
        PixelFormat::Bgr24 => {
            let bgr = take(pixels, plane * 3, "BGR24")?;
            let mut rgb = Vec::with_capacity(bgr.len());
            for px in bgr.chunks_exact(3) {
                rgb.extend_from_slice(&[px[2], px[1], px[0]]);
            }
            Ok(rgb)
        }
        PixelFormat::Yuyv => yuyv_to_rgb(take(pixels, plane * 2, "YUYV")?, w, h),
        PixelFormat::Nv12 => nv12_to_rgb(take(pixels, plane + plane / 2, "NV12")?, w, h),
    }
}

fn take<'a>(pixels: &'a [u8], expected: usize, name: &str) -> Result<&'a [u8], PipelineError> {
    pixels.get(..expected).ok_or_else(|| {
        PipelineError::Preprocess(format!(
            "{} frame too short: expected {}, got {}",
            name,
            expected,
            pixels.len()
        ))
    })
}

fn yuyv_to_rgb(pixels: &[u8], w: usize, h: usize) -> Result<Vec<u8>, PipelineError> {
    if w % 2 != 0 {
        return Err(PipelineError::Preprocess(format!(
            "YUYV frame width must be even, got {}",
            w
        )));
    }

    let mut rgb = Vec::with_capacity(w * h * 3);
    for quad in pixels.chunks_exact(4) {
        let u = quad[1] as f32 - 128.0;
        let v = quad[3] as f32 - 128.0;
        for y in [quad[0], quad[2]] {
            rgb.extend_from_slice(&yuv_to_rgb(y as f32, u, v));
        }
    }
    Ok(rgb)
}

fn nv12_to_rgb(pixels: &[u8], w: usize, h: usize) -> Result<Vec<u8>, PipelineError> {
    // Chroma is subsampled 2x2; odd sizes leave a partial UV row or pair.
    if w % 2 != 0 || h % 2 != 0 {
        return Err(PipelineError::Preprocess(format!(
            "NV12 frame dimensions must be even, got {}x{}",
            w, h
        )));
    }

    let y_plane = w * h;
    let mut rgb = vec![0u8; y_plane * 3];
    for j in 0..h {
        for i in 0..w {
            let y = pixels[j * w + i] as f32;
            let uv_index = y_plane + (j / 2) * w + (i / 2) * 2;
            let u = pixels[uv_index] as f32 - 128.0;
            let v = pixels[uv_index + 1] as f32 - 128.0;

            let offset = (j * w + i) * 3;
            rgb[offset..offset + 3].copy_from_slice(&yuv_to_rgb(y, u, v));
        }
    }

    Ok(rgb)
}

fn yuv_to_rgb(y: f32, u: f32, v: f32) -> [u8; 3] {
    let r = y + 1.402_f32 * v;
    let g = y - 0.344_136_f32 * u - 0.714_136_f32 * v;
    let b = y + 1.772_f32 * u;
    [clamp_to_u8(r), clamp_to_u8(g), clamp_to_u8(b)]
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nv12_conversion_produces_gray() {
        let nv12 = [vec![128u8; 4], vec![128u8; 2]].concat();
        let rgb = normalize_to_rgb(&nv12, 2, 2, PixelFormat::Nv12).unwrap();
        assert_eq!(rgb, vec![128u8; 12]);
    }

    #[test]
    fn nv12_rejects_odd_height() {
        let err = normalize_to_rgb(&vec![128u8; 18], 4, 3, PixelFormat::Nv12).unwrap_err();
        assert!(matches!(err, PipelineError::Preprocess(_)));
    }

    #[test]
    fn nv12_rejects_odd_width() {
        let err = normalize_to_rgb(&vec![128u8; 9], 3, 2, PixelFormat::Nv12).unwrap_err();
        assert!(matches!(err, PipelineError::Preprocess(_)));
    }

    #[test]
    fn yuyv_conversion_produces_gray() {
        let yuyv = vec![200u8, 128, 200, 128];
        let rgb = normalize_to_rgb(&yuyv, 2, 1, PixelFormat::Yuyv).unwrap();
        assert_eq!(rgb, vec![200u8; 6]);
    }

    #[test]
    fn bgr_is_swapped_to_rgb() {
        let rgb = normalize_to_rgb(&[1, 2, 3], 1, 1, PixelFormat::Bgr24).unwrap();
        assert_eq!(rgb, vec![3, 2, 1]);
    }

    #[test]
    fn padded_buffers_are_truncated() {
        let pixels = vec![7u8; 16];
        let rgb = normalize_to_rgb(&pixels, 1, 3, PixelFormat::Rgb24).unwrap();
        assert_eq!(rgb.len(), 9);
    }

    #[test]
    fn short_buffers_are_rejected() {
        let err = normalize_to_rgb(&[0u8; 5], 1, 3, PixelFormat::Rgb24).unwrap_err();
        assert!(matches!(err, PipelineError::Preprocess(_)));
    }

    #[test]
    fn fourcc_lookup() {
        assert_eq!(PixelFormat::from_fourcc(b"YUYV"), Some(PixelFormat::Yuyv));
        assert_eq!(PixelFormat::from_fourcc(b"MJPG"), None);
    }
}
