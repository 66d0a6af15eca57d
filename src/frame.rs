//! Captured frames.
//!
//! A `Frame` is a packed 8-bit, 3-channel image as delivered by a frame
//! source. The channel order is carried alongside the pixels so the
//! preprocessor can reorder to RGB.

/// Channel order of a packed 3-channel frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ChannelOrder {
    #[default]
    Rgb,
    Bgr,
}

/// One captured still frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub order: ChannelOrder,
    data: Vec<u8>,
}

impl Frame {
    /// Wrap packed pixels. Dimensions are not validated here; the
    /// preprocessor rejects frames whose buffer does not match them.
    pub fn new(width: u32, height: u32, order: ChannelOrder, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            order,
            data,
        }
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    /// Expected byte length for the frame dimensions, `None` on overflow.
    pub fn expected_len(&self) -> Option<usize> {
        (self.width as usize)
            .checked_mul(self.height as usize)
            .and_then(|v| v.checked_mul(3))
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_len_counts_three_channels() {
        let frame = Frame::new(4, 2, ChannelOrder::Bgr, vec![0; 24]);
        assert_eq!(frame.expected_len(), Some(24));
        assert!(!frame.is_empty());
    }

    #[test]
    fn zero_dimension_frames_are_empty() {
        assert!(Frame::new(0, 10, ChannelOrder::Rgb, vec![1; 3]).is_empty());
        assert!(Frame::new(2, 2, ChannelOrder::Rgb, Vec::new()).is_empty());
    }
}
