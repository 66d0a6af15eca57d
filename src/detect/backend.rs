use crate::error::PipelineError;
use crate::preprocess::InputTensor;

/// First output tensor of a detection graph, unmodified.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawOutput {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl RawOutput {
    /// Length of one detection row (the innermost dimension).
    pub fn row_len(&self) -> usize {
        self.shape.last().copied().unwrap_or(0)
    }

    /// Row 0 of batch 0, if the tensor holds at least one full row.
    pub fn first_row(&self) -> Option<&[f32]> {
        let row_len = self.row_len();
        if self.shape.len() < 2 || row_len == 0 || self.shape.iter().any(|&d| d == 0) {
            return None;
        }
        self.data.get(..row_len)
    }
}

/// Detector backend trait.
///
/// A backend wraps one loaded inference graph. Loading happens in the
/// backend's constructor; `infer` binds an input tensor, runs the graph and
/// returns its first output.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run the graph on a prepared tensor.
    ///
    /// Shape mismatches and runtime failures are `PipelineError::Inference`.
    fn infer(&mut self, input: &InputTensor) -> Result<RawOutput, PipelineError>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<(), PipelineError> {
        Ok(())
    }
}

impl<B: DetectorBackend + ?Sized> DetectorBackend for Box<B> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn infer(&mut self, input: &InputTensor) -> Result<RawOutput, PipelineError> {
        (**self).infer(input)
    }

    fn warm_up(&mut self) -> Result<(), PipelineError> {
        (**self).warm_up()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_row_reads_innermost_dimension() {
        let output = RawOutput {
            shape: vec![1, 2, 6],
            data: (0..12).map(|v| v as f32).collect(),
        };
        assert_eq!(output.first_row(), Some(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0][..]));
    }

    #[test]
    fn empty_outputs_have_no_row() {
        let output = RawOutput {
            shape: vec![1, 0, 6],
            data: Vec::new(),
        };
        assert_eq!(output.first_row(), None);
        assert_eq!(RawOutput::default().first_row(), None);
    }
}
