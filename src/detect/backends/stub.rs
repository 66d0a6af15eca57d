use crate::detect::backend::{DetectorBackend, RawOutput};
use crate::error::PipelineError;
use crate::preprocess::{InputTensor, ModelInput};

/// Stub backend for testing and model-less demo runs.
///
/// Validates the input shape like a real graph would, then returns a fixed
/// `[1, N, 6]` output.
pub struct StubBackend {
    input: ModelInput,
    rows: Vec<[f32; 6]>,
    calls: u64,
}

impl StubBackend {
    /// A backend whose output holds the given rows, in order.
    pub fn new(input: ModelInput, rows: Vec<[f32; 6]>) -> Self {
        Self {
            input,
            rows,
            calls: 0,
        }
    }

    /// A backend reporting one centered "class 0" detection.
    pub fn single(input: ModelInput) -> Self {
        Self::new(input, vec![[0.5, 0.5, 0.25, 0.25, 0.5, 0.0]])
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn infer(&mut self, input: &InputTensor) -> Result<RawOutput, PipelineError> {
        let expected = self.input.nhwc_shape();
        if input.shape != expected {
            return Err(PipelineError::Inference(format!(
                "input shape {:?} does not match model input {:?}",
                input.shape, expected
            )));
        }
        self.calls += 1;

        Ok(RawOutput {
            shape: vec![1, self.rows.len(), 6],
            data: self.rows.iter().flatten().copied().collect(),
        })
    }
}
