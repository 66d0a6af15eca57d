#![cfg(feature = "backend-tract")]

use std::path::Path;

use tract_onnx::prelude::*;

use crate::detect::backend::{DetectorBackend, RawOutput};
use crate::error::PipelineError;
use crate::preprocess::{InputTensor, ModelInput, TensorLayout};

/// Tract-based backend for ONNX detection graphs.
///
/// The graph is loaded, pinned to a fixed input shape and optimized once.
/// It does not perform any network I/O or write to disk beyond model loading.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    input: ModelInput,
    layout: TensorLayout,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn load<P: AsRef<Path>>(
        model_path: P,
        input: ModelInput,
        layout: TensorLayout,
    ) -> Result<Self, PipelineError> {
        let model_path = model_path.as_ref();
        if !model_path.is_file() {
            return Err(PipelineError::ModelLoad(format!(
                "model file {} not found",
                model_path.display()
            )));
        }

        let (h, w) = (input.height as usize, input.width as usize);
        let shape = match layout {
            TensorLayout::Nhwc => tvec!(1, h, w, 3),
            TensorLayout::Nchw => tvec!(1, 3, h, w),
        };

        let load_err =
            |stage: &str, e: TractError| PipelineError::ModelLoad(format!("{}: {:#}", stage, e));
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .map_err(|e| load_err(&format!("failed to load {}", model_path.display()), e))?
            .with_input_fact(0, InferenceFact::dt_shape(f32::datum_type(), shape))
            .map_err(|e| load_err("failed to set input fact", e))?
            .into_optimized()
            .map_err(|e| load_err("failed to optimize model", e))?
            .into_runnable()
            .map_err(|e| load_err("failed to build runnable model", e))?;

        log::info!(
            "TractBackend: loaded {} ({}x{} {:?})",
            model_path.display(),
            input.width,
            input.height,
            layout
        );

        Ok(Self {
            model,
            input,
            layout,
        })
    }

    fn build_input(&self, tensor: &InputTensor) -> Result<Tensor, PipelineError> {
        let expected = self.input.nhwc_shape();
        if tensor.shape != expected {
            return Err(PipelineError::Inference(format!(
                "input shape {:?} does not match model input {:?}",
                tensor.shape, expected
            )));
        }

        let (h, w) = (tensor.height(), tensor.width());
        let array = match self.layout {
            TensorLayout::Nhwc => {
                tract_ndarray::Array4::from_shape_vec((1, h, w, 3), tensor.data.clone())
            }
            TensorLayout::Nchw => {
                tract_ndarray::Array4::from_shape_vec((1, 3, h, w), tensor.to_nchw())
            }
        }
        .map_err(|e| PipelineError::Inference(format!("bad input buffer: {}", e)))?;

        Ok(array.into_tensor())
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn infer(&mut self, input: &InputTensor) -> Result<RawOutput, PipelineError> {
        let tensor = self.build_input(input)?;
        let outputs = self
            .model
            .run(tvec!(tensor.into()))
            .map_err(|e| PipelineError::Inference(format!("ONNX inference failed: {:#}", e)))?;
        let output = outputs
            .first()
            .ok_or_else(|| PipelineError::Inference("model produced no outputs".into()))?;
        let view = output
            .to_array_view::<f32>()
            .map_err(|e| PipelineError::Inference(format!("output tensor was not f32: {}", e)))?;

        Ok(RawOutput {
            shape: view.shape().to_vec(),
            data: view.iter().copied().collect(),
        })
    }

    fn warm_up(&mut self) -> Result<(), PipelineError> {
        let zeros = InputTensor {
            shape: self.input.nhwc_shape(),
            data: vec![0.0; self.input.nhwc_shape().iter().product()],
        };
        self.infer(&zeros).map(|_| ())
    }
}
