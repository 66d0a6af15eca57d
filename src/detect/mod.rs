//! Object detection: backends wrapping the inference runtime, and the
//! extraction of a structured record from their raw output.

mod backend;
mod backends;
mod result;

pub use backend::{DetectorBackend, RawOutput};
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use backends::StubBackend;
pub use result::{extract, BoxConvention, BoxLayout, DetectionRecord, DETECTION_ROW_LEN};

use crate::config::ModelSettings;
use crate::error::PipelineError;

/// Load the detector backend named in the model settings.
///
/// The model is loaded exactly once here; failures are fatal at startup.
pub fn load_backend(settings: &ModelSettings) -> Result<Box<dyn DetectorBackend>, PipelineError> {
    let mut backend: Box<dyn DetectorBackend> = match settings.backend.as_str() {
        "stub" => {
            log::warn!("using stub detector backend; detections are synthetic");
            Box::new(StubBackend::single(settings.input))
        }
        #[cfg(feature = "backend-tract")]
        "tract" => Box::new(TractBackend::load(
            &settings.path,
            settings.input,
            settings.layout,
        )?),
        #[cfg(not(feature = "backend-tract"))]
        "tract" => {
            return Err(PipelineError::ModelLoad(
                "backend 'tract' requires the backend-tract feature".into(),
            ))
        }
        other => {
            return Err(PipelineError::ModelLoad(format!(
                "unknown detector backend '{}'",
                other
            )))
        }
    };
    backend.warm_up()?;
    log::info!("detector backend '{}' ready", backend.name());
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_stub_backend_by_name() {
        let settings = ModelSettings {
            backend: "stub".to_string(),
            ..ModelSettings::default()
        };
        let backend = load_backend(&settings).unwrap();
        assert_eq!(backend.name(), "stub");
    }

    #[test]
    fn unknown_backend_is_a_model_load_error() {
        let settings = ModelSettings {
            backend: "tflite".to_string(),
            ..ModelSettings::default()
        };
        assert!(matches!(
            load_backend(&settings).err().unwrap(),
            PipelineError::ModelLoad(_)
        ));
    }

    #[cfg(not(feature = "backend-tract"))]
    #[test]
    fn default_settings_load_without_tract() {
        let backend = load_backend(&ModelSettings::default()).unwrap();
        assert_eq!(backend.name(), "stub");
    }

    #[cfg(feature = "backend-tract")]
    #[test]
    fn missing_model_file_is_a_model_load_error() {
        let settings = ModelSettings {
            backend: "tract".to_string(),
            path: "/nonexistent/model.onnx".into(),
            ..ModelSettings::default()
        };
        assert!(matches!(
            load_backend(&settings).err().unwrap(),
            PipelineError::ModelLoad(_)
        ));
    }
}
