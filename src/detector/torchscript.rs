//! TorchScript detection backend.
//!
//! Loads exported YOLO weights with `tch` and runs them on CPU or CUDA.
//! Only compiled with the `with-tch` feature.

use std::path::Path;
use std::sync::{Arc, Mutex};

use tch::{CModule, Device, IValue, Kind, Tensor};
use tracing::{debug, info};

use crate::config::DevicePreference;
use crate::detector::letterbox::letterbox;
use crate::detector::yolo::{decode, non_max_suppression, MAX_DETECTIONS, NMS_IOU};
use crate::detector::{read_class_labels, ClassLabels, DetectOptions, Detector, ModelLoader, RawDetection};
use crate::error::{DetectorError, LoadError};

fn resolve_device(preference: DevicePreference) -> Device {
    match preference {
        DevicePreference::Auto => Device::cuda_if_available(),
        DevicePreference::Cpu => Device::Cpu,
        DevicePreference::Cuda => Device::Cuda(0),
    }
}

/// TorchScript-backed detector
pub struct TorchScriptDetector {
    module: Mutex<CModule>,
    device: Device,
    labels: ClassLabels,
}

impl TorchScriptDetector {
    fn forward(&self, input: &Tensor) -> Result<Tensor, DetectorError> {
        let module = self.module.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let output = tch::no_grad(|| module.forward_is(&[IValue::Tensor(input.shallow_clone())]))
            .map_err(|e| DetectorError::Engine(e.to_string()))?;

        match output {
            IValue::Tensor(t) => Ok(t),
            // some exports return (predictions, extras)
            IValue::Tuple(values) | IValue::GenericList(values) => match values.into_iter().next() {
                Some(IValue::Tensor(t)) => Ok(t),
                _ => Err(DetectorError::Engine("model output tuple has no tensor".to_string())),
            },
            IValue::TensorList(mut tensors) if !tensors.is_empty() => Ok(tensors.swap_remove(0)),
            other => Err(DetectorError::Engine(format!("unsupported model output: {:?}", other))),
        }
    }
}

impl Detector for TorchScriptDetector {
    fn detect(&self, image: &Path, options: &DetectOptions) -> Result<Vec<RawDetection>, DetectorError> {
        let decoded = image::open(image).map_err(|e| DetectorError::Decode(image.to_path_buf(), e.to_string()))?;
        let size = options.image_size as i64;
        let (data, geometry) = letterbox(&decoded, options.image_size);

        let input = Tensor::from_slice(&data).view([1, 3, size, size]).to_device(self.device);
        let output = self.forward(&input)?;

        let shape = output.size();
        if shape.len() != 3 || shape[0] != 1 {
            return Err(DetectorError::Engine(format!("unexpected detector output shape: {:?}", shape)));
        }
        let (channels, anchors) = (shape[1] as usize, shape[2] as usize);
        let values = Vec::<f32>::try_from(output.to_device(Device::Cpu).to_kind(Kind::Float).flatten(0, -1))
            .map_err(|e| DetectorError::Engine(e.to_string()))?;

        let candidates = decode(&values, channels, anchors, options.confidence).map_err(DetectorError::Engine)?;
        debug!("{} candidates above {:.2} before NMS", candidates.len(), options.confidence);

        Ok(non_max_suppression(candidates, NMS_IOU, MAX_DETECTIONS)
            .into_iter()
            .map(|d| RawDetection {
                bbox: geometry.unmap(d.bbox),
                ..d
            })
            .collect())
    }

    fn labels(&self) -> &ClassLabels {
        &self.labels
    }
}

/// Loads `classes.json` + TorchScript weights from a model directory
pub struct TorchScriptLoader {
    device: Device,
}

impl TorchScriptLoader {
    pub fn new(preference: DevicePreference) -> Self {
        let device = resolve_device(preference);
        info!("TorchScript backend using device {:?}", device);
        Self { device }
    }
}

impl ModelLoader for TorchScriptLoader {
    fn load(&self, name: &str, weights: &Path) -> Result<Arc<dyn Detector>, LoadError> {
        let model_dir = weights.parent().unwrap_or_else(|| Path::new("."));
        let labels = read_class_labels(model_dir)?;

        let mut module = CModule::load_on_device(weights, self.device)
            .map_err(|e| LoadError::Weights(weights.to_path_buf(), e.to_string()))?;
        module.set_eval();

        debug!("Model '{}' has {} classes", name, labels.len());
        Ok(Arc::new(TorchScriptDetector {
            module: Mutex::new(module),
            device: self.device,
            labels,
        }))
    }
}
