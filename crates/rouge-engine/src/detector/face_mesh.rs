//! Candle-backed face mesh landmark backend.
//!
//! Loads safetensors weights for a small convolutional landmark regressor
//! and runs per-frame inference on CPU or GPU. Enable the
//! `candle-landmarks` feature to use this module.

use super::{FaceLandmarks, InferenceBackend, FACE_LANDMARK_COUNT};
use crate::capture::Frame;
use crate::config::{Delegate, DetectorConfig};
use crate::error::DetectorError;
use crate::session::DetectorBackendFactory;

use candle_core::{DType, Device, Tensor};
use candle_nn::{conv2d, linear, Conv2d, Conv2dConfig, Linear, Module, VarBuilder};

/// Model input edge length in pixels.
const INPUT_SIZE: usize = 192;

/// Backbone channel plan; each block halves the spatial resolution.
const CHANNELS: [usize; 5] = [16, 32, 64, 128, 128];

fn select_device(delegate: Delegate) -> Result<Device, DetectorError> {
    match delegate {
        Delegate::Cpu => Ok(Device::Cpu),
        Delegate::Gpu => {
            if let Ok(device) = Device::cuda_if_available(0) {
                if device.is_cuda() {
                    log::info!("face mesh on CUDA");
                    return Ok(device);
                }
            }
            if let Ok(device) = Device::new_metal(0) {
                log::info!("face mesh on Metal");
                return Ok(device);
            }
            Err(DetectorError::UnsupportedDelegate(
                "no CUDA or Metal device available".into(),
            ))
        }
    }
}

/// Nearest-neighbor resize of an RGBA frame into a CHW float tensor layout
/// normalized to [-1, 1], alpha dropped.
fn preprocess_rgba(data: &[u8], width: u32, height: u32, out: &mut Vec<f32>) {
    let plane = INPUT_SIZE * INPUT_SIZE;
    out.clear();
    out.resize(3 * plane, 0.0);

    let x_ratio = width as f32 / INPUT_SIZE as f32;
    let y_ratio = height as f32 / INPUT_SIZE as f32;
    for y in 0..INPUT_SIZE {
        let src_y = ((y as f32 * y_ratio) as u32).min(height.saturating_sub(1));
        for x in 0..INPUT_SIZE {
            let src_x = ((x as f32 * x_ratio) as u32).min(width.saturating_sub(1));
            let src = ((src_y * width + src_x) * 4) as usize;
            if src + 2 >= data.len() {
                continue;
            }
            let dst = y * INPUT_SIZE + x;
            out[dst] = data[src] as f32 / 127.5 - 1.0;
            out[plane + dst] = data[src + 1] as f32 / 127.5 - 1.0;
            out[2 * plane + dst] = data[src + 2] as f32 / 127.5 - 1.0;
        }
    }
}

struct FaceMeshNet {
    blocks: Vec<Conv2d>,
    landmarks: Linear,
    presence: Linear,
}

impl FaceMeshNet {
    fn load(vb: VarBuilder) -> candle_core::Result<Self> {
        let mut blocks = Vec::with_capacity(CHANNELS.len());
        let mut c_in = 3;
        for (i, &c_out) in CHANNELS.iter().enumerate() {
            let cfg = Conv2dConfig {
                padding: 1,
                stride: 2,
                ..Default::default()
            };
            blocks.push(conv2d(c_in, c_out, 3, cfg, vb.pp(format!("backbone.{i}")))?);
            c_in = c_out;
        }
        let spatial = INPUT_SIZE >> CHANNELS.len();
        let features = c_in * spatial * spatial;
        let landmarks = linear(features, FACE_LANDMARK_COUNT * 3, vb.pp("landmarks"))?;
        let presence = linear(features, 1, vb.pp("presence"))?;
        Ok(Self {
            blocks,
            landmarks,
            presence,
        })
    }

    fn forward(&self, input: &Tensor) -> candle_core::Result<(Tensor, Tensor)> {
        let mut x = input.clone();
        for block in &self.blocks {
            x = block.forward(&x)?.relu()?;
        }
        let features = x.flatten_from(1)?;
        Ok((
            self.landmarks.forward(&features)?,
            self.presence.forward(&features)?,
        ))
    }
}

/// Candle [`InferenceBackend`]: one loaded network, one reusable staging
/// buffer, no per-frame allocation beyond the input tensor.
pub struct FaceMeshBackend {
    device: Device,
    model: Option<FaceMeshNet>,
    min_confidence: f32,
    staging: Vec<f32>,
}

impl FaceMeshBackend {
    pub fn new() -> Self {
        Self {
            device: Device::Cpu,
            model: None,
            min_confidence: 0.5,
            staging: Vec::new(),
        }
    }
}

impl Default for FaceMeshBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceBackend for FaceMeshBackend {
    fn load(&mut self, config: &DetectorConfig) -> Result<(), DetectorError> {
        self.device = select_device(config.delegate)?;
        self.min_confidence = config.min_confidence;

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(
                &[config.model_asset.clone()],
                DType::F32,
                &self.device,
            )
        }
        .map_err(|e| DetectorError::AssetUnreachable(e.to_string()))?;
        let model =
            FaceMeshNet::load(vb).map_err(|e| DetectorError::Inference(format!("model load: {e}")))?;
        self.model = Some(model);
        Ok(())
    }

    fn infer(&mut self, frame: &Frame) -> Result<Option<FaceLandmarks>, DetectorError> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| DetectorError::Inference("model not loaded".into()))?;

        preprocess_rgba(&frame.data, frame.width, frame.height, &mut self.staging);
        let input = Tensor::from_slice(
            self.staging.as_slice(),
            (1, 3, INPUT_SIZE, INPUT_SIZE),
            &self.device,
        )
        .map_err(|e| DetectorError::Inference(e.to_string()))?;

        let (coords, presence) = model
            .forward(&input)
            .map_err(|e| DetectorError::Inference(e.to_string()))?;

        let presence = candle_nn::ops::sigmoid(&presence)
            .and_then(|t| t.flatten_all()?.to_vec1::<f32>())
            .map_err(|e| DetectorError::Inference(e.to_string()))?;
        let score = presence.first().copied().unwrap_or(0.0);
        if score < self.min_confidence {
            return Ok(None);
        }

        let coords = coords
            .flatten_all()
            .and_then(|t| t.to_vec1::<f32>())
            .map_err(|e| DetectorError::Inference(e.to_string()))?;
        let scale = INPUT_SIZE as f32;
        let points = coords
            .chunks_exact(3)
            .take(FACE_LANDMARK_COUNT)
            .map(|c| [c[0] / scale, c[1] / scale, c[2] / scale])
            .collect();

        Ok(Some(FaceLandmarks {
            points,
            blendshapes: None,
            mask: None,
        }))
    }

    fn release(&mut self) {
        self.model = None;
        self.staging = Vec::new();
    }
}

/// Factory producing fresh candle backends for the session.
pub struct FaceMeshFactory;

impl DetectorBackendFactory for FaceMeshFactory {
    fn create(&mut self) -> Box<dyn InferenceBackend> {
        Box::new(FaceMeshBackend::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preprocess_dimensions() {
        let data = vec![255u8; 4 * 4 * 4];
        let mut out = Vec::new();
        preprocess_rgba(&data, 4, 4, &mut out);
        assert_eq!(out.len(), 3 * INPUT_SIZE * INPUT_SIZE);
        // 255 maps to 1.0 in the [-1, 1] range.
        assert!((out[0] - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_cpu_delegate_always_available() {
        assert!(select_device(Delegate::Cpu).is_ok());
    }

    #[test]
    fn test_infer_without_load_fails() {
        let mut backend = FaceMeshBackend::new();
        let frame = Frame::from_rgba(vec![0u8; 16], 2, 2, 0);
        assert!(matches!(
            backend.infer(&frame),
            Err(DetectorError::Inference(_))
        ));
    }
}
