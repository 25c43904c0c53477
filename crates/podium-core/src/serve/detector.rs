use async_trait::async_trait;
use image::DynamicImage;
use serde::{Deserialize, Serialize};

use super::ServeError;

/// One detected object in pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoxPrediction {
    /// `[x1, y1, x2, y2]`
    pub xyxy: [f32; 4],
    pub class_id: u32,
}

/// Response body of `POST /predict`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub boxes: Vec<BoxPrediction>,
    /// Milliseconds; never negative.
    pub inference_time: f64,
}

/// A loaded object-detection model.
///
/// Implementations are shared by every request and must not mutate model
/// state during inference.
#[async_trait]
pub trait Detector: Send + Sync {
    async fn detect(&self, image: DynamicImage) -> Result<Prediction, ServeError>;
}
