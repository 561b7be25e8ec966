//! Vision and face analysis collaborators.
//!
//! The pipeline only depends on the traits here; `http` holds adapters for
//! a JSON analysis service.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::capture::Frame;
use crate::db::models::{FaceObservation, FaceResult, LabeledObject, VisionResult};
use crate::error::Error;

pub mod http;

pub use http::{HttpFaceAnalyzer, HttpVisionAnalyzer};

/// Scene analysis output
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisionAnalysis {
    #[serde(default)]
    pub objects: Vec<LabeledObject>,
    #[serde(default, alias = "description")]
    pub scene_description: String,
}

impl From<VisionAnalysis> for VisionResult {
    fn from(analysis: VisionAnalysis) -> Self {
        VisionResult {
            objects: analysis.objects,
            scene_description: analysis.scene_description,
            degraded: false,
        }
    }
}

/// Face identity / attribute output
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FaceAnalysis {
    #[serde(default)]
    pub faces: Vec<FaceObservation>,
}

impl From<FaceAnalysis> for FaceResult {
    fn from(analysis: FaceAnalysis) -> Self {
        FaceResult {
            faces: analysis.faces,
            degraded: false,
        }
    }
}

#[async_trait]
pub trait VisionAnalyzer: Send + Sync {
    async fn analyze(&self, frame: &Frame) -> Result<VisionAnalysis, Error>;
}

#[async_trait]
pub trait FaceAnalyzer: Send + Sync {
    async fn analyze(&self, frame: &Frame) -> Result<FaceAnalysis, Error>;
}
