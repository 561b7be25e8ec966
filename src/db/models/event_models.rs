use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Pixel-space box around a detected object
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// One labeled object from scene analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledObject {
    pub label: String,
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BoundingBox>,
}

/// One face with whatever identity and attributes could be estimated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceObservation {
    /// Enrolled person name, `None` for unknown faces
    #[serde(default)]
    pub identity: Option<String>,
    pub confidence: f32,
    #[serde(default)]
    pub emotion: Option<String>,
    #[serde(default)]
    pub estimated_age: Option<u32>,
    #[serde(default)]
    pub estimated_gender: Option<String>,
}

impl FaceObservation {
    pub fn is_known(&self) -> bool {
        self.identity.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisionResult {
    pub objects: Vec<LabeledObject>,
    pub scene_description: String,
    pub degraded: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FaceResult {
    pub faces: Vec<FaceObservation>,
    pub degraded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Vision,
    Face,
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Modality::Vision => write!(f, "vision"),
            Modality::Face => write!(f, "face"),
        }
    }
}

/// Output of one analysis modality.
///
/// A failed or timed-out collaborator still yields a value, empty and
/// marked `degraded`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DetectionResult {
    Vision(VisionResult),
    Face(FaceResult),
}

impl DetectionResult {
    pub fn degraded_vision() -> Self {
        DetectionResult::Vision(VisionResult {
            degraded: true,
            ..VisionResult::default()
        })
    }

    pub fn degraded_face() -> Self {
        DetectionResult::Face(FaceResult {
            degraded: true,
            ..FaceResult::default()
        })
    }

    pub fn modality(&self) -> Modality {
        match self {
            DetectionResult::Vision(_) => Modality::Vision,
            DetectionResult::Face(_) => Modality::Face,
        }
    }

    pub fn is_degraded(&self) -> bool {
        match self {
            DetectionResult::Vision(v) => v.degraded,
            DetectionResult::Face(f) => f.degraded,
        }
    }

    pub fn as_vision(&self) -> Option<&VisionResult> {
        match self {
            DetectionResult::Vision(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_face(&self) -> Option<&FaceResult> {
        match self {
            DetectionResult::Face(f) => Some(f),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ThreatLevel {
    Low,
    Medium,
    High,
}

impl fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThreatLevel::Low => write!(f, "LOW"),
            ThreatLevel::Medium => write!(f, "MEDIUM"),
            ThreatLevel::High => write!(f, "HIGH"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreatAssessment {
    pub level: ThreatLevel,
    pub suspicious: bool,
    pub reason: String,
}

/// A persisted security event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Where the captured frame was stored, when image storage is on
    pub frame_ref: Option<String>,
    pub motion_level: f64,
    pub detections: Vec<DetectionResult>,
    pub summary: String,
    pub summary_degraded: bool,
    pub threat: ThreatAssessment,
}

impl Event {
    pub fn vision(&self) -> Option<&VisionResult> {
        self.detections.iter().find_map(DetectionResult::as_vision)
    }

    pub fn faces(&self) -> Option<&FaceResult> {
        self.detections.iter().find_map(DetectionResult::as_face)
    }
}
