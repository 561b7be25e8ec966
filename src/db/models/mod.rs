pub mod conversation_models;
pub mod event_models;

pub use conversation_models::ConversationTurn;
pub use event_models::{
    BoundingBox, DetectionResult, Event, FaceObservation, FaceResult, LabeledObject, Modality,
    ThreatAssessment, ThreatLevel, VisionResult,
};
