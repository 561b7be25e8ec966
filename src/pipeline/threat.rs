use crate::db::models::{DetectionResult, ThreatAssessment, ThreatLevel};

/// Emotions that escalate an unknown face to `High`
const HOSTILE_EMOTIONS: [&str; 3] = ["angry", "fear", "disgust"];

/// Deterministic threat classification from the merged detections.
pub fn assess_threat(detections: &[DetectionResult]) -> ThreatAssessment {
    let faces = detections
        .iter()
        .filter_map(DetectionResult::as_face)
        .find(|f| !f.degraded && !f.faces.is_empty());

    let Some(face_result) = faces else {
        let scene = detections
            .iter()
            .filter_map(DetectionResult::as_vision)
            .map(|v| v.scene_description.trim())
            .find(|s| !s.is_empty());
        let reason = match scene {
            Some(scene) => format!("No faces detected. Scene: {}", scene),
            None => "No faces detected".to_string(),
        };
        return ThreatAssessment {
            level: ThreatLevel::Low,
            suspicious: false,
            reason,
        };
    };

    let (known, unknown): (Vec<_>, Vec<_>) =
        face_result.faces.iter().partition(|face| face.is_known());

    if unknown.is_empty() {
        let names: Vec<&str> = known
            .iter()
            .filter_map(|face| face.identity.as_deref())
            .collect();
        return ThreatAssessment {
            level: ThreatLevel::Low,
            suspicious: false,
            reason: format!("Authorized person(s): {}", names.join(", ")),
        };
    }

    let hostile = unknown.iter().find_map(|face| {
        face.emotion
            .as_deref()
            .map(str::to_ascii_lowercase)
            .filter(|emotion| HOSTILE_EMOTIONS.contains(&emotion.as_str()))
    });

    match hostile {
        Some(emotion) => ThreatAssessment {
            level: ThreatLevel::High,
            suspicious: true,
            reason: format!("Unknown person showing {} expression", emotion),
        },
        None => ThreatAssessment {
            level: ThreatLevel::Medium,
            suspicious: true,
            reason: format!("{} unknown person(s) detected", unknown.len()),
        },
    }
}
