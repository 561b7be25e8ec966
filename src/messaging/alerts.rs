use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::models::{Event, ThreatAssessment};

const RULE_WIDTH: usize = 70;

/// Payload of `EventType::EventCreated`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventCreatedPayload {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub summary: String,
    pub summary_degraded: bool,
    pub threat: ThreatAssessment,
    pub faces: usize,
    pub people: usize,
    pub scene: String,
}

impl EventCreatedPayload {
    pub fn from_event(event: &Event) -> Self {
        let vision = event.vision();
        let people = vision
            .map(|v| v.objects.iter().filter(|o| o.label.eq_ignore_ascii_case("person")).count())
            .unwrap_or(0);

        Self {
            event_id: event.id,
            timestamp: event.timestamp,
            summary: event.summary.clone(),
            summary_degraded: event.summary_degraded,
            threat: event.threat.clone(),
            faces: event.faces().map(|f| f.faces.len()).unwrap_or(0),
            people,
            scene: vision
                .map(|v| v.scene_description.clone())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "unavailable".to_string()),
        }
    }
}

/// Payload of `EventType::PipelineFailed`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineFailedPayload {
    pub reason: String,
    pub motion_level: f64,
}

/// Whether an event deserves an operator banner
pub fn requires_alert(payload: &EventCreatedPayload) -> bool {
    payload.threat.suspicious
}

/// Multi-line operator banner for a created event
pub fn format_alert(payload: &EventCreatedPayload) -> String {
    let rule = "=".repeat(RULE_WIDTH);
    let status = if payload.threat.suspicious {
        "SUSPICIOUS"
    } else {
        "Normal"
    };

    format!(
        "\n{rule}\nSECURITY ALERT - {level} PRIORITY\n{rule}\n\
         Event: {id}\n\
         Time: {time}\n\
         Status: {status}\n\n\
         Detection Summary:\n\
         - Faces Detected: {faces}\n\
         - People Detected: {people}\n\
         - Scene: {scene}\n\n\
         Assessment:\n{reason}\n\n\
         Summary:\n{summary}\n{rule}\n",
        rule = rule,
        level = payload.threat.level,
        id = payload.event_id,
        time = payload.timestamp.format("%Y-%m-%d %H:%M:%S"),
        status = status,
        faces = payload.faces,
        people = payload.people,
        scene = payload.scene,
        reason = payload.threat.reason,
        summary = payload.summary,
    )
}
