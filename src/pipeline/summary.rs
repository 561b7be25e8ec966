use log::{debug, warn};
use std::cmp::Ordering;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use crate::config::SummaryConfig;
use crate::db::models::{DetectionResult, FaceObservation, FaceResult, LabeledObject, VisionResult};
use crate::llm::LlmClient;

const SYSTEM_PROMPT: &str =
    "You are a security camera AI assistant. Provide clear, factual summaries of events.";

/// Turns merged detections into the human-readable event summary.
pub struct SummaryComposer {
    llm: Arc<dyn LlmClient>,
    max_list_length: usize,
    timeout: Duration,
}

impl SummaryComposer {
    pub fn new(llm: Arc<dyn LlmClient>, max_list_length: usize, timeout: Duration) -> Self {
        Self {
            llm,
            max_list_length: max_list_length.max(1),
            timeout,
        }
    }

    pub fn from_config(llm: Arc<dyn LlmClient>, config: &SummaryConfig) -> Self {
        Self::new(
            llm,
            config.max_detection_list_length,
            Duration::from_millis(config.llm_timeout_ms),
        )
    }

    /// Returns the summary and whether it is degraded. The summary is never
    /// empty: an unusable LLM reply falls back to the template.
    pub async fn compose(&self, detections: &[DetectionResult]) -> (String, bool) {
        let inputs_degraded = detections.iter().any(DetectionResult::is_degraded);
        let prompt = self.build_prompt(detections);

        match tokio::time::timeout(self.timeout, self.llm.complete(&prompt, Some(SYSTEM_PROMPT)))
            .await
        {
            Ok(Ok(text)) if !text.trim().is_empty() => {
                debug!("Summary composed by LLM ({} chars)", text.len());
                (text.trim().to_string(), inputs_degraded)
            }
            Ok(Ok(_)) => {
                warn!("LLM returned an empty summary, using template");
                (self.fallback_summary(detections), true)
            }
            Ok(Err(e)) => {
                warn!("LLM summary failed, using template: {}", e);
                (self.fallback_summary(detections), true)
            }
            Err(_) => {
                warn!("LLM summary timed out after {:?}, using template", self.timeout);
                (self.fallback_summary(detections), true)
            }
        }
    }

    /// Structured prompt with stable ordering: vision before faces, entries
    /// by descending confidence, lists cut to the configured length.
    pub fn build_prompt(&self, detections: &[DetectionResult]) -> String {
        let mut prompt = String::from(
            "Based on this security camera analysis, provide a clear, concise summary of what's happening:\n",
        );

        let vision = detections.iter().find_map(DetectionResult::as_vision);
        let faces = detections.iter().find_map(DetectionResult::as_face);

        prompt.push_str("\nScene analysis:\n");
        match vision {
            Some(v) if !v.degraded => self.write_vision(&mut prompt, v),
            _ => prompt.push_str("- unavailable\n"),
        }

        prompt.push_str("\nFace analysis:\n");
        match faces {
            Some(f) if !f.degraded => self.write_faces(&mut prompt, f),
            _ => prompt.push_str("- unavailable\n"),
        }

        prompt.push_str("\nProvide a natural language summary suitable for a security alert.");
        prompt
    }

    fn write_vision(&self, out: &mut String, vision: &VisionResult) {
        let description = vision.scene_description.trim();
        let _ = writeln!(
            out,
            "- Description: {}",
            if description.is_empty() { "none" } else { description }
        );

        let objects = sorted_objects(&vision.objects);
        let _ = writeln!(out, "- Objects detected: {}", objects.len());
        for object in objects.iter().take(self.max_list_length) {
            let _ = writeln!(out, "  - {} ({:.2})", object.label, object.confidence);
        }
        if objects.len() > self.max_list_length {
            let _ = writeln!(out, "  - ({} more omitted)", objects.len() - self.max_list_length);
        }
    }

    fn write_faces(&self, out: &mut String, faces: &FaceResult) {
        let sorted = sorted_faces(&faces.faces);
        let _ = writeln!(out, "- Faces detected: {}", sorted.len());
        for face in sorted.iter().take(self.max_list_length) {
            let _ = writeln!(out, "  - {}", describe_face(face));
        }
        if sorted.len() > self.max_list_length {
            let _ = writeln!(out, "  - ({} more omitted)", sorted.len() - self.max_list_length);
        }
    }

    /// Deterministic summary assembled from structured fields only
    pub fn fallback_summary(&self, detections: &[DetectionResult]) -> String {
        let vision = detections
            .iter()
            .find_map(DetectionResult::as_vision)
            .filter(|v| !v.degraded);
        let faces = detections
            .iter()
            .find_map(DetectionResult::as_face)
            .filter(|f| !f.degraded);

        let mut parts = vec!["Motion event detected.".to_string()];

        if let Some(v) = vision {
            let people = v
                .objects
                .iter()
                .filter(|o| o.label.eq_ignore_ascii_case("person"))
                .count();
            parts.push(format!(
                "{} person(s) and {} object(s) in view.",
                people,
                v.objects.len()
            ));
            let description = v.scene_description.trim();
            if !description.is_empty() {
                parts.push(format!("Scene: {}.", description.trim_end_matches('.')));
            }
        } else {
            parts.push("Scene analysis unavailable.".to_string());
        }

        if let Some(f) = faces {
            let mut known: Vec<&str> = f.faces.iter().filter_map(|face| face.identity.as_deref()).collect();
            known.sort_unstable();
            known.dedup();
            let unknown = f.faces.iter().filter(|face| !face.is_known()).count();
            parts.push(format!("{} face(s) detected.", f.faces.len()));
            if !known.is_empty() {
                let shown = known.len().min(self.max_list_length);
                let mut names = known[..shown].join(", ");
                if known.len() > shown {
                    let _ = write!(names, " ({} more)", known.len() - shown);
                }
                parts.push(format!("Known: {}.", names));
            }
            if unknown > 0 {
                parts.push(format!("Unknown: {}.", unknown));
            }
        } else {
            parts.push("Face analysis unavailable.".to_string());
        }

        parts.join(" ")
    }
}

fn by_confidence(a: f32, b: f32) -> Ordering {
    b.total_cmp(&a)
}

fn sorted_objects(objects: &[LabeledObject]) -> Vec<&LabeledObject> {
    let mut sorted: Vec<&LabeledObject> = objects.iter().collect();
    sorted.sort_by(|a, b| by_confidence(a.confidence, b.confidence).then_with(|| a.label.cmp(&b.label)));
    sorted
}

fn sorted_faces(faces: &[FaceObservation]) -> Vec<&FaceObservation> {
    let mut sorted: Vec<&FaceObservation> = faces.iter().collect();
    sorted.sort_by(|a, b| {
        by_confidence(a.confidence, b.confidence).then_with(|| a.identity.cmp(&b.identity))
    });
    sorted
}

fn describe_face(face: &FaceObservation) -> String {
    let mut text = match &face.identity {
        Some(name) => format!("known: {}", name),
        None => "unknown".to_string(),
    };
    let _ = write!(text, " ({:.2})", face.confidence);
    if let Some(emotion) = &face.emotion {
        let _ = write!(text, ", emotion {}", emotion);
    }
    if let Some(age) = face.estimated_age {
        let _ = write!(text, ", age ~{}", age);
    }
    if let Some(gender) = &face.estimated_gender {
        let _ = write!(text, ", {}", gender);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedLlm {
        reply: Result<String, Error>,
        delay: Duration,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedLlm {
        fn replying(reply: Result<String, Error>) -> Arc<Self> {
            Arc::new(Self {
                reply,
                delay: Duration::ZERO,
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn complete(&self, prompt: &str, _context: Option<&str>) -> Result<String, Error> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.reply.clone()
        }
    }

    fn object(label: &str, confidence: f32) -> LabeledObject {
        LabeledObject {
            label: label.into(),
            confidence,
            bbox: None,
        }
    }

    fn detections() -> Vec<DetectionResult> {
        vec![
            DetectionResult::Face(FaceResult {
                faces: vec![FaceObservation {
                    identity: Some("alice".into()),
                    confidence: 0.95,
                    emotion: Some("happy".into()),
                    estimated_age: Some(31),
                    estimated_gender: None,
                }],
                degraded: false,
            }),
            DetectionResult::Vision(VisionResult {
                objects: vec![
                    object("car", 0.4),
                    object("person", 0.9),
                    object("dog", 0.7),
                    object("bag", 0.7),
                ],
                scene_description: "a person walking a dog".into(),
                degraded: false,
            }),
        ]
    }

    #[test]
    fn prompt_is_ordered_and_truncated() {
        let composer = SummaryComposer::new(
            ScriptedLlm::replying(Ok(String::new())),
            3,
            Duration::from_secs(1),
        );
        let prompt = composer.build_prompt(&detections());

        let vision_at = prompt.find("Scene analysis").unwrap();
        let faces_at = prompt.find("Face analysis").unwrap();
        assert!(vision_at < faces_at);

        let person = prompt.find("person (0.90)").unwrap();
        let bag = prompt.find("bag (0.70)").unwrap();
        let dog = prompt.find("dog (0.70)").unwrap();
        assert!(person < bag && bag < dog);
        assert!(!prompt.contains("car (0.40)"));
        assert!(prompt.contains("(1 more omitted)"));
        assert!(prompt.contains("known: alice (0.95), emotion happy, age ~31"));
    }

    #[test]
    fn prompt_is_deterministic() {
        let composer = SummaryComposer::new(
            ScriptedLlm::replying(Ok(String::new())),
            10,
            Duration::from_secs(1),
        );
        let mut reversed = detections();
        reversed.reverse();
        assert_eq!(composer.build_prompt(&detections()), composer.build_prompt(&reversed));
    }

    #[tokio::test]
    async fn llm_summary_is_used() {
        let llm = ScriptedLlm::replying(Ok(" Alice is walking her dog. ".into()));
        let composer = SummaryComposer::new(llm.clone(), 10, Duration::from_secs(1));

        let (summary, degraded) = composer.compose(&detections()).await;
        assert_eq!(summary, "Alice is walking her dog.");
        assert!(!degraded);
        assert_eq!(llm.prompts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn degraded_input_propagates() {
        let llm = ScriptedLlm::replying(Ok("Someone is outside.".into()));
        let composer = SummaryComposer::new(llm, 10, Duration::from_secs(1));

        let (summary, degraded) = composer
            .compose(&[
                DetectionResult::degraded_vision(),
                DetectionResult::Face(FaceResult::default()),
            ])
            .await;
        assert_eq!(summary, "Someone is outside.");
        assert!(degraded);
    }

    #[tokio::test]
    async fn llm_failure_falls_back_to_template() {
        let llm = ScriptedLlm::replying(Err(Error::Llm("rate limited".into())));
        let composer = SummaryComposer::new(llm, 10, Duration::from_secs(1));

        let (summary, degraded) = composer.compose(&detections()).await;
        assert!(degraded);
        assert!(summary.contains("1 person(s) and 4 object(s)"));
        assert!(summary.contains("Known: alice."));
    }

    #[tokio::test(start_paused = true)]
    async fn llm_timeout_falls_back_to_template() {
        let llm = Arc::new(ScriptedLlm {
            reply: Ok("too late".into()),
            delay: Duration::from_secs(30),
            prompts: Mutex::new(Vec::new()),
        });
        let composer = SummaryComposer::new(llm, 10, Duration::from_secs(2));

        let (summary, degraded) = composer.compose(&detections()).await;
        assert!(degraded);
        assert_ne!(summary, "too late");
    }

    #[test]
    fn fallback_is_never_empty() {
        let composer = SummaryComposer::new(
            ScriptedLlm::replying(Ok(String::new())),
            10,
            Duration::from_secs(1),
        );
        let summary = composer.fallback_summary(&[
            DetectionResult::degraded_vision(),
            DetectionResult::degraded_face(),
        ]);
        assert_eq!(
            summary,
            "Motion event detected. Scene analysis unavailable. Face analysis unavailable."
        );
    }

    #[test]
    fn fallback_caps_known_identities() {
        let composer = SummaryComposer::new(
            ScriptedLlm::replying(Ok(String::new())),
            2,
            Duration::from_secs(1),
        );
        let faces = ["dave", "alice", "carol", "bob"]
            .iter()
            .map(|name| FaceObservation {
                identity: Some(name.to_string()),
                confidence: 0.9,
                emotion: None,
                estimated_age: None,
                estimated_gender: None,
            })
            .collect();

        let summary = composer.fallback_summary(&[
            DetectionResult::degraded_vision(),
            DetectionResult::Face(FaceResult {
                faces,
                degraded: false,
            }),
        ]);
        assert!(summary.contains("4 face(s) detected."));
        assert!(summary.contains("Known: alice, bob (2 more)."));
        assert!(!summary.contains("carol"));
    }
}
