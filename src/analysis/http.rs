use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use log::debug;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use super::{FaceAnalysis, FaceAnalyzer, VisionAnalysis, VisionAnalyzer};
use crate::capture::Frame;
use crate::error::Error;

#[derive(Serialize)]
struct AnalyzeRequest {
    frame_id: Uuid,
    timestamp: String,
    width: u32,
    height: u32,
    /// Base64 binary PGM
    image: String,
}

impl AnalyzeRequest {
    fn from_frame(frame: &Frame) -> Self {
        Self {
            frame_id: frame.id,
            timestamp: frame.captured_at.to_rfc3339(),
            width: frame.width,
            height: frame.height,
            image: BASE64.encode(frame.to_pgm()),
        }
    }
}

async fn post_frame<T: DeserializeOwned>(
    client: &Client,
    url: &str,
    frame: &Frame,
    what: &str,
) -> Result<T, Error> {
    debug!("Sending {} request for frame {}", what, frame.id);

    let response = client
        .post(url)
        .json(&AnalyzeRequest::from_frame(frame))
        .send()
        .await
        .map_err(|e| Error::AnalysisFailure(format!("{} request failed: {}", what, e)))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(Error::AnalysisFailure(format!(
            "{} service returned {}: {}",
            what, status, body
        )));
    }

    response
        .json::<T>()
        .await
        .map_err(|e| Error::AnalysisFailure(format!("Invalid {} response: {}", what, e)))
}

/// Scene analysis over HTTP
pub struct HttpVisionAnalyzer {
    client: Client,
    url: String,
}

impl HttpVisionAnalyzer {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl VisionAnalyzer for HttpVisionAnalyzer {
    async fn analyze(&self, frame: &Frame) -> Result<VisionAnalysis, Error> {
        post_frame(&self.client, &self.url, frame, "vision").await
    }
}

/// Face identity and attribute analysis over HTTP
pub struct HttpFaceAnalyzer {
    client: Client,
    url: String,
}

impl HttpFaceAnalyzer {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl FaceAnalyzer for HttpFaceAnalyzer {
    async fn analyze(&self, frame: &Frame) -> Result<FaceAnalysis, Error> {
        post_frame(&self.client, &self.url, frame, "face").await
    }
}
