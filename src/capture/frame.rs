use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::error::Error;

/// One 8-bit grayscale camera frame.
///
/// Pixel data is shared behind an `Arc`, so a snapshot handed to the event
/// pipeline is a cheap clone and can never observe later frames.
#[derive(Clone)]
pub struct Frame {
    pub id: Uuid,
    pub captured_at: DateTime<Utc>,
    /// Monotonic capture instant, used for cooldown arithmetic
    pub monotonic: Instant,
    pub width: u32,
    pub height: u32,
    data: Arc<[u8]>,
}

impl Frame {
    /// Create a frame stamped with the current time
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self, Error> {
        Self::with_times(width, height, data, Utc::now(), Instant::now())
    }

    /// Create a frame with explicit wall-clock and monotonic timestamps
    pub fn with_times(
        width: u32,
        height: u32,
        data: Vec<u8>,
        captured_at: DateTime<Utc>,
        monotonic: Instant,
    ) -> Result<Self, Error> {
        let expected = width as usize * height as usize;
        if data.len() != expected {
            return Err(Error::Capture(format!(
                "frame buffer holds {} bytes, expected {} for {}x{}",
                data.len(),
                expected,
                width,
                height
            )));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            captured_at,
            monotonic,
            width,
            height,
            data: Arc::from(data),
        })
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Immutable copy for one pipeline run
    pub fn snapshot(&self) -> Frame {
        self.clone()
    }

    /// Encode as binary PGM (P5)
    pub fn to_pgm(&self) -> Vec<u8> {
        let header = format!("P5\n{} {}\n255\n", self.width, self.height);
        let mut out = Vec::with_capacity(header.len() + self.data.len());
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(&self.data);
        out
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("id", &self.id)
            .field("captured_at", &self.captured_at)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

/// Anything that can hand out the current camera frame.
///
/// `next_frame` may block. An `Error::Capture` ends monitoring.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<Frame, Error>;
}
