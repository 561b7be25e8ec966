use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::{Duration, Instant};

use super::frame::{Frame, FrameSource};
use crate::config::CameraConfig;
use crate::error::Error;

const NOISE_AMPLITUDE: i16 = 6;
const BLOCK_FRACTION: u32 = 4;

/// Synthetic camera: a static gradient with sensor noise and, every
/// `intrusion_every` frames, a bright block crossing the scene.
pub struct TestPatternSource {
    width: u32,
    height: u32,
    frame_interval: Duration,
    intrusion_every: u64,
    intrusion_len: u64,
    max_frames: Option<u64>,
    realtime: bool,
    produced: u64,
    last_emit: Option<Instant>,
    rng: StdRng,
}

impl TestPatternSource {
    pub fn new(config: &CameraConfig) -> Self {
        let fps = config.fps.max(1) as u64;
        let intrusion_every = (config.intrusion_interval_secs * fps).max(2);
        Self {
            width: config.width,
            height: config.height,
            frame_interval: Duration::from_millis(1000 / fps),
            intrusion_every,
            intrusion_len: (2 * fps).min(intrusion_every / 2).max(1),
            max_frames: config.max_frames,
            realtime: true,
            produced: 0,
            last_emit: None,
            rng: StdRng::seed_from_u64(0x0CA5C),
        }
    }

    /// Emit frames as fast as they are requested
    pub fn unpaced(mut self) -> Self {
        self.realtime = false;
        self
    }

    fn intrusion_offset(&self) -> Option<u64> {
        let phase = self.produced % self.intrusion_every;
        let start = self.intrusion_every.saturating_sub(self.intrusion_len);
        if self.produced >= self.intrusion_every / 2 && phase >= start {
            Some(phase - start)
        } else {
            None
        }
    }

    fn render(&mut self) -> Vec<u8> {
        let (w, h) = (self.width, self.height);
        let mut pixels = Vec::with_capacity(w as usize * h as usize);

        for y in 0..h {
            for x in 0..w {
                let base = ((x * 160) / w.max(1) + (y * 60) / h.max(1)) as i16 + 20;
                let noise = self.rng.gen_range(-NOISE_AMPLITUDE..=NOISE_AMPLITUDE);
                pixels.push((base + noise).clamp(0, 255) as u8);
            }
        }

        if let Some(step) = self.intrusion_offset() {
            let block_w = (w / BLOCK_FRACTION).max(1);
            let block_h = (h / 2).max(1);
            let travel = w.saturating_sub(block_w).max(1) as u64;
            let left = ((step * travel) / self.intrusion_len.max(1)) as u32;
            let top = h / 4;
            for y in top..(top + block_h).min(h) {
                for x in left..(left + block_w).min(w) {
                    pixels[(y * w + x) as usize] = 250;
                }
            }
        }

        pixels
    }

    fn pace(&mut self) {
        if !self.realtime {
            return;
        }
        if let Some(last) = self.last_emit {
            let elapsed = last.elapsed();
            if elapsed < self.frame_interval {
                std::thread::sleep(self.frame_interval - elapsed);
            }
        }
        self.last_emit = Some(Instant::now());
    }
}

impl FrameSource for TestPatternSource {
    fn next_frame(&mut self) -> Result<Frame, Error> {
        if let Some(max) = self.max_frames {
            if self.produced >= max {
                return Err(Error::Capture("end of stream".into()));
            }
        }

        self.pace();
        let pixels = self.render();
        self.produced += 1;
        Frame::new(self.width, self.height, pixels)
    }
}
