use crate::capture::Frame;

/// Frame-to-frame change scorer.
///
/// The score is the fraction of pixels whose luma moved by more than
/// `pixel_delta` since the previous frame, so it always lies in `[0, 1]`.
pub struct ChangeScorer {
    pixel_delta: u8,
    previous: Option<Frame>,
}

impl ChangeScorer {
    pub fn new(pixel_delta: u8) -> Self {
        Self {
            pixel_delta,
            previous: None,
        }
    }

    pub fn score(&mut self, frame: &Frame) -> f64 {
        let score = match &self.previous {
            Some(prev) if prev.width == frame.width && prev.height == frame.height => {
                changed_fraction(prev.data(), frame.data(), self.pixel_delta)
            }
            _ => 0.0,
        };
        self.previous = Some(frame.clone());
        score
    }
}

fn changed_fraction(prev: &[u8], next: &[u8], delta: u8) -> f64 {
    if next.is_empty() {
        return 0.0;
    }
    let changed = prev
        .iter()
        .zip(next)
        .filter(|(a, b)| a.abs_diff(**b) > delta)
        .count();
    changed as f64 / next.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(pixels: Vec<u8>) -> Frame {
        Frame::new(2, 2, pixels).unwrap()
    }

    #[test]
    fn first_frame_scores_zero() {
        let mut scorer = ChangeScorer::new(10);
        assert_eq!(scorer.score(&frame(vec![0, 0, 0, 0])), 0.0);
    }

    #[test]
    fn counts_pixels_beyond_delta() {
        let mut scorer = ChangeScorer::new(10);
        scorer.score(&frame(vec![100, 100, 100, 100]));
        // one pixel moves by exactly the delta and is ignored
        let score = scorer.score(&frame(vec![200, 110, 0, 100]));
        assert!((score - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn dimension_change_scores_zero() {
        let mut scorer = ChangeScorer::new(10);
        scorer.score(&frame(vec![0; 4]));
        let wide = Frame::new(4, 1, vec![255; 4]).unwrap();
        assert_eq!(scorer.score(&wide), 0.0);
    }
}
