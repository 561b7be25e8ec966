pub mod frame;
pub mod test_pattern;

pub use frame::{Frame, FrameSource};
pub use test_pattern::TestPatternSource;
