pub mod change;
pub mod gate;

pub use change::ChangeScorer;
pub use gate::{CooldownState, GateDecision, MotionGate};
