// =============================================================================
// Position tracker module (E) — §4.5
// =============================================================================

pub mod model;
pub mod tracker;

pub use model::{PositionChange, TrackedPosition};
pub use tracker::{PositionTracker, WalletPollResult};
