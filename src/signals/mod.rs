// =============================================================================
// Signal generator module (G) — §4.6
// =============================================================================

pub mod generator;
pub mod model;

pub use generator::{GeneratorOutcome, SignalGenerator, SignalGeneratorConfig};
pub use model::{Signal, TraderContribution};
