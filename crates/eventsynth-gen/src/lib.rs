//! Synthetic event generation
//!
//! ```text
//! rng ──► synth::normal_event ─────────────┐
//!     └─► AnomalyPattern::generate (burst) ─┴─► assemble ──► Corpus (sorted by timestamp)
//! ```
//!
//! All randomness flows through a caller-provided [`rand::Rng`]; seeding it
//! (e.g. `StdRng::seed_from_u64`) together with a fixed
//! [`GenerateConfig::anchor`] makes a run reproducible.

pub mod assemble;
pub mod domains;
pub mod synth;

pub use assemble::{assemble, BurstSummary, Corpus, GenerateConfig, Population};
pub use synth::{normal_event, AnomalyBurst, AnomalyPattern};

#[derive(Debug, thiserror::Error)]
pub enum AssembleError {
    #[error("anomaly ratio must be within [0, 1], got {0}")]
    InvalidRatio(f64),
    #[error("user population must not be empty")]
    EmptyPopulation,
    #[error("lookback window must not be negative")]
    NegativeLookback,
}
