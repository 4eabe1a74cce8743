//! Attack wave detection: many scanner-shaped requests from one IP within a
//! short window.
//!
//! [`scanner`] holds the stateless request heuristic; [`AttackWaveDetector`]
//! counts qualifying requests per IP in a bucketed sliding window, reports a
//! wave once the threshold is reached and then stays quiet for that IP until
//! the minimum time between events has passed.

pub mod detector;
pub mod scanner;

pub use detector::{AttackWaveDetector, DetectorConfig};
pub use scanner::is_web_scanner;
