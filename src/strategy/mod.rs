// Signal generation: Bollinger band position -> Long / Short / None
pub mod signals;

pub use signals::{evaluate, validate_thresholds};
