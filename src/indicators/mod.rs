// Technical indicators module
// Bollinger Bands on top of SMA and sample standard deviation

pub mod bollinger;
pub mod moving_average;

pub use bollinger::{band_position, BollingerBands, IndicatorSample};
pub use moving_average::{calculate_sma, calculate_std_dev};

/// Outcome of an indicator computation
///
/// `NotReady` is the expected answer while the window is still filling; it is
/// a value, not an error.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Readiness<T> {
    Ready(T),
    NotReady { available: usize, required: usize },
}

impl<T> Readiness<T> {
    pub fn ready(self) -> Option<T> {
        match self {
            Readiness::Ready(value) => Some(value),
            Readiness::NotReady { .. } => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready(_))
    }
}
