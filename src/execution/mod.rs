// Position execution module
pub mod candle_buffer;
pub mod executor;
pub mod pool;

pub use candle_buffer::CandleBuffer;
pub use executor::{CloseReason, ExecutorEvent, ExecutorState, ExitRules, PositionExecutor};
pub use pool::{ExecutorPool, SpawnResult};
