pub mod aggregator;
pub mod candle_buffer;
pub mod symbols;

pub use aggregator::{CandleAggregator, StreamSnapshot, StreamStatus};
pub use candle_buffer::Candle;
