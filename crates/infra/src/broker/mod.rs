//! Broker adapters. The in-memory broker lives in `ratewatch-events`; this
//! module holds transports that need infrastructure.

mod redis_streams;

pub use redis_streams::{RedisStreamsReader, RedisStreamsWriter, stream_key};
