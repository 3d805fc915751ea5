//! Command pools and the primary/secondary command buffers allocated from them.

pub mod buffer;
pub mod pool;
