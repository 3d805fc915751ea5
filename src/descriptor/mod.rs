//! Descriptor-set pool allocation.

pub mod pool;
