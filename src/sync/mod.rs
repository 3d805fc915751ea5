//! Fences and semaphores used for frame synchronization.

pub mod fence;
pub mod semaphore;
