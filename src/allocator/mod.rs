//! GPU memory allocation: the heap classification used to pick upload strategies, the
//! `Allocator`/`Allocation` traits a caller may implement to bring their own allocator,
//! and the `gpu-allocator`-backed default.

pub mod default_allocator;
pub mod heap_kind;
pub mod memory_type;
pub mod traits;
