//! `vkforge`: a frame-oriented Vulkan render backend.
//!
//! The entry point is [`backend::BackendSystem`]: it owns the Vulkan instance and
//! device, the global resource registry, and the frame scheduler that drives
//! `next_frame`. Everything else in this crate is a collaborator it wires together.

#[macro_use]
extern crate derivative;
#[macro_use]
extern crate log;

pub mod allocator;
pub mod backend;
pub mod command;
pub mod compiler;
pub mod core;
pub mod deferred_destroy;
pub mod descriptor;
pub mod frame;
pub mod frame_allocator;
pub mod pass_graph;
pub mod prelude;
pub mod read_back;
pub mod resource;
pub mod schedule;
pub mod submission;
pub mod sync;
pub mod util;
pub mod wsi;
