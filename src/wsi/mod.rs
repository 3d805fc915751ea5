//! Swap-chain surfaces: window-attached presentation targets.

pub mod surface;
pub mod swapchain;
