//! User-supplied runtime configuration and compile-time tunables.
//!
//! Everything that genuinely varies per host application (the application name and
//! version reported to the Vulkan loader) lives in [`BackendConfig`]. Everything else
//! the spec calls out as a compile-time constant stays a `const` here, the way the
//! teacher library keeps its frame-in-flight count as a `pub const FRAMES_IN_FLIGHT`.

use std::time::Duration;

/// Configuration passed once, at backend creation time.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Name reported to the Vulkan loader as `pApplicationName`.
    pub application_info_name: String,
    pub version_major: u32,
    pub version_minor: u32,
    pub version_patch: u32,
}

impl BackendConfig {
    pub fn new(name: impl Into<String>, version: (u32, u32, u32)) -> Self {
        Self {
            application_info_name: name.into(),
            version_major: version.0,
            version_minor: version.1,
            version_patch: version.2,
        }
    }
}

/// Number of frames that may be in flight at once. Every per-frame resource is sized
/// to an array of this length.
pub const FRAMES_IN_FLIGHT: usize = 2;

/// Minimum descriptor count requested per descriptor type when a new pool is created.
pub const DESCRIPTOR_POOL_MIN_CAPACITY: u32 = 16;

/// Size in bytes of a single frame-lifetime allocator staging page.
pub const STAGING_PAGE_SIZE: u64 = 4 * 1024 * 1024;

/// Size of the pass-instance stack-group allocator, in instances, before it grows.
pub const PASS_INSTANCE_STACK_SIZE: usize = 256;

/// Timeout for `vkWaitForFences` on the current frame slot.
pub const FENCE_WAIT_TIMEOUT: Duration = Duration::from_secs(2);

/// Timeout for `vkAcquireNextImageKHR`.
pub const IMAGE_ACQUIRE_TIMEOUT: Duration = Duration::from_millis(500);

/// How long the main thread sleeps between polls while waiting for an EXECUTION-state
/// compilation request to finish during cancellation.
pub const COMPILATION_WAIT_SLEEP: Duration = Duration::from_micros(200);

/// Above this many barriers in a single recorded step, barriers are heap-allocated
/// instead of using an inline `SmallVec`-style stack buffer.
pub const MAX_INLINE_BARRIERS: usize = 16;

/// Number of frames a secondary command buffer array may sit below its high-water
/// mark before its backing storage is shrunk.
pub const COMMAND_BUFFER_SHRINK_THRESHOLD_FRAMES: u32 = 30;
