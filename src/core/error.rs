//! Exposes the crate's error type

use std::sync::PoisonError;

use thiserror::Error;

/// Error type returned by fallible operations in this crate.
///
/// Fatal initialization and submission errors (see the error handling design) are not
/// represented as variants of this type returned up the call stack; those are reported
/// through the [`CriticalErrorHook`](crate::core::error::CriticalErrorHook) instead,
/// since by definition the process cannot recover from them.
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to load the Vulkan library.
    #[error("Failed to load Vulkan: {0}")]
    LoadFailed(ash::LoadingError),
    /// Generic Vulkan error type.
    #[error("Vulkan error: `{0}`")]
    VkError(ash::vk::Result),
    /// Vulkan allocation error.
    #[error("Vulkan allocation error: `{0}`")]
    AllocationError(gpu_allocator::AllocationError),
    /// No physical device matched the required queue and extension set.
    #[error("No physical device found matching requirements")]
    NoGPU,
    /// The selected device's surface format does not support TRANSFER | SAMPLED | RENDER usage.
    #[error("Device does not support the required usage flags on the designated surface format")]
    DeviceUnsupported,
    /// No queue family supports both graphics and transfer operations.
    #[error("No queue family supports graphics and transfer")]
    NoCapableQueue,
    /// A device was already selected; selecting a second device is a user error.
    #[error("A physical device was already selected")]
    DeviceAlreadySelected,
    /// Attempted an operation that requires an application-system collaborator, but none was registered.
    #[error("No application system registered")]
    NoApplicationSystem,
    /// No surface formats are supported at all.
    #[error("No supported surface formats found")]
    NoSurfaceFormat,
    /// No supported present mode could be found from the user's preference queue.
    #[error("No supported present mode found")]
    NoPresentMode,
    /// The pass graph contains a dependency cycle that could not be resolved without recovery.
    #[error("Pass graph contains a cycle (recovered)")]
    GraphHasCycle,
    /// Referenced a resource id that is no longer (or never was) live.
    #[error("Resource `{0}` not found")]
    ResourceNotFound(String),
    /// A buffer kind is not legal as the target of an upload.
    #[error("Buffer kind `{0:?}` is not a valid upload target")]
    IllegalUploadTarget(crate::resource::buffer::BufferKind),
    /// Named pipeline not registered.
    #[error("Pipeline `{0}` not found")]
    PipelineNotFound(String),
    /// A pipeline compilation request failed; the pipeline is permanently unusable.
    #[error("Pipeline `{0}` failed to compile")]
    CompilationFailed(String),
    /// A frame-buffer creation request referenced attachments of mismatched size.
    #[error("Frame-buffer attachments have mismatched dimensions")]
    MismatchedAttachments,
    /// A frame-buffer creation request had more than one surface attachment.
    #[error("Frame-buffer may only have a single surface attachment")]
    MultipleSurfaceAttachments,
    /// Image mip level out of range for a read-back or mip-generation request.
    #[error("Mip level {0} out of range")]
    MipOutOfRange(u32),
    /// Poisoned lock, generally unreachable unless a prior panic occurred while holding it.
    #[error("Poisoned lock")]
    PoisonError,
    /// Uncategorized error, used sparingly for conditions that don't warrant their own variant.
    #[error("{0}")]
    Uncategorized(&'static str),
}

impl From<ash::LoadingError> for Error {
    fn from(value: ash::LoadingError) -> Self {
        Error::LoadFailed(value)
    }
}

impl From<ash::vk::Result> for Error {
    fn from(value: ash::vk::Result) -> Self {
        Error::VkError(value)
    }
}

impl From<gpu_allocator::AllocationError> for Error {
    fn from(value: gpu_allocator::AllocationError) -> Self {
        Error::AllocationError(value)
    }
}

impl<T> From<PoisonError<T>> for Error {
    fn from(_: PoisonError<T>) -> Self {
        Error::PoisonError
    }
}

/// Collaborator invoked for unrecoverable errors (fatal initialization and submission
/// failures per the error handling design). The default implementation logs at `error!`
/// and aborts the process; a host embedding this crate behind a different process-lifetime
/// policy may substitute another implementation.
pub trait CriticalErrorHook: Send + Sync {
    /// Report a fatal error. Implementations are expected not to return.
    fn report(&self, message: &str) -> !;
}

/// Default [`CriticalErrorHook`] that logs and aborts the process.
#[derive(Debug, Default, Clone, Copy)]
pub struct AbortOnCriticalError;

impl CriticalErrorHook for AbortOnCriticalError {
    fn report(&self, message: &str) -> ! {
        error!("critical error, aborting: {message}");
        std::process::abort()
    }
}
