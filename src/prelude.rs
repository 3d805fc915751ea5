//! Common imports for consumers of this crate: `use vkforge::prelude::*;` pulls in
//! the backend entry point, configuration, resource ids and the types most record-time
//! calls pass around.

pub use crate::backend::BackendSystem;
pub use crate::compiler::Priority;
pub use crate::core::collaborators::{ApplicationSystem, PlatformInterface, WindowHandle, WindowInfo, WindowLifecycleBinding};
pub use crate::core::config::BackendConfig;
pub use crate::core::error::{AbortOnCriticalError, CriticalErrorHook, Error};
pub use crate::allocator::memory_type::MemoryType;
pub use crate::read_back::{ReadBackState, ReadBackStatus, ReadBackTarget};
pub use crate::resource::buffer::BufferKind;
pub use crate::resource::frame_buffer::AttachmentRef;
pub use crate::resource::pass::AttachmentDescription;
pub use crate::resource::pipeline::GraphicsPipelineDesc;
pub use crate::resource::{BufferId, FrameBufferId, ImageId, ParameterSetId, ParameterSetLayoutId, PassId, PassInstanceId, PipelineId};
pub use crate::schedule::{BufferFlush, BufferUpload, ImageCopy, ImageUpload, MipGeneration};
pub use crate::wsi::surface::{BlitRequest, Surface};
