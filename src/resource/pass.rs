//! Pass declarations and their static (pass-to-pass) dependency edges.

use ash::vk;
use parking_lot::Mutex;

use crate::resource::{PassId, PassInstanceId};

/// Describes one attachment a pass renders into.
#[derive(Debug, Clone)]
pub struct AttachmentDescription {
    pub format: vk::Format,
    pub is_depth_stencil: bool,
    /// True if this attachment is a swap-chain surface image rather than an owned image.
    pub is_surface: bool,
}

/// A render pass declaration: its attachments and the other passes it depends on.
/// Dependency edges here are pass-level; the submission pipeline lifts them to
/// instance-level dependencies each frame (§4.2 step 3c).
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Pass {
    name: String,
    attachments: Vec<AttachmentDescription>,
    dependencies: Mutex<Vec<PassId>>,
    dependants: Mutex<Vec<PassId>>,
    /// This frame's instances of this pass, replacing the teacher's intrusive
    /// `first_instance` linked-list head with a plain vector of generational keys.
    instances_this_frame: Mutex<Vec<PassInstanceId>>,
}

impl Pass {
    pub fn new(name: impl Into<String>, attachments: Vec<AttachmentDescription>) -> Self {
        Self {
            name: name.into(),
            attachments,
            dependencies: Mutex::new(Vec::new()),
            dependants: Mutex::new(Vec::new()),
            instances_this_frame: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attachments(&self) -> &[AttachmentDescription] {
        &self.attachments
    }

    pub fn writes_surface(&self) -> bool {
        self.attachments.iter().any(|a| a.is_surface)
    }

    /// Declare that `self` must run after `dependency`. Guarded by
    /// `pass_static_dependency_lock` in the concurrency design.
    pub fn add_dependency(&self, dependency: PassId) {
        self.dependencies.lock().push(dependency);
    }

    pub fn dependencies(&self) -> Vec<PassId> {
        self.dependencies.lock().clone()
    }

    pub fn add_dependant(&self, dependant: PassId) {
        self.dependants.lock().push(dependant);
    }

    pub fn dependants(&self) -> Vec<PassId> {
        self.dependants.lock().clone()
    }

    pub fn push_instance(&self, instance: PassInstanceId) {
        self.instances_this_frame.lock().push(instance);
    }

    pub fn instances_this_frame(&self) -> Vec<PassInstanceId> {
        self.instances_this_frame.lock().clone()
    }

    /// Reset per-frame bookkeeping after the submission pipeline finishes sorting
    /// (§4.2 step 3c, end of loop).
    pub fn clear_frame_state(&self) {
        self.instances_this_frame.lock().clear();
    }
}
