//! Per-frame instances of a [`Pass`](crate::resource::pass::Pass).

use std::sync::atomic::{AtomicUsize, Ordering};

use ash::vk;
use parking_lot::Mutex;

use crate::resource::{FrameBufferId, PassId, PassInstanceId};

/// A single frame's execution of a pass: which frame-buffer it targets, the secondary
/// command buffer already recorded for it, and the dependency edges that determine
/// submission order (§4.3).
#[derive(Derivative)]
#[derivative(Debug)]
pub struct PassInstance {
    pass: PassId,
    frame_buffer: FrameBufferId,
    commands: vk::CommandBuffer,
    /// Other instances this one must follow.
    dependencies: Vec<PassInstanceId>,
    /// Instances that follow this one; decremented when this instance is submitted.
    dependants: Mutex<Vec<PassInstanceId>>,
    dependencies_left: AtomicUsize,
}

impl PassInstance {
    pub fn new(pass: PassId, frame_buffer: FrameBufferId, commands: vk::CommandBuffer) -> Self {
        Self {
            pass,
            frame_buffer,
            commands,
            dependencies: Vec::new(),
            dependants: Mutex::new(Vec::new()),
            dependencies_left: AtomicUsize::new(0),
        }
    }

    pub fn pass(&self) -> PassId {
        self.pass
    }

    pub fn frame_buffer(&self) -> FrameBufferId {
        self.frame_buffer
    }

    pub fn commands(&self) -> vk::CommandBuffer {
        self.commands
    }

    /// Add a dependency edge and bump `dependencies_left`. Called once per edge when
    /// pass-level dependencies are lifted to instance-level (§4.2 step 3c).
    pub fn add_dependency(&mut self, dependency: PassInstanceId) {
        self.dependencies.push(dependency);
        self.dependencies_left.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dependencies(&self) -> &[PassInstanceId] {
        &self.dependencies
    }

    pub fn add_dependant(&self, dependant: PassInstanceId) {
        self.dependants.lock().push(dependant);
    }

    pub fn dependants(&self) -> Vec<PassInstanceId> {
        self.dependants.lock().clone()
    }

    pub fn dependencies_left(&self) -> usize {
        self.dependencies_left.load(Ordering::Relaxed)
    }

    pub fn is_available(&self) -> bool {
        self.dependencies_left() == 0
    }

    /// Decrement and return the new count. Used both for normal completion and for
    /// cycle-recovery forcing.
    pub fn decrement(&self) -> usize {
        self.dependencies_left.fetch_sub(1, Ordering::Relaxed).saturating_sub(1)
    }

    /// Forcibly clear the counter during cycle recovery (§4.3).
    pub fn force_available(&self) {
        self.dependencies_left.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{FrameBufferId, PassId, PassInstanceId};
    use slotmap::SlotMap;

    fn dummy_ids(n: usize) -> Vec<PassInstanceId> {
        let mut map: SlotMap<PassInstanceId, ()> = SlotMap::with_key();
        (0..n).map(|_| map.insert(())).collect()
    }

    fn instance() -> PassInstance {
        PassInstance::new(PassId::default(), FrameBufferId::default(), vk::CommandBuffer::null())
    }

    #[test]
    fn fresh_instance_has_no_dependencies_and_is_available() {
        let inst = instance();
        assert!(inst.is_available());
        assert_eq!(inst.dependencies_left(), 0);
    }

    #[test]
    fn adding_dependencies_makes_instance_unavailable_until_decremented() {
        let mut inst = instance();
        let deps = dummy_ids(2);
        inst.add_dependency(deps[0]);
        inst.add_dependency(deps[1]);
        assert!(!inst.is_available());
        assert_eq!(inst.dependencies_left(), 2);

        assert_eq!(inst.decrement(), 1);
        assert!(!inst.is_available());
        assert_eq!(inst.decrement(), 0);
        assert!(inst.is_available());
    }

    #[test]
    fn force_available_clears_outstanding_dependencies() {
        let mut inst = instance();
        for id in dummy_ids(3) {
            inst.add_dependency(id);
        }
        inst.force_available();
        assert!(inst.is_available());
    }

    #[test]
    fn dependants_round_trip_through_the_mutex() {
        let inst = instance();
        let dependants = dummy_ids(2);
        inst.add_dependant(dependants[0]);
        inst.add_dependant(dependants[1]);
        assert_eq!(inst.dependants(), dependants);
    }
}
