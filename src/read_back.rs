//! Read-back status handles and the list that tracks outstanding read-back requests
//! for a schedule slot (§3, §9).

use std::sync::Arc;

use parking_lot::Mutex;

use crate::resource::{BufferId, ImageId};
use crate::wsi::surface::Surface;

/// Where a scheduled read-back currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadBackState {
    Scheduled,
    Finished,
    Failed,
}

struct Inner {
    state: ReadBackState,
}

/// A reference-counted handle to a read-back's completion state. One clone is held
/// by the schedule that owns the request; the caller may hold another. The
/// underlying state is only actually freed from the active list once the caller's
/// clone is gone and the read-back has resolved (§3).
#[derive(Clone)]
pub struct ReadBackStatus(Arc<Mutex<Inner>>);

impl ReadBackStatus {
    fn new() -> Self {
        Self(Arc::new(Mutex::new(Inner { state: ReadBackState::Scheduled })))
    }

    pub fn state(&self) -> ReadBackState {
        self.0.lock().state
    }

    pub fn mark_finished(&self) {
        self.0.lock().state = ReadBackState::Finished;
    }

    pub fn mark_failed(&self) {
        self.0.lock().state = ReadBackState::Failed;
    }

    fn is_resolved(&self) -> bool {
        !matches!(self.state(), ReadBackState::Scheduled)
    }

    /// True once the only remaining strong reference is the list's own clone held in
    /// [`ReadBackList`] — i.e. the caller has dropped (or never kept) their handle.
    fn only_list_holds_ref(&self) -> bool {
        Arc::strong_count(&self.0) <= 1
    }
}

/// Target of a scheduled read-back, validated when the submission pipeline's
/// read-back phase runs (§4.2 step 4).
pub enum ReadBackTarget {
    Surface { surface: Arc<Surface> },
    Buffer { source: BufferId, destination: BufferId },
    Image { source: ImageId, mip: u32, destination: BufferId },
}

pub struct ReadBackRequest {
    pub target: ReadBackTarget,
    pub status: ReadBackStatus,
}

struct Node {
    status: ReadBackStatus,
    prev: Option<usize>,
    next: Option<usize>,
}

/// A doubly-linked list of outstanding read-back statuses, backed by a `Vec` slab
/// instead of raw pointers. [`ReadBackList::cleanup`] relinks around any node whose
/// status has resolved and whose caller-side handle has been dropped —
/// `previous.next = next`, never the self-assignment `previous.next = previous` the
/// original source's traversal had (§9).
#[derive(Default)]
pub struct ReadBackList {
    nodes: Vec<Option<Node>>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl ReadBackList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new scheduled read-back and return its status handle (one clone
    /// kept here, one returned to the caller).
    pub fn schedule(&mut self) -> ReadBackStatus {
        let status = ReadBackStatus::new();
        let index = self.nodes.len();
        self.nodes.push(Some(Node { status: status.clone(), prev: self.tail, next: None }));
        match self.tail {
            Some(tail) => self.nodes[tail].as_mut().expect("tail node present").next = Some(index),
            None => self.head = Some(index),
        }
        self.tail = Some(index);
        status
    }

    fn remove(&mut self, index: usize) {
        let node = self.nodes[index].take().expect("remove called on a missing node");
        match node.prev {
            Some(prev) => self.nodes[prev].as_mut().expect("prev node present").next = node.next,
            None => self.head = node.next,
        }
        match node.next {
            Some(next) => self.nodes[next].as_mut().expect("next node present").prev = node.prev,
            None => self.tail = node.prev,
        }
    }

    /// Walk the list once, removing every node that has resolved and whose caller
    /// handle is gone.
    pub fn cleanup(&mut self) {
        let mut current = self.head;
        while let Some(index) = current {
            let next = self.nodes[index].as_ref().expect("live node").next;
            let should_remove = {
                let node = self.nodes[index].as_ref().expect("live node");
                node.status.is_resolved() && node.status.only_list_holds_ref()
            };
            if should_remove {
                self.remove(index);
            }
            current = next;
        }
    }

    /// Statuses currently tracked, in list order, for callers that need to poll all
    /// outstanding read-backs (e.g. the submission pipeline's read-back phase).
    pub fn iter(&self) -> impl Iterator<Item = &ReadBackStatus> {
        let mut current = self.head;
        std::iter::from_fn(move || {
            let index = current?;
            let node = self.nodes[index].as_ref().expect("live node");
            current = node.next;
            Some(&node.status)
        })
    }

    fn order(&self) -> Vec<usize> {
        let mut current = self.head;
        let mut order = Vec::new();
        while let Some(index) = current {
            order.push(index);
            current = self.nodes[index].as_ref().expect("live node").next;
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleanup_relinks_around_removed_status() {
        let mut list = ReadBackList::new();
        let first = list.schedule();
        let middle = list.schedule();
        let last = list.schedule();

        // Caller drops its handle to `middle` and it resolves; `first` and `last`
        // stay referenced (simulated by keeping their returned handles alive).
        middle.mark_finished();
        drop(middle);

        list.cleanup();

        let order = list.order();
        assert_eq!(order.len(), 2, "middle node should have been unlinked");

        // Walking head -> tail must still reach both surviving nodes in order,
        // which only holds if `previous.next` was relinked to `next` and not left
        // pointing at itself.
        let statuses: Vec<_> = list.iter().map(ReadBackStatus::state).collect();
        assert_eq!(statuses, vec![ReadBackState::Scheduled, ReadBackState::Scheduled]);

        drop(first);
        drop(last);
    }

    #[test]
    fn unresolved_status_is_kept_even_without_caller_ref() {
        let mut list = ReadBackList::new();
        let status = list.schedule();
        drop(status);
        list.cleanup();
        assert_eq!(list.order().len(), 1, "a still-scheduled read-back must not be cleaned up early");
    }
}
