//! Topologically sorts this frame's pass instances by their dependency edges,
//! recovering deterministically from cycles instead of deadlocking (§4.2 step 3c, §4.3).

use std::collections::HashSet;

use slotmap::SlotMap;

use crate::resource::PassInstanceId;
use crate::resource::pass_instance::PassInstance;

/// Result of sorting one frame's pass instances.
pub struct SortResult {
    /// Submission order: every instance's transitive dependencies precede it.
    pub order: Vec<PassInstanceId>,
    /// Whether cycle recovery had to kick in. Logged as an error at the call site;
    /// surfaced here too so tests can assert on it without scraping logs.
    pub cycle_recovered: bool,
}

/// Sort `ids` (this frame's live pass instances) into submission order.
///
/// `writes_surface` reports whether an instance's frame-buffer attaches a surface —
/// used only to break ties during cycle recovery, preferring to force-advance an
/// instance that does *not* write a surface (§4.3).
pub fn topological_sort(instances: &SlotMap<PassInstanceId, PassInstance>, ids: &[PassInstanceId], writes_surface: impl Fn(PassInstanceId) -> bool) -> SortResult {
    let mut remaining: HashSet<PassInstanceId> = ids.iter().copied().collect();
    let mut available: Vec<PassInstanceId> = ids.iter().copied().filter(|&id| instances[id].is_available()).collect();
    let mut order = Vec::with_capacity(ids.len());
    let mut cycle_recovered = false;

    while !remaining.is_empty() {
        if available.is_empty() {
            let pick = remaining
                .iter()
                .copied()
                .min_by_key(|&id| (instances[id].dependencies_left(), writes_surface(id)))
                .expect("remaining is non-empty");
            instances[pick].force_available();
            available.push(pick);
            cycle_recovered = true;
            error!("pass graph has a cycle; forcing instance available to recover");
        }

        let current = available.remove(0);
        if !remaining.remove(&current) {
            continue;
        }
        order.push(current);

        for dependant in instances[current].dependants() {
            if remaining.contains(&dependant) && instances[dependant].decrement() == 0 {
                available.push(dependant);
            }
        }
    }

    SortResult { order, cycle_recovered }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk;
    use crate::resource::FrameBufferId;

    fn dummy_instance(pass: crate::resource::PassId) -> PassInstance {
        PassInstance::new(pass, FrameBufferId::default(), vk::CommandBuffer::null())
    }

    #[test]
    fn dependency_diamond_resolves_to_one_valid_order() {
        let mut instances: SlotMap<PassInstanceId, PassInstance> = SlotMap::with_key();
        let pass = crate::resource::PassId::default();
        let a = instances.insert(dummy_instance(pass));
        let b = instances.insert(dummy_instance(pass));
        let c = instances.insert(dummy_instance(pass));
        let d = instances.insert(dummy_instance(pass));

        {
            let inst_a = instances.get_mut(a).unwrap();
            inst_a.add_dependant(b);
            inst_a.add_dependant(c);
        }
        instances.get_mut(b).unwrap().add_dependency(a);
        instances.get_mut(c).unwrap().add_dependency(a);
        instances.get_mut(d).unwrap().add_dependency(b);
        instances.get_mut(d).unwrap().add_dependency(c);
        instances.get_mut(b).unwrap().add_dependant(d);
        instances.get_mut(c).unwrap().add_dependant(d);

        let result = topological_sort(&instances, &[a, b, c, d], |_| false);
        assert!(!result.cycle_recovered);
        assert_eq!(result.order[0], a);
        assert_eq!(result.order[3], d);
        assert!(result.order[1] == b || result.order[1] == c);
        assert!(result.order[2] == b || result.order[2] == c);
    }

    #[test]
    fn cyclic_graph_recovers_and_terminates() {
        let mut instances: SlotMap<PassInstanceId, PassInstance> = SlotMap::with_key();
        let pass = crate::resource::PassId::default();
        let a = instances.insert(dummy_instance(pass));
        let b = instances.insert(dummy_instance(pass));

        instances.get_mut(a).unwrap().add_dependency(b);
        instances.get_mut(b).unwrap().add_dependency(a);
        instances.get_mut(a).unwrap().add_dependant(b);
        instances.get_mut(b).unwrap().add_dependant(a);

        let result = topological_sort(&instances, &[a, b], |_| false);
        assert!(result.cycle_recovered);
        assert_eq!(result.order.len(), 2);
    }
}
