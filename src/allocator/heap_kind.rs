//! Classification of a device's memory architecture, used to pick upload strategies.

use ash::vk;

/// Classifies a physical device's memory heap layout.
///
/// - [`HeapKind::Separate`] — there exists a device-local heap that is not host-visible
///   (a discrete GPU with its own VRAM). Staging through a host-visible heap is required.
/// - [`HeapKind::Unified`] — all device-local heaps are host-visible, but at least one is
///   not host-coherent (most integrated GPUs). Writes must be flushed explicitly.
/// - [`HeapKind::UnifiedCoherent`] — all device-local heaps are host-visible *and*
///   host-coherent. Staging can be skipped entirely.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum HeapKind {
    Separate,
    Unified,
    UnifiedCoherent,
}

impl HeapKind {
    /// Classify a device from its queried memory properties.
    pub fn classify(memory_properties: &vk::PhysicalDeviceMemoryProperties) -> Self {
        let heaps = &memory_properties.memory_heaps[..memory_properties.memory_heap_count as usize];
        let types = &memory_properties.memory_types[..memory_properties.memory_type_count as usize];

        let device_local_heap_indices: Vec<u32> = heaps
            .iter()
            .enumerate()
            .filter(|(_, heap)| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|(i, _)| i as u32)
            .collect();

        let heap_is_host_visible = |heap_index: u32| {
            types
                .iter()
                .any(|ty| ty.heap_index == heap_index && ty.property_flags.contains(vk::MemoryPropertyFlags::HOST_VISIBLE))
        };
        let heap_is_host_coherent = |heap_index: u32| {
            types
                .iter()
                .any(|ty| ty.heap_index == heap_index && ty.property_flags.contains(vk::MemoryPropertyFlags::HOST_COHERENT))
        };

        if device_local_heap_indices.iter().any(|&h| !heap_is_host_visible(h)) {
            return HeapKind::Separate;
        }
        if device_local_heap_indices.iter().any(|&h| !heap_is_host_coherent(h)) {
            return HeapKind::Unified;
        }
        HeapKind::UnifiedCoherent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn properties(heaps: &[(vk::MemoryHeapFlags,)], types: &[(u32, vk::MemoryPropertyFlags)]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties::default();
        props.memory_heap_count = heaps.len() as u32;
        for (i, (flags,)) in heaps.iter().enumerate() {
            props.memory_heaps[i].flags = *flags;
        }
        props.memory_type_count = types.len() as u32;
        for (i, (heap_index, flags)) in types.iter().enumerate() {
            props.memory_types[i].heap_index = *heap_index;
            props.memory_types[i].property_flags = *flags;
        }
        props
    }

    #[test]
    fn discrete_gpu_with_no_host_visible_device_local_heap_is_separate() {
        let props = properties(
            &[(vk::MemoryHeapFlags::DEVICE_LOCAL,), (vk::MemoryHeapFlags::empty(),)],
            &[(1, vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT)],
        );
        assert_eq!(HeapKind::classify(&props), HeapKind::Separate);
    }

    #[test]
    fn integrated_gpu_without_host_coherence_is_unified() {
        let props = properties(&[(vk::MemoryHeapFlags::DEVICE_LOCAL,)], &[(0, vk::MemoryPropertyFlags::HOST_VISIBLE)]);
        assert_eq!(HeapKind::classify(&props), HeapKind::Unified);
    }

    #[test]
    fn fully_coherent_unified_memory_is_unified_coherent() {
        let props = properties(
            &[(vk::MemoryHeapFlags::DEVICE_LOCAL,)],
            &[(0, vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT)],
        );
        assert_eq!(HeapKind::classify(&props), HeapKind::UnifiedCoherent);
    }
}
