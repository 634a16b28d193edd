//! Tag allocation for expected message exchanges.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::na::Tag;

/// Atomic monotonic tag source wrapping at a configured maximum.
///
/// Tags pair the pre-posted response receive with the response send on the
/// other side; wrapping keeps them inside the range the NA supports.
pub struct TagAllocator {
    tag: AtomicU32,
    max_tag: Tag,
}

impl TagAllocator {
    /// Create an allocator producing tags in `[0, max_tag]`.
    pub fn new(max_tag: Tag) -> Self {
        Self {
            tag: AtomicU32::new(0),
            max_tag,
        }
    }

    /// Next tag in the wrapping sequence.
    ///
    /// Compare-and-swap the counter from `max_tag` to 0; on success the tag
    /// is 0, otherwise the incremented counter value.
    pub fn next(&self) -> Tag {
        if self
            .tag
            .compare_exchange(self.max_tag, 0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            0
        } else {
            self.tag.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_sequence_wraps_at_max() {
        let tags = TagAllocator::new(3);
        let seq: Vec<Tag> = (0..5).map(|_| tags.next()).collect();
        assert_eq!(seq, vec![1, 2, 3, 0, 1]);
    }

    #[test]
    fn test_tags_stay_in_range() {
        let max = 7;
        let tags = TagAllocator::new(max);
        for _ in 0..100 {
            assert!(tags.next() <= max);
        }
    }

    #[test]
    fn test_wrap_count_matches_max() {
        // Starting from 0 the counter returns to 0 after exactly max + 1 calls.
        let max = 5;
        let tags = TagAllocator::new(max);
        for expected in 1..=max {
            assert_eq!(tags.next(), expected);
        }
        assert_eq!(tags.next(), 0);
    }
}
