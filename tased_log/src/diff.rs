use std::ops::{Bound, RangeBounds};

/// Convert a frame range into `[start, end)`, where an unbounded end is `u32::MAX`.
pub(crate) fn frame_bounds(range: &impl RangeBounds<u32>) -> (u32, u32) {
    let start = match range.start_bound() {
        Bound::Included(&start) => start,
        Bound::Excluded(&start) => start.saturating_add(1),
        Bound::Unbounded => 0,
    };
    let end = match range.end_bound() {
        Bound::Included(&end) => end.saturating_add(1),
        Bound::Excluded(&end) => end,
        Bound::Unbounded => u32::MAX,
    };
    (start, end)
}

/// The diff rule shared by all logs.
///
/// Frames in the range that exist in both logs are compared with `differs`. If the lengths
/// differ, the first frame past the shorter log is a difference when it lies in the range.
pub(crate) fn first_difference(
    len: u32,
    other_len: u32,
    range: impl RangeBounds<u32>,
    mut differs: impl FnMut(u32) -> bool,
) -> Option<u32> {
    let (start, end) = frame_bounds(&range);
    let min_len = len.min(other_len);
    let max_len = len.max(other_len);

    if let Some(frame) = (start..end.min(min_len)).find(|&frame| differs(frame)) {
        return Some(frame);
    }
    if len != other_len {
        let frame = min_len.max(start);
        if frame < end && frame < max_len {
            return Some(frame);
        }
    }
    None
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_length_mismatch() {
        assert_eq!(first_difference(5, 8, .., |_| false), Some(5));
        assert_eq!(first_difference(5, 8, 6.., |_| false), Some(6));
        assert_eq!(first_difference(5, 8, ..5, |_| false), None);
        assert_eq!(first_difference(5, 8, 8.., |_| false), None);
    }

    #[test]
    fn test_empty_and_out_of_range() {
        assert_eq!(first_difference(5, 5, 3..3, |_| true), None);
        assert_eq!(first_difference(5, 5, 100..200, |_| true), None);
        assert_eq!(first_difference(0, 0, .., |_| true), None);
        assert_eq!(first_difference(5, 5, 2.., |frame| frame == 4), Some(4));
    }
}
