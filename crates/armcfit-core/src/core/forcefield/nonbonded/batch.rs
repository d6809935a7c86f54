use std::ops::Range;

/// Number of frames processed together so that no batch of distance blocks exceeds
/// `max_array_size` elements.
///
/// `block_size` is the element count of one frame's block (`|a| · width`). When every frame fits
/// at once the whole trajectory is a single batch; otherwise the step is
/// `max(1, max_array_size / block_size)`.
pub fn batch_step(frame_count: usize, block_size: usize, max_array_size: usize) -> usize {
    if block_size == 0 || frame_count.saturating_mul(block_size) <= max_array_size {
        frame_count.max(1)
    } else {
        (max_array_size / block_size).max(1)
    }
}

pub fn frame_batches(
    frame_count: usize,
    block_size: usize,
    max_array_size: usize,
) -> Vec<Range<usize>> {
    let step = batch_step(frame_count, block_size, max_array_size);
    (0..frame_count)
        .step_by(step)
        .map(|start| start..(start + step).min(frame_count))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn everything_in_one_batch_when_within_budget() {
        assert_eq!(frame_batches(10, 100, 1_000), vec![0..10]);
    }

    #[test]
    fn budget_splits_frames_into_equal_steps_with_remainder() {
        assert_eq!(batch_step(10, 100, 350), 3);
        assert_eq!(frame_batches(10, 100, 350), vec![0..3, 3..6, 6..9, 9..10]);
    }

    #[test]
    fn step_never_drops_below_one_frame() {
        assert_eq!(batch_step(4, 1_000, 10), 1);
        assert_eq!(frame_batches(3, 1_000, 10), vec![0..1, 1..2, 2..3]);
    }

    #[test]
    fn empty_block_is_a_single_batch() {
        assert_eq!(frame_batches(5, 0, 10), vec![0..5]);
    }
}
