//! Fixed-length temporal windows over frame sequences.
//!
//! A window ends at an exclusive index and reaches back `num_frames` elements.
//! When it would start before the first frame, the first frame is repeated to
//! fill the gap, so every window has exactly `num_frames` entries.

use crate::errors::{Result, TrainingError};

/// Returns the `num_frames` elements preceding `end_idx`, left-padded with
/// copies of `data[0]` when the window would begin before the sequence.
///
/// `end_idx` is exclusive and must not exceed `data.len()`.
pub fn prev_frames_zero_bounded<T: Clone>(
    data: &[T],
    end_idx: usize,
    num_frames: usize,
) -> Result<Vec<T>> {
    if num_frames == 0 {
        return Ok(Vec::new());
    }
    if end_idx > data.len() {
        return Err(TrainingError::invalid_argument(format!(
            "window end {} is past the sequence end {}",
            end_idx,
            data.len()
        )));
    }
    let Some(first) = data.first() else {
        return Err(TrainingError::invalid_argument(
            "cannot pad from empty sequence",
        ));
    };

    let mut window = Vec::with_capacity(num_frames);
    if num_frames > end_idx {
        let missing = num_frames - end_idx;
        window.extend(std::iter::repeat(first).take(missing).cloned());
        window.extend_from_slice(&data[..end_idx]);
    } else {
        window.extend_from_slice(&data[end_idx - num_frames..end_idx]);
    }
    Ok(window)
}

/// Signed entry point for callers that carry frame counts as integers read
/// from configuration or arithmetic that may go negative.
pub fn prev_frames_signed<T: Clone>(data: &[T], end_idx: i64, num_frames: i64) -> Result<Vec<T>> {
    if num_frames < 0 {
        return Err(TrainingError::invalid_argument(format!(
            "num_frames must be non-negative (got {})",
            num_frames
        )));
    }
    if end_idx < 0 {
        return Err(TrainingError::invalid_argument(format!(
            "window end must be non-negative (got {})",
            end_idx
        )));
    }
    prev_frames_zero_bounded(data, end_idx as usize, num_frames as usize)
}

/// Indices of the frames a window covers, with padding positions mapped to 0.
///
/// Useful when frames live on disk and only the selection is needed.
pub fn window_indices(len: usize, end_idx: usize, num_frames: usize) -> Result<Vec<usize>> {
    let positions: Vec<usize> = (0..len).collect();
    prev_frames_zero_bounded(&positions, end_idx, num_frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_window_needs_no_padding() {
        let window = prev_frames_zero_bounded(&[5, 6, 7, 8], 4, 2).unwrap();
        assert_eq!(window, vec![7, 8]);
    }

    #[test]
    fn underflow_repeats_first_frame() {
        let window = prev_frames_zero_bounded(&[5, 6, 7, 8], 2, 5).unwrap();
        assert_eq!(window, vec![5, 5, 5, 5, 6]);
    }

    #[test]
    fn single_element_sequence() {
        let window = prev_frames_zero_bounded(&[9], 1, 3).unwrap();
        assert_eq!(window, vec![9, 9, 9]);
    }

    #[test]
    fn zero_frames_is_empty() {
        assert!(prev_frames_zero_bounded(&[1, 2, 3], 2, 0).unwrap().is_empty());
        let empty: [u8; 0] = [];
        assert!(prev_frames_zero_bounded(&empty, 0, 0).unwrap().is_empty());
    }

    #[test]
    fn end_at_start_is_all_padding() {
        let window = prev_frames_zero_bounded(&["a", "b"], 0, 3).unwrap();
        assert_eq!(window, vec!["a", "a", "a"]);
    }

    #[test]
    fn length_always_matches_request() {
        let data: Vec<u32> = (10..17).collect();
        for end in 0..=data.len() {
            for frames in 0..12 {
                let window = prev_frames_zero_bounded(&data, end, frames).unwrap();
                assert_eq!(window.len(), frames, "end={end} frames={frames}");
                if frames > 0 && end > 0 {
                    assert_eq!(window.last(), Some(&data[end - 1]));
                }
            }
        }
    }

    #[test]
    fn input_is_left_untouched() {
        let data = vec![String::from("x"), String::from("y")];
        let _ = prev_frames_zero_bounded(&data, 1, 4).unwrap();
        assert_eq!(data, vec!["x".to_string(), "y".to_string()]);
    }

    #[test]
    fn empty_sequence_cannot_pad() {
        let empty: Vec<i32> = Vec::new();
        let err = prev_frames_zero_bounded(&empty, 0, 2).unwrap_err();
        assert!(matches!(err, TrainingError::InvalidArgument(msg) if msg.contains("empty")));
    }

    #[test]
    fn end_past_sequence_is_rejected() {
        let err = prev_frames_zero_bounded(&[1, 2], 3, 1).unwrap_err();
        assert!(matches!(err, TrainingError::InvalidArgument(_)));
    }

    #[test]
    fn negative_frame_count_is_rejected() {
        let err = prev_frames_signed(&[1, 2, 3], 2, -1).unwrap_err();
        assert!(matches!(err, TrainingError::InvalidArgument(_)));
        assert_eq!(prev_frames_signed(&[1, 2, 3], 2, 3).unwrap(), vec![1, 1, 2]);
    }

    #[test]
    fn indices_map_padding_to_first_frame() {
        assert_eq!(window_indices(5, 2, 4).unwrap(), vec![0, 0, 0, 1]);
        assert_eq!(window_indices(5, 5, 2).unwrap(), vec![3, 4]);
    }
}
