//! Helpers for published time step values.

use itertools::Itertools;

/// Relative tolerance used when comparing time values.
pub const DEFAULT_TIME_TOLERANCE: f64 = 1e-6;

/// True if `a` and `b` agree to within `tolerance`, relative to the larger of
/// their magnitudes (and absolute below a magnitude of one, so zero compares
/// sensibly).
pub fn within_tolerance(a: f64, b: f64, tolerance: f64) -> bool {
    let scale = a.abs().max(b.abs()).max(1.0);
    (a - b).abs() <= tolerance * scale
}

/// Maps a requested time onto an index into `steps` (sorted ascending).
///
/// A step matching within tolerance wins. Otherwise the last step not after
/// `time` is used, clamped to the first and last step.
pub fn resolve_time_step(steps: &[f64], time: f64, tolerance: f64) -> Option<usize> {
    if steps.is_empty() {
        return None;
    }
    if let Some(index) = steps.iter().position(|&step| within_tolerance(step, time, tolerance)) {
        return Some(index);
    }
    let after = steps.partition_point(|&step| step <= time);
    Some(after.saturating_sub(1))
}

/// Sorted union of several step lists, collapsing values that agree within
/// tolerance.
pub fn merge_time_steps<'a>(lists: impl IntoIterator<Item = &'a [f64]>, tolerance: f64) -> Vec<f64> {
    lists
        .into_iter()
        .flatten()
        .copied()
        .sorted_by(f64::total_cmp)
        .dedup_by(|a, b| within_tolerance(*a, *b, tolerance))
        .collect()
}

/// `[first, last]` of a sorted step list.
pub fn time_range(steps: &[f64]) -> Option<[f64; 2]> {
    match (steps.first(), steps.last()) {
        (Some(first), Some(last)) => Some([*first, *last]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn exact_step_wins_over_floor() {
        let steps: Vec<f64> = (0..10).map(|i| i as f64 * 0.1).collect();
        // just below 0.3, within tolerance: must be step 3, not 2
        assert_eq!(resolve_time_step(&steps, 0.3 - 1e-9, DEFAULT_TIME_TOLERANCE), Some(3));
        assert_eq!(resolve_time_step(&steps, 0.3 + 1e-9, DEFAULT_TIME_TOLERANCE), Some(3));
        assert_eq!(resolve_time_step(&steps, 0.35, DEFAULT_TIME_TOLERANCE), Some(3));
    }

    #[test]
    fn large_times_use_relative_tolerance() {
        let steps = [1.0e6, 2.0e6];
        assert_eq!(resolve_time_step(&steps, 2.0e6 - 1.0, DEFAULT_TIME_TOLERANCE), Some(1));
        assert_eq!(resolve_time_step(&steps, 2.0e6 - 10.0, DEFAULT_TIME_TOLERANCE), Some(0));
    }

    #[test]
    fn out_of_range_clamps() {
        let steps = [1.0, 2.0, 3.0];
        assert_eq!(resolve_time_step(&steps, -5.0, DEFAULT_TIME_TOLERANCE), Some(0));
        assert_eq!(resolve_time_step(&steps, 50.0, DEFAULT_TIME_TOLERANCE), Some(2));
        assert_eq!(resolve_time_step(&[], 1.0, DEFAULT_TIME_TOLERANCE), None);
    }

    #[test]
    fn merge_collapses_near_duplicates() {
        let a = [0.0, 1.0, 2.0];
        let b = [1.0 + 1e-9, 1.5, 3.0];
        let merged = merge_time_steps([&a[..], &b[..]], DEFAULT_TIME_TOLERANCE);
        assert_eq!(merged.len(), 5);
        assert_eq!(time_range(&merged), Some([0.0, 3.0]));
    }
}
