//! Sweep expansion
//!
//! Under multirun every override with more than one value is a sweep axis.
//! The job list is the Cartesian product of the axes, first axis varying
//! slowest. Overrides keep their command-line positions in every job so
//! the merge order does not depend on the sweep.

use plab_override::Override;

use crate::error::CompositionError;

/// Largest number of jobs one sweep may expand into
pub const MAX_SWEEP_JOBS: usize = 1_000_000;

/// Expand overrides into one override list per job.
///
/// Without multirun the single list is returned unchanged; a multi-value
/// override then assigns its values as one list. A grid larger than
/// [`MAX_SWEEP_JOBS`] is rejected before anything is allocated.
pub fn expand(overrides: &[Override], multirun: bool) -> Result<Vec<Vec<Override>>, CompositionError> {
    if !multirun {
        return Ok(vec![overrides.to_vec()]);
    }
    let count = job_count(overrides, multirun)
        .filter(|&n| n <= MAX_SWEEP_JOBS)
        .ok_or(CompositionError::SweepTooLarge { limit: MAX_SWEEP_JOBS })?;

    let pinned: Vec<Override> = overrides
        .iter()
        .map(|ov| match ov.values.as_slice() {
            [single] if ov.sweep => ov.with_value(single.clone()),
            _ => ov.clone(),
        })
        .collect();

    let axes: Vec<usize> = pinned
        .iter()
        .enumerate()
        .filter(|(_, ov)| ov.is_sweep_axis())
        .map(|(idx, _)| idx)
        .collect();

    let mut outputs = Vec::with_capacity(count);
    expand_grid(&pinned, &axes, pinned.clone(), &mut outputs);
    Ok(outputs)
}

/// Number of jobs [`expand`] produces, `None` if it does not fit in `usize`.
pub fn job_count(overrides: &[Override], multirun: bool) -> Option<usize> {
    if !multirun {
        return Some(1);
    }
    overrides
        .iter()
        .filter(|ov| ov.is_sweep_axis())
        .try_fold(1usize, |acc, ov| acc.checked_mul(ov.values.len()))
}

fn expand_grid(
    overrides: &[Override],
    axes: &[usize],
    current: Vec<Override>,
    outputs: &mut Vec<Vec<Override>>,
) {
    let Some((&axis, rest)) = axes.split_first() else {
        outputs.push(current);
        return;
    };
    for value in &overrides[axis].values {
        let mut next = current.clone();
        next[axis] = overrides[axis].with_value(value.clone());
        expand_grid(overrides, rest, next, outputs);
    }
}
