// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Some helper mathematics.
//!
//! All statistics here ignore NaNs and infinities; callers are expected to
//! have already removed flagged values (see [`valid_values`]).


use std::ops::RangeInclusive;

use ndarray::{ArrayView, Dimension, Zip};

use crate::constants::MAD_TO_SIGMA;

/// Get the median of the supplied values. The slice is reordered in the
/// process. An even number of values has a median that is the mean of the two
/// middle values. `None` is returned if there are no finite values.
pub(crate) fn median_in_place(values: &mut [f64]) -> Option<f64> {
    let n = values.len();
    if n == 0 {
        return None;
    }

    let mid = n / 2;
    let (lower, upper, _) = values.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
    let upper = *upper;
    if n % 2 == 1 {
        Some(upper)
    } else {
        // The largest value of the lower half is the other middle value.
        let lower = lower
            .iter()
            .copied()
            .max_by(|a, b| a.total_cmp(b))
            .unwrap_or(upper);
        Some((lower + upper) / 2.0)
    }
}

/// Get the median of the finite supplied values.
pub fn median(values: &[f64]) -> Option<f64> {
    let mut finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    median_in_place(&mut finite)
}

/// Get the median and the (sigma-scaled) median absolute deviation of the
/// finite supplied values.
pub fn median_and_mad(values: &[f64]) -> Option<(f64, f64)> {
    let mut finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    let med = median_in_place(&mut finite)?;
    finite.iter_mut().for_each(|v| *v = (*v - med).abs());
    let mad = median_in_place(&mut finite)?;
    Some((med, mad * MAD_TO_SIGMA))
}

/// Is this point usable for statistics?
#[inline]
pub(crate) fn is_valid(value: f64, flagged: bool) -> bool {
    !flagged && value.is_finite()
}

/// Collect the values that are unflagged and finite.
pub fn valid_values<D: Dimension>(data: ArrayView<f64, D>, flag: ArrayView<bool, D>) -> Vec<f64> {
    let mut out = Vec::with_capacity(data.len());
    Zip::from(&data).and(&flag).for_each(|&d, &f| {
        if is_valid(d, f) {
            out.push(d);
        }
    });
    out
}

/// Group ascendingly-sorted indices into inclusive runs of consecutive
/// indices, e.g. [1, 2, 3, 7, 9, 10] -> [1..=3, 7..=7, 9..=10].
pub fn contiguous_runs<I>(indices: I) -> Vec<RangeInclusive<usize>>
where
    I: IntoIterator<Item = usize>,
{
    let mut runs: Vec<RangeInclusive<usize>> = vec![];
    for i in indices {
        match runs.last_mut() {
            Some(run) if *run.end() + 1 == i => *run = *run.start()..=i,
            Some(run) if *run.end() >= i => (),
            _ => runs.push(i..=i),
        }
    }
    runs
}
