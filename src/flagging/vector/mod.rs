// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Rule evaluation for vector (1D) views, which are usually spectra.

#[cfg(test)]
mod tests;

use log::{debug, trace};
use ndarray::prelude::*;

use super::{
    command::CommandScope,
    pass::{channel_runs, Evaluation, FlagContext, PassOutcome, PassState},
    rules::{Rule, RuleKind, VectorRule, VectorTest},
};
use crate::{
    constants::SHARPS_WING_FACTOR,
    math::{is_valid, median, median_and_mad},
    view::{AxisData, VectorView},
};

/// Run all `rules`, in order, over a vector view. The view itself is not
/// modified; the returned outcome contains the updated flags.
pub fn flag_vector_view<'a>(
    view: &'a VectorView,
    description: &'a str,
    rules: &[VectorRule],
    ctx: &FlagContext<'a>,
) -> PassOutcome<Ix1> {
    let state = PassState::new(view.data.clone(), view.flag.clone());
    let scope = CommandScope::new(&view.meta, ctx);
    let excluded = match &view.axis.data {
        AxisData::Channel(chans) if !ctx.exclusions.is_empty() => Some(
            chans
                .iter()
                .map(|&c| ctx.exclusions.is_channel_excluded(view.meta.spw, c))
                .collect::<Array1<bool>>(),
        ),
        _ => None,
    };
    let mut eval = Evaluation::new(
        description,
        state,
        scope,
        vec![view.axis.name.as_str()],
        excluded,
    );

    for (i_rule, rule) in rules.iter().enumerate() {
        let kind = rule.kind();
        if !eval.start_rule(i_rule, kind, rule.minsample, ctx.skip_fully_flagged) {
            continue;
        }
        let num_before = eval.num_flags();

        match rule.test {
            VectorTest::Edges { limit } => edges(&mut eval, view, limit),

            VectorTest::MaxAbs { limit } => {
                let mask = eval.state.data.mapv(|d| d.abs() > limit);
                flag_points(&mut eval, view, mask, kind);
            }

            VectorTest::MinAbs { limit } => {
                let mask = eval.state.data.mapv(|d| d.abs() < limit);
                flag_points(&mut eval, view, mask, kind);
            }

            VectorTest::Nmedian { lo_limit, hi_limit } => {
                if let Some(med) = median(&eval.state.valid_values()) {
                    let mask = eval.state.data.mapv(|d| {
                        lo_limit.map(|lo| d < lo * med).unwrap_or(false)
                            || hi_limit.map(|hi| d > hi * med).unwrap_or(false)
                    });
                    flag_points(&mut eval, view, mask, kind);
                }
            }

            VectorTest::Outlier { limit } => {
                if let Some((med, mad)) = median_and_mad(&eval.state.valid_values()) {
                    let mask = eval.state.data.mapv(|d| (d - med).abs() > limit * mad);
                    flag_points(&mut eval, view, mask, kind);
                }
            }

            VectorTest::Sharps { limit } => sharps(&mut eval, view, limit),

            VectorTest::Diffmad { limit, nchan_limit } => {
                diffmad(&mut eval, view, limit, nchan_limit)
            }

            VectorTest::Tmf {
                frac_limit,
                nchan_limit,
            } => tmf(&mut eval, view, frac_limit, nchan_limit),
        }

        trace!(
            "{description}: rule '{kind}' produced {} flag commands",
            eval.num_flags() - num_before
        );
    }

    eval.into_outcome()
}

fn emit_points(eval: &mut Evaluation<Ix1>, view: &VectorView, new: &Array1<bool>, reason: RuleKind) {
    let indices = new.indexed_iter().filter(|&(_, &n)| n).map(|(i, _)| i);
    for run in channel_runs(&view.axis, indices) {
        eval.emit(&[view.axis.span(*run.start(), *run.end())], reason);
    }
}

fn flag_points(eval: &mut Evaluation<Ix1>, view: &VectorView, mask: Array1<bool>, reason: RuleKind) {
    let (new, _) = eval.commit(mask);
    emit_points(eval, view, &new, reason);
}

/// Flag everything left in the view with a single command, unless exclusions
/// got in the way.
fn flag_everything(eval: &mut Evaluation<Ix1>, view: &VectorView, reason: RuleKind) {
    let (new, vetoed) = eval.commit(Array1::from_elem(view.data.len(), true));
    if !new.iter().any(|&n| n) {
        return;
    }
    if vetoed {
        emit_points(eval, view, &new, reason);
    } else {
        eval.emit(&[], reason);
    }
}

/// The indices of valid points.
fn valid_indices(state: &PassState<Ix1>) -> Vec<usize> {
    state
        .data
        .iter()
        .zip(state.flag.iter())
        .enumerate()
        .filter(|&(_, (&d, &f))| is_valid(d, f))
        .map(|(i, _)| i)
        .collect()
}

/// Differences between neighbouring channels. `None` where either channel is
/// invalid.
fn channel_diffs(state: &PassState<Ix1>) -> Vec<Option<f64>> {
    let n = state.data.len();
    (0..n.saturating_sub(1))
        .map(|i| {
            if is_valid(state.data[i], state.flag[i])
                && is_valid(state.data[i + 1], state.flag[i + 1])
            {
                Some(state.data[i + 1] - state.data[i])
            } else {
                None
            }
        })
        .collect()
}

fn edges(eval: &mut Evaluation<Ix1>, view: &VectorView, limit: f64) {
    let valid = valid_indices(&eval.state);
    if valid.len() < 2 {
        return;
    }
    // diffs[k] is between valid[k] and valid[k + 1].
    let diffs: Vec<f64> = valid
        .windows(2)
        .map(|w| (eval.state.data[w[1]] - eval.state.data[w[0]]).abs())
        .collect();
    let Some(med) = median(&diffs) else {
        return;
    };
    let threshold = limit * med;

    let mut left = 0;
    while left < diffs.len() && diffs[left] > threshold {
        left += 1;
    }
    let mut right = diffs.len();
    while right > left && diffs[right - 1] > threshold {
        right -= 1;
    }
    if left == 0 && right == diffs.len() {
        return;
    }

    let mut mask = Array1::from_elem(view.data.len(), false);
    for &i in valid[..left].iter().chain(valid[right + 1..].iter()) {
        mask[i] = true;
    }
    debug!(
        "{}: trimming {} channels from the low edge and {} from the high edge",
        eval.description,
        left,
        valid.len() - right - 1
    );
    flag_points(eval, view, mask, RuleKind::Edges);
}

fn sharps(eval: &mut Evaluation<Ix1>, view: &VectorView, limit: f64) {
    let diffs: Vec<Option<f64>> = channel_diffs(&eval.state)
        .into_iter()
        .map(|d| d.map(f64::abs))
        .collect();
    let abs_diffs: Vec<f64> = diffs.iter().flatten().copied().collect();
    let Some(med) = median(&abs_diffs) else {
        return;
    };
    let wing_threshold = SHARPS_WING_FACTOR * med;
    let exceeds = |k: usize, threshold: f64| diffs[k].map(|d| d > threshold).unwrap_or(false);

    let mut mask = Array1::from_elem(view.data.len(), false);
    for i in 0..diffs.len() {
        if !exceeds(i, limit) {
            continue;
        }
        mask[i] = true;
        mask[i + 1] = true;

        // Broaden into the wings.
        let mut j = i;
        while j > 0 && exceeds(j - 1, wing_threshold) {
            j -= 1;
            mask[j] = true;
        }
        let mut k = i + 1;
        while k < diffs.len() && exceeds(k, wing_threshold) {
            k += 1;
            mask[k] = true;
        }
    }
    flag_points(eval, view, mask, RuleKind::Sharps);
}

fn diffmad(eval: &mut Evaluation<Ix1>, view: &VectorView, limit: f64, nchan_limit: usize) {
    let diffs = channel_diffs(&eval.state);
    let signed: Vec<f64> = diffs.iter().flatten().copied().collect();
    let Some((med, mad)) = median_and_mad(&signed) else {
        return;
    };
    let threshold = limit * mad;
    let outliers: Vec<usize> = diffs
        .iter()
        .enumerate()
        .filter(|(_, d)| d.map(|d| (d - med).abs() > threshold).unwrap_or(false))
        .map(|(i, _)| i)
        .collect();
    if outliers.is_empty() {
        return;
    }

    if outliers.len() >= nchan_limit {
        debug!(
            "{}: {} derivative outliers (limit {nchan_limit}); flagging the whole spectrum",
            eval.description,
            outliers.len()
        );
        flag_everything(eval, view, RuleKind::Diffmad);
    } else {
        let mut mask = Array1::from_elem(view.data.len(), false);
        for i in outliers {
            mask[i] = true;
            mask[i + 1] = true;
        }
        flag_points(eval, view, mask, RuleKind::Diffmad);
    }
}

fn tmf(
    eval: &mut Evaluation<Ix1>,
    view: &VectorView,
    frac_limit: Option<f64>,
    nchan_limit: Option<usize>,
) {
    let n = eval.state.flag.len();
    let num_flagged = eval.state.flag.iter().filter(|&&f| f).count();
    if n == 0 || num_flagged == n {
        return;
    }
    let too_big_fraction = frac_limit
        .map(|l| num_flagged as f64 / n as f64 > l)
        .unwrap_or(false);
    let too_many = nchan_limit.map(|l| num_flagged > l).unwrap_or(false);
    if too_big_fraction || too_many {
        debug!(
            "{}: {num_flagged}/{n} channels already flagged; flagging the rest",
            eval.description
        );
        flag_everything(eval, view, RuleKind::Tmf);
    }
}
