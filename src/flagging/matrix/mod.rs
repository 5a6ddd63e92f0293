// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Rule evaluation for matrix (2D) views.

#[cfg(test)]
mod tests;

use std::collections::BTreeSet;

use log::{debug, trace, warn};
use ndarray::prelude::*;
use ndarray::Zip;

use super::{
    command::CommandScope,
    pass::{channel_runs, Evaluation, FlagContext, PassOutcome, PassState},
    rules::{Line, MatrixRule, MatrixTest, Rule, RuleKind},
};
use crate::{
    constants::NUM_QUADRANTS,
    math::{is_valid, median, median_and_mad},
    view::{AxisData, Coordinate, MatrixView},
};

/// Run all `rules`, in order, over a matrix view. The view itself is not
/// modified; the returned outcome contains the updated flags.
pub fn flag_matrix_view<'a>(
    view: &'a MatrixView,
    description: &'a str,
    rules: &[MatrixRule],
    ctx: &FlagContext<'a>,
) -> PassOutcome<Ix2> {
    let state = PassState::new(view.data.clone(), view.flag.clone());
    let scope = CommandScope::new(&view.meta, ctx);
    let mut eval = Evaluation::new(
        description,
        state,
        scope,
        vec![view.x.name.as_str(), view.y.name.as_str()],
        exclusion_mask(view, ctx),
    );

    for (i_rule, rule) in rules.iter().enumerate() {
        let kind = rule.kind();
        if !eval.start_rule(i_rule, kind, rule.minsample, ctx.skip_fully_flagged) {
            continue;
        }
        let num_before = eval.num_flags();

        match rule.test {
            MatrixTest::MaxAbs { limit } => {
                let mask = eval.state.data.mapv(|d| d.abs() > limit);
                flag_points(&mut eval, view, mask, kind);
            }

            MatrixTest::MinAbs { limit } => {
                let mask = eval.state.data.mapv(|d| d.abs() < limit);
                flag_points(&mut eval, view, mask, kind);
            }

            MatrixTest::Nmedian { lo_limit, hi_limit } => {
                nmedian(&mut eval, view, lo_limit, hi_limit)
            }

            MatrixTest::Outlier { limit }
            | MatrixTest::HighOutlier { limit }
            | MatrixTest::LowOutlier { limit } => outlier(&mut eval, view, kind, limit),

            MatrixTest::TooManyFlags {
                axis,
                limit,
                excess_limit,
            } => too_many_flags(&mut eval, view, axis, limit, excess_limit),

            MatrixTest::TooManyEntirelyFlagged { axis, limit } => {
                too_many_entirely_flagged(&mut eval, view, axis, limit)
            }

            MatrixTest::BadAntenna {
                limit,
                frac_limit,
                number_limit,
            } => bad_antenna(&mut eval, view, limit, frac_limit, number_limit),

            MatrixTest::BadQuadrant {
                limit,
                frac_limit,
                baseline_frac_limit,
            } => bad_quadrant(&mut eval, view, limit, frac_limit, baseline_frac_limit),
        }

        trace!(
            "{description}: rule '{kind}' produced {} flag commands",
            eval.num_flags() - num_before
        );
    }

    eval.into_outcome()
}

/// Mark the points whose channel is excluded.
fn exclusion_mask(view: &MatrixView, ctx: &FlagContext) -> Option<Array2<bool>> {
    if ctx.exclusions.is_empty() {
        return None;
    }
    let spw = view.meta.spw;
    match (&view.x.data, &view.y.data) {
        (AxisData::Channel(chans), _) => Some(Array2::from_shape_fn(view.data.dim(), |(i, _)| {
            ctx.exclusions.is_channel_excluded(spw, chans[i])
        })),
        (_, AxisData::Channel(chans)) => Some(Array2::from_shape_fn(view.data.dim(), |(_, j)| {
            ctx.exclusions.is_channel_excluded(spw, chans[j])
        })),
        _ => None,
    }
}

/// Emit commands for individual points. Runs of adjacent channels are
/// described by a single command.
fn emit_points(eval: &mut Evaluation<Ix2>, view: &MatrixView, new: &Array2<bool>, reason: RuleKind) {
    let (nx, ny) = new.dim();
    if view.x.is_channel() {
        for j in 0..ny {
            for run in channel_runs(&view.x, (0..nx).filter(|&i| new[[i, j]])) {
                eval.emit(
                    &[view.x.span(*run.start(), *run.end()), view.y.coord(j)],
                    reason,
                );
            }
        }
    } else if view.y.is_channel() {
        for i in 0..nx {
            for run in channel_runs(&view.y, (0..ny).filter(|&j| new[[i, j]])) {
                eval.emit(
                    &[view.x.coord(i), view.y.span(*run.start(), *run.end())],
                    reason,
                );
            }
        }
    } else {
        for ((i, j), &n) in new.indexed_iter() {
            if n {
                eval.emit(&[view.x.coord(i), view.y.coord(j)], reason);
            }
        }
    }
}

/// Flag the points of `mask`, emitting a command per point (or channel run).
fn flag_points(eval: &mut Evaluation<Ix2>, view: &MatrixView, mask: Array2<bool>, reason: RuleKind) {
    let (new, _) = eval.commit(mask);
    emit_points(eval, view, &new, reason);
}

/// Flag the region `mask`, described as a whole by `coords`. If exclusions
/// prevented part of the region being flagged, the remaining points are
/// described individually instead.
fn flag_region(
    eval: &mut Evaluation<Ix2>,
    view: &MatrixView,
    mask: Array2<bool>,
    coords: &[Coordinate],
    reason: RuleKind,
) {
    let (new, vetoed) = eval.commit(mask);
    if !new.iter().any(|&n| n) {
        return;
    }
    if vetoed {
        emit_points(eval, view, &new, reason);
    } else {
        eval.emit(coords, reason);
    }
}

fn lane<T>(a: &Array2<T>, line: Line, k: usize) -> ArrayView1<T> {
    match line {
        Line::Row => a.row(k),
        Line::Column => a.column(k),
    }
}

fn num_lines(dim: (usize, usize), line: Line) -> usize {
    match line {
        Line::Row => dim.0,
        Line::Column => dim.1,
    }
}

fn line_mask(dim: (usize, usize), line: Line, k: usize) -> Array2<bool> {
    let mut mask = Array2::from_elem(dim, false);
    match line {
        Line::Row => mask.row_mut(k).fill(true),
        Line::Column => mask.column_mut(k).fill(true),
    }
    mask
}

fn line_coord(view: &MatrixView, line: Line, k: usize) -> Coordinate {
    match line {
        Line::Row => view.x.coord(k),
        Line::Column => view.y.coord(k),
    }
}

fn nmedian(
    eval: &mut Evaluation<Ix2>,
    view: &MatrixView,
    lo_limit: Option<f64>,
    hi_limit: Option<f64>,
) {
    let Some(med) = median(&eval.state.valid_values()) else {
        return;
    };
    let mask = eval.state.data.mapv(|d| {
        lo_limit.map(|lo| d < lo * med).unwrap_or(false)
            || hi_limit.map(|hi| d > hi * med).unwrap_or(false)
    });
    flag_points(eval, view, mask, RuleKind::Nmedian);
}

fn outlier(eval: &mut Evaluation<Ix2>, view: &MatrixView, kind: RuleKind, limit: f64) {
    let Some((med, mad)) = median_and_mad(&eval.state.valid_values()) else {
        return;
    };
    let threshold = limit * mad;
    trace!(
        "{}: median {med}, MAD {mad}, threshold {threshold}",
        eval.description
    );
    let mask = eval.state.data.mapv(|d| match kind {
        RuleKind::HighOutlier => d - med > threshold,
        RuleKind::LowOutlier => med - d > threshold,
        _ => (d - med).abs() > threshold,
    });
    flag_points(eval, view, mask, kind);
}

fn too_many_flags(
    eval: &mut Evaluation<Ix2>,
    view: &MatrixView,
    line: Line,
    limit: Option<f64>,
    excess_limit: Option<usize>,
) {
    let dim = eval.state.flag.dim();
    let n = num_lines(dim, line);
    let counts: Vec<usize> = (0..n)
        .map(|k| lane(&eval.state.flag, line, k).iter().filter(|&&f| f).count())
        .collect();
    let counts_f64: Vec<f64> = counts.iter().map(|&c| c as f64).collect();
    let median_count = median(&counts_f64).unwrap_or(0.0);

    for (k, &count) in counts.iter().enumerate() {
        let len = lane(&eval.state.flag, line, k).len();
        if len == 0 || count == len {
            continue;
        }
        // Either condition is enough.
        let too_big_fraction = limit
            .map(|l| count as f64 / len as f64 > l)
            .unwrap_or(false);
        let too_many_over_median = excess_limit
            .map(|e| count as f64 > median_count + e as f64)
            .unwrap_or(false);
        if too_big_fraction || too_many_over_median {
            debug!(
                "{}: {line} {k} has {count}/{len} flagged (median count {median_count})",
                eval.description
            );
            flag_region(
                eval,
                view,
                line_mask(dim, line, k),
                &[line_coord(view, line, k)],
                RuleKind::TooManyFlags,
            );
        }
    }
}

fn too_many_entirely_flagged(
    eval: &mut Evaluation<Ix2>,
    view: &MatrixView,
    line: Line,
    limit: f64,
) {
    let dim = eval.state.flag.dim();
    let n = num_lines(dim, line);
    if n == 0 {
        return;
    }
    let num_entirely_flagged = (0..n)
        .filter(|&k| lane(&eval.state.flag, line, k).iter().all(|&f| f))
        .count();
    let fraction = num_entirely_flagged as f64 / n as f64;
    if fraction >= limit {
        debug!(
            "{}: {num_entirely_flagged}/{n} {line}s are entirely flagged; flagging everything",
            eval.description
        );
        flag_region(
            eval,
            view,
            Array2::from_elem(dim, true),
            &[],
            RuleKind::TooManyEntirelyFlagged,
        );
    }
}

fn bad_antenna(
    eval: &mut Evaluation<Ix2>,
    view: &MatrixView,
    limit: f64,
    frac_limit: Option<f64>,
    number_limit: Option<usize>,
) {
    let line = match (&view.x.data, &view.y.data) {
        (AxisData::Antenna(_), _) => Line::Row,
        (_, AxisData::Antenna(_)) => Line::Column,
        _ => {
            warn!(
                "{}: the 'bad_antenna' rule needs an antenna axis; skipping",
                eval.description
            );
            return;
        }
    };
    let Some((med, mad)) = median_and_mad(&eval.state.valid_values()) else {
        return;
    };
    let threshold = limit * mad;
    let low = Zip::from(&eval.state.data)
        .and(&eval.state.flag)
        .map_collect(|&d, &f| is_valid(d, f) && med - d > threshold);

    let dim = eval.state.flag.dim();
    for k in 0..num_lines(dim, line) {
        let num_valid = Zip::from(lane(&eval.state.data, line, k))
            .and(lane(&eval.state.flag, line, k))
            .fold(0usize, |acc, &d, &f| if is_valid(d, f) { acc + 1 } else { acc });
        let num_low = Zip::from(lane(&low, line, k))
            .and(lane(&eval.state.flag, line, k))
            .fold(0usize, |acc, &l, &f| if l && !f { acc + 1 } else { acc });
        if num_valid == 0 || num_low == 0 {
            continue;
        }

        let too_big_fraction = frac_limit
            .map(|l| num_low as f64 / num_valid as f64 > l)
            .unwrap_or(false);
        let too_many = number_limit.map(|l| num_low > l).unwrap_or(false);
        if too_big_fraction || too_many {
            debug!(
                "{}: antenna {:?} has {num_low}/{num_valid} low outliers",
                eval.description,
                line_coord(view, line, k)
            );
            let mut low_mask = line_mask(dim, line, k);
            low_mask.zip_mut_with(&low, |m, &l| *m = *m && l);
            flag_points(eval, view, low_mask, RuleKind::LowOutlier);
            flag_region(
                eval,
                view,
                line_mask(dim, line, k),
                &[line_coord(view, line, k)],
                RuleKind::BadAntenna,
            );
        }
    }
}

/// Count the valid points and the unflagged outliers of a region.
fn count_region(state: &PassState<Ix2>, outliers: &Array2<bool>, region: &Array2<bool>) -> (usize, usize) {
    let mut num_valid = 0;
    let mut num_outliers = 0;
    Zip::from(region)
        .and(&state.data)
        .and(&state.flag)
        .and(outliers)
        .for_each(|&r, &d, &f, &o| {
            if r && is_valid(d, f) {
                num_valid += 1;
                if o {
                    num_outliers += 1;
                }
            }
        });
    (num_valid, num_outliers)
}

fn bad_quadrant(
    eval: &mut Evaluation<Ix2>,
    view: &MatrixView,
    limit: f64,
    frac_limit: f64,
    baseline_frac_limit: f64,
) {
    // Find the channel and baseline axes.
    let (chan_axis, baselines, chan_is_x) = match (&view.x.data, &view.y.data) {
        (AxisData::Channel(_), AxisData::Baseline(b)) => (&view.x, b, true),
        (AxisData::Baseline(b), AxisData::Channel(_)) => (&view.y, b, false),
        _ => {
            warn!(
                "{}: the 'bad_quadrant' rule needs channel and baseline axes; skipping",
                eval.description
            );
            return;
        }
    };
    let Some((med, mad)) = median_and_mad(&eval.state.valid_values()) else {
        return;
    };
    let threshold = limit * mad;
    let outliers = eval.state.data.mapv(|d| (d - med).abs() > threshold);

    let num_chans = chan_axis.len();
    let quadrants: Vec<(usize, usize)> = (0..NUM_QUADRANTS)
        .map(|q| (q * num_chans / NUM_QUADRANTS, (q + 1) * num_chans / NUM_QUADRANTS))
        .filter(|(start, end)| end > start)
        .collect();
    let dim = eval.state.flag.dim();
    let region = |(start, end): (usize, usize), bls: &[usize]| {
        Array2::from_shape_fn(dim, |(i, j)| {
            let (chan, bl) = if chan_is_x { (i, j) } else { (j, i) };
            chan >= start && chan < end && bls.contains(&bl)
        })
    };

    let antennas: BTreeSet<u32> = baselines.iter().flat_map(|&(a, b)| [a, b]).collect();
    for ant in antennas {
        let bls: Vec<usize> = baselines
            .iter()
            .enumerate()
            .filter(|&(_, &(a, b))| a == ant || b == ant)
            .map(|(i, _)| i)
            .collect();

        for &quadrant in &quadrants {
            let chans = chan_axis.span(quadrant.0, quadrant.1 - 1);
            let ant_region = region(quadrant, &bls);
            let (num_valid, num_outliers) = count_region(&eval.state, &outliers, &ant_region);
            if num_valid == 0 {
                continue;
            }

            if num_outliers as f64 / num_valid as f64 > frac_limit {
                debug!(
                    "{}: antenna {ant} has {num_outliers}/{num_valid} outliers in channels {chans:?}",
                    eval.description
                );
                flag_region(
                    eval,
                    view,
                    ant_region,
                    &[Coordinate::Antenna(ant), chans],
                    RuleKind::BadQuadrant,
                );
                continue;
            }

            // The antenna as a whole is OK; look at its baselines.
            for &bl in &bls {
                let bl_region = region(quadrant, &[bl]);
                let (num_valid, num_outliers) = count_region(&eval.state, &outliers, &bl_region);
                if num_valid > 0 && num_outliers as f64 / num_valid as f64 > baseline_frac_limit
                {
                    let (a, b) = baselines[bl];
                    flag_region(
                        eval,
                        view,
                        bl_region,
                        &[Coordinate::Baseline(a, b), chans],
                        RuleKind::BadQuadrant,
                    );
                }
            }
        }
    }
}
