// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! State shared by all rules during a single pass over a view.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::RangeInclusive;

use log::{debug, warn};
use ndarray::{Array, Dimension, Zip};
use serde::{Deserialize, Serialize};

use super::{
    command::{AntennaNames, CommandScope, FlagCommand},
    rules::RuleKind,
};
use crate::{
    math::{contiguous_runs, valid_values},
    view::{Axis, ChannelRange, Coordinate},
};

/// Coordinates that must never be flagged, e.g. channels containing known
/// science lines.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Exclusions {
    /// Excluded channel ranges, keyed by spectral window.
    #[serde(default)]
    pub channels: BTreeMap<u32, Vec<ChannelRange>>,
}

impl Exclusions {
    pub fn is_empty(&self) -> bool {
        self.channels.values().all(|c| c.is_empty())
    }

    /// Exclude the inclusive channel range `first..=last` of a spectral window.
    pub fn exclude_channels(&mut self, spw: u32, first: u32, last: u32) {
        self.channels
            .entry(spw)
            .or_default()
            .push(ChannelRange::new(first, last));
    }

    pub fn is_channel_excluded(&self, spw: u32, chan: u32) -> bool {
        self.channels
            .get(&spw)
            .map(|ranges| ranges.iter().any(|r| r.contains(chan)))
            .unwrap_or(false)
    }
}

/// A record that a rule would have flagged some points, but didn't because
/// they are excluded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionNotice {
    pub description: String,
    pub rule: RuleKind,
    pub num_rejected: usize,
}

/// Per-run options that affect how rules are evaluated and how flag commands
/// are emitted.
#[derive(Debug, Clone, Copy)]
pub struct FlagContext<'a> {
    pub skip_fully_flagged: bool,
    pub antenna_names: &'a AntennaNames,
    pub extend_fields: bool,
    pub extend_baseband: bool,
    /// Spectral windows keyed by baseband.
    pub basebands: &'a BTreeMap<u32, BTreeSet<u32>>,
    pub exclusions: &'a Exclusions,
}

/// The data, flags and flag reasons of a view being evaluated. Rules mutate
/// this in place, so later rules observe the flags set by earlier ones.
#[derive(Debug, Clone, PartialEq)]
pub struct PassState<D: Dimension> {
    pub data: Array<f64, D>,
    pub flag: Array<bool, D>,
    /// The (1-based) index of the rule that newly flagged each point; 0 means
    /// the point wasn't flagged during this pass.
    pub flag_reason: Array<u16, D>,
}

impl<D: Dimension> PassState<D> {
    pub fn new(data: Array<f64, D>, flag: Array<bool, D>) -> PassState<D> {
        let flag_reason = Array::zeros(flag.raw_dim());
        PassState {
            data,
            flag,
            flag_reason,
        }
    }

    /// The number of points that are unflagged and finite.
    pub fn num_valid(&self) -> usize {
        Zip::from(&self.data)
            .and(&self.flag)
            .fold(0, |acc, &d, &f| if !f && d.is_finite() { acc + 1 } else { acc })
    }

    pub fn is_fully_flagged(&self) -> bool {
        self.flag.iter().all(|&f| f)
    }

    pub fn valid_values(&self) -> Vec<f64> {
        valid_values(self.data.view(), self.flag.view())
    }

    /// Flag the points of `mask` that are not already flagged, attributing
    /// them to `rule_index`. The newly-flagged points are returned.
    pub(crate) fn commit(&mut self, mut mask: Array<bool, D>, rule_index: u16) -> Array<bool, D> {
        Zip::from(&mut mask)
            .and(&mut self.flag)
            .and(&mut self.flag_reason)
            .for_each(|m, f, r| {
                if *m && !*f {
                    *f = true;
                    *r = rule_index;
                } else {
                    *m = false;
                }
            });
        mask
    }
}

/// The result of running all rules over one view.
#[derive(Debug, Clone)]
pub struct PassOutcome<D: Dimension> {
    pub flags: Vec<FlagCommand>,
    pub state: PassState<D>,
    pub notices: Vec<ExclusionNotice>,
}

/// The bookkeeping for one pass of rules over one view.
pub(crate) struct Evaluation<'a, D: Dimension> {
    pub(crate) description: &'a str,
    pub(crate) state: PassState<D>,
    pub(crate) scope: CommandScope<'a>,
    pub(crate) axis_names: Vec<&'a str>,
    /// Points that may not be flagged. `None` if nothing in the view is
    /// excluded.
    excluded: Option<Array<bool, D>>,
    flags: Vec<FlagCommand>,
    notices: Vec<ExclusionNotice>,
    pub(crate) rule_index: u16,
    pub(crate) rule: RuleKind,
}

impl<'a, D: Dimension> Evaluation<'a, D> {
    pub(crate) fn new(
        description: &'a str,
        state: PassState<D>,
        scope: CommandScope<'a>,
        axis_names: Vec<&'a str>,
        excluded: Option<Array<bool, D>>,
    ) -> Evaluation<'a, D> {
        Evaluation {
            description,
            state,
            scope,
            axis_names,
            excluded: excluded.filter(|e| e.iter().any(|&x| x)),
            flags: vec![],
            notices: vec![],
            rule_index: 0,
            rule: RuleKind::MaxAbs,
        }
    }

    /// Prepare for the next rule. Returns `false` if the rule should be
    /// skipped.
    pub(crate) fn start_rule(
        &mut self,
        rule_index: usize,
        rule: RuleKind,
        minsample: usize,
        skip_fully_flagged: bool,
    ) -> bool {
        self.rule_index = u16::try_from(rule_index + 1).unwrap_or(u16::MAX);
        self.rule = rule;

        if skip_fully_flagged && self.state.is_fully_flagged() {
            debug!(
                "{}: skipping rule '{rule}'; the view is entirely flagged",
                self.description
            );
            return false;
        }
        let num_valid = self.state.num_valid();
        if num_valid < minsample {
            debug!(
                "{}: skipping rule '{rule}'; only {num_valid} valid samples (minsample {minsample})",
                self.description
            );
            return false;
        }
        true
    }

    /// Remove excluded points from `mask`, then flag what's left. Returns the
    /// newly-flagged points and whether any points were rejected.
    pub(crate) fn commit(&mut self, mut mask: Array<bool, D>) -> (Array<bool, D>, bool) {
        let mut num_rejected = 0;
        if let Some(excluded) = &self.excluded {
            Zip::from(&mut mask)
                .and(excluded)
                .and(&self.state.flag)
                .for_each(|m, &e, &f| {
                    if *m && e && !f {
                        *m = false;
                        num_rejected += 1;
                    }
                });
        }
        if num_rejected > 0 {
            warn!(
                "{}: rule '{}' rejected {num_rejected} flags due to exclusions",
                self.description, self.rule
            );
            self.notices.push(ExclusionNotice {
                description: self.description.to_string(),
                rule: self.rule,
                num_rejected,
            });
        }

        let new = self.state.commit(mask, self.rule_index);
        (new, num_rejected > 0)
    }

    /// Emit a command narrowed by `coords`.
    pub(crate) fn emit(&mut self, coords: &[Coordinate], reason: RuleKind) {
        let cmd = self
            .scope
            .command(&self.axis_names, coords, reason, self.rule);
        self.flags.push(cmd);
    }

    pub(crate) fn num_flags(&self) -> usize {
        self.flags.len()
    }

    pub(crate) fn into_outcome(self) -> PassOutcome<D> {
        PassOutcome {
            flags: self.flags,
            state: self.state,
            notices: self.notices,
        }
    }
}

/// Group sorted indices into runs that are contiguous both in index and in
/// the channel values of `axis`.
pub(crate) fn channel_runs<I>(axis: &Axis, indices: I) -> Vec<RangeInclusive<usize>>
where
    I: IntoIterator<Item = usize>,
{
    let mut runs = vec![];
    for run in contiguous_runs(indices) {
        let (first, last) = (*run.start(), *run.end());
        let mut start = first;
        for i in first..=last {
            if i == last || !axis.adjacent(i) {
                runs.push(start..=i);
                start = i + 1;
            }
        }
    }
    runs
}
