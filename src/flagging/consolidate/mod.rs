// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Reduce a list of flag commands to a smaller, equivalent list.
//!
//! Every step only ever removes or merges commands; the data selected by the
//! output is never more than the data selected by the input. Running
//! [`consolidate`] on its own output changes nothing.


use std::collections::{BTreeMap, BTreeSet, HashSet};

use indexmap::IndexMap;
use log::debug;
use serde::{Deserialize, Serialize};

use super::command::{AntennaSelection, FlagCommand};
use crate::constants::DEFAULT_POLARISATIONS;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidateOptions {
    /// Commands that are identical apart from their polarisation are merged
    /// into one polarisation-less command only if, together, they cover all of
    /// these polarisations.
    pub polarisations: BTreeSet<String>,
}

impl Default for ConsolidateOptions {
    fn default() -> Self {
        ConsolidateOptions {
            polarisations: DEFAULT_POLARISATIONS.iter().map(|p| p.to_string()).collect(),
        }
    }
}

/// Consolidate flag commands. The relative order of surviving commands is
/// preserved.
pub fn consolidate(flags: Vec<FlagCommand>, options: &ConsolidateOptions) -> Vec<FlagCommand> {
    let num_input = flags.len();
    let flags = merge_polarisations(flags, &options.polarisations);
    let flags = drop_covered(flags, |c| c.time.is_some(), |c| c.time.is_none());
    let flags = drop_covered(flags, |c| !c.antenna.is_all(), |c| c.antenna.is_all());
    let flags = drop_covered(
        flags,
        |c| matches!(c.antenna, AntennaSelection::Baseline(..)),
        |c| matches!(c.antenna, AntennaSelection::Antenna(_)),
    );
    let flags = dedup(flags);
    debug!("Consolidated {num_input} flag commands into {}", flags.len());
    flags
}

/// Merge groups of commands that differ only in polarisation.
fn merge_polarisations(flags: Vec<FlagCommand>, polarisations: &BTreeSet<String>) -> Vec<FlagCommand> {
    // Group by everything except polarisation.
    let mut groups: IndexMap<FlagCommand, BTreeSet<String>> = IndexMap::new();
    for cmd in &flags {
        if let Some(pol) = &cmd.pol {
            let key = FlagCommand {
                pol: None,
                ..cmd.clone()
            };
            groups.entry(key).or_default().insert(pol.clone());
        }
    }
    let mergeable: HashSet<FlagCommand> = groups
        .into_iter()
        .filter(|(_, pols)| pols.len() > 1 && pols.is_superset(polarisations))
        .map(|(key, _)| key)
        .collect();
    if mergeable.is_empty() {
        return flags;
    }

    let mut merged = HashSet::new();
    let mut out = Vec::with_capacity(flags.len());
    for cmd in flags {
        if cmd.pol.is_none() {
            out.push(cmd);
            continue;
        }
        let key = FlagCommand {
            pol: None,
            ..cmd.clone()
        };
        if !mergeable.contains(&key) {
            out.push(cmd);
        } else if merged.insert(key.clone()) {
            // The first member of the group takes the place of the whole
            // group.
            out.push(key);
        }
    }
    out
}

/// Drop every command matching `is_candidate` that is covered by some other
/// command matching `is_coverer`.
fn drop_covered<C, V>(flags: Vec<FlagCommand>, is_candidate: C, is_coverer: V) -> Vec<FlagCommand>
where
    C: Fn(&FlagCommand) -> bool,
    V: Fn(&FlagCommand) -> bool,
{
    let coverers: Vec<usize> = flags
        .iter()
        .enumerate()
        .filter(|&(_, c)| is_coverer(c))
        .map(|(i, _)| i)
        .collect();
    if coverers.is_empty() {
        return flags;
    }

    let keep: Vec<bool> = flags
        .iter()
        .enumerate()
        .map(|(i, cmd)| {
            !is_candidate(cmd)
                || !coverers
                    .iter()
                    .any(|&j| j != i && flags[j].covers(cmd))
        })
        .collect();
    flags
        .into_iter()
        .zip(keep)
        .filter_map(|(cmd, keep)| keep.then_some(cmd))
        .collect()
}

/// Remove exact duplicates, keeping the first occurrence.
fn dedup(flags: Vec<FlagCommand>) -> Vec<FlagCommand> {
    let mut seen = HashSet::with_capacity(flags.len());
    flags
        .into_iter()
        .filter(|cmd| seen.insert(cmd.clone()))
        .collect()
}

/// Copy commands for an intent onto that intent's dependent intents, e.g. a
/// bad antenna found in bandpass data is also bad for the phase calibrator.
/// `dependents` maps an intent to the intents that inherit its flags.
/// Commands without an intent already select all intents and are left alone.
pub fn propagate_intents(
    flags: Vec<FlagCommand>,
    dependents: &BTreeMap<String, Vec<String>>,
) -> Vec<FlagCommand> {
    if dependents.is_empty() {
        return flags;
    }
    let mut out = Vec::with_capacity(flags.len());
    for cmd in flags {
        let extra: Vec<FlagCommand> = cmd
            .intent
            .as_ref()
            .and_then(|intent| dependents.get(intent))
            .map(|deps| {
                deps.iter()
                    .map(|dep| FlagCommand {
                        intent: Some(dep.clone()),
                        ..cmd.clone()
                    })
                    .collect()
            })
            .unwrap_or_default();
        out.push(cmd);
        out.extend(extra);
    }
    let out = dedup(out);
    debug!("{} flag commands after intent propagation", out.len());
    out
}
