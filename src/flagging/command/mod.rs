// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Flag commands: abstract descriptions of data selections to be flagged.
//!
//! Every selection dimension is either unrestricted (`None` or
//! [`AntennaSelection::All`]) or restricted to one value. Commands are created
//! by rule evaluators with a [`CommandScope`], which narrows the selection
//! only along the dimensions that the view and the flagged coordinates
//! describe.


use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Display;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use super::{pass::FlagContext, rules::RuleKind};
use crate::view::{ChannelRange, Coordinate, TimeStamp, ViewMeta};

/// Antenna ID-to-name mapping for a run. When `use_names` is false (or a name
/// is unavailable), antennas are referred to by their ID.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AntennaNames {
    #[serde(default)]
    pub use_names: bool,
    #[serde(default)]
    pub names: HashMap<u32, String>,
}

impl AntennaNames {
    pub fn new(use_names: bool, names: HashMap<u32, String>) -> AntennaNames {
        AntennaNames { use_names, names }
    }

    /// The label used for an antenna in flag commands.
    pub fn label(&self, id: u32) -> String {
        if self.use_names {
            if let Some(name) = self.names.get(&id) {
                return name.clone();
            }
        }
        id.to_string()
    }
}

/// Which antennas or baselines are selected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AntennaSelection {
    All,
    Antenna(String),
    /// The two antennas are always stored in ascending order.
    Baseline(String, String),
}

impl AntennaSelection {
    pub fn baseline(a: String, b: String) -> AntennaSelection {
        if a <= b {
            AntennaSelection::Baseline(a, b)
        } else {
            AntennaSelection::Baseline(b, a)
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, AntennaSelection::All)
    }

    /// Does this selection include everything `other` selects?
    pub fn covers(&self, other: &AntennaSelection) -> bool {
        use AntennaSelection::*;
        match (self, other) {
            (All, _) => true,
            (_, All) => false,
            (Antenna(a), Antenna(b)) => a == b,
            (Antenna(a), Baseline(b1, b2)) => a == b1 || a == b2,
            (Baseline(..), Antenna(_)) => false,
            (Baseline(a1, a2), Baseline(b1, b2)) => a1 == b1 && a2 == b2,
        }
    }

    /// Do this selection and `other` share any data?
    pub fn overlaps(&self, other: &AntennaSelection) -> bool {
        self.covers(other) || other.covers(self)
    }
}

impl Display for AntennaSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AntennaSelection::All => Ok(()),
            AntennaSelection::Antenna(a) => write!(f, "{a}"),
            AntennaSelection::Baseline(a, b) => write!(f, "{a}&{b}"),
        }
    }
}

/// An elected flagging action.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlagCommand {
    pub table: String,
    /// `None` means all spectral windows.
    pub spws: Option<BTreeSet<u32>>,
    /// `None` means all channels of the selected spectral windows.
    pub channels: Option<ChannelRange>,
    pub antenna: AntennaSelection,
    pub pol: Option<String>,
    pub time: Option<TimeStamp>,
    pub field: Option<String>,
    pub intent: Option<String>,

    /// The names of the axes of the view this command was derived from.
    pub axis_names: Vec<String>,
    /// The flagged coordinates on those axes.
    pub flag_coords: Vec<Coordinate>,
    pub reason: RuleKind,
    pub rule_name: RuleKind,
    pub extend_fields: bool,
    pub extend_baseband: bool,
}

impl FlagCommand {
    /// A command selecting everything in `table`. Use the `with_*` methods to
    /// narrow it.
    pub fn new<S: Into<String>>(table: S, reason: RuleKind) -> FlagCommand {
        FlagCommand {
            table: table.into(),
            spws: None,
            channels: None,
            antenna: AntennaSelection::All,
            pol: None,
            time: None,
            field: None,
            intent: None,
            axis_names: vec![],
            flag_coords: vec![],
            reason,
            rule_name: reason,
            extend_fields: false,
            extend_baseband: false,
        }
    }

    pub fn with_spw(self, spw: u32) -> FlagCommand {
        FlagCommand {
            spws: Some(BTreeSet::from([spw])),
            ..self
        }
    }

    pub fn with_channels(self, channels: ChannelRange) -> FlagCommand {
        FlagCommand {
            channels: Some(channels),
            ..self
        }
    }

    pub fn with_antenna(self, antenna: AntennaSelection) -> FlagCommand {
        FlagCommand { antenna, ..self }
    }

    pub fn with_pol<S: Into<String>>(self, pol: S) -> FlagCommand {
        FlagCommand {
            pol: Some(pol.into()),
            ..self
        }
    }

    pub fn with_time(self, time: TimeStamp) -> FlagCommand {
        FlagCommand {
            time: Some(time),
            ..self
        }
    }

    pub fn with_field<S: Into<String>>(self, field: S) -> FlagCommand {
        FlagCommand {
            field: Some(field.into()),
            ..self
        }
    }

    pub fn with_intent<S: Into<String>>(self, intent: S) -> FlagCommand {
        FlagCommand {
            intent: Some(intent.into()),
            ..self
        }
    }

    /// Does this command select everything that `other` selects?
    pub fn covers(&self, other: &FlagCommand) -> bool {
        fn value_covers<T: PartialEq>(a: &Option<T>, b: &Option<T>) -> bool {
            match (a, b) {
                (None, _) => true,
                (Some(_), None) => false,
                (Some(a), Some(b)) => a == b,
            }
        }

        let spws = match (&self.spws, &other.spws) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(a), Some(b)) => a.is_superset(b),
        };
        let channels = match (&self.channels, &other.channels) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(a), Some(b)) => a.covers(b),
        };

        self.table == other.table
            && spws
            && channels
            && self.antenna.covers(&other.antenna)
            && value_covers(&self.pol, &other.pol)
            && value_covers(&self.time, &other.time)
            && value_covers(&self.field, &other.field)
            && value_covers(&self.intent, &other.intent)
    }

    /// Does this command select the view point with the given coordinates? A
    /// restriction along a dimension that the point doesn't describe is
    /// treated as selecting the point, because part of the data it represents
    /// is selected.
    pub fn selects(&self, meta: &ViewMeta, coords: &[Coordinate], names: &AntennaNames) -> bool {
        fn clash(selected: &Option<String>, point: &Option<String>) -> bool {
            matches!((selected, point), (Some(a), Some(b)) if a != b)
        }

        if self.table != meta.table {
            return false;
        }
        if let Some(spws) = &self.spws {
            if !spws.contains(&meta.spw) {
                return false;
            }
        }
        if clash(&self.pol, &meta.pol)
            || clash(&self.field, &meta.field)
            || clash(&self.intent, &meta.intent)
        {
            return false;
        }

        let mut antenna = meta
            .antenna
            .map(|a| AntennaSelection::Antenna(names.label(a)));
        let mut time = meta.time.map(TimeStamp);
        let mut channels = None;
        for coord in coords {
            match *coord {
                Coordinate::Antenna(a) => antenna = Some(AntennaSelection::Antenna(names.label(a))),
                Coordinate::Baseline(a, b) => {
                    antenna = Some(AntennaSelection::baseline(names.label(a), names.label(b)))
                }
                Coordinate::Time(t) => time = Some(t),
                Coordinate::Channels(r) => channels = Some(r),
            }
        }

        if let Some(antenna) = antenna {
            if !self.antenna.overlaps(&antenna) {
                return false;
            }
        }
        if let (Some(selected), Some(point)) = (self.time, time) {
            if selected != point {
                return false;
            }
        }
        if let (Some(selected), Some(point)) = (self.channels, channels) {
            if selected.end < point.start || point.end < selected.start {
                return false;
            }
        }
        true
    }
}

impl Display for FlagCommand {
    /// Render the command as a flagdata-style template line.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "mode='manual'")?;
        if let Some(spws) = &self.spws {
            let spw_str = match self.channels {
                Some(chans) => spws.iter().map(|s| format!("{s}:{chans}")).join(","),
                None => spws.iter().join(","),
            };
            write!(f, " spw='{spw_str}'")?;
        }
        if !self.antenna.is_all() {
            write!(f, " antenna='{}'", self.antenna)?;
        }
        if let Some(pol) = &self.pol {
            write!(f, " correlation='{pol}'")?;
        }
        if let Some(time) = self.time {
            write!(f, " timerange='{time}'")?;
        }
        if let Some(field) = &self.field {
            write!(f, " field='{field}'")?;
        }
        if let Some(intent) = &self.intent {
            write!(f, " intent='{intent}'")?;
        }
        write!(f, " reason='{}'", self.reason)
    }
}

/// Everything about a view that is needed to turn flagged coordinates into
/// [`FlagCommand`]s.
#[derive(Debug, Clone)]
pub struct CommandScope<'a> {
    table: String,
    spws: BTreeSet<u32>,
    pol: Option<String>,
    antenna: AntennaSelection,
    time: Option<TimeStamp>,
    field: Option<String>,
    intent: Option<String>,
    names: &'a AntennaNames,
    extend_fields: bool,
    extend_baseband: bool,
}

impl<'a> CommandScope<'a> {
    pub fn new(meta: &ViewMeta, ctx: &FlagContext<'a>) -> CommandScope<'a> {
        let spws = if ctx.extend_baseband {
            baseband_spws(meta.spw, ctx.basebands)
        } else {
            BTreeSet::from([meta.spw])
        };
        CommandScope {
            table: meta.table.clone(),
            spws,
            pol: meta.pol.clone(),
            antenna: match meta.antenna {
                Some(a) => AntennaSelection::Antenna(ctx.antenna_names.label(a)),
                None => AntennaSelection::All,
            },
            time: meta.time.map(TimeStamp),
            field: if ctx.extend_fields {
                None
            } else {
                meta.field.clone()
            },
            intent: meta.intent.clone(),
            names: ctx.antenna_names,
            extend_fields: ctx.extend_fields,
            extend_baseband: ctx.extend_baseband,
        }
    }

    /// Make a command selecting the view's scope narrowed by `coords`.
    pub fn command(
        &self,
        axis_names: &[&str],
        coords: &[Coordinate],
        reason: RuleKind,
        rule_name: RuleKind,
    ) -> FlagCommand {
        let mut cmd = FlagCommand {
            table: self.table.clone(),
            spws: Some(self.spws.clone()),
            channels: None,
            antenna: self.antenna.clone(),
            pol: self.pol.clone(),
            time: self.time,
            field: self.field.clone(),
            intent: self.intent.clone(),
            axis_names: axis_names.iter().map(|s| s.to_string()).collect(),
            flag_coords: coords.to_vec(),
            reason,
            rule_name,
            extend_fields: self.extend_fields,
            extend_baseband: self.extend_baseband,
        };
        for coord in coords {
            match *coord {
                Coordinate::Antenna(a) => {
                    cmd.antenna = AntennaSelection::Antenna(self.names.label(a))
                }
                Coordinate::Baseline(a, b) => {
                    cmd.antenna =
                        AntennaSelection::baseline(self.names.label(a), self.names.label(b))
                }
                Coordinate::Time(t) => cmd.time = Some(t),
                // A baseband-wide command covers all channels.
                Coordinate::Channels(r) if !self.extend_baseband => cmd.channels = Some(r),
                Coordinate::Channels(_) => (),
            }
        }
        cmd
    }
}

/// All the spectral windows in the same baseband as `spw`. Unknown spws form a
/// baseband on their own.
fn baseband_spws(spw: u32, basebands: &BTreeMap<u32, BTreeSet<u32>>) -> BTreeSet<u32> {
    basebands
        .values()
        .find(|spws| spws.contains(&spw))
        .cloned()
        .unwrap_or_else(|| BTreeSet::from([spw]))
}
