// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Views: described, axis-labelled snapshots of some measured quantity along
//! with validity flags.
//!
//! A view is derived from underlying measured data by a view task (outside of
//! this crate's concern). Matrix views are 2D (e.g. antenna vs. time, or
//! channel vs. baseline) and vector views are 1D (a spectrum over channels).

mod error;

pub use error::ViewError;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;
use std::hash::{Hash, Hasher};

use hifitime::Epoch;
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};

use crate::flagging::{AntennaNames, FlagCommand};

/// A timestamp in GPS seconds. Unlike a raw `f64`, this has a total ordering
/// and can be hashed, so it can be used in flag selections.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimeStamp(pub f64);

impl TimeStamp {
    pub fn gps_seconds(self) -> f64 {
        self.0
    }

    pub fn to_epoch(self) -> Epoch {
        Epoch::from_gpst_seconds(self.0)
    }
}

impl PartialEq for TimeStamp {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0).is_eq()
    }
}

impl Eq for TimeStamp {}

impl PartialOrd for TimeStamp {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeStamp {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl Hash for TimeStamp {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

impl Display for TimeStamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Use the flagdata-style "YYYY/MM/DD/hh:mm:ss.sss" format.
        let (y, mo, d, h, mi, s, ns) = self.to_epoch().to_gregorian_utc();
        write!(
            f,
            "{y:04}/{mo:02}/{d:02}/{h:02}:{mi:02}:{:06.3}",
            s as f64 + ns as f64 / 1e9
        )
    }
}

/// An inclusive range of channel indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelRange {
    pub start: u32,
    pub end: u32,
}

impl ChannelRange {
    pub fn new(start: u32, end: u32) -> ChannelRange {
        ChannelRange {
            start: start.min(end),
            end: start.max(end),
        }
    }

    pub fn single(chan: u32) -> ChannelRange {
        ChannelRange {
            start: chan,
            end: chan,
        }
    }

    pub fn contains(&self, chan: u32) -> bool {
        self.start <= chan && chan <= self.end
    }

    pub fn covers(&self, other: &ChannelRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

impl Display for ChannelRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}~{}", self.start, self.end)
        }
    }
}

/// The coordinate of a view point along a single axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Coordinate {
    Antenna(u32),
    Baseline(u32, u32),
    Time(TimeStamp),
    Channels(ChannelRange),
}

/// The values of an axis. All values on an axis share a kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "values", rename_all = "snake_case")]
pub enum AxisData {
    Antenna(Vec<u32>),
    Baseline(Vec<(u32, u32)>),
    /// GPS seconds.
    Time(Vec<f64>),
    Channel(Vec<u32>),
}

/// A named axis of a view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Axis {
    pub name: String,
    pub data: AxisData,
}

impl Axis {
    pub fn new<S: Into<String>>(name: S, data: AxisData) -> Axis {
        Axis {
            name: name.into(),
            data,
        }
    }

    pub fn len(&self) -> usize {
        match &self.data {
            AxisData::Antenna(v) => v.len(),
            AxisData::Baseline(v) => v.len(),
            AxisData::Time(v) => v.len(),
            AxisData::Channel(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_channel(&self) -> bool {
        matches!(self.data, AxisData::Channel(_))
    }

    /// Get the coordinate of the `i`th value. Panics if `i` is out of bounds.
    pub fn coord(&self, i: usize) -> Coordinate {
        match &self.data {
            AxisData::Antenna(v) => Coordinate::Antenna(v[i]),
            AxisData::Baseline(v) => Coordinate::Baseline(v[i].0, v[i].1),
            AxisData::Time(v) => Coordinate::Time(TimeStamp(v[i])),
            AxisData::Channel(v) => Coordinate::Channels(ChannelRange::single(v[i])),
        }
    }

    /// Get the coordinate spanning the inclusive index range `first..=last`.
    /// Only channel axes can span more than one value; other axes give the
    /// coordinate of `first`.
    pub(crate) fn span(&self, first: usize, last: usize) -> Coordinate {
        match &self.data {
            AxisData::Channel(v) => Coordinate::Channels(ChannelRange::new(v[first], v[last])),
            _ => self.coord(first),
        }
    }

    /// Are the channel values at `i` and `i + 1` adjacent? Always false for
    /// non-channel axes.
    pub(crate) fn adjacent(&self, i: usize) -> bool {
        match &self.data {
            AxisData::Channel(v) => v
                .get(i + 1)
                .map(|&next| v[i].checked_add(1) == Some(next))
                .unwrap_or(false),
            _ => false,
        }
    }
}

/// Information about what a view represents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewMeta {
    /// The table (e.g. measurement set or caltable) that the view's data came
    /// from.
    #[serde(default)]
    pub table: String,
    /// The spectral window.
    pub spw: u32,
    #[serde(default)]
    pub pol: Option<String>,
    /// The antenna if this whole view belongs to a single antenna.
    #[serde(default)]
    pub antenna: Option<u32>,
    #[serde(default)]
    pub intent: Option<String>,
    #[serde(default)]
    pub field: Option<String>,
    /// The time (GPS seconds) if this whole view belongs to a single time.
    #[serde(default)]
    pub time: Option<f64>,
}

/// A 2D view. Rows run along the `x` axis and columns along the `y` axis, so
/// `data[[i, j]]` belongs to `x.coord(i)` and `y.coord(j)`.
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixView {
    pub meta: ViewMeta,
    pub x: Axis,
    pub y: Axis,
    pub data: Array2<f64>,
    pub flag: Array2<bool>,
}

impl MatrixView {
    pub fn new(
        meta: ViewMeta,
        x: Axis,
        y: Axis,
        data: Array2<f64>,
        flag: Array2<bool>,
    ) -> Result<MatrixView, ViewError> {
        if data.dim() != flag.dim() {
            return Err(ViewError::FlagShape {
                data: data.shape().to_vec(),
                flag: flag.shape().to_vec(),
            });
        }
        if data.dim() != (x.len(), y.len()) {
            return Err(ViewError::AxisShape {
                data: data.shape().to_vec(),
                axes: vec![x.len(), y.len()],
            });
        }
        Ok(MatrixView {
            meta,
            x,
            y,
            data,
            flag,
        })
    }

    /// Apply a flag command to this view, returning how many points became
    /// flagged.
    pub fn apply_command(&mut self, cmd: &FlagCommand, names: &AntennaNames) -> usize {
        let mut count = 0;
        for ((i, j), f) in self.flag.indexed_iter_mut() {
            if *f {
                continue;
            }
            if cmd.selects(&self.meta, &[self.x.coord(i), self.y.coord(j)], names) {
                *f = true;
                count += 1;
            }
        }
        count
    }
}

/// A 1D view, typically a spectrum.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorView {
    pub meta: ViewMeta,
    pub axis: Axis,
    pub data: Array1<f64>,
    pub flag: Array1<bool>,
}

impl VectorView {
    pub fn new(
        meta: ViewMeta,
        axis: Axis,
        data: Array1<f64>,
        flag: Array1<bool>,
    ) -> Result<VectorView, ViewError> {
        if data.len() != flag.len() {
            return Err(ViewError::FlagShape {
                data: data.shape().to_vec(),
                flag: flag.shape().to_vec(),
            });
        }
        if data.len() != axis.len() {
            return Err(ViewError::AxisShape {
                data: data.shape().to_vec(),
                axes: vec![axis.len()],
            });
        }
        Ok(VectorView {
            meta,
            axis,
            data,
            flag,
        })
    }

    /// Apply a flag command to this view, returning how many points became
    /// flagged.
    pub fn apply_command(&mut self, cmd: &FlagCommand, names: &AntennaNames) -> usize {
        let mut count = 0;
        for (i, f) in self.flag.indexed_iter_mut() {
            if !*f && cmd.selects(&self.meta, &[self.axis.coord(i)], names) {
                *f = true;
                count += 1;
            }
        }
        count
    }
}

/// The product of a view task. Each description is associated with a history
/// of views; the flagger only ever looks at the most recent.
pub trait ViewResult {
    type View;

    /// All view descriptions, in a deterministic order.
    fn descriptions(&self) -> BTreeSet<String>;

    /// The most recent view for a description.
    fn last(&self, description: &str) -> Option<&Self::View>;
}

/// An append-only record of views per description.
#[derive(Debug, Clone)]
pub struct ViewHistory<V> {
    views: BTreeMap<String, Vec<V>>,
}

impl<V> Default for ViewHistory<V> {
    fn default() -> Self {
        ViewHistory {
            views: BTreeMap::new(),
        }
    }
}

impl<V> ViewHistory<V> {
    pub fn new() -> ViewHistory<V> {
        ViewHistory::default()
    }

    pub fn add_view<S: Into<String>>(&mut self, description: S, view: V) {
        self.views.entry(description.into()).or_default().push(view);
    }

    /// How many views have been recorded for this description?
    pub fn num_views(&self, description: &str) -> usize {
        self.views.get(description).map(|v| v.len()).unwrap_or(0)
    }
}

impl<V> ViewResult for ViewHistory<V> {
    type View = V;

    fn descriptions(&self) -> BTreeSet<String> {
        self.views
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(d, _)| d.clone())
            .collect()
    }

    fn last(&self, description: &str) -> Option<&V> {
        self.views.get(description).and_then(|v| v.last())
    }
}
