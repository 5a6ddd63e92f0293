// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Reading views from files.
//!
//! A view file holds views of a single kind (matrix or vector) for one table,
//! e.g. in json:
//!
//! ```json
//! {
//!   "kind": "vector",
//!   "table": "uid.ms",
//!   "antennas": [{ "id": 0, "name": "DA41" }],
//!   "views": [
//!     {
//!       "description": "spw 17 DA41 XX",
//!       "meta": { "spw": 17, "antenna": 0, "pol": "XX" },
//!       "x": { "name": "channels", "data": { "kind": "channel", "values": [0, 1, 2] } },
//!       "data": [1.0, null, 1.1]
//!     }
//!   ]
//! }
//! ```
//!
//! A `null` datum is read as NaN. Flags are optional and default to
//! unflagged.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use log::debug;
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};

use super::ViewFileError;
use crate::{
    flagging::{AntennaNames, Catalogue},
    view::{Axis, MatrixView, VectorView, ViewMeta},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AntennaEntry {
    pub id: u32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasebandEntry {
    pub id: u32,
    pub spws: BTreeSet<u32>,
}

/// 1D or 2D values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Values<T> {
    Vector(Vec<T>),
    Matrix(Vec<Vec<T>>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewEntry {
    pub description: String,
    #[serde(default)]
    pub meta: ViewMeta,
    pub x: Axis,
    #[serde(default)]
    pub y: Option<Axis>,
    pub data: Values<Option<f64>>,
    #[serde(default)]
    pub flag: Option<Values<bool>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewFile {
    pub kind: Catalogue,
    pub table: String,
    #[serde(default)]
    pub antennas: Vec<AntennaEntry>,
    #[serde(default)]
    pub basebands: Vec<BasebandEntry>,
    pub views: Vec<ViewEntry>,
}

/// Read a json or toml view file.
pub fn read_view_file(file: &Path) -> Result<ViewFile, ViewFileError> {
    if !file.exists() {
        return Err(ViewFileError::DoesNotExist(file.to_path_buf()));
    }
    debug!("Reading view file {}", file.display());
    let ext = file
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase());
    match ext.as_deref() {
        Some("json") => {
            let reader = BufReader::new(File::open(file)?);
            serde_json::from_reader(reader).map_err(|err| ViewFileError::Json {
                file: file.to_path_buf(),
                err,
            })
        }
        Some("toml") => {
            let contents = std::fs::read_to_string(file)?;
            toml::from_str(&contents).map_err(|err| ViewFileError::Toml {
                file: file.to_path_buf(),
                err,
            })
        }
        _ => Err(ViewFileError::UnsupportedExtension(file.to_path_buf())),
    }
}

fn bad_values(description: &str, what: &'static str, expected: &'static str) -> ViewFileError {
    ViewFileError::BadValues {
        description: description.to_string(),
        what,
        expected,
    }
}

/// Convert rows to a 2D array. All rows must have the same length.
fn to_array2<T: Clone, U>(rows: &[Vec<T>], convert: impl Fn(&T) -> U) -> Option<Array2<U>> {
    let num_cols = rows.first().map(|r| r.len()).unwrap_or(0);
    if rows.iter().any(|r| r.len() != num_cols) {
        return None;
    }
    Some(Array2::from_shape_fn((rows.len(), num_cols), |(i, j)| {
        convert(&rows[i][j])
    }))
}

impl ViewFile {
    pub fn antenna_names(&self, use_names: bool) -> AntennaNames {
        AntennaNames::new(
            use_names,
            self.antennas
                .iter()
                .map(|a| (a.id, a.name.clone()))
                .collect(),
        )
    }

    /// Spectral windows keyed by baseband.
    pub fn basebands(&self) -> BTreeMap<u32, BTreeSet<u32>> {
        self.basebands
            .iter()
            .map(|b| (b.id, b.spws.clone()))
            .collect()
    }

    fn check_kind(&self, expected: Catalogue) -> Result<(), ViewFileError> {
        if self.kind == expected {
            Ok(())
        } else {
            Err(ViewFileError::WrongKind {
                expected,
                found: self.kind,
            })
        }
    }

    fn meta(&self, entry: &ViewEntry) -> ViewMeta {
        let mut meta = entry.meta.clone();
        if meta.table.is_empty() {
            meta.table = self.table.clone();
        }
        meta
    }

    /// Build the matrix views of this file, keyed by description.
    pub fn matrix_views(&self) -> Result<BTreeMap<String, MatrixView>, ViewFileError> {
        self.check_kind(Catalogue::Matrix)?;
        let mut views = BTreeMap::new();
        for entry in &self.views {
            let d = entry.description.as_str();
            let y = entry
                .y
                .clone()
                .ok_or_else(|| ViewFileError::MissingYAxis(d.to_string()))?;
            let data = match &entry.data {
                Values::Matrix(rows) => to_array2(rows, |v| v.unwrap_or(f64::NAN)),
                Values::Vector(_) => None,
            }
            .ok_or_else(|| bad_values(d, "data", "a list of equal-length lists"))?;
            let flag = match &entry.flag {
                None => Array2::from_elem(data.dim(), false),
                Some(Values::Matrix(rows)) => to_array2(rows, |&f| f)
                    .ok_or_else(|| bad_values(d, "flags", "a list of equal-length lists"))?,
                Some(Values::Vector(_)) => {
                    return Err(bad_values(d, "flags", "a list of equal-length lists"))
                }
            };

            let view = MatrixView::new(self.meta(entry), entry.x.clone(), y, data, flag)
                .map_err(|err| ViewFileError::View {
                    description: d.to_string(),
                    err,
                })?;
            if views.insert(d.to_string(), view).is_some() {
                return Err(ViewFileError::DuplicateDescription(d.to_string()));
            }
        }
        Ok(views)
    }

    /// Build the vector views of this file, keyed by description.
    pub fn vector_views(&self) -> Result<BTreeMap<String, VectorView>, ViewFileError> {
        self.check_kind(Catalogue::Vector)?;
        let mut views = BTreeMap::new();
        for entry in &self.views {
            let d = entry.description.as_str();
            if entry.y.is_some() {
                return Err(ViewFileError::UnexpectedYAxis(d.to_string()));
            }
            let data: Array1<f64> = match &entry.data {
                Values::Vector(values) => values.iter().map(|v| v.unwrap_or(f64::NAN)).collect(),
                Values::Matrix(_) => return Err(bad_values(d, "data", "a list of numbers")),
            };
            let flag: Array1<bool> = match &entry.flag {
                None => Array1::from_elem(data.len(), false),
                Some(Values::Vector(flags)) => Array1::from(flags.clone()),
                Some(Values::Matrix(_)) => {
                    return Err(bad_values(d, "flags", "a list of booleans"))
                }
            };

            let view = VectorView::new(self.meta(entry), entry.x.clone(), data, flag).map_err(
                |err| ViewFileError::View {
                    description: d.to_string(),
                    err,
                },
            )?;
            if views.insert(d.to_string(), view).is_some() {
                return Err(ViewFileError::DuplicateDescription(d.to_string()));
            }
        }
        Ok(views)
    }
}
