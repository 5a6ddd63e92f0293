// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Writing out flag commands and flagging reports.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use log::debug;
use ndarray::{Array, Dimension};
use serde::Serialize;

use super::WriteError;
use crate::flagging::{ExclusionNotice, FlagCommand, FlagSummary, Flaggable, FlaggerResult};

/// A serialisable summary of a flagger run.
#[derive(Debug, Clone, Serialize)]
pub struct FlagReport<'a, D: Dimension> {
    pub table: &'a str,
    pub stopped: String,
    pub iterations: usize,
    pub before: FlagSummary,
    pub after: FlagSummary,
    pub notices: &'a [ExclusionNotice],
    pub flags: &'a [FlagCommand],
    pub flag_reason_planes: &'a BTreeMap<String, Array<u16, D>>,
}

impl<'a, D: Dimension> FlagReport<'a, D> {
    pub fn new<V: Flaggable<Dim = D>>(result: &'a FlaggerResult<V>) -> Self {
        FlagReport {
            table: &result.table,
            stopped: result.stopped.to_string(),
            iterations: result.iterations,
            before: result.before,
            after: result.after,
            notices: &result.notices,
            flags: &result.flags,
            flag_reason_planes: &result.flag_reason_planes,
        }
    }
}

/// Write flag commands as json.
pub fn write_flags_json(file: &Path, flags: &[FlagCommand]) -> Result<(), WriteError> {
    debug!("Writing {} flag commands to {}", flags.len(), file.display());
    let mut writer = BufWriter::new(File::create(file)?);
    serde_json::to_writer_pretty(&mut writer, flags)?;
    writer.flush()?;
    Ok(())
}

/// Write flag commands as a flagging template, one command per line.
pub fn write_flag_template(file: &Path, flags: &[FlagCommand]) -> Result<(), WriteError> {
    debug!("Writing a flagging template to {}", file.display());
    let mut writer = BufWriter::new(File::create(file)?);
    for cmd in flags {
        writeln!(writer, "{cmd}")?;
    }
    writer.flush()?;
    Ok(())
}

/// Write a report of a flagger run as json.
pub fn write_report<V>(file: &Path, result: &FlaggerResult<V>) -> Result<(), WriteError>
where
    V: Flaggable,
    V::Dim: Serialize,
{
    debug!("Writing a flagging report to {}", file.display());
    let mut writer = BufWriter::new(File::create(file)?);
    serde_json::to_writer_pretty(&mut writer, &FlagReport::new(result))?;
    writer.flush()?;
    Ok(())
}
