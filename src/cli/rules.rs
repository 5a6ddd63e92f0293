// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Code to verify rules files.

use std::borrow::Cow;
use std::path::PathBuf;

use clap::Parser;
use log::{error, info};

use super::common::{read_rules_file, InfoPrinter, RULES_FILE_HELP};
use crate::{
    flagging::{Catalogue, MatrixRule, Rule, VectorRule},
    HyperflagError,
};

/// Verify that rules files can be read by hyperflag.
#[derive(Parser, Debug)]
pub struct RulesVerifyArgs {
    #[clap(name = "RULES_FILES", parse(from_os_str), help = RULES_FILE_HELP.as_str())]
    rules_files: Vec<PathBuf>,
}

fn describe<R: Rule>(rules: &[R]) -> Vec<Cow<'static, str>> {
    rules
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let minsample = match r.minsample() {
                0 => String::new(),
                n => format!(" (minsample {n})"),
            };
            format!("{}: {}{minsample}", i + 1, r.kind()).into()
        })
        .collect()
}

impl RulesVerifyArgs {
    /// Read and print out each rules file. If a file can't be read, print the
    /// error and keep going with the other files; an error is returned at the
    /// end if any file was bad.
    pub fn run(&self) -> Result<(), HyperflagError> {
        if self.rules_files.is_empty() {
            return Err(HyperflagError::Rules(
                "No rules files were supplied".to_string(),
            ));
        }

        let mut num_bad = 0;
        for file in &self.rules_files {
            let result = read_rules_file(file).and_then(|rules_file| {
                let lines = match rules_file.catalogue {
                    Catalogue::Matrix => describe(&rules_file.parse::<MatrixRule>()?),
                    Catalogue::Vector => describe(&rules_file.parse::<VectorRule>()?),
                };
                Ok((rules_file.catalogue, lines))
            });
            match result {
                Ok((catalogue, lines)) => {
                    let mut printer = InfoPrinter::new(
                        format!("{}: {} {catalogue} rules", file.display(), lines.len()).into(),
                    );
                    printer.push_block(lines);
                    printer.display();
                }
                Err(e) => {
                    error!("{}: {e}", file.display());
                    num_bad += 1;
                }
            }
        }

        if num_bad > 0 {
            Err(HyperflagError::Rules(format!(
                "{num_bad} of {} rules files couldn't be verified",
                self.rules_files.len()
            )))
        } else {
            info!("All rules files are OK");
            Ok(())
        }
    }
}
