// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Common code for command-line interfaces, e.g. argument files and rules
//! files are read the same way by every subcommand.

mod printers;

pub(super) use printers::InfoPrinter;
pub(crate) use printers::{display_warnings, Warn};

use std::path::Path;

use itertools::Itertools;
use log::debug;
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};
use vec1::Vec1;

use super::HyperflagError;
use crate::flagging::{parse_rules, Catalogue, Rule};

lazy_static::lazy_static! {
    pub(super) static ref ARG_FILE_TYPES_COMMA_SEPARATED: String = ArgFileTypes::iter().join(", ");

    pub(super) static ref ARG_FILE_HELP: String =
        format!("All arguments may be specified in a file. Any CLI arguments override arguments set in the file. Supported formats: {}", *ARG_FILE_TYPES_COMMA_SEPARATED);

    pub(super) static ref RULES_FILE_HELP: String =
        format!("A file containing a 'catalogue' (matrix or vector) and an ordered list of 'rules'. Supported formats: {}", *ARG_FILE_TYPES_COMMA_SEPARATED);
}

#[derive(Debug, Display, EnumIter, EnumString)]
pub(super) enum ArgFileTypes {
    #[strum(serialize = "toml")]
    Toml,
    #[strum(serialize = "json")]
    Json,
}

macro_rules! unpack_arg_file {
    ($arg_file:expr) => ({
        use std::{fs::File, io::Read, str::FromStr};

        use crate::cli::common::{ArgFileTypes, ARG_FILE_TYPES_COMMA_SEPARATED};

        debug!("Attempting to parse argument file {}", $arg_file.display());

        let mut contents = String::new();
        let arg_file_type = $arg_file
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .and_then(|e| ArgFileTypes::from_str(&e).ok());

        match arg_file_type {
            Some(ArgFileTypes::Toml) => {
                debug!("Parsing toml file...");
                let mut fh = File::open(&$arg_file)?;
                fh.read_to_string(&mut contents)?;
                match toml::from_str(&contents) {
                    Ok(p) => p,
                    Err(err) => {
                        return Err(HyperflagError::ArgFile(format!(
                            "Couldn't decode toml structure from {:?}:\n{err}",
                            $arg_file
                        )))
                    }
                }
            }
            Some(ArgFileTypes::Json) => {
                debug!("Parsing json file...");
                let mut fh = File::open(&$arg_file)?;
                fh.read_to_string(&mut contents)?;
                match serde_json::from_str(&contents) {
                    Ok(p) => p,
                    Err(err) => {
                        return Err(HyperflagError::ArgFile(format!(
                            "Couldn't decode json structure from {:?}:\n{err}",
                            $arg_file
                        )))
                    }
                }
            }

            _ => {
                return Err(HyperflagError::ArgFile(format!(
                    "Argument file '{:?}' doesn't have a recognised file extension! Valid extensions are: {}", $arg_file, *ARG_FILE_TYPES_COMMA_SEPARATED)
                ))
            }
        }
    });
}

/// The contents of a rules file. Rules are kept generic until the kind of
/// view they'll be used on is known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(super) struct RulesFile {
    pub(super) catalogue: Catalogue,
    pub(super) rules: Vec<serde_json::Value>,
}

impl RulesFile {
    /// Parse the rules for views of `R`'s catalogue.
    pub(super) fn parse<R: Rule>(&self) -> Result<Vec1<R>, HyperflagError> {
        if self.catalogue != R::CATALOGUE {
            return Err(HyperflagError::Rules(format!(
                "These rules are for {} views, not {} views",
                self.catalogue,
                R::CATALOGUE
            )));
        }
        Ok(parse_rules(&self.rules)?)
    }
}

pub(super) fn read_rules_file(file: &Path) -> Result<RulesFile, HyperflagError> {
    if !file.exists() {
        return Err(HyperflagError::Rules(format!(
            "Rules file '{}' doesn't exist",
            file.display()
        )));
    }
    let rules_file: RulesFile = unpack_arg_file!(file);
    Ok(rules_file)
}
