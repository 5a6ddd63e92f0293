// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors associated with flagging rules.

use thiserror::Error;

use super::rules::Catalogue;

#[derive(Error, Debug)]
pub enum RuleError {
    #[error("No flagging rules were supplied")]
    NoRules,

    #[error("Rule number {num} has no name")]
    MissingName { num: usize },

    #[error("Unknown flagging rule '{name}'; valid rules are: {valid}")]
    Unknown { name: String, valid: String },

    #[error("The '{name}' rule can't be used on {catalogue} views")]
    WrongCatalogue { name: String, catalogue: Catalogue },

    #[error("Couldn't parse the parameters of the '{name}' rule: {err}")]
    Parse { name: String, err: String },

    #[error("Invalid parameter for the '{name}' rule: {reason}")]
    InvalidParameter { name: String, reason: String },
}
