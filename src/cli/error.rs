// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Error type for all hyperflag-related errors. This should be the *only*
//! error enum that is publicly visible.

use thiserror::Error;

use super::flag::FlagArgsError;
use crate::{
    flagging::{FlaggerError, RuleError},
    io::{ViewFileError, WriteError},
};

/// The *only* publicly visible error from hyperflag.
#[derive(Error, Debug)]
pub enum HyperflagError {
    /// An error related to flagging rules.
    #[error("{0}\n\nRules files contain a 'catalogue' (matrix or vector) and a list of 'rules', each with a 'name'")]
    Rules(String),

    /// An error related to reading views.
    #[error("{0}")]
    ViewFile(String),

    /// An error raised while running the flagger.
    #[error("Flagging failed: {0}")]
    Flagger(String),

    /// An error related to writing out flags.
    #[error("{0}")]
    Write(String),

    /// An error related to argument files.
    #[error("{0}")]
    ArgFile(String),

    /// An error related to the arguments of the flag subcommand.
    #[error("{0}")]
    FlagArgs(String),

    /// A generic error that can't be clarified further, e.g. IO errors.
    #[error("{0}")]
    Generic(String),
}

impl From<RuleError> for HyperflagError {
    fn from(e: RuleError) -> Self {
        Self::Rules(e.to_string())
    }
}

impl From<ViewFileError> for HyperflagError {
    fn from(e: ViewFileError) -> Self {
        match e {
            ViewFileError::IO(e) => Self::from(e),
            _ => Self::ViewFile(e.to_string()),
        }
    }
}

impl From<FlaggerError> for HyperflagError {
    fn from(e: FlaggerError) -> Self {
        Self::Flagger(e.to_string())
    }
}

impl From<WriteError> for HyperflagError {
    fn from(e: WriteError) -> Self {
        match e {
            WriteError::IO(e) => Self::from(e),
            WriteError::Json(_) => Self::Write(e.to_string()),
        }
    }
}

impl From<FlagArgsError> for HyperflagError {
    fn from(e: FlagArgsError) -> Self {
        match e {
            FlagArgsError::CatalogueMismatch { .. } => Self::Rules(e.to_string()),
            _ => Self::FlagArgs(e.to_string()),
        }
    }
}

impl From<log::SetLoggerError> for HyperflagError {
    fn from(e: log::SetLoggerError) -> Self {
        Self::Generic(format!("Failed to initialise logging: {e}"))
    }
}

impl From<std::io::Error> for HyperflagError {
    fn from(e: std::io::Error) -> Self {
        Self::Generic(e.to_string())
    }
}
