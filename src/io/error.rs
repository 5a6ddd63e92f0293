// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors from reading view files and writing flags.

use std::path::PathBuf;

use thiserror::Error;

use crate::{flagging::Catalogue, view::ViewError};

#[derive(Error, Debug)]
pub enum ViewFileError {
    #[error("View file '{0}' doesn't exist")]
    DoesNotExist(PathBuf),

    #[error("View file '{0}' has an unsupported extension; supported extensions are: json, toml")]
    UnsupportedExtension(PathBuf),

    #[error("Couldn't decode json from view file '{file}': {err}")]
    Json {
        file: PathBuf,
        err: serde_json::Error,
    },

    #[error("Couldn't decode toml from view file '{file}': {err}")]
    Toml {
        file: PathBuf,
        err: toml::de::Error,
    },

    #[error("Expected {expected} views, but the view file contains {found} views")]
    WrongKind {
        expected: Catalogue,
        found: Catalogue,
    },

    #[error("View '{0}' appears more than once")]
    DuplicateDescription(String),

    #[error("Matrix view '{0}' has no y axis")]
    MissingYAxis(String),

    #[error("Vector view '{0}' has a y axis")]
    UnexpectedYAxis(String),

    #[error("The {what} of view '{description}' should be {expected}")]
    BadValues {
        description: String,
        what: &'static str,
        expected: &'static str,
    },

    #[error("View '{description}': {err}")]
    View {
        description: String,
        err: ViewError,
    },

    #[error(transparent)]
    IO(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum WriteError {
    #[error("Couldn't serialise to json: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    IO(#[from] std::io::Error),
}
