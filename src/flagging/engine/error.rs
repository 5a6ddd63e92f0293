// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors associated with running the flagger.

use thiserror::Error;

use crate::view::ViewError;

/// An error from one of the flagger's collaborators (data task, view task or
/// flag setter).
#[derive(Error, Debug)]
pub enum CollaboratorError {
    #[error("{0}")]
    Generic(String),

    #[error(transparent)]
    View(#[from] ViewError),

    #[error(transparent)]
    IO(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum FlaggerError {
    #[error("The data task failed: {0}")]
    DataTask(#[source] CollaboratorError),

    #[error("The view task failed: {0}")]
    ViewTask(#[source] CollaboratorError),

    #[error("The flag setter failed: {0}")]
    FlagSetter(#[source] CollaboratorError),

    #[error("The flag setter was asked for a '{which}' summary, but didn't provide one")]
    MalformedFlagSetterResult { which: &'static str },

    #[error("This flagger has already been run")]
    AlreadyRun,
}
