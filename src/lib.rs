// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Iterative, rule-based data-quality flagging for radio-astronomy calibration
pipelines.

Views (2D matrices or 1D spectra) are evaluated against ordered rules; the
resulting flag commands are consolidated and handed to a flag setter. See
[`flagging::Flagger`].
 */

pub mod constants;
pub mod flagging;
pub mod io;
pub(crate) mod math;
pub mod view;

mod cli;

// Re-exports.
pub use cli::{Hyperflag, HyperflagError};
pub use flagging::{FlagCommand, Flagger, FlaggerConfig, FlaggerError, FlaggerResult};
pub use view::{MatrixView, VectorView};
