// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ViewError {
    #[error("The view's flags have shape {flag:?}, but its data has shape {data:?}")]
    FlagShape { data: Vec<usize>, flag: Vec<usize> },

    #[error("The view's data has shape {data:?}, but its axes have lengths {axes:?}")]
    AxisShape { data: Vec<usize>, axes: Vec<usize> },
}
