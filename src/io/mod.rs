// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! File-backed flagging: reading views, keeping them in memory while the
//! flagger works on them, and writing out what was flagged.

mod error;
mod read;
mod store;
mod write;

pub use error::{ViewFileError, WriteError};
pub use read::{read_view_file, AntennaEntry, BasebandEntry, Values, ViewEntry, ViewFile};
pub use store::{
    FlagTarget, SharedStore, StoreDataTask, StoreFlagSetter, StoreViewTask, ViewStore,
};
pub use write::{write_flag_template, write_flags_json, write_report, FlagReport};
