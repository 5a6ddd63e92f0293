// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! An in-memory store of views, and the flagger collaborators that use it.
//!
//! The store stands in for a table on disk: the data task takes snapshots of
//! its views and the flag setter applies flag commands to them.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use log::debug;

use crate::{
    flagging::{
        AntennaNames, CollaboratorError, DataResult, DataTask, FlagCommand, FlagSetter,
        FlagSetterResult, FlagSummary, Flaggable, SummaryRequest, ViewTask,
    },
    view::{MatrixView, VectorView, ViewHistory},
};

/// Something flag commands can be applied to.
pub trait FlagTarget {
    /// Apply a command, returning the number of newly-flagged points.
    fn apply_command(&mut self, cmd: &FlagCommand, names: &AntennaNames) -> usize;

    fn num_points(&self) -> usize;

    fn num_flagged(&self) -> usize;
}

impl FlagTarget for MatrixView {
    fn apply_command(&mut self, cmd: &FlagCommand, names: &AntennaNames) -> usize {
        MatrixView::apply_command(self, cmd, names)
    }

    fn num_points(&self) -> usize {
        self.flag.len()
    }

    fn num_flagged(&self) -> usize {
        self.flag.iter().filter(|&&f| f).count()
    }
}

impl FlagTarget for VectorView {
    fn apply_command(&mut self, cmd: &FlagCommand, names: &AntennaNames) -> usize {
        VectorView::apply_command(self, cmd, names)
    }

    fn num_points(&self) -> usize {
        self.flag.len()
    }

    fn num_flagged(&self) -> usize {
        self.flag.iter().filter(|&&f| f).count()
    }
}

#[derive(Debug, Clone)]
pub struct ViewStore<V> {
    pub table: String,
    pub views: BTreeMap<String, V>,
    pub antenna_names: AntennaNames,
}

impl<V: FlagTarget> ViewStore<V> {
    pub fn new(table: String, views: BTreeMap<String, V>, antenna_names: AntennaNames) -> Self {
        ViewStore {
            table,
            views,
            antenna_names,
        }
    }

    pub fn summary(&self) -> FlagSummary {
        FlagSummary {
            total: self.views.values().map(|v| v.num_points()).sum(),
            flagged: self.views.values().map(|v| v.num_flagged()).sum(),
        }
    }

    /// Apply flag commands to every view, returning the number of
    /// newly-flagged points.
    pub fn apply(&mut self, flags: &[FlagCommand]) -> usize {
        let names = &self.antenna_names;
        let mut count = 0;
        for view in self.views.values_mut() {
            for cmd in flags {
                count += view.apply_command(cmd, names);
            }
        }
        count
    }
}

pub type SharedStore<V> = Rc<RefCell<ViewStore<V>>>;

/// Snapshots all of the store's views.
pub struct StoreDataTask<V> {
    store: SharedStore<V>,
    num_runs: usize,
}

impl<V> StoreDataTask<V> {
    pub fn new(store: SharedStore<V>) -> Self {
        StoreDataTask { store, num_runs: 0 }
    }

    pub fn num_runs(&self) -> usize {
        self.num_runs
    }
}

impl<V: Clone> DataTask for StoreDataTask<V> {
    type Payload = BTreeMap<String, V>;

    fn run(&mut self) -> Result<DataResult<Self::Payload>, CollaboratorError> {
        self.num_runs += 1;
        let store = self.store.borrow();
        Ok(DataResult {
            table: store.table.clone(),
            is_new: true,
            payload: store.views.clone(),
        })
    }
}

/// Records every snapshot it's given in a history of views.
pub struct StoreViewTask<V> {
    history: ViewHistory<V>,
}

impl<V> Default for StoreViewTask<V> {
    fn default() -> Self {
        StoreViewTask {
            history: ViewHistory::new(),
        }
    }
}

impl<V> StoreViewTask<V> {
    pub fn history(&self) -> &ViewHistory<V> {
        &self.history
    }
}

impl<V: Flaggable> ViewTask for StoreViewTask<V> {
    type Payload = BTreeMap<String, V>;
    type View = V;
    type Output = ViewHistory<V>;

    fn apply(
        &mut self,
        data: &DataResult<Self::Payload>,
    ) -> Result<ViewHistory<V>, CollaboratorError> {
        for (description, view) in &data.payload {
            self.history.add_view(description.clone(), view.clone());
        }
        Ok(self.history.clone())
    }
}

/// Applies flag commands to the store.
pub struct StoreFlagSetter<V> {
    store: SharedStore<V>,
    pending: Vec<FlagCommand>,
}

impl<V> StoreFlagSetter<V> {
    pub fn new(store: SharedStore<V>) -> Self {
        StoreFlagSetter {
            store,
            pending: vec![],
        }
    }
}

impl<V: FlagTarget> FlagSetter for StoreFlagSetter<V> {
    fn set_flags(&mut self, flags: &[FlagCommand]) {
        self.pending = flags.to_vec();
    }

    fn execute(&mut self, request: SummaryRequest) -> Result<FlagSetterResult, CollaboratorError> {
        let mut store = self.store.borrow_mut();
        let before = request.before.then(|| store.summary());
        let pending = std::mem::take(&mut self.pending);
        let count = store.apply(&pending);
        debug!(
            "Applied {} flag commands to '{}'; {count} points newly flagged",
            pending.len(),
            store.table
        );
        let after = request.after.then(|| store.summary());
        Ok(FlagSetterResult { before, after })
    }
}
