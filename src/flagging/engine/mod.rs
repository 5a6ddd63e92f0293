// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The flagger engine.
//!
//! The engine doesn't touch any storage itself. It asks a [`DataTask`] for
//! data, a [`ViewTask`] to turn that data into views, evaluates rules against
//! every view and hands the resulting flag commands to a [`FlagSetter`]. This
//! is repeated until no new flags are found or the iteration limit is hit:
//!
//! ```text
//! INIT -> ITERATING -> {CONVERGED | EXHAUSTED | NO_VIEW} -> FINALIZING -> DONE
//! ```

mod error;

pub use error::{CollaboratorError, FlaggerError};

use std::collections::{BTreeMap, BTreeSet};
use std::num::NonZeroUsize;

use log::{debug, info, warn};
use ndarray::{prelude::*, Dimension};
use serde::{Deserialize, Serialize};
use strum_macros::Display;
use vec1::Vec1;

use super::{
    command::{AntennaNames, FlagCommand},
    consolidate::{consolidate, propagate_intents, ConsolidateOptions},
    matrix::flag_matrix_view,
    pass::{ExclusionNotice, Exclusions, FlagContext, PassOutcome},
    rules::{MatrixRule, Rule, VectorRule},
    vector::flag_vector_view,
};
use crate::{
    constants::{DEFAULT_NITER, DEFAULT_SKIP_FULLY_FLAGGED},
    view::{MatrixView, VectorView, ViewResult},
};

/// A view that rules can be evaluated against.
pub trait Flaggable: Clone {
    type Dim: Dimension;
    type Rule: Rule;

    /// Run `rules`, in order, over this view.
    fn flag_view<'a>(
        &'a self,
        description: &'a str,
        rules: &[Self::Rule],
        ctx: &FlagContext<'a>,
    ) -> PassOutcome<Self::Dim>;

    fn flags(&self) -> &Array<bool, Self::Dim>;

    /// A copy of this view with different flags.
    fn with_flags(&self, flag: Array<bool, Self::Dim>) -> Self;
}

impl Flaggable for MatrixView {
    type Dim = Ix2;
    type Rule = MatrixRule;

    fn flag_view<'a>(
        &'a self,
        description: &'a str,
        rules: &[MatrixRule],
        ctx: &FlagContext<'a>,
    ) -> PassOutcome<Ix2> {
        flag_matrix_view(self, description, rules, ctx)
    }

    fn flags(&self) -> &Array2<bool> {
        &self.flag
    }

    fn with_flags(&self, flag: Array2<bool>) -> MatrixView {
        MatrixView {
            meta: self.meta.clone(),
            x: self.x.clone(),
            y: self.y.clone(),
            data: self.data.clone(),
            flag,
        }
    }
}

impl Flaggable for VectorView {
    type Dim = Ix1;
    type Rule = VectorRule;

    fn flag_view<'a>(
        &'a self,
        description: &'a str,
        rules: &[VectorRule],
        ctx: &FlagContext<'a>,
    ) -> PassOutcome<Ix1> {
        flag_vector_view(self, description, rules, ctx)
    }

    fn flags(&self) -> &Array1<bool> {
        &self.flag
    }

    fn with_flags(&self, flag: Array1<bool>) -> VectorView {
        VectorView {
            meta: self.meta.clone(),
            axis: self.axis.clone(),
            data: self.data.clone(),
            flag,
        }
    }
}

/// The product of a [`DataTask`].
#[derive(Debug, Clone)]
pub struct DataResult<P> {
    /// The table the data came from.
    pub table: String,
    /// `false` if this result was reused from an earlier iteration.
    pub is_new: bool,
    pub payload: P,
}

/// Produces data, e.g. by reading a measurement set or solving for a
/// calibration.
pub trait DataTask {
    type Payload;

    fn run(&mut self) -> Result<DataResult<Self::Payload>, CollaboratorError>;
}

/// Turns data into views.
pub trait ViewTask {
    type Payload;
    type View: Flaggable;
    type Output: ViewResult<View = Self::View>;

    fn apply(
        &mut self,
        data: &DataResult<Self::Payload>,
    ) -> Result<Self::Output, CollaboratorError>;
}

/// Which summaries should accompany the application of flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SummaryRequest {
    /// A summary of the flags before the pending commands are applied.
    pub before: bool,
    /// A summary of the flags after the pending commands are applied.
    pub after: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FlagSummary {
    pub total: usize,
    pub flagged: usize,
}

impl FlagSummary {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.flagged as f64 / self.total as f64
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlagSetterResult {
    pub before: Option<FlagSummary>,
    pub after: Option<FlagSummary>,
}

/// Durably applies flag commands.
pub trait FlagSetter {
    /// Set the commands to be applied by the next [`FlagSetter::execute`].
    fn set_flags(&mut self, flags: &[FlagCommand]);

    /// Apply the pending commands. Every summary that was requested must be
    /// present in the result.
    fn execute(&mut self, request: SummaryRequest) -> Result<FlagSetterResult, CollaboratorError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum FlaggerState {
    Init,
    Iterating,
    /// An iteration found no new flags.
    Converged,
    /// The iteration limit was reached.
    Exhausted,
    /// The view task produced nothing to look at.
    NoView,
    Finalizing,
    Done,
}

#[derive(Debug, Clone)]
pub struct FlaggerConfig<R> {
    /// The rules, in evaluation order.
    pub rules: Vec1<R>,

    /// The maximum number of iterations.
    pub niter: NonZeroUsize,

    /// Re-run the data task every iteration (applying the flags found so far
    /// beforehand)? Otherwise the first data result is reused and flags are
    /// only carried along in memory.
    pub iterate_data_task: bool,

    pub skip_fully_flagged: bool,

    pub antenna_names: AntennaNames,

    /// Flag commands should apply to all fields.
    pub extend_fields: bool,

    /// Flag commands should apply to all spectral windows in the same
    /// baseband.
    pub extend_baseband: bool,

    /// Spectral windows keyed by baseband.
    pub basebands: BTreeMap<u32, BTreeSet<u32>>,

    pub exclusions: Exclusions,

    pub consolidation: ConsolidateOptions,

    /// Maps an intent to the intents that inherit its flags.
    pub intent_propagation: BTreeMap<String, Vec<String>>,
}

impl<R> FlaggerConfig<R> {
    pub fn new(rules: Vec1<R>) -> FlaggerConfig<R> {
        FlaggerConfig {
            rules,
            niter: NonZeroUsize::new(DEFAULT_NITER).unwrap_or(NonZeroUsize::MIN),
            iterate_data_task: false,
            skip_fully_flagged: DEFAULT_SKIP_FULLY_FLAGGED,
            antenna_names: AntennaNames::default(),
            extend_fields: false,
            extend_baseband: false,
            basebands: BTreeMap::new(),
            exclusions: Exclusions::default(),
            consolidation: ConsolidateOptions::default(),
            intent_propagation: BTreeMap::new(),
        }
    }

    fn context(&self) -> FlagContext {
        FlagContext {
            skip_fully_flagged: self.skip_fully_flagged,
            antenna_names: &self.antenna_names,
            extend_fields: self.extend_fields,
            extend_baseband: self.extend_baseband,
            basebands: &self.basebands,
            exclusions: &self.exclusions,
        }
    }
}

/// Everything the flagger found.
#[derive(Debug, Clone)]
pub struct FlaggerResult<V: Flaggable> {
    pub table: String,

    /// The last evaluated view of each description, with the flags found
    /// overlaid. The data task isn't run again for these, so when iterating
    /// the data task they are not derived from data with the final flags
    /// applied.
    pub views: BTreeMap<String, V>,

    /// The consolidated flag commands.
    pub flags: Vec<FlagCommand>,

    /// For each description, the (1-based) index of the rule that flagged each
    /// point. Zero means the point wasn't flagged by the flagger.
    pub flag_reason_planes: BTreeMap<String, Array<u16, V::Dim>>,

    pub before: FlagSummary,
    pub after: FlagSummary,

    pub notices: Vec<ExclusionNotice>,

    /// Why iterating stopped; one of [`FlaggerState::Converged`],
    /// [`FlaggerState::Exhausted`] or [`FlaggerState::NoView`].
    pub stopped: FlaggerState,

    pub iterations: usize,
}

pub struct Flagger<D, T, S>
where
    D: DataTask,
    T: ViewTask<Payload = D::Payload>,
    S: FlagSetter,
{
    config: FlaggerConfig<<T::View as Flaggable>::Rule>,
    data_task: D,
    view_task: T,
    flag_setter: S,
    state: FlaggerState,
}

fn require(summary: Option<FlagSummary>, which: &'static str) -> Result<FlagSummary, FlaggerError> {
    summary.ok_or(FlaggerError::MalformedFlagSetterResult { which })
}

/// Overlay the flags of the previous evaluation of a view onto a view derived
/// from reused data.
fn carry_flags<V: Flaggable>(latest: &V, previous: Option<&V>, is_new: bool) -> V {
    match previous {
        Some(previous) if !is_new => {
            if previous.flags().shape() == latest.flags().shape() {
                let mut flag = latest.flags().clone();
                flag.zip_mut_with(previous.flags(), |f, &p| *f |= p);
                latest.with_flags(flag)
            } else {
                warn!("A view changed shape between iterations; not carrying its flags");
                latest.clone()
            }
        }
        _ => latest.clone(),
    }
}

impl<D, T, S> Flagger<D, T, S>
where
    D: DataTask,
    T: ViewTask<Payload = D::Payload>,
    S: FlagSetter,
{
    pub fn new(
        config: FlaggerConfig<<T::View as Flaggable>::Rule>,
        data_task: D,
        view_task: T,
        flag_setter: S,
    ) -> Self {
        Flagger {
            config,
            data_task,
            view_task,
            flag_setter,
            state: FlaggerState::Init,
        }
    }

    pub fn state(&self) -> FlaggerState {
        self.state
    }

    pub fn config(&self) -> &FlaggerConfig<<T::View as Flaggable>::Rule> {
        &self.config
    }

    pub fn data_task(&self) -> &D {
        &self.data_task
    }

    pub fn view_task(&self) -> &T {
        &self.view_task
    }

    pub fn flag_setter(&self) -> &S {
        &self.flag_setter
    }

    fn transition(&mut self, state: FlaggerState) {
        debug!("Flagger state {} -> {state}", self.state);
        self.state = state;
    }

    fn apply(
        &mut self,
        flags: &[FlagCommand],
        request: SummaryRequest,
    ) -> Result<FlagSetterResult, FlaggerError> {
        debug!("Applying {} flag commands", flags.len());
        self.flag_setter.set_flags(flags);
        self.flag_setter
            .execute(request)
            .map_err(FlaggerError::FlagSetter)
    }

    /// Run the flagger to completion. A flagger can only be run once.
    pub fn run(&mut self) -> Result<FlaggerResult<T::View>, FlaggerError> {
        if self.state != FlaggerState::Init {
            return Err(FlaggerError::AlreadyRun);
        }
        self.transition(FlaggerState::Iterating);

        let niter = self.config.niter.get();
        let mut data: Option<DataResult<D::Payload>> = None;
        let mut flags: Vec<FlagCommand> = vec![];
        let mut num_applied = 0;
        let mut before: Option<FlagSummary> = None;
        let mut views: BTreeMap<String, T::View> = BTreeMap::new();
        let mut planes: BTreeMap<String, Array<u16, <T::View as Flaggable>::Dim>> =
            BTreeMap::new();
        let mut notices = vec![];
        let mut iterations = 0;
        let mut stopped = FlaggerState::Exhausted;

        for iteration in 1..=niter {
            iterations = iteration;

            let data_result = match data.take() {
                Some(mut previous) if !self.config.iterate_data_task => {
                    debug!("Iteration {iteration}: reusing data");
                    previous.is_new = false;
                    previous
                }
                _ => {
                    debug!("Iteration {iteration}: running the data task");
                    self.data_task.run().map_err(FlaggerError::DataTask)?
                }
            };

            let view_result = self
                .view_task
                .apply(&data_result)
                .map_err(FlaggerError::ViewTask)?;
            let descriptions = view_result.descriptions();
            if descriptions.is_empty() {
                warn!("Iteration {iteration}: no views to flag");
                data = Some(data_result);
                stopped = FlaggerState::NoView;
                break;
            }

            let ctx = self.config.context();
            let mut new_flags = vec![];
            for description in &descriptions {
                let Some(latest) = view_result.last(description) else {
                    continue;
                };
                let view = carry_flags(latest, views.get(description), data_result.is_new);
                let PassOutcome {
                    flags: view_flags,
                    state,
                    notices: view_notices,
                } = view.flag_view(description, &self.config.rules, &ctx);
                if !view_flags.is_empty() {
                    debug!(
                        "Iteration {iteration}: {description}: {} new flag commands",
                        view_flags.len()
                    );
                }
                new_flags.extend(view_flags);
                notices.extend(view_notices);

                let plane = match planes.remove(description) {
                    Some(mut old) if old.shape() == state.flag_reason.shape() => {
                        old.zip_mut_with(&state.flag_reason, |o, &n| {
                            if *o == 0 {
                                *o = n
                            }
                        });
                        old
                    }
                    _ => state.flag_reason,
                };
                planes.insert(description.clone(), plane);
                views.insert(description.clone(), view.with_flags(state.flag));
            }
            data = Some(data_result);

            info!(
                "Iteration {iteration}/{niter}: {} new flag commands",
                new_flags.len()
            );
            if new_flags.is_empty() {
                stopped = FlaggerState::Converged;
                break;
            }
            flags.extend(new_flags);

            if self.config.iterate_data_task {
                // The next data task run must see these flags.
                let request = SummaryRequest {
                    before: before.is_none(),
                    after: false,
                };
                let result = self.apply(&flags[num_applied..], request)?;
                if request.before {
                    before = Some(require(result.before, "before")?);
                }
                num_applied = flags.len();
            }
        }
        self.transition(stopped);
        self.transition(FlaggerState::Finalizing);

        let final_flags = propagate_intents(
            consolidate(flags.clone(), &self.config.consolidation),
            &self.config.intent_propagation,
        );
        let (before, after) = if flags.is_empty() {
            let result = self.apply(
                &[],
                SummaryRequest {
                    before: true,
                    after: false,
                },
            )?;
            let summary = require(result.before, "before")?;
            (summary, summary)
        } else {
            let applied = &flags[..num_applied];
            let pending: Vec<FlagCommand> = final_flags
                .iter()
                .filter(|cmd| !applied.iter().any(|a| a.covers(cmd)))
                .cloned()
                .collect();
            let request = SummaryRequest {
                before: before.is_none(),
                after: true,
            };
            let result = self.apply(&pending, request)?;
            let before = match before {
                Some(b) => b,
                None => require(result.before, "before")?,
            };
            (before, require(result.after, "after")?)
        };
        info!(
            "Flagged {:.2}% before, {:.2}% after ({} flag commands)",
            before.fraction() * 100.0,
            after.fraction() * 100.0,
            final_flags.len()
        );

        self.transition(FlaggerState::Done);
        Ok(FlaggerResult {
            table: data.map(|d| d.table).unwrap_or_default(),
            views,
            flags: final_flags,
            flag_reason_planes: planes,
            before,
            after,
            notices,
            stopped,
            iterations,
        })
    }
}
