// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Iterative, rule-based flagging of views.
//!
//! An ordered sequence of rules is evaluated against each view. Rules share a
//! [`PassState`], so later rules see the flags set by earlier rules. New flags
//! are turned into [`FlagCommand`]s, which are eventually consolidated and
//! handed to a [`FlagSetter`].

mod command;
mod consolidate;
mod engine;
mod error;
mod matrix;
mod pass;
mod rules;
mod vector;

pub use command::{AntennaNames, AntennaSelection, CommandScope, FlagCommand};
pub use consolidate::{consolidate, propagate_intents, ConsolidateOptions};
pub use engine::{
    CollaboratorError, DataResult, DataTask, FlagSetter, FlagSetterResult, FlagSummary,
    Flaggable, Flagger, FlaggerConfig, FlaggerError, FlaggerResult, FlaggerState,
    SummaryRequest, ViewTask,
};
pub use error::RuleError;
pub use matrix::flag_matrix_view;
pub use pass::{ExclusionNotice, Exclusions, FlagContext, PassOutcome, PassState};
pub use rules::{
    parse_rules, Catalogue, Line, MatrixRule, MatrixTest, Rule, RuleKind, VectorRule, VectorTest,
};
pub use vector::flag_vector_view;
