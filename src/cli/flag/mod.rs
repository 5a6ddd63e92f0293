// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The `flag` subcommand: flag every view in some view files.
//!
//! Each view file is an independent job with its own flagger; jobs are run in
//! parallel.


use std::borrow::Cow;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use clap::Parser;
use itertools::Itertools;
use log::{debug, info, trace};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use vec1::Vec1;

use super::common::{
    display_warnings, read_rules_file, InfoPrinter, RulesFile, Warn, ARG_FILE_HELP,
    RULES_FILE_HELP,
};
use crate::{
    constants::{DEFAULT_NITER, DEFAULT_POLARISATIONS},
    flagging::{
        Catalogue, ConsolidateOptions, Exclusions, FlagSummary, Flaggable, Flagger,
        FlaggerConfig, FlaggerState, MatrixRule, VectorRule,
    },
    io::{
        read_view_file, write_flag_template, write_flags_json, write_report, FlagTarget,
        StoreDataTask, StoreFlagSetter, StoreViewTask, ViewFile, ViewStore,
    },
    HyperflagError,
};

lazy_static::lazy_static! {
    static ref NITER_HELP: String =
        format!("The maximum number of flagging iterations. Default: {DEFAULT_NITER}");

    static ref POLARISATIONS_HELP: String =
        format!("Flag commands differing only by polarisation are merged when they cover all of these polarisations. Default: {}", DEFAULT_POLARISATIONS.join(" "));
}

#[derive(Parser, Debug, Clone, Default, Serialize, Deserialize)]
pub(super) struct FlagArgs {
    #[clap(name = "ARGUMENTS_FILE", help = ARG_FILE_HELP.as_str(), parse(from_os_str))]
    pub(super) args_file: Option<PathBuf>,

    /// Paths to the view files (json or toml) to be flagged. Each file is
    /// flagged independently of the others.
    #[clap(
        short = 'i',
        long,
        multiple_values(true),
        parse(from_os_str),
        help_heading = "INPUT FILES"
    )]
    pub(super) views: Option<Vec<PathBuf>>,

    #[clap(short, long, parse(from_os_str), help = RULES_FILE_HELP.as_str(), help_heading = "INPUT FILES")]
    pub(super) rules: Option<PathBuf>,

    #[clap(short, long, help = NITER_HELP.as_str(), help_heading = "FLAGGING")]
    pub(super) niter: Option<usize>,

    /// Re-read the views every iteration, applying the flags found so far
    /// beforehand. By default, views are read once and flags are carried
    /// between iterations in memory.
    #[clap(long, help_heading = "FLAGGING")]
    #[serde(default)]
    pub(super) iterate_data_task: bool,

    /// Evaluate rules even on views that are entirely flagged.
    #[clap(long, help_heading = "FLAGGING")]
    #[serde(default)]
    pub(super) evaluate_fully_flagged: bool,

    /// Refer to antennas by name in flag commands, rather than by ID.
    #[clap(long, help_heading = "FLAGGING")]
    #[serde(default)]
    pub(super) use_antenna_names: bool,

    /// Flag commands apply to all fields.
    #[clap(long, help_heading = "FLAGGING")]
    #[serde(default)]
    pub(super) extend_fields: bool,

    /// Flag commands apply to every spectral window in the same baseband.
    #[clap(long, help_heading = "FLAGGING")]
    #[serde(default)]
    pub(super) extend_baseband: bool,

    /// Channels that must never be flagged, given as SPW:CHANNEL or
    /// SPW:FIRST~LAST (e.g. 17:100~120).
    #[clap(long, multiple_values(true), help_heading = "FLAGGING")]
    pub(super) exclude_channels: Option<Vec<String>>,

    #[clap(long, multiple_values(true), help = POLARISATIONS_HELP.as_str(), help_heading = "FLAGGING")]
    pub(super) polarisations: Option<Vec<String>>,

    /// Copy flag commands of one intent to others, given as
    /// INTENT=OTHER[,OTHER...] (e.g. BANDPASS=PHASE,TARGET).
    #[clap(long, multiple_values(true), help_heading = "FLAGGING")]
    pub(super) propagate_intents: Option<Vec<String>>,

    /// The directory to write flags and reports to. Default: the current
    /// directory.
    #[clap(short, long, parse(from_os_str), help_heading = "OUTPUT FILES")]
    pub(super) output_dir: Option<PathBuf>,

    /// Don't write a json report of each flagging job.
    #[clap(long, help_heading = "OUTPUT FILES")]
    #[serde(default)]
    pub(super) no_report: bool,
}

impl FlagArgs {
    /// Both command-line and file arguments overlap in terms of what is
    /// available; this function consolidates everything that was specified into
    /// a single struct. Where applicable, it will prefer CLI parameters over
    /// those in the file.
    ///
    /// This function should only ever merge arguments, and not try to make
    /// sense of them.
    pub(super) fn merge(self) -> Result<FlagArgs, HyperflagError> {
        debug!("Merging command-line arguments with the argument file");

        let cli_args = self;

        if let Some(arg_file) = cli_args.args_file {
            // Read in the file arguments. Ensure all of the file args are
            // accounted for by pattern matching.
            let FlagArgs {
                args_file: _,
                views,
                rules,
                niter,
                iterate_data_task,
                evaluate_fully_flagged,
                use_antenna_names,
                extend_fields,
                extend_baseband,
                exclude_channels,
                polarisations,
                propagate_intents,
                output_dir,
                no_report,
            } = unpack_arg_file!(arg_file);

            // Merge all the arguments, preferring the CLI args when available.
            Ok(FlagArgs {
                args_file: None,
                views: cli_args.views.or(views),
                rules: cli_args.rules.or(rules),
                niter: cli_args.niter.or(niter),
                iterate_data_task: cli_args.iterate_data_task || iterate_data_task,
                evaluate_fully_flagged: cli_args.evaluate_fully_flagged || evaluate_fully_flagged,
                use_antenna_names: cli_args.use_antenna_names || use_antenna_names,
                extend_fields: cli_args.extend_fields || extend_fields,
                extend_baseband: cli_args.extend_baseband || extend_baseband,
                exclude_channels: cli_args.exclude_channels.or(exclude_channels),
                polarisations: cli_args.polarisations.or(polarisations),
                propagate_intents: cli_args.propagate_intents.or(propagate_intents),
                output_dir: cli_args.output_dir.or(output_dir),
                no_report: cli_args.no_report || no_report,
            })
        } else {
            Ok(cli_args)
        }
    }

    pub(super) fn parse(self) -> Result<FlagParams, HyperflagError> {
        debug!("{:#?}", self);

        let Self {
            args_file: _,
            views,
            rules,
            niter,
            iterate_data_task,
            evaluate_fully_flagged,
            use_antenna_names,
            extend_fields,
            extend_baseband,
            exclude_channels,
            polarisations,
            propagate_intents,
            output_dir,
            no_report,
        } = self;

        let view_files = views
            .and_then(|v| Vec1::try_from_vec(v).ok())
            .ok_or(FlagArgsError::NoViewFiles)?;
        let rules_file = rules.ok_or(FlagArgsError::NoRules)?;
        let rules = read_rules_file(&rules_file)?;
        // Check the rules now, rather than once per job.
        let num_rules = match rules.catalogue {
            Catalogue::Matrix => rules.parse::<MatrixRule>()?.len(),
            Catalogue::Vector => rules.parse::<VectorRule>()?.len(),
        };

        let niter = NonZeroUsize::new(niter.unwrap_or(DEFAULT_NITER))
            .ok_or(FlagArgsError::ZeroNiter)?;

        let mut exclusions = Exclusions::default();
        for s in exclude_channels.unwrap_or_default() {
            let (spw, first, last) = parse_channel_exclusion(&s)?;
            exclusions.exclude_channels(spw, first, last);
        }

        let consolidation = match polarisations {
            Some(pols) if pols.is_empty() => return Err(FlagArgsError::NoPolarisations.into()),
            Some(pols) => ConsolidateOptions {
                polarisations: pols.into_iter().collect(),
            },
            None => ConsolidateOptions::default(),
        };

        let mut intent_propagation: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for s in propagate_intents.unwrap_or_default() {
            let (from, to) = parse_intent_propagation(&s)?;
            intent_propagation.entry(from).or_default().extend(to);
        }

        let output_dir = match output_dir {
            Some(d) => d,
            None => {
                "No output directory was specified; writing to the current directory".warn();
                PathBuf::from(".")
            }
        };

        let mut printer = InfoPrinter::new("Flagging set up".into());
        printer.push_block(
            std::iter::once(Cow::from(format!("{} view files:", view_files.len())))
                .chain(
                    view_files
                        .iter()
                        .map(|f| Cow::from(format!("  {}", f.display()))),
                )
                .collect(),
        );
        printer.push_line(
            format!(
                "{num_rules} {} rules from {}",
                rules.catalogue,
                rules_file.display()
            )
            .into(),
        );
        let mut block: Vec<Cow<'static, str>> = vec![format!(
            "At most {niter} iterations{}",
            if iterate_data_task {
                "; views are re-read every iteration"
            } else {
                ""
            }
        )
        .into()];
        if evaluate_fully_flagged {
            block.push("Entirely-flagged views are evaluated".into());
        }
        if extend_fields {
            block.push("Flags apply to all fields".into());
        }
        if extend_baseband {
            block.push("Flags apply to all spectral windows of a baseband".into());
        }
        printer.push_block(block);
        if !exclusions.is_empty() {
            printer.push_block(
                exclusions
                    .channels
                    .iter()
                    .map(|(spw, chans)| {
                        format!("Excluded channels of spw {spw}: {}", chans.iter().join(" ")).into()
                    })
                    .collect(),
            );
        }
        for (from, to) in &intent_propagation {
            printer.push_line(format!("{from} flags are copied to {}", to.join(", ")).into());
        }
        printer.push_line(format!("Writing to {}", output_dir.display()).into());
        printer.display();
        display_warnings();

        Ok(FlagParams {
            view_files,
            rules,
            niter,
            iterate_data_task,
            skip_fully_flagged: !evaluate_fully_flagged,
            use_antenna_names,
            extend_fields,
            extend_baseband,
            exclusions,
            consolidation,
            intent_propagation,
            output_dir,
            write_report: !no_report,
        })
    }

    pub(super) fn run(self, dry_run: bool) -> Result<(), HyperflagError> {
        debug!("Converting arguments into parameters");
        trace!("{:#?}", self);
        let params = self.parse()?;

        if dry_run {
            info!("Dry run -- exiting now.");
            return Ok(());
        }

        params.run()
    }
}

/// Parse "SPW:CHANNEL" or "SPW:FIRST~LAST".
fn parse_channel_exclusion(s: &str) -> Result<(u32, u32, u32), FlagArgsError> {
    let bad = || FlagArgsError::BadChannelExclusion(s.to_string());
    let (spw, chans) = s.trim().split_once(':').ok_or_else(bad)?;
    let spw = spw.trim().parse().map_err(|_| bad())?;
    let (first, last) = match chans.split_once('~') {
        Some((first, last)) => (first, last),
        None => (chans, chans),
    };
    let first = first.trim().parse().map_err(|_| bad())?;
    let last = last.trim().parse().map_err(|_| bad())?;
    Ok((spw, first, last))
}

/// Parse "INTENT=OTHER[,OTHER...]".
fn parse_intent_propagation(s: &str) -> Result<(String, Vec<String>), FlagArgsError> {
    let bad = || FlagArgsError::BadIntentPropagation(s.to_string());
    let (from, to) = s.split_once('=').ok_or_else(bad)?;
    let from = from.trim();
    let to: Vec<String> = to
        .split(',')
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect();
    if from.is_empty() || to.is_empty() {
        return Err(bad());
    }
    Ok((from.to_string(), to))
}

#[derive(Debug)]
pub(super) struct FlagParams {
    pub(super) view_files: Vec1<PathBuf>,
    pub(super) rules: RulesFile,
    pub(super) niter: NonZeroUsize,
    pub(super) iterate_data_task: bool,
    pub(super) skip_fully_flagged: bool,
    pub(super) use_antenna_names: bool,
    pub(super) extend_fields: bool,
    pub(super) extend_baseband: bool,
    pub(super) exclusions: Exclusions,
    pub(super) consolidation: ConsolidateOptions,
    pub(super) intent_propagation: BTreeMap<String, Vec<String>>,
    pub(super) output_dir: PathBuf,
    pub(super) write_report: bool,
}

/// What came of flagging a single view file.
#[derive(Debug)]
pub(super) struct JobSummary {
    pub(super) file: PathBuf,
    pub(super) table: String,
    pub(super) stopped: FlaggerState,
    pub(super) iterations: usize,
    pub(super) before: FlagSummary,
    pub(super) after: FlagSummary,
    pub(super) num_flags: usize,
    pub(super) outputs: Vec<PathBuf>,
}

impl JobSummary {
    fn display(&self) {
        let mut printer = InfoPrinter::new(
            format!("{} (table '{}')", self.file.display(), self.table).into(),
        );
        printer.push_line(
            format!("Stopped {} after {} iterations", self.stopped, self.iterations).into(),
        );
        printer.push_block(vec![
            format!(
                "Flagged before: {}/{} ({:.2}%)",
                self.before.flagged,
                self.before.total,
                self.before.fraction() * 100.0
            )
            .into(),
            format!(
                "Flagged after:  {}/{} ({:.2}%)",
                self.after.flagged,
                self.after.total,
                self.after.fraction() * 100.0
            )
            .into(),
        ]);
        printer.push_line(format!("{} flag commands", self.num_flags).into());
        printer.push_block(
            self.outputs
                .iter()
                .map(|o| Cow::from(format!("Wrote {}", o.display())))
                .collect(),
        );
        printer.display();
    }
}

impl FlagParams {
    pub(super) fn run(&self) -> Result<(), HyperflagError> {
        std::fs::create_dir_all(&self.output_dir)?;

        let results: Vec<Result<JobSummary, HyperflagError>> = self
            .view_files
            .par_iter()
            .map(|file| self.flag_file(file))
            .collect();

        let mut first_error = None;
        for (file, result) in self.view_files.iter().zip(results) {
            match result {
                Ok(summary) => summary.display(),
                Err(e) => {
                    log::error!("{}: {e}", file.display());
                    first_error.get_or_insert(e);
                }
            }
        }
        display_warnings();

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Flag all of the views in one file.
    pub(super) fn flag_file(&self, file: &Path) -> Result<JobSummary, HyperflagError> {
        let view_file = read_view_file(file)?;
        if view_file.kind != self.rules.catalogue {
            return Err(FlagArgsError::CatalogueMismatch {
                file: file.to_path_buf(),
                views: view_file.kind,
                rules: self.rules.catalogue,
            }
            .into());
        }
        debug!(
            "{}: {} {} views",
            file.display(),
            view_file.views.len(),
            view_file.kind
        );

        match view_file.kind {
            Catalogue::Matrix => {
                let views = view_file.matrix_views()?;
                let rules = self.rules.parse::<MatrixRule>()?;
                self.flag_views(file, &view_file, views, rules)
            }
            Catalogue::Vector => {
                let views = view_file.vector_views()?;
                let rules = self.rules.parse::<VectorRule>()?;
                self.flag_views(file, &view_file, views, rules)
            }
        }
    }

    fn flag_views<V>(
        &self,
        file: &Path,
        view_file: &ViewFile,
        views: BTreeMap<String, V>,
        rules: Vec1<V::Rule>,
    ) -> Result<JobSummary, HyperflagError>
    where
        V: Flaggable + FlagTarget,
        V::Dim: Serialize,
    {
        let antenna_names = view_file.antenna_names(self.use_antenna_names);
        let store = Rc::new(RefCell::new(ViewStore::new(
            view_file.table.clone(),
            views,
            antenna_names.clone(),
        )));
        let config = FlaggerConfig {
            rules,
            niter: self.niter,
            iterate_data_task: self.iterate_data_task,
            skip_fully_flagged: self.skip_fully_flagged,
            antenna_names,
            extend_fields: self.extend_fields,
            extend_baseband: self.extend_baseband,
            basebands: view_file.basebands(),
            exclusions: self.exclusions.clone(),
            consolidation: self.consolidation.clone(),
            intent_propagation: self.intent_propagation.clone(),
        };
        let mut flagger = Flagger::new(
            config,
            StoreDataTask::new(store.clone()),
            StoreViewTask::default(),
            StoreFlagSetter::new(store),
        );
        let result = flagger.run()?;

        for notice in &result.notices {
            format!(
                "{}: '{}' wasn't allowed to flag {} points of '{}'",
                file.display(),
                notice.rule,
                notice.num_rejected,
                notice.description
            )
            .warn();
        }

        let stem = file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "views".to_string());
        let flags_json = self.output_dir.join(format!("{stem}_flags.json"));
        write_flags_json(&flags_json, &result.flags)?;
        let template = self.output_dir.join(format!("{stem}_flagtemplate.txt"));
        write_flag_template(&template, &result.flags)?;
        let mut outputs = vec![flags_json, template];
        if self.write_report {
            let report = self.output_dir.join(format!("{stem}_report.json"));
            write_report(&report, &result)?;
            outputs.push(report);
        }

        Ok(JobSummary {
            file: file.to_path_buf(),
            table: result.table,
            stopped: result.stopped,
            iterations: result.iterations,
            before: result.before,
            after: result.after,
            num_flags: result.flags.len(),
            outputs,
        })
    }
}

#[derive(Error, Debug)]
pub(super) enum FlagArgsError {
    #[error("No view files were specified")]
    NoViewFiles,

    #[error("No rules file was specified")]
    NoRules,

    #[error("The number of iterations must be at least 1")]
    ZeroNiter,

    #[error("An empty list of polarisations was given")]
    NoPolarisations,

    #[error("Couldn't parse channel exclusion '{0}'; expected SPW:CHANNEL or SPW:FIRST~LAST")]
    BadChannelExclusion(String),

    #[error("Couldn't parse intent propagation '{0}'; expected INTENT=OTHER[,OTHER...]")]
    BadIntentPropagation(String),

    #[error("'{}' contains {views} views, but the rules are for {rules} views", file.display())]
    CatalogueMismatch {
        file: PathBuf,
        views: Catalogue,
        rules: Catalogue,
    },
}
