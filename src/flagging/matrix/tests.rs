// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::collections::{BTreeMap, BTreeSet};

use super::*;
use crate::{
    flagging::{AntennaNames, AntennaSelection, ExclusionNotice, Exclusions},
    view::{Axis, ChannelRange, TimeStamp, ViewMeta},
};

fn meta() -> ViewMeta {
    ViewMeta {
        table: "uid.ms".to_string(),
        spw: 0,
        pol: Some("XX".to_string()),
        ..Default::default()
    }
}

/// A view with antennas along x and times along y.
fn antenna_time_view(data: Array2<f64>, flag: Array2<bool>) -> MatrixView {
    let (nx, ny) = data.dim();
    MatrixView::new(
        meta(),
        Axis::new("Antenna", AxisData::Antenna((0..nx as u32).collect())),
        Axis::new(
            "Time",
            AxisData::Time((0..ny).map(|t| 1e9 + t as f64 * 8.0).collect()),
        ),
        data,
        flag,
    )
    .unwrap()
}

fn alternating(dim: (usize, usize)) -> Array2<f64> {
    Array2::from_shape_fn(dim, |(i, j)| if (i + j) % 2 == 0 { 0.9 } else { 1.1 })
}

fn run(view: &MatrixView, rules: &[MatrixRule], exclusions: &Exclusions) -> PassOutcome<Ix2> {
    let names = AntennaNames::default();
    let basebands = BTreeMap::new();
    let ctx = FlagContext {
        skip_fully_flagged: true,
        antenna_names: &names,
        extend_fields: false,
        extend_baseband: false,
        basebands: &basebands,
        exclusions,
    };
    flag_matrix_view(view, "test view", rules, &ctx)
}

#[test]
fn test_outlier_column() {
    let mut data = alternating((5, 5));
    data.column_mut(2).fill(50.0);
    let view = antenna_time_view(data, Array2::from_elem((5, 5), false));
    let rules = [MatrixRule::new(MatrixTest::Outlier { limit: 3.0 }).with_minsample(3)];

    let outcome = run(&view, &rules, &Exclusions::default());
    assert_eq!(outcome.flags.len(), 5);
    for (ant, cmd) in outcome.flags.iter().enumerate() {
        assert_eq!(cmd.reason, RuleKind::Outlier);
        assert_eq!(cmd.antenna, AntennaSelection::Antenna(ant.to_string()));
        assert_eq!(cmd.time, Some(TimeStamp(1e9 + 16.0)));
        assert_eq!(cmd.spws, Some(BTreeSet::from([0])));
        assert_eq!(cmd.pol.as_deref(), Some("XX"));
    }
    assert!(outcome.state.flag.column(2).iter().all(|&f| f));
    assert_eq!(outcome.state.flag.iter().filter(|&&f| f).count(), 5);
    assert!(outcome.state.flag_reason.column(2).iter().all(|&r| r == 1));
    assert!(outcome.notices.is_empty());

    // A second pass over the flagged view finds nothing.
    let view = MatrixView {
        flag: outcome.state.flag.clone(),
        ..view
    };
    let outcome = run(&view, &rules, &Exclusions::default());
    assert!(outcome.flags.is_empty());
    assert!(outcome.state.flag_reason.iter().all(|&r| r == 0));
}

#[test]
fn test_minsample_skips_rule() {
    let mut data = alternating((5, 5));
    data.column_mut(2).fill(50.0);
    let view = antenna_time_view(data, Array2::from_elem((5, 5), false));
    let rules = [MatrixRule::new(MatrixTest::Outlier { limit: 3.0 }).with_minsample(26)];

    let outcome = run(&view, &rules, &Exclusions::default());
    assert!(outcome.flags.is_empty());
    assert_eq!(outcome.state.flag, view.flag);
}

#[test]
fn test_max_abs_and_min_abs() {
    let mut data = Array2::from_elem((3, 4), 1.0);
    data[[0, 1]] = -7.0;
    data[[2, 3]] = 0.001;
    data[[1, 1]] = f64::NAN;
    let view = antenna_time_view(data, Array2::from_elem((3, 4), false));
    let rules = [
        MatrixRule::new(MatrixTest::MaxAbs { limit: 5.0 }),
        MatrixRule::new(MatrixTest::MinAbs { limit: 0.01 }),
    ];

    let outcome = run(&view, &rules, &Exclusions::default());
    assert_eq!(outcome.flags.len(), 2);
    assert_eq!(outcome.flags[0].reason, RuleKind::MaxAbs);
    assert_eq!(outcome.flags[1].reason, RuleKind::MinAbs);
    assert_eq!(outcome.state.flag_reason[[0, 1]], 1);
    assert_eq!(outcome.state.flag_reason[[2, 3]], 2);
    // NaNs are neither big nor small.
    assert!(!outcome.state.flag[[1, 1]]);
}

#[test]
fn test_nmedian() {
    let mut data = Array2::from_elem((2, 5), 2.0);
    data[[0, 0]] = 0.5;
    data[[1, 4]] = 9.0;
    let view = antenna_time_view(data, Array2::from_elem((2, 5), false));
    let rules = [MatrixRule::new(MatrixTest::Nmedian {
        lo_limit: Some(0.5),
        hi_limit: Some(2.0),
    })];

    let outcome = run(&view, &rules, &Exclusions::default());
    assert_eq!(outcome.flags.len(), 2);
    assert!(outcome.state.flag[[0, 0]]);
    assert!(outcome.state.flag[[1, 4]]);
}

#[test]
fn test_high_and_low_outliers() {
    let mut data = alternating((4, 6));
    data[[0, 0]] = 20.0;
    data[[3, 5]] = -20.0;
    let flag = Array2::from_elem((4, 6), false);

    let view = antenna_time_view(data.clone(), flag.clone());
    let outcome = run(
        &view,
        &[MatrixRule::new(MatrixTest::HighOutlier { limit: 3.0 })],
        &Exclusions::default(),
    );
    assert_eq!(outcome.flags.len(), 1);
    assert!(outcome.state.flag[[0, 0]]);
    assert!(!outcome.state.flag[[3, 5]]);

    let view = antenna_time_view(data, flag);
    let outcome = run(
        &view,
        &[MatrixRule::new(MatrixTest::LowOutlier { limit: 3.0 })],
        &Exclusions::default(),
    );
    assert_eq!(outcome.flags.len(), 1);
    assert!(!outcome.state.flag[[0, 0]]);
    assert!(outcome.state.flag[[3, 5]]);
}

#[test]
fn test_too_many_flags_row() {
    let data = Array2::from_elem((5, 5), 1.0);
    let mut flag = Array2::from_elem((5, 5), false);
    flag[[1, 0]] = true;
    flag[[1, 1]] = true;
    flag[[1, 2]] = true;
    let view = antenna_time_view(data, flag);
    let rules = [MatrixRule::new(MatrixTest::TooManyFlags {
        axis: Line::Row,
        limit: Some(0.5),
        excess_limit: None,
    })];

    let outcome = run(&view, &rules, &Exclusions::default());
    assert_eq!(outcome.flags.len(), 1);
    let cmd = &outcome.flags[0];
    assert_eq!(cmd.reason, RuleKind::TooManyFlags);
    assert_eq!(cmd.antenna, AntennaSelection::Antenna("1".to_string()));
    assert_eq!(cmd.time, None);
    assert_eq!(cmd.flag_coords, vec![Coordinate::Antenna(1)]);

    assert!(outcome.state.flag.row(1).iter().all(|&f| f));
    assert_eq!(outcome.state.flag_reason[[1, 3]], 1);
    assert_eq!(outcome.state.flag_reason[[1, 4]], 1);
    // Previously-flagged points keep no reason.
    assert_eq!(outcome.state.flag_reason[[1, 0]], 0);
    for i in [0, 2, 3, 4] {
        assert!(outcome.state.flag.row(i).iter().all(|&f| !f));
    }
}

#[test]
fn test_too_many_flags_excess_over_median() {
    let data = Array2::from_elem((4, 10), 1.0);
    let mut flag = Array2::from_elem((4, 10), false);
    // Every column has one flag, except column 7 which has three.
    for j in 0..10 {
        flag[[j % 4, j]] = true;
    }
    flag[[0, 7]] = true;
    flag[[1, 7]] = true;
    let view = antenna_time_view(data, flag);
    let rules = [MatrixRule::new(MatrixTest::TooManyFlags {
        axis: Line::Column,
        limit: None,
        excess_limit: Some(1),
    })];

    let outcome = run(&view, &rules, &Exclusions::default());
    assert_eq!(outcome.flags.len(), 1);
    assert_eq!(outcome.flags[0].time, Some(TimeStamp(1e9 + 56.0)));
    assert!(outcome.state.flag.column(7).iter().all(|&f| f));
}

#[test]
fn test_too_many_entirely_flagged() {
    let data = Array2::from_elem((4, 3), 1.0);
    let mut flag = Array2::from_elem((4, 3), false);
    flag.row_mut(0).fill(true);
    flag.row_mut(2).fill(true);
    let view = antenna_time_view(data, flag);
    let rules = [MatrixRule::new(MatrixTest::TooManyEntirelyFlagged {
        axis: Line::Row,
        limit: 0.5,
    })];

    let outcome = run(&view, &rules, &Exclusions::default());
    assert_eq!(outcome.flags.len(), 1);
    let cmd = &outcome.flags[0];
    assert_eq!(cmd.antenna, AntennaSelection::All);
    assert_eq!(cmd.time, None);
    assert!(cmd.flag_coords.is_empty());
    assert!(outcome.state.flag.iter().all(|&f| f));

    // Under the limit, nothing happens.
    let rules = [MatrixRule::new(MatrixTest::TooManyEntirelyFlagged {
        axis: Line::Row,
        limit: 0.75,
    })];
    let outcome = run(&view, &rules, &Exclusions::default());
    assert!(outcome.flags.is_empty());
}

#[test]
fn test_bad_antenna() {
    let mut data = alternating((4, 10));
    for j in 0..6 {
        data[[3, j]] = 0.1;
    }
    let view = antenna_time_view(data, Array2::from_elem((4, 10), false));
    let rules = [MatrixRule::new(MatrixTest::BadAntenna {
        limit: 2.0,
        frac_limit: Some(0.5),
        number_limit: None,
    })];

    let outcome = run(&view, &rules, &Exclusions::default());
    // Six low outliers, then the rest of the antenna.
    assert_eq!(outcome.flags.len(), 7);
    assert!(outcome.flags[..6]
        .iter()
        .all(|c| c.reason == RuleKind::LowOutlier && c.rule_name == RuleKind::BadAntenna));
    let last = &outcome.flags[6];
    assert_eq!(last.reason, RuleKind::BadAntenna);
    assert_eq!(last.antenna, AntennaSelection::Antenna("3".to_string()));
    assert_eq!(last.time, None);

    assert!(outcome.state.flag.row(3).iter().all(|&f| f));
    for i in 0..3 {
        assert!(outcome.state.flag.row(i).iter().all(|&f| !f));
    }
}

#[test]
fn test_bad_antenna_needs_antenna_axis() {
    let view = MatrixView::new(
        meta(),
        Axis::new("channels", AxisData::Channel(vec![0, 1, 2])),
        Axis::new("Time", AxisData::Time(vec![1e9, 1e9 + 8.0])),
        Array2::from_elem((3, 2), 1.0),
        Array2::from_elem((3, 2), false),
    )
    .unwrap();
    let rules = [MatrixRule::new(MatrixTest::BadAntenna {
        limit: 2.0,
        frac_limit: Some(0.1),
        number_limit: None,
    })];
    let outcome = run(&view, &rules, &Exclusions::default());
    assert!(outcome.flags.is_empty());
}

fn channel_baseline_view(data: Array2<f64>) -> MatrixView {
    let (nchan, _) = data.dim();
    let flag = Array2::from_elem(data.dim(), false);
    MatrixView::new(
        meta(),
        Axis::new("channels", AxisData::Channel((0..nchan as u32).collect())),
        Axis::new(
            "Baseline",
            AxisData::Baseline(vec![(0, 1), (0, 2), (1, 2), (0, 3), (1, 3), (2, 3)]),
        ),
        data,
        flag,
    )
    .unwrap()
}

#[test]
fn test_bad_quadrant_baseline() {
    let mut data = alternating((8, 6));
    // Baseline 1&2 is bad in the first quadrant.
    data[[0, 2]] = 10.0;
    data[[1, 2]] = 10.0;
    let view = channel_baseline_view(data);
    let rules = [MatrixRule::new(MatrixTest::BadQuadrant {
        limit: 5.0,
        frac_limit: 0.5,
        baseline_frac_limit: 0.5,
    })];

    let outcome = run(&view, &rules, &Exclusions::default());
    assert_eq!(outcome.flags.len(), 1);
    let cmd = &outcome.flags[0];
    assert_eq!(cmd.reason, RuleKind::BadQuadrant);
    assert_eq!(
        cmd.antenna,
        AntennaSelection::Baseline("1".to_string(), "2".to_string())
    );
    assert_eq!(cmd.channels, Some(ChannelRange::new(0, 1)));
    assert_eq!(outcome.state.flag.iter().filter(|&&f| f).count(), 2);
}

#[test]
fn test_bad_quadrant_antenna() {
    let mut data = alternating((8, 6));
    // Every baseline with antenna 3 is bad in the last quadrant.
    for bl in [3, 4, 5] {
        data[[6, bl]] = 10.0;
        data[[7, bl]] = 10.0;
    }
    let view = channel_baseline_view(data);
    let rules = [MatrixRule::new(MatrixTest::BadQuadrant {
        limit: 5.0,
        frac_limit: 0.5,
        baseline_frac_limit: 1.0,
    })];

    let outcome = run(&view, &rules, &Exclusions::default());
    assert_eq!(outcome.flags.len(), 1);
    let cmd = &outcome.flags[0];
    assert_eq!(cmd.antenna, AntennaSelection::Antenna("3".to_string()));
    assert_eq!(cmd.channels, Some(ChannelRange::new(6, 7)));
    assert_eq!(outcome.state.flag.iter().filter(|&&f| f).count(), 6);
}

#[test]
fn test_channel_runs_are_grouped() {
    let mut data = Array2::from_elem((8, 6), 1.0);
    for chan in 2..5 {
        data[[chan, 0]] = 100.0;
    }
    data[[6, 0]] = 100.0;
    let view = channel_baseline_view(data);
    let rules = [MatrixRule::new(MatrixTest::MaxAbs { limit: 10.0 })];

    let outcome = run(&view, &rules, &Exclusions::default());
    assert_eq!(outcome.flags.len(), 2);
    assert_eq!(outcome.flags[0].channels, Some(ChannelRange::new(2, 4)));
    assert_eq!(outcome.flags[1].channels, Some(ChannelRange::single(6)));
    assert_eq!(
        outcome.flags[0].antenna,
        AntennaSelection::Baseline("0".to_string(), "1".to_string())
    );
}

#[test]
fn test_exclusions_veto_flags() {
    let mut data = Array2::from_elem((8, 6), 1.0);
    data.row_mut(4).fill(10.0);
    data.row_mut(5).fill(10.0);
    let view = channel_baseline_view(data);
    let mut exclusions = Exclusions::default();
    exclusions.exclude_channels(0, 5, 5);
    let rules = [MatrixRule::new(MatrixTest::MaxAbs { limit: 5.0 })];

    let outcome = run(&view, &rules, &exclusions);
    assert!(outcome.state.flag.row(4).iter().all(|&f| f));
    assert!(outcome.state.flag.row(5).iter().all(|&f| !f));
    assert!(outcome
        .flags
        .iter()
        .all(|c| c.channels == Some(ChannelRange::single(4))));
    assert_eq!(
        outcome.notices,
        vec![ExclusionNotice {
            description: "test view".to_string(),
            rule: RuleKind::MaxAbs,
            num_rejected: 6,
        }]
    );
}

#[test]
fn test_vetoed_region_falls_back_to_points() {
    let data = Array2::from_elem((8, 6), 1.0);
    let mut flag = Array2::from_elem((8, 6), false);
    // Column 0 is mostly flagged.
    for chan in 0..6 {
        flag[[chan, 0]] = true;
    }
    let mut view = channel_baseline_view(data);
    view.flag = flag;
    let mut exclusions = Exclusions::default();
    exclusions.exclude_channels(0, 7, 7);
    let rules = [MatrixRule::new(MatrixTest::TooManyFlags {
        axis: Line::Column,
        limit: Some(0.5),
        excess_limit: None,
    })];

    let outcome = run(&view, &rules, &exclusions);
    assert_eq!(outcome.flags.len(), 1);
    assert_eq!(outcome.flags[0].channels, Some(ChannelRange::single(6)));
    assert!(outcome.state.flag[[6, 0]]);
    assert!(!outcome.state.flag[[7, 0]]);
    assert_eq!(outcome.notices.len(), 1);
}

#[test]
fn test_flags_only_increase() {
    let mut data = alternating((6, 6));
    data[[2, 2]] = 30.0;
    data[[4, 1]] = f64::NAN;
    let mut flag = Array2::from_elem((6, 6), false);
    flag[[0, 0]] = true;
    flag[[5, 5]] = true;
    let view = antenna_time_view(data, flag.clone());
    let rules = [
        MatrixRule::new(MatrixTest::Outlier { limit: 3.0 }),
        MatrixRule::new(MatrixTest::TooManyFlags {
            axis: Line::Row,
            limit: Some(0.3),
            excess_limit: None,
        }),
    ];

    let outcome = run(&view, &rules, &Exclusions::default());
    Zip::from(&flag)
        .and(&outcome.state.flag)
        .for_each(|&before, &after| assert!(!before || after));
    // The view itself is untouched.
    assert_eq!(view.flag, flag);
}

#[test]
fn test_fully_flagged_view_is_skipped() {
    let view = antenna_time_view(
        Array2::from_elem((2, 2), 100.0),
        Array2::from_elem((2, 2), true),
    );
    let rules = [MatrixRule::new(MatrixTest::TooManyEntirelyFlagged {
        axis: Line::Row,
        limit: 0.5,
    })];
    let outcome = run(&view, &rules, &Exclusions::default());
    assert!(outcome.flags.is_empty());
}
