// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::collections::{BTreeMap, BTreeSet};

use super::*;
use crate::{
    flagging::{AntennaNames, AntennaSelection, Exclusions},
    view::{Axis, ChannelRange, ViewMeta},
};

fn spectrum(data: Array1<f64>, flag: Array1<bool>) -> VectorView {
    let n = data.len() as u32;
    VectorView::new(
        ViewMeta {
            table: "uid.ms".to_string(),
            spw: 17,
            antenna: Some(4),
            pol: Some("YY".to_string()),
            ..Default::default()
        },
        Axis::new("channels", AxisData::Channel((0..n).collect())),
        data,
        flag,
    )
    .unwrap()
}

fn unflagged(data: Array1<f64>) -> VectorView {
    let flag = Array1::from_elem(data.len(), false);
    spectrum(data, flag)
}

fn run(view: &VectorView, rules: &[VectorRule], exclusions: &Exclusions) -> PassOutcome<Ix1> {
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
    flag_vector_view(view, "spw 17 ant 4", rules, &ctx)
}

#[test]
fn test_max_abs_single_channel() {
    let mut data = Array1::from_shape_fn(20, |i| (i % 4) as f64);
    data[10] = 9.0;
    let view = unflagged(data);
    let rules = [VectorRule::new(VectorTest::MaxAbs { limit: 5.0 })];

    let outcome = run(&view, &rules, &Exclusions::default());
    assert_eq!(outcome.flags.len(), 1);
    let cmd = &outcome.flags[0];
    assert_eq!(cmd.reason, RuleKind::MaxAbs);
    assert_eq!(cmd.channels, Some(ChannelRange::single(10)));
    assert_eq!(cmd.spws, Some(BTreeSet::from([17])));
    assert_eq!(cmd.antenna, AntennaSelection::Antenna("4".to_string()));
    assert_eq!(cmd.pol.as_deref(), Some("YY"));
    assert_eq!(cmd.axis_names, vec!["channels"]);
    assert_eq!(outcome.state.flag.iter().filter(|&&f| f).count(), 1);
}

#[test]
fn test_edges() {
    let mut data = Array1::from_shape_fn(12, |i| if i % 2 == 0 { 1.0 } else { 1.1 });
    data[0] = 10.0;
    data[1] = 5.0;
    data[11] = 8.0;
    let view = unflagged(data);
    let rules = [VectorRule::new(VectorTest::Edges { limit: 3.0 })];

    let outcome = run(&view, &rules, &Exclusions::default());
    assert_eq!(outcome.flags.len(), 2);
    assert_eq!(outcome.flags[0].channels, Some(ChannelRange::new(0, 1)));
    assert_eq!(outcome.flags[1].channels, Some(ChannelRange::single(11)));
    assert!(outcome.flags.iter().all(|c| c.reason == RuleKind::Edges));
}

#[test]
fn test_edges_skip_flagged_channels() {
    let mut data = Array1::from_shape_fn(10, |i| if i % 2 == 0 { 1.0 } else { 1.1 });
    data[0] = 50.0;
    data[1] = 20.0;
    let mut flag = Array1::from_elem(10, false);
    flag[0] = true;
    let view = spectrum(data, flag);
    let rules = [VectorRule::new(VectorTest::Edges { limit: 3.0 })];

    let outcome = run(&view, &rules, &Exclusions::default());
    assert_eq!(outcome.flags.len(), 1);
    assert_eq!(outcome.flags[0].channels, Some(ChannelRange::single(1)));
}

#[test]
fn test_sharps() {
    let mut data = Array1::from_shape_fn(20, |i| if i % 2 == 0 { 1.0 } else { 1.02 });
    data[10] = 5.0;
    let view = unflagged(data);
    let rules = [VectorRule::new(VectorTest::Sharps { limit: 1.0 })];

    let outcome = run(&view, &rules, &Exclusions::default());
    assert_eq!(outcome.flags.len(), 1);
    assert_eq!(outcome.flags[0].channels, Some(ChannelRange::new(9, 11)));
    assert_eq!(outcome.flags[0].reason, RuleKind::Sharps);
}

#[test]
fn test_sharps_wings() {
    let mut data = Array1::from_shape_fn(20, |i| if i % 2 == 0 { 1.0 } else { 1.02 });
    // A broad feature with a sharp peak.
    data[8] = 1.5;
    data[9] = 2.0;
    data[10] = 5.0;
    data[11] = 2.0;
    data[12] = 1.5;
    let view = unflagged(data);
    let rules = [VectorRule::new(VectorTest::Sharps { limit: 2.0 })];

    let outcome = run(&view, &rules, &Exclusions::default());
    assert_eq!(outcome.flags.len(), 1);
    assert_eq!(outcome.flags[0].channels, Some(ChannelRange::new(7, 13)));
}

/// A spectrum whose channel-to-channel differences cycle through 0.1, 0.11 and
/// 0.12, with a spike at channel 7.
fn spiky_ramp() -> Array1<f64> {
    let mut data = Array1::zeros(16);
    for i in 1..16 {
        data[i] = data[i - 1] + [0.1, 0.11, 0.12][(i - 1) % 3];
    }
    data[7] += 2.0;
    data
}

#[test]
fn test_diffmad_flags_channels() {
    let view = unflagged(spiky_ramp());
    let rules = [VectorRule::new(VectorTest::Diffmad {
        limit: 5.0,
        nchan_limit: 4,
    })];

    let outcome = run(&view, &rules, &Exclusions::default());
    assert_eq!(outcome.flags.len(), 1);
    assert_eq!(outcome.flags[0].channels, Some(ChannelRange::new(6, 8)));
    assert_eq!(outcome.state.flag.iter().filter(|&&f| f).count(), 3);
}

#[test]
fn test_diffmad_flags_whole_spectrum() {
    let view = unflagged(spiky_ramp());
    let rules = [VectorRule::new(VectorTest::Diffmad {
        limit: 5.0,
        nchan_limit: 2,
    })];

    let outcome = run(&view, &rules, &Exclusions::default());
    assert_eq!(outcome.flags.len(), 1);
    let cmd = &outcome.flags[0];
    assert_eq!(cmd.channels, None);
    assert_eq!(cmd.spws, Some(BTreeSet::from([17])));
    assert!(outcome.state.flag.iter().all(|&f| f));
}

#[test]
fn test_tmf() {
    let data = Array1::from_elem(10, 1.0);
    let flag = Array1::from_shape_fn(10, |i| i < 6);
    let view = spectrum(data, flag);
    let rules = [VectorRule::new(VectorTest::Tmf {
        frac_limit: Some(0.5),
        nchan_limit: None,
    })];

    let outcome = run(&view, &rules, &Exclusions::default());
    assert_eq!(outcome.flags.len(), 1);
    assert_eq!(outcome.flags[0].channels, None);
    assert_eq!(outcome.flags[0].reason, RuleKind::Tmf);
    assert!(outcome.state.flag.iter().all(|&f| f));

    // An nchan_limit of 6 needs 7 flagged channels.
    let rules = [VectorRule::new(VectorTest::Tmf {
        frac_limit: None,
        nchan_limit: Some(6),
    })];
    let outcome = run(&view, &rules, &Exclusions::default());
    assert!(outcome.flags.is_empty());
}

#[test]
fn test_tmf_flags_remaining_nans() {
    // Only NaNs are left unflagged; they still count as remaining channels.
    let data = Array1::from_shape_fn(10, |i| if i < 6 { 1.0 } else { f64::NAN });
    let flag = Array1::from_shape_fn(10, |i| i < 6);
    let view = spectrum(data, flag);
    let rules = [VectorRule::new(VectorTest::Tmf {
        frac_limit: Some(0.5),
        nchan_limit: None,
    })];

    let outcome = run(&view, &rules, &Exclusions::default());
    assert_eq!(outcome.flags.len(), 1);
    assert_eq!(outcome.flags[0].channels, None);
    assert!(outcome.state.flag.iter().all(|&f| f));

    // A minsample still applies.
    let rules = [rules[0].clone().with_minsample(1)];
    let outcome = run(&view, &rules, &Exclusions::default());
    assert!(outcome.flags.is_empty());
    assert_eq!(outcome.state.flag.iter().filter(|&&f| f).count(), 6);
}

#[test]
fn test_later_rules_see_earlier_flags() {
    let data = Array1::from_shape_fn(10, |i| if i < 6 { 100.0 } else { 1.0 });
    let view = unflagged(data);
    let rules = [
        VectorRule::new(VectorTest::MaxAbs { limit: 10.0 }),
        VectorRule::new(VectorTest::Tmf {
            frac_limit: Some(0.5),
            nchan_limit: None,
        }),
    ];

    let outcome = run(&view, &rules, &Exclusions::default());
    assert_eq!(outcome.flags.len(), 2);
    assert_eq!(outcome.flags[0].channels, Some(ChannelRange::new(0, 5)));
    assert_eq!(outcome.flags[1].reason, RuleKind::Tmf);
    assert_eq!(
        outcome.state.flag_reason,
        Array1::from_shape_fn(10, |i| if i < 6 { 1 } else { 2 })
    );
}

#[test]
fn test_outlier_and_nmedian() {
    let mut data = Array1::from_shape_fn(16, |i| if i % 2 == 0 { 0.9 } else { 1.1 });
    data[3] = 30.0;
    data[12] = 0.05;
    let view = unflagged(data);

    let rules = [VectorRule::new(VectorTest::Outlier { limit: 5.0 })];
    let outcome = run(&view, &rules, &Exclusions::default());
    let flagged: Vec<usize> = outcome
        .state
        .flag
        .indexed_iter()
        .filter(|&(_, &f)| f)
        .map(|(i, _)| i)
        .collect();
    assert_eq!(flagged, vec![3, 12]);

    let rules = [VectorRule::new(VectorTest::Nmedian {
        lo_limit: Some(0.5),
        hi_limit: None,
    })];
    let outcome = run(&view, &rules, &Exclusions::default());
    assert_eq!(outcome.flags.len(), 1);
    assert_eq!(outcome.flags[0].channels, Some(ChannelRange::single(12)));
}

#[test]
fn test_excluded_channel_is_not_flagged() {
    let mut data = Array1::from_elem(20, 1.0);
    data[10] = 9.0;
    data[11] = 9.0;
    let view = unflagged(data);
    let mut exclusions = Exclusions::default();
    exclusions.exclude_channels(17, 10, 10);
    let rules = [VectorRule::new(VectorTest::MaxAbs { limit: 5.0 })];

    let outcome = run(&view, &rules, &exclusions);
    assert_eq!(outcome.flags.len(), 1);
    assert_eq!(outcome.flags[0].channels, Some(ChannelRange::single(11)));
    assert!(!outcome.state.flag[10]);
    assert_eq!(outcome.notices.len(), 1);
    assert_eq!(outcome.notices[0].num_rejected, 1);

    // Exclusions for another spw don't matter.
    let mut exclusions = Exclusions::default();
    exclusions.exclude_channels(19, 10, 10);
    let outcome = run(&view, &rules, &exclusions);
    assert_eq!(outcome.flags[0].channels, Some(ChannelRange::new(10, 11)));
    assert!(outcome.notices.is_empty());
}

#[test]
fn test_wide_channel_exclusion() {
    let mut exclusions = Exclusions::default();
    exclusions.exclude_channels(17, u32::MAX, 5);
    assert!(!exclusions.is_channel_excluded(17, 4));
    assert!(exclusions.is_channel_excluded(17, 5));
    assert!(exclusions.is_channel_excluded(17, u32::MAX));
    assert!(!exclusions.is_channel_excluded(19, 5));

    let view = unflagged(Array1::from_elem(20, 9.0));
    let rules = [VectorRule::new(VectorTest::MaxAbs { limit: 5.0 })];
    let outcome = run(&view, &rules, &exclusions);
    assert_eq!(outcome.flags.len(), 1);
    assert_eq!(outcome.flags[0].channels, Some(ChannelRange::new(0, 4)));
    assert_eq!(outcome.notices.len(), 1);
    assert_eq!(outcome.notices[0].num_rejected, 15);
}

#[test]
fn test_non_contiguous_channel_values() {
    let view = VectorView::new(
        ViewMeta {
            table: "uid.ms".to_string(),
            spw: 17,
            ..Default::default()
        },
        Axis::new("channels", AxisData::Channel(vec![0, 1, 2, 10, 11])),
        Array1::from_elem(5, 10.0),
        Array1::from_elem(5, false),
    )
    .unwrap();
    let rules = [VectorRule::new(VectorTest::MaxAbs { limit: 5.0 })];

    let outcome = run(&view, &rules, &Exclusions::default());
    assert_eq!(outcome.flags.len(), 2);
    assert_eq!(outcome.flags[0].channels, Some(ChannelRange::new(0, 2)));
    assert_eq!(outcome.flags[1].channels, Some(ChannelRange::new(10, 11)));
}
