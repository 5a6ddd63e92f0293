// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use indoc::formatdoc;
use tempfile::TempDir;

use hyperflag::FlagCommand;

use crate::{get_cmd_output, hyperflag, write_file, write_matrix_rules, write_matrix_views};

fn read_flags(path: &std::path::Path) -> Vec<FlagCommand> {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

fn read_json(path: &std::path::Path) -> serde_json::Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

#[test]
fn test_flag_matrix_views() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let views = write_matrix_views(tmp_dir.path(), &["XX"]);
    let rules = write_matrix_rules(tmp_dir.path());
    let out = tmp_dir.path().join("out");

    #[rustfmt::skip]
    let cmd = hyperflag()
        .args([
            "flag",
            "--views", &views.display().to_string(),
            "--rules", &rules.display().to_string(),
            "--niter", "3",
            "--output-dir", &out.display().to_string(),
        ])
        .ok();
    assert!(cmd.is_ok(), "flag failed: {}", cmd.err().unwrap());

    let flags = read_flags(&out.join("views_flags.json"));
    assert_eq!(flags.len(), 5);
    assert!(flags.iter().all(|f| f.time.is_some() && f.pol.as_deref() == Some("XX")));

    let report = read_json(&out.join("views_report.json"));
    assert_eq!(report["stopped"], "CONVERGED");
    assert_eq!(report["iterations"], 2);
    assert_eq!(report["before"]["flagged"], 0);
    assert_eq!(report["after"]["flagged"], 5);
    assert_eq!(report["after"]["total"], 25);

    let template = std::fs::read_to_string(out.join("views_flagtemplate.txt")).unwrap();
    assert_eq!(template.lines().count(), 5);
    assert!(template
        .lines()
        .all(|l| l.contains("timerange=") && l.contains("reason='outlier'")));
}

#[test]
fn test_flag_merges_polarisations_and_propagates_intents() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let views = write_matrix_views(tmp_dir.path(), &["XX", "YY"]);
    let rules = write_matrix_rules(tmp_dir.path());
    let out = tmp_dir.path().join("out");

    #[rustfmt::skip]
    let cmd = hyperflag()
        .args([
            "flag",
            "--views", &views.display().to_string(),
            "--rules", &rules.display().to_string(),
            "--use-antenna-names",
            "--propagate-intents", "BANDPASS=PHASE",
            "--output-dir", &out.display().to_string(),
        ])
        .ok();
    assert!(cmd.is_ok(), "flag failed: {}", cmd.err().unwrap());

    let flags = read_flags(&out.join("views_flags.json"));
    // 5 antennas for BANDPASS, copied to PHASE.
    assert_eq!(flags.len(), 10);
    assert!(flags.iter().all(|f| f.pol.is_none()));
    assert_eq!(
        flags
            .iter()
            .filter(|f| f.intent.as_deref() == Some("PHASE"))
            .count(),
        5
    );
    let template = std::fs::read_to_string(out.join("views_flagtemplate.txt")).unwrap();
    assert!(template.contains("antenna='DA41'"));
}

#[test]
fn test_flag_with_args_file() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let views = write_matrix_views(tmp_dir.path(), &["XX"]);
    let rules = write_matrix_rules(tmp_dir.path());
    let out = tmp_dir.path().join("out");
    let args_file = write_file(
        tmp_dir.path(),
        "args.toml",
        &formatdoc! {r#"
            views = ["{views}"]
            rules = "{rules}"
            output_dir = "{out}"
            no_report = true
            exclude_channels = ["17:0~3"]
        "#,
            views = views.display(),
            rules = rules.display(),
            out = out.display(),
        },
    );
    let saved = tmp_dir.path().join("saved.toml");

    #[rustfmt::skip]
    let cmd = hyperflag()
        .args([
            "flag", &args_file.display().to_string(),
            "--save-toml", &saved.display().to_string(),
        ])
        .ok();
    assert!(cmd.is_ok(), "flag failed: {}", cmd.err().unwrap());
    assert!(out.join("views_flags.json").exists());
    assert!(!out.join("views_report.json").exists());

    let saved = std::fs::read_to_string(saved).unwrap();
    assert!(saved.contains("no_report = true"));
    assert!(saved.contains("17:0~3"));
}

#[test]
fn test_dry_run_writes_nothing() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let views = write_matrix_views(tmp_dir.path(), &["XX"]);
    let rules = write_matrix_rules(tmp_dir.path());
    let out = tmp_dir.path().join("out");

    #[rustfmt::skip]
    let cmd = hyperflag()
        .args([
            "flag",
            "--views", &views.display().to_string(),
            "--rules", &rules.display().to_string(),
            "--output-dir", &out.display().to_string(),
            "--dry-run",
        ])
        .ok();
    assert!(cmd.is_ok(), "flag failed: {}", cmd.err().unwrap());
    let (stdout, _) = get_cmd_output(cmd);
    assert!(stdout.contains("Dry run"));
    assert!(!out.exists());
}

#[test]
fn test_wrong_rules_for_views() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let views = write_matrix_views(tmp_dir.path(), &["XX"]);
    let rules = write_file(
        tmp_dir.path(),
        "rules.json",
        r#"{ "catalogue": "vector", "rules": [{ "name": "edges", "limit": 3.0 }] }"#,
    );

    #[rustfmt::skip]
    let cmd = hyperflag()
        .args([
            "flag",
            "--views", &views.display().to_string(),
            "--rules", &rules.display().to_string(),
            "--output-dir", &tmp_dir.path().display().to_string(),
        ])
        .ok();
    assert!(cmd.is_err());
    let (_, stderr) = get_cmd_output(cmd);
    assert!(stderr.contains("rules are for vector views"), "{stderr}");
}

#[test]
fn test_unknown_rule() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let views = write_matrix_views(tmp_dir.path(), &["XX"]);
    let rules = write_file(
        tmp_dir.path(),
        "rules.toml",
        "catalogue = \"matrix\"\n[[rules]]\nname = \"wobbly\"\n",
    );

    #[rustfmt::skip]
    let cmd = hyperflag()
        .args([
            "flag",
            "--views", &views.display().to_string(),
            "--rules", &rules.display().to_string(),
        ])
        .ok();
    assert!(cmd.is_err());
    let (_, stderr) = get_cmd_output(cmd);
    assert!(stderr.contains("Unknown flagging rule 'wobbly'"), "{stderr}");
}
