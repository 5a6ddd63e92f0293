// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Tests to ensure there is no stderr output for successful commands.

use tempfile::TempDir;

use crate::{get_cmd_output, hyperflag, write_matrix_rules, write_matrix_views};

#[test]
fn test_flag_no_stderr() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let views = write_matrix_views(tmp_dir.path(), &["XX", "YY"]);
    let rules = write_matrix_rules(tmp_dir.path());

    #[rustfmt::skip]
    let cmd = hyperflag()
        .args([
            "flag",
            "--views", &views.display().to_string(),
            "--rules", &rules.display().to_string(),
            "--output-dir", &tmp_dir.path().display().to_string(),
        ])
        .ok();
    assert!(
        cmd.is_ok(),
        "flag failed on simple test data: {}",
        cmd.err().unwrap()
    );
    let (_, stderr) = get_cmd_output(cmd);
    assert!(stderr.is_empty(), "stderr wasn't empty: {stderr}");
}

#[test]
fn test_rules_verify_no_stderr() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let rules = write_matrix_rules(tmp_dir.path());

    let cmd = hyperflag()
        .args(["rules-verify", &rules.display().to_string()])
        .ok();
    assert!(cmd.is_ok(), "rules-verify failed: {}", cmd.err().unwrap());
    let (_, stderr) = get_cmd_output(cmd);
    assert!(stderr.is_empty(), "stderr wasn't empty: {stderr}");
}
