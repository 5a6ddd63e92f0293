// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use indoc::indoc;
use tempfile::TempDir;

use crate::{get_cmd_output, hyperflag, write_file, write_matrix_rules};

#[test]
fn test_rules_verify() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let matrix = write_matrix_rules(tmp_dir.path());
    let vector = write_file(
        tmp_dir.path(),
        "vector.toml",
        indoc! {r#"
            catalogue = "vector"

            [[rules]]
            name = "edges"
            limit = 3.0

            [[rules]]
            name = "sharps"
            limit = 0.5
            minsample = 10

            [[rules]]
            name = "tmf"
            frac_limit = 0.3
        "#},
    );

    let cmd = hyperflag()
        .args([
            "rules-verify",
            &matrix.display().to_string(),
            &vector.display().to_string(),
        ])
        .ok();
    assert!(cmd.is_ok(), "rules-verify failed: {}", cmd.err().unwrap());
    let (stdout, _) = get_cmd_output(cmd);
    assert!(stdout.contains("1 matrix rules"), "{stdout}");
    assert!(stdout.contains("3 vector rules"), "{stdout}");
    assert!(stdout.contains("sharps (minsample 10)"), "{stdout}");
}

#[test]
fn test_rules_verify_bad_file() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let good = write_matrix_rules(tmp_dir.path());
    let bad = write_file(
        tmp_dir.path(),
        "bad.toml",
        indoc! {r#"
            catalogue = "vector"

            [[rules]]
            name = "diffmad"
            limit = 3.0
            nchan_limit = 0
        "#},
    );

    let cmd = hyperflag()
        .args([
            "rules-verify",
            &good.display().to_string(),
            &bad.display().to_string(),
        ])
        .ok();
    assert!(cmd.is_err());
    let (stdout, stderr) = get_cmd_output(cmd);
    assert!(stdout.contains("nchan_limit must be bigger than 0"), "{stdout}");
    assert!(stderr.contains("1 of 2 rules files couldn't be verified"), "{stderr}");
}
