// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Integration tests.
//!
//! Some help for laying out these tests was taken from:
//! https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html

mod flag;
mod no_stderr;
mod rules_verify;

use std::{
    path::{Path, PathBuf},
    process::Output,
    str::from_utf8,
};

use assert_cmd::{output::OutputError, Command};
use indoc::indoc;
use serde_json::json;

fn hyperflag() -> Command {
    Command::cargo_bin("hyperflag").unwrap()
}

fn get_cmd_output(result: Result<Output, OutputError>) -> (String, String) {
    let output = match result {
        Ok(o) => o,
        Err(o) => o.as_output().unwrap().clone(),
    };
    (
        from_utf8(&output.stdout).unwrap().to_string(),
        from_utf8(&output.stderr).unwrap().to_string(),
    )
}

/// Write a matrix view file with one antenna-by-time view per polarisation.
/// Every view has a bright column at the third time.
fn write_matrix_views(dir: &Path, pols: &[&str]) -> PathBuf {
    let data: Vec<Vec<f64>> = (0..5)
        .map(|i| {
            (0..5)
                .map(|j| match (j, (i + j) % 2) {
                    (2, _) => 50.0,
                    (_, 0) => 0.9,
                    _ => 1.1,
                })
                .collect()
        })
        .collect();
    let views: Vec<_> = pols
        .iter()
        .map(|pol| {
            json!({
                "description": format!("spw 17 {pol}"),
                "meta": { "spw": 17, "pol": pol, "intent": "BANDPASS" },
                "x": { "name": "Antenna", "data": { "kind": "antenna", "values": [0, 1, 2, 3, 4] } },
                "y": {
                    "name": "Time",
                    "data": { "kind": "time", "values": [1e9, 1e9 + 1.0, 1e9 + 2.0, 1e9 + 3.0, 1e9 + 4.0] }
                },
                "data": data,
            })
        })
        .collect();
    let file = json!({
        "kind": "matrix",
        "table": "uid.ms",
        "antennas": [
            { "id": 0, "name": "DA41" },
            { "id": 1, "name": "DA42" },
            { "id": 2, "name": "DA43" },
            { "id": 3, "name": "DV01" },
            { "id": 4, "name": "DV02" }
        ],
        "views": views,
    });
    let path = dir.join("views.json");
    std::fs::write(&path, serde_json::to_string_pretty(&file).unwrap()).unwrap();
    path
}

fn write_matrix_rules(dir: &Path) -> PathBuf {
    write_file(
        dir,
        "rules.toml",
        indoc! {r#"
            catalogue = "matrix"

            [[rules]]
            name = "outlier"
            limit = 3.0
            minsample = 3
        "#},
    )
}

fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}
