// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Exercises the `wasm-core` binary end to end: writing a small module to a
//! temporary file, invoking the binary against it, and checking its exit
//! code and stdout.

use std::io::Write;
use std::process::Command;

// `add: (i32, i32) -> i32`, exported as "add".
const ADD_MODULE: &[u8] = &[
    0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00,
    0x01, 0x07, 0x01, 0x60, 0x02, 0x7F, 0x7F, 0x01, 0x7F,
    0x03, 0x02, 0x01, 0x00,
    0x07, 0x07, 0x01, 0x03, 0x61, 0x64, 0x64, 0x00, 0x00,
    0x0A, 0x09, 0x01, 0x07, 0x00, 0x20, 0x00, 0x20, 0x01, 0x6A, 0x0B,
];

// `div: (i32, i32) -> i32`, exported as "div".
const DIV_MODULE: &[u8] = &[
    0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00,
    0x01, 0x07, 0x01, 0x60, 0x02, 0x7F, 0x7F, 0x01, 0x7F,
    0x03, 0x02, 0x01, 0x00,
    0x07, 0x07, 0x01, 0x03, 0x64, 0x69, 0x76, 0x00, 0x00,
    0x0A, 0x09, 0x01, 0x07, 0x00, 0x20, 0x00, 0x20, 0x01, 0x6D, 0x0B,
];

fn write_temp_module(name: &str, bytes: &[u8]) -> std::path::PathBuf {
    let mut path = std::env::temp_dir();
    path.push(std::format!("wasm-core-cli-test-{name}-{}.wasm", std::process::id()));
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(bytes).unwrap();
    path
}

fn bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_wasm-core"))
}

#[test]
fn loads_and_instantiates_without_invoke() {
    let path = write_temp_module("load-only", ADD_MODULE);
    let output = bin().arg(&path).output().unwrap();
    std::fs::remove_file(&path).ok();

    assert!(output.status.success());
    assert!(output.stdout.is_empty());
}

#[test]
fn invokes_an_export_and_prints_its_result() {
    let path = write_temp_module("add", ADD_MODULE);
    let output = bin()
        .arg(&path)
        .arg("--invoke")
        .arg("add")
        .arg("--arg")
        .arg("2")
        .arg("--arg")
        .arg("3")
        .output()
        .unwrap();
    std::fs::remove_file(&path).ok();

    assert!(output.status.success());
    let stdout = std::string::String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains('5'), "unexpected output: {stdout:?}");
}

#[test]
fn a_trap_exits_nonzero_with_a_message_on_stderr() {
    let path = write_temp_module("div", DIV_MODULE);
    let output = bin()
        .arg(&path)
        .arg("--invoke")
        .arg("div")
        .arg("--arg")
        .arg("10")
        .arg("--arg")
        .arg("0")
        .output()
        .unwrap();
    std::fs::remove_file(&path).ok();

    assert!(!output.status.success());
    let stderr = std::string::String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("error:"), "unexpected stderr: {stderr:?}");
}

#[test]
fn missing_module_file_exits_nonzero() {
    let output = bin().arg("/nonexistent/path/to/module.wasm").output().unwrap();
    assert!(!output.status.success());
}
