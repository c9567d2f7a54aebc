//! End-to-end tests for the checkify binary.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn checkify() -> Command {
    Command::cargo_bin("checkify").expect("binary builds")
}

#[test]
fn test_converts_simple_unit_with_postfix() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("unit.c");
    fs::write(&input, "void f(void) { int n; int *p = &n; *p = 1; }\n").unwrap();

    checkify()
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("converted"));

    let output = dir.path().join("unit.checked.c");
    let text = fs::read_to_string(output).unwrap();
    assert!(text.contains("_Ptr<int> p"), "got: {text}");
}

#[test]
fn test_stdout_mode_prints_rewrite() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("unit.c");
    fs::write(&input, "void f(void) { int n; int *p = &n; *p = 1; }\n").unwrap();

    checkify()
        .arg(&input)
        .arg("--stdout")
        .assert()
        .success()
        .stdout(predicate::str::contains("_Ptr<int> p"));
}

#[test]
fn test_parse_error_fails_with_build_phase() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("bad.c");
    fs::write(&input, "int (((;\n").unwrap();

    checkify()
        .arg(&input)
        .assert()
        .failure()
        .stderr(predicate::str::contains("build phase failed"));
}

#[test]
fn test_addcr_requires_alltypes() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("unit.c");
    fs::write(&input, "int x;\n").unwrap();

    checkify()
        .arg(&input)
        .arg("--addcr")
        .assert()
        .failure()
        .stderr(predicate::str::contains("checked regions"));
}

#[test]
fn test_alltypes_rewrites_array_pointer() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("unit.c");
    fs::write(&input, "void f(int *q) { q[0] = 1; }\n").unwrap();

    checkify()
        .arg(&input)
        .arg("--alltypes")
        .arg("--stdout")
        .assert()
        .success()
        .stdout(predicate::str::contains("_Array_ptr<int> q"));
}

#[test]
fn test_dump_stats_reports_wild_counts() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("unit.c");
    fs::write(&input, "void f(void) { int *r; mystery(r); }\n").unwrap();

    checkify()
        .arg(&input)
        .arg("--dump-stats")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"wild\": 1"));
}

#[test]
fn test_dump_intermediate_writes_constraint_dump() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("unit.c"),
        "void f(int *q) { q[0] = 1; }\n",
    )
    .unwrap();

    checkify()
        .current_dir(dir.path())
        .arg("unit.c")
        .arg("--dump-intermediate")
        .assert()
        .success();

    let dump = fs::read_to_string(dir.path().join("checkify_constraints.json")).unwrap();
    assert!(dump.contains("\"variables\""), "got: {dump}");
    assert!(dump.contains("\"constraints\""), "got: {dump}");
}

#[test]
fn test_wildptrstats_output_names_cause() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("unit.c");
    fs::write(&input, "void f(void) { int *r; mystery(r); }\n").unwrap();
    let report_path = dir.path().join("wild.json");

    checkify()
        .arg(&input)
        .arg("--wildptrstats-output")
        .arg(&report_path)
        .assert()
        .success();

    let report = fs::read_to_string(report_path).unwrap();
    assert!(report.contains("mystery"), "got: {report}");
}

#[test]
fn test_multiple_units_share_program() {
    let dir = TempDir::new().unwrap();
    let a = dir.path().join("a.c");
    let b = dir.path().join("b.c");
    fs::write(&a, "int *shared;\nvoid taint(void) { mystery(shared); }\n").unwrap();
    fs::write(&b, "int *shared;\nvoid use(void) { *shared = 1; }\n").unwrap();

    checkify().arg(&a).arg(&b).assert().success();

    let b_out = fs::read_to_string(dir.path().join("b.checked.c")).unwrap();
    assert!(b_out.contains("int *shared;"), "got: {b_out}");
}

#[test]
fn test_base_dir_rejects_outside_file() {
    let dir = TempDir::new().unwrap();
    let other = TempDir::new().unwrap();
    let input = other.path().join("unit.c");
    fs::write(&input, "int x;\n").unwrap();

    checkify()
        .arg(&input)
        .arg("--base-dir")
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("base directory"));
}
