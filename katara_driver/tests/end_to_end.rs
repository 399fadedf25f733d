//! Drives the `katara` binary itself (not the interpreter/translator APIs
//! directly) through the end-to-end scenarios, confirming the CLI surface
//! reports the reported exit codes those scenarios describe.

use std::fs;

use assert_cmd::Command;

fn katara() -> Command {
    Command::cargo_bin("katara").unwrap()
}

#[test]
fn empty_main_returning_zero_reports_exit_code_zero() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("main.kir");
    fs::write(&path, "@0 main () => (i64) {\n{0} ret #0:i64\n}\n").unwrap();

    katara().arg("run").arg(&path).assert().code(0);
}

#[test]
fn stored_and_reloaded_shared_pointer_value_reports_exit_code_forty_two() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("main.kir");
    let src = "@0 main () => (i64) {\n\
               {0} %0:ptr = make_shared #8:i64\n\
               store %0, #42:i64\n\
               %1:i64 = load %0\n\
               delete_shared %0, strong\n\
               ret %1\n\
               }\n";
    fs::write(&path, src).unwrap();

    katara().arg("run").arg(&path).assert().code(42);
}

#[test]
fn constant_modulo_expression_reports_exit_code_eighteen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("main.kir");
    fs::write(&path, "@0 main () => (i64) {\n{0} %0:i64 = rem #42:i64, #24:i64\nret %0\n}\n").unwrap();

    katara().arg("run").arg(&path).assert().code(18);
}

#[test]
fn no_input_paths_reports_the_stable_exit_code() {
    katara().arg("run").assert().code(1);
}

#[test]
fn a_source_file_with_no_funcs_reports_the_no_entry_func_exit_code() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.kir");
    fs::write(&path, "\n").unwrap();

    katara().arg("run").arg(&path).assert().code(5);
}

#[test]
fn doc_subcommand_writes_output_without_error() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("main.kir");
    fs::write(&input, "@0 main () => (i64) {\n{0} ret #0:i64\n}\n").unwrap();
    let out_dir = dir.path().join("doc-out");

    katara().arg("doc").arg(&input).arg("--output-dir").arg(&out_dir).assert().code(0);
    assert!(out_dir.join("summary.txt").exists());
    assert!(out_dir.join("main.dot").exists());
}

#[test]
fn build_subcommand_writes_a_binary_and_relocation_sidecar() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("main.kir");
    fs::write(&input, "@0 main () => (i64) {\n{0} ret #0:i64\n}\n").unwrap();
    let out_dir = dir.path().join("build-out");

    katara().arg("build").arg(&input).arg("--output-dir").arg(&out_dir).assert().code(0);
    let bin = fs::read(out_dir.join("out.bin")).unwrap();
    assert!(!bin.is_empty());
    assert_eq!(bin[0], 0x55, "prologue should start with `push rbp`");
}
