//! The `run` subcommand: interpret the entry func directly via
//! `katara_ir::interp`, the path every end-to-end scenario in the test suite
//! drives instead of standing up a real x86-64 host. `run` never lowers the
//! program (the interpreter executes the high-level shared-pointer and phi
//! instructions itself) and never touches `katara_x86_64`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use katara_ir::interp::Interpreter;

use crate::fs::Filesystem;
use crate::pipeline::load_checked_program;

pub fn run_paths(fs: &dyn Filesystem, paths: &[PathBuf]) -> Result<i64> {
    let program = load_checked_program(fs, paths)?;
    let mut interp = Interpreter::new(&program);
    interp.run_to_exit_code().context("interpretation failed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::InMemoryFilesystem;

    #[test]
    fn empty_main_returning_zero_reports_exit_code_zero() {
        let src = "@0 main () => (i64) {\n{0} ret #0:i64\n}\n";
        let fs = InMemoryFilesystem::new().with_file("main.kir", src);
        let code = run_paths(&fs, &[PathBuf::from("main.kir")]).unwrap();
        assert_eq!(code, 0);
    }

    #[test]
    fn constant_fold_style_remainder_returns_expected_value() {
        let src = "@0 main () => (i64) {\n{0} %0:i64 = rem #42:i64, #24:i64\nret %0\n}\n";
        let fs = InMemoryFilesystem::new().with_file("main.kir", src);
        let code = run_paths(&fs, &[PathBuf::from("main.kir")]).unwrap();
        assert_eq!(code, 18);
    }
}
