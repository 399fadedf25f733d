//! The `build` subcommand: parse/check IR sources, lower them, translate to
//! x86-64, and write the encoded machine code plus an external-relocation
//! sidecar file the host linker patches to the real `malloc`/`free`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::KataraConfig;
use crate::fs::Filesystem;
use crate::pipeline::{load_checked_program, DriverError};

pub fn build_paths(fs: &dyn Filesystem, paths: &[PathBuf], output_dir: &Path, config: &KataraConfig) -> Result<()> {
    let mut program = load_checked_program(fs, paths)?;
    log::info!("checked {} func(s) across {} input file(s)", program.func_numbers().len(), paths.len());

    katara_passes::lower_program(&mut program);
    log::debug!("shared-pointer lowering and phi resolution complete");

    let (code, unresolved) = katara_x86_64::compile(&program).map_err(DriverError::Compile)?;
    log::info!("encoded {} byte(s), {} external relocation(s)", code.len(), unresolved.len());

    fs.create_dir_all(output_dir).with_context(|| format!("failed to create output directory: {}", output_dir.display()))?;

    let bin_path = output_dir.join("out.bin");
    fs.write(&bin_path, &code).with_context(|| format!("failed to write {}", bin_path.display()))?;

    let relocs_path = output_dir.join("out.relocs");
    let relocs_text = render_relocations(&unresolved, config);
    fs.write(&relocs_path, relocs_text.as_bytes())
        .with_context(|| format!("failed to write {}", relocs_path.display()))?;

    Ok(())
}

/// Maps the translator's internal `RUNTIME_MALLOC_FUNC`/`RUNTIME_FREE_FUNC`
/// sentinels to the externally visible names a host linker resolves by
/// symbol, one `offset malloc_func_number` line per unresolved call site.
fn render_relocations(unresolved: &[(usize, i64)], config: &KataraConfig) -> String {
    let mut out = String::new();
    for &(offset, sentinel) in unresolved {
        let external = if sentinel == katara_x86_64::RUNTIME_MALLOC_FUNC {
            config.runtime.malloc_func
        } else if sentinel == katara_x86_64::RUNTIME_FREE_FUNC {
            config.runtime.free_func
        } else {
            sentinel
        };
        out.push_str(&format!("{offset} {external}\n"));
    }
    out
}

/// The func numbers `build`'s output may still reference as external
/// relocations after encoding: the translator's `malloc`/`free` sentinels.
pub fn external_func_numbers() -> HashSet<i64> {
    HashSet::from([katara_x86_64::RUNTIME_MALLOC_FUNC, katara_x86_64::RUNTIME_FREE_FUNC])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::InMemoryFilesystem;
    use crate::pipeline::exit_code_for;

    const MAIN_SRC: &str = "@0 main () => (i64) {\n{0} ret #0:i64\n}\n";

    #[test]
    fn build_emits_a_binary_and_empty_relocations_for_a_pure_program() {
        let fs = InMemoryFilesystem::new().with_file("main.kir", MAIN_SRC);
        let config = KataraConfig::default();
        build_paths(&fs, &[PathBuf::from("main.kir")], Path::new("out"), &config).unwrap();
        let bin = fs.written(Path::new("out/out.bin")).unwrap();
        assert!(!bin.is_empty());
        let relocs = fs.written(Path::new("out/out.relocs")).unwrap();
        assert!(relocs.is_empty());
    }

    #[test]
    fn missing_input_file_is_a_read_failure() {
        let fs = InMemoryFilesystem::new();
        let config = KataraConfig::default();
        let err = build_paths(&fs, &[PathBuf::from("missing.kir")], Path::new("out"), &config).unwrap_err();
        assert_eq!(exit_code_for(&err), 3);
    }

    #[test]
    fn no_paths_is_its_own_exit_code() {
        let fs = InMemoryFilesystem::new();
        let config = KataraConfig::default();
        let err = build_paths(&fs, &[], Path::new("out"), &config).unwrap_err();
        assert_eq!(exit_code_for(&err), 1);
    }
}
