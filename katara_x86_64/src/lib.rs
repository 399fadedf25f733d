//! x86-64 machine model, Intel SDM byte encoder, relocation linker, and the
//! register-allocated-IR-to-machine-code translator.

pub mod block;
pub mod encode;
pub mod func;
pub mod instr;
pub mod linker;
pub mod ops;
pub mod program;
pub mod translator;

pub use linker::{LinkError, Linker};
pub use program::Program;
pub use translator::{translate_program, TranslateError, RUNTIME_FREE_FUNC, RUNTIME_MALLOC_FUNC};

/// Translates and encodes a whole program in one call, the entry point
/// `katara_driver`'s `build` pipeline uses. `malloc`/`free` calls are left
/// as unresolved relocations in the returned list rather than erroring,
/// since those two funcs are provided by whatever loads the output, never
/// defined inside the compiled program itself.
pub fn compile(ir: &katara_ir::program::Program) -> Result<(Vec<u8>, Vec<(usize, i64)>), CompileError> {
    let program = translate_program(ir)?;
    let externals = std::collections::HashSet::from([RUNTIME_MALLOC_FUNC, RUNTIME_FREE_FUNC]);
    Ok(program.encode_with_externals(&externals)?)
}

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error(transparent)]
    Translate(#[from] TranslateError),
    #[error(transparent)]
    Link(#[from] LinkError),
}
