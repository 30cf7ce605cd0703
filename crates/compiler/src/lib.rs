//! Scanner, parser, validator, and bytecode compiler for Matiria, plus
//! the `matiriac` CLI driving them through to execution.
//!
//! ```rust,ignore
//! let config = matiriac::config::RunConfig::new("program.matiria");
//! match matiriac::run(source, &config) {
//!     Ok(value) => println!("{:?}", value),
//!     Err(e) => eprintln!("{}", e),
//! }
//! ```

pub mod ast;
pub mod codegen;
pub mod config;
pub mod diagnostics;
pub mod parser;
pub mod scanner;
pub mod token;
pub mod types;
pub mod validator;

use std::fmt;

use diagnostics::Diagnostic;
use matiria_runtime::{NativeRegistry, RuntimeError, Value, Vm};
use tracing::debug;

/// Why a `run` call didn't make it to a result value.
#[derive(Debug)]
pub enum RunError {
    Parse(Vec<Diagnostic>),
    Semantic(Vec<Diagnostic>),
    Runtime(RuntimeError),
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunError::Parse(diags) | RunError::Semantic(diags) => {
                for d in diags {
                    writeln!(f, "{}", d)?;
                }
                Ok(())
            }
            RunError::Runtime(err) => write!(f, "{}", err),
        }
    }
}

/// Parses and validates `source`, reporting diagnostics only (spec §6
/// `matiriac check`).
pub fn check(source: &str) -> Result<(), Vec<Diagnostic>> {
    let types = types::TypeRegistry::new();
    let (mut program, parse_diags) = parser::Parser::new(source, &types).parse();
    if !parse_diags.is_empty() {
        return Err(parse_diags);
    }
    let (ok, diags) = validator::Validator::new(&types).validate(&mut program);
    debug!(ok, diagnostic_count = diags.len(), "check finished");
    if ok {
        Ok(())
    } else {
        Err(diags)
    }
}

/// Compiles and runs `source` to completion with the native bindings and
/// stack capacity from `config`, per spec §6.
pub fn run(source: &str, config: &config::RunConfig) -> Result<Value, RunError> {
    run_with_config(source, config, &config::CompilerConfig::default())
}

/// As [`run`], additionally registering every [`config::NativeBinding`] in
/// `compiler_config` so the program's `NativeFnDecl`s can resolve against
/// them.
pub fn run_with_config(
    source: &str,
    run_config: &config::RunConfig,
    compiler_config: &config::CompilerConfig,
) -> Result<Value, RunError> {
    let types = types::TypeRegistry::new();
    let (mut program, parse_diags) = parser::Parser::new(source, &types).parse();
    if !parse_diags.is_empty() {
        return Err(RunError::Parse(parse_diags));
    }

    let (ok, diags) = validator::Validator::new(&types).validate(&mut program);
    if !ok {
        return Err(RunError::Semantic(diags));
    }

    let package = codegen::Compiler::compile(&program);
    debug!(functions = package.functions.len(), "codegen finished");
    let mut natives = NativeRegistry::new();
    for binding in &compiler_config.native_bindings {
        natives.register(binding.name.clone(), binding.entry);
    }

    let mut vm = Vm::new(&package, &natives, run_config.stack_capacity);
    vm.run().map_err(RunError::Runtime)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_executes_a_program_to_a_value() {
        let config = config::RunConfig::new("main.matiria");
        let result = run("fn main() -> Int { return 40 + 2; }", &config).unwrap();
        assert_eq!(result, Value::Int(42));
    }

    #[test]
    fn check_reports_semantic_errors_without_running() {
        let result = check("fn main() -> Int { return true; }");
        assert!(result.is_err());
    }

    #[test]
    fn a_runtime_error_unwinds_as_run_error_runtime() {
        let config = config::RunConfig::new("main.matiria");
        let err = run("fn main() -> Int { return 1 / 0; }", &config).unwrap_err();
        assert!(matches!(err, RunError::Runtime(RuntimeError::DivisionByZero)));
    }
}
