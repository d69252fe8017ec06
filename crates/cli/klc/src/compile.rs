//! Per-file compile command

use anyhow::{Context, Result};
use colored::Colorize;
use kl_driver::{Compilation, CompileOptions, Severity};
use miette::Report;
use std::path::Path;

/// What to do with each file after lowering
#[derive(Debug, Clone)]
pub struct Request {
    pub options: CompileOptions,
    /// Function to execute, with its arguments
    pub run: Option<(String, Vec<f64>)>,
}

/// Outcome of one input file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Compiled,
    /// The file could not be read or decoded
    LoadFailed,
    /// Lowering, verification or execution failed
    Failed,
}

pub fn compile_path(path: &Path, request: &Request) -> Outcome {
    println!("{} {}", "Compiling".green().bold(), path.display());

    let root = match kl_driver::load_ast(path) {
        Ok(root) => root,
        Err(err) => {
            eprintln!("  {} {err:#}", "✗".red());
            return Outcome::LoadFailed;
        }
    };
    let file = path.display().to_string();
    let compilation = match kl_driver::compile(&root, &file, &request.options) {
        Ok(compilation) => compilation,
        Err(err) => {
            eprintln!("  {} {err:#}", "✗".red());
            return Outcome::Failed;
        }
    };

    report_diagnostics(&compilation);
    if let Some(ir) = &compilation.ir {
        print!("{ir}");
    }
    if let Some(err) = compilation.error {
        eprintln!("{:?}", Report::new(err));
        return Outcome::Failed;
    }
    println!(
        "  {} {} functions, {} globals",
        "✓".green(),
        compilation.module.function_count(),
        compilation.module.global_count()
    );

    if let Some((name, args)) = &request.run {
        match execute(&compilation, name, args, &request.options) {
            Ok(value) => println!("  {} {name} = {value}", "Result:".bold()),
            Err(err) => {
                eprintln!("  {} {err:#}", "✗".red());
                return Outcome::Failed;
            }
        }
    }
    Outcome::Compiled
}

fn report_diagnostics(compilation: &Compilation) {
    for diagnostic in &compilation.diagnostics {
        let marker = match diagnostic.severity {
            Severity::Warning => "!".yellow().bold(),
            Severity::Error => "✗".red().bold(),
        };
        eprintln!("  {marker} {diagnostic}");
    }
}

/// Runs `name` with the math routines bound, plus `printd`/`putchard` if the
/// program declares them
fn execute(
    compilation: &Compilation,
    name: &str,
    args: &[f64],
    options: &CompileOptions,
) -> Result<f64> {
    let mut interp = kl_driver::interpreter(&compilation.module, options);
    if is_declared(compilation, "printd", 1) {
        interp.register_host("printd", |args| {
            println!("{}", args[0]);
            0.0
        })?;
    }
    if is_declared(compilation, "putchard", 1) {
        interp.register_host("putchard", |args| {
            if let Some(ch) = char::from_u32(args[0] as u32) {
                print!("{ch}");
            }
            0.0
        })?;
    }
    let value = interp
        .call(name, args)
        .with_context(|| format!("failed to run `{name}`"))?;
    Ok(value.as_float().unwrap_or(f64::NAN))
}

fn is_declared(compilation: &Compilation, name: &str, arity: usize) -> bool {
    compilation
        .module
        .function_named(name)
        .is_some_and(|function| function.is_declaration() && function.arity() == arity)
}
