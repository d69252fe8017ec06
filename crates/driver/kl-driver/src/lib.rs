//! Compilation driver
//!
//! Loads serialized syntax trees, lowers them into IR modules and hands the
//! result to the printer, the verifier or the interpreter.

use anyhow::{Context, Result};
use kl_ast::Node;
use kl_interpreter::Interpreter;
use kl_ir::Module;
use kl_ir::verify::verify_module;
use kl_lower::Session;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

pub use kl_lower::{Diagnostic, LowerError, Severity};

/// Knobs for one compilation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
    /// Name recorded in the emitted module
    pub module_name: String,
    /// Run the module verifier after lowering
    pub verify: bool,
    /// Render the module as text
    pub emit: bool,
    /// Instruction budget for [`run`]
    pub step_limit: u64,
    /// Call nesting limit for [`run`]
    pub max_depth: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            module_name: "Kaleido".to_owned(),
            verify: true,
            emit: false,
            step_limit: 10_000_000,
            max_depth: 256,
        }
    }
}

/// Result of lowering one translation unit
#[derive(Debug)]
pub struct Compilation {
    /// Source name used in diagnostics
    pub file: String,
    /// Everything lowered before lowering stopped
    pub module: Module,
    /// Warnings, then the fatal error if lowering stopped
    pub diagnostics: Vec<Diagnostic>,
    /// The error that stopped lowering, if any
    pub error: Option<LowerError>,
    /// Module text when [`CompileOptions::emit`] is set
    pub ir: Option<String>,
}

impl Compilation {
    /// Whether the whole unit lowered
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Reads a JSON-encoded syntax tree.
///
/// # Errors
/// Returns an error if the file cannot be read or does not hold a tree.
pub fn load_ast(path: &Path) -> Result<Node> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("failed to parse syntax tree in {}", path.display()))
}

/// Lowers `root`. A lowering failure is not an error here: it is returned
/// inside the [`Compilation`] together with the partial module.
///
/// # Errors
/// Returns an error if the lowered module fails verification.
pub fn compile(root: &Node, file: &str, options: &CompileOptions) -> Result<Compilation> {
    info!(file, "compiling");
    let mut session = Session::new(&options.module_name, file);
    let error = session.lower_unit(root).err();
    let diagnostics = session.diagnostics().entries().to_vec();
    let module = session.into_module();
    debug!(
        functions = module.function_count(),
        globals = module.global_count(),
        "lowered"
    );

    if error.is_none() && options.verify {
        verify_module(&module).with_context(|| format!("module from {file} is malformed"))?;
    }
    let ir = options.emit.then(|| module.to_string());

    Ok(Compilation {
        file: file.to_owned(),
        module,
        diagnostics,
        error,
        ir,
    })
}

/// [`load_ast`] followed by [`compile`]
///
/// # Errors
/// Returns an error if loading or verification fails.
pub fn compile_file(path: &Path, options: &CompileOptions) -> Result<Compilation> {
    let root = load_ast(path)?;
    compile(&root, &path.display().to_string(), options)
}

/// Math routines an extern declaration may bind to
const MATH_HOSTS: &[(&str, fn(f64) -> f64)] = &[
    ("sqrt", f64::sqrt),
    ("sin", f64::sin),
    ("cos", f64::cos),
    ("exp", f64::exp),
    ("log", f64::ln),
    ("fabs", f64::abs),
    ("floor", f64::floor),
];

/// An interpreter for `module` with the math routines bound to any matching
/// single-argument extern declarations
pub fn interpreter<'module>(module: &'module Module, options: &CompileOptions) -> Interpreter<'module> {
    let mut interp = Interpreter::new(module)
        .with_step_limit(options.step_limit)
        .with_max_depth(options.max_depth);
    for &(name, host) in MATH_HOSTS {
        let declared = module
            .function_named(name)
            .is_some_and(|function| function.is_declaration() && function.arity() == 1);
        if declared && interp.register_host(name, move |args| host(args[0])).is_ok() {
            debug!(name, "bound host function");
        }
    }
    interp
}

/// Runs `name` from a successful compilation.
///
/// # Errors
/// Returns an error if execution fails.
pub fn run(
    compilation: &Compilation,
    name: &str,
    args: &[f64],
    options: &CompileOptions,
) -> Result<f64> {
    let mut interp = interpreter(&compilation.module, options);
    let value = interp
        .call(name, args)
        .with_context(|| format!("failed to run `{name}`"))?;
    Ok(value.as_float().unwrap_or(f64::NAN))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kl_ast::build::*;

    #[test]
    fn test_default_options() {
        let options = CompileOptions::default();
        assert_eq!(options.module_name, "Kaleido");
        assert!(options.verify);
        assert!(!options.emit);
    }

    #[test]
    fn test_math_hosts_bind_to_declared_externs() {
        let root = seq(vec![
            extern_fn("sqrt", &["x"]),
            def("hyp", &["a"], call("sqrt", vec![var("a")])),
        ]);
        let options = CompileOptions::default();
        let compilation = compile(&root, "hyp.k", &options).unwrap();
        assert!(compilation.is_ok());
        let value = run(&compilation, "hyp", &[16.0], &options).unwrap();
        assert!((value - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_depth_limit_reaches_interpreter() {
        let root = def("down", &["n"], call("down", vec![var("n")]));
        let options = CompileOptions {
            max_depth: 4,
            ..CompileOptions::default()
        };
        let compilation = compile(&root, "down.k", &options).unwrap();
        let err = run(&compilation, "down", &[1.0], &options).unwrap_err();
        assert!(format!("{err:#}").contains("call depth limit of 4 exceeded"));
    }
}
