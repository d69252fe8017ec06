//! Kaleido compiler CLI
//!
//! Lowers serialized syntax trees into IR, optionally printing and running it

use clap::Parser;
use colored::Colorize;
use kl_driver::CompileOptions;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;

mod compile;
mod logging;

use compile::{Outcome, Request};

#[derive(Parser)]
#[command(name = "klc")]
#[command(about = "Kaleido compiler", long_about = None)]
#[command(version)]
struct Cli {
    /// JSON syntax tree files
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Trace the lowering of every node
    #[arg(long)]
    trace: bool,

    /// Print the lowered module
    #[arg(long)]
    emit_ir: bool,

    /// Skip the module verifier
    #[arg(long)]
    no_verify: bool,

    /// Run this function after lowering
    #[arg(long, value_name = "NAME")]
    run: Option<String>,

    /// Argument for --run, repeatable
    #[arg(long = "arg", value_name = "X", requires = "run", allow_negative_numbers = true)]
    args: Vec<f64>,

    /// Module name recorded in the output
    #[arg(long, default_value = "Kaleido")]
    module_name: String,
}

impl Cli {
    fn request(&self) -> Request {
        Request {
            options: CompileOptions {
                module_name: self.module_name.clone(),
                verify: !self.no_verify,
                emit: self.emit_ir,
                ..CompileOptions::default()
            },
            run: self.run.clone().map(|name| (name, self.args.clone())),
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(err) = logging::init_logging(cli.trace) {
        eprintln!("{} {err:#}", "error:".red().bold());
        return ExitCode::FAILURE;
    }

    let request = cli.request();
    let mut failed = 0;
    for path in &cli.files {
        let outcome = compile::compile_path(path, &request);
        debug!(path = %path.display(), ?outcome, "processed");
        if outcome != Outcome::Compiled {
            failed += 1;
        }
    }

    if failed == 0 {
        println!("{} {} files", "Finished".green().bold(), cli.files.len());
        ExitCode::SUCCESS
    } else {
        eprintln!("{} {failed} of {} files", "Failed:".red().bold(), cli.files.len());
        ExitCode::FAILURE
    }
}
