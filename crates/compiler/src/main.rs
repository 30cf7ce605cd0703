//! Matiria Compiler CLI
//!
//! Command-line interface for running and checking `.matiria` programs.

use clap::{Parser as ClapParser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;

use matiriac::config::RunConfig;

#[derive(ClapParser)]
#[command(name = "matiriac")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Matiria compiler/runtime - compile and run .matiria programs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Source file to run, when no subcommand is given.
    path: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile and execute a .matiria file
    Run {
        /// Input .matiria source file
        input: PathBuf,

        /// Maximum value-stack depth before a fatal stack overflow
        #[arg(long)]
        stack_capacity: Option<usize>,
    },

    /// Parse and validate a .matiria file without executing it
    Check {
        /// Input .matiria source file
        input: PathBuf,
    },
}

fn main() {
    init_logging();

    let cli = Cli::parse();
    let command = cli.command.unwrap_or_else(|| match cli.path {
        Some(input) => Commands::Run { input, stack_capacity: None },
        None => {
            eprintln!("Error: no source file given. Usage: matiriac run <FILE>");
            process::exit(1);
        }
    });

    match command {
        Commands::Run { input, stack_capacity } => {
            let mut config = RunConfig::new(input.clone());
            if let Some(capacity) = stack_capacity {
                config = config.with_stack_capacity(capacity);
            }
            run_run(&input, config);
        }
        Commands::Check { input } => run_check(&input),
    }
}

fn init_logging() {
    use tracing_subscriber::EnvFilter;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env("MATIRIA_LOG").unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();
}

fn read_source(path: &Path) -> String {
    match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Error reading {}: {}", path.display(), e);
            process::exit(1);
        }
    }
}

fn run_check(input: &Path) {
    let source = read_source(input);
    match matiriac::check(&source) {
        Ok(()) => println!("{}: ok", input.display()),
        Err(diagnostics) => {
            for d in &diagnostics {
                eprintln!("{}", d);
            }
            process::exit(2);
        }
    }
}

fn run_run(input: &Path, config: RunConfig) {
    let source = read_source(input);
    match matiriac::run(&source, &config) {
        Ok(_value) => process::exit(0),
        Err(matiriac::RunError::Parse(diags)) => {
            for d in &diags {
                eprintln!("{}", d);
            }
            process::exit(1);
        }
        Err(matiriac::RunError::Semantic(diags)) => {
            for d in &diags {
                eprintln!("{}", d);
            }
            process::exit(2);
        }
        Err(matiriac::RunError::Runtime(err)) => {
            eprintln!("runtime error: {}", err);
            process::exit(3);
        }
    }
}
