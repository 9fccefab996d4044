//! The Brie compiler CLI.
//!
//! Provides the `briec` command with the following subcommands:
//!
//! - `briec build <file>` - Compile a Brie program to a JavaScript file
//! - `briec check <file>` - Type-check a Brie program without generating code
//!
//! Options:
//! - `--output` - Output path for the generated JavaScript (build only)
//! - `--dump-types` - Print the inferred types of `main` (check only)
//! - `--json` - Output diagnostics as JSON (one object per line)
//! - `--no-color` - Disable colorized output
//!
//! Logging is off unless `RUST_LOG` is set, e.g. `RUST_LOG=brie_typeck=debug`.

mod loader;

use std::path::{Path, PathBuf};
use std::process;
use std::sync::Once;

use clap::{Parser, Subcommand};

use brie_typeck::diagnostics::{render_diagnostic, DiagnosticOptions};
use brie_typeck::error::TypeError;
use brie_typeck::TypeckResult;

use loader::FsLoader;

#[derive(Parser)]
#[command(name = "briec", version, about = "The Brie compiler")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a Brie program to JavaScript
    Build {
        /// Path to the entry file (must define `main`)
        file: PathBuf,

        /// Output path for the generated JavaScript (defaults to <file>.js)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output diagnostics as JSON (one object per line) instead of human-readable format
        #[arg(long)]
        json: bool,

        /// Disable colorized output
        #[arg(long = "no-color")]
        no_color: bool,
    },
    /// Type-check a Brie program
    Check {
        /// Path to the entry file (must define `main`)
        file: PathBuf,

        /// Print the equivalence classes and the resolved type of every line of `main`
        #[arg(long = "dump-types")]
        dump_types: bool,

        /// Output diagnostics as JSON (one object per line) instead of human-readable format
        #[arg(long)]
        json: bool,

        /// Disable colorized output
        #[arg(long = "no-color")]
        no_color: bool,
    },
}

static TRACING_INIT: Once = Once::new();

/// Install a stderr subscriber when `RUST_LOG` is set.
fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};

        if std::env::var("RUST_LOG").is_ok() {
            let filter = EnvFilter::from_default_env();
            tracing_subscriber::registry()
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(true)
                        .with_level(true),
                )
                .with(filter)
                .init();
        }
    });
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    let (result, json) = match cli.command {
        Commands::Build {
            file,
            output,
            json,
            no_color,
        } => {
            let diag_opts = DiagnosticOptions {
                color: !no_color && !json,
                json,
            };
            (build(&file, output.as_deref(), &diag_opts), json)
        }
        Commands::Check {
            file,
            dump_types,
            json,
            no_color,
        } => {
            let diag_opts = DiagnosticOptions {
                color: !no_color && !json,
                json,
            };
            (check(&file, dump_types, &diag_opts), json)
        }
    };

    if let Err(e) = result {
        if json {
            // In JSON mode, emit the final error as JSON too.
            let msg = serde_json::json!({
                "code": "C0001",
                "severity": "error",
                "message": e,
                "file": "",
                "spans": [],
                "help": null
            });
            eprintln!("{}", msg);
        } else {
            eprintln!("error: {}", e);
        }
        process::exit(1);
    }
}

/// Execute the build pipeline: read -> parse -> analyze -> generate -> write.
fn build(file: &Path, output: Option<&Path>, diag_opts: &DiagnosticOptions) -> Result<(), String> {
    let result = analyze(file, diag_opts)?;
    let js = brie_codegen::compile(result).map_err(|e| format!("code generation failed: {e}"))?;

    let output_path = match output {
        Some(p) => p.to_path_buf(),
        None => file.with_extension("js"),
    };
    std::fs::write(&output_path, js)
        .map_err(|e| format!("Failed to write '{}': {}", output_path.display(), e))?;

    eprintln!("  Compiled: {}", output_path.display());
    Ok(())
}

/// Analyze only, optionally printing the inferred types.
fn check(file: &Path, dump_types: bool, diag_opts: &DiagnosticOptions) -> Result<(), String> {
    let mut result = analyze(file, diag_opts)?;
    if dump_types {
        print!("{}", result.dump_types());
    } else {
        eprintln!("  Checked: {}", file.display());
    }
    Ok(())
}

/// Read the entry file and run the analysis, reporting the first error.
fn analyze(file: &Path, diag_opts: &DiagnosticOptions) -> Result<TypeckResult, String> {
    if !file.is_file() {
        return Err(format!("'{}' is not a file", file.display()));
    }
    let source = std::fs::read_to_string(file)
        .map_err(|e| format!("Failed to read '{}': {}", file.display(), e))?;
    let entry = file
        .file_stem()
        .and_then(|n| n.to_str())
        .unwrap_or("main")
        .to_string();
    let dir = file.parent().unwrap_or_else(|| Path::new("."));
    let mut loader = FsLoader::new(dir);

    match brie_typeck::check(&entry, &source, &mut loader) {
        Ok(result) => Ok(result),
        Err(error) => {
            report_diagnostic(&error, file, &source, &loader, diag_opts);
            Err("Compilation failed due to errors above.".to_string())
        }
    }
}

/// Render an error against the file it was raised in.
fn report_diagnostic(error: &TypeError, file: &Path, source: &str, loader: &FsLoader, diag_opts: &DiagnosticOptions) {
    let (module, error) = error.location();
    let (path, source) = match module {
        Some(module) => (loader.path(module), loader.source(module).unwrap_or_default()),
        None => (file.to_path_buf(), source),
    };
    let file_name = path.display().to_string();
    eprint!("{}", render_diagnostic(error, source, &file_name, diag_opts));
}
