//! `weft` launcher
//!
//! Instruments a `.wfm` module for invariant tracing: prints its
//! program-point declarations and rewrites every method body to call
//! into the runtime visitor. The instrumented module is written back in
//! place unless `--save` names another destination.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;
use weft_instrument::{instrument_file, InstrumentOptions};

#[derive(Parser)]
#[command(name = "weft")]
#[command(about = "Bytecode instrumenter for Weft invariant tracing", long_about = None)]
#[command(version)]
struct Cli {
    /// Target `.wfm` module
    target: PathBuf,

    /// Maximum field-nesting depth in declarations
    #[arg(long, default_value_t = 2)]
    nesting_depth: u32,

    /// Omit program points matching this regex
    #[arg(long, value_name = "REGEX")]
    ppt_omit_pattern: Option<String>,

    /// Only emit program points matching this regex
    #[arg(long, value_name = "REGEX")]
    ppt_select_pattern: Option<String>,

    /// Omit variables matching this regex
    #[arg(long, value_name = "REGEX")]
    var_omit_pattern: Option<String>,

    /// File listing side-effect-free methods to declare as variables
    #[arg(long, value_name = "FILE")]
    purity_file: Option<PathBuf>,

    /// Comparability summary produced by a prior comparability run
    #[arg(long, value_name = "FILE")]
    comparability: Option<PathBuf>,

    /// Record every invocation up to this count, then sample
    #[arg(long, default_value_t = 0)]
    sample_start: i32,

    /// Write the instrumented module here instead of rewriting in place
    #[arg(long, value_name = "FILE")]
    save: Option<PathBuf>,

    /// Write declarations to this file and skip rewriting
    #[arg(long, value_name = "FILE")]
    decls_only: Option<PathBuf>,

    /// Append declarations to an existing decls file
    #[arg(long)]
    append: bool,

    /// Verbose progress output
    #[arg(short, long)]
    verbose: bool,

    /// Arguments passed through to the target program
    #[arg(trailing_var_arg = true)]
    args: Vec<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if std::env::var_os("WEFT_HOME").is_none() {
        bail!(
            "WEFT_HOME is not set; it must point at the Weft runtime \
             installation so the instrumented module can reach the visitor"
        );
    }

    let options = InstrumentOptions {
        nesting_depth: cli.nesting_depth,
        ppt_omit: cli.ppt_omit_pattern.clone(),
        ppt_select: cli.ppt_select_pattern.clone(),
        var_omit: cli.var_omit_pattern.clone(),
        purity_file: cli.purity_file.clone(),
        comparability_file: cli.comparability.clone(),
        sample_start: cli.sample_start,
        decls_only: cli.decls_only.is_some(),
    };

    let outcome = instrument_file(&cli.target, &options)
        .with_context(|| format!("failed to instrument {}", cli.target.display()))?;

    let decls_path = match &cli.decls_only {
        Some(path) => path.clone(),
        None => cli.target.with_extension("decls"),
    };
    write_decls(&decls_path, &outcome.decls, cli.append)
        .with_context(|| format!("failed to write {}", decls_path.display()))?;
    info!(
        path = %decls_path.display(),
        types = outcome.types_declared,
        "wrote declarations"
    );

    if cli.decls_only.is_none() {
        let destination = cli.save.clone().unwrap_or_else(|| cli.target.clone());
        fs::write(&destination, outcome.module.encode())
            .with_context(|| format!("failed to write {}", destination.display()))?;
        info!(
            path = %destination.display(),
            methods = outcome.methods_instrumented,
            "wrote instrumented module"
        );
        if !cli.args.is_empty() {
            info!(args = ?cli.args, "program arguments are forwarded by the runtime launcher");
        }
    }
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Write or extend a decls file. A combined file carries one header, so
/// appending drops the header block from the new text.
fn write_decls(path: &Path, decls: &str, append: bool) -> std::io::Result<()> {
    let has_content = append && fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false);
    if !has_content {
        return fs::write(path, decls);
    }
    let blocks = decls
        .split_once("\n\n")
        .map(|(_, rest)| rest)
        .unwrap_or(decls);
    let mut file = fs::OpenOptions::new().append(true).open(path)?;
    write!(file, "\n{blocks}")
}
