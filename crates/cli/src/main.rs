mod cmd;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cmd::{BuildOptions, RunOptions, cmd_build, cmd_info, cmd_resolve, cmd_run, cmd_status};
use output::print_error;

/// extbuild - on-demand incremental builds of native extension modules
#[derive(Parser)]
#[command(name = "extbuild")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Log debug output (overrides RUST_LOG)
  #[arg(short, long, global = true, conflicts_with = "quiet")]
  verbose: bool,

  /// Only log errors (overrides RUST_LOG)
  #[arg(short, long, global = true)]
  quiet: bool,

  /// How long to wait for a concurrent build of the same module, e.g. "30s"
  #[arg(long, global = true, value_parser = humantime::parse_duration)]
  lock_timeout: Option<Duration>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Build opted-in sources below each directory, or the given source files
  Build {
    /// Source files or directories to walk
    #[arg(default_value = ".")]
    paths: Vec<PathBuf>,

    /// Rebuild even when artifacts are up to date
    #[arg(short, long, conflicts_with = "release")]
    force: bool,

    /// Never compile; only check that artifacts exist
    #[arg(long)]
    release: bool,
  },

  /// Build a source file if needed, load it and call its `main`
  ///
  /// The process exits with the status `main` returns.
  Run {
    /// Source file defining `int main(void)`
    file: PathBuf,

    /// Make the module's symbols visible to libraries loaded after it
    #[arg(long)]
    global_symbols: bool,
  },

  /// Print the source file a dotted module name resolves to
  Resolve {
    /// Dotted module name, e.g. "pkg.fast"
    module: String,

    /// Only accept sources whose first line carries the opt-in marker
    #[arg(long)]
    opt_in: bool,
  },

  /// Show the checksum trailer of a built artifact and whether it is current
  Status {
    /// Path to the artifact
    artifact: PathBuf,

    /// Output as JSON
    #[arg(long)]
    json: bool,
  },

  /// Show effective settings
  Info {
    /// Output as JSON
    #[arg(long)]
    json: bool,
  },
}

fn main() -> ExitCode {
  let cli = Cli::parse();
  init_tracing(cli.verbose, cli.quiet);

  let result = match cli.command {
    Commands::Build { paths, force, release } => cmd_build(
      &paths,
      &BuildOptions {
        force,
        release,
        lock_timeout: cli.lock_timeout,
      },
    )
    .map(|()| ExitCode::SUCCESS),
    Commands::Run { file, global_symbols } => cmd_run(
      &file,
      &RunOptions {
        global_symbols,
        lock_timeout: cli.lock_timeout,
      },
    )
    .map(|code| ExitCode::from(code as u8)),
    Commands::Resolve { module, opt_in } => cmd_resolve(&module, opt_in).map(|()| ExitCode::SUCCESS),
    Commands::Status { artifact, json } => cmd_status(&artifact, json).map(|()| ExitCode::SUCCESS),
    Commands::Info { json } => cmd_info(cli.lock_timeout, json).map(|()| ExitCode::SUCCESS),
  };

  match result {
    Ok(code) => code,
    Err(e) => {
      print_error(&format!("{:#}", e));
      ExitCode::FAILURE
    }
  }
}

fn init_tracing(verbose: bool, quiet: bool) {
  let filter = if verbose {
    EnvFilter::new("debug")
  } else if quiet {
    EnvFilter::new("error")
  } else {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
  };

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();
}
