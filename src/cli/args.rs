use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(name = "judgelet")]
#[clap(version, about = "Sandboxed execution and judging of learner JavaScript")]
#[clap(propagate_version = true)]
pub struct Cli {
    #[clap(flatten)]
    pub global_opts: GlobalOpts,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug)]
pub struct GlobalOpts {
    /// Configuration file path
    #[clap(short, long, global = true, env = "JUDGELET_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[clap(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Output format
    #[clap(long, global = true, default_value = "text", value_enum)]
    pub format: OutputFormat,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a program with instrumentation and print its output
    Run(RunArgs),

    /// Run a function against a test suite and judge every case
    Test(TestArgs),

    /// Evaluate a lesson step's structural tests against a program
    Check(CheckArgs),

    /// Print the instrumented form of a program
    Instrument(InstrumentArgs),

    /// List sandbox backends and whether they can be used here
    Backends,

    /// Initialize a new judgelet configuration
    Init(InitArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

// ============================================================================
// Execution Commands
// ============================================================================

#[derive(Args, Debug)]
pub struct RunArgs {
    /// JavaScript file to run
    pub file: PathBuf,

    /// Timeout in milliseconds (defaults to execution.run_timeout_ms)
    #[clap(long, short = 't')]
    pub timeout: Option<u64>,
}

#[derive(Args, Debug)]
pub struct TestArgs {
    /// JavaScript file defining the function under test
    pub file: PathBuf,

    /// Suite file (JSON): {"signature": {...}, "cases": [...]}
    #[clap(long, short = 's')]
    pub suite: PathBuf,
}

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// JavaScript file to check
    pub file: PathBuf,

    /// Step file (JSON): an array of structural tests, or {"tests": [...]}
    #[clap(long)]
    pub step: PathBuf,

    /// Timeout in milliseconds (defaults to execution.run_timeout_ms)
    #[clap(long, short = 't')]
    pub timeout: Option<u64>,
}

#[derive(Args, Debug)]
pub struct InstrumentArgs {
    /// JavaScript file to instrument
    pub file: PathBuf,

    /// Skip variable tracking
    #[clap(long)]
    pub no_variables: bool,

    /// Skip call tracking
    #[clap(long)]
    pub no_calls: bool,

    /// Skip cancellation checkpoints in loops
    #[clap(long)]
    pub no_yields: bool,
}

// ============================================================================
// Config Commands
// ============================================================================

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Force overwrite existing configuration
    #[clap(short, long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[clap(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,
    /// Show configuration file path
    Path,
}

#[derive(Debug, Clone, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_test_command() {
        let cli = Cli::parse_from(["judgelet", "--format", "json", "-vv", "test", "sol.js", "--suite", "two-sum.json"]);
        assert_eq!(cli.global_opts.verbose, 2);
        assert!(matches!(cli.global_opts.format, OutputFormat::Json));
        match cli.command {
            Commands::Test(args) => {
                assert_eq!(args.file, PathBuf::from("sol.js"));
                assert_eq!(args.suite, PathBuf::from("two-sum.json"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parses_instrument_flags() {
        let cli = Cli::parse_from(["judgelet", "instrument", "a.js", "--no-calls"]);
        match cli.command {
            Commands::Instrument(args) => {
                assert!(args.no_calls);
                assert!(!args.no_variables);
                assert!(!args.no_yields);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
