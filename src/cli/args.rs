//! Command-line argument definitions using clap

use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::engine::{LossRateType, VariableType, DEFAULT_INFER_SCHEMA_LENGTH};

/// Tiering - Iterative risk segmentation with auto-banding
#[derive(Parser, Debug)]
#[command(name = "tiering")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Engine configuration file (TOML). Defaults are used when omitted.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the observation window used to annualise bad rates
    #[arg(long, global = true, value_parser = validate_months_on_book)]
    pub months_on_book: Option<f64>,
}

/// Dataset arguments shared by every command
#[derive(Args, Debug, Clone)]
pub struct DataArgs {
    /// Input dataset (CSV or Parquet, determined by extension)
    #[arg(short, long)]
    pub input: PathBuf,

    /// Number of rows to use for schema inference (CSV only).
    /// Higher values improve type detection for ambiguous columns but may be slower.
    #[arg(long, default_value_t = DEFAULT_INFER_SCHEMA_LENGTH)]
    pub infer_schema_length: usize,
}

/// Variable arguments shared by `band` and `extend`
#[derive(Args, Debug, Clone)]
pub struct VariableArgs {
    /// Column to bin
    #[arg(short = 'x', long)]
    pub variable: String,

    /// Treat the variable as categorical instead of numerical
    #[arg(long, default_value = "false")]
    pub categorical: bool,

    /// Loss rate used for auto-banding: "dlr" (dollar) or "ulr" (unit)
    #[arg(long, default_value = "dlr", value_parser = parse_loss_rate)]
    pub loss_rate: LossRateType,

    /// Split the variable evenly instead of auto-banding it
    #[arg(long, default_value = "false")]
    pub manual: bool,

    /// Display name of the iteration (defaults to the variable name)
    #[arg(long)]
    pub name: Option<String>,
}

impl VariableArgs {
    pub fn variable_type(&self) -> VariableType {
        if self.categorical {
            VariableType::Categorical
        } else {
            VariableType::Numerical
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a root iteration on one variable and write a new session
    Band {
        #[command(flatten)]
        data: DataArgs,

        #[command(flatten)]
        variable: VariableArgs,

        /// Restrict the iteration to these risk segments (comma-separated indices)
        #[arg(long, value_delimiter = ',')]
        segments: Vec<usize>,

        /// Row filter such as "balance > 0" (repeatable; filters are combined with AND)
        #[arg(long = "filter")]
        filters: Vec<String>,

        /// Session file to write.
        /// Defaults to input directory with '_session.json' suffix (e.g., data.csv → data_session.json).
        #[arg(short, long)]
        session: Option<PathBuf>,

        /// Skip interactive confirmation prompts
        #[arg(long, default_value = "false")]
        no_confirm: bool,
    },

    /// Refine an existing iteration's risk segments with a second variable
    Extend {
        #[command(flatten)]
        data: DataArgs,

        #[command(flatten)]
        variable: VariableArgs,

        /// Session file to extend
        #[arg(short, long)]
        session: PathBuf,

        /// Iteration whose risk segments are refined
        #[arg(short, long, value_parser = parse_iteration_id)]
        parent: u64,

        /// Smooth the auto-banded grid so segments never improve along rows or columns
        #[arg(long, default_value = "false")]
        rank_order: bool,

        /// Where to write the updated session (defaults to overwriting --session)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Skip interactive confirmation prompts
        #[arg(long, default_value = "false")]
        no_confirm: bool,
    },

    /// Resolve an iteration to risk segments and report per-segment metrics
    Resolve {
        #[command(flatten)]
        data: DataArgs,

        /// Session file holding the iteration
        #[arg(short, long)]
        session: PathBuf,

        /// Iteration to resolve
        #[arg(long, value_parser = parse_iteration_id)]
        iteration: u64,

        /// Resolve the default (auto-generated) groups instead of the edited ones
        #[arg(long, default_value = "false")]
        default: bool,

        /// Write the dataset with an added 'risk_segment' column (CSV or Parquet)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Skip interactive confirmation prompts
        #[arg(long, default_value = "false")]
        no_confirm: bool,
    },
}

/// Session path derived from the input file: same directory, '_session.json' suffix
pub fn default_session_path(input: &Path) -> PathBuf {
    let parent = input.parent().unwrap_or_else(|| Path::new("."));
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("tiering");
    parent.join(format!("{}_session.json", stem))
}

fn parse_loss_rate(s: &str) -> Result<LossRateType, String> {
    s.parse()
}

/// Validator for iteration ids; ids start at 1
fn parse_iteration_id(s: &str) -> Result<u64, String> {
    let value: u64 = s
        .trim_start_matches('#')
        .parse()
        .map_err(|_| format!("'{}' is not a valid iteration id", s))?;

    if value == 0 {
        Err("iteration ids start at 1".to_string())
    } else {
        Ok(value)
    }
}

/// Validator for months_on_book parameter
fn validate_months_on_book(s: &str) -> Result<f64, String> {
    let value: f64 = s
        .parse()
        .map_err(|_| format!("'{}' is not a valid number", s))?;

    if !(value > 0.0 && value.is_finite()) {
        Err(format!("months_on_book must be positive, got {}", value))
    } else {
        Ok(value)
    }
}
