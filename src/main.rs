//! Tiering: iterative risk segmentation CLI
//!
//! Bands a variable into risk segments, refines segments with further
//! variables, and scores a dataset with the resulting segments.

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use console::style;
use polars::prelude::DataFrame;

use tiering::cli::{confirm_overwrite, default_session_path, Cli, Commands, DataArgs, VariableArgs};
use tiering::engine::{
    dataset_stats, load_dataset, save_dataset, EngineConfig, FrameDataProvider, IterationId, IterationsRepository,
    NewIteration,
};
use tiering::report::{
    display_grid, display_groups, display_messages, display_segment_metrics, export_session, read_session,
};
use tiering::utils::{
    abandon, create_spinner, finish_with_success, finish_with_warning, print_banner, print_completion, print_config,
    print_error, print_info, print_step_header, print_step_time, print_success, print_warning,
};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    if let Err(err) = run(Cli::parse()) {
        print_error(&format!("{:#}", err));
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Band {
            data,
            variable,
            segments,
            filters,
            session,
            no_confirm,
        } => {
            let session = session.unwrap_or_else(|| default_session_path(&data.input));
            run_band(config, &data, &variable, segments, filters, &session, no_confirm)
        }
        Commands::Extend {
            data,
            variable,
            session,
            parent,
            rank_order,
            output,
            no_confirm,
        } => {
            let output = output.unwrap_or_else(|| session.clone());
            run_extend(config, &data, &variable, &session, parent, rank_order, &output, no_confirm)
        }
        Commands::Resolve {
            data,
            session,
            iteration,
            default,
            output,
            no_confirm,
        } => run_resolve(config, &data, &session, iteration, default, output.as_deref(), no_confirm),
    }
}

/// Configuration file (or defaults) with command-line overrides applied
fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_toml_file(path)
            .with_context(|| format!("Failed to load configuration: {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(months) = cli.months_on_book {
        config.months_on_book = months;
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Load the dataset and wrap it in a data provider; the raw frame is kept
/// for writing scored output
fn load_data(data: &DataArgs) -> Result<(DataFrame, FrameDataProvider)> {
    let step_start = Instant::now();
    let spinner = create_spinner(&format!("Loading {}", data.input.display()));
    let frame = match load_dataset(&data.input, data.infer_schema_length) {
        Ok(frame) => frame,
        Err(err) => {
            abandon(&spinner);
            return Err(err);
        }
    };
    finish_with_success(&spinner, "Dataset loaded");

    let (rows, cols, memory_mb) = dataset_stats(&frame);
    println!("\n    {} Dataset Statistics:", style("✧").cyan());
    println!("      Rows: {}", rows);
    println!("      Columns: {}", cols);
    println!("      Estimated memory: {:.2} MB", memory_mb);
    print_step_time(step_start.elapsed());

    let name = data
        .input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("data")
        .to_string();
    let provider = FrameDataProvider::from_frame(name, frame.clone())?;
    Ok((frame, provider))
}

fn new_iteration(variable: &VariableArgs) -> NewIteration {
    let mut request = NewIteration::new(&variable.variable, variable.variable_type()).loss_rate(variable.loss_rate);
    if let Some(name) = &variable.name {
        request = request.named(name);
    }
    request
}

/// Print the per-segment metric table, or why it is unavailable
fn show_metrics(repository: &mut IterationsRepository, id: IterationId, default: bool) {
    match repository.get_metric_range(id, default) {
        Ok(range) => display_segment_metrics(&range, &repository.metric_definitions()),
        Err(err) => print_warning(&format!("Segment metrics unavailable: {}", err)),
    }
}

fn write_session(repository: &IterationsRepository, input: &Path, path: &Path, no_confirm: bool) -> Result<()> {
    if !confirm_overwrite(path, no_confirm)? {
        print_info("Session not written");
        return Ok(());
    }
    export_session(repository.to_session()?, input, path)?;
    print_success(&format!("Session written to {}", path.display()));
    Ok(())
}

fn run_band(
    config: EngineConfig,
    data: &DataArgs,
    variable: &VariableArgs,
    segments: Vec<usize>,
    filters: Vec<String>,
    session: &Path,
    no_confirm: bool,
) -> Result<()> {
    print_banner(env!("CARGO_PKG_VERSION"));
    print_config(&data.input, &variable.variable, session);

    print_step_header(1, "Load Dataset");
    let (_, provider) = load_data(data)?;
    let mut repository = IterationsRepository::new(config, Box::new(provider))?;

    let mut request = new_iteration(variable);
    if !filters.is_empty() {
        for text in &filters {
            repository
                .define_filter(text, text)
                .with_context(|| format!("Invalid filter '{}'", text))?;
        }
        request = request.filters(filters);
    }
    if !segments.is_empty() {
        request = request.segments(segments);
    }
    if !variable.manual {
        request = request.auto_band(false);
    }

    print_step_header(2, if variable.manual { "Split Variable" } else { "Auto-band Variable" });
    let step_start = Instant::now();
    let spinner = create_spinner(&format!("Banding '{}'", variable.variable));
    let id = match repository.add_single_var_iteration(request) {
        Ok(id) => id,
        Err(err) => {
            abandon(&spinner);
            return Err(err).with_context(|| format!("Failed to band '{}'", variable.variable));
        }
    };
    finish_with_success(&spinner, &format!("Created iteration {}", id));
    print_step_time(step_start.elapsed());

    display_groups(repository.iteration(id)?, false);
    let output = repository.get_risk_segments(id, false)?;
    display_messages(&output);
    show_metrics(&mut repository, id, false);

    print_step_header(3, "Save Session");
    write_session(&repository, &data.input, session, no_confirm)?;
    print_completion();
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_extend(
    config: EngineConfig,
    data: &DataArgs,
    variable: &VariableArgs,
    session: &Path,
    parent: u64,
    rank_order: bool,
    output: &Path,
    no_confirm: bool,
) -> Result<()> {
    print_banner(env!("CARGO_PKG_VERSION"));
    print_config(&data.input, &variable.variable, output);

    print_step_header(1, "Load Session and Dataset");
    let export = read_session(session)?;
    let (_, provider) = load_data(data)?;
    let mut repository = IterationsRepository::from_session(export.session, config, Box::new(provider))?;
    print_info(&format!("{} iteration(s) restored", repository.len()));

    let mut request = new_iteration(variable);
    if !variable.manual {
        request = request.auto_band(rank_order);
    }

    print_step_header(2, "Refine Risk Segments");
    let step_start = Instant::now();
    let parent = IterationId::Real(parent);
    let spinner = create_spinner(&format!("Banding '{}' below {}", variable.variable, parent));
    let id = match repository.add_double_var_iteration(parent, request) {
        Ok(id) => id,
        Err(err) => {
            abandon(&spinner);
            return Err(err).with_context(|| format!("Failed to extend iteration {}", parent));
        }
    };
    finish_with_success(&spinner, &format!("Created iteration {}", id));
    print_step_time(step_start.elapsed());

    display_groups(repository.iteration(id)?, false);
    if let Some(grid) = repository.iteration(id)?.grid(false) {
        display_grid(grid, repository.risk_segment_details(id)?);
    }
    let resolved = repository.get_risk_segments(id, false)?;
    display_messages(&resolved);
    show_metrics(&mut repository, id, false);

    print_step_header(3, "Save Session");
    write_session(&repository, &data.input, output, no_confirm)?;
    print_completion();
    Ok(())
}

fn run_resolve(
    config: EngineConfig,
    data: &DataArgs,
    session: &Path,
    iteration: u64,
    default: bool,
    output: Option<&Path>,
    no_confirm: bool,
) -> Result<()> {
    print_banner(env!("CARGO_PKG_VERSION"));

    print_step_header(1, "Load Session and Dataset");
    let export = read_session(session)?;
    let (mut frame, provider) = load_data(data)?;
    let mut repository = IterationsRepository::from_session(export.session, config, Box::new(provider))?;

    print_step_header(2, "Resolve Risk Segments");
    let id = IterationId::Real(iteration);
    let step_start = Instant::now();
    let spinner = create_spinner(&format!("Resolving iteration {}", id));
    let resolved = match repository.get_risk_segments(id, default) {
        Ok(resolved) => resolved,
        Err(err) => {
            abandon(&spinner);
            return Err(err).with_context(|| format!("Failed to resolve iteration {}", id));
        }
    };
    if resolved.is_valid() {
        finish_with_success(&spinner, "Risk segments resolved");
    } else {
        finish_with_warning(&spinner, "Risk segments resolved with errors");
    }
    print_step_time(step_start.elapsed());

    display_groups(repository.iteration(id)?, default);
    display_messages(&resolved);
    show_metrics(&mut repository, id, default);

    if let Some(path) = output {
        print_step_header(3, "Save Scored Dataset");
        if !resolved.is_valid() {
            anyhow::bail!(
                "Iteration {} has {} validation error(s); fix its groups before scoring",
                id,
                resolved.errors.len()
            );
        }
        if !confirm_overwrite(path, no_confirm)? {
            print_info("Scored dataset not written");
            return Ok(());
        }
        let details = repository.risk_segment_details(id)?;
        frame
            .with_column(resolved.to_labeled_column("risk_segment", |s| details.name(s)))
            .context("Failed to add risk_segment column")?;
        save_dataset(&mut frame, path)?;
        print_success(&format!("Scored dataset written to {}", path.display()));
    }

    print_completion();
    Ok(())
}
