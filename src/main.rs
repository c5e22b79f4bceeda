use anyhow::Context;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use unsafe_drop::classifier::Classifier;
use unsafe_drop::cli::{AnalyzeArgs, Args, ClassifyArgs, Command, OutputFormat};
use unsafe_drop::config;
use unsafe_drop::delta::ConstructMode;
use unsafe_drop::program::{DeclarationIndex, Program};
use unsafe_drop::report;
use unsafe_drop::{AnalysisSettings, Analyzer};

fn main() -> ExitCode {
    unsafe_drop::telemetry::init_tracing();
    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::from(2)
        }
    }
}

fn run() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    match args.command {
        Command::Analyze(analyze) => analyze_command(analyze),
        Command::Classify(classify) => {
            classify_command(classify)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Delta => {
            print!("{}", report::render_delta_table());
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn analyze_command(args: AnalyzeArgs) -> anyhow::Result<ExitCode> {
    let program = Program::from_path(&args.program)
        .with_context(|| format!("failed to load program: {}", args.program.display()))?;

    let start_dir = infer_start_dir(&args.program);
    let loaded_cfg = config::load_config(args.config.as_deref(), &start_dir)?;
    let mut settings = match loaded_cfg.as_ref() {
        Some((_path, cfg)) => AnalysisSettings::from_config(cfg),
        None => AnalysisSettings::default(),
    };

    // CLI flags take precedence over config
    if !args.entry_points.is_empty() {
        settings.run.entry_points = args.entry_points.clone();
    }
    if let Some(scope) = args.scope {
        settings.scope = scope;
    }
    if let Some(coverage) = args.coverage {
        settings.run.coverage = coverage;
    }
    if args.sequential {
        settings.run.parallel = false;
    }

    let analysis = Analyzer::new(settings).analyze(&program)?;

    if args.dump_runs {
        for run in [&analysis.unfiltered.consuming, &analysis.unfiltered.factory] {
            eprint!("{}", report::render_run_dump(&program, "unfiltered", run));
        }
        for run in analysis.runs.runs() {
            eprint!("{}", report::render_run_dump(&program, "filtered", run));
        }
    }
    if args.dump_errors {
        eprint!("{}", report::render_error_values(&program, &analysis.runs));
    }

    match args.format {
        OutputFormat::Pretty => print!("{}", report::render_pretty(&program, &analysis.findings)),
        OutputFormat::Json => println!("{}", report::render_json(&program, &analysis.findings)?),
    }

    if args.deny_findings && !analysis.findings.is_empty() {
        return Ok(ExitCode::from(1));
    }
    Ok(ExitCode::SUCCESS)
}

fn classify_command(args: ClassifyArgs) -> anyhow::Result<()> {
    let declarations = match &args.program {
        Some(path) => {
            let program = Program::from_path(path)
                .with_context(|| format!("failed to load program: {}", path.display()))?;
            DeclarationIndex::new(&program)
        }
        None => DeclarationIndex::default(),
    };

    let start_dir = match &args.program {
        Some(path) => infer_start_dir(path),
        None => std::env::current_dir()?,
    };
    let settings = match config::load_config(args.config.as_deref(), &start_dir)? {
        Some((_path, cfg)) => AnalysisSettings::from_config(&cfg),
        None => AnalysisSettings::default(),
    };

    let classifier = Classifier::new(
        Arc::new(settings.known_functions()),
        Arc::new(declarations),
    );
    let mode = ConstructMode::from_flag(args.factory_mode);
    for identifier in &args.identifiers {
        let info = classifier.classify(identifier, mode);
        print!("{}", report::render_function_info(identifier, mode, &info));
    }
    Ok(())
}

fn infer_start_dir(program: &Path) -> PathBuf {
    program
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}
