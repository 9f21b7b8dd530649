//! Blueprint Forge CLI
//!
//! Usage:
//!   blueprints check
//!   blueprints plan --root ./blueprints
//!   blueprints graph --output deps.dot
//!   blueprints search tasks
//!   blueprints generate --language rust --concurrency 8 --report run.json
//!   blueprints generate --output-dir generated --force
//!   blueprints config --output blueprints.toml

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use blueprint_forge::graph::{DiagnosticCode, GenerationPlan};
use blueprint_forge::{
    load_project, BlueprintGraph, CancellationToken, CommandGenerator, ForgeConfig, ForgeError,
    FsArtifactWriter, GenerationState, JsonReporter, Language, ProjectManifest, Reporter,
    Scheduler, TracingReporter,
};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "blueprints")]
#[command(about = "Resolve blueprint dependencies and generate code in dependency order")]
struct Cli {
    /// Explicit config file (TOML)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Blueprint root (overrides project.root)
    #[arg(short, long, global = true)]
    root: Option<PathBuf>,

    /// Debug logging unless RUST_LOG is set
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build the graph and report diagnostics
    Check,

    /// Print generation levels
    Plan,

    /// Export the dependency graph as DOT
    Graph {
        #[arg(short, long, default_value = "blueprints.dot")]
        output: PathBuf,
    },

    /// Fuzzy module lookup
    Search {
        query: String,

        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },

    /// Generate code for every blueprint, or only the named modules and their dependencies
    Generate {
        /// Restrict the run to these modules (repeatable)
        #[arg(long)]
        only: Vec<String>,

        #[arg(short, long)]
        language: Option<Language>,

        /// Maximum concurrent generator calls
        #[arg(long)]
        concurrency: Option<usize>,

        #[arg(long)]
        max_repairs: Option<usize>,

        /// Write artifacts under this directory instead of next to each blueprint
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Write the run report as JSON
        #[arg(long)]
        report: Option<PathBuf>,

        /// Overwrite files that already exist
        #[arg(short, long)]
        force: bool,
    },

    /// Print the effective configuration
    Config {
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<i32> {
    let mut config = ForgeConfig::load_from(cli.config.as_deref()).context("loading configuration")?;
    if let Some(root) = cli.root {
        config.project.root = root;
    }
    let root = config.project_root();

    match cli.command {
        Command::Check => check(&config, &root),
        Command::Plan => plan(&config, &root),
        Command::Graph { output } => {
            let Some(graph) = load_graph(&config, &root, &TracingReporter)? else {
                return Ok(1);
            };
            std::fs::write(&output, graph.to_dot())
                .with_context(|| format!("writing {}", output.display()))?;
            println!(
                "✅ Exported {} modules, {} edges to {}",
                graph.module_count(),
                graph.edge_count(),
                output.display()
            );
            Ok(0)
        }
        Command::Search { query, limit } => {
            let Some(graph) = load_graph(&config, &root, &TracingReporter)? else {
                return Ok(1);
            };
            let results = graph.search(&query, limit);
            if results.is_empty() {
                println!("No modules match '{}'", query);
            }
            for hit in results {
                println!("{:>5}  {}  ({})", hit.score, hit.id, hit.path.display());
            }
            Ok(0)
        }
        Command::Generate {
            only,
            language,
            concurrency,
            max_repairs,
            output_dir,
            report,
            force,
        } => {
            if let Some(language) = language {
                config.generation.language = language;
            }
            if let Some(concurrency) = concurrency {
                config.generation.max_concurrency = concurrency;
            }
            if let Some(max_repairs) = max_repairs {
                config.generation.max_repairs = max_repairs;
            }
            if output_dir.is_some() {
                config.output.dir = output_dir;
            }
            if report.is_some() {
                config.output.report = report;
            }
            if force {
                config.output.overwrite = true;
            }
            generate(&config, &root, &only).await
        }
        Command::Config { output } => {
            match output {
                Some(path) => {
                    let path_str = path.to_string_lossy();
                    config
                        .save(&path_str)
                        .with_context(|| format!("writing {}", path.display()))?;
                    println!("✅ Configuration written to {}", path.display());
                }
                None => print!("{}", config.to_toml().context("serializing configuration")?),
            }
            Ok(0)
        }
    }
}

/// `None` when the graph was rejected; diagnostics have been reported
fn load_graph(
    config: &ForgeConfig,
    root: &Path,
    reporter: &dyn Reporter,
) -> Result<Option<BlueprintGraph>> {
    match load_project(root, &config.load_config()) {
        Ok(graph) => Ok(Some(graph)),
        Err(ForgeError::Graph(err)) => {
            reporter.graph_failed(&err);
            eprintln!("{}", err.diagnostics.format_all());
            eprintln!(
                "\n❌ Blueprint graph rejected with {} error(s)",
                err.diagnostics.error_count()
            );
            Ok(None)
        }
        Err(e) => Err(e).with_context(|| format!("loading blueprints from {}", root.display())),
    }
}

fn check(config: &ForgeConfig, root: &Path) -> Result<i32> {
    println!("🔍 Checking blueprints in {}\n", root.display());
    let Some(graph) = load_graph(config, root, &TracingReporter)? else {
        return Ok(1);
    };
    let plan = GenerationPlan::build(&graph);

    for warning in plan.warnings.with_code(DiagnosticCode::CycleCollapsed) {
        println!("⚠️  {}", warning);
    }
    println!(
        "✅ {} modules, {} edges, {} levels, {} collapsed cycle(s)",
        graph.module_count(),
        graph.edge_count(),
        plan.order.len(),
        plan.analysis.collapsed().count()
    );
    Ok(0)
}

fn plan(config: &ForgeConfig, root: &Path) -> Result<i32> {
    let Some(graph) = load_graph(config, root, &TracingReporter)? else {
        return Ok(1);
    };
    let plan = GenerationPlan::build(&graph);

    for level in &plan.order.levels {
        println!("Level {}:", level.index);
        for unit in &level.units {
            let names: Vec<&str> = unit.members.iter().map(|m| m.as_str()).collect();
            if unit.is_collapsed() {
                println!("  ⟳ {} (cycle, generated together)", names.join(", "));
            } else {
                println!("  - {}", names.join(", "));
            }
        }
    }
    Ok(0)
}

async fn generate(config: &ForgeConfig, root: &Path, only: &[String]) -> Result<i32> {
    let Some(mut graph) = load_graph(config, root, &TracingReporter)? else {
        return Ok(1);
    };
    if !only.is_empty() {
        graph = graph.restrict_to(only).context("restricting the run")?;
    }
    let plan = GenerationPlan::build(&graph);
    for warning in plan.warnings.all() {
        warn!("{}", warning);
    }

    let scheduler_config = config.scheduler_config();
    let language = scheduler_config.language;
    let generator = CommandGenerator::from_command_line(&config.generation.command)
        .context("generation.command must name a program")?
        .with_model(config.generation.model.clone());

    let manifest = ProjectManifest::load(&root.join(&config.project.manifest))
        .context("reading project manifest")?;

    let mut scheduler = Scheduler::new(scheduler_config, Arc::new(generator))
        .with_dependency_versions(manifest.all_versions());
    if config.output.write_artifacts {
        let mut writer =
            FsArtifactWriter::new(root, language).with_overwrite(config.output.overwrite);
        if let Some(dir) = &config.output.dir {
            writer = writer.with_output_dir(root.join(dir));
        }
        scheduler = scheduler.with_writer(Arc::new(writer));
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; finishing in-flight nodes");
            on_signal.cancel();
        }
    });

    info!(root = %root.display(), language = %language, "Generating");
    let report = scheduler.run(Arc::new(graph), &plan, &cancel).await;

    TracingReporter.run_finished(&report)?;
    if let Some(path) = &config.output.report {
        JsonReporter::new(path)
            .run_finished(&report)
            .with_context(|| format!("writing report {}", path.display()))?;
    }

    for result in report.results.values() {
        let mark = match result.state {
            GenerationState::Succeeded => "✅",
            GenerationState::Failed => "❌",
            GenerationState::Cancelled => "⏹️ ",
            GenerationState::Pending | GenerationState::InProgress => "…",
        };
        let location = result
            .output_path
            .as_ref()
            .map(|p| format!(" -> {}", blueprint_forge::writer::display_path(root, p)))
            .unwrap_or_default();
        println!("{} {}{}", mark, result.module_id, location);
        for finding in result.errors.iter().chain(result.warnings.iter()) {
            println!("     {}", finding);
        }
    }
    println!(
        "\n{} succeeded, {} failed, {} cancelled",
        report.succeeded(),
        report.failed(),
        report.cancelled_nodes()
    );

    Ok(if report.is_success() { 0 } else { 1 })
}
