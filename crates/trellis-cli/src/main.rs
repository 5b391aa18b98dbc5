//! Trellis CLI - Command-line interface for script-defined prefabs

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use trellis_core::diagnostics::{
    DiagnosticSink, FanoutSink, MemorySink, Severity, TracingSink, translate_error,
};
use trellis_core::graph::NodeId;
use trellis_core::prefab::InstanceState;
use trellis_engine::{Engine, RuntimeConfig};

#[derive(Parser)]
#[command(name = "trellis")]
#[command(about = "Reactive scene-graph prefabs defined in scripts", long_about = None)]
#[command(version)]
struct Cli {
    /// Runtime configuration file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the prefabs a script declares and their fields
    Inspect {
        /// Prefab script
        script: PathBuf,
    },

    /// Build one instance of a prefab and print the result
    Build {
        /// Prefab script
        script: PathBuf,

        /// Prefab to instantiate
        #[arg(short, long)]
        prefab: String,

        /// Name of the instance node (defaults to the prefab name)
        #[arg(short, long)]
        name: Option<String>,

        /// Field assignments applied after the first build
        #[arg(short, long = "set", value_name = "FIELD=VALUE")]
        sets: Vec<String>,

        /// Print the subtree as JSON instead of a tree
        #[arg(long)]
        json: bool,
    },

    /// Build an instance and rebuild it whenever the script changes
    Watch {
        /// Prefab script
        script: PathBuf,

        /// Prefab to instantiate
        #[arg(short, long)]
        prefab: String,

        /// Name of the instance node (defaults to the prefab name)
        #[arg(short, long)]
        name: Option<String>,

        /// Field assignments applied after the first build
        #[arg(short, long = "set", value_name = "FIELD=VALUE")]
        sets: Vec<String>,

        /// Poll interval in milliseconds
        #[arg(long, default_value = "200")]
        interval: u64,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("{}", translate_error(&e));
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;
    let (sink, memory) = diagnostics(&config);
    let mut engine = Engine::new(config, sink);

    match cli.command {
        Commands::Inspect { script } => {
            engine.load_script(&script)?;
            run_inspect(&engine);
        }
        Commands::Build {
            script,
            prefab,
            name,
            sets,
            json,
        } => {
            engine.load_script(&script)?;
            let node = build_instance(&mut engine, &prefab, name.as_deref(), &sets)?;
            if json {
                println!("{}", engine.to_json(node)?);
            } else {
                print!("{}", engine.print_tree(node)?);
            }
            report_diagnostics(&memory);
            if engine.runtime().state(node) == Some(InstanceState::Failed) {
                anyhow::bail!(
                    "instance '{}' failed to rebuild",
                    name.as_deref().unwrap_or(&prefab)
                );
            }
        }
        Commands::Watch {
            script,
            prefab,
            name,
            sets,
            interval,
        } => {
            engine.load_script(&script)?;
            let node = build_instance(&mut engine, &prefab, name.as_deref(), &sets)?;
            run_watch(
                &mut engine,
                &memory,
                &script,
                node,
                Duration::from_millis(interval),
            )?;
        }
    }

    Ok(())
}

/// Diagnostics go to the log and to a buffer sized by the config
fn diagnostics(config: &RuntimeConfig) -> (Arc<dyn DiagnosticSink>, MemorySink) {
    let memory = config.memory_sink();
    let sinks: Vec<Arc<dyn DiagnosticSink>> = vec![Arc::new(TracingSink), Arc::new(memory.clone())];
    let sink = FanoutSink::new(sinks);
    (Arc::new(sink), memory)
}

/// Summarize buffered warnings and errors on stderr, then clear the buffer
fn report_diagnostics(memory: &MemorySink) {
    let warnings = memory.at_least(Severity::Warning);
    let errors = warnings
        .iter()
        .filter(|m| m.severity >= Severity::Error)
        .count();
    if !warnings.is_empty() {
        eprintln!(
            "{} warning(s), {} error(s)",
            warnings.len() - errors,
            errors
        );
    }
    memory.clear();
}

fn load_config(path: Option<&Path>) -> Result<RuntimeConfig> {
    let Some(path) = path else {
        return Ok(RuntimeConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    RuntimeConfig::from_json(&text)
        .with_context(|| format!("Invalid config file {}", path.display()))
}

fn run_inspect(engine: &Engine) {
    for factory in engine.library().iter() {
        println!("{} ({})", factory.name(), factory.provenance());
        if !factory.doc().is_empty() {
            println!("  {}", factory.doc());
        }
        for param in factory.schema().iter() {
            print!("  {}: {} = {}", param.name, param.field_type, param.default);
            if let Some(help) = &param.help {
                print!("  # {help}");
            }
            println!();
        }
    }
}

fn build_instance(
    engine: &mut Engine,
    prefab: &str,
    name: Option<&str>,
    sets: &[String],
) -> Result<NodeId> {
    let node = engine.instantiate(prefab, name.unwrap_or(prefab))?;
    for assignment in sets {
        engine.assign(node, assignment)?;
    }
    let report = engine.step();
    tracing::debug!(?report, "initial step");
    Ok(node)
}

fn run_watch(
    engine: &mut Engine,
    memory: &MemorySink,
    script: &Path,
    node: NodeId,
    interval: Duration,
) -> Result<()> {
    engine.watch(script)?;

    println!("Watching {}", script.display());
    println!("Press Ctrl+C to stop\n");
    print!("{}", engine.print_tree(node)?);
    report_diagnostics(memory);

    loop {
        if let Some(report) = engine.reload_if_changed()? {
            println!(
                "\n--- Reloaded: {} rebound, {} orphaned, {} rebuilt ---",
                report.rebound, report.orphaned, report.step.rebuilt
            );
            print!("{}", engine.print_tree(node)?);
        }
        report_diagnostics(memory);
        std::thread::sleep(interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_build() {
        let cli = Cli::parse_from([
            "trellis", "build", "tower.rhai", "--prefab", "tower", "--set", "floors=3", "-s",
            "label=east",
        ]);
        let Commands::Build { prefab, sets, json, .. } = cli.command else {
            panic!("expected build");
        };
        assert_eq!(prefab, "tower");
        assert_eq!(sets, ["floors=3", "label=east"]);
        assert!(!json);
    }

    #[test]
    fn test_diagnostics_buffer_follows_config() {
        let config = RuntimeConfig {
            diagnostics_capacity: 1,
            ..RuntimeConfig::default()
        };
        let (sink, memory) = diagnostics(&config);
        sink.emit(trellis_core::diagnostics::Message::warning("first"));
        sink.emit(trellis_core::diagnostics::Message::error("second"));

        let kept = memory.snapshot();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].text, "second");
        report_diagnostics(&memory);
        assert!(memory.is_empty());
    }

    #[test]
    fn test_missing_config_uses_defaults() {
        assert_eq!(load_config(None).ok(), Some(RuntimeConfig::default()));
        assert!(load_config(Some(Path::new("/nonexistent/trellis.json"))).is_err());
    }
}
