// SPDX-License-Identifier: MIT OR Apache-2.0
//! `nodescript` - headless host for node graph documents
//!
//! Loads a graph document together with the node packs it names, then runs
//! it, exports it as a Python script or just checks that it resolves.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nodescript_graph::stdout::{self, StdoutGuard};
use nodescript_graph::{Engine, EngineConfig, NativeLibrary, NodeId, RunOutcome};
use std::path::{Path, PathBuf};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Run, export and check node graph documents
#[derive(Debug, Parser)]
#[command(name = "nodescript")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Engine configuration file (default: nodescript.ron next to the document)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Execute a document
    Run {
        /// Graph document (JSON or RON)
        document: PathBuf,

        /// Only execute this node, after every node feeding it
        #[arg(long)]
        node: Option<NodeId>,

        /// Capture what nodes print and show it after the run
        #[arg(long)]
        capture_stdout: bool,
    },

    /// Export a document as a Python script
    Export {
        /// Graph document (JSON or RON)
        document: PathBuf,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Load a document and report what it resolves to
    Check {
        /// Graph document (JSON or RON)
        document: PathBuf,
    },
}

impl Command {
    fn document(&self) -> &Path {
        match self {
            Self::Run { document, .. } | Self::Export { document, .. } | Self::Check { document } => {
                document
            }
        }
    }
}

fn load_config(cli: &Cli) -> Result<EngineConfig> {
    match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("failed to load config: {}", path.display())),
        None => {
            let dir = cli.command.document().parent().unwrap_or(Path::new("."));
            EngineConfig::load_or_default(dir).context("failed to load config")
        }
    }
}

fn init_tracing(config: &EngineConfig) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn open(config: EngineConfig, document: &Path) -> Result<Engine> {
    let mut engine = Engine::new(NativeLibrary::standard(), config);
    engine
        .load_document(document)
        .with_context(|| format!("failed to load document: {}", document.display()))?;
    Ok(engine)
}

fn run(engine: &mut Engine, node: Option<NodeId>, capture_stdout: bool) -> Result<String> {
    if let Some(id) = node {
        anyhow::ensure!(engine.graph().node(id).is_some(), "no node with id {id}");
    }

    let guard = capture_stdout.then(stdout::redirect);
    let result = match node {
        Some(id) => engine.execute_node_after_upstream_ones(id),
        None => engine.execute_graph(None),
    };
    let captured = guard.map(StdoutGuard::finish);

    let outcome = result.context("execution failed")?;
    let mut summary = match outcome {
        RunOutcome::Completed(report) => report.status_message(),
        other => other.info_message().unwrap_or_default().to_string(),
    };
    if let Some(captured) = captured {
        summary.push_str("\n--- captured stdout ---\n");
        summary.push_str(&captured);
    }
    Ok(summary)
}

fn check(engine: &Engine) -> String {
    let graph = engine.graph();
    let scripts = engine.registry().node_def_map.len();
    let proxies = graph.nodes().filter(|n| n.is_proxy()).count();
    format!(
        "{} node(s) ({} proxy), {} edge parent(s), {} script(s) from {} pack(s)",
        graph.node_count(),
        proxies,
        graph.tree().to_records().len(),
        scripts,
        engine.registry().known_packs.len()
    )
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_tracing(&config);

    tracing::debug!("Starting nodescript v{}", env!("CARGO_PKG_VERSION"));

    let mut engine = open(config, cli.command.document())?;
    match cli.command {
        Command::Run {
            node,
            capture_stdout,
            ..
        } => {
            println!("{}", run(&mut engine, node, capture_stdout)?);
        }
        Command::Export { output, .. } => {
            let script = engine.export_python().context("export failed")?;
            match output {
                Some(path) => std::fs::write(&path, script)
                    .with_context(|| format!("failed to write {}", path.display()))?,
                None => print!("{script}"),
            }
        }
        Command::Check { .. } => println!("{}", check(&engine)),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodescript_graph::{GraphDocument, NodeRecord, SocketId, WidgetRecord};
    use tempfile::TempDir;

    fn write_document(dir: &Path) -> PathBuf {
        let mut document = GraphDocument::default();
        let mut data = NodeRecord::proxy(1);
        data.widget = Some(WidgetRecord::new(-2));
        document.nodes.insert("1".into(), data);
        let mut abs = NodeRecord::proxy(2);
        abs.builtin_id = Some("abs".into());
        document.nodes.insert("2".into(), abs);
        let mut print = NodeRecord::proxy(3);
        print.builtin_id = Some("print".into());
        print.subparam_map.insert("values".into(), vec![0]);
        document.nodes.insert("3".into(), print);

        let path = dir.join("doc.json");
        document.save(&path).unwrap();
        let mut engine = open(EngineConfig::default(), &path).unwrap();
        engine.add_edge(&SocketId::proxy(1), &SocketId::input(2, "x")).unwrap();
        engine
            .add_edge(&SocketId::output(2, "output"), &SocketId::subparam(3, "values", 0))
            .unwrap();
        engine.save_document(&path).unwrap();
        path
    }

    #[test]
    fn test_parse_arguments() {
        let cli = Cli::try_parse_from(["nodescript", "run", "doc.json", "--node", "3", "--capture-stdout"])
            .unwrap();
        assert!(matches!(
            cli.command,
            Command::Run { node: Some(3), capture_stdout: true, .. }
        ));
        let cli = Cli::try_parse_from(["nodescript", "export", "doc.ron", "-o", "out.py"]).unwrap();
        assert_eq!(cli.command.document(), Path::new("doc.ron"));
        assert!(Cli::try_parse_from(["nodescript", "frobnicate"]).is_err());
    }

    #[test]
    fn test_run_with_captured_stdout() {
        let temp = TempDir::new().unwrap();
        let path = write_document(temp.path());
        let mut engine = open(EngineConfig::default(), &path).unwrap();

        let summary = run(&mut engine, None, true).unwrap();
        assert!(summary.starts_with("Executed 2 node(s)"));
        assert!(summary.ends_with("--- captured stdout ---\n2\n"));

        let summary = run(&mut engine, Some(2), true).unwrap();
        assert!(summary.starts_with("Executed 1 node(s)"));
        assert!(summary.ends_with("--- captured stdout ---\n"));

        let summary = run(&mut engine, Some(3), true).unwrap();
        assert!(summary.starts_with("Executed 2 node(s)"));
        assert!(summary.ends_with("--- captured stdout ---\n2\n"));
        assert!(run(&mut engine, Some(42), false).is_err());
    }

    #[test]
    fn test_check_summary() {
        let temp = TempDir::new().unwrap();
        let path = write_document(temp.path());
        let engine = open(EngineConfig::default(), &path).unwrap();
        assert_eq!(check(&engine), "3 node(s) (1 proxy), 2 edge parent(s), 0 script(s) from 0 pack(s)");
    }
}
