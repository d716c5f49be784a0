use anyhow::{Context, Result};
use clap::Parser;
use class_graph::cli::Cli;
use class_graph::config::resolve_session_config;
use class_graph::report::{GraphReport, render, write_output};
use class_graph::session::GraphSession;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = resolve_session_config(&cli)?;

    let started = Instant::now();
    let mut session = GraphSession::open(&cli.classpath, config).context("invalid classpath")?;
    session.start().context("failed to start scan")?;

    let state = session.wait_for_scan();
    std::thread::sleep(Duration::from_millis(cli.settle_ms));
    session.terminate();

    let report = GraphReport::collect(
        cli.classpath
            .iter()
            .map(|p| p.to_string_lossy().to_string())
            .collect(),
        &session.graph(),
        state,
        session.scan_stats().summary(),
        session.layout_ticks(),
        started.elapsed().as_millis() as u64,
    );
    let content = render(&report, cli.format)?;
    write_output(&content, cli.output.as_deref())?;

    Ok(())
}
