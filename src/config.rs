use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

use crate::cli::Cli;
use crate::ingest::{IngestConfig, default_worker_count};
use crate::layout::LayoutConfig;
use crate::session::SessionConfig;

pub const WORKERS_ENV: &str = "CLASS_GRAPH_WORKERS";
pub const TICK_MS_ENV: &str = "CLASS_GRAPH_TICK_MS";

pub fn resolve_session_config(cli: &Cli) -> Result<SessionConfig> {
    Ok(SessionConfig {
        ingest: IngestConfig {
            workers: resolve_workers(cli)?,
            ..IngestConfig::default()
        },
        layout: LayoutConfig {
            interval: resolve_tick_interval(cli)?,
        },
    })
}

pub fn resolve_workers(cli: &Cli) -> Result<usize> {
    if let Some(n) = cli.workers {
        return Ok(n.max(1));
    }

    if let Some(n) = env_number(WORKERS_ENV)? {
        return Ok((n as usize).max(1));
    }

    Ok(default_worker_count())
}

pub fn resolve_tick_interval(cli: &Cli) -> Result<Duration> {
    if let Some(ms) = cli.tick_ms {
        return Ok(Duration::from_millis(ms.max(1)));
    }

    if let Some(ms) = env_number(TICK_MS_ENV)? {
        return Ok(Duration::from_millis(ms.max(1)));
    }

    Ok(LayoutConfig::default().interval)
}

fn env_number(key: &str) -> Result<Option<u64>> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .with_context(|| format!("{key} must be a non-negative integer, got {raw:?}")),
        Err(_) => Ok(None),
    }
}
