use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "class-graph")]
#[command(about = "Build the class relationship graph of a JVM classpath and lay it out in 3-D")]
pub struct Cli {
    /// Jar archives and/or directories of compiled classes
    #[arg(value_name = "PATH", required = true)]
    pub classpath: Vec<PathBuf>,

    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,

    /// Layout tick interval
    #[arg(long, value_name = "MS")]
    pub tick_ms: Option<u64>,

    /// How long the layout runs after ingestion before the report is taken
    #[arg(long, value_name = "MS", default_value_t = 2000)]
    pub settle_ms: u64,

    #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,

    #[arg(short = 'o', long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum OutputFormat {
    Json,
    Text,
}
