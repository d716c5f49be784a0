use anyhow::Result;
use serde::Serialize;
use std::path::Path;

use crate::cli::OutputFormat;
use crate::graph::{DependencyGraph, Edge};
use crate::ingest::{ScanState, ScanSummary};
use crate::origin::ClassOrigin;

#[derive(Debug, Serialize)]
pub struct NodeReport {
    pub identity: String,
    pub package: String,
    pub simple_name: String,
    pub origin: ClassOrigin,
    pub color: [f32; 3],
    pub position: [f32; 3],
}

#[derive(Debug, Serialize)]
pub struct GraphReport {
    pub classpath: Vec<String>,
    pub state: ScanState,
    pub scan: ScanSummary,
    pub layout_ticks: u64,
    pub node_count: usize,
    pub edge_count: usize,
    pub duration_ms: u64,
    pub nodes: Vec<NodeReport>,
    pub edges: Vec<Edge>,
}

impl GraphReport {
    pub fn collect(
        classpath: Vec<String>,
        graph: &DependencyGraph,
        state: ScanState,
        scan: ScanSummary,
        layout_ticks: u64,
        duration_ms: u64,
    ) -> Self {
        let mut nodes: Vec<NodeReport> = graph
            .nodes()
            .iter()
            .map(|n| NodeReport {
                identity: n.identity().to_string(),
                package: n.package_name().to_string(),
                simple_name: n.simple_name().to_string(),
                origin: n.origin(),
                color: n.color(),
                position: n.position(),
            })
            .collect();
        nodes.sort_by(|a, b| a.identity.cmp(&b.identity));
        let edges = graph.edges();

        Self {
            classpath,
            state,
            scan,
            layout_ticks,
            node_count: nodes.len(),
            edge_count: edges.len(),
            duration_ms,
            nodes,
            edges,
        }
    }
}

pub fn render(report: &GraphReport, format: OutputFormat) -> Result<String> {
    Ok(match format {
        OutputFormat::Json => serde_json::to_string_pretty(report)?,
        OutputFormat::Text => {
            let mut out = String::new();
            out.push_str(&format!("state: {:?}\n", report.state));
            out.push_str(&format!("classes_parsed: {}\n", report.scan.classes_parsed));
            out.push_str(&format!("entries_failed: {}\n", report.scan.entries_failed));
            out.push_str(&format!("roots_failed: {}\n", report.scan.roots_failed));
            out.push_str(&format!("layout_ticks: {}\n", report.layout_ticks));
            out.push_str(&format!("nodes: {}\n", report.node_count));
            out.push_str(&format!("edges: {}\n", report.edge_count));
            out.push_str(&format!("duration_ms: {}\n", report.duration_ms));
            for n in &report.nodes {
                out.push_str(&format!(
                    "- {} [{:?}] at ({:.2}, {:.2}, {:.2})\n",
                    n.identity, n.origin, n.position[0], n.position[1], n.position[2]
                ));
            }
            for e in &report.edges {
                out.push_str(&format!("  {} -- {} ({})\n", e.a, e.b, e.weight));
            }
            out
        }
    })
}

pub fn write_output(content: &str, output: Option<&Path>) -> Result<()> {
    if let Some(path) = output {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
    } else {
        print!("{content}");
        if !content.ends_with('\n') {
            println!();
        }
    }

    Ok(())
}
