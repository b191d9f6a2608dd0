//! Display formatting for CLI output
//!
//! SBIO pattern: Pure functions that format data for display

use super::commands::{ContextInfo, ValidationResult};
use crate::cluster::{ClusterReport, ClusterSummary, UndeployReport};
use crate::installer::{InstallOutcome, InstallUndeployReport};

// ============================================================================
// Table formatting helpers
// ============================================================================

/// Format a table with headers and rows; cells containing newlines span
/// several lines
pub fn format_table(headers: &[&str], rows: Vec<Vec<String>>) -> String {
    if rows.is_empty() {
        return "No resources found.\n".to_string();
    }

    // Calculate column widths
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                let longest = cell.lines().map(str::len).max().unwrap_or(0);
                widths[i] = widths[i].max(longest);
            }
        }
    }

    let mut output = String::new();
    let header: Vec<String> = headers.iter().map(|h| h.to_uppercase()).collect();
    push_line(&mut output, &header.iter().map(String::as_str).collect::<Vec<_>>(), &widths);

    for row in rows {
        let cells: Vec<Vec<&str>> = row.iter().map(|cell| cell.lines().collect()).collect();
        let height = cells.iter().map(Vec::len).max().unwrap_or(0).max(1);
        for line in 0..height {
            let parts: Vec<&str> = cells
                .iter()
                .map(|lines| lines.get(line).copied().unwrap_or(""))
                .collect();
            push_line(&mut output, &parts, &widths);
        }
    }

    output
}

fn push_line(output: &mut String, cells: &[&str], widths: &[usize]) {
    let mut line = String::new();
    for (i, cell) in cells.iter().enumerate() {
        if i > 0 {
            line.push_str("   ");
        }
        match widths.get(i) {
            Some(width) => line.push_str(&format!("{:width$}", cell, width = width)),
            None => line.push_str(cell),
        }
    }
    output.push_str(line.trim_end());
    output.push('\n');
}

// ============================================================================
// Context display
// ============================================================================

/// Format context list for display
pub fn format_context_list(contexts: &[ContextInfo]) -> String {
    let headers = &["", "NAME", "BAREMETAL URL"];
    let rows: Vec<Vec<String>> = contexts
        .iter()
        .map(|ctx| {
            vec![
                if ctx.is_current { "*" } else { " " }.to_string(),
                ctx.name.clone(),
                ctx.url.clone(),
            ]
        })
        .collect();

    format_table(headers, rows)
}

/// Format current context for display
pub fn format_current_context(name: &str, url: &str) -> String {
    format!("Current context: {} ({})\n", name, url)
}

// ============================================================================
// Cluster display
// ============================================================================

/// Format the per-node orchestration report
pub fn format_cluster_report(report: &ClusterReport) -> String {
    let headers = &[
        "Node",
        "Port",
        "Network",
        "Fixed IP",
        "Floating Network",
        "Floating IP",
    ];
    let rows = report.rows.iter().map(|row| row.cells()).collect();

    let mut output = format_table(headers, rows);
    if !report.failures.is_empty() {
        output.push_str("\nFailed nodes:\n");
        for (node, error) in &report.failures {
            output.push_str(&format!("  ✗ {}: {}\n", node, error));
        }
    }
    output.push_str(&format!("\nCluster ID: {}\n", report.cluster_id));
    output
}

pub fn format_undeploy_report(report: &UndeployReport) -> String {
    if !report.found() {
        return format!("No cluster with id {} found\n", report.cluster_id);
    }
    let mut output = format!("Undeployed cluster {}:\n", report.cluster_id);
    for node in &report.nodes {
        output.push_str(&format!("  * {}\n", node));
    }
    output.push_str("Node cleaning continues in the background.\n");
    output
}

/// Format every cluster found in node metadata
pub fn format_cluster_list(clusters: &[ClusterSummary]) -> String {
    let headers = &["Cluster", "Node", "Associated"];
    let rows: Vec<Vec<String>> = clusters
        .iter()
        .map(|cluster| {
            let nodes: Vec<&str> = cluster.nodes.iter().map(|(name, _)| name.as_str()).collect();
            let associated: Vec<String> = cluster
                .nodes
                .iter()
                .map(|(_, keys)| {
                    keys.iter()
                        .map(|(k, v)| format!("{}={}", k, v))
                        .collect::<Vec<_>>()
                        .join(", ")
                })
                .collect();
            vec![
                cluster.cluster_id.clone(),
                nodes.join("\n"),
                associated.join("\n"),
            ]
        })
        .collect();

    format_table(headers, rows)
}

// ============================================================================
// Installer display
// ============================================================================

pub fn format_install_outcome(outcome: &InstallOutcome) -> String {
    let mut output = format_table(&["Endpoint", "IP"], outcome.rows());
    output.push_str(&format!(
        "\nCluster ID: {}\nInfra env ID: {}\n",
        outcome.cluster_id, outcome.infra_env_id
    ));
    output
}

pub fn format_install_undeploy(report: &InstallUndeployReport) -> String {
    let mut output = String::new();
    for ip in &report.released_ips {
        output.push_str(&format!("Released floating IP {}\n", ip));
    }
    for node in &report.nodes {
        output.push_str(&format!("Undeployed node {}\n", node));
    }
    output
}

// ============================================================================
// Validation display
// ============================================================================

/// Format validation result for display
pub fn format_validation_result(result: &ValidationResult, path: &str) -> String {
    let mut output = String::new();

    if result.valid {
        output.push_str(&format!("✓ {} is valid\n\n", path));
        output.push_str(&format!("  Entries: {}\n", result.entries));
        output.push_str(&format!("  Nodes:   {}\n", result.nodes));
    } else {
        output.push_str(&format!("✗ {} is invalid\n\n", path));
        if let Some(ref error) = result.error {
            output.push_str(&format!("  Error: {}\n", error));
        }
    }

    output
}
