/// Output formatting: terminal tables and JSON.
use serde::Serialize;
use tribunal_core::audit::CrossCheck;
use tribunal_core::simulation::TrajectoryPoint;
use tribunal_core::{ConvergencePoint, EngineStatus, Pair, RankingReport};

use crate::bail;

/// Print the ranking as a formatted terminal table.
pub fn print_ranking_table(report: &RankingReport) {
    let items = &report.ranking.items;
    let name_width = items.iter().map(|r| r.item.as_str().len()).max().unwrap_or(4).max(4);

    println!(" # | {:<name_width$} |    Mean | Std Dev | 95% CI Low | 95% CI High | Comparisons", "Item");
    println!("---|-{}-|---------|---------|------------|-------------|------------", "-".repeat(name_width));

    for (i, r) in items.iter().enumerate() {
        println!(
            "{:>2} | {:<name_width$} | {:>7.3} | {:>7.3} | {:>10.3} | {:>11.3} | {:>11}",
            i + 1,
            r.item.as_str(),
            r.mean,
            r.std_dev,
            r.lower_bound,
            r.upper_bound,
            r.comparisons,
        );
    }

    println!(
        "\n{} items, {} comparisons, through event {}",
        items.len(),
        report.comparisons,
        report.ranking.sequence,
    );
    println!(
        "Confidence {:.3} (weakest adjacent pair {:.3}){}",
        report.ranking.confidence,
        report.ranking.min_separation,
        if report.confident { ", ranking settled" } else { "" },
    );
}

pub fn print_pair(pair: Option<&Pair>) {
    match pair {
        Some((left, right)) => println!("{left} {right}"),
        None => println!("Ranking is settled; no comparison recommended."),
    }
}

pub fn print_status(status: &EngineStatus) {
    println!("Phase:           {:?}", status.phase);
    println!("Applied through: {}", status.applied_sequence);
    println!("Items:           {} ({} active)", status.items, status.active_items);
    println!("Comparisons:     {}", status.comparisons);
    match status.last_checkpoint {
        Some(seq) => println!("Last checkpoint: {seq}"),
        None => println!("Last checkpoint: none"),
    }
    if let Some(reason) = &status.halted_reason {
        println!("Halted:          {reason}");
    }
}

pub fn print_audit_table(check: &CrossCheck) {
    let name_width = check.entries.iter().map(|e| e.item.as_str().len()).max().unwrap_or(4).max(4);
    println!(" # | {:<name_width$} | Batch # |    Mean | BT log-strength", "Item");
    println!("---|-{}-|---------|---------|----------------", "-".repeat(name_width));
    for e in &check.entries {
        println!(
            "{:>2} | {:<name_width$} | {:>7} | {:>7.3} | {:>15.3}",
            e.posterior_rank,
            e.item.as_str(),
            e.batch_rank,
            e.posterior_mean,
            e.batch_log_strength,
        );
    }
    println!(
        "\nKendall tau {:.3} over {} comparisons (batch fit converged in {} iterations)",
        check.kendall_tau, check.comparisons, check.iterations,
    );
}

pub fn print_trajectory(points: &[TrajectoryPoint]) {
    println!(" Comparisons | Confidence | Kendall tau");
    println!("-------------|------------|------------");
    for p in points {
        println!("{:>12} | {:>10.3} | {:>11.3}", p.comparisons, p.confidence, p.kendall_tau);
    }
}

pub fn print_history(points: &[ConvergencePoint]) {
    println!("    Event | Comparisons | Confidence | Weakest pair");
    println!("----------|-------------|------------|-------------");
    for p in points {
        println!("{:>9} | {:>11} | {:>10.3} | {:>12.3}", p.sequence, p.comparisons, p.confidence, p.min_separation);
    }
}

/// Print any serializable value as pretty JSON.
pub fn print_json<T: Serialize>(value: &T) {
    let json = serde_json::to_string_pretty(value)
        .unwrap_or_else(|e| bail(format!("Failed to encode output: {e}")));
    println!("{json}");
}
