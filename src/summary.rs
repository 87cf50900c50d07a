//! End-of-run summaries printed to stdout.
//!
//! Every method prints one report and returns whether the run counts as a
//! success for the exit code.

use anyhow::Result;
use colored::Colorize;
use rcctl::add_node::AddNodeReport;
use rcctl::check::CheckReport;
use rcctl::create::BootstrapReport;
use rcctl::del_node::RemovalReport;
use rcctl::outcome::{FanOutReport, Outcome};
use rcctl::populate::PopulateReport;
use rcctl::reshard::ReshardReport;
use rcctl::slots::collapse;
use serde::Serialize;

use crate::cli::OutputFormat;

pub struct Summary {
    format: OutputFormat,
}

fn mark(ok: bool) -> colored::ColoredString {
    if ok {
        "OK".green().bold()
    } else {
        "FAIL".red().bold()
    }
}

fn ranges(slots: &[u16]) -> String {
    collapse(slots)
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn print_fan_out(title: &str, report: &FanOutReport) {
    println!("{} ({}/{} succeeded)", title.bold(), report.succeeded().len(), report.len());
    for entry in report.outcomes() {
        match &entry.outcome {
            Outcome::Succeeded => println!("  {} {}", mark(true), entry.target),
            Outcome::Failed(reason) => println!("  {} {}: {}", mark(false), entry.target, reason),
        }
    }
}

impl Summary {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Print as JSON when requested. Returns true when handled.
    fn json<T: Serialize>(&self, report: &T) -> Result<bool> {
        if self.format == OutputFormat::Json {
            println!("{}", serde_json::to_string_pretty(report)?);
            return Ok(true);
        }
        Ok(false)
    }

    pub fn bootstrap(&self, report: &BootstrapReport) -> Result<bool> {
        let ok = report.is_complete_success();
        if self.json(report)? {
            return Ok(ok);
        }
        println!("{}", "Masters".bold());
        for master in &report.masters {
            let note = if master.already_assigned {
                " (already assigned)".dimmed().to_string()
            } else {
                String::new()
            };
            println!(
                "  {} {} slots {} ({}){}",
                master.address,
                master.node_id.cyan(),
                master.slots,
                master.slots.count(),
                note
            );
        }
        if !report.replicas.is_empty() {
            print_fan_out("Replicas", &report.replicas);
        }
        println!("{} cluster created", mark(ok));
        Ok(ok)
    }

    pub fn add_node(&self, report: &AddNodeReport) -> Result<bool> {
        if self.json(report)? {
            return Ok(true);
        }
        match &report.master_id {
            Some(master) => println!(
                "{} {} ({}) added as replica of {}",
                mark(true),
                report.address,
                report.node_id.cyan(),
                master.cyan()
            ),
            None => println!(
                "{} {} ({}) added as master",
                mark(true),
                report.address,
                report.node_id.cyan()
            ),
        }
        Ok(true)
    }

    pub fn reshard(&self, report: &ReshardReport) -> Result<bool> {
        let ok = report.is_complete_success();
        if self.json(report)? {
            return Ok(ok);
        }
        println!(
            "{} -> {}",
            report.source_id.cyan(),
            report.destination_id.cyan()
        );
        let moved = report.moved_slots();
        println!(
            "  moved {} slots [{}], {} keys",
            moved.len(),
            ranges(&moved),
            report.keys_moved()
        );
        for migration in report.migrations.iter().filter(|m| m.state.is_stalled()) {
            println!(
                "  {} slot {} {} (left transitional; finish it manually)",
                mark(false),
                migration.slot,
                migration.state
            );
        }
        let pending = report.pending_slots();
        if !pending.is_empty() {
            println!("  not attempted: {} slots [{}]", pending.len(), ranges(&pending));
        }
        for failure in &report.key_failures {
            println!(
                "  {} key {:?} in slot {}: {}",
                "!".yellow(),
                failure.key,
                failure.slot,
                failure.reason
            );
        }
        println!("{} reshard", mark(ok));
        Ok(ok)
    }

    pub fn removal(&self, report: &RemovalReport) -> Result<bool> {
        let ok = report.is_complete_success();
        if self.json(report)? {
            return Ok(ok);
        }
        print_fan_out("Forget", &report.forgets);
        match &report.reset {
            Outcome::Succeeded => println!("{} reset {}", mark(true), report.target),
            Outcome::Failed(reason) => {
                println!("{} reset {}: {}", mark(false), report.target, reason)
            }
        }
        println!("{} node {} removed", mark(ok), report.target_id);
        Ok(ok)
    }

    pub fn check(&self, report: &CheckReport) -> Result<bool> {
        let ok = report.is_healthy();
        if self.json(report)? {
            return Ok(ok);
        }
        println!(
            "Checked {} nodes through {}",
            report.node_count,
            report.reference.bold()
        );
        println!(
            "  {} slot coverage ({} of {} missing)",
            mark(report.coverage.passed()),
            report.coverage.missing,
            report.coverage.total_slots
        );
        println!("  {} link health", mark(report.links.passed()));
        for addr in &report.links.disconnected {
            println!("      disconnected: {}", addr);
        }
        println!("  {} agreement", mark(report.agreement.passed()));
        for entry in report.agreement.probes.outcomes() {
            if let Outcome::Failed(reason) = &entry.outcome {
                println!("      {}: {}", entry.target, reason);
            }
        }
        println!("  {} open slots", mark(report.open_slots.is_empty()));
        for open in &report.open_slots {
            println!(
                "      slot {} {:?} on {} (peer {})",
                open.slot.slot, open.slot.state, open.reporter, open.slot.peer_id
            );
        }
        println!("  {} replica masters", mark(report.orphaned_replicas.is_empty()));
        for addr in &report.orphaned_replicas {
            println!("      orphaned: {}", addr);
        }
        let verdict = if ok {
            "cluster is healthy".green()
        } else {
            "cluster is NOT healthy".red()
        };
        println!("{}", verdict.bold());
        Ok(ok)
    }

    pub fn populate(&self, report: &PopulateReport) -> Result<bool> {
        let ok = report.is_complete_success();
        if self.json(report)? {
            return Ok(ok);
        }
        for failure in &report.failures {
            println!("  {} {}: {}", "!".yellow(), failure.key, failure.reason);
        }
        println!(
            "{} wrote {} of {} keys ({} failed)",
            mark(ok),
            report.written,
            report.requested,
            report.failed
        );
        Ok(ok)
    }
}
