//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::planner::{ActionType, DiffResult, SyncPlan};
use crate::reconciler::{DestroyResult, DriftReport, ReconciliationResult};
use crate::state::{LockInfo, SyncState};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Recorded resource row for table display.
#[derive(Tabled)]
struct ResourceRow {
    #[tabled(rename = "Upstream")]
    upstream: String,
    #[tabled(rename = "Target")]
    target: String,
    #[tabled(rename = "Slots/Weight")]
    size: u32,
    #[tabled(rename = "ID")]
    id: String,
}

/// Plan action row for table display.
#[derive(Tabled)]
struct PlanActionRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Returns the configured format.
    #[must_use]
    pub const fn format(&self) -> OutputFormat {
        self.format
    }

    /// Formats a sync plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &SyncPlan) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(plan).unwrap_or_default(),
            OutputFormat::Text => Self::format_plan_text(plan),
        }
    }

    /// Formats a plan as text.
    fn format_plan_text(plan: &SyncPlan) -> String {
        if plan.is_empty() {
            return format!("{} No changes required - Kong matches the declaration.\n", "✓".green());
        }

        let mut output = String::new();
        let _ = writeln!(output, "\nSync Plan ({} actions)", plan.action_count());
        let _ = write!(output, "   Config hash: {}\n\n", short(&plan.config_hash));

        let rows: Vec<PlanActionRow> = plan
            .actions
            .iter()
            .enumerate()
            .map(|(i, a)| PlanActionRow {
                index: i + 1,
                action: Self::format_action_type(a.action_type),
                resource: a.address(),
                reason: Self::truncate(&a.reason, 40),
            })
            .collect();

        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        let creates = plan.count(ActionType::CreateUpstream) + plan.count(ActionType::CreateTarget);
        let updates = plan.count(ActionType::UpdateUpstream) + plan.count(ActionType::UpdateTarget);
        let replaces = plan.count(ActionType::ReplaceUpstream);
        let deletes = plan.count(ActionType::DeleteUpstream) + plan.count(ActionType::DeleteTarget);

        let _ = write!(
            output,
            "\nPlan: {} to create, {} to update, {} to replace, {} to destroy\n",
            creates.to_string().green(),
            updates.to_string().yellow(),
            replaces.to_string().yellow(),
            deletes.to_string().red()
        );

        if plan.has_destructive_actions() {
            let _ = writeln!(
                output,
                "\n{} This plan deletes objects; target ids change on every update.",
                "⚠".yellow()
            );
        }

        output
    }

    /// Formats the field-level changes behind a plan.
    #[must_use]
    pub fn format_diff(&self, diff: &DiffResult) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(diff).unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = String::new();
                for change in diff.actionable_diffs() {
                    let _ = writeln!(output, "   {change}");
                    for detail in &change.details {
                        let _ = writeln!(output, "       {detail}");
                    }
                }
                output
            }
        }
    }

    /// Formats recorded upstreams and targets.
    #[must_use]
    pub fn format_status(&self, state: &SyncState) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&state.upstreams).unwrap_or_default(),
            OutputFormat::Text => Self::format_status_text(state),
        }
    }

    /// Formats status as text.
    fn format_status_text(state: &SyncState) -> String {
        let mut output = String::new();
        let _ = write!(output, "\nKong: {}\n\n", state.admin_url);

        if state.is_empty() {
            output.push_str("   No upstreams recorded.\n");
            return output;
        }

        let mut rows = Vec::new();
        for (name, upstream) in &state.upstreams {
            rows.push(ResourceRow {
                upstream: name.clone(),
                target: String::from("-"),
                size: upstream.slots,
                id: upstream.id.clone(),
            });
            for (address, target) in &upstream.targets {
                rows.push(ResourceRow {
                    upstream: String::new(),
                    target: address.clone(),
                    size: target.weight,
                    id: target.id.clone(),
                });
            }
        }

        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        let _ = write!(
            output,
            "\n{} upstreams, {} targets recorded\n",
            state.upstreams.len(),
            state.target_count()
        );

        output
    }

    /// Formats a drift report.
    #[must_use]
    pub fn format_drift(&self, report: &DriftReport) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = if report.is_converged() {
                    format!("{} No drift detected - state is converged.\n", "✓".green())
                } else {
                    let mut output = format!("{} Drift detected:\n\n", "⚠".yellow());
                    for resource in &report.drifted_resources {
                        let _ = writeln!(output, "   - {resource}");
                    }
                    let _ = write!(
                        output,
                        "\n{} changes needed across {} declared resources.\n",
                        report.drifted_resources.len(),
                        report.total_resources
                    );
                    output
                };

                if !report.forgotten.is_empty() {
                    let _ = write!(output, "\nGone remotely:\n");
                    for address in &report.forgotten {
                        let _ = writeln!(output, "   - {address}");
                    }
                }
                output
            }
        }
    }

    /// Formats a reconciliation result.
    #[must_use]
    pub fn format_reconciliation(&self, result: &ReconciliationResult) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(result).unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = format!("{} Apply complete\n\n", "✓".green());
                let _ = writeln!(output, "   Created: {}", result.created);
                let _ = writeln!(output, "   Updated: {}", result.updated);
                let _ = writeln!(output, "   Replaced: {}", result.replaced);
                let _ = writeln!(output, "   Deleted: {}", result.deleted);
                let _ = writeln!(output, "   Unchanged: {}", result.unchanged);

                let absent: Vec<&str> = result
                    .actions
                    .iter()
                    .filter(|a| a.already_absent)
                    .map(|a| a.action.upstream.as_str())
                    .collect();
                if !absent.is_empty() {
                    let _ = write!(output, "\n{} Already deleted: {}\n", "⚠".yellow(), absent.join(", "));
                }

                output
            }
        }
    }

    /// Formats a destroy result.
    #[must_use]
    pub fn format_destroy(&self, result: &DestroyResult) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(result).unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = format!(
                    "{} Destroyed {} upstreams\n",
                    "✓".green(),
                    result.deleted.len()
                );
                for name in &result.deleted {
                    let _ = writeln!(output, "   - {name}");
                }
                if !result.already_absent.is_empty() {
                    let _ = writeln!(
                        output,
                        "   Already gone: {}",
                        result.already_absent.join(", ")
                    );
                }
                output
            }
        }
    }

    /// Formats recorded state.
    #[must_use]
    pub fn format_state(&self, state: &SyncState, lock: Option<&LockInfo>) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(state).unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = String::new();

                let _ = write!(output, "\nState: {}\n\n", state.admin_url);
                let _ = writeln!(output, "   Version: {}", state.version);
                let _ = writeln!(output, "   Config hash: {}", short(&state.config_hash));
                let _ = writeln!(output, "   Last updated: {}", state.last_updated);
                let _ = writeln!(output, "   Upstreams: {}", state.upstreams.len());
                let _ = writeln!(output, "   Targets: {}", state.target_count());

                if let Some(lock) = lock {
                    let _ = writeln!(output, "   Locked by {lock}");
                }

                if !state.history.is_empty() {
                    let _ = writeln!(output, "\n   Recent history ({}):", state.history.len());
                    for entry in state.history.iter().rev().take(5) {
                        let status = if entry.success { "✓" } else { "✗" };
                        let _ = writeln!(
                            output,
                            "     {status} {} - {} ({})",
                            entry.timestamp.format("%Y-%m-%d %H:%M"),
                            entry.operation,
                            entry.resources.join(", ")
                        );
                        if let Some(error) = &entry.error {
                            let _ = writeln!(output, "         {error}");
                        }
                    }
                }

                output
            }
        }
    }

    /// Formats a success message.
    #[must_use]
    pub fn success(&self, message: &str) -> String {
        self.message("success", &"✓".green(), message)
    }

    /// Formats an error message.
    #[must_use]
    pub fn error(&self, message: &str) -> String {
        self.message("error", &"✗".red(), message)
    }

    /// Formats a warning message.
    #[must_use]
    pub fn warning(&self, message: &str) -> String {
        self.message("warning", &"⚠".yellow(), message)
    }

    fn message(&self, status: &str, symbol: &colored::ColoredString, message: &str) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({ "status": status, "message": message });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => format!("{symbol} {message}"),
        }
    }

    /// Formats an action type with color.
    fn format_action_type(action_type: ActionType) -> String {
        let label = match action_type {
            ActionType::CreateUpstream | ActionType::CreateTarget => "+create".green(),
            ActionType::UpdateUpstream | ActionType::UpdateTarget => "~update".yellow(),
            ActionType::ReplaceUpstream => "-/+replace".yellow(),
            ActionType::DeleteUpstream | ActionType::DeleteTarget => "-delete".red(),
        };
        label.to_string()
    }

    /// Truncates a string to a maximum length.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{kept}...")
        }
    }
}

fn short(hash: &str) -> &str {
    hash.get(..8).unwrap_or(hash)
}
