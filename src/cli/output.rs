//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use serde::Serialize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::{ClusterConfig, ConfigHasher, ValidationResult, Value};
use crate::error::KestrelError;
use crate::orchestrator::{PipelineOutcome, ProvisionerPlan};
use crate::planner::{ChangeAction, ClusterPlan, SeverityClass};

use super::commands::OutputFormat;

/// Longest value shown in a plan table cell.
const MAX_VALUE_LEN: usize = 40;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan change row for table display.
#[derive(Tabled)]
struct ChangeRow {
    #[tabled(rename = "Section")]
    section: String,
    #[tabled(rename = "Path")]
    path: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Change")]
    change: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a cluster plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &ClusterPlan) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(plan).unwrap_or_default(),
            OutputFormat::Text => Self::format_plan_text(plan),
        }
    }

    /// Formats a plan as text.
    fn format_plan_text(plan: &ClusterPlan) -> String {
        if plan.is_empty() {
            return format!("{} No changes required - cluster is up to date.\n", "✓".green());
        }

        let mut output = String::new();

        let title = if plan.first_apply { "Cluster Plan (first apply)" } else { "Cluster Plan" };
        let _ = writeln!(output, "\n{title}");
        let _ = write!(
            output,
            "   Config hash: {}\n\n",
            ConfigHasher::short_hash(&plan.config_hash)
        );

        let rows: Vec<ChangeRow> = plan
            .events
            .iter()
            .flat_map(|event| {
                event.changes().iter().map(move |c| ChangeRow {
                    section: event.section().to_string(),
                    path: c.change.path.to_string(),
                    action: Self::format_action(c.change.action),
                    severity: Self::format_severity(c.severity),
                    change: Self::format_values(c.change.old_value.as_ref(), c.change.new_value.as_ref()),
                })
            })
            .collect();

        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        let _ = write!(
            output,
            "\nPlan: {} change(s) in {} section(s), severity {}, action {}\n",
            plan.change_count(),
            plan.events.len(),
            Self::format_severity(plan.severity()),
            plan.required_action()
        );

        let recreate = plan.recreate_paths();
        if !recreate.is_empty() {
            let _ = write!(output, "\n{} Changes requiring cluster recreation:\n", "⚠".yellow());
            for path in recreate {
                let _ = writeln!(output, "   - {path}");
            }
        }

        output
    }

    /// Formats a validation result.
    #[must_use]
    pub fn format_validation(&self, config: &ClusterConfig, result: &ValidationResult, warnings: bool) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({
                    "cluster": config.name(),
                    "valid": result.is_valid(),
                    "errors": result.errors.iter().map(|e| {
                        serde_json::json!({ "field": e.field, "message": e.message })
                    }).collect::<Vec<_>>(),
                    "warnings": result.warnings,
                });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => {
                let mut output = String::new();
                if result.is_valid() {
                    let _ = writeln!(
                        output,
                        "{} Configuration is valid! ({} warning(s))",
                        "✓".green(),
                        result.warning_count()
                    );
                } else {
                    let _ = writeln!(output, "{} Configuration is invalid:", "✗".red());
                    for error in &result.errors {
                        let _ = writeln!(output, "   - {}: {}", error.field, error.message);
                    }
                }

                if warnings && !result.warnings.is_empty() {
                    let _ = write!(output, "\n{} Warnings:\n", "⚠".yellow());
                    for warning in &result.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                }

                let lb_count = config.load_balancer.as_ref().map_or(0, |lb| lb.instances.len());
                output.push_str("\nConfiguration summary:\n");
                let _ = writeln!(output, "   Cluster: {}", config.name());
                let _ = writeln!(output, "   Hosts: {}", config.hosts.len());
                let _ = writeln!(output, "   Masters: {}", config.nodes.master.len());
                let _ = writeln!(output, "   Workers: {}", config.nodes.worker.len());
                let _ = writeln!(output, "   Load balancers: {lb_count}");
                let _ = writeln!(output, "   Kubernetes: {}", config.kubernetes.version);
                output
            }
        }
    }

    /// Formats the plans reported by the provisioners.
    #[must_use]
    pub fn format_provisioner_plans(&self, plans: &[ProvisionerPlan]) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(plans).unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = String::from("\nProvisioners:\n");
                for plan in plans {
                    let status = if plan.changes {
                        "changes pending".yellow().to_string()
                    } else {
                        "up to date".green().to_string()
                    };
                    let _ = writeln!(output, "   {}: {status}", plan.name);
                }
                output
            }
        }
    }

    /// Formats a pipeline outcome.
    #[must_use]
    pub fn format_outcome(&self, outcome: &PipelineOutcome) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(outcome).unwrap_or_default(),
            OutputFormat::Text => {
                let symbol = match outcome {
                    PipelineOutcome::Cancelled => "⚠".yellow(),
                    _ => "✓".green(),
                };
                format!("{symbol} {outcome}\n")
            }
        }
    }

    /// Formats a pipeline error.
    #[must_use]
    pub fn format_error(&self, error: &KestrelError) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = ErrorJson {
                    status: "error",
                    message: error.to_string(),
                    exit_code: error.exit_code(),
                    before_provisioning: error.is_pre_provisioning(),
                };
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => format!("{} {error}", "✗".red()),
        }
    }

    /// Formats an action with color.
    fn format_action(action: ChangeAction) -> String {
        match action {
            ChangeAction::Add => "+add".green().to_string(),
            ChangeAction::Modify => "~modify".yellow().to_string(),
            ChangeAction::Remove => "-remove".red().to_string(),
        }
    }

    /// Formats a severity with color.
    fn format_severity(severity: SeverityClass) -> String {
        let name = severity.to_string();
        match severity {
            SeverityClass::None | SeverityClass::Info => name.dimmed().to_string(),
            SeverityClass::Scale => name.green().to_string(),
            SeverityClass::Reconfigure => name.yellow().to_string(),
            SeverityClass::Recreate | SeverityClass::Forbidden => name.red().to_string(),
        }
    }

    /// Formats the old and new values of a change.
    fn format_values(old: Option<&Value>, new: Option<&Value>) -> String {
        let show = |v: &Value| {
            if v.is_scalar() {
                Self::truncate(&v.to_string(), MAX_VALUE_LEN)
            } else {
                String::from("{...}")
            }
        };
        match (old, new) {
            (Some(old), Some(new)) => format!("{} -> {}", show(old), show(new)),
            (None, Some(new)) => show(new),
            (Some(old), None) => show(old),
            (None, None) => String::new(),
        }
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{kept}...")
        }
    }
}

#[derive(Serialize)]
struct ErrorJson {
    status: &'static str,
    message: String,
    exit_code: Option<i32>,
    before_provisioning: bool,
}
