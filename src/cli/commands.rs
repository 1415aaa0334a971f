//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Kestrel - Cluster lifecycle engine for virtual-machine Kubernetes clusters.
#[derive(Parser, Debug)]
#[command(name = "kestrel")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the cluster configuration file.
    #[arg(short, long, global = true, env = "KESTREL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Cluster working directory (defaults to `<home>/clusters/<name>`).
    #[arg(long, global = true)]
    pub cluster_dir: Option<PathBuf>,

    /// Kestrel home directory (defaults to `~/.kestrel`).
    #[arg(long, global = true, env = "KESTREL_HOME")]
    pub home: Option<PathBuf>,

    /// Severity policy file replacing the built-in policy.
    #[arg(long, global = true)]
    pub policy: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate the cluster configuration.
    Validate {
        /// Show all warnings, not just errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Classify changes against the applied configuration.
    Diff,

    /// Classify changes, then ask every provisioner for its plan.
    Plan {
        /// Configuration playbook; enables the configuration provisioner.
        #[arg(long)]
        playbook: Option<PathBuf>,
    },

    /// Apply the cluster configuration.
    Apply {
        /// Answer yes to every confirmation prompt.
        #[arg(short, long)]
        yes: bool,

        /// Acknowledge changes that require recreating the cluster.
        #[arg(long)]
        allow_recreate: bool,

        /// Skip the engine plan shown before applying.
        #[arg(long)]
        no_show_plan: bool,

        /// Configuration playbook; enables the configuration provisioner.
        #[arg(long)]
        playbook: Option<PathBuf>,
    },

    /// Destroy the cluster.
    Destroy {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,

        /// Configuration playbook; enables the configuration provisioner.
        #[arg(long)]
        playbook: Option<PathBuf>,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

impl Commands {
    /// Returns the preset confirmation answer, if any.
    #[must_use]
    pub const fn preset_answer(&self) -> Option<bool> {
        match self {
            Self::Apply { yes: true, .. } | Self::Destroy { yes: true, .. } => Some(true),
            _ => None,
        }
    }

    /// Returns the configuration playbook, if any.
    #[must_use]
    pub const fn playbook(&self) -> Option<&PathBuf> {
        match self {
            Self::Plan { playbook } | Self::Apply { playbook, .. } | Self::Destroy { playbook, .. } => {
                playbook.as_ref()
            }
            Self::Validate { .. } | Self::Diff => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_apply_flags() {
        let cli = Cli::try_parse_from([
            "kestrel",
            "--config",
            "cluster.yaml",
            "apply",
            "--yes",
            "--allow-recreate",
            "--playbook",
            "site.yaml",
        ])
        .expect("parse");

        assert_eq!(cli.config, Some(PathBuf::from("cluster.yaml")));
        assert_eq!(cli.command.preset_answer(), Some(true));
        assert_eq!(cli.command.playbook(), Some(&PathBuf::from("site.yaml")));
        match cli.command {
            Commands::Apply {
                allow_recreate,
                no_show_plan,
                ..
            } => {
                assert!(allow_recreate);
                assert!(!no_show_plan);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_global_options_after_subcommand() {
        let cli = Cli::try_parse_from(["kestrel", "diff", "--output", "json", "--verbose"])
            .expect("parse");

        assert_eq!(cli.output, OutputFormat::Json);
        assert!(cli.verbose);
        assert_eq!(cli.command.preset_answer(), None);
        assert_eq!(cli.command.playbook(), None);
    }

    #[test]
    fn test_unknown_subcommand_fails() {
        assert!(Cli::try_parse_from(["kestrel", "status"]).is_err());
    }
}
