//! CLI type definitions
//!
//! This module contains clap command structures that define the CLI interface.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::infrastructure::config::DEFAULT_CONFIG_FILE;
use crate::infrastructure::hosts::HOSTS_FILE;

#[derive(Parser, Debug)]
#[command(name = "lokl")]
#[command(about = "lokl - local development orchestrator with HTTPS reverse proxy", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Project config file
    #[arg(short, long, global = true, env = "LOKL_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Installation directory holding the local CA
    #[arg(long, global = true, env = "LOKL_HOME")]
    pub home: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load the config and run all services in the foreground, or start one
    /// service of a running project
    Start {
        /// Service to start in the running orchestrator
        service: Option<String>,
    },

    /// Stop one service, or shut lokl down when no service is given
    Stop {
        /// Service to stop
        service: Option<String>,
    },

    /// Restart one service
    Restart {
        /// Service to restart
        service: String,
    },

    /// Show services and routes
    Status,

    /// Print captured service output
    Logs {
        /// Service whose output to show
        service: String,

        /// Keep streaming new lines
        #[arg(short, long)]
        follow: bool,

        /// Number of lines from the end
        #[arg(short = 'n', long)]
        lines: Option<usize>,
    },

    /// Re-read the config file and apply changes
    Reload,

    /// Manage hosts file entries for project hostnames
    #[command(subcommand)]
    Dns(DnsCommands),

    /// Local certificate authority
    #[command(subcommand)]
    Ca(CaCommands),
}

#[derive(Subcommand, Debug)]
pub enum DnsCommands {
    /// Map every project hostname to 127.0.0.1
    Setup {
        #[arg(long, default_value = HOSTS_FILE, hide = true)]
        hosts_file: PathBuf,
    },
    /// Remove the project's hosts file entries
    Remove {
        #[arg(long, default_value = HOSTS_FILE, hide = true)]
        hosts_file: PathBuf,
    },
    /// Report which hostnames resolve to loopback
    Check {
        #[arg(long, default_value = HOSTS_FILE, hide = true)]
        hosts_file: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
pub enum CaCommands {
    /// Print the CA certificate path, creating the CA if needed
    Path,
    /// Trust the CA in the operating system store
    Install,
}
