#![allow(dead_code)]

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "vaultsync")]
#[command(about = "Synchronization engine between a local markdown vault and a remote document service")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write an initial configuration file for a vault
    Init {
        /// Path to the vault root
        #[arg(short, long)]
        path: PathBuf,

        /// Remote parent page/container id new notes are created under
        #[arg(long)]
        remote_parent_id: Option<String>,
    },

    /// Run one detect-and-apply pass
    Sync {
        /// Report detected changes without applying them
        #[arg(long)]
        dry_run: bool,

        /// Attempt fuzzy link repair for unresolved references before syncing
        #[arg(long)]
        fuzzy_repair: bool,
    },

    /// Show the current state store's per-note sync status
    Status,

    /// Report unresolved links, optionally rewriting them onto a fuzzy match
    RepairLinks {
        /// Apply suggested repairs instead of only reporting them
        #[arg(long)]
        apply: bool,
    },

    /// List notes that link to a given path
    Backlinks {
        /// Vault-relative path, e.g. `folder/Note.md`
        path: String,
    },

    /// Print aggregate link-resolution statistics
    Stats,
}
