//! CLI argument definitions using clap derive macros.

use clap::{Args, Parser, Subcommand};

/// Personal knowledge memory
///
/// Capture memory records and compact them into decision records.
#[derive(Parser, Debug)]
#[command(name = "kmem")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Workspace to operate on (overrides config and KMEM_WORKSPACE)
    #[arg(short, long, global = true)]
    pub workspace: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compact eligible clusters into decision records
    Compact(CompactArgs),

    /// Run automatic compaction on the configured interval until Ctrl-C
    Daemon,

    /// Review and resolve detected conflicts
    Conflicts(ConflictsCommand),

    /// Add and inspect memory records
    Record(RecordCommand),

    /// Show record counts and unresolved conflicts
    Status {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show version
    Version,
}

// ─────────────────────────────────────────────────────────────────────────────
// Compaction
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Args, Debug)]
pub struct CompactArgs {
    /// Preview decision records without writing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Minimum Active records sharing a topic (default from config)
    #[arg(long, allow_negative_numbers = true)]
    pub min_cluster_size: Option<i64>,

    /// Minimum age in days of every cluster member (default from config)
    #[arg(long, allow_negative_numbers = true)]
    pub min_age_days: Option<i64>,

    /// Wait up to this many milliseconds for the maintenance lock
    #[arg(long)]
    pub wait_ms: Option<u64>,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Conflicts
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Args, Debug)]
pub struct ConflictsCommand {
    #[command(subcommand)]
    pub action: ConflictsAction,
}

#[derive(Subcommand, Debug)]
pub enum ConflictsAction {
    /// List conflicts (unresolved by default)
    List {
        /// Include resolved conflicts
        #[arg(short, long)]
        all: bool,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Record which statement of a conflict wins
    Resolve {
        /// Conflict ID
        id: String,

        /// Statement to keep
        #[arg(long)]
        chosen: String,

        /// Statement to reject
        #[arg(long)]
        rejected: String,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Args, Debug)]
pub struct RecordCommand {
    #[command(subcommand)]
    pub action: RecordAction,
}

#[derive(Subcommand, Debug)]
pub enum RecordAction {
    /// Capture a new Active record
    Add {
        /// Topic the record belongs to
        #[arg(short, long)]
        topic: String,

        /// Decision statement (repeatable)
        #[arg(short, long = "decision", action = clap::ArgAction::Append)]
        decisions: Vec<String>,

        /// Rationale line (repeatable)
        #[arg(short, long = "rationale", action = clap::ArgAction::Append)]
        rationale: Vec<String>,

        /// Reference URL, path or ticket (repeatable)
        #[arg(long = "reference", action = clap::ArgAction::Append)]
        references: Vec<String>,

        /// Open question (repeatable)
        #[arg(short, long = "question", action = clap::ArgAction::Append)]
        questions: Vec<String>,

        /// Next step (repeatable)
        #[arg(short, long = "next-step", action = clap::ArgAction::Append)]
        next_steps: Vec<String>,

        /// Backdate the record by this many days
        #[arg(long)]
        age_days: Option<u32>,
    },

    /// List records in the workspace
    List {
        /// Filter by status: active, superseded, decision_record
        #[arg(short, long)]
        status: Option<String>,

        /// Filter by topic
        #[arg(short, long)]
        topic: Option<String>,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show one record
    Show {
        /// Record ID
        id: String,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },
}
