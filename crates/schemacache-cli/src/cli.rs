use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use schemacache::{SchemaRole, SubjectNameStrategyKind};

#[derive(Parser)]
#[command(name = "schemacache")]
#[command(about = "Schema registry cache layer: subject naming, wire decoding and a live demo")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Client configuration file (TOML)
    #[arg(short, long, global = true, env = "SCHEMACACHE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, env = "SCHEMACACHE_LOG_LEVEL", default_value = "warn")]
    pub log_level: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the subject name for a topic
    Subject(SubjectArgs),
    /// Decode the schema id from a hex-encoded wire message
    Decode(DecodeArgs),
    /// Run a heartbeat loop against an in-memory registry
    Demo(DemoArgs),
}

#[derive(Clone, Copy, ValueEnum)]
pub enum RoleArg {
    Key,
    Value,
}

impl From<RoleArg> for SchemaRole {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Key => SchemaRole::Key,
            RoleArg::Value => SchemaRole::Value,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum StrategyArg {
    TopicName,
    TopicRecordName,
    RecordName,
}

impl From<StrategyArg> for SubjectNameStrategyKind {
    fn from(strategy: StrategyArg) -> Self {
        match strategy {
            StrategyArg::TopicName => SubjectNameStrategyKind::TopicName,
            StrategyArg::TopicRecordName => SubjectNameStrategyKind::TopicRecordName,
            StrategyArg::RecordName => SubjectNameStrategyKind::RecordName,
        }
    }
}

#[derive(clap::Args)]
pub struct SubjectArgs {
    /// Topic name
    pub topic: String,
    /// Whether the schema describes the record key or value
    #[arg(short, long)]
    pub role: Option<RoleArg>,
    /// Fully qualified record type (e.g. com.acme.Order)
    #[arg(long)]
    pub record_type: Option<String>,
    /// Naming strategy (overrides the config file)
    #[arg(short, long)]
    pub strategy: Option<StrategyArg>,
}

#[derive(clap::Args)]
pub struct DecodeArgs {
    /// Message bytes as hex, whitespace allowed (e.g. "00 00 00 00 2a ...")
    pub hex: String,
}

#[derive(clap::Args)]
pub struct DemoArgs {
    /// Number of heartbeat rounds
    #[arg(short, long, default_value_t = 8)]
    pub rounds: u32,
    /// Lifetime of each issued bearer token, in seconds
    #[arg(long, default_value_t = 2)]
    pub token_lifetime_secs: u64,
    /// Pause between rounds, in milliseconds
    #[arg(long, default_value_t = 500)]
    pub interval_ms: u64,
    /// Topic used for the demo schema
    #[arg(long, default_value = "orders")]
    pub topic: String,
}
