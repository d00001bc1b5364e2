use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "credscan",
    version = "0.1.0",
    about = "Multi-protocol network authentication scanner"
)]
pub struct Args {
    /// Target file: one host or host:port per line, CIDR lines are expanded
    #[clap(short = 't', long)]
    pub targets: Option<PathBuf>,

    /// Report output file
    #[clap(short, long)]
    pub output: Option<PathBuf>,

    /// Protocol to scan with (see --list-protocols)
    #[clap(short = 'P', long)]
    pub protocol: Option<String>,

    /// Authentication type the credential file uses
    #[clap(long, default_value = "basic")]
    pub auth_type: String,

    /// Credential file: one account,auth-data per line
    #[clap(short = 'a', long)]
    pub auth_file: Option<PathBuf>,

    /// Enumeration strategy: wide, deep or random
    #[clap(short, long, default_value = "wide")]
    pub strategy: String,

    /// Command to run on targets that authenticate
    #[clap(short, long, default_value = "")]
    pub cmd: String,

    /// Number of scan workers
    #[clap(short = 'T', long, default_value = "10")]
    pub threads: usize,

    /// Per-job scan timeout in seconds
    #[clap(long, default_value = "5")]
    pub timeout: u64,

    /// Report format (csv, json)
    #[clap(long, default_value = "csv")]
    pub format: String,

    /// List supported protocols with their credential line formats
    #[clap(long)]
    pub list_protocols: bool,

    /// Log file
    #[clap(long)]
    pub log_file: Option<PathBuf>,

    /// Verbose output
    #[clap(short, long)]
    pub verbose: bool,

    /// Silent mode (no banner)
    #[clap(short = 'q', long)]
    pub silent: bool,
}
