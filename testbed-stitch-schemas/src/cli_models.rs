use clap::Parser;
use crate::DEFAULT_CONFIG_FILE;

/// Every option has a default so the tool can run with no arguments at all.
#[derive(Parser, Debug)]
#[command(version = "0.1", author = "Bristol Cyber Security Group (BCSG)")]
#[command(about = "Stitch a Chameleon lease to a FABRIC slice over a facility port, probe it, then tear it all down")]
pub struct Opts {
    #[arg(long, default_value = DEFAULT_CONFIG_FILE, help = "Configuration file, defaults are used if it does not exist")]
    pub config: String,
    #[arg(short, long, help = "One of error, warn, info, debug, trace")]
    pub verbosity: Option<String>,
    #[arg(long, help = "Give up on any polling wait after this many seconds")]
    pub poll_deadline_secs: Option<u64>,
}
