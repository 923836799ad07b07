//! CLI argument definitions

use clap::Parser;
use std::path::PathBuf;

use crate::sampler::DEFAULT_FREQUENCY;
use crate::server::DEFAULT_ADDR;

#[derive(Parser, Debug)]
#[command(
    name = "pprofd",
    about = "Serve CPU profiles, execution traces and symbols of a running process over HTTP",
    after_help = "\
EXAMPLES:
    pprofd                                   Listen on 127.0.0.1:6060 with 2 busy workers
    pprofd --addr 0.0.0.0:7070 --workers 4   Custom address and workload
    pprofd --cert cert.pem --key key.pem     Serve over TLS

    curl -o cpu.txt 'http://127.0.0.1:6060/profile?seconds=5'
    curl -o trace.json 'http://127.0.0.1:6060/trace?seconds=1'"
)]
pub struct Args {
    /// Listen address (ip:port)
    #[arg(long, default_value = DEFAULT_ADDR)]
    pub addr: String,

    /// PEM certificate for TLS
    #[arg(long, value_name = "FILE", requires = "key")]
    pub cert: Option<PathBuf>,

    /// PEM private key for TLS
    #[arg(long, value_name = "FILE", requires = "cert")]
    pub key: Option<PathBuf>,

    /// CPU sampling frequency in Hz
    #[arg(long, default_value_t = DEFAULT_FREQUENCY)]
    pub frequency: i32,

    /// Number of busy workload threads to run next to the server
    #[arg(long, default_value = "2")]
    pub workers: usize,

    /// Stop after N seconds (0 = unlimited)
    #[arg(long, default_value = "0")]
    pub duration: u64,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,
}
