use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "iptag", version, about = "Source-address request classification gateway")]
pub struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "IPTAG_CONFIG", default_value = "./iptag.toml")]
    pub config: PathBuf,

    /// Overrides the listen address from the configuration file.
    #[arg(short, long)]
    pub listen_address: Option<SocketAddr>,

    /// Log filter, e.g. "info" or "server=debug,ip_tagging=debug".
    #[arg(long, env = "IPTAG_LOG", default_value = "info")]
    pub log: String,
}
