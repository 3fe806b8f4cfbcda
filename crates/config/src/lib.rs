mod client_ip;
mod error;
mod ip_tagging;
mod loader;
mod server;

use std::{collections::BTreeMap, path::Path};

use serde::Deserialize;

pub use client_ip::ClientIpConfig;
pub use error::Error;
pub use ip_tagging::{IpTaggingConfig, RequestDirection, TagRuleConfig};
pub use server::{ServerConfig, TlsServerConfig};

pub(crate) type Result<T> = std::result::Result<T, error::Error>;

#[derive(Default, Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub server: ServerConfig,
    pub ip_tagging: IpTaggingConfig,
    /// Runtime feature overrides, keyed by feature name. Values are
    /// percentages in 0..=100.
    pub runtime: BTreeMap<String, u64>,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> crate::Result<Config> {
        loader::load(path)
    }
}
