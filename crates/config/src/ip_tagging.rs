//! IP tagging filter configuration.

use ipnet::IpNet;
use serde::Deserialize;

/// Configuration for the IP tagging filter.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IpTaggingConfig {
    /// Whether the filter is attached to the request pipeline at all.
    pub enabled: bool,
    /// Prefix prepended to every counter name the filter emits.
    pub stat_prefix: String,
    /// Which requests are eligible for classification.
    pub request_type: RequestDirection,
    /// Tag rules, evaluated in the order they are written.
    pub tags: Vec<TagRuleConfig>,
}

impl Default for IpTaggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            stat_prefix: "ip_tagging.".to_string(),
            request_type: RequestDirection::default(),
            tags: Vec::new(),
        }
    }
}

/// Which side of the edge a request must come from to be classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestDirection {
    /// Only requests marked internal.
    Internal,
    /// Only requests not marked internal.
    External,
    /// Every request.
    #[default]
    Both,
}

/// One tag and the address ranges it applies to.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TagRuleConfig {
    /// Tag name surfaced in the tag header and in counter names.
    pub name: String,
    /// IPv4 and/or IPv6 prefixes in CIDR notation.
    pub networks: Vec<IpNet>,
}
