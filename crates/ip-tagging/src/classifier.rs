//! Address-to-tag lookup.

use std::net::IpAddr;

use config::TagRuleConfig;
use ipnet::IpNet;

/// Ordered CIDR rules mapping address ranges to tag names.
///
/// Lookup is match-all: every rule whose prefix contains the address
/// contributes its tag, in the order the rules were configured. This is
/// deliberately not longest-prefix-wins; overlapping rules all fire, and a
/// tag name repeated across matching rules is returned once per rule.
pub struct IpTagger {
    rules: Vec<(IpNet, String)>,
}

impl IpTagger {
    /// Flattens validated tag rules into one ordered rule list. Rule order
    /// is configuration order and is surfaced verbatim in the tag header.
    pub fn new(tags: &[TagRuleConfig]) -> Self {
        let rules = tags
            .iter()
            .flat_map(|rule| rule.networks.iter().map(|net| (*net, rule.name.clone())))
            .collect();

        Self { rules }
    }

    /// Returns every tag whose prefix contains `addr`. No match is an empty
    /// vec, never an error.
    pub fn tags(&self, addr: IpAddr) -> Vec<&str> {
        self.rules
            .iter()
            .filter(|(net, _)| net.contains(&addr))
            .map(|(_, tag)| tag.as_str())
            .collect()
    }
}
