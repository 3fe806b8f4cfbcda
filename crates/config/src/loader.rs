use std::path::Path;

use crate::{Config, error::Error};

pub(crate) fn load<P: AsRef<Path>>(path: P) -> crate::Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())?;
    let config: Config = toml::from_str(&content)?;

    validate_ip_tagging(&config)?;

    Ok(config)
}

/// Rejects rule sets the filter could never classify with. Request-time code
/// assumes configuration passed through here.
pub(crate) fn validate_ip_tagging(config: &Config) -> crate::Result<()> {
    let ip_tagging = &config.ip_tagging;

    if !ip_tagging.enabled {
        return Ok(());
    }

    if ip_tagging.tags.is_empty() {
        return Err(Error::Validation(
            "ip_tagging is enabled but no tag rules are configured. Add at least one [[ip_tagging.tags]] entry or set ip_tagging.enabled = false".to_string(),
        ));
    }

    for rule in &ip_tagging.tags {
        if rule.name.is_empty() {
            return Err(Error::Validation(
                "Tag rule with an empty name. Every [[ip_tagging.tags]] entry needs a non-empty name".to_string(),
            ));
        }

        // The tag name ends up verbatim in a header value and in counter
        // names, so it must stay within visible ASCII and must not contain
        // the list separator.
        if !rule.name.is_ascii() || rule.name.chars().any(|c| c.is_ascii_control() || c == ',') {
            return Err(Error::Validation(format!(
                "Tag name '{}' contains characters that cannot appear in a header value",
                rule.name.escape_default()
            )));
        }

        if rule.networks.is_empty() {
            return Err(Error::Validation(format!(
                "Tag rule '{}' has no networks. List at least one CIDR prefix",
                rule.name
            )));
        }
    }

    Ok(())
}
