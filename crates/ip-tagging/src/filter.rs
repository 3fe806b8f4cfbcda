//! Per-request tagging decision: admission, classification, header
//! aggregation, counter emission.

use std::{net::IpAddr, sync::Arc};

use arc_swap::ArcSwap;
use config::{IpTaggingConfig, RequestDirection};
use http::{HeaderMap, HeaderValue};

use crate::{IpTagger, Runtime, StatsRegistry};

/// Header carrying the comma-space-joined tag list. Append-only: tags
/// computed here never replace content written upstream.
pub const TAG_HEADER: &str = "x-ip-tags";

/// Request header marking a request as internal; only the literal value
/// `true` counts.
pub const INTERNAL_HEADER: &str = "x-internal";

/// Runtime feature gate key for the whole filter.
pub const FILTER_ENABLED_KEY: &str = "ip_tagging.filter_enabled";

const TAG_SEPARATOR: &str = ", ";

/// Whether a request with the given internal marking is eligible for
/// classification under the configured direction.
pub fn is_admitted(direction: RequestDirection, is_internal: bool) -> bool {
    match direction {
        RequestDirection::Internal => is_internal,
        RequestDirection::External => !is_internal,
        RequestDirection::Both => true,
    }
}

/// Immutable filter snapshot shared read-only by every in-flight request.
///
/// Holds the rule set, the runtime gate and the counter registry for one
/// configuration epoch. Never mutated in place; reloads publish a whole new
/// snapshot through [`FilterHandle`].
pub struct FilterContext {
    stat_prefix: String,
    request_type: RequestDirection,
    tagger: IpTagger,
    runtime: Runtime,
    stats: StatsRegistry,
}

impl FilterContext {
    pub fn new(config: &IpTaggingConfig, runtime: Runtime, stats: StatsRegistry) -> Self {
        Self {
            stat_prefix: config.stat_prefix.clone(),
            request_type: config.request_type,
            tagger: IpTagger::new(&config.tags),
            runtime,
            stats,
        }
    }

    /// Runs the tagging decision for one request.
    ///
    /// The request always continues unmodified in routing terms; the only
    /// effects are the tag header and counter increments, and both are
    /// skipped entirely when the request is not admitted.
    pub fn on_request(&self, headers: &mut HeaderMap, remote_addr: Option<IpAddr>) {
        let is_internal = headers
            .get(INTERNAL_HEADER)
            .is_some_and(|value| value.as_bytes() == b"true");

        if !is_admitted(self.request_type, is_internal) {
            return;
        }

        if !self.runtime.feature_enabled(FILTER_ENABLED_KEY, 100) {
            return;
        }

        // A missing remote address is a no-match, not a fault; tagging is
        // best-effort and never blocks traffic.
        let tags = match remote_addr {
            Some(addr) => self.tagger.tags(addr),
            None => Vec::new(),
        };

        if tags.is_empty() {
            self.stats.counter(&format!("{}no_hit", self.stat_prefix)).inc();
        } else {
            self.append_tags(headers, &tags);

            for tag in &tags {
                self.stats.counter(&format!("{}{}.hit", self.stat_prefix, tag)).inc();
            }

            log::debug!("Tagged request from {remote_addr:?} with {tags:?}");
        }

        self.stats.counter(&format!("{}total", self.stat_prefix)).inc();
    }

    fn append_tags(&self, headers: &mut HeaderMap, tags: &[&str]) {
        let joined = tags.join(TAG_SEPARATOR);

        // Upstream content is never replaced. A single readable value grows
        // in place with the separator; opaque bytes or multiple header
        // lines stay untouched and the new tags go on an additional line.
        let merged = {
            let mut existing = headers.get_all(TAG_HEADER).iter();

            match (existing.next(), existing.next()) {
                (None, _) => Some(joined.clone()),
                (Some(value), None) => match value.to_str() {
                    Ok("") => Some(joined.clone()),
                    Ok(value) => Some(format!("{value}{TAG_SEPARATOR}{joined}")),
                    Err(_) => None,
                },
                (Some(_), Some(_)) => None,
            }
        };

        // Tag names are validated at configuration load, so building the
        // header value cannot fail for the tags themselves.
        match merged {
            Some(merged) => {
                if let Ok(value) = HeaderValue::from_str(&merged) {
                    headers.insert(TAG_HEADER, value);
                }
            }
            None => {
                if let Ok(value) = HeaderValue::from_str(&joined) {
                    headers.append(TAG_HEADER, value);
                }
            }
        }
    }
}

/// Hot-swappable handle to the active filter snapshot.
///
/// Reads are lock-free; in-flight requests keep whichever snapshot they
/// loaded at request start, so reloads never require locks on the request
/// path.
pub struct FilterHandle {
    current: ArcSwap<FilterContext>,
}

impl FilterHandle {
    pub fn new(context: FilterContext) -> Self {
        Self {
            current: ArcSwap::from_pointee(context),
        }
    }

    /// The snapshot to use for one request.
    pub fn load(&self) -> Arc<FilterContext> {
        self.current.load_full()
    }

    /// Atomically publishes a new snapshot. Counters live in the shared
    /// registry, so they carry over across reloads.
    pub fn reload(&self, context: FilterContext) {
        self.current.store(Arc::new(context));
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use config::TagRuleConfig;

    use super::*;

    fn config(direction: RequestDirection, rules: &[(&str, &[&str])]) -> IpTaggingConfig {
        IpTaggingConfig {
            enabled: true,
            stat_prefix: "ip_tagging.".to_string(),
            request_type: direction,
            tags: rules
                .iter()
                .map(|(name, networks)| TagRuleConfig {
                    name: (*name).to_string(),
                    networks: networks.iter().map(|n| n.parse().unwrap()).collect(),
                })
                .collect(),
        }
    }

    fn context(direction: RequestDirection, rules: &[(&str, &[&str])]) -> FilterContext {
        FilterContext::new(&config(direction, rules), Runtime::default(), StatsRegistry::default())
    }

    fn gated_context(direction: RequestDirection, rules: &[(&str, &[&str])], percent: u64) -> FilterContext {
        let mut overrides = BTreeMap::new();
        overrides.insert(FILTER_ENABLED_KEY.to_string(), percent);

        FilterContext::new(
            &config(direction, rules),
            Runtime::new(&overrides),
            StatsRegistry::default(),
        )
    }

    fn addr(s: &str) -> Option<IpAddr> {
        Some(s.parse().unwrap())
    }

    fn tag_header(headers: &HeaderMap) -> Option<&str> {
        headers.get(TAG_HEADER).map(|v| v.to_str().unwrap())
    }

    #[test]
    fn admission_truth_table() {
        assert!(is_admitted(RequestDirection::Both, true));
        assert!(is_admitted(RequestDirection::Both, false));
        assert!(is_admitted(RequestDirection::Internal, true));
        assert!(!is_admitted(RequestDirection::Internal, false));
        assert!(!is_admitted(RequestDirection::External, true));
        assert!(is_admitted(RequestDirection::External, false));
    }

    #[test]
    fn no_match_increments_no_hit_and_total_only() {
        let context = context(RequestDirection::Both, &[("office", &["10.1.0.0/16"])]);
        let mut headers = HeaderMap::new();

        context.on_request(&mut headers, addr("192.168.0.1"));

        assert_eq!(tag_header(&headers), None);
        assert_eq!(context.stats.value("ip_tagging.no_hit"), 1);
        assert_eq!(context.stats.value("ip_tagging.total"), 1);
        assert_eq!(context.stats.value("ip_tagging.office.hit"), 0);
    }

    #[test]
    fn single_match_sets_header_and_hit_counter() {
        let context = context(RequestDirection::Both, &[("office", &["10.1.0.0/16"])]);
        let mut headers = HeaderMap::new();

        context.on_request(&mut headers, addr("10.1.2.3"));

        assert_eq!(tag_header(&headers), Some("office"));
        assert_eq!(context.stats.value("ip_tagging.office.hit"), 1);
        assert_eq!(context.stats.value("ip_tagging.total"), 1);
        assert_eq!(context.stats.value("ip_tagging.no_hit"), 0);
    }

    #[test]
    fn multiple_matches_join_in_rule_order() {
        let context = context(
            RequestDirection::Both,
            &[("corp", &["10.0.0.0/8"]), ("office", &["10.1.0.0/16"])],
        );
        let mut headers = HeaderMap::new();

        context.on_request(&mut headers, addr("10.1.2.3"));

        assert_eq!(tag_header(&headers), Some("corp, office"));
        assert_eq!(context.stats.value("ip_tagging.corp.hit"), 1);
        assert_eq!(context.stats.value("ip_tagging.office.hit"), 1);
        assert_eq!(context.stats.value("ip_tagging.total"), 1);
    }

    #[test]
    fn existing_header_content_is_kept_and_appended_to() {
        let context = context(RequestDirection::Both, &[("office", &["10.1.0.0/16"])]);
        let mut headers = HeaderMap::new();
        headers.insert(TAG_HEADER, HeaderValue::from_static("upstream"));

        context.on_request(&mut headers, addr("10.1.2.3"));

        assert_eq!(tag_header(&headers), Some("upstream, office"));
    }

    #[test]
    fn opaque_existing_header_value_is_preserved() {
        let context = context(RequestDirection::Both, &[("office", &["10.1.0.0/16"])]);
        let mut headers = HeaderMap::new();
        // Valid header bytes that are not visible ASCII, e.g. latin-1 "éé".
        let opaque = HeaderValue::from_bytes(&[0xE9, 0xE9]).unwrap();
        headers.insert(TAG_HEADER, opaque.clone());

        context.on_request(&mut headers, addr("10.1.2.3"));

        let values: Vec<_> = headers.get_all(TAG_HEADER).iter().collect();
        assert_eq!(values, vec![&opaque, &HeaderValue::from_static("office")]);
        assert_eq!(context.stats.value("ip_tagging.office.hit"), 1);
    }

    #[test]
    fn multiple_existing_header_lines_are_kept() {
        let context = context(RequestDirection::Both, &[("office", &["10.1.0.0/16"])]);
        let mut headers = HeaderMap::new();
        headers.append(TAG_HEADER, HeaderValue::from_static("first"));
        headers.append(TAG_HEADER, HeaderValue::from_static("second"));

        context.on_request(&mut headers, addr("10.1.2.3"));

        let values: Vec<_> = headers.get_all(TAG_HEADER).iter().collect();
        assert_eq!(
            values,
            vec![
                &HeaderValue::from_static("first"),
                &HeaderValue::from_static("second"),
                &HeaderValue::from_static("office"),
            ]
        );
    }

    #[test]
    fn empty_existing_header_value_is_overwritten_not_separated() {
        let context = context(RequestDirection::Both, &[("office", &["10.1.0.0/16"])]);
        let mut headers = HeaderMap::new();
        headers.insert(TAG_HEADER, HeaderValue::from_static(""));

        context.on_request(&mut headers, addr("10.1.2.3"));

        assert_eq!(tag_header(&headers), Some("office"));
    }

    #[test]
    fn no_match_leaves_existing_header_untouched() {
        let context = context(RequestDirection::Both, &[("office", &["10.1.0.0/16"])]);
        let mut headers = HeaderMap::new();
        headers.insert(TAG_HEADER, HeaderValue::from_static("upstream"));

        context.on_request(&mut headers, addr("192.168.0.1"));

        assert_eq!(tag_header(&headers), Some("upstream"));
    }

    #[test]
    fn duplicate_tag_increments_once_per_matching_rule() {
        let context = context(
            RequestDirection::Both,
            &[("vpn", &["10.1.0.0/16"]), ("vpn", &["10.1.2.0/24"])],
        );
        let mut headers = HeaderMap::new();

        context.on_request(&mut headers, addr("10.1.2.3"));

        assert_eq!(tag_header(&headers), Some("vpn, vpn"));
        assert_eq!(context.stats.value("ip_tagging.vpn.hit"), 2);
        assert_eq!(context.stats.value("ip_tagging.total"), 1);
    }

    #[test]
    fn internal_request_skipped_when_direction_is_external() {
        let context = context(RequestDirection::External, &[("office", &["10.1.0.0/16"])]);
        let mut headers = HeaderMap::new();
        headers.insert(INTERNAL_HEADER, HeaderValue::from_static("true"));

        context.on_request(&mut headers, addr("10.1.2.3"));

        assert_eq!(tag_header(&headers), None);
        assert_eq!(context.stats.snapshot(), vec![]);
    }

    #[test]
    fn external_request_skipped_when_direction_is_internal() {
        let context = context(RequestDirection::Internal, &[("office", &["10.1.0.0/16"])]);
        let mut headers = HeaderMap::new();

        context.on_request(&mut headers, addr("10.1.2.3"));

        assert_eq!(tag_header(&headers), None);
        assert_eq!(context.stats.snapshot(), vec![]);
    }

    #[test]
    fn internal_marking_requires_the_literal_true() {
        let context = context(RequestDirection::Internal, &[("office", &["10.1.0.0/16"])]);
        let mut headers = HeaderMap::new();
        headers.insert(INTERNAL_HEADER, HeaderValue::from_static("1"));

        context.on_request(&mut headers, addr("10.1.2.3"));

        // "1" is not "true", so the request counts as external and the
        // internal-only filter skips it.
        assert_eq!(context.stats.snapshot(), vec![]);
    }

    #[test]
    fn disabled_gate_skips_everything() {
        let context = gated_context(RequestDirection::Both, &[("office", &["10.1.0.0/16"])], 0);
        let mut headers = HeaderMap::new();

        context.on_request(&mut headers, addr("10.1.2.3"));

        assert_eq!(tag_header(&headers), None);
        assert_eq!(context.stats.snapshot(), vec![]);
    }

    #[test]
    fn missing_remote_address_counts_as_no_hit() {
        let context = context(RequestDirection::Both, &[("office", &["10.1.0.0/16"])]);
        let mut headers = HeaderMap::new();

        context.on_request(&mut headers, None);

        assert_eq!(tag_header(&headers), None);
        assert_eq!(context.stats.value("ip_tagging.no_hit"), 1);
        assert_eq!(context.stats.value("ip_tagging.total"), 1);
    }

    #[test]
    fn identical_requests_produce_identical_deltas() {
        let context = context(RequestDirection::Both, &[("office", &["10.1.0.0/16"])]);

        let mut first = HeaderMap::new();
        context.on_request(&mut first, addr("10.1.2.3"));

        let mut second = HeaderMap::new();
        context.on_request(&mut second, addr("10.1.2.3"));

        assert_eq!(tag_header(&first), tag_header(&second));
        assert_eq!(context.stats.value("ip_tagging.office.hit"), 2);
        assert_eq!(context.stats.value("ip_tagging.total"), 2);
    }

    #[test]
    fn custom_stat_prefix_is_used_verbatim() {
        let mut config = config(RequestDirection::Both, &[("office", &["10.1.0.0/16"])]);
        config.stat_prefix = "edge.ip_tagging.".to_string();
        let context = FilterContext::new(&config, Runtime::default(), StatsRegistry::default());
        let mut headers = HeaderMap::new();

        context.on_request(&mut headers, addr("10.1.2.3"));

        assert_eq!(context.stats.value("edge.ip_tagging.office.hit"), 1);
        assert_eq!(context.stats.value("edge.ip_tagging.total"), 1);
    }

    #[test]
    fn reload_swaps_rules_but_keeps_counters() {
        let stats = StatsRegistry::default();
        let handle = FilterHandle::new(FilterContext::new(
            &config(RequestDirection::Both, &[("old", &["10.0.0.0/8"])]),
            Runtime::default(),
            stats.clone(),
        ));

        let mut headers = HeaderMap::new();
        handle.load().on_request(&mut headers, addr("10.1.2.3"));
        assert_eq!(stats.value("ip_tagging.old.hit"), 1);

        handle.reload(FilterContext::new(
            &config(RequestDirection::Both, &[("new", &["10.0.0.0/8"])]),
            Runtime::default(),
            stats.clone(),
        ));

        let mut headers = HeaderMap::new();
        handle.load().on_request(&mut headers, addr("10.1.2.3"));

        assert_eq!(tag_header(&headers), Some("new"));
        assert_eq!(stats.value("ip_tagging.old.hit"), 1);
        assert_eq!(stats.value("ip_tagging.new.hit"), 1);
        assert_eq!(stats.value("ip_tagging.total"), 2);
    }
}
