//! Source-address request classification.
//!
//! Given a client address and a set of configured CIDR tag rules, decides
//! which tags apply to a request, appends them to the tag header and counts
//! per-tag hits. Tags are advisory metadata only; nothing here ever blocks
//! or redirects a request.

mod classifier;
mod filter;
mod runtime;
mod stats;

pub use classifier::IpTagger;
pub use filter::{FILTER_ENABLED_KEY, FilterContext, FilterHandle, INTERNAL_HEADER, TAG_HEADER, is_admitted};
pub use runtime::Runtime;
pub use stats::{Counter, StatsRegistry};
