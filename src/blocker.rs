//! Holds [`Blocker`], the compiled form of one filter list: the network
//! rule trie plus the cosmetic selector tables. A blocker is built
//! off-line by the list parser and is purely read-only afterwards, so it
//! can be shared freely between matching threads.

use serde::Serialize;

use crate::cosmetic_filter_cache::{CosmeticFilterCache, CosmeticFiltersResult};
use crate::lists::CosmeticFiltersMode;
use crate::request::Request;
use crate::trie::RuleTrie;

/// The matcher's verdict on one network request.
///
/// A neutral result (`Default`) means no rule matched; `rule` carries the
/// raw text of the decisive filter for diagnostics. `cosmetic_override`
/// is only set by exception rules carrying `elemhide`/`generichide`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CheckResult {
    pub is_blocked: bool,
    pub is_exception: bool,
    pub rule: Option<String>,
    pub cosmetic_override: Option<CosmeticFiltersMode>,
}

#[derive(Debug, Default)]
pub struct Blocker {
    trie: RuleTrie,
    cosmetic: CosmeticFilterCache,
}

impl Blocker {
    pub(crate) fn new(trie: RuleTrie, cosmetic: CosmeticFilterCache) -> Blocker {
        Blocker { trie, cosmetic }
    }

    /// Decides whether a network request should be blocked, explicitly
    /// allowed by an exception, or left alone.
    pub fn check(&self, request: &Request) -> CheckResult {
        self.trie.check(request)
    }

    pub fn cosmetic_filters(&self, domains: &[String], is_domain_only: bool) -> CosmeticFiltersResult {
        self.cosmetic.cosmetic_filters(domains, is_domain_only)
    }

    pub fn is_empty(&self) -> bool {
        self.trie.is_empty() && self.cosmetic.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn trie(&self) -> &RuleTrie {
        &self.trie
    }
}
