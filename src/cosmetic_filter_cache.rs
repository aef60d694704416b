use std::collections::HashMap;

use serde::Serialize;

/// Selectors to hide on a page: the flat list of rules that apply, and
/// the exceptions the page may use to re-show elements.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CosmeticFiltersResult {
    pub rules: Vec<String>,
    pub exceptions: Vec<String>,
}

/// Global and per-domain cosmetic (CSS) selectors of one list. A selector
/// may be registered under several hosts.
#[derive(Debug, Default)]
pub struct CosmeticFilterCache {
    global_rules: Vec<String>,
    domain_rules: HashMap<String, Vec<String>>,
    domain_exceptions: HashMap<String, Vec<String>>,
}

impl CosmeticFilterCache {
    pub fn add_global_rule(&mut self, selector: &str) {
        self.global_rules.push(selector.to_owned());
    }

    /// Registers `selector` for every domain in the comma-separated list.
    pub fn add_domain_rule(&mut self, domains: &str, selector: &str) {
        insert_for_domains(&mut self.domain_rules, domains, selector);
    }

    pub fn add_domain_exception(&mut self, domains: &str, selector: &str) {
        insert_for_domains(&mut self.domain_exceptions, domains, selector);
    }

    /// Collects the selectors applying to `domains`: the global set
    /// (skipped when `is_domain_only`) plus every per-domain entry, with
    /// exceptions reported separately.
    pub fn cosmetic_filters(&self, domains: &[String], is_domain_only: bool) -> CosmeticFiltersResult {
        let mut result = CosmeticFiltersResult::default();

        if !is_domain_only {
            result.rules = self.global_rules.clone();
        }

        for domain in domains {
            if let Some(selectors) = self.domain_rules.get(domain) {
                result.rules.extend(selectors.iter().cloned());
            }

            if let Some(selectors) = self.domain_exceptions.get(domain) {
                result.exceptions.extend(selectors.iter().cloned());
            }
        }

        result
    }

    pub fn is_empty(&self) -> bool {
        self.global_rules.is_empty()
            && self.domain_rules.is_empty()
            && self.domain_exceptions.is_empty()
    }
}

fn insert_for_domains(table: &mut HashMap<String, Vec<String>>, domains: &str, selector: &str) {
    for domain in domains.split(',') {
        table
            .entry(domain.to_owned())
            .or_default()
            .push(selector.to_owned());
    }
}
