use bitflags::bitflags;
use itertools::{Either, Itertools};
use thiserror::Error;

use crate::blocker::CheckResult;
use crate::lists::CosmeticFiltersMode;
use crate::request::{Request, ResourceType};
use crate::utils;

bitflags! {
    /// Option bits recognized after the `$` separator of a network rule.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RuleOptions: u32 {
        const THIRD_PARTY = 1 << 0;
        const STYLESHEET = 1 << 1;
        const IMAGE = 1 << 2;
        const SCRIPT = 1 << 3;
        const OBJECT = 1 << 4;
        const OBJECT_SUBREQUEST = 1 << 5;
        const SUB_DOCUMENT = 1 << 6;
        const XML_HTTP_REQUEST = 1 << 7;
        const WEB_SOCKET = 1 << 8;
        const POPUP = 1 << 9;
        const ELEMENT_HIDE = 1 << 10;
        const GENERIC_HIDE = 1 << 11;
    }
}

impl Default for RuleOptions {
    fn default() -> RuleOptions {
        RuleOptions::empty()
    }
}

fn option_by_name(name: &str) -> Option<RuleOptions> {
    match name {
        "third-party" => Some(RuleOptions::THIRD_PARTY),
        "stylesheet" => Some(RuleOptions::STYLESHEET),
        "image" => Some(RuleOptions::IMAGE),
        "script" => Some(RuleOptions::SCRIPT),
        "object" => Some(RuleOptions::OBJECT),
        "object-subrequest" | "object_subrequest" => Some(RuleOptions::OBJECT_SUBREQUEST),
        "subdocument" => Some(RuleOptions::SUB_DOCUMENT),
        "xmlhttprequest" => Some(RuleOptions::XML_HTTP_REQUEST),
        "websocket" => Some(RuleOptions::WEB_SOCKET),
        "popup" => Some(RuleOptions::POPUP),
        "elemhide" => Some(RuleOptions::ELEMENT_HIDE),
        "generichide" => Some(RuleOptions::GENERIC_HIDE),
        _ => None,
    }
}

// Resource types that participate in option gating. Options absent from
// this table (third-party, elemhide, generichide) are handled separately.
const RESOURCE_TYPE_OPTIONS: [(ResourceType, RuleOptions); 9] = [
    (ResourceType::Image, RuleOptions::IMAGE),
    (ResourceType::Script, RuleOptions::SCRIPT),
    (ResourceType::StyleSheet, RuleOptions::STYLESHEET),
    (ResourceType::Object, RuleOptions::OBJECT),
    (ResourceType::XmlHttpRequest, RuleOptions::XML_HTTP_REQUEST),
    (ResourceType::SubFrame, RuleOptions::SUB_DOCUMENT),
    (ResourceType::Popup, RuleOptions::POPUP),
    (ResourceType::ObjectSubrequest, RuleOptions::OBJECT_SUBREQUEST),
    (ResourceType::WebSocket, RuleOptions::WEB_SOCKET),
];

/// Where in the request URL the accumulated pattern must sit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RuleAnchor {
    #[default]
    Substring,
    Start,
    End,
    Exact,
}

#[derive(Debug, Error, PartialEq)]
pub enum FilterError {
    #[error("unrecognised option `{0}`")]
    UnrecognisedOption(String),
    #[error("wildcard patterns are disabled")]
    WildcardsDisabled,
}

/// One parsed network filter. Immutable after parsing; its sole behavior
/// is matching itself against a request.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkRule {
    /// Original filter text, returned in match diagnostics.
    pub raw: String,
    pub anchor: RuleAnchor,
    pub is_exception: bool,
    pub needs_domain_check: bool,
    pub options: RuleOptions,
    pub exceptions: RuleOptions,
    pub blocked_domains: Vec<String>,
    pub allowed_domains: Vec<String>,
}

impl NetworkRule {
    /// Parses one network filter line. Returns the rule together with the
    /// residual pattern body that keys it in the trie (anchors and `||`
    /// stripped).
    pub fn parse(line: &str, enable_wildcards: bool) -> Result<(NetworkRule, String), FilterError> {
        let (mut body, raw_options) = match line.find('$') {
            Some(separator) => (&line[..separator], Some(&line[separator + 1..])),
            None => (line, None),
        };

        if let Some(stripped) = body.strip_suffix('*') {
            body = stripped;
        }

        if let Some(stripped) = body.strip_prefix('*') {
            body = stripped;
        }

        if !enable_wildcards && body.contains('*') {
            return Err(FilterError::WildcardsDisabled);
        }

        let is_exception = body.starts_with("@@");

        if is_exception {
            body = &body[2..];
        }

        let needs_domain_check = body.starts_with("||");

        if needs_domain_check {
            body = &body[2..];
        }

        let mut anchor = RuleAnchor::Substring;

        if let Some(stripped) = body.strip_prefix('|') {
            anchor = RuleAnchor::Start;
            body = stripped;
        }

        if let Some(stripped) = body.strip_suffix('|') {
            anchor = if anchor == RuleAnchor::Start {
                RuleAnchor::Exact
            } else {
                RuleAnchor::End
            };
            body = stripped;
        }

        let mut options = RuleOptions::empty();
        let mut exceptions = RuleOptions::empty();
        let mut blocked_domains = Vec::new();
        let mut allowed_domains = Vec::new();

        for token in raw_options
            .unwrap_or_default()
            .split(',')
            .filter(|token| !token.is_empty())
        {
            let negated = token.starts_with('~');
            let name = if negated { &token[1..] } else { token };

            if let Some(option) = option_by_name(name) {
                let is_hiding_option =
                    option == RuleOptions::ELEMENT_HIDE || option == RuleOptions::GENERIC_HIDE;

                // elemhide/generichide only make sense on exception rules.
                if (!is_exception || negated) && is_hiding_option {
                    continue;
                }

                if !negated {
                    options |= option;
                } else if option != RuleOptions::WEB_SOCKET && option != RuleOptions::POPUP {
                    exceptions |= option;
                }
            } else if name.starts_with("domain") {
                let values = &token[token.find('=').map_or(0, |position| position + 1)..];
                let (blocked, allowed): (Vec<_>, Vec<_>) = values
                    .split('|')
                    .filter(|domain| !domain.is_empty())
                    .partition_map(|domain| match domain.strip_prefix('~') {
                        Some(allowed) => Either::Right(allowed.to_owned()),
                        None => Either::Left(domain.to_owned()),
                    });

                blocked_domains.extend(blocked);
                allowed_domains.extend(allowed);
            } else {
                return Err(FilterError::UnrecognisedOption(name.to_owned()));
            }
        }

        let rule = NetworkRule {
            raw: line.to_owned(),
            anchor,
            is_exception,
            needs_domain_check,
            options,
            exceptions,
            blocked_domains,
            allowed_domains,
        };

        Ok((rule, body.to_owned()))
    }

    /// Decides whether this rule fires for `request`, given the pattern
    /// `path` the trie walk has accumulated up to the rule's node.
    pub fn check_match(&self, path: &str, request: &Request) -> CheckResult {
        let anchored = match self.anchor {
            RuleAnchor::Start => request.url.starts_with(path),
            RuleAnchor::End => request.url.ends_with(path),
            RuleAnchor::Exact => request.url == path,
            RuleAnchor::Substring => request.url.contains(path),
        };

        if !anchored {
            return CheckResult::default();
        }

        let subdomains = utils::create_subdomain_list(&request.host);

        if self.needs_domain_check && !subdomains.contains(&utils::host_part(path)) {
            return CheckResult::default();
        }

        let has_blocked_domains = !self.blocked_domains.is_empty();
        let has_allowed_domains = !self.allowed_domains.is_empty();
        let mut is_blocked = true;

        if has_blocked_domains {
            is_blocked = self
                .blocked_domains
                .iter()
                .any(|domain| request.base_host.contains(domain.as_str()));

            if !is_blocked {
                return CheckResult::default();
            }
        }

        if has_allowed_domains {
            is_blocked = !self
                .allowed_domains
                .iter()
                .any(|domain| request.base_host.contains(domain.as_str()));
        }

        if (self.options | self.exceptions).contains(RuleOptions::THIRD_PARTY) {
            if request.base_host.is_empty() || subdomains.contains(&request.base_host.as_str()) {
                is_blocked = self.exceptions.contains(RuleOptions::THIRD_PARTY);
            } else if !has_blocked_domains && !has_allowed_domains {
                is_blocked = self.options.contains(RuleOptions::THIRD_PARTY);
            }
        }

        if !self.options.is_empty() || !self.exceptions.is_empty() {
            for (resource_type, option) in RESOURCE_TYPE_OPTIONS {
                let supports_exception =
                    option != RuleOptions::WEB_SOCKET && option != RuleOptions::POPUP;

                if self.options.contains(option)
                    || (supports_exception && self.exceptions.contains(option))
                {
                    if request.resource_type == resource_type {
                        is_blocked = is_blocked && self.options.contains(option);
                    } else if supports_exception {
                        is_blocked = is_blocked && self.exceptions.contains(option);
                    } else {
                        is_blocked = false;
                    }
                }
            }
        } else if request.resource_type == ResourceType::Popup {
            is_blocked = false;
        }

        if !is_blocked {
            return CheckResult::default();
        }

        if self.is_exception {
            let cosmetic_override = if self.options.contains(RuleOptions::ELEMENT_HIDE) {
                Some(CosmeticFiltersMode::NoFilters)
            } else if self.options.contains(RuleOptions::GENERIC_HIDE) {
                Some(CosmeticFiltersMode::DomainOnlyFilters)
            } else {
                None
            };

            return CheckResult {
                is_blocked: false,
                is_exception: true,
                rule: Some(self.raw.clone()),
                cosmetic_override,
            };
        }

        CheckResult {
            is_blocked: true,
            is_exception: false,
            rule: Some(self.raw.clone()),
            cosmetic_override: None,
        }
    }
}
