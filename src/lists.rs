//! Parsing of Adblock Plus 2.0 filter list files: line classification,
//! rule ingestion and the cheap header-only scan used before a profile is
//! fully loaded.

use std::io::{self, BufRead};
use std::path::Path;

use serde::Serialize;
use tracing::debug;

use crate::blocker::Blocker;
use crate::cosmetic_filter_cache::CosmeticFilterCache;
use crate::filters::network::NetworkRule;
use crate::profile::ProfileError;
use crate::trie::RuleTrie;

/// How much cosmetic filtering the host wants parsed and applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum CosmeticFiltersMode {
    #[default]
    AllFilters,
    DomainOnlyFilters,
    NoFilters,
}

/// Session-wide parsing knobs, fixed per profile at construction.
#[derive(Debug, Clone, Copy)]
pub struct ParseOptions {
    pub cosmetic_filters_mode: CosmeticFiltersMode,
    pub enable_wildcards: bool,
}

impl Default for ParseOptions {
    fn default() -> ParseOptions {
        ParseOptions {
            cosmetic_filters_mode: CosmeticFiltersMode::AllFilters,
            enable_wildcards: true,
        }
    }
}

/// Parses a whole filter list into its compiled form. The first line is
/// the `[Adblock …]` header and is skipped; header validation is the
/// caller's concern (see [`load_header`]).
pub fn parse_filter_list<R: BufRead>(reader: R, options: ParseOptions) -> io::Result<Blocker> {
    let mut trie = RuleTrie::default();
    let mut cosmetic = CosmeticFilterCache::default();

    for (number, line) in reader.lines().enumerate() {
        if number == 0 {
            line?;
            continue;
        }

        parse_rule_line(line?.trim(), &mut trie, &mut cosmetic, options);
    }

    Ok(Blocker::new(trie, cosmetic))
}

/// Classifies one trimmed line and feeds it to the right table. Malformed
/// network rules are dropped without failing the rest of the list.
fn parse_rule_line(
    line: &str,
    trie: &mut RuleTrie,
    cosmetic: &mut CosmeticFilterCache,
    options: ParseOptions,
) {
    if line.is_empty() || line.starts_with('!') {
        return;
    }

    if let Some(selector) = line.strip_prefix("##") {
        if options.cosmetic_filters_mode == CosmeticFiltersMode::AllFilters {
            cosmetic.add_global_rule(selector);
        }

        return;
    }

    if let Some((domains, selector)) = line.split_once("##") {
        if options.cosmetic_filters_mode != CosmeticFiltersMode::NoFilters {
            cosmetic.add_domain_rule(domains, selector);
        }

        return;
    }

    if let Some((domains, selector)) = line.split_once("#@#") {
        if options.cosmetic_filters_mode != CosmeticFiltersMode::NoFilters {
            cosmetic.add_domain_exception(domains, selector);
        }

        return;
    }

    match NetworkRule::parse(line, options.enable_wildcards) {
        Ok((rule, body)) => trie.insert(&body, rule),
        Err(error) => debug!(rule = line, %error, "dropping unsupported filter"),
    }
}

/// Metadata extracted by scanning the head of a profile file.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderInformation {
    pub title: Option<String>,
    pub is_empty: bool,
}

impl Default for HeaderInformation {
    fn default() -> HeaderInformation {
        HeaderInformation {
            title: None,
            is_empty: true,
        }
    }
}

// The emptiness scan gives up after this many lines; huge lists are
// obviously not empty.
const HEADER_SCAN_LIMIT: usize = 50;

/// Opens `path` and scans its head: validates the `[Adblock` marker
/// (case-insensitively), picks up a `! Title:` line and detects whether
/// the list carries any actual rules. A missing file is a valid, empty
/// profile.
pub fn load_header(path: &Path) -> Result<HeaderInformation, ProfileError> {
    if !path.exists() {
        return Ok(HeaderInformation::default());
    }

    let file = std::fs::File::open(path)
        .map_err(|error| ProfileError::Read(error.to_string()))?;
    let mut lines = io::BufReader::new(file).lines();

    let header = match lines.next() {
        Some(header) => header.map_err(|error| ProfileError::Read(error.to_string()))?,
        None => return Err(ProfileError::Parse),
    };

    if !header.to_lowercase().contains("[adblock") {
        return Err(ProfileError::Parse);
    }

    let mut information = HeaderInformation::default();
    let mut line_number = 1;

    for line in lines {
        let line = line.map_err(|error| ProfileError::Read(error.to_string()))?;
        let line = line.trim();

        if information.is_empty && !line.is_empty() && !line.starts_with('!') {
            information.is_empty = false;
        }

        if let Some(title) = line.strip_prefix("! Title: ") {
            information.title = Some(title.trim().to_owned());
            continue;
        }

        if line_number > HEADER_SCAN_LIMIT {
            break;
        }

        line_number += 1;
    }

    Ok(information)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::io::Write;

    fn parse(contents: &str) -> Blocker {
        parse_filter_list(Cursor::new(contents), ParseOptions::default()).unwrap()
    }

    #[test]
    fn comments_and_blank_lines_are_ignored() {
        let blocker = parse("[Adblock Plus 2.0]\n! comment\n\n||ads.example.com^\n");

        assert!(!blocker.is_empty());
        assert!(blocker.trie().rules_for("ads.example.com^").is_some());
    }

    #[test]
    fn cosmetic_lines_land_in_the_right_tables() {
        let blocker = parse(
            "[Adblock Plus 2.0]\n##.global-ad\nexample.com##.ad-banner\nexample.com#@#.keep\n",
        );

        let filters = blocker.cosmetic_filters(&["example.com".to_owned()], false);
        assert_eq!(filters.rules, [".global-ad", ".ad-banner"]);
        assert_eq!(filters.exceptions, [".keep"]);
    }

    #[test]
    fn cosmetic_modes_limit_ingestion() {
        let contents = "[Adblock Plus 2.0]\n##.global-ad\nexample.com##.ad-banner\n";

        let domain_only = parse_filter_list(
            Cursor::new(contents),
            ParseOptions {
                cosmetic_filters_mode: CosmeticFiltersMode::DomainOnlyFilters,
                enable_wildcards: true,
            },
        )
        .unwrap();
        let filters = domain_only.cosmetic_filters(&["example.com".to_owned()], false);
        assert_eq!(filters.rules, [".ad-banner"]);

        let none = parse_filter_list(
            Cursor::new(contents),
            ParseOptions {
                cosmetic_filters_mode: CosmeticFiltersMode::NoFilters,
                enable_wildcards: true,
            },
        )
        .unwrap();
        assert!(none.cosmetic_filters(&["example.com".to_owned()], false).rules.is_empty());
    }

    #[test]
    fn malformed_network_rules_are_dropped_quietly() {
        let blocker = parse("[Adblock Plus 2.0]\n||ads.example.com^$bogusoption\n||kept.test^\n");

        assert!(blocker.trie().rules_for("ads.example.com^").is_none());
        assert!(blocker.trie().rules_for("kept.test^").is_some());
    }

    #[test]
    fn wildcard_rules_are_dropped_when_disabled() {
        let blocker = parse_filter_list(
            Cursor::new("[Adblock Plus 2.0]\n/ads/*.js\n||kept.test^\n"),
            ParseOptions {
                cosmetic_filters_mode: CosmeticFiltersMode::AllFilters,
                enable_wildcards: false,
            },
        )
        .unwrap();

        assert!(blocker.trie().rules_for("/ads/").is_none());
        assert!(blocker.trie().rules_for("kept.test^").is_some());
    }

    #[test]
    fn parsing_twice_yields_equivalent_rule_sets() {
        let contents = "[Adblock Plus 2.0]\n||ads.example.com^\n@@||ads.example.com/ok^\n/pixel$image\n";

        let first = parse(contents);
        let second = parse(contents);

        for body in ["ads.example.com^", "ads.example.com/ok^", "/pixel"] {
            assert_eq!(first.trie().rules_for(body), second.trie().rules_for(body));
        }
    }

    #[test]
    fn header_scan_reads_title_and_emptiness() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("list.txt");
        std::fs::write(&path, "[Adblock Plus 2.0]\n! Title: EasyTest\n! just a comment\n").unwrap();

        let information = load_header(&path).unwrap();
        assert_eq!(information.title.as_deref(), Some("EasyTest"));
        assert!(information.is_empty);

        std::fs::write(&path, "[adblock plus 2.0]\n||ads.example.com^\n").unwrap();
        let information = load_header(&path).unwrap();
        assert!(information.title.is_none());
        assert!(!information.is_empty);
    }

    #[test]
    fn header_scan_rejects_missing_marker() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("list.txt");
        std::fs::write(&path, "just some text\n||ads.example.com^\n").unwrap();

        assert_eq!(load_header(&path).unwrap_err(), ProfileError::Parse);
    }

    #[test]
    fn header_scan_of_missing_file_is_empty_profile() {
        let information = load_header(Path::new("/nonexistent/profile.txt")).unwrap();

        assert!(information.is_empty);
        assert!(information.title.is_none());
    }

    #[test]
    fn emptiness_scan_stops_after_the_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("list.txt");

        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[Adblock Plus 2.0]").unwrap();
        for _ in 0..60 {
            writeln!(file, "! filler comment").unwrap();
        }
        writeln!(file, "||ads.example.com^").unwrap();
        drop(file);

        // The only rule sits beyond the scan window.
        assert!(load_header(&path).unwrap().is_empty);
    }
}
