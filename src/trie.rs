//! Character-indexed trie aggregating every network rule of a profile.
//!
//! The trie factors the long shared prefixes typical of Adblock lists
//! (`/ads/`, `ad.`, …) so matching cost follows URL length rather than
//! rule count. Matching walks the trie once per URL suffix; exceptions
//! short-circuit, block results are aggregated by the caller.

use crate::blocker::CheckResult;
use crate::filters::network::NetworkRule;
use crate::request::Request;

// Characters the `^` placeholder does NOT match, besides letters and digits.
const SEPARATORS: [char; 4] = ['_', '-', '.', '%'];

fn is_separator(c: char) -> bool {
    !c.is_alphanumeric() && !SEPARATORS.contains(&c)
}

#[derive(Debug)]
struct Node {
    value: char,
    children: Vec<Node>,
    rules: Vec<NetworkRule>,
}

impl Node {
    fn new(value: char) -> Node {
        Node {
            value,
            children: Vec::new(),
            rules: Vec::new(),
        }
    }
}

/// All network rules of one list, keyed by their pattern bodies.
#[derive(Debug)]
pub struct RuleTrie {
    root: Node,
}

impl Default for RuleTrie {
    fn default() -> RuleTrie {
        RuleTrie {
            root: Node::new('\0'),
        }
    }
}

impl RuleTrie {
    /// Inserts `rule` at the node spelled by `body`, creating missing
    /// nodes on the way. A new `^` child is prepended so separator
    /// alternatives are visited before literal ones during matching.
    pub fn insert(&mut self, body: &str, rule: NetworkRule) {
        let mut node = &mut self.root;

        for value in body.chars() {
            let index = match node.children.iter().position(|child| child.value == value) {
                Some(index) => index,
                None if value == '^' => {
                    node.children.insert(0, Node::new(value));
                    0
                }
                None => {
                    node.children.push(Node::new(value));
                    node.children.len() - 1
                }
            };

            node = &mut node.children[index];
        }

        node.rules.push(rule);
    }

    /// Runs the walk from every suffix of the request URL. An exception
    /// returns immediately; otherwise the block found at the latest start
    /// index wins. (This differs from the first-match-wins convention of
    /// other Adblock engines; kept for compatibility with profiles tuned
    /// against this matcher.)
    pub fn check(&self, request: &Request) -> CheckResult {
        let mut result = CheckResult::default();

        for (start, _) in request.url.char_indices() {
            let current = self.check_substring(&self.root, &request.url[start..], String::new(), request);

            if current.is_exception {
                return current;
            } else if current.is_blocked {
                result = current;
            }
        }

        result
    }

    /// Descends the trie along `sub`, matching rules against the pattern
    /// accumulated in `path`. `^` recurses at the same input position;
    /// `*` forks once per split point of the remaining input.
    fn check_substring(
        &self,
        start_node: &Node,
        sub: &str,
        mut path: String,
        request: &Request,
    ) -> CheckResult {
        let mut result = CheckResult::default();
        let mut node = start_node;

        for (i, c) in sub.char_indices() {
            let current = evaluate_node_rules(node, &path, request);

            if current.is_exception {
                return current;
            } else if current.is_blocked {
                result = current;
            }

            let mut descended = false;

            for child in &node.children {
                if child.value == '*' {
                    let remaining = &sub[i..];

                    for (split, _) in remaining.char_indices() {
                        let mut wildcard_path = path.clone();
                        wildcard_path.push_str(&remaining[..split]);

                        let current =
                            self.check_substring(child, &remaining[split..], wildcard_path, request);

                        if current.is_exception {
                            return current;
                        } else if current.is_blocked {
                            result = current;
                        }
                    }
                }

                if child.value == '^' && is_separator(c) {
                    let current = self.check_substring(child, &sub[i..], path.clone(), request);

                    if current.is_exception {
                        return current;
                    } else if current.is_blocked {
                        result = current;
                    }
                }

                if child.value == c {
                    node = child;
                    descended = true;
                    break;
                }
            }

            if !descended {
                return result;
            }

            path.push(c);
        }

        // The whole suffix is consumed: rules ending here fire, and a `^`
        // child still applies because end-of-string counts as a separator.
        let current = evaluate_node_rules(node, &path, request);

        if current.is_exception {
            return current;
        } else if current.is_blocked {
            result = current;
        }

        for child in &node.children {
            if child.value == '^' {
                let current = evaluate_node_rules(child, &path, request);

                if current.is_exception {
                    return current;
                } else if current.is_blocked {
                    result = current;
                }
            }
        }

        result
    }

    /// Returns the rules stored at the node spelled by `body`, if the
    /// path exists.
    pub fn rules_for(&self, body: &str) -> Option<&[NetworkRule]> {
        let mut node = &self.root;

        for value in body.chars() {
            node = node.children.iter().find(|child| child.value == value)?;
        }

        Some(&node.rules)
    }

    pub fn is_empty(&self) -> bool {
        self.root.children.is_empty() && self.root.rules.is_empty()
    }
}

fn evaluate_node_rules(node: &Node, path: &str, request: &Request) -> CheckResult {
    let mut result = CheckResult::default();

    for rule in &node.rules {
        let current = rule.check_match(path, request);

        if current.is_exception {
            return current;
        } else if current.is_blocked {
            result = current;
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::ResourceType;

    fn rule(line: &str) -> (NetworkRule, String) {
        NetworkRule::parse(line, true).unwrap()
    }

    fn trie_of(lines: &[&str]) -> RuleTrie {
        let mut trie = RuleTrie::default();

        for line in lines {
            let (rule, body) = rule(line);
            trie.insert(&body, rule);
        }

        trie
    }

    fn script_request(url: &str, host: &str, base_host: &str) -> Request {
        Request::new(url, host, base_host, ResourceType::Script)
    }

    #[test]
    fn inserted_rule_is_reachable_by_its_body() {
        let trie = trie_of(&["||ads.example.com^", "/banner/img"]);

        let rules = trie.rules_for("ads.example.com^").unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].raw, "||ads.example.com^");

        assert_eq!(trie.rules_for("/banner/img").unwrap().len(), 1);
        assert!(trie.rules_for("/banner/missing").is_none());
    }

    #[test]
    fn separator_child_is_inserted_first() {
        let mut trie = RuleTrie::default();

        let (first, body) = rule("ab");
        trie.insert(&body, first);
        let (second, body) = rule("a^");
        trie.insert(&body, second);
        let (third, body) = rule("ac");
        trie.insert(&body, third);

        let a = trie.root.children.iter().find(|child| child.value == 'a').unwrap();
        assert_eq!(a.children[0].value, '^');
    }

    #[test]
    fn blocks_separator_terminated_domain_rule() {
        let trie = trie_of(&["||ads.example.com^"]);
        let request = script_request(
            "https://ads.example.com/banner.js",
            "ads.example.com",
            "news.test",
        );

        let result = trie.check(&request);

        assert!(result.is_blocked);
        assert_eq!(result.rule.as_deref(), Some("||ads.example.com^"));
    }

    #[test]
    fn separator_matches_end_of_string() {
        let trie = trie_of(&["||ads.example.com^"]);
        let request = script_request("https://ads.example.com", "ads.example.com", "news.test");

        assert!(trie.check(&request).is_blocked);
    }

    #[test]
    fn separator_does_not_match_hostname_characters() {
        let trie = trie_of(&["||ads.example^"]);
        let request = script_request(
            "https://ads.example.com/banner.js",
            "ads.example.com",
            "news.test",
        );

        // `^` may not absorb the `.` of `.com`.
        assert!(!trie.check(&request).is_blocked);
    }

    #[test]
    fn exception_overrides_any_block() {
        let trie = trie_of(&["||tracker.net^", "@@||tracker.net/allowed^"]);
        let request = script_request(
            "https://tracker.net/allowed/pixel.gif",
            "tracker.net",
            "news.test",
        );

        let result = trie.check(&request);

        assert!(result.is_exception);
        assert!(!result.is_blocked);
        assert_eq!(result.rule.as_deref(), Some("@@||tracker.net/allowed^"));
    }

    #[test]
    fn wildcard_bridges_arbitrary_spans() {
        let trie = trie_of(&["/ads/*.js"]);
        let request = script_request(
            "https://cdn.test/ads/vendor/payload.js",
            "cdn.test",
            "news.test",
        );

        assert!(trie.check(&request).is_blocked);

        let miss = script_request("https://cdn.test/ads/vendor/payload.css", "cdn.test", "news.test");
        assert!(!trie.check(&miss).is_blocked);
    }

    #[test]
    fn start_anchor_requires_url_prefix() {
        let trie = trie_of(&["|https://ads."]);

        let hit = script_request("https://ads.test/x.js", "ads.test", "news.test");
        assert!(trie.check(&hit).is_blocked);

        let miss = script_request("https://news.test/https://ads.x", "news.test", "news.test");
        assert!(!trie.check(&miss).is_blocked);
    }

    #[test]
    fn end_anchor_requires_url_suffix() {
        let trie = trie_of(&["/pixel.gif|"]);

        let hit = script_request("https://x.test/pixel.gif", "x.test", "news.test");
        assert!(trie.check(&hit).is_blocked);

        let miss = script_request("https://x.test/pixel.gif?id=1", "x.test", "news.test");
        assert!(!trie.check(&miss).is_blocked);
    }

    #[test]
    fn domain_anchor_rejects_lookalike_paths() {
        let trie = trie_of(&["||ads.example.com^"]);

        // The pattern occurs in the URL, but not at a host boundary.
        let request = script_request(
            "https://news.test/ads.example.com/banner.js",
            "news.test",
            "news.test",
        );

        assert!(!trie.check(&request).is_blocked);
    }

    #[test]
    fn later_suffix_block_overwrites_earlier_one() {
        let trie = trie_of(&["aa/first", "a/second"]);
        let request = script_request("https://x.test/aa/first-a/second", "x.test", "news.test");

        // Both rules match; the one reached from the later start index is
        // reported.
        let result = trie.check(&request);
        assert!(result.is_blocked);
        assert_eq!(result.rule.as_deref(), Some("a/second"));
    }
}
