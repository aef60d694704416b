use std::fs;
use std::io;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use smallvec::SmallVec;

// Delimiters that end the host portion of a rule path, e.g. in
// `ads.example.com/banner` or `ads.example.com:8080`.
static HOST_PART_DELIMITER: Lazy<Regex> = Lazy::new(|| Regex::new("[:?&/=]").unwrap());

/// Returns the host suffixes of `host`, most specific first:
/// `a.b.com` yields `["a.b.com", "b.com", "com"]`.
pub fn create_subdomain_list(host: &str) -> SmallVec<[&str; 4]> {
    let mut subdomains = SmallVec::new();

    if host.is_empty() {
        return subdomains;
    }

    subdomains.push(host);

    for (i, c) in host.char_indices() {
        if c == '.' && i + 1 < host.len() {
            subdomains.push(&host[i + 1..]);
        }
    }

    subdomains
}

/// Slices `path` up to the first host-part delimiter, returning the whole
/// string when none occurs.
pub fn host_part(path: &str) -> &str {
    match HOST_PART_DELIMITER.find(path) {
        Some(delimiter) => &path[..delimiter.start()],
        None => path,
    }
}

/// Writes `contents` to `path` atomically: the data goes to a sibling
/// temporary file which is then renamed over the destination, so readers
/// never observe a partially written profile.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut staging = path.as_os_str().to_owned();
    staging.push(".new");

    fs::write(&staging, contents)?;
    fs::rename(&staging, path)
}
