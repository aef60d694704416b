//! Download-side plumbing for profile updates: the job interface the host
//! implements, and verification of the Adblock Plus checksum convention
//! over the downloaded payload.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use crossbeam_channel::Sender;
use md5::{Digest, Md5};

use crate::profile::ProfileError;

/// Events a fetch job reports back to the profile that started it.
#[derive(Debug, Clone)]
pub enum FetchEvent {
    /// Transfer progress in percent.
    Progress(i32),
    /// Terminal outcome: the downloaded bytes, or a failure message.
    Finished(Result<Vec<u8>, String>),
}

/// One asynchronous download, implemented by the host network stack.
/// `start` must not block; events are delivered through the supplied
/// channel and pumped on the profile's owning thread.
pub trait DataFetchJob: Send + Sync {
    fn start(&mut self, events: Sender<FetchEvent>);

    /// Cancels the transfer without blocking; no further events are
    /// expected afterwards.
    fn cancel(&mut self);
}

/// Creates fetch jobs on demand; supplied by the host when a profile is
/// constructed.
pub trait DataFetchJobFactory: Send + Sync {
    fn create_job(&self, url: &str) -> Box<dyn DataFetchJob>;
}

/// The Adblock Plus list fingerprint: MD5 over the canonical blob,
/// base64-encoded with the two trailing `=` padding characters removed.
pub fn adblock_checksum(data: &[u8]) -> String {
    let mut encoded = BASE64.encode(Md5::digest(data));
    encoded.truncate(22);
    encoded
}

/// Validates a downloaded list and reduces it to its canonical on-disk
/// form: the header plus every non-empty line joined by `\n`, with the
/// first `! Checksum:` line removed. When a checksum was present it must
/// match [`adblock_checksum`] of the remaining blob.
pub(crate) fn assemble_payload(bytes: &[u8]) -> Result<Vec<u8>, ProfileError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|error| ProfileError::Download(error.to_string()))?;

    let mut lines = text.lines();
    let header = lines.next().unwrap_or_default();

    if !header.contains("[Adblock") {
        return Err(ProfileError::Parse);
    }

    let mut data = String::from(header);
    let mut checksum: Option<String> = None;

    for line in lines {
        if line.is_empty() {
            continue;
        }

        if checksum.is_none() {
            if let Some(value) = line.strip_prefix("! Checksum:") {
                checksum = Some(value.trim().to_owned());
                continue;
            }
        }

        data.push('\n');
        data.push_str(line);
    }

    if let Some(expected) = checksum {
        if adblock_checksum(data.as_bytes()) != expected {
            return Err(ProfileError::Checksum);
        }
    }

    Ok(data.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_checksum(body: &str) -> String {
        let checksum = adblock_checksum(body.as_bytes());
        let (header, rest) = body.split_once('\n').unwrap();

        format!("{header}\n! Checksum: {checksum}\n{rest}")
    }

    #[test]
    fn checksum_has_padding_stripped() {
        let checksum = adblock_checksum(b"[Adblock Plus 2.0]\n||ads.example.com^");

        assert_eq!(checksum.len(), 22);
        assert!(!checksum.ends_with('='));
    }

    #[test]
    fn valid_checksum_is_accepted_and_removed() {
        let canonical = "[Adblock Plus 2.0]\n! Title: Test\n||ads.example.com^";
        let downloaded = with_checksum(canonical);

        let data = assemble_payload(downloaded.as_bytes()).unwrap();

        assert_eq!(data, canonical.as_bytes());
    }

    #[test]
    fn tampered_line_fails_verification() {
        let downloaded = with_checksum("[Adblock Plus 2.0]\n||ads.example.com^");
        let tampered = downloaded.replace("ads.example.com", "ads.example.org");

        assert_eq!(
            assemble_payload(tampered.as_bytes()).unwrap_err(),
            ProfileError::Checksum
        );
    }

    #[test]
    fn empty_lines_do_not_affect_the_checksum() {
        let canonical = "[Adblock Plus 2.0]\n||ads.example.com^\n||tracker.net^";
        let checksum = adblock_checksum(canonical.as_bytes());
        let downloaded = format!(
            "[Adblock Plus 2.0]\n\n! Checksum: {checksum}\n||ads.example.com^\n\n\n||tracker.net^\n"
        );

        assert_eq!(assemble_payload(downloaded.as_bytes()).unwrap(), canonical.as_bytes());
    }

    #[test]
    fn list_without_checksum_is_taken_as_is() {
        let downloaded = "[Adblock Plus 2.0]\n||ads.example.com^\n\n||tracker.net^\n";

        let data = assemble_payload(downloaded.as_bytes()).unwrap();

        assert_eq!(data, b"[Adblock Plus 2.0]\n||ads.example.com^\n||tracker.net^");
    }

    #[test]
    fn second_checksum_line_stays_in_the_blob() {
        let canonical = "[Adblock Plus 2.0]\n! Checksum: bogus\n||ads.example.com^";
        let checksum = adblock_checksum(canonical.as_bytes());
        let downloaded = format!(
            "[Adblock Plus 2.0]\n! Checksum: {checksum}\n! Checksum: bogus\n||ads.example.com^"
        );

        assert_eq!(assemble_payload(downloaded.as_bytes()).unwrap(), canonical.as_bytes());
    }

    #[test]
    fn missing_header_is_a_parse_error() {
        assert_eq!(
            assemble_payload(b"||ads.example.com^\n").unwrap_err(),
            ProfileError::Parse
        );
    }

    #[test]
    fn update_header_check_is_case_sensitive() {
        // The cheap load-time scan accepts any casing; the download path
        // requires the canonical `[Adblock` spelling.
        assert_eq!(
            assemble_payload(b"[ADBLOCK PLUS 2.0]\n||x^\n").unwrap_err(),
            ProfileError::Parse
        );
    }
}
