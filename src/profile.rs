//! Profile management: one [`AdblockProfile`] owns a filter list file on
//! disk, its parsed in-memory form and its update schedule.
//!
//! A profile belongs to the thread that constructed it: mutators, update
//! scheduling and event pumping run there. `check_url` and
//! `get_cosmetic_filters` may be called from any number of reader threads
//! once rules are loaded; the compiled [`Blocker`] is published through an
//! atomic pointer swap, so a match in flight always sees one consistent
//! snapshot.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};

use arc_swap::ArcSwapOption;
use bitflags::bitflags;
use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::blocker::{Blocker, CheckResult};
use crate::cosmetic_filter_cache::CosmeticFiltersResult;
use crate::lists::{self, ParseOptions};
use crate::request::{Request, ResourceType};
use crate::updater::{self, DataFetchJob, DataFetchJobFactory, FetchEvent};
use crate::utils;

/// Sentinel language for profiles that apply regardless of locale.
pub const LANGUAGE_ANY: &str = "any";

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ProfileFlags: u32 {
        const HAS_CUSTOM_TITLE = 1 << 0;
        const HAS_CUSTOM_UPDATE_URL = 1 << 1;
    }
}

impl Default for ProfileFlags {
    fn default() -> ProfileFlags {
        ProfileFlags::empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProfileCategory {
    #[default]
    Other,
    Advertisements,
    Annoyance,
    Privacy,
    Regional,
}

/// Errors surfaced to the host; a profile without one is healthy.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProfileError {
    #[error("failed to read content filtering profile: {0}")]
    Read(String),
    #[error("failed to download content filtering profile: {0}")]
    Download(String),
    #[error("checksum mismatch in downloaded content filtering profile")]
    Checksum,
    #[error("invalid content filtering profile header")]
    Parse,
}

/// Notifications delivered on the channel returned at construction.
#[derive(Debug, Clone, PartialEq)]
pub enum ProfileEvent {
    /// Observable profile state changed (metadata, error, update cycle).
    Modified,
    /// Download progress of a running update, in percent.
    UpdateProgress(i32),
    /// A reader thread found the profile empty and wants the owning
    /// thread to call [`AdblockProfile::update`].
    UpdateRequired,
}

/// Construction-time metadata of a profile.
#[derive(Debug, Clone, Default)]
pub struct ProfileSummary {
    pub name: String,
    pub title: String,
    pub update_url: Option<String>,
    pub last_update: Option<DateTime<Utc>>,
    pub languages: Vec<String>,
    /// Days between automatic updates; 0 disables them.
    pub update_interval: i64,
    pub category: ProfileCategory,
    pub flags: ProfileFlags,
}

/// The capability set every content filtering profile variant offers,
/// whatever its list format. Hosts keep profiles as trait objects so
/// other formats (e.g. hosts files) can sit next to Adblock lists.
pub trait ContentFiltersProfile: Send + Sync {
    fn name(&self) -> &str;
    fn title(&self) -> String;
    fn category(&self) -> ProfileCategory;
    fn flags(&self) -> ProfileFlags;
    fn error(&self) -> Option<ProfileError>;
    fn languages(&self) -> &[String];
    fn last_update(&self) -> Option<DateTime<Utc>>;
    fn update_url(&self) -> Option<&str>;
    fn update_interval(&self) -> i64;
    fn is_updating(&self) -> bool;
    fn update_progress(&self) -> i32;

    fn check_url(
        &self,
        base_url: &str,
        request_url: &str,
        resource_type: ResourceType,
    ) -> CheckResult;

    fn get_cosmetic_filters(
        &self,
        domains: &[String],
        is_domain_only: bool,
    ) -> CosmeticFiltersResult;

    fn update(&mut self, url: Option<&str>) -> bool;
    fn remove(&mut self) -> bool;
}

pub struct AdblockProfile {
    name: String,
    title: String,
    update_url: Option<String>,
    last_update: Option<DateTime<Utc>>,
    languages: Vec<String>,
    update_interval: i64,
    category: ProfileCategory,
    flags: ProfileFlags,
    data_dir: PathBuf,
    parse_options: ParseOptions,

    error: Mutex<Option<ProfileError>>,
    is_empty: AtomicBool,
    was_loaded: AtomicBool,
    blocker: ArcSwapOption<Blocker>,

    fetcher: Box<dyn DataFetchJobFactory>,
    job: Option<Box<dyn DataFetchJob>>,
    job_events: Option<Receiver<FetchEvent>>,
    update_progress: i32,

    events: Sender<ProfileEvent>,
    owner: ThreadId,
}

impl AdblockProfile {
    /// Builds a profile over `<data_dir>/contentBlocking/<name>.txt`,
    /// scans the file header and schedules an update when the list is
    /// older than its interval. Returns the profile together with the
    /// receiving end of its notification channel.
    pub fn new(
        summary: ProfileSummary,
        data_dir: &Path,
        parse_options: ParseOptions,
        fetcher: Box<dyn DataFetchJobFactory>,
    ) -> (AdblockProfile, Receiver<ProfileEvent>) {
        let (events, receiver) = crossbeam_channel::unbounded();

        let languages = if summary.languages.is_empty() {
            vec![LANGUAGE_ANY.to_owned()]
        } else {
            summary.languages
        };

        let mut profile = AdblockProfile {
            name: summary.name,
            title: summary.title,
            update_url: summary.update_url,
            last_update: summary.last_update,
            languages,
            update_interval: summary.update_interval,
            category: summary.category,
            flags: summary.flags,
            data_dir: data_dir.to_owned(),
            parse_options,
            error: Mutex::new(None),
            is_empty: AtomicBool::new(true),
            was_loaded: AtomicBool::new(false),
            blocker: ArcSwapOption::empty(),
            fetcher,
            job: None,
            job_events: None,
            update_progress: -1,
            events,
            owner: thread::current().id(),
        };

        profile.load_header();

        (profile, receiver)
    }

    /// Creates the profile file (Adblock header plus `! Title:` line and
    /// any initial rules) and constructs the profile over it. Without
    /// initial rules, a valid update URL triggers an immediate download.
    pub fn create(
        summary: ProfileSummary,
        data_dir: &Path,
        parse_options: ParseOptions,
        fetcher: Box<dyn DataFetchJobFactory>,
        initial_rules: Option<&[u8]>,
        can_overwrite_existing: bool,
    ) -> Result<(AdblockProfile, Receiver<ProfileEvent>), ProfileError> {
        let path = profile_path(data_dir, &summary.name);

        if !can_overwrite_existing && path.exists() {
            return Err(ProfileError::Read("file already exists".to_owned()));
        }

        let mut contents = format!("[AdBlock Plus 2.0]\n! Title: {}\n", summary.title).into_bytes();

        if let Some(rules) = initial_rules {
            contents.extend_from_slice(rules);
        }

        utils::write_atomic(&path, &contents)
            .map_err(|io_error| ProfileError::Read(io_error.to_string()))?;

        let wants_update = initial_rules.is_none() && summary.update_url.is_some();
        let (mut profile, receiver) = AdblockProfile::new(summary, data_dir, parse_options, fetcher);

        if wants_update && !profile.is_updating() {
            profile.update(None);
        }

        Ok((profile, receiver))
    }

    pub fn path(&self) -> PathBuf {
        profile_path(&self.data_dir, &self.name)
    }

    fn load_header(&mut self) {
        match lists::load_header(&self.path()) {
            Ok(information) => {
                if !self.flags.contains(ProfileFlags::HAS_CUSTOM_TITLE) {
                    if let Some(title) = information.title {
                        self.title = title;
                    }
                }

                self.is_empty.store(information.is_empty, Ordering::Release);
            }
            Err(profile_error) => {
                self.raise_error(profile_error);
                return;
            }
        }

        let is_stale = self
            .last_update
            .map_or(true, |last| (Utc::now() - last).num_days() > self.update_interval);

        if self.job.is_none() && self.update_interval > 0 && is_stale {
            self.update(None);
        }
    }

    /// Parses the on-disk list into a fresh [`Blocker`] and publishes it.
    /// An empty profile with an update URL asks for an update instead and
    /// reports `false` (not yet loaded).
    pub fn load_rules(&mut self) -> bool {
        *self.error.lock().expect("profile error mutex") = None;

        if self.is_empty.load(Ordering::Acquire) && self.update_url.is_some() {
            self.update(None);
            return false;
        }

        self.build_blocker()
    }

    // Lazy-load variant for reader threads: they cannot start a fetch
    // job, so an empty profile emits `UpdateRequired` for the owner.
    fn load_rules_shared(&self) -> bool {
        *self.error.lock().expect("profile error mutex") = None;

        if self.is_empty.load(Ordering::Acquire) && self.update_url.is_some() {
            let _ = self.events.send(ProfileEvent::UpdateRequired);
            return false;
        }

        self.build_blocker()
    }

    fn build_blocker(&self) -> bool {
        self.was_loaded.store(true, Ordering::Release);

        let blocker = match fs::File::open(self.path()) {
            Ok(file) => {
                match lists::parse_filter_list(io::BufReader::new(file), self.parse_options) {
                    Ok(blocker) => blocker,
                    Err(io_error) => {
                        warn!(profile = %self.name, error = %io_error, "failed to read profile rules");
                        Blocker::default()
                    }
                }
            }
            Err(io_error) => {
                warn!(profile = %self.name, error = %io_error, "failed to open profile file");
                Blocker::default()
            }
        };

        debug!(profile = %self.name, "content filtering rules loaded");
        self.blocker.store(Some(Arc::new(blocker)));

        true
    }

    /// Drops the compiled rules without blocking the caller; tearing down
    /// a large trie is deferred to a background thread. Readers that
    /// already hold the old snapshot finish their match on it.
    pub fn clear(&mut self) {
        if !self.was_loaded.load(Ordering::Acquire) {
            return;
        }

        if let Some(blocker) = self.blocker.swap(None) {
            thread::spawn(move || drop(blocker));
        }

        self.was_loaded.store(false, Ordering::Release);
    }

    /// Starts a download of the list. Only valid on the owning thread and
    /// while no other update is running; otherwise a no-op returning
    /// `false`.
    pub fn update(&mut self, url: Option<&str>) -> bool {
        if self.job.is_some() || thread::current().id() != self.owner {
            return false;
        }

        let update_url = match url.or(self.update_url.as_deref()) {
            Some(update_url) if !update_url.is_empty() => update_url.to_owned(),
            _ => {
                self.raise_error(ProfileError::Download("update URL is empty".to_owned()));
                return false;
            }
        };

        if Url::parse(&update_url).is_err() {
            self.raise_error(ProfileError::Download(format!(
                "update URL ({update_url}) is invalid"
            )));
            return false;
        }

        let (sender, receiver) = crossbeam_channel::unbounded();
        let mut job = self.fetcher.create_job(&update_url);
        job.start(sender);

        self.job = Some(job);
        self.job_events = Some(receiver);
        self.update_progress = 0;
        let _ = self.events.send(ProfileEvent::Modified);

        true
    }

    /// Pumps pending fetch-job events; call on the owning thread whenever
    /// the host is notified that the job made progress or finished.
    pub fn poll_update(&mut self) {
        let receiver = match &self.job_events {
            Some(receiver) => receiver.clone(),
            None => return,
        };

        while let Ok(event) = receiver.try_recv() {
            match event {
                FetchEvent::Progress(progress) => {
                    self.update_progress = progress;
                    let _ = self.events.send(ProfileEvent::UpdateProgress(progress));
                }
                FetchEvent::Finished(result) => {
                    self.handle_job_finished(result);
                    return;
                }
            }
        }
    }

    fn handle_job_finished(&mut self, result: Result<Vec<u8>, String>) {
        self.job = None;
        self.job_events = None;
        self.update_progress = -1;

        let bytes = match result {
            Ok(bytes) => bytes,
            Err(message) => {
                self.raise_error(ProfileError::Download(message));
                return;
            }
        };

        let data = match updater::assemble_payload(&bytes) {
            Ok(data) => data,
            Err(profile_error) => {
                self.raise_error(profile_error);
                return;
            }
        };

        let previous_update = self.last_update;
        self.last_update = Some(Utc::now());

        if let Err(io_error) = utils::write_atomic(&self.path(), &data) {
            error!(profile = %self.name, error = %io_error, "failed to commit updated profile");
            // Keep the stale timestamp so the next interval check retries.
            self.last_update = previous_update;
            return;
        }

        info!(profile = %self.name, "content filtering profile updated");

        let had_rules_loaded = self.was_loaded.load(Ordering::Acquire);

        self.clear();
        self.load_header();

        if had_rules_loaded {
            self.load_rules();
        }

        let _ = self.events.send(ProfileEvent::Modified);
    }

    /// Cancels any running update and deletes the profile's file.
    pub fn remove(&mut self) -> bool {
        if let Some(mut job) = self.job.take() {
            job.cancel();
        }

        self.job_events = None;
        self.update_progress = -1;

        let path = self.path();

        if path.exists() {
            return fs::remove_file(path).is_ok();
        }

        true
    }

    fn raise_error(&self, profile_error: ProfileError) {
        error!(profile = %self.name, error = %profile_error, "content filtering profile error");
        *self.error.lock().expect("profile error mutex") = Some(profile_error);
        let _ = self.events.send(ProfileEvent::Modified);
    }

    pub fn check_url(
        &self,
        base_url: &str,
        request_url: &str,
        resource_type: ResourceType,
    ) -> CheckResult {
        if !self.was_loaded.load(Ordering::Acquire) && !self.load_rules_shared() {
            return CheckResult::default();
        }

        let request = match Request::from_urls(base_url, request_url, resource_type) {
            Ok(request) => request,
            Err(_) => return CheckResult::default(),
        };

        match self.blocker.load_full() {
            Some(blocker) => blocker.check(&request),
            None => CheckResult::default(),
        }
    }

    pub fn get_cosmetic_filters(
        &self,
        domains: &[String],
        is_domain_only: bool,
    ) -> CosmeticFiltersResult {
        if !self.was_loaded.load(Ordering::Acquire) {
            self.load_rules_shared();
        }

        match self.blocker.load_full() {
            Some(blocker) => blocker.cosmetic_filters(domains, is_domain_only),
            None => CosmeticFiltersResult::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn title(&self) -> String {
        if self.title.is_empty() {
            "(Unknown)".to_owned()
        } else {
            self.title.clone()
        }
    }

    pub fn set_title(&mut self, title: &str) {
        if title != self.title {
            self.title = title.to_owned();
            self.flags |= ProfileFlags::HAS_CUSTOM_TITLE;
            let _ = self.events.send(ProfileEvent::Modified);
        }
    }

    pub fn update_url(&self) -> Option<&str> {
        self.update_url.as_deref()
    }

    pub fn set_update_url(&mut self, url: &str) {
        if Url::parse(url).is_ok() && self.update_url.as_deref() != Some(url) {
            self.update_url = Some(url.to_owned());
            self.flags |= ProfileFlags::HAS_CUSTOM_UPDATE_URL;
            let _ = self.events.send(ProfileEvent::Modified);
        }
    }

    pub fn category(&self) -> ProfileCategory {
        self.category
    }

    pub fn set_category(&mut self, category: ProfileCategory) {
        if category != self.category {
            self.category = category;
            let _ = self.events.send(ProfileEvent::Modified);
        }
    }

    pub fn update_interval(&self) -> i64 {
        self.update_interval
    }

    pub fn set_update_interval(&mut self, interval: i64) {
        if interval != self.update_interval {
            self.update_interval = interval;
            let _ = self.events.send(ProfileEvent::Modified);
        }
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update
    }

    pub fn languages(&self) -> &[String] {
        &self.languages
    }

    pub fn flags(&self) -> ProfileFlags {
        self.flags
    }

    pub fn error(&self) -> Option<ProfileError> {
        self.error.lock().expect("profile error mutex").clone()
    }

    pub fn is_empty(&self) -> bool {
        self.is_empty.load(Ordering::Acquire)
    }

    pub fn was_loaded(&self) -> bool {
        self.was_loaded.load(Ordering::Acquire)
    }

    pub fn is_updating(&self) -> bool {
        self.job.is_some()
    }

    /// Download progress in percent, or -1 when no update is running.
    pub fn update_progress(&self) -> i32 {
        self.update_progress
    }
}

impl ContentFiltersProfile for AdblockProfile {
    fn name(&self) -> &str {
        AdblockProfile::name(self)
    }

    fn title(&self) -> String {
        AdblockProfile::title(self)
    }

    fn category(&self) -> ProfileCategory {
        AdblockProfile::category(self)
    }

    fn flags(&self) -> ProfileFlags {
        AdblockProfile::flags(self)
    }

    fn error(&self) -> Option<ProfileError> {
        AdblockProfile::error(self)
    }

    fn languages(&self) -> &[String] {
        AdblockProfile::languages(self)
    }

    fn last_update(&self) -> Option<DateTime<Utc>> {
        AdblockProfile::last_update(self)
    }

    fn update_url(&self) -> Option<&str> {
        AdblockProfile::update_url(self)
    }

    fn update_interval(&self) -> i64 {
        AdblockProfile::update_interval(self)
    }

    fn is_updating(&self) -> bool {
        AdblockProfile::is_updating(self)
    }

    fn update_progress(&self) -> i32 {
        AdblockProfile::update_progress(self)
    }

    fn check_url(
        &self,
        base_url: &str,
        request_url: &str,
        resource_type: ResourceType,
    ) -> CheckResult {
        AdblockProfile::check_url(self, base_url, request_url, resource_type)
    }

    fn get_cosmetic_filters(
        &self,
        domains: &[String],
        is_domain_only: bool,
    ) -> CosmeticFiltersResult {
        AdblockProfile::get_cosmetic_filters(self, domains, is_domain_only)
    }

    fn update(&mut self, url: Option<&str>) -> bool {
        AdblockProfile::update(self, url)
    }

    fn remove(&mut self) -> bool {
        AdblockProfile::remove(self)
    }
}

pub(crate) fn profile_path(data_dir: &Path, name: &str) -> PathBuf {
    data_dir.join("contentBlocking").join(format!("{name}.txt"))
}
