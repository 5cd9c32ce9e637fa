//! Artifact Registry
//!
//! Tracks every artifact known to a workflow graph: who produces it, who
//! consumes it, and where seed files supplied from outside the graph live
//! on disk.
//!
//! Seed sources may be plain local paths, `file://` URLs or
//! `http(s)://` URLs. Remote files are downloaded into the seed directory,
//! retrying a bounded number of times.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use super::artifact::Artifact;
use super::error::{PlanError, Result};
use super::node::NodeId;

/// Default number of attempts for remote seed downloads.
pub const DEFAULT_RESOLVE_ATTEMPTS: u32 = 3;

/// Default pause between download attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Per-request timeout for remote seed downloads.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Where an artifact comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// Written by a node of the graph
    Produced(NodeId),
    /// Supplied from outside the graph and already present locally
    Seed { url: String, local: PathBuf },
}

/// Registry entry for one artifact.
#[derive(Debug, Clone)]
pub struct ArtifactRecord {
    pub artifact: Artifact,
    pub origin: Origin,
    pub consumers: BTreeSet<NodeId>,
}

impl ArtifactRecord {
    /// Returns the producing node, if any.
    pub fn producer(&self) -> Option<&NodeId> {
        match &self.origin {
            Origin::Produced(id) => Some(id),
            Origin::Seed { .. } => None,
        }
    }

    pub fn is_seed(&self) -> bool {
        matches!(self.origin, Origin::Seed { .. })
    }
}

/// Artifact bookkeeping owned by a single workflow graph.
#[derive(Debug, Clone)]
pub struct ArtifactRegistry {
    records: BTreeMap<String, ArtifactRecord>,
    seed_dir: PathBuf,
    /// Directory relative artifact paths are anchored at
    root: PathBuf,
    max_attempts: u32,
    retry_delay: Duration,
}

impl ArtifactRegistry {
    /// Creates an empty registry downloading remote seeds into `seed_dir`.
    pub fn new(seed_dir: impl Into<PathBuf>) -> Self {
        Self {
            records: BTreeMap::new(),
            seed_dir: seed_dir.into(),
            root: PathBuf::from("."),
            max_attempts: DEFAULT_RESOLVE_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Sets the directory produced artifacts are resolved against.
    pub fn set_root(&mut self, root: impl Into<PathBuf>) {
        self.root = root.into();
    }

    /// Sets the pause between download attempts.
    pub fn set_retry_delay(&mut self, delay: Duration) {
        self.retry_delay = delay;
    }

    /// Sets the number of download attempts for remote seeds (at least one).
    pub fn set_max_attempts(&mut self, attempts: u32) {
        self.max_attempts = attempts.max(1);
    }

    /// Registers `artifact` as produced by `producer`.
    ///
    /// Registering the same artifact again for the same producer is a no-op,
    /// apart from upgrading it to persistent if the new declaration is.
    pub fn register(&mut self, artifact: &Artifact, producer: &NodeId) -> Result<()> {
        let lfn = artifact.lfn();

        if let Some(record) = self.records.get_mut(&lfn) {
            return match &record.origin {
                Origin::Produced(existing) if existing == producer => {
                    if artifact.is_persistent() {
                        record.artifact.persistence = artifact.persistence;
                    }
                    Ok(())
                }
                Origin::Produced(existing) => Err(PlanError::DuplicateArtifact {
                    lfn,
                    existing: existing.to_string(),
                    claimed: producer.to_string(),
                }),
                Origin::Seed { url, .. } => Err(PlanError::DuplicateArtifact {
                    lfn,
                    existing: format!("seed {}", url),
                    claimed: producer.to_string(),
                }),
            };
        }

        debug!("Registered '{}' produced by '{}'", lfn, producer);
        self.records.insert(
            lfn,
            ArtifactRecord {
                artifact: artifact.clone(),
                origin: Origin::Produced(producer.clone()),
                consumers: BTreeSet::new(),
            },
        );
        Ok(())
    }

    /// Fails with `DuplicateArtifact` if anything already claims `lfn`.
    pub fn check_unclaimed(&self, lfn: &str, claimant: &NodeId) -> Result<()> {
        match self.records.get(lfn).map(|r| &r.origin) {
            None => Ok(()),
            Some(Origin::Produced(existing)) => Err(PlanError::DuplicateArtifact {
                lfn: lfn.to_string(),
                existing: existing.to_string(),
                claimed: claimant.to_string(),
            }),
            Some(Origin::Seed { url, .. }) => Err(PlanError::DuplicateArtifact {
                lfn: lfn.to_string(),
                existing: format!("seed {}", url),
                claimed: claimant.to_string(),
            }),
        }
    }

    /// Resolves `url` and registers `artifact` as an external seed.
    ///
    /// Returns the local path the seed resolved to.
    pub fn register_seed(&mut self, artifact: &Artifact, url: &str) -> Result<PathBuf> {
        let lfn = artifact.lfn();

        if let Some(record) = self.records.get(&lfn) {
            return match &record.origin {
                Origin::Seed { url: existing, local } if existing == url => Ok(local.clone()),
                Origin::Seed { url: existing, .. } => Err(PlanError::DuplicateArtifact {
                    lfn,
                    existing: format!("seed {}", existing),
                    claimed: format!("seed {}", url),
                }),
                Origin::Produced(existing) => Err(PlanError::DuplicateArtifact {
                    lfn,
                    existing: existing.to_string(),
                    claimed: format!("seed {}", url),
                }),
            };
        }

        let local = self.fetch(url, &lfn)?;
        info!("Seed '{}' resolved to {}", lfn, local.display());

        self.records.insert(
            lfn,
            ArtifactRecord {
                artifact: artifact.clone(),
                origin: Origin::Seed {
                    url: url.to_string(),
                    local: local.clone(),
                },
                consumers: BTreeSet::new(),
            },
        );
        Ok(local)
    }

    /// Returns the local path for a registered LFN, or fetches `identity_or_url`
    /// as a URL when no artifact by that name is registered.
    ///
    /// Produced artifacts resolve to their storage path anchored at the
    /// registry root, the same location the catalog records.
    pub fn resolve(&self, identity_or_url: &str) -> Result<PathBuf> {
        match self.records.get(identity_or_url) {
            Some(record) => Ok(match &record.origin {
                Origin::Produced(_) => record.artifact.physical_path(&self.root),
                Origin::Seed { local, .. } => local.clone(),
            }),
            None => {
                let name = file_name_of(identity_or_url);
                self.fetch(identity_or_url, &name)
            }
        }
    }

    /// Records `consumer` as reading `lfn`.
    pub fn add_consumer(&mut self, lfn: &str, consumer: &NodeId) {
        if let Some(record) = self.records.get_mut(lfn) {
            record.consumers.insert(consumer.clone());
        }
    }

    pub fn get(&self, lfn: &str) -> Option<&ArtifactRecord> {
        self.records.get(lfn)
    }

    pub fn producer(&self, lfn: &str) -> Option<&NodeId> {
        self.records.get(lfn).and_then(ArtifactRecord::producer)
    }

    /// Iterates records in LFN order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ArtifactRecord)> {
        self.records.iter()
    }

    /// Persistent artifacts, checked for staging at emission time.
    pub fn persistent(&self) -> impl Iterator<Item = &ArtifactRecord> {
        self.records.values().filter(|r| r.artifact.is_persistent())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Makes `url` available locally, naming downloads after `name`.
    fn fetch(&self, url: &str, name: &str) -> Result<PathBuf> {
        if url.starts_with("http://") || url.starts_with("https://") {
            return self.download(url, name);
        }

        let path = url.strip_prefix("file://").unwrap_or(url);
        fs::canonicalize(path).map_err(|e| PlanError::UnresolvedArtifact {
            source_url: url.to_string(),
            attempts: 1,
            reason: e.to_string(),
        })
    }

    /// Downloads a remote file with bounded retries.
    fn download(&self, url: &str, name: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.seed_dir).map_err(|e| PlanError::io(&self.seed_dir, e))?;
        let destination = self.seed_dir.join(name);

        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| PlanError::UnresolvedArtifact {
                source_url: url.to_string(),
                attempts: 0,
                reason: e.to_string(),
            })?;

        let mut reason = String::new();
        for attempt in 1..=self.max_attempts {
            debug!("Downloading {} (attempt {}/{})", url, attempt, self.max_attempts);

            match fetch_into(&client, url, &destination) {
                Ok(bytes) => {
                    debug!("Downloaded {} bytes from {}", bytes, url);
                    return Ok(destination);
                }
                Err(e) => {
                    warn!("Download of {} failed: {}", url, e);
                    reason = e;
                }
            }

            if attempt < self.max_attempts && !self.retry_delay.is_zero() {
                thread::sleep(self.retry_delay);
            }
        }

        // Don't leave a truncated file behind
        let _ = fs::remove_file(&destination);

        Err(PlanError::UnresolvedArtifact {
            source_url: url.to_string(),
            attempts: self.max_attempts,
            reason,
        })
    }
}

/// Streams the body of `url` into `destination`, returning the byte count.
fn fetch_into(
    client: &reqwest::blocking::Client,
    url: &str,
    destination: &Path,
) -> std::result::Result<u64, String> {
    let mut response = client
        .get(url)
        .send()
        .map_err(|e| format!("request failed: {}", e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(format!("server returned HTTP {}", status));
    }

    let mut file = File::create(destination)
        .map_err(|e| format!("cannot create {}: {}", destination.display(), e))?;
    response
        .copy_to(&mut file)
        .map_err(|e| format!("reading response body failed: {}", e))
}

/// Last path component of a URL, ignoring any query string.
fn file_name_of(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    without_query
        .rsplit('/')
        .find(|part| !part.is_empty())
        .unwrap_or("download")
        .to_string()
}
