//! Artifact Data Model
//!
//! Data files flowing between nodes of a workflow. Every artifact has a
//! logical file name (LFN) derived from its identity:
//!
//! ```text
//! {IFOS}-{DESCRIPTION}[_{TAG}...]-{START}-{DURATION}{EXT}
//! ```
//!
//! For example an artifact produced by `inference` for `H1L1` over
//! `[1000, 1064)` with tag `a` and extension `.hdf` is named
//! `H1L1-INFERENCE_A-1000-64.hdf`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Half-open analysis time interval `[start, end)` in integer seconds.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(try_from = "(i64, i64)", into = "(i64, i64)")]
pub struct Segment {
    start: i64,
    end: i64,
}

impl Segment {
    /// Creates a segment, swapping the bounds if given in reverse.
    ///
    /// A span wider than `i64::MAX` seconds is cut short at the end so
    /// that its duration stays representable; use [`Segment::try_new`]
    /// to reject such spans instead.
    pub fn new(start: i64, end: i64) -> Self {
        let (start, end) = if end < start { (end, start) } else { (start, end) };
        Self {
            start,
            end: end.min(start.saturating_add(i64::MAX)),
        }
    }

    /// Creates a segment, failing on reversed bounds or on a span whose
    /// duration does not fit in an `i64`.
    pub fn try_new(start: i64, end: i64) -> Result<Self, String> {
        if end < start {
            return Err(format!("Segment end {} is before start {}", end, start));
        }
        if end.checked_sub(start).is_none() {
            return Err(format!(
                "Segment [{}, {}) is too long to express in seconds",
                start, end
            ));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> i64 {
        self.start
    }

    pub fn end(&self) -> i64 {
        self.end
    }

    pub fn duration(&self) -> i64 {
        self.end - self.start
    }
}

impl TryFrom<(i64, i64)> for Segment {
    type Error = String;

    fn try_from((start, end): (i64, i64)) -> Result<Self, Self::Error> {
        Self::try_new(start, end)
    }
}

impl From<Segment> for (i64, i64) {
    fn from(segment: Segment) -> Self {
        (segment.start, segment.end)
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Whether an output is kept after the run.
///
/// Interpreted by the external stager only; the planner just tags outputs.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Retention {
    /// Removed once no consumer needs it
    Discard,
    /// Kept as an intermediate product
    #[default]
    Intermediate,
    /// Kept as a final deliverable
    Final,
}

impl FromStr for Retention {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "discard" => Ok(Self::Discard),
            "intermediate" => Ok(Self::Intermediate),
            "final" => Ok(Self::Final),
            other => Err(format!("Unknown retention level: '{}'", other)),
        }
    }
}

impl fmt::Display for Retention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Discard => "discard",
            Self::Intermediate => "intermediate",
            Self::Final => "final",
        };
        f.write_str(name)
    }
}

/// Where an artifact has to live once its producer finishes.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Persistence {
    /// Local to the producing job's working directory
    #[default]
    Transient,
    /// Must be staged out of any sub-workflow into durable storage
    Persistent,
}

/// A data file flowing between workflow nodes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct Artifact {
    /// Producer tag set, e.g. `H1L1`
    pub ifos: String,
    /// Logical name, usually the producing executable's name
    pub description: String,
    /// Analysis time the artifact covers
    pub segment: Segment,
    /// File extension including the leading dot
    pub extension: String,
    /// Directory the artifact is stored in
    pub directory: PathBuf,
    /// Extra tags distinguishing artifacts of the same producer
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub persistence: Persistence,
    #[serde(default)]
    pub retention: Retention,
}

impl Artifact {
    /// Creates a transient artifact with no tags.
    pub fn new(
        ifos: impl Into<String>,
        description: impl Into<String>,
        segment: Segment,
        extension: impl Into<String>,
        directory: impl Into<PathBuf>,
    ) -> Self {
        Self {
            ifos: ifos.into().trim().to_string(),
            description: description.into().trim().to_string(),
            segment,
            extension: normalize_extension(&extension.into()),
            directory: directory.into(),
            tags: Vec::new(),
            persistence: Persistence::Transient,
            retention: Retention::default(),
        }
    }

    /// Sets the tag list.
    pub fn with_tags<S: AsRef<str>>(mut self, tags: &[S]) -> Self {
        self.tags = tags.iter().map(|t| t.as_ref().trim().to_string()).collect();
        self
    }

    /// Sets the retention level.
    pub fn with_retention(mut self, retention: Retention) -> Self {
        self.retention = retention;
        self
    }

    /// Marks the artifact as persistent.
    pub fn persistent(mut self) -> Self {
        self.persistence = Persistence::Persistent;
        self
    }

    pub fn is_persistent(&self) -> bool {
        self.persistence == Persistence::Persistent
    }

    /// Returns the logical file name.
    pub fn lfn(&self) -> String {
        let mut description = sanitize(&self.description);
        for tag in self.tags.iter().filter(|t| !t.is_empty()) {
            description.push('_');
            description.push_str(&sanitize(tag));
        }

        format!(
            "{}-{}-{}-{}{}",
            self.ifos,
            description,
            self.segment.start(),
            self.segment.duration(),
            self.extension
        )
    }

    /// Returns where the artifact is stored: `{directory}/{lfn}`.
    pub fn storage_path(&self) -> PathBuf {
        self.directory.join(self.lfn())
    }

    /// Returns the storage path, anchoring a relative directory at `root`.
    pub fn physical_path(&self, root: &Path) -> PathBuf {
        let path = self.storage_path();
        if path.is_absolute() {
            path
        } else {
            root.join(path)
        }
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.lfn())
    }
}

/// Upper-cases a name component and keeps dashes out of it.
fn sanitize(part: &str) -> String {
    part.trim().to_uppercase().replace('-', "_")
}

fn normalize_extension(extension: &str) -> String {
    let extension = extension.trim();
    if extension.is_empty() || extension.starts_with('.') {
        extension.to_string()
    } else {
        format!(".{}", extension)
    }
}
