//! Version stamps and version-qualified build artifacts
//!
//! Each published content version leaves these files behind:
//!
//! * `<name>_v<V>.version` in the build directory, holding the record
//! * the same file mirrored into the upload directory
//! * optionally `<name>_v<V>_<timestamp>.record` in the build directory,
//!   listing the package files of that build
//! * `upload_stats.txt` in the upload directory, one uploaded file name per
//!   line
//!
//! Renaming a version must touch all of them consistently, otherwise the
//! deployed client and the deployed content diverge.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Line-oriented list of uploaded files, kept in the upload directory
pub const UPLOAD_STATS_FILE: &str = "upload_stats.txt";

const VERSION_EXTENSION: &str = "version";
const RECORD_EXTENSION: &str = "record";

#[derive(Debug, thiserror::Error)]
pub enum VersionError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Malformed version file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Version file not found: {0}")]
    Missing(PathBuf),

    #[error("{path} records version {found}, expected {expected}")]
    Mismatch {
        path: PathBuf,
        expected: u32,
        found: u32,
    },

    #[error("Version {0} already exists")]
    TargetExists(u32),

    #[error("Cannot rename version {0} onto itself")]
    SameVersion(u32),

    #[error("{count} lines of {path} match '{line}', expected at most one")]
    AmbiguousStats {
        path: PathBuf,
        line: String,
        count: usize,
    },
}

pub type Result<T> = std::result::Result<T, VersionError>;

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> VersionError + '_ {
    move |source| VersionError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// `{version, timestamp}` stamp stored alongside the manifest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub version: u32,
    /// Build time in milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl VersionRecord {
    pub fn new(version: u32, timestamp: i64) -> Self {
        Self { version, timestamp }
    }

    /// The record following this one, stamped at `timestamp`
    pub fn next(&self, timestamp: i64) -> Self {
        Self::new(self.version + 1, timestamp)
    }
}

/// Contents of a build record file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRecord {
    pub version: u32,
    pub timestamp: i64,
    #[serde(default)]
    pub packages: Vec<String>,
}

/// Milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// `<name>_v<V>.version`
pub fn versioned_file_name(name: &str, version: u32) -> String {
    format!("{}_v{}.{}", name, version, VERSION_EXTENSION)
}

/// `<name>_v<V>_<timestamp>.record`
pub fn build_record_file_name(name: &str, version: u32, timestamp: i64) -> String {
    format!("{}_v{}_{}.{}", name, version, timestamp, RECORD_EXTENSION)
}

/// Extract the version from a `<name>_v<V>.version` file name
fn parse_versioned_file_name(name: &str, file_name: &str) -> Option<u32> {
    file_name
        .strip_prefix(name)?
        .strip_prefix("_v")?
        .strip_suffix(".version")?
        .parse()
        .ok()
}

/// Extract `(version, timestamp)` from a `<name>_v<V>_<ts>.record` file name
fn parse_record_file_name(name: &str, file_name: &str) -> Option<(u32, i64)> {
    let rest = file_name
        .strip_prefix(name)?
        .strip_prefix("_v")?
        .strip_suffix(".record")?;
    let (version, timestamp) = rest.split_once('_')?;
    Some((version.parse().ok()?, timestamp.parse().ok()?))
}

/// What a rename touched
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenameReport {
    /// New paths of every renamed file
    pub renamed: Vec<PathBuf>,
    pub stats_line_updated: bool,
}

/// Version bookkeeping over a build directory and its upload mirror
#[derive(Debug, Clone)]
pub struct VersionStore {
    build_dir: PathBuf,
    upload_dir: PathBuf,
}

impl VersionStore {
    pub fn new(build_dir: impl Into<PathBuf>, upload_dir: impl Into<PathBuf>) -> Self {
        Self {
            build_dir: build_dir.into(),
            upload_dir: upload_dir.into(),
        }
    }

    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn stats_path(&self) -> PathBuf {
        self.upload_dir.join(UPLOAD_STATS_FILE)
    }

    /// Read and check a version-qualified record
    pub fn read(&self, name: &str, version: u32) -> Result<VersionRecord> {
        let path = self.build_dir.join(versioned_file_name(name, version));
        let record = read_record(&path)?;
        if record.version != version {
            return Err(VersionError::Mismatch {
                path,
                expected: version,
                found: record.version,
            });
        }
        Ok(record)
    }

    /// All versions published for `name`, ascending
    pub fn versions(&self, name: &str) -> Result<Vec<u32>> {
        let entries = match fs::read_dir(&self.build_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(io_err(&self.build_dir)(err)),
        };

        let mut versions = Vec::new();
        for entry in entries {
            let entry = entry.map_err(io_err(&self.build_dir))?;
            if let Some(version) = entry
                .file_name()
                .to_str()
                .and_then(|file| parse_versioned_file_name(name, file))
            {
                versions.push(version);
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }

    /// The newest published record, if any
    pub fn current(&self, name: &str) -> Result<Option<VersionRecord>> {
        match self.versions(name)?.last() {
            Some(&version) => self.read(name, version).map(Some),
            None => Ok(None),
        }
    }

    /// Publish the next version of `name`.
    ///
    /// Writes the versioned file to both directories, a build record listing
    /// `packages`, and appends the versioned file name plus any package not
    /// yet listed to the upload statistics.
    pub fn publish(&self, name: &str, packages: &[String], timestamp: i64) -> Result<VersionRecord> {
        let record = match self.current(name)? {
            Some(current) => current.next(timestamp),
            None => VersionRecord::new(1, timestamp),
        };

        fs::create_dir_all(&self.build_dir).map_err(io_err(&self.build_dir))?;
        fs::create_dir_all(&self.upload_dir).map_err(io_err(&self.upload_dir))?;

        let file_name = versioned_file_name(name, record.version);
        write_json(&self.build_dir.join(&file_name), &record)?;
        write_json(&self.upload_dir.join(&file_name), &record)?;

        let build_record = BuildRecord {
            version: record.version,
            timestamp: record.timestamp,
            packages: packages.to_vec(),
        };
        write_json(
            &self
                .build_dir
                .join(build_record_file_name(name, record.version, record.timestamp)),
            &build_record,
        )?;

        let stats_path = self.stats_path();
        let mut stats = read_optional(&stats_path)?.unwrap_or_default();
        let listed: Vec<&str> = stats.lines().collect();
        let mut additions: Vec<&str> = packages
            .iter()
            .map(String::as_str)
            .filter(|package| !listed.contains(package))
            .collect();
        additions.push(&file_name);
        let additions = additions.join("\n");

        if !stats.is_empty() && !stats.ends_with('\n') {
            stats.push('\n');
        }
        stats.push_str(&additions);
        stats.push('\n');
        fs::write(&stats_path, stats).map_err(io_err(&stats_path))?;

        log::info!("Published {} version {}", name, record.version);
        Ok(record)
    }

    /// Rename version `from` of `name` to `to`.
    ///
    /// Rewrites the versioned files in the build and upload directories,
    /// renames the build record if one exists, and replaces the single
    /// matching line of the upload statistics. Every other line keeps its
    /// bytes and position.
    pub fn rename(&self, name: &str, from: u32, to: u32) -> Result<RenameReport> {
        if from == to {
            return Err(VersionError::SameVersion(from));
        }

        let old_name = versioned_file_name(name, from);
        let new_name = versioned_file_name(name, to);
        let build_old = self.build_dir.join(&old_name);
        let build_new = self.build_dir.join(&new_name);
        let upload_old = self.upload_dir.join(&old_name);
        let upload_new = self.upload_dir.join(&new_name);

        if !build_old.exists() {
            return Err(VersionError::Missing(build_old));
        }
        if build_new.exists() || upload_new.exists() {
            return Err(VersionError::TargetExists(to));
        }

        // Validate the stats file up front so a failure leaves nothing half renamed
        let stats_path = self.stats_path();
        let stats = read_optional(&stats_path)?;
        let rewritten_stats = match &stats {
            Some(text) => replace_single_line(text, &old_name, &new_name).map_err(|count| {
                VersionError::AmbiguousStats {
                    path: stats_path.clone(),
                    line: old_name.clone(),
                    count,
                }
            })?,
            None => None,
        };

        let record = self.read(name, from)?;
        let renamed_record = VersionRecord::new(to, record.timestamp);

        let mut report = RenameReport::default();

        write_json(&build_new, &renamed_record)?;
        fs::remove_file(&build_old).map_err(io_err(&build_old))?;
        report.renamed.push(build_new);

        if upload_old.exists() {
            write_json(&upload_new, &renamed_record)?;
            fs::remove_file(&upload_old).map_err(io_err(&upload_old))?;
            report.renamed.push(upload_new);
        } else {
            log::warn!("No upload mirror for {} version {}", name, from);
        }

        if let Some((old_record, mut build_record)) = self.find_build_record(name, from)? {
            build_record.version = to;
            let new_record = self
                .build_dir
                .join(build_record_file_name(name, to, build_record.timestamp));
            write_json(&new_record, &build_record)?;
            fs::remove_file(&old_record).map_err(io_err(&old_record))?;
            report.renamed.push(new_record);
        }

        if let Some(text) = rewritten_stats {
            fs::write(&stats_path, text).map_err(io_err(&stats_path))?;
            report.stats_line_updated = true;
        }

        log::info!("Renamed {} version {} to {}", name, from, to);
        Ok(report)
    }

    fn find_build_record(&self, name: &str, version: u32) -> Result<Option<(PathBuf, BuildRecord)>> {
        let entries = fs::read_dir(&self.build_dir).map_err(io_err(&self.build_dir))?;
        for entry in entries {
            let entry = entry.map_err(io_err(&self.build_dir))?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if let Some((found, _)) = parse_record_file_name(name, file_name) {
                if found == version {
                    let path = entry.path();
                    let text = fs::read_to_string(&path).map_err(io_err(&path))?;
                    let record = serde_json::from_str(&text)
                        .map_err(|source| VersionError::Parse { path: path.clone(), source })?;
                    return Ok(Some((path, record)));
                }
            }
        }
        Ok(None)
    }
}

/// Replace the one line equal to `old` with `new`, keeping line endings.
///
/// `Ok(None)` when no line matches, `Err(count)` when several do.
fn replace_single_line(
    text: &str,
    old: &str,
    new: &str,
) -> std::result::Result<Option<String>, usize> {
    let matches = text
        .split_inclusive('\n')
        .filter(|line| strip_line_ending(line) == old)
        .count();
    match matches {
        0 => Ok(None),
        1 => {
            let mut out = String::with_capacity(text.len() + new.len());
            for line in text.split_inclusive('\n') {
                let body = strip_line_ending(line);
                if body == old {
                    out.push_str(new);
                    out.push_str(&line[body.len()..]);
                } else {
                    out.push_str(line);
                }
            }
            Ok(Some(out))
        }
        count => Err(count),
    }
}

fn strip_line_ending(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

fn read_record(path: &Path) -> Result<VersionRecord> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(VersionError::Missing(path.to_path_buf()))
        }
        Err(err) => return Err(io_err(path)(err)),
    };
    serde_json::from_str(&text).map_err(|source| VersionError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(io_err(path)(err)),
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let text = serde_json::to_string(value).map_err(|source| VersionError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, text).map_err(io_err(path))
}
