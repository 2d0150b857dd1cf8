//! On-disk artifact lifecycle
//!
//! Every location key owns one committed model/metadata pair in the model
//! directory, any number of timestamped backup pairs, and at most a few
//! short-lived temp pairs. A new model is first staged as temp files, then
//! promoted with `rename`, so the canonical paths only ever hold complete
//! files. Committed files are never rewritten in place.
//!
//! Layout for key `k`:
//!
//! ```text
//! dengue_model_k.json                         committed model
//! model_metadata_k.json                       committed metadata
//! dengue_model_backup_k_<ts>.json             backup model
//! model_metadata_backup_k_<ts>.json           backup metadata
//! temp_model_k_<ts>.json                      staged model
//! temp_metadata_k_<ts>.json                   staged metadata
//! dengue_model_k.json.rollback                previous model during a commit
//! ```
//!
//! A backup `<ts>` is `YYYYMMDD_HHMMSS_mmm`, with a `_<n>` suffix when more
//! than one backup of a key is taken within the same millisecond.

use crate::data::{WeeklyObservation, FEATURE_COUNT};
use crate::error::{insufficient, ForecastError, Result};
use crate::location::LocationKey;
use chrono::{Local, NaiveDateTime};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use series_math::{NormalizationState, RegressionMetrics};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S_%3f";
const LOAD_ATTEMPTS: usize = 5;
const LOAD_RETRY_DELAY: Duration = Duration::from_millis(20);
const MAX_BACKUPS_PER_TIMESTAMP: u32 = 1000;

static STAGE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Scalers fitted at training time, replayed at prediction time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureScaling {
    /// Rainfall, max temperature, humidity
    pub features: NormalizationState,
    /// Weekly case count
    pub target: NormalizationState,
}

impl FeatureScaling {
    /// Fit both scalers on `observations`
    pub fn fit(observations: &[WeeklyObservation]) -> Result<Self> {
        let features: Vec<[f64; FEATURE_COUNT]> =
            observations.iter().map(WeeklyObservation::features).collect();
        let counts: Vec<u32> = observations.iter().map(|o| o.case_count).collect();

        Ok(Self {
            features: NormalizationState::fit(&features).map_err(insufficient)?,
            target: NormalizationState::fit_column(&counts).map_err(insufficient)?,
        })
    }

    /// Normalized `[rainfall, max_temperature, humidity, cases]` rows
    pub fn model_rows(&self, observations: &[WeeklyObservation]) -> Result<Vec<Vec<f64>>> {
        observations
            .iter()
            .map(|o| -> Result<Vec<f64>> {
                let mut row = self.features.transform_row(&o.features())?;
                row.extend(self.target.transform_row(&[f64::from(o.case_count)])?);
                Ok(row)
            })
            .collect()
    }

    /// Normalized covariates of one week, without the target column
    pub fn feature_row(&self, features: &[f64; FEATURE_COUNT]) -> Result<Vec<f64>> {
        Ok(self.features.transform_row(features)?)
    }

    /// Map a normalized model output back to a case count
    pub fn inverse_target(&self, value: f64) -> Result<f64> {
        Ok(self.target.inverse_value(0, value)?)
    }
}

/// Descriptive metadata stored next to a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// Shared with the model file; ties the two halves of a commit together
    pub artifact_id: String,
    pub location_key: String,
    pub regressor: String,
    pub window_size: usize,
    #[serde(rename = "last_trained", with = "trained_at_format")]
    pub trained_at: NaiveDateTime,
    pub dataset_size: usize,
    pub metrics: RegressionMetrics,
    pub epochs_completed: usize,
    #[serde(default)]
    pub normalization: Option<FeatureScaling>,
}

mod trained_at_format {
    use chrono::NaiveDateTime;
    use serde::{self, Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

    pub fn serialize<S: Serializer>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let s = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&s, FORMAT).map_err(serde::de::Error::custom)
    }
}

#[derive(Serialize, Deserialize)]
struct ModelFile<M> {
    artifact_id: String,
    model: M,
}

/// A committed model loaded from disk
#[derive(Debug, Clone)]
pub struct ModelArtifact<M> {
    pub location_key: LocationKey,
    pub model: M,
    pub metadata: ModelMetadata,
}

/// Staged model and metadata files awaiting commit or discard.
///
/// Dropping it without calling either removes whatever temp files remain.
#[derive(Debug)]
pub struct TempArtifact {
    location_key: LocationKey,
    artifact_id: String,
    model_path: PathBuf,
    metadata_path: PathBuf,
}

impl TempArtifact {
    pub fn location_key(&self) -> &LocationKey {
        &self.location_key
    }

    pub fn artifact_id(&self) -> &str {
        &self.artifact_id
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    pub fn metadata_path(&self) -> &Path {
        &self.metadata_path
    }
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        for path in [&self.model_path, &self.metadata_path] {
            if let Err(err) = fs::remove_file(path) {
                if err.kind() != ErrorKind::NotFound {
                    log::warn!("Could not remove temp file {}: {}", path.display(), err);
                }
            }
        }
    }
}

/// Outcome of backing up the committed pair before an overwrite
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackupInfo {
    pub model_backed_up: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_model_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_metadata_path: Option<PathBuf>,
}

/// A backup pair found in the model directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupPair {
    pub timestamp: String,
    pub model_path: PathBuf,
    pub metadata_path: Option<PathBuf>,
}

/// Committed file locations of one key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedPaths {
    pub model: PathBuf,
    pub metadata: PathBuf,
    /// Copy of the previous model, present only while a commit is in flight
    pub rollback: PathBuf,
}

/// Owner of the model directory
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Open (and create if needed) the model directory
    pub fn open<P: Into<PathBuf>>(root: P) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| ForecastError::artifact_io("open", &root, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Canonical committed paths for `key`
    pub fn committed_paths(&self, key: &LocationKey) -> CommittedPaths {
        CommittedPaths {
            model: self.root.join(format!("dengue_model_{}.json", key)),
            metadata: self.root.join(format!("model_metadata_{}.json", key)),
            rollback: self.root.join(format!("dengue_model_{}.json.rollback", key)),
        }
    }

    fn backup_paths(&self, key: &LocationKey, ts: &str) -> (PathBuf, PathBuf) {
        (
            self.root.join(format!("dengue_model_backup_{}_{}.json", key, ts)),
            self.root.join(format!("model_metadata_backup_{}_{}.json", key, ts)),
        )
    }

    fn temp_paths(&self, key: &LocationKey, ts: &str) -> (PathBuf, PathBuf) {
        (
            self.root.join(format!("temp_model_{}_{}.json", key, ts)),
            self.root.join(format!("temp_metadata_{}_{}.json", key, ts)),
        )
    }

    /// Whether a committed model file exists for `key`
    pub fn has_committed(&self, key: &LocationKey) -> bool {
        self.committed_paths(key).model.exists()
    }

    /// Copy the committed pair to timestamped backup files.
    ///
    /// Nothing committed yet is not an error; the result just reports that
    /// no backup happened. An existing backup is never overwritten: backups
    /// taken within the same millisecond get a numeric suffix.
    pub fn backup_existing(&self, key: &LocationKey) -> Result<BackupInfo> {
        let committed = self.committed_paths(key);
        if !committed.model.exists() {
            return Ok(BackupInfo::default());
        }
        let with_metadata = committed.metadata.exists();
        if !with_metadata {
            log::warn!("Committed model for '{}' has no metadata to back up", key);
        }

        let base = timestamp();
        for n in 0..MAX_BACKUPS_PER_TIMESTAMP {
            let ts = match n {
                0 => base.clone(),
                n => format!("{}_{}", base, n),
            };
            let (backup_model, backup_metadata) = self.backup_paths(key, &ts);
            // A metadata file left without its model still claims the name
            if with_metadata && backup_metadata.exists() {
                continue;
            }

            match copy_new(&committed.model, &backup_model) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(ForecastError::artifact_io("backup", &committed.model, e)),
            }

            let backup_metadata_path = if with_metadata {
                match copy_new(&committed.metadata, &backup_metadata) {
                    Ok(()) => Some(backup_metadata),
                    Err(e) => {
                        remove_quietly(&backup_model);
                        if e.kind() == ErrorKind::AlreadyExists {
                            continue;
                        }
                        return Err(ForecastError::artifact_io("backup", &committed.metadata, e));
                    }
                }
            } else {
                None
            };

            log::info!("Backed up model for '{}' to {}", key, backup_model.display());
            return Ok(BackupInfo {
                model_backed_up: true,
                backup_model_path: Some(backup_model),
                backup_metadata_path,
            });
        }

        Err(ForecastError::artifact_io(
            "backup",
            &self.root,
            io::Error::new(
                ErrorKind::AlreadyExists,
                format!("no free backup name for '{}' at {}", key, base),
            ),
        ))
    }

    /// Write `model` and `metadata` to fresh temp files
    pub fn stage<M: Serialize>(
        &self,
        key: &LocationKey,
        model: &M,
        metadata: &ModelMetadata,
    ) -> Result<TempArtifact> {
        let (model_path, metadata_path) = self.temp_paths(key, &unique_timestamp());
        let temp = TempArtifact {
            location_key: key.clone(),
            artifact_id: metadata.artifact_id.clone(),
            model_path,
            metadata_path,
        };

        // On error `temp` drops here and takes any partial file with it
        write_json(
            &temp.model_path,
            &ModelFile {
                artifact_id: metadata.artifact_id.clone(),
                model,
            },
        )?;
        write_json(&temp.metadata_path, metadata)?;

        log::debug!("Staged artifact {} for '{}'", temp.artifact_id, key);
        Ok(temp)
    }

    /// Promote staged files to the committed paths.
    ///
    /// The model is renamed first and the metadata second. If the second
    /// rename fails the previous committed model is put back, so a failed
    /// commit leaves the old pair in place. If the process dies between the
    /// two renames, [`repair`](Self::repair) puts it back instead.
    pub fn commit(&self, temp: TempArtifact) -> Result<()> {
        let committed = self.committed_paths(&temp.location_key);
        let rollback = &committed.rollback;

        let had_previous = committed.model.exists();
        if had_previous {
            fs::copy(&committed.model, rollback)
                .map_err(|e| ForecastError::artifact_io("commit", &committed.model, e))?;
        }

        if let Err(e) = fs::rename(&temp.model_path, &committed.model) {
            remove_quietly(rollback);
            return Err(ForecastError::artifact_io("commit", &temp.model_path, e));
        }

        if let Err(e) = fs::rename(&temp.metadata_path, &committed.metadata) {
            if had_previous {
                if let Err(restore) = fs::rename(rollback, &committed.model) {
                    log::warn!(
                        "Could not restore previous model for '{}': {}",
                        temp.location_key,
                        restore
                    );
                }
            } else {
                remove_quietly(&committed.model);
            }
            return Err(ForecastError::artifact_io("commit", &temp.metadata_path, e));
        }

        remove_quietly(rollback);
        log::info!(
            "Committed artifact {} for '{}'",
            temp.artifact_id,
            temp.location_key
        );
        Ok(())
    }

    /// Delete staged files without touching the committed pair
    pub fn discard(&self, temp: TempArtifact) -> Result<()> {
        for path in [&temp.model_path, &temp.metadata_path] {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(ForecastError::artifact_io("discard", path, e)),
            }
        }
        log::info!(
            "Discarded artifact {} for '{}'",
            temp.artifact_id,
            temp.location_key
        );
        Ok(())
    }

    /// Read the committed metadata of `key`
    pub fn load_metadata(&self, key: &LocationKey) -> Result<ModelMetadata> {
        let committed = self.committed_paths(key);
        if !committed.model.exists() {
            return Err(ForecastError::ModelNotFound(key.to_string()));
        }
        if !committed.metadata.exists() {
            return Err(ForecastError::MetadataNotFound(key.to_string()));
        }
        read_json(&committed.metadata, "load")
    }

    /// Metrics of the committed model, if one can be read
    pub fn previous_metrics(&self, key: &LocationKey) -> Option<RegressionMetrics> {
        match self.load_metadata(key) {
            Ok(metadata) => Some(metadata.metrics),
            Err(e) if e.requires_training() => None,
            Err(e) => {
                log::warn!("Ignoring unreadable metadata for '{}': {}", key, e);
                None
            }
        }
    }

    /// Load the committed pair of `key`.
    ///
    /// A commit running concurrently can leave the two files briefly out of
    /// step; the read is retried until both carry the same artifact id.
    pub fn load<M: DeserializeOwned>(&self, key: &LocationKey) -> Result<ModelArtifact<M>> {
        let committed = self.committed_paths(key);

        for attempt in 1..=LOAD_ATTEMPTS {
            let metadata = self.load_metadata(key)?;
            let file: ModelFile<M> = read_json(&committed.model, "load")?;

            if file.artifact_id == metadata.artifact_id {
                return Ok(ModelArtifact {
                    location_key: key.clone(),
                    model: file.model,
                    metadata,
                });
            }

            log::debug!(
                "Artifact halves for '{}' disagree (attempt {}), retrying",
                key,
                attempt
            );
            thread::sleep(LOAD_RETRY_DELAY);
        }

        Err(ForecastError::InconsistentArtifact {
            location_key: key.to_string(),
            message: "model and metadata belong to different commits".to_string(),
        })
    }

    /// Finish the cleanup of a commit that stopped between its two renames.
    ///
    /// Such a commit leaves the new model next to the old metadata, with the
    /// old model still in the rollback file. When the rollback file matches
    /// the committed metadata it is moved back over the model and `true` is
    /// returned. A rollback file next to a consistent pair is stale and is
    /// removed. Call this while holding the key's write lock: a commit in
    /// progress looks exactly like an interrupted one.
    pub fn repair(&self, key: &LocationKey) -> Result<bool> {
        let committed = self.committed_paths(key);
        if !committed.rollback.exists() {
            return Ok(false);
        }

        let metadata: Option<ModelMetadata> = read_json(&committed.metadata, "repair").ok();
        let model_id = read_artifact_id(&committed.model);
        let rollback_id = read_artifact_id(&committed.rollback);

        match metadata.map(|m| m.artifact_id) {
            Some(id) if model_id.as_deref() == Some(id.as_str()) => {
                log::debug!("Removing stale rollback file for '{}'", key);
                remove_quietly(&committed.rollback);
                Ok(false)
            }
            Some(id) if rollback_id.as_deref() == Some(id.as_str()) => {
                fs::rename(&committed.rollback, &committed.model)
                    .map_err(|e| ForecastError::artifact_io("repair", &committed.rollback, e))?;
                log::warn!(
                    "Restored model {} for '{}' after an interrupted commit",
                    id,
                    key
                );
                Ok(true)
            }
            _ => {
                log::warn!(
                    "Rollback file for '{}' matches neither committed file; leaving it in place",
                    key
                );
                Ok(false)
            }
        }
    }

    /// Backup pairs of `key`, newest first
    pub fn list_backups(&self, key: &LocationKey) -> Result<Vec<BackupPair>> {
        let prefix = format!("dengue_model_backup_{}_", key);
        let entries =
            fs::read_dir(&self.root).map_err(|e| ForecastError::artifact_io("list", &self.root, e))?;

        let mut backups = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| ForecastError::artifact_io("list", &self.root, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let ts = match name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(".json"))
            {
                Some(ts) if backup_order(ts).is_some() => ts.to_string(),
                _ => continue,
            };

            let (model_path, metadata_path) = self.backup_paths(key, &ts);
            let metadata_path = metadata_path.exists().then_some(metadata_path);
            backups.push(BackupPair {
                timestamp: ts,
                model_path,
                metadata_path,
            });
        }

        backups.sort_by(|a, b| backup_order(&b.timestamp).cmp(&backup_order(&a.timestamp)));
        Ok(backups)
    }

    /// Promote a backup pair back to committed, through the same stage and
    /// rename path as a fresh model
    pub fn restore_backup(&self, key: &LocationKey, backup: &BackupPair) -> Result<()> {
        let metadata_source = backup.metadata_path.as_ref().ok_or_else(|| {
            ForecastError::MetadataNotFound(format!("{} (backup {})", key, backup.timestamp))
        })?;

        let (model_path, metadata_path) = self.temp_paths(key, &unique_timestamp());
        let metadata: ModelMetadata = read_json(metadata_source, "restore")?;
        let temp = TempArtifact {
            location_key: key.clone(),
            artifact_id: metadata.artifact_id,
            model_path,
            metadata_path,
        };

        fs::copy(&backup.model_path, &temp.model_path)
            .map_err(|e| ForecastError::artifact_io("restore", &backup.model_path, e))?;
        fs::copy(metadata_source, &temp.metadata_path)
            .map_err(|e| ForecastError::artifact_io("restore", metadata_source, e))?;

        log::info!("Restoring backup {} for '{}'", backup.timestamp, key);
        self.commit(temp)
    }
}

/// Fresh artifact id for a model trained now
pub fn new_artifact_id(key: &LocationKey) -> String {
    format!("{}-{}", key, unique_timestamp())
}

fn timestamp() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

fn unique_timestamp() -> String {
    let n = STAGE_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{}_{}", timestamp(), n)
}

/// `YYYYMMDD_HHMMSS_mmm`
fn is_timestamp(s: &str) -> bool {
    s.len() == 19
        && s.char_indices().all(|(i, c)| match i {
            8 | 15 => c == '_',
            _ => c.is_ascii_digit(),
        })
}

/// Sort key of a backup timestamp, `YYYYMMDD_HHMMSS_mmm` or
/// `YYYYMMDD_HHMMSS_mmm_<n>`
fn backup_order(ts: &str) -> Option<(&str, u32)> {
    let base = ts.get(..19).filter(|base| is_timestamp(base))?;
    match &ts[19..] {
        "" => Some((base, 0)),
        rest => {
            let n = rest.strip_prefix('_')?;
            if n.is_empty() || !n.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            Some((base, n.parse().ok()?))
        }
    }
}

/// Copy `source` to `dest`, failing with `AlreadyExists` instead of
/// replacing a file that is already there
fn copy_new(source: &Path, dest: &Path) -> io::Result<()> {
    let mut input = File::open(source)?;
    let mut output = OpenOptions::new().write(true).create_new(true).open(dest)?;
    let copied = io::copy(&mut input, &mut output).and_then(|_| output.sync_all());
    if copied.is_err() {
        remove_quietly(dest);
    }
    copied
}

fn read_artifact_id(path: &Path) -> Option<String> {
    read_json::<ModelFile<IgnoredAny>>(path, "repair")
        .ok()
        .map(|file| file.artifact_id)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path).map_err(|e| ForecastError::artifact_io("stage", path, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer
        .flush()
        .map_err(|e| ForecastError::artifact_io("stage", path, e))?;
    writer
        .get_ref()
        .sync_all()
        .map_err(|e| ForecastError::artifact_io("stage", path, e))
}

fn read_json<T: DeserializeOwned>(path: &Path, stage: &'static str) -> Result<T> {
    let file = File::open(path).map_err(|e| ForecastError::artifact_io(stage, path, e))?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != ErrorKind::NotFound {
            log::warn!("Could not remove {}: {}", path.display(), e);
        }
    }
}
