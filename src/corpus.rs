//! Corpus persistence: records file → [`CorpusIndex`] → snapshot file.
//!
//! The records file is the source of truth (a JSON array of
//! [`CorpusRecord`]). The snapshot is a derived binary cache written after
//! the first build and reused on later startups as long as its content key
//! still matches the records.

use std::path::Path;

use anyhow::{Context, Result};

use compliance_harness_core::corpus::{records_key, CorpusIndex};
use compliance_harness_core::models::CorpusRecord;
use compliance_harness_core::snapshot;

/// How [`load_or_build`] obtained the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    Snapshot,
    Built,
    Rebuilt,
}

/// Parse the JSON records file.
pub fn read_records(path: &Path) -> Result<Vec<CorpusRecord>> {
    let content = std::fs::read(path)
        .with_context(|| format!("Failed to read corpus records: {}", path.display()))?;
    let records: Vec<CorpusRecord> = serde_json::from_slice(&content)
        .with_context(|| format!("Failed to parse corpus records: {}", path.display()))?;
    Ok(records)
}

/// Load the index from `snapshot_path`, or build it from `records_path` and
/// persist the snapshot.
///
/// A snapshot whose content key no longer matches the records is rebuilt.
/// When only the snapshot exists it is used as-is.
/// A snapshot that cannot be decoded is rebuilt when the records exist.
pub fn load_or_build(
    snapshot_path: &Path,
    records_path: &Path,
) -> Result<(CorpusIndex, LoadSource)> {
    let have_snapshot = snapshot_path.exists();
    let have_records = records_path.exists();

    match (have_snapshot, have_records) {
        (false, false) => anyhow::bail!(
            "Neither corpus snapshot ({}) nor records ({}) exist",
            snapshot_path.display(),
            records_path.display()
        ),
        (true, false) => {
            let index = read_snapshot(snapshot_path)?;
            tracing::info!(
                entries = index.len(),
                path = %snapshot_path.display(),
                "loaded corpus snapshot (records file absent)"
            );
            Ok((index, LoadSource::Snapshot))
        }
        (false, true) => {
            let records = read_records(records_path)?;
            let index = build_and_persist(records, snapshot_path)?;
            Ok((index, LoadSource::Built))
        }
        (true, true) => {
            let bytes = std::fs::read(snapshot_path).with_context(|| {
                format!("Failed to read corpus snapshot: {}", snapshot_path.display())
            })?;
            let records = read_records(records_path)?;
            let expected = records_key(&records);

            match snapshot::peek_key(&bytes) {
                Ok(key) if key == expected => match snapshot::decode(&bytes) {
                    Ok(index) => {
                        tracing::info!(
                            entries = index.len(),
                            dimension = index.dimension(),
                            "loaded corpus snapshot"
                        );
                        Ok((index, LoadSource::Snapshot))
                    }
                    Err(e) => rebuild_unreadable(records, snapshot_path, &e),
                },
                Ok(_) => {
                    tracing::warn!(
                        path = %snapshot_path.display(),
                        "corpus snapshot is stale; rebuilding from records"
                    );
                    let index = build_and_persist(records, snapshot_path)?;
                    Ok((index, LoadSource::Rebuilt))
                }
                Err(e) => rebuild_unreadable(records, snapshot_path, &e),
            }
        }
    }
}

fn rebuild_unreadable(
    records: Vec<CorpusRecord>,
    snapshot_path: &Path,
    error: &compliance_harness_core::Error,
) -> Result<(CorpusIndex, LoadSource)> {
    tracing::warn!(
        path = %snapshot_path.display(),
        error = %error,
        "unreadable corpus snapshot; rebuilding from records"
    );
    let index = build_and_persist(records, snapshot_path)?;
    Ok((index, LoadSource::Rebuilt))
}

/// Rebuild the index from records and overwrite the snapshot.
pub fn rebuild(snapshot_path: &Path, records_path: &Path) -> Result<CorpusIndex> {
    let records = read_records(records_path)?;
    build_and_persist(records, snapshot_path)
}

/// Decode a snapshot file.
pub fn read_snapshot(path: &Path) -> Result<CorpusIndex> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read corpus snapshot: {}", path.display()))?;
    snapshot::decode(&bytes)
        .with_context(|| format!("Corrupt corpus snapshot: {}", path.display()))
}

fn build_and_persist(records: Vec<CorpusRecord>, snapshot_path: &Path) -> Result<CorpusIndex> {
    let count = records.len();
    let index = CorpusIndex::build(records).context("Failed to build corpus index")?;
    write_snapshot(snapshot_path, &snapshot::encode(&index))?;
    tracing::info!(
        entries = count,
        dimension = index.dimension(),
        path = %snapshot_path.display(),
        "built corpus index"
    );
    Ok(index)
}

/// Write to a sibling temp file, then rename over the target.
fn write_snapshot(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);

    std::fs::write(&tmp, bytes)
        .with_context(|| format!("Failed to write snapshot: {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to replace snapshot: {}", path.display()))?;
    Ok(())
}
