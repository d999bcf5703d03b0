//! Verify: reconstruct a reproducible random sample of archives and report
//! each one that fails. Nothing is repaired.

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::archive::Archive;
use crate::config::VerifyOptions;
use crate::error::{RepoError, RepoResult};
use crate::progress::{Progress, TaskHandle};
use crate::reader::ArchiveReader;
use crate::snapshot::Snapshot;

/// What a verify pass covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerifyScope {
    /// Every snapshot of every volume
    Repository,
    /// Every snapshot of one volume (id or unique prefix)
    Volume(String),
    /// One snapshot (id or unique prefix)
    Snapshot(String),
}

/// Why an archive failed to verify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// Data rebuilt but did not match its hash
    Corruption,
    /// Too few pieces were reachable
    Reconstruction,
    /// Backend or codec failure of another kind
    Other,
}

impl FailureKind {
    fn of(err: &RepoError) -> Self {
        match err {
            RepoError::Corruption { .. } => FailureKind::Corruption,
            RepoError::Redundancy { .. } => FailureKind::Reconstruction,
            _ => FailureKind::Other,
        }
    }
}

/// Per-archive verify result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyEvent {
    /// The archive rebuilt and matched
    Verified {
        /// Snapshot holding the archive
        snapshot: String,
        /// Archive path
        path: String,
        /// Bytes checked
        size: u64,
    },
    /// The archive could not be rebuilt intact
    Failed {
        /// Snapshot holding the archive
        snapshot: String,
        /// Archive path
        path: String,
        /// Failure class
        kind: FailureKind,
        /// Error text
        message: String,
    },
}

/// Totals of a verify pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyReport {
    /// Archives reconstructed
    pub checked: usize,
    /// Archives that failed
    pub errors: usize,
}

/// File archives of `snapshots`, ordered by (snapshot id, path), reduced to
/// the sample `opts` selects. The same options over the same archives always
/// pick the same sample.
pub fn select_sample<'a>(snapshots: &'a [Snapshot], opts: &VerifyOptions) -> RepoResult<Vec<(&'a str, &'a Archive)>> {
    if opts.percentage > 100 {
        return Err(RepoError::Configuration(format!(
            "verify percentage {} is above 100",
            opts.percentage
        )));
    }
    let mut ordered: Vec<&Snapshot> = snapshots.iter().collect();
    ordered.sort_by(|a, b| a.id.cmp(&b.id));
    let candidates: Vec<(&str, &Archive)> = ordered
        .into_iter()
        .flat_map(|s| s.archives.values().filter(|a| a.is_file()).map(move |a| (s.id.as_str(), a)))
        .collect();

    let n = candidates.len();
    let amount = (n * opts.percentage as usize).div_ceil(100);
    let mut rng = StdRng::seed_from_u64(opts.seed);
    let mut picked = rand::seq::index::sample(&mut rng, n, amount).into_vec();
    picked.sort_unstable();
    Ok(picked.into_iter().map(|i| candidates[i]).collect())
}

/// Run a verify pass over `snapshots` as a background task.
pub fn spawn_verify(
    reader: ArchiveReader,
    snapshots: Vec<Snapshot>,
    opts: VerifyOptions,
    capacity: usize,
) -> RepoResult<TaskHandle<VerifyEvent, VerifyReport>> {
    select_sample(&snapshots, &opts)?;
    Ok(TaskHandle::spawn(capacity, move |progress| async move {
        run_verify(&reader, &snapshots, &opts, &progress).await
    }))
}

#[instrument(skip_all, fields(snapshots = snapshots.len(), percentage = opts.percentage))]
async fn run_verify(
    reader: &ArchiveReader,
    snapshots: &[Snapshot],
    opts: &VerifyOptions,
    progress: &Progress<VerifyEvent>,
) -> RepoResult<VerifyReport> {
    let sample = select_sample(snapshots, opts)?;
    info!(archives = sample.len(), "verify started");
    let mut report = VerifyReport::default();

    for (snapshot, archive) in sample {
        progress.check_cancelled()?;
        report.checked += 1;
        let event = match reader.decode_archive_data(archive).await {
            Ok(data) => VerifyEvent::Verified {
                snapshot: snapshot.to_string(),
                path: archive.path.clone(),
                size: data.len() as u64,
            },
            Err(e) => {
                warn!(snapshot, path = %archive.path, error = %e, "archive failed verification");
                report.errors += 1;
                VerifyEvent::Failed {
                    snapshot: snapshot.to_string(),
                    path: archive.path.clone(),
                    kind: FailureKind::of(&e),
                    message: e.to_string(),
                }
            }
        };
        progress.emit(event).await;
    }

    info!(checked = report.checked, errors = report.errors, "verify finished");
    Ok(report)
}
