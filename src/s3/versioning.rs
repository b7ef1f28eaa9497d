//! Concurrent write/delete stress against a versioned bucket.
//!
//! Writers and bulk deleters run as independent tokio tasks that share
//! nothing but the bucket. Once every task has joined, a bounded sequential
//! pass deletes whatever the concurrent phase left behind.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::{JoinError, JoinSet};
use tracing::instrument;
use typed_builder::TypedBuilder;

use super::api::{S3Api, S3ApiError};
use super::S3Object;

/// One object version or delete marker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionRecord {
    pub key: String,
    pub version_id: String,
    pub is_delete_marker: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerKind {
    Writer,
    Deleter,
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WorkerKind::Writer => "writer",
            WorkerKind::Deleter => "deleter",
        })
    }
}

#[derive(Debug, Error)]
pub enum StressError {
    #[error("{kind} worker {worker_id} failed")]
    Worker {
        worker_id: usize,
        kind: WorkerKind,
        #[source]
        source: S3ApiError,
    },
    #[error(transparent)]
    Join(#[from] JoinError),
    #[error("{remaining} versions remain after {attempts} reconcile passes")]
    NotConverged { attempts: usize, remaining: usize },
    #[error(transparent)]
    Api(#[from] S3ApiError),
}

/// Counters from a stress run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StressReport {
    pub rounds: usize,
    pub writes: usize,
    pub concurrent_deletes: usize,
    pub reconcile_passes: usize,
    pub reconcile_deletes: usize,
}

/// Every version and delete marker under `prefix`, sorted by key.
#[instrument(skip(client))]
pub async fn list_all_versions<A: S3Api + ?Sized>(
    client: &A,
    bucket: &str,
    prefix: Option<&str>,
) -> Result<Vec<VersionRecord>, S3ApiError> {
    let mut versions = client.list_object_versions(bucket, prefix).await?;
    versions.sort_by(|a, b| a.key.cmp(&b.key));
    tracing::debug!(versions = versions.len(), "Listed versions");
    Ok(versions)
}

type WorkerResult = (usize, WorkerKind, Result<(), S3ApiError>);

/// Drives concurrent writers and deleters against one bucket.
///
/// Spawned workers run on the ambient tokio runtime; use a multi-thread
/// runtime for real parallelism.
#[derive(TypedBuilder)]
pub struct VersionStress<A: S3Api + 'static> {
    client: Arc<A>,
    #[builder(setter(into))]
    bucket: String,
    /// Upper bound on sequential list-and-delete passes in [reconcile].
    ///
    /// [reconcile]: VersionStress::reconcile
    #[builder(default = 5)]
    max_attempts: usize,
    #[builder(default, setter(skip))]
    tasks: JoinSet<WorkerResult>,
    #[builder(default, setter(skip))]
    next_worker: usize,
    #[builder(default, setter(skip))]
    report: StressReport,
}

impl<A: S3Api + 'static> fmt::Debug for VersionStress<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionStress")
            .field("bucket", &self.bucket)
            .field("max_attempts", &self.max_attempts)
            .field("in_flight", &self.tasks.len())
            .field("report", &self.report)
            .finish_non_exhaustive()
    }
}

impl<A: S3Api + 'static> VersionStress<A> {
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn report(&self) -> StressReport {
        self.report
    }

    /// Number of spawned workers not yet joined.
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    fn next_worker_id(&mut self) -> usize {
        let id = self.next_worker;
        self.next_worker += 1;
        id
    }

    /// Spawns `count` writers, each putting one version of `key` with body
    /// `Data {ordinal}`. Returns the worker ids.
    #[instrument(skip(self), fields(bucket = %self.bucket))]
    pub fn spawn_writers(&mut self, key: &str, count: usize) -> Vec<usize> {
        let object = S3Object::new(&self.bucket, key);
        (0..count)
            .map(|ordinal| {
                let worker_id = self.next_worker_id();
                let client = Arc::clone(&self.client);
                let object = object.clone();
                self.tasks.spawn(async move {
                    let body = Bytes::from(format!("Data {ordinal}"));
                    let outcome = client.put_object(&object, body, None).await.map(|put| {
                        tracing::debug!(worker_id, version_id = ?put.version_id, "Wrote version");
                    });
                    (worker_id, WorkerKind::Writer, outcome)
                });
                self.report.writes += 1;
                worker_id
            })
            .collect()
    }

    /// Lists the versions visible now and spawns one delete worker per
    /// version or delete marker. Returns the worker ids.
    ///
    /// Writers still in flight may add versions after the listing, so one
    /// pass does not guarantee an empty bucket.
    #[instrument(skip(self), fields(bucket = %self.bucket))]
    pub async fn spawn_bulk_delete(&mut self) -> Result<Vec<usize>, StressError> {
        let versions = list_all_versions(self.client.as_ref(), &self.bucket, None).await?;
        tracing::info!(versions = versions.len(), "Spawning deleters");

        let ids = versions
            .into_iter()
            .map(|version| {
                let worker_id = self.next_worker_id();
                let client = Arc::clone(&self.client);
                let object = S3Object::new(&self.bucket, &version.key);
                self.tasks.spawn(async move {
                    let outcome = client
                        .delete_object(&object, Some(version.version_id.as_str()))
                        .await
                        .map(|_| ());
                    (worker_id, WorkerKind::Deleter, outcome)
                });
                worker_id
            })
            .collect::<Vec<_>>();
        self.report.concurrent_deletes += ids.len();
        Ok(ids)
    }

    /// Waits for every spawned worker.
    ///
    /// All workers are joined even when some fail; the first failure is
    /// returned afterwards.
    #[instrument(skip(self), fields(bucket = %self.bucket))]
    pub async fn join_all(&mut self) -> Result<(), StressError> {
        let mut first_error = None;
        while let Some(joined) = self.tasks.join_next().await {
            let (worker_id, kind, outcome) = match joined {
                Ok(result) => result,
                Err(e) => {
                    first_error.get_or_insert(StressError::Join(e));
                    continue;
                }
            };
            if let Err(source) = outcome {
                tracing::warn!(worker_id, %kind, error = %source, "Worker failed");
                first_error.get_or_insert(StressError::Worker {
                    worker_id,
                    kind,
                    source,
                });
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Sequentially lists and deletes versions until none remain, at most
    /// `max_attempts` times.
    ///
    /// Must only run once every worker has joined. Returns the number of
    /// passes that found something to delete.
    #[instrument(skip(self), fields(bucket = %self.bucket))]
    pub async fn reconcile(&mut self) -> Result<usize, StressError> {
        for attempt in 0..self.max_attempts {
            let versions = list_all_versions(self.client.as_ref(), &self.bucket, None).await?;
            if versions.is_empty() {
                tracing::info!(passes = attempt, "Bucket reconciled");
                self.report.reconcile_passes += attempt;
                return Ok(attempt);
            }
            for version in versions {
                let object = S3Object::new(&self.bucket, &version.key);
                self.client
                    .delete_object(&object, Some(version.version_id.as_str()))
                    .await?;
                self.report.reconcile_deletes += 1;
            }
        }

        let remaining = list_all_versions(self.client.as_ref(), &self.bucket, None)
            .await?
            .len();
        self.report.reconcile_passes += self.max_attempts;
        if remaining == 0 {
            Ok(self.max_attempts)
        } else {
            Err(StressError::NotConverged {
                attempts: self.max_attempts,
                remaining,
            })
        }
    }

    /// Runs `rounds` of (`writers_per_round` writers + one bulk delete) against
    /// `key` without waiting between rounds, joins every worker, then
    /// reconciles.
    ///
    /// Every spawned worker is joined even when a round fails to spawn; the
    /// first error is returned after the join and reconcile is skipped.
    #[instrument(skip(self), fields(bucket = %self.bucket))]
    pub async fn run_rounds(
        &mut self,
        key: &str,
        rounds: usize,
        writers_per_round: usize,
    ) -> Result<StressReport, StressError> {
        let spawned = self.spawn_rounds(key, rounds, writers_per_round).await;
        let joined = self.join_all().await;
        spawned?;
        joined?;
        self.reconcile().await?;
        Ok(self.report)
    }

    async fn spawn_rounds(
        &mut self,
        key: &str,
        rounds: usize,
        writers_per_round: usize,
    ) -> Result<(), StressError> {
        for round in 0..rounds {
            self.spawn_writers(key, writers_per_round);
            let deleters = self.spawn_bulk_delete().await?;
            tracing::debug!(round, deleters = deleters.len(), "Round spawned");
            self.report.rounds += 1;
        }
        Ok(())
    }
}
