use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Context as _;

use crate::blob::SnapshotRemote;
use crate::ids::now_millis;
use crate::local::LocalStore;
use crate::model::{Book, Question, SyncConflict, SyncData, SyncOutcome};

/// How the user chose to settle the conflicts reported by [`SyncService::sync`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Resolution {
    /// Keep the local data; the remote snapshot is ignored.
    #[value(name = "local")]
    UseLocal,
    /// Take the remote snapshot and append local-only records.
    #[value(name = "remote")]
    UseRemote,
}

/// Whole-snapshot sync between the local store and a [`SnapshotRemote`].
///
/// Runs only on demand. Conflicts are reported, never resolved implicitly.
#[derive(Clone)]
pub struct SyncService {
    local: LocalStore,
    remote: Arc<dyn SnapshotRemote>,
}

impl SyncService {
    pub fn new(local: LocalStore, remote: Arc<dyn SnapshotRemote>) -> Self {
        Self { local, remote }
    }

    pub async fn upload(&self) -> anyhow::Result<()> {
        let snapshot = self.local.snapshot(now_millis()).await;
        self.remote
            .upload(&snapshot)
            .await
            .context("upload snapshot")?;
        tracing::info!(
            books = snapshot.books.len(),
            questions = snapshot.questions.len(),
            "uploaded snapshot"
        );
        Ok(())
    }

    /// Overwrites the local store with the remote snapshot.
    pub async fn download(&self) -> anyhow::Result<()> {
        let Some(remote) = self
            .remote
            .download()
            .await
            .context("download snapshot")?
        else {
            anyhow::bail!("no remote snapshot to download");
        };
        self.local
            .replace_all(&remote)
            .await
            .context("apply remote snapshot")?;
        tracing::info!(
            books = remote.books.len(),
            questions = remote.questions.len(),
            "downloaded snapshot"
        );
        Ok(())
    }

    pub async fn sync(&self) -> anyhow::Result<SyncOutcome> {
        let Some(remote) = self
            .remote
            .download()
            .await
            .context("download snapshot")?
        else {
            tracing::info!("no remote snapshot yet; uploading local data");
            self.upload().await?;
            return Ok(SyncOutcome {
                uploaded: true,
                ..SyncOutcome::default()
            });
        };

        let local = self.local.snapshot(now_millis()).await;
        let conflicts = detect_conflicts(&local, &remote);
        if !conflicts.is_empty() {
            tracing::info!(conflicts = conflicts.len(), "sync stopped on conflicts");
            return Ok(SyncOutcome {
                conflicts,
                ..SyncOutcome::default()
            });
        }

        let newest_local = newest_local_timestamp(&local);
        if remote.timestamp > newest_local {
            tracing::info!(
                remote_timestamp = remote.timestamp,
                newest_local,
                "remote snapshot is newer; replacing local data"
            );
            self.local
                .replace_all(&remote)
                .await
                .context("apply remote snapshot")?;
            return Ok(SyncOutcome {
                downloaded: true,
                ..SyncOutcome::default()
            });
        }

        self.upload().await?;
        Ok(SyncOutcome {
            uploaded: true,
            ..SyncOutcome::default()
        })
    }

    /// Applies the user's choice after [`SyncService::sync`] reported
    /// conflicts. Returns whether local data changed.
    pub async fn resolve_conflicts(&self, resolution: Resolution) -> anyhow::Result<bool> {
        match resolution {
            Resolution::UseLocal => {
                tracing::info!("conflicts resolved in favour of local data");
                Ok(false)
            }
            Resolution::UseRemote => {
                let Some(remote) = self
                    .remote
                    .download()
                    .await
                    .context("download snapshot")?
                else {
                    anyhow::bail!("no remote snapshot to resolve against");
                };
                let local = self.local.snapshot(now_millis()).await;
                let merged = merge_snapshots(&local, remote);
                self.local
                    .replace_all(&merged)
                    .await
                    .context("apply merged snapshot")?;
                tracing::info!(
                    books = merged.books.len(),
                    questions = merged.questions.len(),
                    "conflicts resolved in favour of remote data"
                );
                Ok(true)
            }
        }
    }
}

trait Versioned {
    fn id(&self) -> &str;
    fn updated_at(&self) -> Option<i64>;
}

impl Versioned for Book {
    fn id(&self) -> &str {
        &self.id
    }
    fn updated_at(&self) -> Option<i64> {
        self.updated_at
    }
}

impl Versioned for Question {
    fn id(&self) -> &str {
        &self.id
    }
    fn updated_at(&self) -> Option<i64> {
        self.updated_at
    }
}

fn remote_is_newer<T: Versioned>(local: &T, remote: &T) -> bool {
    matches!(
        (local.updated_at(), remote.updated_at()),
        (Some(l), Some(r)) if r > l
    )
}

fn conflicting_pairs<'a, T: Versioned>(
    local: &'a [T],
    remote: &'a [T],
) -> impl Iterator<Item = (&'a T, &'a T)> {
    local.iter().filter_map(move |l| {
        remote
            .iter()
            .find(|r| r.id() == l.id())
            .filter(|r| remote_is_newer(l, *r))
            .map(|r| (l, r))
    })
}

/// Same-ID pairs whose remote version carries a strictly newer `updatedAt`.
pub fn detect_conflicts(local: &SyncData, remote: &SyncData) -> Vec<SyncConflict> {
    let books = conflicting_pairs(&local.books, &remote.books).map(|(l, r)| SyncConflict::Books {
        local: l.clone(),
        remote: r.clone(),
    });
    let questions = conflicting_pairs(&local.questions, &remote.questions).map(|(l, r)| {
        SyncConflict::Questions {
            local: l.clone(),
            remote: r.clone(),
        }
    });
    books.chain(questions).collect()
}

/// Newest `createdAt` across local books and questions; 0 when empty.
pub fn newest_local_timestamp(local: &SyncData) -> i64 {
    local
        .books
        .iter()
        .map(|b| b.created_at)
        .chain(local.questions.iter().map(|q| q.created_at))
        .max()
        .unwrap_or(0)
}

fn append_missing<T: Versioned + Clone>(remote: &mut Vec<T>, local: &[T]) {
    let known = remote
        .iter()
        .map(|r| r.id().to_owned())
        .collect::<HashSet<_>>();
    remote.extend(local.iter().filter(|l| !known.contains(l.id())).cloned());
}

/// Remote records win on shared IDs; local-only records are appended.
/// Settings keys unset remotely are filled from local.
pub fn merge_snapshots(local: &SyncData, mut remote: SyncData) -> SyncData {
    append_missing(&mut remote.books, &local.books);
    append_missing(&mut remote.questions, &local.questions);
    remote.settings = remote.settings.or(&local.settings);
    remote
}
