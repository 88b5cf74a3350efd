//! The upload loop shared by both push flavors.

use std::collections::{BTreeMap, BTreeSet};

use skein_client::{
  Entity, Hash32, MAX_ENTITY_BATCH, RepoName, UploadEntitiesRequest, UploadEntitiesResponse,
  UploadHashMismatch,
};

use crate::client;
use crate::progress::PushProgress;
use crate::store::{self, Store};
use crate::transport::SyncServer;

/// Terminal failures of one upload loop; the callers fold these into their
/// own error types.
#[derive(Debug)]
pub(crate) enum UploadError {
  NoWritePermission(RepoName),
  HashMismatchForEntity(UploadHashMismatch),
  Transport(client::Error),
  Store(store::Error),
}

impl From<client::Error> for UploadError {
  fn from(err: client::Error) -> Self {
    return UploadError::Transport(err);
  }
}

impl From<store::Error> for UploadError {
  fn from(err: store::Error) -> Self {
    return UploadError::Store(err);
  }
}

/// Upload `remaining` plus everything the server turns out to be missing.
///
/// Batches of at most [`MAX_ENTITY_BATCH`] are loaded from the store in a
/// single transaction each and sent until the server stops asking for more.
/// There is no iteration cap: every round either drains the residual set or
/// replaces it with a strictly different server-demanded set, and the server
/// guarantees convergence for acyclic dependency DAGs.
pub(crate) async fn upload_entities(
  server: &dyn SyncServer,
  store: &Store,
  repo: &RepoName,
  mut remaining: BTreeSet<Hash32>,
  progress: &PushProgress,
) -> Result<(), UploadError> {
  let mut uploaded = 0usize;

  while !remaining.is_empty() {
    let batch: Vec<Hash32> = remaining.iter().take(MAX_ENTITY_BATCH).copied().collect();
    for hash in &batch {
      remaining.remove(hash);
    }

    let hashes = batch.clone();
    let entities: BTreeMap<Hash32, Entity<Hash32>> = store
      .transaction(move |tx| {
        return hashes
          .into_iter()
          .map(|hash| Ok((hash, tx.expect_entity(hash)?)))
          .collect();
      })
      .await?;

    let request = UploadEntitiesRequest {
      repo: repo.clone(),
      entities,
    };
    match server.upload_entities(request).await? {
      UploadEntitiesResponse::Success => {
        uploaded += batch.len();
        (progress.on_progress)(uploaded, remaining.len());
      }
      UploadEntitiesResponse::NeedDependencies(more) => {
        remaining.extend(more);
        (progress.on_progress)(uploaded, remaining.len());
      }
      UploadEntitiesResponse::NoWritePermission(repo) => {
        return Err(UploadError::NoWritePermission(repo));
      }
      UploadEntitiesResponse::HashMismatchForEntity(mismatch) => {
        return Err(UploadError::HashMismatchForEntity(mismatch));
      }
    }
  }

  return Ok(());
}
