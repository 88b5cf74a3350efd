//! The two push entry points: check-and-set and fast-forward.
//!
//! Both are sequential: one connection, one upload loop, at most a couple of
//! endpoint calls. All the concurrency in this crate lives on the pull side.

use log::*;
use std::collections::BTreeSet;
use thiserror::Error;

use skein_client::{
  CausalHash, FastForwardPathRequest, FastForwardPathResponse, GetCausalHashByPathRequest,
  GetCausalHashByPathResponse, Hash32, HashMismatch, InvalidParentage, SharePath,
  UpdatePathRequest, UpdatePathResponse, UploadHashMismatch,
};

use crate::progress::PushProgress;
use crate::transport::SyncServer;
use crate::upload::{self, UploadError};
use crate::{ConnectFn, client, spine, store};

#[derive(Debug, Error)]
pub enum CheckAndSetPushError {
  /// The remote head was not the expected hash; nothing was uploaded or
  /// changed.
  #[error("Remote head mismatch: expected {:?}, found {:?}", .0.expected, .0.actual)]
  HashMismatch(HashMismatch),

  /// The server kept reporting missing dependencies after we uploaded
  /// everything it asked for; each side thinks the other is at fault.
  #[error("Server still missing {} dependencies after upload", .0.len())]
  ServerMissingDependencies(BTreeSet<Hash32>),

  #[error("No write permission for {0}")]
  NoWritePermission(SharePath),

  #[error("Entity {} rejected by server", .0.supplied)]
  HashMismatchForEntity(UploadHashMismatch),

  #[error("Transport error: {0}")]
  Transport(#[from] client::Error),

  #[error("Store error: {0}")]
  Store(#[from] store::Error),
}

#[derive(Debug, Error)]
pub enum FastForwardPushError {
  #[error("No read permission for {0}")]
  NoReadPermission(SharePath),

  /// The path has no remote history to fast-forward.
  #[error("No history to fast-forward")]
  NoHistory,

  /// The remote head is not an ancestor of the local head.
  #[error("Push to {0} is not a fast-forward")]
  NotFastForward(SharePath),

  #[error("Server still missing {} dependencies after upload", .0.len())]
  ServerMissingDependencies(BTreeSet<Hash32>),

  #[error("Invalid parentage: {} is not a parent of {}", .0.parent, .0.child)]
  InvalidParentage(InvalidParentage),

  #[error("No write permission for {0}")]
  NoWritePermission(SharePath),

  #[error("Entity {} rejected by server", .0.supplied)]
  HashMismatchForEntity(UploadHashMismatch),

  #[error("Transport error: {0}")]
  Transport(#[from] client::Error),

  #[error("Store error: {0}")]
  Store(#[from] store::Error),
}

/// Atomically replace the remote head at `path` with `new_hash`, provided the
/// server is still at `expected_hash`, uploading whatever dependencies the
/// server demands.
pub async fn push_check_and_set(
  server: &dyn SyncServer,
  connect: &ConnectFn,
  path: &SharePath,
  expected_hash: Option<CausalHash>,
  new_hash: CausalHash,
  progress: &PushProgress,
) -> Result<(), CheckAndSetPushError> {
  let request = UpdatePathRequest {
    path: path.clone(),
    expected_hash,
    new_hash,
  };

  let deps = match server.update_path(request.clone()).await? {
    UpdatePathResponse::Success => return Ok(()),
    UpdatePathResponse::HashMismatch(mismatch) => {
      return Err(CheckAndSetPushError::HashMismatch(mismatch));
    }
    UpdatePathResponse::NoWritePermission(path) => {
      return Err(CheckAndSetPushError::NoWritePermission(path));
    }
    UpdatePathResponse::MissingDependencies(deps) => deps,
  };

  debug!("update-path at {path}: uploading {} missing dependencies", deps.len());
  let store = connect()?;
  if let Err(err) = upload::upload_entities(server, &store, &path.repo, deps, progress).await {
    return Err(check_and_set_upload_error(err));
  }

  // One retry only. A second round of missing dependencies means the two
  // sides disagree about what just got uploaded, which is not resolvable by
  // looping.
  return match server.update_path(request).await? {
    UpdatePathResponse::Success => Ok(()),
    UpdatePathResponse::HashMismatch(mismatch) => {
      // Somebody else won the race while we were uploading.
      Err(CheckAndSetPushError::HashMismatch(mismatch))
    }
    UpdatePathResponse::MissingDependencies(more) => {
      Err(CheckAndSetPushError::ServerMissingDependencies(more))
    }
    UpdatePathResponse::NoWritePermission(path) => {
      Err(CheckAndSetPushError::NoWritePermission(path))
    }
  };
}

/// Advance the remote head at `path` along the local causal chain ending in
/// `local`. Fails with [`FastForwardPushError::NotFastForward`] when the
/// remote head is not an ancestor of `local`.
pub async fn push_fast_forward(
  server: &dyn SyncServer,
  connect: &ConnectFn,
  path: &SharePath,
  local: CausalHash,
  progress: &PushProgress,
) -> Result<(), FastForwardPushError> {
  let request = GetCausalHashByPathRequest { path: path.clone() };
  let remote_jwt = match server.get_causal_hash_by_path(request).await? {
    GetCausalHashByPathResponse::NoReadPermission(path) => {
      return Err(FastForwardPushError::NoReadPermission(path));
    }
    GetCausalHashByPathResponse::Success(None) => return Err(FastForwardPushError::NoHistory),
    GetCausalHashByPathResponse::Success(Some(jwt)) => jwt,
  };

  let remote = CausalHash(remote_jwt.hash()?);
  if remote == local {
    return Ok(());
  }

  let store = connect()?;
  let interior = match spine::causal_spine_between(&store, remote, local).await? {
    None => return Err(FastForwardPushError::NotFastForward(path.clone())),
    Some(interior) => interior,
  };

  // Only the head is offered up front; the server requests the interior (and
  // anything else it lacks) through the upload loop's dependency mechanism.
  let head = BTreeSet::from([local.0]);
  if let Err(err) = upload::upload_entities(server, &store, &path.repo, head, progress).await {
    return Err(fast_forward_upload_error(err));
  }

  let mut hashes = interior;
  hashes.push(local);
  let request = FastForwardPathRequest {
    path: path.clone(),
    expected_hash: remote,
    hashes,
  };
  return match server.fast_forward_path(request).await? {
    FastForwardPathResponse::Success => Ok(()),
    FastForwardPathResponse::MissingDependencies(deps) => {
      Err(FastForwardPushError::ServerMissingDependencies(deps))
    }
    FastForwardPathResponse::NoHistory => Err(FastForwardPushError::NoHistory),
    FastForwardPathResponse::NotFastForward => {
      Err(FastForwardPushError::NotFastForward(path.clone()))
    }
    FastForwardPathResponse::InvalidParentage(parentage) => {
      Err(FastForwardPushError::InvalidParentage(parentage))
    }
    FastForwardPathResponse::NoWritePermission(path) => {
      Err(FastForwardPushError::NoWritePermission(path))
    }
  };
}

fn check_and_set_upload_error(err: UploadError) -> CheckAndSetPushError {
  return match err {
    UploadError::NoWritePermission(repo) => {
      CheckAndSetPushError::NoWritePermission(SharePath::root(repo))
    }
    UploadError::HashMismatchForEntity(mismatch) => {
      CheckAndSetPushError::HashMismatchForEntity(mismatch)
    }
    UploadError::Transport(err) => CheckAndSetPushError::Transport(err),
    UploadError::Store(err) => CheckAndSetPushError::Store(err),
  };
}

fn fast_forward_upload_error(err: UploadError) -> FastForwardPushError {
  return match err {
    UploadError::NoWritePermission(repo) => {
      FastForwardPushError::NoWritePermission(SharePath::root(repo))
    }
    UploadError::HashMismatchForEntity(mismatch) => {
      FastForwardPushError::HashMismatchForEntity(mismatch)
    }
    UploadError::Transport(err) => FastForwardPushError::Transport(err),
    UploadError::Store(err) => FastForwardPushError::Store(err),
  };
}
