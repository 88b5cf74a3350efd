//! Request and response shapes for the five `/sync` endpoints.
//!
//! Every endpoint is a POST with a JSON body; responses are adjacently tagged
//! unions (`"type"` / `"payload"`).

use std::collections::{BTreeMap, BTreeSet};

use crate::types::{CausalHash, Entity, Hash32, HashJwt, RepoName, SharePath};

/// Upper bound on entities per upload or download request. The server rejects
/// larger batches; tuning below this value is allowed, above it is not.
pub const MAX_ENTITY_BATCH: usize = 50;

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct GetCausalHashByPathRequest {
  pub path: SharePath,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum GetCausalHashByPathResponse {
  Success(Option<HashJwt>),
  NoReadPermission(SharePath),
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct UpdatePathRequest {
  pub path: SharePath,
  pub expected_hash: Option<CausalHash>,
  pub new_hash: CausalHash,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum UpdatePathResponse {
  Success,
  /// The remote head was not `expected_hash`; nothing was changed.
  HashMismatch(HashMismatch),
  /// The server is missing dependencies of the proposed head and refused the
  /// update. Upload them and retry.
  MissingDependencies(BTreeSet<Hash32>),
  NoWritePermission(SharePath),
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct HashMismatch {
  pub expected: Option<CausalHash>,
  pub actual: Option<CausalHash>,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FastForwardPathRequest {
  pub path: SharePath,
  /// The head the server is believed to be at.
  pub expected_hash: CausalHash,
  /// The causal chain to advance along, oldest first, ending in the new head.
  pub hashes: Vec<CausalHash>,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum FastForwardPathResponse {
  Success,
  MissingDependencies(BTreeSet<Hash32>),
  /// The path has no history to fast-forward from.
  NoHistory,
  /// `expected_hash` is no longer the remote head.
  NotFastForward,
  /// Adjacent chain elements are not parent and child.
  InvalidParentage(InvalidParentage),
  NoWritePermission(SharePath),
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct InvalidParentage {
  pub parent: CausalHash,
  pub child: CausalHash,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DownloadEntitiesRequest {
  pub repo: RepoName,
  pub hashes: BTreeSet<HashJwt>,
}

/// Download never fails with a permission error: the JWTs in the request are
/// the authorization.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DownloadEntitiesResponse {
  pub entities: BTreeMap<Hash32, Entity<HashJwt>>,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct UploadEntitiesRequest {
  pub repo: RepoName,
  pub entities: BTreeMap<Hash32, Entity<Hash32>>,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum UploadEntitiesResponse {
  Success,
  /// The server wants these uploaded first (or alongside); the client should
  /// add them to its residual set and keep going.
  NeedDependencies(BTreeSet<Hash32>),
  /// An uploaded entity did not hash to the key it was supplied under.
  HashMismatchForEntity(UploadHashMismatch),
  NoWritePermission(RepoName),
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct UploadHashMismatch {
  pub supplied: Hash32,
  pub computed: Hash32,
}
