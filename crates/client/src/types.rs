use serde::de::{self, Deserialize, Deserializer};
use serde::ser::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// A 32-byte content address, rendered as 64 characters of lowercase hex.
///
/// `Hash32` is the canonical identity of every entity. It keys the local
/// store; [`HashJwt`] never does.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Hash32([u8; 32]);

impl Hash32 {
  pub const fn from_bytes(bytes: [u8; 32]) -> Self {
    return Self(bytes);
  }

  pub fn from_slice(bytes: &[u8]) -> Result<Self, ParseHashError> {
    let bytes: [u8; 32] = bytes.try_into().map_err(|_| ParseHashError)?;
    return Ok(Self(bytes));
  }

  pub const fn as_bytes(&self) -> &[u8; 32] {
    return &self.0;
  }
}

impl fmt::Display for Hash32 {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    return f.write_str(&hex::encode(self.0));
  }
}

impl fmt::Debug for Hash32 {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    return write!(f, "Hash32({self})");
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("expected 64 characters of hex")]
pub struct ParseHashError;

impl FromStr for Hash32 {
  type Err = ParseHashError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    if s.len() != 64 {
      return Err(ParseHashError);
    }
    let bytes = hex::decode(s).map_err(|_| ParseHashError)?;
    return Self::from_slice(&bytes);
  }
}

impl Serialize for Hash32 {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    return serializer.serialize_str(&self.to_string());
  }
}

impl<'de> Deserialize<'de> for Hash32 {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let s = String::deserialize(deserializer)?;
    return s.parse().map_err(de::Error::custom);
  }
}

/// A [`Hash32`] known to address a causal node rather than an object.
#[derive(
  Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct CausalHash(pub Hash32);

impl fmt::Display for CausalHash {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    return self.0.fmt(f);
  }
}

/// A server-signed token binding a [`Hash32`] to the permission to fetch it.
///
/// The client treats the token as opaque except for the embedded `hash`
/// claim, which it reads without verification; only the server holds the
/// signing key.
#[derive(
  Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct HashJwt(String);

#[derive(serde::Deserialize)]
struct HashJwtClaims {
  hash: Hash32,
}

impl HashJwt {
  pub fn new(token: impl Into<String>) -> Self {
    return Self(token.into());
  }

  pub fn as_str(&self) -> &str {
    return &self.0;
  }

  /// Extract the embedded hash. The signature is deliberately not checked;
  /// the token is only ever replayed back to the server that minted it.
  pub fn hash(&self) -> Result<Hash32, Error> {
    let decoding_key = jsonwebtoken::DecodingKey::from_secret(&[]);

    let mut validation = jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::EdDSA);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.required_spec_claims.clear();
    validation.algorithms = vec![
      jsonwebtoken::Algorithm::EdDSA,
      jsonwebtoken::Algorithm::HS256,
    ];

    return jsonwebtoken::decode::<HashJwtClaims>(&self.0, &decoding_key, &validation)
      .map(|data| data.claims.hash)
      .map_err(Error::InvalidToken);
  }
}

/// The name of a repository on the Share instance.
#[derive(
  Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct RepoName(String);

impl RepoName {
  pub fn new(name: impl Into<String>) -> Self {
    return Self(name.into());
  }

  pub fn as_str(&self) -> &str {
    return &self.0;
  }
}

impl fmt::Display for RepoName {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    return f.write_str(&self.0);
  }
}

/// A remote location: a repository plus zero or more name segments.
///
/// The sync engine never interprets the segments; they only round-trip
/// through requests and error messages.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SharePath {
  pub repo: RepoName,
  #[serde(default)]
  pub path: Vec<String>,
}

impl SharePath {
  pub fn root(repo: RepoName) -> Self {
    return Self { repo, path: vec![] };
  }

  pub fn new(repo: RepoName, path: impl Into<Vec<String>>) -> Self {
    return Self {
      repo,
      path: path.into(),
    };
  }
}

impl fmt::Display for SharePath {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.repo)?;
    for segment in &self.path {
      write!(f, "/{segment}")?;
    }
    return Ok(());
  }
}

/// The kind tag of a non-causal entity.
#[derive(
  Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
  Namespace,
  Term,
  Type,
  Patch,
  Bytes,
}

/// A fully parsed entity payload, generic over how it references its
/// dependencies.
///
/// Entities downloaded from the server reference dependencies by [`HashJwt`]
/// (`Entity<HashJwt>`); entities uploaded or resident in main storage
/// reference them by bare [`Hash32`] (`Entity<Hash32>`). [`Entity::map_refs`]
/// converts between the two.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Entity<R> {
  Causal(CausalEntity<R>),
  Object(ObjectEntity<R>),
}

/// A node in the history DAG: a namespace snapshot plus parent causals.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CausalEntity<R> {
  pub namespace: R,
  pub parents: Vec<R>,
}

/// Any non-causal entity: an opaque body plus its dependency references.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ObjectEntity<R> {
  pub kind: ObjectKind,
  pub dependencies: Vec<R>,
  #[serde(with = "body_base64")]
  pub body: Vec<u8>,
}

impl<R> Entity<R> {
  /// Every reference that must be resident somewhere in the store before this
  /// entity may be promoted to main storage.
  pub fn dependencies(&self) -> Vec<&R> {
    return match self {
      Entity::Causal(causal) => std::iter::once(&causal.namespace)
        .chain(causal.parents.iter())
        .collect(),
      Entity::Object(object) => object.dependencies.iter().collect(),
    };
  }

  pub fn map_refs<S, E>(self, mut f: impl FnMut(R) -> Result<S, E>) -> Result<Entity<S>, E> {
    return Ok(match self {
      Entity::Causal(causal) => Entity::Causal(CausalEntity {
        namespace: f(causal.namespace)?,
        parents: causal
          .parents
          .into_iter()
          .map(&mut f)
          .collect::<Result<_, E>>()?,
      }),
      Entity::Object(object) => Entity::Object(ObjectEntity {
        kind: object.kind,
        dependencies: object
          .dependencies
          .into_iter()
          .map(&mut f)
          .collect::<Result<_, E>>()?,
        body: object.body,
      }),
    });
  }
}

mod body_base64 {
  use base64::prelude::*;
  use serde::de::{Deserialize, Deserializer, Error};
  use serde::ser::Serializer;

  pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    return serializer.serialize_str(&BASE64_STANDARD.encode(bytes));
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let s = String::deserialize(deserializer)?;
    return BASE64_STANDARD.decode(s).map_err(Error::custom);
  }
}
