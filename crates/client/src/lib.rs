//! Typed HTTP bindings for the `/sync` API of a Share instance.
//!
//! The five endpoints are plain request→response calls; all sequencing and
//! retry logic lives in the `skein` engine crate. This crate only shapes the
//! wire traffic and classifies transport failures.

#![forbid(unsafe_code, clippy::unwrap_used)]
#![allow(clippy::needless_return)]
#![warn(clippy::await_holding_lock, clippy::inefficient_to_string)]

use reqwest::StatusCode;
use reqwest::header::{self, HeaderMap, HeaderValue};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use thiserror::Error;
use tracing::*;

pub mod api;
pub mod types;

pub use api::{
  DownloadEntitiesRequest, DownloadEntitiesResponse, FastForwardPathRequest,
  FastForwardPathResponse, GetCausalHashByPathRequest, GetCausalHashByPathResponse, HashMismatch,
  InvalidParentage, MAX_ENTITY_BATCH, UpdatePathRequest, UpdatePathResponse,
  UploadEntitiesRequest, UploadEntitiesResponse, UploadHashMismatch,
};
pub use types::{
  CausalEntity, CausalHash, Entity, Hash32, HashJwt, ObjectEntity, ObjectKind, RepoName, SharePath,
};

/// Transport failures and local token handling failures.
///
/// The first seven variants are the classification of everything the wire can
/// do to us; any of them aborts the sync call that triggered the request.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
  #[error("Unauthenticated")]
  Unauthenticated,

  #[error("Permission denied: {0}")]
  PermissionDenied(String),

  #[error("Timeout")]
  Timeout,

  #[error("Rate limit exceeded")]
  RateLimitExceeded,

  #[error("Internal server error")]
  InternalServerError,

  #[error("Unreachable service: {0}")]
  UnreachableService(String),

  #[error("Invalid response: {0}")]
  InvalidResponse(String),

  #[error("InvalidToken: {0}")]
  InvalidToken(jsonwebtoken::errors::Error),

  #[error("Auth token is not a valid header value")]
  InvalidAuthToken,
}

struct ClientState {
  http: reqwest::Client,
  base: url::Url,
  headers: HeaderMap,
}

/// A handle on one Share instance. Cheap to clone.
#[derive(Clone)]
pub struct Client {
  state: Arc<ClientState>,
}

impl Client {
  /// Connect to the Share instance at `base`, optionally authenticating every
  /// request with a bearer token. Obtaining the token is the caller's
  /// business.
  ///
  /// No response timeout is configured: entity batches can legitimately take
  /// minutes, and the server signals its own timeouts with 408/504.
  pub fn new(base: url::Url, auth_token: Option<&str>) -> Result<Client, Error> {
    let mut headers = HeaderMap::with_capacity(2);
    headers.insert(
      header::CONTENT_TYPE,
      HeaderValue::from_static("application/json"),
    );
    if let Some(token) = auth_token {
      let value =
        HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| Error::InvalidAuthToken)?;
      headers.insert(header::AUTHORIZATION, value);
    }

    return Ok(Client {
      state: Arc::new(ClientState {
        http: reqwest::Client::new(),
        base,
        headers,
      }),
    });
  }

  pub async fn get_causal_hash_by_path(
    &self,
    request: &GetCausalHashByPathRequest,
  ) -> Result<GetCausalHashByPathResponse, Error> {
    return self.post("get-causal-hash-by-path", request).await;
  }

  pub async fn update_path(
    &self,
    request: &UpdatePathRequest,
  ) -> Result<UpdatePathResponse, Error> {
    return self.post("update-path", request).await;
  }

  pub async fn fast_forward_path(
    &self,
    request: &FastForwardPathRequest,
  ) -> Result<FastForwardPathResponse, Error> {
    return self.post("fast-forward-path", request).await;
  }

  pub async fn download_entities(
    &self,
    request: &DownloadEntitiesRequest,
  ) -> Result<DownloadEntitiesResponse, Error> {
    return self.post("download-entities", request).await;
  }

  pub async fn upload_entities(
    &self,
    request: &UploadEntitiesRequest,
  ) -> Result<UploadEntitiesResponse, Error> {
    return self.post("upload-entities", request).await;
  }

  async fn post<Req: Serialize, Resp: DeserializeOwned>(
    &self,
    route: &str,
    request: &Req,
  ) -> Result<Resp, Error> {
    let mut url = self.state.base.clone();
    url.set_path(&format!("/{SYNC_API}/{route}"));

    let response = self
      .state
      .http
      .post(url)
      .headers(self.state.headers.clone())
      .json(request)
      .send()
      .await
      .map_err(|err| Error::UnreachableService(err.to_string()))?;

    let status = response.status();
    if status.is_success() {
      let full = response
        .bytes()
        .await
        .map_err(|err| Error::UnreachableService(err.to_string()))?;
      return serde_json::from_slice(&full)
        .map_err(|_| Error::InvalidResponse(String::from_utf8_lossy(&full).into_owned()));
    }

    let body = response.text().await.unwrap_or_default();
    debug!("POST /{SYNC_API}/{route}: {status}");

    return Err(classify_status(status, body));
  }
}

fn classify_status(status: StatusCode, body: String) -> Error {
  return match status {
    StatusCode::UNAUTHORIZED => Error::Unauthenticated,
    StatusCode::FORBIDDEN => Error::PermissionDenied(body),
    StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => Error::Timeout,
    StatusCode::TOO_MANY_REQUESTS => Error::RateLimitExceeded,
    status if status.is_server_error() => Error::InternalServerError,
    status => Error::InvalidResponse(format!("{status}: {body}")),
  };
}

const SYNC_API: &str = "sync";
