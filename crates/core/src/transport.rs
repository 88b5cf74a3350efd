use async_trait::async_trait;

use crate::client;
use skein_client::{
  DownloadEntitiesRequest, DownloadEntitiesResponse, FastForwardPathRequest,
  FastForwardPathResponse, GetCausalHashByPathRequest, GetCausalHashByPathResponse,
  UpdatePathRequest, UpdatePathResponse, UploadEntitiesRequest, UploadEntitiesResponse,
};

/// The five Share endpoints the engine consumes.
///
/// Production uses [`skein_client::Client`]; tests drive the engine with
/// scripted implementations. Any `Err` is a transport failure and aborts the
/// sync call that issued the request.
#[async_trait]
pub trait SyncServer: Send + Sync {
  async fn get_causal_hash_by_path(
    &self,
    request: GetCausalHashByPathRequest,
  ) -> Result<GetCausalHashByPathResponse, client::Error>;

  async fn update_path(&self, request: UpdatePathRequest)
  -> Result<UpdatePathResponse, client::Error>;

  async fn fast_forward_path(
    &self,
    request: FastForwardPathRequest,
  ) -> Result<FastForwardPathResponse, client::Error>;

  async fn download_entities(
    &self,
    request: DownloadEntitiesRequest,
  ) -> Result<DownloadEntitiesResponse, client::Error>;

  async fn upload_entities(
    &self,
    request: UploadEntitiesRequest,
  ) -> Result<UploadEntitiesResponse, client::Error>;
}

#[async_trait]
impl SyncServer for client::Client {
  async fn get_causal_hash_by_path(
    &self,
    request: GetCausalHashByPathRequest,
  ) -> Result<GetCausalHashByPathResponse, client::Error> {
    return client::Client::get_causal_hash_by_path(self, &request).await;
  }

  async fn update_path(
    &self,
    request: UpdatePathRequest,
  ) -> Result<UpdatePathResponse, client::Error> {
    return client::Client::update_path(self, &request).await;
  }

  async fn fast_forward_path(
    &self,
    request: FastForwardPathRequest,
  ) -> Result<FastForwardPathResponse, client::Error> {
    return client::Client::fast_forward_path(self, &request).await;
  }

  async fn download_entities(
    &self,
    request: DownloadEntitiesRequest,
  ) -> Result<DownloadEntitiesResponse, client::Error> {
    return client::Client::download_entities(self, &request).await;
  }

  async fn upload_entities(
    &self,
    request: UploadEntitiesRequest,
  ) -> Result<UploadEntitiesResponse, client::Error> {
    return client::Client::upload_entities(self, &request).await;
  }
}
