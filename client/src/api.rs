//! Bearer-token REST client for the SimSync backend.
//!
//! Every call asks the identity provider for a token first. An unauthorized
//! answer is retried twice (500ms, then 1000ms) because a freshly issued
//! token is sometimes rejected until it propagates to the backend.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kernel::{
    CheckoutRequest, CheckoutSession, CommunityDownload, CommunityPage, ErrorBody, FileList,
    Message, Probe, RateRequest, RateReceipt, ShareReceipt, ShareRequest, UploadReceipt, UserInfo,
};
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::multipart::Form;
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::ClientError;
use crate::identity::IdentityProvider;
use crate::resource::Resource;
use crate::service::{CheckoutService, CommunityService, FileService};
use crate::upload::UploadFile;

pub const DEFAULT_API_URL: &str = "http://localhost:8000/api";
pub const API_URL_ENV: &str = "SIMSYNC_API_URL";

const AUTHENTICATION_FAILED: &str = "Authentication failed";

/// Unauthorized responses retry policy.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            step: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (zero based): linear in the retry count.
    #[must_use]
    pub fn delay(&self, retry: u32) -> Duration {
        self.step * (retry + 1)
    }
}

#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base: Resource,
    identity: Arc<dyn IdentityProvider>,
    retry: RetryPolicy,
}

impl ApiClient {
    pub fn new(uri: &str, identity: Arc<dyn IdentityProvider>) -> Result<Self, ClientError> {
        Ok(Self {
            http: Client::new(),
            base: Resource::parse(uri)?,
            identity,
            retry: RetryPolicy::default(),
        })
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn identity(&self) -> &Arc<dyn IdentityProvider> {
        &self.identity
    }

    fn endpoint(&self, path: &str) -> Resource {
        let mut resource = self.base.clone();
        resource.append_path(path);
        resource
    }

    fn endpoint_with_id(&self, path: &str, id: &str) -> Resource {
        let mut resource = self.endpoint(path);
        resource.append_segment(id);
        resource
    }

    async fn request<T, B>(
        &self,
        method: Method,
        resource: &Resource,
        body: Option<&B>,
    ) -> Result<T, ClientError>
    where
        T: DeserializeOwned,
        B: Serialize + Sync + ?Sized,
    {
        let mut retry = 0;
        loop {
            let token = self.identity.id_token().await?;
            let mut builder = self
                .http
                .request(method.clone(), resource.url().clone())
                .bearer_auth(token)
                .header(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            if let Some(body) = body {
                builder = builder.json(body);
            }

            let response = builder.send().await?;
            let status = response.status();
            if status.is_success() {
                return Ok(response.json().await?);
            }

            let detail = read_detail(response).await;
            if status == StatusCode::UNAUTHORIZED {
                if retry < self.retry.max_retries {
                    let delay = self.retry.delay(retry);
                    tracing::warn!(
                        "{method} {resource} unauthorized, retrying in {}ms",
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                    retry += 1;
                    continue;
                }
                tracing::error!("{method} {resource} unauthorized after {retry} retries");
                return Err(ClientError::AuthenticationFailed(
                    detail.unwrap_or_else(|| AUTHENTICATION_FAILED.to_owned()),
                ));
            }

            let detail = detail.unwrap_or_else(|| format!("Request failed: {status}"));
            tracing::error!("{method} {resource} failed: {status} {detail}");
            return Err(ClientError::Api { status, detail });
        }
    }

    async fn get<T: DeserializeOwned>(&self, resource: &Resource) -> Result<T, ClientError> {
        self.request::<T, ()>(Method::GET, resource, None).await
    }

    /// GET without a bearer token, for the public endpoints.
    async fn public_get<T: DeserializeOwned>(&self, resource: &Resource) -> Result<T, ClientError> {
        let response = self.http.get(resource.url().clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            let detail = read_detail(response)
                .await
                .unwrap_or_else(|| format!("Request failed: {status}"));
            tracing::error!("GET {resource} failed: {status} {detail}");
            return Err(ClientError::Api { status, detail });
        }
        Ok(response.json().await?)
    }

    /// Unauthenticated liveness probe.
    pub async fn probe(&self) -> Result<Probe, ClientError> {
        self.public_get(&self.endpoint("auth/test")).await
    }

    pub async fn verify_user(&self) -> Result<UserInfo, ClientError> {
        self.get(&self.endpoint("auth/verify")).await
    }

    pub async fn user_info(&self, user_id: &str) -> Result<UserInfo, ClientError> {
        self.get(&self.endpoint_with_id("auth/user", user_id)).await
    }

    /// Sends one file as a multipart form with a single `file` field.
    ///
    /// The content type is left to the transport so it can add the boundary.
    pub async fn upload_file(&self, file: &UploadFile) -> Result<UploadReceipt, ClientError> {
        let token = self.identity.id_token().await?;
        let form = Form::new().part("file", file.to_part().await?);
        let resource = self.endpoint("files/upload");

        let response = self
            .http
            .post(resource.url().clone())
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let detail = read_detail(response)
                .await
                .unwrap_or_else(|| format!("Upload failed: {status}"));
            tracing::error!("file {} upload failed: {detail}", file.name());
            return Err(ClientError::Api { status, detail });
        }

        let receipt: UploadReceipt = response.json().await?;
        tracing::info!("file {} uploaded as {}", file.name(), receipt.file_id);
        Ok(receipt)
    }

    pub async fn list_files(&self) -> Result<FileList, ClientError> {
        self.get(&self.endpoint("files/list")).await
    }

    pub async fn delete_file(&self, id: &str) -> Result<Message, ClientError> {
        let resource = self.endpoint_with_id("files/delete", id);
        self.request::<_, ()>(Method::DELETE, &resource, None).await
    }

    pub async fn create_checkout_session(
        &self,
        user_id: &str,
        success_url: &str,
        cancel_url: &str,
    ) -> Result<CheckoutSession, ClientError> {
        let body = CheckoutRequest {
            user_id: user_id.to_owned(),
            success_url: success_url.to_owned(),
            cancel_url: cancel_url.to_owned(),
        };
        let resource = self.endpoint("payments/create-checkout-session");
        self.request(Method::POST, &resource, Some(&body)).await
    }

    pub async fn share_file(
        &self,
        file_id: &str,
        description: &str,
    ) -> Result<ShareReceipt, ClientError> {
        let body = ShareRequest {
            file_id: file_id.to_owned(),
            description: description.to_owned(),
        };
        let resource = self.endpoint("community/share");
        self.request(Method::POST, &resource, Some(&body)).await
    }

    /// Community listing is public, so no token is needed.
    pub async fn community_files(
        &self,
        limit: u32,
        offset: u32,
    ) -> Result<CommunityPage, ClientError> {
        let mut resource = self.endpoint("community/files");
        resource
            .append_query("limit", &limit.to_string())
            .append_query("offset", &offset.to_string());
        self.public_get(&resource).await
    }

    pub async fn download_community_file(
        &self,
        id: &str,
    ) -> Result<CommunityDownload, ClientError> {
        let mut resource = self.endpoint_with_id("community", id);
        resource.append_path("download");
        self.request::<_, ()>(Method::POST, &resource, None).await
    }

    pub async fn rate_community_file(
        &self,
        id: &str,
        rating: u8,
    ) -> Result<RateReceipt, ClientError> {
        let mut resource = self.endpoint_with_id("community", id);
        resource.append_path("rate");
        self.request(Method::POST, &resource, Some(&RateRequest { rating }))
            .await
    }

    pub async fn unshare_file(&self, id: &str) -> Result<Message, ClientError> {
        let resource = self.endpoint_with_id("community", id);
        self.request::<_, ()>(Method::DELETE, &resource, None).await
    }
}

/// Reads the `detail` of an error body, if the server sent one.
pub(crate) async fn read_detail(response: Response) -> Option<String> {
    response.json::<ErrorBody>().await.ok().map(|b| b.detail)
}

#[async_trait]
impl FileService for ApiClient {
    async fn verify_user(&self) -> Result<UserInfo, ClientError> {
        ApiClient::verify_user(self).await
    }

    async fn list_files(&self) -> Result<FileList, ClientError> {
        ApiClient::list_files(self).await
    }

    async fn upload_file(&self, file: &UploadFile) -> Result<UploadReceipt, ClientError> {
        ApiClient::upload_file(self, file).await
    }

    async fn delete_file(&self, id: &str) -> Result<Message, ClientError> {
        ApiClient::delete_file(self, id).await
    }
}

#[async_trait]
impl CommunityService for ApiClient {
    async fn share_file(
        &self,
        file_id: &str,
        description: &str,
    ) -> Result<ShareReceipt, ClientError> {
        ApiClient::share_file(self, file_id, description).await
    }

    async fn community_files(
        &self,
        limit: u32,
        offset: u32,
    ) -> Result<CommunityPage, ClientError> {
        ApiClient::community_files(self, limit, offset).await
    }

    async fn download_community_file(
        &self,
        id: &str,
    ) -> Result<CommunityDownload, ClientError> {
        ApiClient::download_community_file(self, id).await
    }

    async fn rate_community_file(
        &self,
        id: &str,
        rating: u8,
    ) -> Result<RateReceipt, ClientError> {
        ApiClient::rate_community_file(self, id, rating).await
    }

    async fn unshare_file(&self, id: &str) -> Result<Message, ClientError> {
        ApiClient::unshare_file(self, id).await
    }
}

#[async_trait]
impl CheckoutService for ApiClient {
    async fn create_checkout_session(
        &self,
        user_id: &str,
        success_url: &str,
        cancel_url: &str,
    ) -> Result<CheckoutSession, ClientError> {
        ApiClient::create_checkout_session(self, user_id, success_url, cancel_url).await
    }
}
