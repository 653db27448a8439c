use reqwest::{Client as HttpClient, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::api::commands::{CommandOutcomeResponse, CommandResponse, EnqueueCommandRequest};
use crate::api::devices::{
    DeviceInfoResponse, DeviceResponse, ListDevicesResponse, ListMeasurementsResponse,
    RegisterDeviceRequest,
};
use crate::api::ingest::IngestResponse;
use crate::identity::API_KEY_HEADER;

/// Error type for API client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Server returned error status {status}: {message}")]
    ServerError { status: u16, message: String },

    #[error("Resource not found")]
    NotFound,

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

/// HTTP API client for atmo-server.
#[derive(Clone)]
pub struct Client {
    http: HttpClient,
    base_url: String,
    api_key: String,
}

impl Client {
    /// Create a new API client with the given base URL and API key.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: HttpClient::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn request(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.header(API_KEY_HEADER, &self.api_key)
    }

    async fn handle<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound);
        }
        if status == StatusCode::BAD_REQUEST {
            return Err(ClientError::BadRequest(response.text().await?));
        }
        if !status.is_success() {
            return Err(ClientError::ServerError {
                status: status.as_u16(),
                message: response.text().await?,
            });
        }

        Ok(response.json().await?)
    }

    /// Submit a measurement envelope.
    pub async fn ingest(&self, envelope: &serde_json::Value) -> Result<IngestResponse, ClientError> {
        let response = self
            .request(self.http.post(format!("{}/api/ingest", self.base_url)))
            .json(envelope)
            .send()
            .await?;
        Self::handle(response).await
    }

    pub async fn register_device(
        &self,
        request: &RegisterDeviceRequest,
    ) -> Result<DeviceResponse, ClientError> {
        let response = self
            .request(self.http.post(format!("{}/api/devices", self.base_url)))
            .json(request)
            .send()
            .await?;
        Self::handle(response).await
    }

    pub async fn list_devices(&self) -> Result<ListDevicesResponse, ClientError> {
        let response = self
            .request(self.http.get(format!("{}/api/devices", self.base_url)))
            .send()
            .await?;
        Self::handle(response).await
    }

    pub async fn get_device(&self, id: &str) -> Result<DeviceResponse, ClientError> {
        let response = self
            .request(self.http.get(format!("{}/api/devices/{id}", self.base_url)))
            .send()
            .await?;
        Self::handle(response).await
    }

    pub async fn device_info(&self, id: &str) -> Result<DeviceInfoResponse, ClientError> {
        let response = self
            .request(
                self.http
                    .get(format!("{}/api/devices/{id}/info", self.base_url)),
            )
            .send()
            .await?;
        Self::handle(response).await
    }

    pub async fn list_measurements(
        &self,
        id: &str,
        limit: Option<usize>,
    ) -> Result<ListMeasurementsResponse, ClientError> {
        let mut builder = self
            .http
            .get(format!("{}/api/devices/{id}/measurements", self.base_url));
        if let Some(limit) = limit {
            builder = builder.query(&[("limit", limit)]);
        }

        let response = self.request(builder).send().await?;
        Self::handle(response).await
    }

    pub async fn enqueue_command(
        &self,
        device_id: &str,
        request: &EnqueueCommandRequest,
    ) -> Result<CommandResponse, ClientError> {
        let response = self
            .request(
                self.http
                    .post(format!("{}/api/devices/{device_id}/commands", self.base_url)),
            )
            .json(request)
            .send()
            .await?;
        Self::handle(response).await
    }

    pub async fn ack_command(&self, id: &str) -> Result<CommandOutcomeResponse, ClientError> {
        let response = self
            .request(
                self.http
                    .post(format!("{}/api/commands/{id}/ack", self.base_url)),
            )
            .send()
            .await?;
        Self::handle(response).await
    }

    pub async fn cancel_command(&self, id: &str) -> Result<CommandOutcomeResponse, ClientError> {
        let response = self
            .request(
                self.http
                    .delete(format!("{}/api/commands/{id}", self.base_url)),
            )
            .send()
            .await?;
        Self::handle(response).await
    }
}
