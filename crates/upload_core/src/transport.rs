use std::time::Duration;

use async_trait::async_trait;
use reqwest::{
    multipart::{Form, Part},
    Client, RequestBuilder, Response,
};
use shared::{
    domain::{LocalFileId, UploadTarget},
    error::ApiError,
    protocol::{
        DeleteFileRequest, UploadResponse, FILES_FIELD, FOLDER_FIELD, PARENT_ID_FIELD,
    },
};
use tracing::info;
use url::Url;

use crate::error::UploadError;

pub const DEFAULT_UPLOAD_PATH: &str = "/api/upload";

/// Everything one upload request carries.
#[derive(Debug, Clone)]
pub struct UploadBatch {
    pub target: UploadTarget,
    pub files: Vec<BatchFile>,
}

#[derive(Debug, Clone)]
pub struct BatchFile {
    pub local_id: LocalFileId,
    pub name: String,
    pub mime_type: Option<String>,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait UploadTransport: Send + Sync {
    /// Sends the whole batch in one request. Any error fails the whole batch.
    async fn upload_batch(&self, batch: UploadBatch) -> Result<UploadResponse, UploadError>;
    /// Deletes a stored object by key. Never called by local removal.
    async fn delete_stored(&self, file_key: &str) -> Result<(), UploadError>;
}

#[derive(Debug, Clone, Default)]
pub struct HttpTransportOptions {
    pub server_url: String,
    pub upload_path: Option<String>,
    pub auth_token: Option<String>,
    pub timeout: Option<Duration>,
}

/// Multipart upload client for the REST upload route.
#[derive(Debug, Clone)]
pub struct HttpUploadTransport {
    http: Client,
    endpoint: Url,
    auth_token: Option<String>,
}

impl HttpUploadTransport {
    pub fn new(server_url: &str) -> Result<Self, UploadError> {
        Self::from_options(HttpTransportOptions {
            server_url: server_url.to_string(),
            ..HttpTransportOptions::default()
        })
    }

    pub fn from_options(options: HttpTransportOptions) -> Result<Self, UploadError> {
        let upload_path = options
            .upload_path
            .as_deref()
            .unwrap_or(DEFAULT_UPLOAD_PATH);
        let endpoint = upload_endpoint(&options.server_url, upload_path)?;

        let mut builder = Client::builder();
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            http: builder.build()?,
            endpoint,
            auth_token: options.auth_token.filter(|token| !token.is_empty()),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

fn upload_endpoint(server_url: &str, upload_path: &str) -> Result<Url, UploadError> {
    let base = server_url.trim().trim_end_matches('/');
    let path = upload_path.trim();
    let joined = if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    };
    Ok(Url::parse(&joined)?)
}

fn build_form(batch: UploadBatch) -> Result<Form, UploadError> {
    let mut form = Form::new().text(FOLDER_FIELD, batch.target.folder);
    if let Some(parent_id) = batch.target.parent_id {
        form = form.text(PARENT_ID_FIELD, parent_id);
    }

    for file in batch.files {
        let part = Part::bytes(file.bytes).file_name(file.name);
        let part = match file.mime_type.as_deref() {
            Some(mime_type) => part.mime_str(mime_type)?,
            None => part,
        };
        form = form.part(FILES_FIELD, part);
    }

    Ok(form)
}

async fn ensure_success(response: Response) -> Result<Response, UploadError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<ApiError>(&body) {
        Ok(api_error) => api_error.describe(),
        Err(_) if !body.trim().is_empty() => body.trim().to_string(),
        Err(_) => status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string(),
    };

    Err(UploadError::Rejected {
        status: status.as_u16(),
        message,
    })
}

/// Decodes the response body with the explicit schema and rejects descriptors
/// that cannot be addressed later.
pub fn decode_upload_response(body: &[u8]) -> Result<UploadResponse, UploadError> {
    let response: UploadResponse = serde_json::from_slice(body)?;
    if let Some(index) = response.first_unidentified() {
        return Err(UploadError::UnidentifiedFile { index });
    }
    Ok(response)
}

#[async_trait]
impl UploadTransport for HttpUploadTransport {
    async fn upload_batch(&self, batch: UploadBatch) -> Result<UploadResponse, UploadError> {
        let file_count = batch.files.len();
        let total_bytes: usize = batch.files.iter().map(|file| file.bytes.len()).sum();
        info!(
            endpoint = %self.endpoint,
            folder = %batch.target.folder,
            file_count,
            total_bytes,
            "sending upload batch"
        );

        let form = build_form(batch)?;
        let response = self
            .authorize(self.http.post(self.endpoint.clone()).multipart(form))
            .send()
            .await?;
        let response = ensure_success(response).await?;
        let body = response.bytes().await?;
        decode_upload_response(&body)
    }

    async fn delete_stored(&self, file_key: &str) -> Result<(), UploadError> {
        info!(endpoint = %self.endpoint, file_key, "deleting stored file");
        let response = self
            .authorize(self.http.delete(self.endpoint.clone()).json(&DeleteFileRequest {
                file_key: file_key.to_string(),
            }))
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
