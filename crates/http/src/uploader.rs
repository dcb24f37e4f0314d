use std::future::Future;
use std::io::Cursor;
use std::pin::Pin;

use futures_util::StreamExt;
use reqwest::Body;
use reqwest::multipart::{Form, Part};
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::io::ReaderStream;
use tracing::debug;

use upqueue_core::{
    Capabilities, FileSource, ProgressEvent, SendError, UploadRequest, UploadResponse, Uploader,
};

use crate::{HttpError, STREAM_CHUNK_SIZE};

/// Posts files as multipart form data.
#[derive(Debug, Clone)]
pub struct HttpUploader {
    http: reqwest::Client,
}

impl HttpUploader {
    /// Creates an uploader with a default client.
    pub fn new() -> Result<Self, HttpError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("upqueue/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http })
    }

    /// Wraps an existing client (shared connection pool, custom TLS, ...).
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// What this transport provides: streamed reads of file contents and
    /// progress reporting while the body is sent.
    pub fn capabilities() -> Capabilities {
        Capabilities::FULL
    }

    async fn post(
        &self,
        request: UploadRequest,
        progress: mpsc::Sender<ProgressEvent>,
    ) -> Result<UploadResponse, SendError> {
        let reader: Box<dyn AsyncRead + Send + Sync + Unpin> = match &request.source {
            FileSource::Path(path) => Box::new(tokio::fs::File::open(path).await?),
            FileSource::Memory(data) => Box::new(Cursor::new(data.clone())),
        };

        let total = request.size;
        let mut loaded = 0u64;
        let stream = ReaderStream::with_capacity(reader, STREAM_CHUNK_SIZE).map(move |chunk| {
            if let Ok(bytes) = &chunk {
                loaded += bytes.len() as u64;
                // Progress is best effort; a slow listener just misses events.
                let _ = progress.try_send(ProgressEvent { loaded, total });
            }
            chunk
        });

        let mut part =
            Part::stream_with_length(Body::wrap_stream(stream), total).file_name(request.file_name);
        if !request.mime_type.is_empty() {
            part = part.mime_str(&request.mime_type).map_err(transport)?;
        }

        let mut form = Form::new().part(request.field_name, part);
        for (name, value) in request.extra_fields {
            form = form.text(name, value);
        }

        debug!(endpoint = %request.endpoint, size = total, "posting file");
        let resp = self
            .http
            .post(&request.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(transport)?;

        let status = resp.status();
        let body = resp.text().await.map_err(transport)?;

        if !status.is_success() {
            return Err(SendError::Http {
                status: status.as_u16(),
                body,
            });
        }

        Ok(UploadResponse {
            status: status.as_u16(),
            body,
        })
    }
}

fn transport(err: reqwest::Error) -> SendError {
    SendError::Transport(err.to_string())
}

impl Uploader for HttpUploader {
    fn send(
        &self,
        request: UploadRequest,
        progress: mpsc::Sender<ProgressEvent>,
    ) -> Pin<Box<dyn Future<Output = Result<UploadResponse, SendError>> + Send + '_>> {
        Box::pin(self.post(request, progress))
    }
}
