use crate::progress::LocalFile;
use crate::transfer::engine::PutTransport;
use crate::transfer::error::{TransferError, TransferResult};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Body, Client};
use tokio::sync::watch;

/// Size of the body slices handed to the HTTP client
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// PUTs the whole file to a signed URL, counting bytes as reqwest pulls them
#[derive(Clone)]
pub struct HttpPutTransport {
    client: Client,
    chunk_size: usize,
}

impl HttpPutTransport {
    pub fn new() -> Self {
        Self::with_client(Client::new())
    }

    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }
}

impl Default for HttpPutTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Zero-copy slices of `data`, `chunk_size` bytes each (the last may be short)
fn slices(data: &Bytes, chunk_size: usize) -> Vec<Bytes> {
    (0..data.len())
        .step_by(chunk_size)
        .map(|start| data.slice(start..(start + chunk_size).min(data.len())))
        .collect()
}

#[async_trait]
impl PutTransport for HttpPutTransport {
    async fn put(
        &self,
        url: &str,
        file: &LocalFile,
        progress: watch::Sender<u64>,
    ) -> TransferResult<()> {
        let mut sent = 0u64;
        let stream = futures::stream::iter(slices(file.data(), self.chunk_size)).map(move |chunk| {
            sent += chunk.len() as u64;
            progress.send_replace(sent);
            Ok::<Bytes, std::io::Error>(chunk)
        });

        let response = self
            .client
            .put(url)
            .header(CONTENT_TYPE, file.content_type())
            .header(CONTENT_LENGTH, file.size())
            .body(Body::wrap_stream(stream))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            tracing::debug!("PUT {} for {} returned {}", url, file.name, status);
            Err(TransferError::Status(status.as_u16()))
        }
    }
}
