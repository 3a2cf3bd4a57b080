//! File-share artifact retrieval.
//!
//! TAK clients announce attachments with a `fileshare` detail pointing at
//! their own mission package server, which expects the same client
//! certificate the bridge uses for its TAK session.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Certificate, Client, Identity};
use std::path::Path;
use takbridge_core::config::TakConfig;
use takbridge_core::FileTransferError;
use tracing::debug;

/// Fetches artifact bytes from a sender URL.
#[async_trait]
pub trait FileFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Bytes, FileTransferError>;
}

/// HTTPS fetcher presenting the TAK client certificate.
#[derive(Debug, Clone)]
pub struct HttpFileFetcher {
    client: Client,
}

impl HttpFileFetcher {
    pub fn new(
        cert_file: &Path,
        key_file: &Path,
        ca_file: Option<&Path>,
        verify_server: bool,
    ) -> Result<Self, FileTransferError> {
        let mut pem = read(cert_file)?;
        pem.push(b'\n');
        pem.extend(read(key_file)?);
        let identity = Identity::from_pem(&pem).map_err(identity_error)?;

        let mut builder = Client::builder()
            .use_rustls_tls()
            .identity(identity)
            .danger_accept_invalid_certs(!verify_server);

        if let Some(ca_file) = ca_file {
            let ca = Certificate::from_pem(&read(ca_file)?).map_err(identity_error)?;
            builder = builder.add_root_certificate(ca);
        }

        let client = builder.build().map_err(identity_error)?;
        Ok(Self { client })
    }

    pub fn from_tak(tak: &TakConfig) -> Result<Self, FileTransferError> {
        Self::new(
            &tak.cert_file,
            &tak.key_file,
            tak.ca_file.as_deref(),
            tak.verify_server,
        )
    }
}

#[async_trait]
impl FileFetcher for HttpFileFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes, FileTransferError> {
        let fetch_error = |e: reqwest::Error| FileTransferError::Fetch {
            url: url.to_string(),
            reason: e.to_string(),
        };

        let response = self.client.get(url).send().await.map_err(fetch_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FileTransferError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(fetch_error)?;
        debug!(url = %url, bytes = body.len(), "Fetched file-share artifact");
        Ok(body)
    }
}

fn read(path: &Path) -> Result<Vec<u8>, FileTransferError> {
    std::fs::read(path).map_err(|e| FileTransferError::Identity {
        reason: format!("{}: {}", path.display(), e),
    })
}

fn identity_error(e: reqwest::Error) -> FileTransferError {
    FileTransferError::Identity {
        reason: e.to_string(),
    }
}

/// Final path component of a sender-supplied filename.
pub fn sanitize_filename(filename: &str) -> String {
    filename
        .rsplit(['/', '\\'])
        .find(|part| !part.is_empty() && *part != "." && *part != "..")
        .unwrap_or("file")
        .to_string()
}

/// Name of the stored artifact for a record: `{uid}_{filename}`.
pub fn artifact_name(uid: &str, filename: &str) -> String {
    format!("{}_{}", sanitize_filename(uid), sanitize_filename(filename))
}
