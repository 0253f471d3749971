//! Malware scan bridge.
//!
//! Speaks the clamd `INSTREAM` protocol over a local TCP socket. A threat
//! verdict rejects the upload with 422; scanner unavailability is an
//! infrastructure error, not a pass.

use {
    async_trait::async_trait,
    tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpStream,
    },
    tracing::{debug, warn},
};

use crate::{Result, UploadError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanVerdict {
    Clean,
    Threat(String),
}

#[async_trait]
pub trait MalwareScanner: Send + Sync {
    async fn scan(&self, bytes: &[u8]) -> Result<ScanVerdict>;
}

/// clamd INSTREAM client.
pub struct ClamdScanner {
    addr: String,
}

impl ClamdScanner {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

#[async_trait]
impl MalwareScanner for ClamdScanner {
    async fn scan(&self, bytes: &[u8]) -> Result<ScanVerdict> {
        let mut stream = TcpStream::connect(&self.addr).await.map_err(|e| {
            warn!(addr = %self.addr, error = %e, "malware scanner unreachable");
            UploadError::Message("malware scanner unavailable".into())
        })?;

        stream.write_all(b"zINSTREAM\0").await?;
        for chunk in bytes.chunks(8192) {
            stream.write_all(&(chunk.len() as u32).to_be_bytes()).await?;
            stream.write_all(chunk).await?;
        }
        // Zero-length chunk terminates the stream.
        stream.write_all(&0u32.to_be_bytes()).await?;

        let mut response = Vec::new();
        stream.read_to_end(&mut response).await?;
        let response = String::from_utf8_lossy(&response);
        debug!(response = %response.trim_end_matches('\0'), "scanner verdict");

        if response.contains("FOUND") {
            let threat = response
                .trim_end_matches('\0')
                .trim()
                .trim_start_matches("stream: ")
                .trim_end_matches(" FOUND")
                .to_string();
            return Ok(ScanVerdict::Threat(threat));
        }
        if response.contains("OK") {
            return Ok(ScanVerdict::Clean);
        }
        Err(UploadError::Message(format!(
            "unexpected scanner response: {}",
            response.trim_end_matches('\0')
        )))
    }
}

/// Test double: everything is clean.
pub struct CleanScanner;

#[async_trait]
impl MalwareScanner for CleanScanner {
    async fn scan(&self, _bytes: &[u8]) -> Result<ScanVerdict> {
        Ok(ScanVerdict::Clean)
    }
}
