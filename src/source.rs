//! Transport acquisition: opening the camera's HTTP connection.
//!
//! The slicing engine only needs an open, readable byte stream positioned at
//! the start of the HTTP-style response; this module is the collaborator
//! that produces one. [`HttpCameraSource`] opens the configured URL with
//! `reqwest` (HTTP Basic authentication when credentials are set) and hands
//! back the response re-materialized in wire form: since the HTTP client
//! consumes the response head itself, the status line and headers are
//! rebuilt as CRLF lines and chained in front of the body, so the engine
//! always sees the preamble block it expects.
//!
//! Connection failures are surfaced, never retried; reconnecting means
//! opening a new stream and starting a new session.

use std::io;

use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::io::StreamReader;
use tracing::{debug, info};

use crate::{Result, SliceError};

/// An open byte stream, positioned at the start of the response.
pub type ByteStream = Box<dyn AsyncRead + Send + Unpin>;

/// Connection settings for a network camera.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Camera host name or address.
    pub host: String,
    /// TCP port of the camera's HTTP server.
    pub port: u16,
    /// Request path of the M-JPEG endpoint.
    pub path: String,
    /// User name for HTTP Basic authentication, if the camera requires it.
    pub username: Option<String>,
    /// Password for HTTP Basic authentication.
    pub password: Option<String>,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_owned(),
            port: 80,
            path: "/mjpeg".to_owned(),
            username: None,
            password: None,
        }
    }
}

impl CameraConfig {
    /// The request URL for this configuration.
    pub fn url(&self) -> String {
        format!("http://{}:{}{}", self.host, self.port, self.path)
    }

    /// Whether Basic authentication credentials are configured.
    pub fn uses_authentication(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }
}

/// A collaborator that can open the byte stream the engine slices.
#[async_trait::async_trait]
pub trait StreamSource: Send {
    /// Open the stream. The result must be positioned at the start of the
    /// HTTP-style response, preamble included.
    async fn open_stream(&mut self) -> Result<ByteStream>;
}

/// Opens an authenticated HTTP connection to a network camera.
pub struct HttpCameraSource {
    config: CameraConfig,
    client: reqwest::Client,
}

impl HttpCameraSource {
    /// Create a source for the given camera configuration.
    pub fn new(config: CameraConfig) -> Self {
        Self { config, client: reqwest::Client::new() }
    }

    /// The configuration this source connects with.
    pub fn config(&self) -> &CameraConfig {
        &self.config
    }
}

#[async_trait::async_trait]
impl StreamSource for HttpCameraSource {
    async fn open_stream(&mut self) -> Result<ByteStream> {
        let url = self.config.url();
        info!(%url, "opening camera stream");

        let mut request = self.client.get(&url);
        if self.config.uses_authentication() {
            debug!(user = self.config.username.as_deref(), "using basic authentication");
            request = request.basic_auth(
                self.config.username.as_deref().unwrap_or_default(),
                self.config.password.as_deref(),
            );
        }

        let response = request.send().await.map_err(|e| {
            SliceError::connection_failed_with_source(format!("request to {url} failed"), e)
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SliceError::connection_failed(format!(
                "camera at {url} answered with status {status}"
            )));
        }

        // The HTTP client already parsed the response head, but the engine
        // expects the full wire form. Rebuild the head as CRLF lines and
        // chain it in front of the body stream.
        let mut head = format!("HTTP/1.1 {status}\r\n");
        for (name, value) in response.headers() {
            let value = value.to_str().unwrap_or_default();
            head.push_str(&format!("{name}: {value}\r\n"));
        }
        head.push_str("\r\n");

        let body = StreamReader::new(response.bytes_stream().map_err(io::Error::other));
        Ok(Box::new(std::io::Cursor::new(head.into_bytes()).chain(body)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_formatting() {
        let config = CameraConfig {
            host: "cam.local".to_owned(),
            port: 8080,
            path: "/video.mjpg".to_owned(),
            ..CameraConfig::default()
        };
        assert_eq!(config.url(), "http://cam.local:8080/video.mjpg");
    }

    #[test]
    fn authentication_requires_both_credentials() {
        let mut config = CameraConfig::default();
        assert!(!config.uses_authentication());

        config.username = Some("admin".to_owned());
        assert!(!config.uses_authentication());

        config.password = Some("secret".to_owned());
        assert!(config.uses_authentication());
    }

    #[test]
    fn default_config_targets_local_camera() {
        let config = CameraConfig::default();
        assert_eq!(config.url(), "http://localhost:80/mjpeg");
    }
}
