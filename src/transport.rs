// src/transport.rs - HTTP transport seam
// The recovery client only prepares header lists and key=value bodies;
// everything on the wire goes through `Transport`.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::config::EndpointConfig;
use crate::progress::DownloadProgress;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    /// POSTed when present, otherwise the request is a GET.
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post(url: impl Into<String>, body: String) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
            body: Some(body),
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Every value of a (case-insensitive) header, in response order.
    pub fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("writing download failed: {0}")]
    Sink(#[from] std::io::Error),
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// One request, body fully buffered. Non-200 statuses are errors.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;

    /// One GET/POST whose body is streamed into `sink`. Returns bytes written.
    async fn fetch(
        &self,
        request: HttpRequest,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
        progress: &mut (dyn DownloadProgress + Send),
    ) -> Result<u64, TransportError>;
}

pub struct HttpTransport {
    client: reqwest::Client,
    request_timeout: Duration,
}

impl HttpTransport {
    pub fn new(endpoint: &EndpointConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(endpoint.connect_timeout_secs))
            .build()
            .map_err(|source| TransportError::Request {
                url: endpoint.base_url.clone(),
                source,
            })?;
        Ok(Self {
            client,
            request_timeout: Duration::from_secs(endpoint.request_timeout_secs),
        })
    }

    fn build(&self, request: &HttpRequest) -> reqwest::RequestBuilder {
        let mut builder = match &request.body {
            Some(body) => self.client.post(&request.url).body(body.clone()),
            None => self.client.get(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder
    }

    async fn execute(
        &self,
        builder: reqwest::RequestBuilder,
        url: &str,
    ) -> Result<reqwest::Response, TransportError> {
        let response = builder.send().await.map_err(|source| TransportError::Request {
            url: url.to_string(),
            source,
        })?;
        let status = response.status().as_u16();
        debug!(url, status, "response");
        if status != 200 {
            return Err(TransportError::Status {
                url: url.to_string(),
                status,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let builder = self.build(&request).timeout(self.request_timeout);
        let response = self.execute(builder, &request.url).await?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_string(),
                    String::from_utf8_lossy(v.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|source| TransportError::Request {
                url: request.url.clone(),
                source,
            })?
            .to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }

    async fn fetch(
        &self,
        request: HttpRequest,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
        progress: &mut (dyn DownloadProgress + Send),
    ) -> Result<u64, TransportError> {
        let builder = self.build(&request);
        let mut response = self.execute(builder, &request.url).await?;

        progress.begin(response.content_length());
        let mut written = 0u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|source| TransportError::Request {
                url: request.url.clone(),
                source,
            })?
        {
            sink.write_all(&chunk).await?;
            written += chunk.len() as u64;
            progress.advance(written);
        }
        sink.flush().await?;
        progress.finish();
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_builder_keeps_header_order() {
        let req = HttpRequest::post("http://example.test/x", "a=b".into())
            .header("Host", "example.test")
            .header("Cookie", "session=1");
        assert_eq!(req.headers[0].0, "Host");
        assert_eq!(req.header_value("cookie"), Some("session=1"));
        assert_eq!(req.body.as_deref(), Some("a=b"));
        assert!(HttpRequest::get("http://example.test/").body.is_none());
    }

    #[test]
    fn response_header_values_are_case_insensitive() {
        let resp = HttpResponse {
            status: 200,
            headers: vec![
                ("set-cookie".into(), "a=1".into()),
                ("Content-Type".into(), "text/plain".into()),
                ("Set-Cookie".into(), "b=2".into()),
            ],
            body: Vec::new(),
        };
        let cookies: Vec<_> = resp.header_values("Set-Cookie").collect();
        assert_eq!(cookies, vec!["a=1", "b=2"]);
    }
}
