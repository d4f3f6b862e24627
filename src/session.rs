// src/session.rs - recovery service session and image-info queries

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use rand::Rng;
use serde::Serialize;
use tracing::debug;

use crate::config::EndpointConfig;
use crate::error::{Error, Result};
use crate::probe::ProductLookup;
use crate::transport::{HttpRequest, Transport};

pub const INFO_PRODUCT: &str = "AP";
pub const INFO_IMAGE_LINK: &str = "AU";
pub const INFO_IMAGE_HASH: &str = "AH";
pub const INFO_IMAGE_SESS: &str = "AT";
pub const INFO_SIGN_LINK: &str = "CU";
pub const INFO_SIGN_HASH: &str = "CH";
pub const INFO_SIGN_SESS: &str = "CT";

pub const INFO_REQUIRED: [&str; 7] = [
    INFO_PRODUCT,
    INFO_IMAGE_LINK,
    INFO_IMAGE_HASH,
    INFO_IMAGE_SESS,
    INFO_SIGN_LINK,
    INFO_SIGN_HASH,
    INFO_SIGN_SESS,
];

const SESSION_ID_LEN: usize = 16;
const K_LEN: usize = 64;
const FG_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// The release the board shipped with.
    Default,
    Latest,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Default => "default",
            Channel::Latest => "latest",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload {
    Recovery,
    Diagnostics,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageQuery {
    pub board_id: String,
    pub mlb: String,
    pub payload: Payload,
    /// Ignored for diagnostics.
    pub channel: Channel,
    /// Session correlation id; random when unset.
    pub cid: Option<String>,
}

impl ImageQuery {
    pub fn recovery(board_id: &str, mlb: &str, channel: Channel) -> Self {
        Self {
            board_id: board_id.to_string(),
            mlb: mlb.to_string(),
            payload: Payload::Recovery,
            channel,
            cid: None,
        }
    }

    /// `key=value` lines in the order the service expects.
    pub fn body_with<R: Rng>(&self, rng: &mut R) -> String {
        let cid = match &self.cid {
            Some(cid) => cid.clone(),
            None => generate_id(rng, SESSION_ID_LEN),
        };
        let mut lines = vec![
            format!("cid={cid}"),
            format!("sn={}", self.mlb),
            format!("bid={}", self.board_id),
            format!("k={}", generate_id(rng, K_LEN)),
            format!("fg={}", generate_id(rng, FG_LEN)),
        ];
        if self.payload == Payload::Recovery {
            lines.push(format!("os={}", self.channel));
        }
        lines.join("\n")
    }

    fn body(&self) -> String {
        self.body_with(&mut rand::thread_rng())
    }
}

/// Uppercase hex of `len` digits.
pub fn generate_id<R: Rng>(rng: &mut R, len: usize) -> String {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    (0..len).map(|_| HEX[rng.gen_range(0..16)] as char).collect()
}

/// One validated metadata answer. Immutable once returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageInfo {
    pub product: String,
    pub image_url: String,
    pub image_hash: String,
    pub image_token: String,
    pub chunklist_url: String,
    pub chunklist_hash: String,
    pub chunklist_token: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extras: BTreeMap<String, String>,
}

impl ImageInfo {
    /// Parse `Key: value` lines. All seven required keys must be present.
    pub fn parse(body: &str) -> Result<Self> {
        let mut fields: BTreeMap<String, String> = body
            .split('\n')
            .filter_map(|line| line.trim_end_matches('\r').split_once(": "))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let mut take = |key: &'static str| fields.remove(key).ok_or(Error::MissingInfoKey(key));
        let product = take(INFO_PRODUCT)?;
        let image_url = take(INFO_IMAGE_LINK)?;
        let image_hash = take(INFO_IMAGE_HASH)?;
        let image_token = take(INFO_IMAGE_SESS)?;
        let chunklist_url = take(INFO_SIGN_LINK)?;
        let chunklist_hash = take(INFO_SIGN_HASH)?;
        let chunklist_token = take(INFO_SIGN_SESS)?;

        Ok(Self {
            product,
            image_url,
            image_hash,
            image_token,
            chunklist_url,
            chunklist_hash,
            chunklist_token,
            extras: fields,
        })
    }
}

/// The `session=...` cookie handed out by the service root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session(String);

impl Session {
    pub fn new(cookie: impl Into<String>) -> Self {
        Self(cookie.into())
    }

    pub fn cookie(&self) -> &str {
        &self.0
    }
}

pub struct RecoveryClient<T> {
    transport: T,
    endpoint: EndpointConfig,
    host: String,
}

impl<T: Transport> RecoveryClient<T> {
    pub fn new(transport: T, endpoint: EndpointConfig) -> Result<Self> {
        let host = endpoint.host()?;
        Ok(Self {
            transport,
            endpoint,
            host,
        })
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn endpoint(&self) -> &EndpointConfig {
        &self.endpoint
    }

    fn service_request(&self, request: HttpRequest) -> HttpRequest {
        request
            .header("Host", self.host.as_str())
            .header("Connection", "close")
            .header("User-Agent", self.endpoint.user_agent.as_str())
    }

    pub async fn open_session(&self) -> Result<Session> {
        let request = self.service_request(HttpRequest::get(self.endpoint.session_url()));
        let response = self.transport.send(request).await?;

        for (name, value) in &response.headers {
            debug!("session header {name}: {value}");
        }
        let session = response
            .header_values("set-cookie")
            .flat_map(|cookie| cookie.split("; "))
            .find(|part| part.starts_with("session="))
            .map(Session::new)
            .ok_or(Error::NoSession);
        session
    }

    pub async fn image_info(&self, session: &Session, query: &ImageQuery) -> Result<ImageInfo> {
        let url = match query.payload {
            Payload::Recovery => self.endpoint.recovery_image_url(),
            Payload::Diagnostics => self.endpoint.diagnostics_url(),
        };
        let request = self
            .service_request(HttpRequest::post(url, query.body()))
            .header("Cookie", session.cookie())
            .header("Content-Type", "text/plain");

        let response = self.transport.send(request).await?;
        let info = ImageInfo::parse(&String::from_utf8_lossy(&response.body))?;
        debug!(
            board = %query.board_id,
            mlb = %query.mlb,
            channel = %query.channel,
            product = %info.product,
            "image info"
        );
        Ok(info)
    }

    /// Open a session and bind it, for repeated product lookups.
    pub async fn into_lookup(self) -> Result<SessionLookup<T>> {
        let session = self.open_session().await?;
        Ok(SessionLookup {
            client: self,
            session,
        })
    }
}

/// A client with an open session, answering recovery-image queries.
pub struct SessionLookup<T> {
    client: RecoveryClient<T>,
    session: Session,
}

impl<T: Transport> SessionLookup<T> {
    pub fn session(&self) -> &Session {
        &self.session
    }
}

#[async_trait]
impl<T: Transport> ProductLookup for SessionLookup<T> {
    async fn image_info(&self, board_id: &str, mlb: &str, channel: Channel) -> Result<ImageInfo> {
        let query = ImageQuery::recovery(board_id, mlb, channel);
        self.client.image_info(&self.session, &query).await
    }
}
