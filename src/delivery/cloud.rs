use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode, Url};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{BackendKind, Delivery, DeliveryBackend, images_or_error};
use crate::config::{NextcloudConfig, Secret};
use crate::error::{DeliveryError, ErrorClass};

const SHARE_TYPE_PUBLIC_LINK: &str = "3";
const PERMISSION_READ: &str = "1";

/// Nextcloud upload over WebDAV plus a public link from the OCS share API.
///
/// Files land in `<folder>/<prefix>/<session name>` below the user's root.
#[derive(Debug, Clone)]
pub struct NextcloudBackend {
    client: Client,
    base: Url,
    username: String,
    password: Secret,
    remote_root: Vec<String>,
    request_timeout: Duration,
    upload_timeout: Duration,
    mkcol: Method,
}

impl NextcloudBackend {
    pub fn new(cfg: &NextcloudConfig, prefix: &str) -> Result<Self> {
        let base = Url::parse(cfg.url.trim().trim_end_matches('/'))
            .with_context(|| format!("invalid nextcloud url {:?}", cfg.url))?;
        if base.cannot_be_a_base() {
            return Err(anyhow!("nextcloud url {} cannot carry a path", base));
        }
        let remote_root = cfg
            .folder
            .split('/')
            .chain(prefix.split('/'))
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect();
        let client = Client::builder()
            .build()
            .context("failed to build http client")?;
        let mkcol = Method::from_bytes(b"MKCOL").context("MKCOL method")?;

        Ok(Self {
            client,
            base,
            username: cfg.username.clone(),
            password: cfg.password.clone(),
            remote_root,
            request_timeout: cfg.request_timeout,
            upload_timeout: cfg.upload_timeout,
            mkcol,
        })
    }

    /// Path segments of the remote session folder, relative to the user root.
    pub fn remote_segments(&self, session_name: &str) -> Vec<String> {
        let mut segments = self.remote_root.clone();
        segments.push(session_name.to_string());
        segments
    }

    fn dav_url(&self, segments: &[String]) -> Result<Url, DeliveryError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| DeliveryError::new(ErrorClass::Configuration, "nextcloud url cannot be a base"))?
            .pop_if_empty()
            .extend(["remote.php", "dav", "files", self.username.as_str()])
            .extend(segments);
        Ok(url)
    }

    fn share_api_url(&self) -> Result<Url, DeliveryError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| DeliveryError::new(ErrorClass::Configuration, "nextcloud url cannot be a base"))?
            .pop_if_empty()
            .extend(["ocs", "v2.php", "apps", "files_sharing", "api", "v1", "shares"]);
        url.set_query(Some("format=json"));
        Ok(url)
    }

    /// Create every level of `segments`; existing collections are fine.
    async fn ensure_collections(&self, segments: &[String]) -> Result<(), DeliveryError> {
        for depth in 1..=segments.len() {
            let url = self.dav_url(&segments[..depth])?;
            let response = self
                .client
                .request(self.mkcol.clone(), url.clone())
                .basic_auth(&self.username, Some(self.password.expose()))
                .timeout(self.request_timeout)
                .send()
                .await
                .map_err(classify_request_error)?;
            match response.status() {
                status if status.is_success() => debug!(%url, "created remote folder"),
                StatusCode::METHOD_NOT_ALLOWED => debug!(%url, "remote folder exists"),
                status => return Err(status_error("MKCOL", status)),
            }
        }
        Ok(())
    }

    async fn upload(&self, segments: &[String], path: &Path) -> Result<(), DeliveryError> {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return Err(DeliveryError::new(
                ErrorClass::Io,
                format!("unsupported file name {}", path.display()),
            ));
        };
        let mut file_segments = segments.to_vec();
        file_segments.push(name.to_string());
        let url = self.dav_url(&file_segments)?;

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|err| DeliveryError::io(&format!("failed to read {}", path.display()), &err))?;
        let response = self
            .client
            .put(url)
            .basic_auth(&self.username, Some(self.password.expose()))
            .timeout(self.upload_timeout)
            .body(bytes)
            .send()
            .await
            .map_err(classify_request_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error("PUT", status));
        }
        debug!(file = name, "uploaded");
        Ok(())
    }

    async fn create_share(&self, segments: &[String]) -> Result<Delivery, DeliveryError> {
        let remote_path = format!("/{}", segments.join("/"));
        let response = self
            .client
            .post(self.share_api_url()?)
            .basic_auth(&self.username, Some(self.password.expose()))
            .header("OCS-APIRequest", "true")
            .header(reqwest::header::ACCEPT, "application/json")
            .timeout(self.request_timeout)
            .form(&[
                ("path", remote_path.as_str()),
                ("shareType", SHARE_TYPE_PUBLIC_LINK),
                ("permissions", PERMISSION_READ),
            ])
            .send()
            .await
            .map_err(classify_request_error)?;

        let status = response.status();
        if status != StatusCode::OK && status != StatusCode::CREATED {
            return Ok(Delivery::Declined {
                reason: format!("share api answered {status}"),
            });
        }
        let envelope: OcsEnvelope = match response.json().await {
            Ok(envelope) => envelope,
            Err(err) => {
                return Ok(Delivery::Declined {
                    reason: format!("unreadable share response: {err}"),
                });
            }
        };
        Ok(envelope.into_delivery())
    }
}

#[async_trait]
impl DeliveryBackend for NextcloudBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Cloud
    }

    async fn send(
        &self,
        session_dir: &Path,
        _recipient: Option<&str>,
    ) -> Result<Delivery, DeliveryError> {
        let session_name = session_dir
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                DeliveryError::new(
                    ErrorClass::Io,
                    format!("session {} has no usable name", session_dir.display()),
                )
            })?;
        let images = images_or_error(session_dir)?;
        let segments = self.remote_segments(session_name);

        self.ensure_collections(&segments).await?;
        for image in &images {
            self.upload(&segments, image).await?;
        }
        let delivery = self.create_share(&segments).await?;
        match &delivery {
            Delivery::Shared { url } => {
                info!(session = %session_dir.display(), files = images.len(), %url, "session shared")
            }
            Delivery::Declined { reason } => {
                warn!(session = %session_dir.display(), %reason, "share link not created")
            }
            Delivery::Sent => {}
        }
        Ok(delivery)
    }
}

#[derive(Debug, Deserialize)]
struct OcsEnvelope {
    ocs: Ocs,
}

#[derive(Debug, Deserialize)]
struct Ocs {
    meta: OcsMeta,
    /// An object on success; Nextcloud sends `[]` on failure.
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct OcsMeta {
    status: String,
    #[serde(default)]
    statuscode: Option<i64>,
    #[serde(default)]
    message: Option<String>,
}

impl OcsEnvelope {
    fn into_delivery(self) -> Delivery {
        let Ocs { meta, data } = self.ocs;
        let url = data
            .get("url")
            .and_then(|u| u.as_str())
            .filter(|u| !u.is_empty())
            .map(str::to_string);
        match (meta.status.as_str(), url) {
            ("ok", Some(url)) => Delivery::Shared { url },
            _ => Delivery::Declined {
                reason: format!(
                    "ocs {} {}: {}",
                    meta.status,
                    meta.statuscode.map(|c| c.to_string()).unwrap_or_default(),
                    meta.message.unwrap_or_default()
                ),
            },
        }
    }
}

fn classify_request_error(err: reqwest::Error) -> DeliveryError {
    let class = if err.is_timeout() {
        ErrorClass::Timeout
    } else if err.is_connect() {
        ErrorClass::Connection
    } else {
        ErrorClass::Remote
    };
    DeliveryError::new(class, err.to_string())
}

fn status_error(verb: &str, status: StatusCode) -> DeliveryError {
    let class = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ErrorClass::Authentication,
        _ => ErrorClass::Remote,
    };
    DeliveryError::new(class, format!("{verb} answered {status}"))
}
