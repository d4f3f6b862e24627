// src/download.rs - fetch a recovery image and its chunklist, then verify

use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::fs::{self, File};
use tokio::io::BufWriter;
use tracing::{error, info};

use crate::chunklist::{self, ChunkObserver, TrustAnchor, VerifiedImage};
use crate::config::host_of;
use crate::error::{Error, Result};
use crate::progress::DownloadProgress;
use crate::session::{ImageInfo, ImageQuery, RecoveryClient};
use crate::transport::{HttpRequest, Transport};

/// File name for a download: `name` when given, else the URL's last path
/// segment. Anything that could leave the output directory is refused.
pub fn target_name(url: &str, name: Option<&str>) -> Result<String> {
    let name = match name {
        Some(name) => name.to_string(),
        None => {
            let parsed = reqwest::Url::parse(url).map_err(|_| Error::InvalidUrl(url.to_string()))?;
            parsed
                .path_segments()
                .and_then(|mut segments| segments.next_back())
                .unwrap_or_default()
                .to_string()
        }
    };
    if name.is_empty() || name == "." || name == ".." || name.contains(&['/', '\\'][..]) {
        return Err(Error::InvalidSavePath(name));
    }
    Ok(name)
}

/// Stream one asset into `outdir`, authorized by its asset token.
pub async fn save_asset<T: Transport>(
    transport: &T,
    user_agent: &str,
    url: &str,
    token: &str,
    name: Option<&str>,
    outdir: &Path,
    progress: &mut (dyn DownloadProgress + Send),
) -> Result<PathBuf> {
    let request = HttpRequest::get(url)
        .header("Host", host_of(url)?)
        .header("Connection", "close")
        .header("User-Agent", user_agent)
        .header("Cookie", format!("AssetToken={token}"));

    fs::create_dir_all(outdir).await?;
    let path = outdir.join(target_name(url, name)?);
    info!("saving {url} to {}", path.display());

    let mut file = BufWriter::new(File::create(&path).await?);
    let bytes = transport.fetch(request, &mut file, progress).await?;
    info!(bytes, "saved {}", path.display());
    Ok(path)
}

#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub query: ImageQuery,
    /// `<basename>.chunklist` and `<basename>.dmg` instead of the URL names.
    pub basename: Option<String>,
    pub outdir: PathBuf,
    pub require_signature: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadReport {
    pub info: ImageInfo,
    pub chunklist: PathBuf,
    pub image: PathBuf,
    pub verified: VerifiedImage,
}

/// Session, metadata, chunklist, image, then verification of the image
/// against the chunklist.
pub async fn download_and_verify<T, P>(
    client: &RecoveryClient<T>,
    request: &DownloadRequest,
    anchor: &TrustAnchor,
    progress: &mut P,
) -> Result<DownloadReport>
where
    T: Transport,
    P: DownloadProgress + ChunkObserver + Send,
{
    let session = client.open_session().await?;
    let info = client.image_info(&session, &request.query).await?;
    info!(product = %info.product, "downloading {}", info.product);

    let user_agent = client.endpoint().user_agent.as_str();
    let name = |ext: &str| request.basename.as_ref().map(|b| format!("{b}.{ext}"));

    let chunklist = save_asset(
        client.transport(),
        user_agent,
        &info.chunklist_url,
        &info.chunklist_token,
        name("chunklist").as_deref(),
        &request.outdir,
        &mut *progress,
    )
    .await?;
    let image = save_asset(
        client.transport(),
        user_agent,
        &info.image_url,
        &info.image_token,
        name("dmg").as_deref(),
        &request.outdir,
        &mut *progress,
    )
    .await?;

    let verified = chunklist::verify_files(
        &image,
        &chunklist,
        anchor,
        request.require_signature,
        progress as &mut dyn ChunkObserver,
    )
    .map_err(|e| {
        error!("Image verification failed. ({e})");
        e
    })?;

    Ok(DownloadReport {
        info,
        chunklist,
        image,
        verified,
    })
}
