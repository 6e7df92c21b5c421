//! Image presence checks and pulls for helper containers

use bollard::image::CreateImageOptions;
use futures_util::StreamExt;
use tracing::debug;

use super::{DockerClient, EngineError};

/// Split `repo[:tag]` into repository and tag, defaulting to `latest`
///
/// A colon inside the registry part (`registry:5000/etcd`) is not a tag.
pub fn split_image_reference(image: &str) -> (&str, &str) {
    match image.rfind(':') {
        Some(idx) if !image[idx..].contains('/') => (&image[..idx], &image[idx + 1..]),
        _ => (image, "latest"),
    }
}

/// Check if an image exists on the host
pub async fn image_exists(client: &DockerClient, image: &str) -> Result<bool, EngineError> {
    let (repo, tag) = split_image_reference(image);
    let full_name = format!("{repo}:{tag}");
    debug!(
        "Checking if image {} exists on host [{}]",
        full_name,
        client.host_name()
    );

    match client.inner().inspect_image(&full_name).await {
        Ok(_) => Ok(true),
        Err(bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        }) => Ok(false),
        Err(e) => Err(EngineError::from(e)),
    }
}

/// Pull an image onto the host
pub async fn pull_image(client: &DockerClient, image: &str) -> Result<(), EngineError> {
    let (repo, tag) = split_image_reference(image);
    debug!("Pulling image {}:{} on host [{}]", repo, tag, client.host_name());

    let options = CreateImageOptions {
        from_image: repo,
        tag,
        ..Default::default()
    };

    let mut stream = client.inner().create_image(Some(options), None, None);
    while let Some(result) = stream.next().await {
        match result {
            Ok(info) => {
                if let Some(error) = info.error {
                    return Err(EngineError::Pull(format!("{repo}:{tag}: {error}")));
                }
                if let Some(status) = info.status {
                    debug!("[{}] {}", client.host_name(), status);
                }
            }
            Err(e) => return Err(EngineError::Pull(format!("{repo}:{tag}: {e}"))),
        }
    }

    Ok(())
}

/// Pull the image unless it is already present
pub async fn ensure_image(client: &DockerClient, image: &str) -> Result<(), EngineError> {
    if image_exists(client, image).await? {
        return Ok(());
    }
    pull_image(client, image).await
}
