//! Image domain — pull, build, remove.

use std::path::Path;

use bollard::query_parameters::{BuildImageOptions, CreateImageOptions, RemoveImageOptions};
use futures_util::stream::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::client::{DockerEngine, EngineError};

impl DockerEngine {
    /// Pull an image from a registry. Returns when the pull is complete.
    pub async fn pull_image(&self, reference: &str) -> Result<(), EngineError> {
        let (image, tag) = split_reference(reference);

        let options = Some(CreateImageOptions {
            from_image: Some(image.to_string()),
            tag: Some(tag.to_string()),
            ..Default::default()
        });

        let mut stream = self.client.create_image(options, None, None);

        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    tracing::debug!(status = ?info.status, "Image pull progress");
                }
                Err(e) => return Err(EngineError::from_status(e, reference)),
            }
        }

        Ok(())
    }

    /// Build an image from a context directory.
    ///
    /// The directory is packed into a tar archive and shipped to the engine;
    /// build output lines are forwarded into `lines` as they arrive. A
    /// dropped receiver does not abort the build; cancellation does.
    pub async fn build_image(
        &self,
        context_dir: &Path,
        dockerfile: &str,
        tag: &str,
        lines: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Result<(), EngineError> {
        let tarball = pack_context(context_dir)
            .map_err(|e| EngineError::BuildFailed(format!("packing build context: {}", e)))?;

        let options = BuildImageOptions {
            dockerfile: dockerfile.to_string(),
            t: Some(tag.to_string()),
            rm: true,
            ..Default::default()
        };

        let mut stream =
            self.client
                .build_image(options, None, Some(bollard::body_full(tarball.into())));

        loop {
            let item = tokio::select! {
                item = stream.next() => item,
                _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            };

            let Some(result) = item else { break };
            match result {
                Ok(info) => {
                    if let Some(error) = info.error_detail.and_then(|d| d.message) {
                        let _ = lines.send(format!("ERROR: {}", error)).await;
                        return Err(EngineError::BuildFailed(error));
                    }
                    if let Some(output) = info.stream {
                        for line in output.lines() {
                            if !line.trim().is_empty() {
                                let _ = lines.send(line.to_string()).await;
                            }
                        }
                    }
                }
                Err(e) => return Err(EngineError::from_status(e, tag)),
            }
        }

        Ok(())
    }

    /// List images known to the engine.
    pub async fn list_images(&self) -> Result<Vec<super::ops::ImageDetails>, EngineError> {
        use bollard::query_parameters::ListImagesOptions;

        let options = Some(ListImagesOptions {
            all: false,
            ..Default::default()
        });

        let images = self.client.list_images(options).await?;
        Ok(images
            .into_iter()
            .map(|image| super::ops::ImageDetails {
                id: image.id,
                tags: image.repo_tags,
                size: image.size,
            })
            .collect())
    }

    /// Remove an image by reference.
    pub async fn remove_image(&self, reference: &str, force: bool) -> Result<(), EngineError> {
        let options = Some(RemoveImageOptions {
            force,
            ..Default::default()
        });

        self.client
            .remove_image(reference, options, None)
            .await
            .map_err(|e| EngineError::from_status(e, reference))?;

        Ok(())
    }
}

/// Split `name[:tag]` into name and tag, defaulting the tag to `latest`.
pub(super) fn split_reference(reference: &str) -> (&str, &str) {
    // The tag separator is the last colon after the last slash, so
    // registry ports (`host:5000/app`) are not mistaken for tags.
    match reference.rfind(':') {
        Some(idx) if idx > reference.rfind('/').unwrap_or(0) => {
            (&reference[..idx], &reference[idx + 1..])
        }
        _ => (reference, "latest"),
    }
}

/// Pack a directory into an uncompressed tar archive for the build API.
fn pack_context(dir: &Path) -> std::io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    builder.follow_symlinks(false);
    builder.append_dir_all(".", dir)?;
    builder.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_split_reference() {
        assert_eq!(split_reference("nginx:alpine"), ("nginx", "alpine"));
        assert_eq!(split_reference("nginx"), ("nginx", "latest"));
        assert_eq!(
            split_reference("basepod/blog:latest"),
            ("basepod/blog", "latest")
        );
        assert_eq!(
            split_reference("registry:5000/app"),
            ("registry:5000/app", "latest")
        );
        assert_eq!(
            split_reference("registry:5000/app:v2"),
            ("registry:5000/app", "v2")
        );
    }

    #[test]
    fn test_pack_context_contains_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = std::fs::File::create(dir.path().join("Dockerfile")).unwrap();
        writeln!(f, "FROM scratch").unwrap();

        let bytes = pack_context(dir.path()).unwrap();
        assert!(!bytes.is_empty());

        let mut archive = tar::Archive::new(&bytes[..]);
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().display().to_string())
            .collect();
        assert!(names.iter().any(|n| n.contains("Dockerfile")));
    }
}
