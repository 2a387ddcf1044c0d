// dbbackupd/src/backup/s3_upload.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3 as s3;
use s3::config::Region;
use s3::primitives::ByteStream;
use s3::types::{CompletedMultipartUpload, CompletedPart};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use super::artifact::{Artifact, UploadReceipt};
use crate::config::{SpacesConfig, UploadOptions};
use crate::errors::BackupError;
use crate::utils::{format_size, with_deadline};

/// S3 rejects multipart parts below 5 MiB, except for the last one.
pub const S3_MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Everything the remote store needs to place one object.
#[derive(Debug, Clone)]
pub struct UploadRequest<'a> {
    pub path: &'a Path,
    pub object_name: &'a str,
    /// Destination folder identifier; `None` uploads to the store root.
    pub folder: Option<&'a str>,
    pub content_type: &'a str,
    pub chunk_size: usize,
    pub resumable: bool,
    pub chunk_timeout: Duration,
}

/// Called with the fraction (0.0..=1.0) acknowledged so far.
pub type Progress<'a> = dyn Fn(f64) + Send + Sync + 'a;

/// Durable object storage for finished archives.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Uploads the whole file and returns the stored object's identifier.
    /// Returning `Ok` means the complete object was acknowledged.
    async fn upload(
        &self,
        request: &UploadRequest<'_>,
        progress: &Progress<'_>,
    ) -> Result<String>;
}

/// One byte range of the source file, sent as one multipart part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartSpan {
    pub number: i32,
    pub offset: u64,
    pub len: u64,
}

/// Splits `total` bytes into consecutive parts of `part_size` (the last may be shorter).
pub fn plan_parts(total: u64, part_size: usize) -> Vec<PartSpan> {
    let part_size = part_size.max(1) as u64;
    let mut parts = Vec::new();
    let mut offset = 0;
    let mut number = 1;
    while offset < total {
        let len = part_size.min(total - offset);
        parts.push(PartSpan {
            number,
            offset,
            len,
        });
        offset += len;
        number += 1;
    }
    parts
}

/// Fraction acknowledged once `part` is stored.
pub fn progress_after(part: &PartSpan, total: u64) -> f64 {
    if total == 0 {
        return 1.0;
    }
    (part.offset + part.len) as f64 / total as f64
}

/// An open multipart upload: parts go in, then it is completed or aborted.
#[async_trait]
pub trait MultipartSession: Send + Sync {
    /// Stores one part and returns its ETag.
    async fn upload_part(&self, part_number: i32, body: Vec<u8>) -> Result<String>;
    async fn complete(&self, parts: Vec<(i32, String)>) -> Result<()>;
    async fn abort(&self) -> Result<()>;
}

/// Streams `path` through `session` part by part, reporting progress after each
/// acknowledged part. Any failure aborts the session before returning.
pub async fn send_in_parts(
    session: &dyn MultipartSession,
    path: &Path,
    part_size: usize,
    chunk_timeout: Duration,
    label: &str,
    progress: &Progress<'_>,
) -> Result<()> {
    let sent = send_parts(session, path, part_size, chunk_timeout, label, progress).await;
    let finished = match sent {
        Ok(parts) => {
            with_deadline(&format!("complete upload of {}", label), chunk_timeout, async {
                session.complete(parts).await
            })
            .await
        }
        Err(e) => Err(e),
    };

    if let Err(e) = finished {
        if let Err(abort_err) = session.abort().await {
            warn!("⚠️ Could not abort multipart upload of {}: {:#}", label, abort_err);
        }
        return Err(e);
    }
    Ok(())
}

async fn send_parts(
    session: &dyn MultipartSession,
    path: &Path,
    part_size: usize,
    chunk_timeout: Duration,
    label: &str,
    progress: &Progress<'_>,
) -> Result<Vec<(i32, String)>> {
    let mut file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let total = file
        .metadata()
        .await
        .with_context(|| format!("Failed to stat {}", path.display()))?
        .len();

    let mut acknowledged = Vec::new();
    for part in plan_parts(total, part_size) {
        let mut buf = vec![0u8; part.len as usize];
        file.read_exact(&mut buf).await.with_context(|| {
            format!("Failed to read part {} of {}", part.number, path.display())
        })?;

        let e_tag = with_deadline(
            &format!("upload part {} of {}", part.number, label),
            chunk_timeout,
            session.upload_part(part.number, buf),
        )
        .await?;
        acknowledged.push((part.number, e_tag));
        progress(progress_after(&part, total));
    }
    Ok(acknowledged)
}

/// S3-compatible store (AWS S3, DigitalOcean Spaces, MinIO, ...).
pub struct S3Store {
    client: s3::Client,
    bucket_name: String,
}

impl S3Store {
    pub async fn connect(spaces_config: &SpacesConfig) -> Self {
        let sdk_config = aws_config::defaults(s3::config::BehaviorVersion::latest())
            .endpoint_url(&spaces_config.endpoint_url)
            .region(Region::new(spaces_config.region.clone()))
            .credentials_provider(s3::config::Credentials::new(
                &spaces_config.access_key_id,
                &spaces_config.secret_access_key,
                None, // session_token
                None, // expiry
                "Static",
            ))
            .load()
            .await;

        Self {
            client: s3::Client::new(&sdk_config),
            bucket_name: spaces_config.bucket_name.clone(),
        }
    }

    async fn put_whole(
        &self,
        request: &UploadRequest<'_>,
        key: &str,
        total: u64,
        part_size: usize,
    ) -> Result<()> {
        let body = ByteStream::from_path(request.path).await.with_context(|| {
            format!(
                "Failed to create ByteStream from file: {}",
                request.path.display()
            )
        })?;

        // One request carries the whole file, so it gets one chunk deadline per part's worth.
        let chunks = total.div_ceil(part_size as u64).max(1) as u32;
        with_deadline(&format!("upload {}", key), request.chunk_timeout * chunks, async {
            self.client
                .put_object()
                .bucket(&self.bucket_name)
                .key(key)
                .content_type(request.content_type)
                .body(body)
                .send()
                .await
                .with_context(|| {
                    format!(
                        "Failed to upload file {} to S3 bucket {} with key {}",
                        request.path.display(),
                        self.bucket_name,
                        key
                    )
                })?;
            Ok(())
        })
        .await
    }
}

/// Multipart upload opened on an S3 bucket.
struct S3Multipart<'a> {
    client: &'a s3::Client,
    bucket_name: &'a str,
    key: &'a str,
    upload_id: String,
}

#[async_trait]
impl MultipartSession for S3Multipart<'_> {
    async fn upload_part(&self, part_number: i32, body: Vec<u8>) -> Result<String> {
        let uploaded = self
            .client
            .upload_part()
            .bucket(self.bucket_name)
            .key(self.key)
            .upload_id(&self.upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send()
            .await
            .with_context(|| format!("Failed to upload part {} of {}", part_number, self.key))?;
        uploaded.e_tag().map(str::to_string).with_context(|| {
            format!(
                "Part {} of {} was acknowledged without an ETag",
                part_number, self.key
            )
        })
    }

    async fn complete(&self, parts: Vec<(i32, String)>) -> Result<()> {
        let parts = parts
            .into_iter()
            .map(|(number, e_tag)| {
                CompletedPart::builder()
                    .e_tag(e_tag)
                    .part_number(number)
                    .build()
            })
            .collect();
        self.client
            .complete_multipart_upload()
            .bucket(self.bucket_name)
            .key(self.key)
            .upload_id(&self.upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .with_context(|| format!("Failed to complete multipart upload for {}", self.key))?;
        Ok(())
    }

    async fn abort(&self) -> Result<()> {
        self.client
            .abort_multipart_upload()
            .bucket(self.bucket_name)
            .key(self.key)
            .upload_id(&self.upload_id)
            .send()
            .await
            .with_context(|| format!("Failed to abort multipart upload {}", self.upload_id))?;
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for S3Store {
    async fn upload(
        &self,
        request: &UploadRequest<'_>,
        progress: &Progress<'_>,
    ) -> Result<String> {
        let key = object_key(request.folder, request.object_name);
        let total = tokio::fs::metadata(request.path)
            .await
            .with_context(|| format!("Failed to stat {}", request.path.display()))?
            .len();
        let part_size = effective_part_size(request.chunk_size);
        debug!(
            "Uploading {} ({} bytes) to bucket {} as {}",
            request.path.display(),
            total,
            self.bucket_name,
            key
        );

        if !request.resumable || total <= part_size as u64 {
            self.put_whole(request, &key, total, part_size).await?;
            progress(1.0);
            return Ok(key);
        }

        let label = format!("start upload of {}", key);
        let created = with_deadline(&label, request.chunk_timeout, async {
            self.client
                .create_multipart_upload()
                .bucket(&self.bucket_name)
                .key(&key)
                .content_type(request.content_type)
                .send()
                .await
                .with_context(|| format!("Failed to start multipart upload for {}", key))
        })
        .await?;
        let session = S3Multipart {
            client: &self.client,
            bucket_name: &self.bucket_name,
            key: &key,
            upload_id: created
                .upload_id()
                .context("Multipart upload was started without an upload id")?
                .to_string(),
        };

        send_in_parts(
            &session,
            request.path,
            part_size,
            request.chunk_timeout,
            &key,
            progress,
        )
        .await?;
        Ok(key)
    }
}

pub fn object_key(folder: Option<&str>, object_name: &str) -> String {
    match folder.map(|f| f.trim_matches('/')).filter(|f| !f.is_empty()) {
        Some(folder) => format!("{}/{}", folder, object_name),
        None => object_name.to_string(),
    }
}

pub fn effective_part_size(chunk_size: usize) -> usize {
    chunk_size.max(S3_MIN_PART_SIZE)
}

/// Uploads one archive and deletes it locally once the store has confirmed it.
pub async fn upload_artifact(
    store: &dyn RemoteStore,
    archive: &Artifact,
    options: &UploadOptions,
    folder: Option<&str>,
    chunk_timeout: Duration,
) -> std::result::Result<UploadReceipt, BackupError> {
    let name = archive.file_name();
    let request = UploadRequest {
        path: &archive.path,
        object_name: &name,
        folder,
        content_type: &options.content_type,
        chunk_size: options.chunk_size,
        resumable: options.resumable,
        chunk_timeout,
    };
    let report = |fraction: f64| {
        info!("Uploading {}: {}% complete", name, (fraction * 100.0) as u32);
    };

    let object_id = store
        .upload(&request, &report)
        .await
        .map_err(|e| BackupError::Upload {
            name: name.clone(),
            message: format!("{:#}", e),
        })?;
    info!(
        "✅ Uploaded {} ({}) as {}",
        name,
        format_size(archive.size_bytes),
        object_id
    );

    match tokio::fs::remove_file(&archive.path).await {
        Ok(()) => info!("Deleted local archive {}", name),
        Err(source) => {
            let err = BackupError::LocalDelete {
                path: archive.path.clone(),
                source,
            };
            warn!("⚠️ {}", err);
        }
    }

    Ok(UploadReceipt {
        owner: archive.owner.clone(),
        object_id,
        size_bytes: archive.size_bytes,
    })
}
