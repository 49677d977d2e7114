//! Three-phase asset upload: reserve, transfer chunks to pre-signed URLs, commit.

use std::fmt;
use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use futures::{TryStreamExt, stream};
use md5::{Digest, Md5};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::client::{AppStoreConnectClient, UploadPhaseRequest};
use crate::context::CallContext;
use crate::envelope::{Empty, Relationships, SingleResponse, resource_body};
use crate::error::{AscError, Result, UploadPhase};
use crate::resources::required_id;

const CHECKSUM_BLOCK: usize = 1 << 20;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpHeader {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub value: String,
}

/// A pre-signed instruction to send `length` bytes starting at `offset`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadOperation {
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub offset: u64,
    #[serde(default)]
    pub length: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<HttpHeader>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub request_headers: Vec<HttpHeader>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageAsset {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetDeliveryState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageAssetAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file_checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub upload_operations: Vec<UploadOperation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_delivery_state: Option<AssetDeliveryState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_asset: Option<ImageAsset>,
}

/// Where a reservation is created and the localization it attaches to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetTarget<'a> {
    pub type_tag: &'a str,
    pub collection: &'a str,
    pub relationship: &'a str,
    pub parent_type: &'a str,
    pub parent_id: &'a str,
}

/// Lifecycle of one upload. `Done` is only ever reported through
/// [`UploadOutcome::state`]; an upload that reaches `Failed` is returned as
/// [`AscError::Upload`] naming the phase that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Reserved,
    Transferring,
    Committing,
    Done,
    Failed,
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Reserved => "reserved",
            Self::Transferring => "transferring",
            Self::Committing => "committing",
            Self::Done => "done",
            Self::Failed => "failed",
        })
    }
}

#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub reservation_id: String,
    pub state: UploadState,
    pub file_name: String,
    pub file_size: u64,
    /// Lowercase hex MD5 of the whole file.
    pub checksum: String,
    pub chunks: usize,
    /// The committed asset, when the server returned one.
    pub asset: Option<SingleResponse<ImageAssetAttributes>>,
}

impl UploadOutcome {
    pub fn delivery_state(&self) -> Option<&str> {
        self.asset
            .as_ref()
            .and_then(|doc| doc.data.attributes.asset_delivery_state.as_ref())
            .and_then(|state| state.state.as_deref())
    }
}

/// Drives one file through reserve, transfer and commit. Each call to
/// [`UploadCoordinator::upload`] owns its own state, so one coordinator can
/// serve concurrent uploads.
pub struct UploadCoordinator<'c> {
    client: &'c AppStoreConnectClient,
    max_inflight_chunks: usize,
}

impl<'c> UploadCoordinator<'c> {
    pub fn new(client: &'c AppStoreConnectClient) -> Self {
        Self {
            client,
            max_inflight_chunks: client.settings().max_inflight_chunks.max(1),
        }
    }

    pub fn with_max_inflight_chunks(mut self, max_inflight_chunks: usize) -> Self {
        self.max_inflight_chunks = max_inflight_chunks.max(1);
        self
    }

    /// Runs all three phases. `Ok` always carries [`UploadState::Done`]; any
    /// `Err` means the upload ended [`UploadState::Failed`] and is an
    /// [`AscError::Upload`] whose phase says how far it got. A failure after
    /// the reservation leaves the reserved asset uncommitted on the server.
    pub async fn upload(
        &self,
        ctx: &CallContext,
        target: &AssetTarget<'_>,
        path: &Path,
    ) -> Result<UploadOutcome> {
        let source = SourceFile::open(path)
            .await
            .map_err(|err| err.in_phase(UploadPhase::Prepare))?;
        let checksum = source
            .md5_hex(ctx)
            .await
            .map_err(|err| err.in_phase(UploadPhase::Prepare))?;
        debug!(file = %source.name, size = source.size, "prepared upload");

        let reservation = self
            .reserve(ctx, target, &source)
            .await
            .map_err(|err| err.in_phase(UploadPhase::Reserve))?;
        let reservation_id = reservation.data.id.trim().to_string();
        let mut state = UploadState::Reserved;
        debug!(reservation = %reservation_id, %state, "upload reserved");

        let operations = reservation.data.attributes.upload_operations;
        let result: Result<Option<SingleResponse<ImageAssetAttributes>>> = async {
            check_tiling(&operations, source.size).map_err(|err| err.in_phase(UploadPhase::Transfer))?;
            advance(&mut state, UploadState::Transferring, &reservation_id);
            self.transfer_all(ctx, &source, &reservation_id, &operations)
                .await?;

            advance(&mut state, UploadState::Committing, &reservation_id);
            self.commit(ctx, target, &reservation_id, &checksum)
                .await
                .map_err(|err| err.in_phase(UploadPhase::Commit))
        }
        .await;

        let asset = match result {
            Ok(asset) => asset,
            Err(err) => {
                advance(&mut state, UploadState::Failed, &reservation_id);
                warn!(reservation = %reservation_id, %state, error = %err, "upload failed");
                return Err(err);
            }
        };
        advance(&mut state, UploadState::Done, &reservation_id);
        let SourceFile { name, size, .. } = source;
        Ok(UploadOutcome {
            reservation_id,
            state,
            file_name: name,
            file_size: size,
            checksum,
            chunks: operations.len(),
            asset,
        })
    }

    async fn reserve(
        &self,
        ctx: &CallContext,
        target: &AssetTarget<'_>,
        source: &SourceFile,
    ) -> Result<SingleResponse<ImageAssetAttributes>> {
        let parent_id = required_id(target.parent_type, target.parent_id)?;
        let attributes = json!({ "fileName": source.name, "fileSize": source.size });
        let relationships =
            Relationships::new().to_one(target.relationship, target.parent_type, parent_id);
        let body = resource_body(target.type_tag, None, Some(&attributes), Some(relationships))?;
        let reservation: SingleResponse<ImageAssetAttributes> = self
            .client
            .do_upload_phase(
                ctx,
                UploadPhaseRequest::Reserve {
                    path: target.collection,
                    body: &body,
                },
            )
            .await?;
        required_id("reservation", &reservation.data.id)?;
        Ok(reservation)
    }

    async fn transfer_all(
        &self,
        ctx: &CallContext,
        source: &SourceFile,
        reservation_id: &str,
        operations: &[UploadOperation],
    ) -> Result<()> {
        stream::iter(operations.iter().map(Ok::<_, AscError>))
            .try_for_each_concurrent(self.max_inflight_chunks, |operation| async move {
                self.transfer(ctx, source, reservation_id, operation)
                    .await
                    .map_err(|err| err.in_phase_at(UploadPhase::Transfer, Some(operation.offset)))
            })
            .await
    }

    async fn transfer(
        &self,
        ctx: &CallContext,
        source: &SourceFile,
        reservation_id: &str,
        operation: &UploadOperation,
    ) -> Result<()> {
        let method = match operation.method.trim() {
            "" => Method::PUT,
            name => Method::from_bytes(name.to_ascii_uppercase().as_bytes()).map_err(|_| {
                AscError::protocol("invalid_upload_method", format!("unsupported method {name:?}"))
            })?,
        };
        let headers: Vec<(String, String)> = operation
            .headers
            .iter()
            .chain(&operation.request_headers)
            .map(|header| (header.name.clone(), header.value.clone()))
            .collect();
        let body = ctx
            .run(source.read_chunk(operation.offset, operation.length))
            .await??;
        let key = format!("{reservation_id}:{}:{}", operation.offset, operation.length);
        self.client
            .do_upload_phase::<Empty>(
                ctx,
                UploadPhaseRequest::Transfer {
                    method,
                    url: &operation.url,
                    headers: &headers,
                    body,
                    idempotency_key: &key,
                },
            )
            .await?;
        debug!(offset = operation.offset, length = operation.length, "chunk transferred");
        Ok(())
    }

    async fn commit(
        &self,
        ctx: &CallContext,
        target: &AssetTarget<'_>,
        reservation_id: &str,
        checksum: &str,
    ) -> Result<Option<SingleResponse<ImageAssetAttributes>>> {
        let attributes = json!({ "uploaded": true, "sourceFileChecksum": checksum });
        let body = resource_body(target.type_tag, Some(reservation_id), Some(&attributes), None)?;
        let path = format!("{}/{}", target.collection, reservation_id);
        let response: Value = self
            .client
            .do_upload_phase(ctx, UploadPhaseRequest::Commit { path: &path, body: &body })
            .await?;
        if response.is_null() {
            return Ok(None);
        }
        serde_json::from_value(response).map(Some).map_err(|err| {
            AscError::protocol("decode", format!("failed to parse commit response: {err}"))
        })
    }
}

fn advance(state: &mut UploadState, next: UploadState, reservation_id: &str) {
    debug!(reservation = %reservation_id, from = %state, to = %next, "upload state");
    *state = next;
}

/// Operations must cover `[0, size)` exactly once: no gaps, overlaps or empty chunks.
pub fn check_tiling(operations: &[UploadOperation], size: u64) -> Result<()> {
    if operations.is_empty() {
        return Err(AscError::protocol(
            "no_upload_operations",
            "reservation returned no upload operations",
        ));
    }
    let mut ordered: Vec<&UploadOperation> = operations.iter().collect();
    ordered.sort_by_key(|operation| operation.offset);

    let mut expected = 0u64;
    for operation in ordered {
        if operation.url.trim().is_empty() || operation.length == 0 {
            return Err(AscError::protocol(
                "invalid_upload_operation",
                format!("operation at offset {} has no URL or no bytes", operation.offset),
            ));
        }
        if operation.offset != expected {
            return Err(AscError::protocol(
                "upload_operations_mismatch",
                format!(
                    "operation at offset {} does not continue at byte {expected}",
                    operation.offset
                ),
            ));
        }
        expected = operation.offset.checked_add(operation.length).ok_or_else(|| {
            AscError::protocol("upload_operations_mismatch", "operation length overflows")
        })?;
    }
    if expected != size {
        return Err(AscError::protocol(
            "upload_operations_mismatch",
            format!("operations cover {expected} bytes of a {size}-byte file"),
        ));
    }
    Ok(())
}

/// A source file opened once and read positionally by concurrent chunk readers.
struct SourceFile {
    file: Arc<File>,
    name: String,
    size: u64,
}

impl SourceFile {
    async fn open(path: &Path) -> Result<Self> {
        let path = path.to_path_buf();
        blocking(move || {
            let file = File::open(&path)?;
            let metadata = file.metadata()?;
            if !metadata.is_file() {
                return Err(AscError::InvalidArgument(format!(
                    "{} is not a regular file",
                    path.display()
                )));
            }
            if metadata.len() == 0 {
                return Err(AscError::InvalidArgument(format!("{} is empty", path.display())));
            }
            let name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .ok_or_else(|| {
                    AscError::InvalidArgument(format!("{} has no file name", path.display()))
                })?;
            Ok(Self {
                file: Arc::new(file),
                name,
                size: metadata.len(),
            })
        })
        .await
    }

    /// Streams the file through MD5 in fixed-size blocks.
    async fn md5_hex(&self, ctx: &CallContext) -> Result<String> {
        let file = Arc::clone(&self.file);
        let size = self.size;
        let ctx = ctx.clone();
        blocking(move || {
            let mut hasher = Md5::new();
            let mut buffer = vec![0u8; CHECKSUM_BLOCK];
            let mut offset = 0u64;
            while offset < size {
                ctx.check()?;
                let n = (size - offset).min(CHECKSUM_BLOCK as u64) as usize;
                read_exact_at(&file, &mut buffer[..n], offset)?;
                hasher.update(&buffer[..n]);
                offset += n as u64;
            }
            Ok(hex::encode(hasher.finalize()))
        })
        .await
    }

    async fn read_chunk(&self, offset: u64, length: u64) -> Result<Bytes> {
        let file = Arc::clone(&self.file);
        let length = usize::try_from(length).map_err(|_| {
            AscError::protocol("invalid_upload_operation", format!("chunk of {length} bytes"))
        })?;
        blocking(move || {
            let mut buffer = vec![0u8; length];
            read_exact_at(&file, &mut buffer, offset)?;
            Ok(Bytes::from(buffer))
        })
        .await
    }
}

async fn blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| AscError::Io(io::Error::other(err)))?
}

#[cfg(unix)]
fn read_exact_at(file: &File, buffer: &mut [u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buffer, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buffer: &mut [u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buffer.is_empty() {
        match file.seek_read(buffer, offset) {
            Ok(0) => return Err(io::Error::from(io::ErrorKind::UnexpectedEof)),
            Ok(n) => {
                buffer = &mut buffer[n..];
                offset += n as u64;
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(())
}
