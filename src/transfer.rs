//! Chunked upload of one sequence file along a pre-signed URL plan.

use tokio_util::sync::CancellationToken;

use crate::{
    attach::SequenceFile,
    error::UploadFailure,
    gateway::{CompletedChunk, FinishUpload, Gateway},
};

/// How a transfer ended without failing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferOutcome {
    /// All chunks uploaded and the upload finished.
    Completed,
    /// Stopped before a chunk because the batch was cancelled; nothing was finished.
    Cancelled,
}

/// Percentage after `done` of `total` chunks; 100 is reserved for the last chunk.
pub fn chunk_progress(done: usize, total: usize) -> u8 {
    if total == 0 || done >= total {
        return 100;
    }
    let pct = (done as f64 * 100.0 / total as f64).round() as u8;
    pct.min(99)
}

/// Upload `file` chunk by chunk, then finish the multipart upload.
///
/// Chunks go out strictly in URL order, one at a time. `on_progress` is called
/// after every chunk with a non-decreasing percentage.
pub async fn transfer_file(
    gateway: &dyn Gateway,
    file: &SequenceFile,
    reference_id: &str,
    cancel: &CancellationToken,
    mut on_progress: impl FnMut(u8) + Send,
) -> Result<TransferOutcome, UploadFailure> {
    let transfer_err = |source| UploadFailure::Transfer {
        file: file.name.clone(),
        source,
    };

    let plan = gateway
        .upload_plan(reference_id, file.size)
        .await
        .map_err(transfer_err)?;
    let total = plan.presigned_urls.len();
    if plan.part_size_bytes == 0 && total > 0 {
        return Err(UploadFailure::InvalidPlan {
            file: file.name.clone(),
        });
    }
    tracing::debug!(
        "uploading {} in {total} chunks of {} bytes",
        file.name,
        plan.part_size_bytes
    );

    let mut completed = Vec::with_capacity(total);
    for (i, url) in plan.presigned_urls.iter().enumerate() {
        if cancel.is_cancelled() {
            tracing::info!("upload of {} stopped after {i} of {total} chunks", file.name);
            return Ok(TransferOutcome::Cancelled);
        }
        let start = i as u64 * plan.part_size_bytes;
        let end = (start + plan.part_size_bytes).min(file.size);
        let bytes = file
            .read_range(start, end)
            .await
            .map_err(|source| UploadFailure::Read {
                file: file.name.clone(),
                source,
            })?;
        let e_tag = gateway.upload_chunk(url, bytes).await.map_err(transfer_err)?;
        completed.push(CompletedChunk {
            part_number: i as u32 + 1,
            e_tag,
        });
        on_progress(chunk_progress(i + 1, total));
    }

    let finish = FinishUpload {
        upload_id: plan.upload_id,
        completed_chunks: completed,
    };
    gateway
        .finish_upload(reference_id, &finish)
        .await
        .map_err(transfer_err)?;
    if total == 0 {
        on_progress(100);
    }
    Ok(TransferOutcome::Completed)
}
