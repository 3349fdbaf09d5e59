use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{ChunkTransferEngine, TransferError};

/// Per-chunk progress hook shared across tasks. Receives the byte count of
/// each completed chunk.
pub type ChunkCallback = Arc<dyn Fn(usize) + Send + Sync>;

/// How a [`drive`] run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveOutcome {
    /// The engine reached the end of its data.
    Completed,
    /// The token fired between two chunks. The engine is still open.
    Cancelled,
}

/// Runs `engine` chunk by chunk until its data is exhausted.
///
/// `cancel` is checked before every chunk, so a cancelled run stops after at
/// most one further chunk. The engine is left open either way; closing it is
/// the caller's job.
pub async fn drive(
    engine: &mut ChunkTransferEngine,
    cancel: &CancellationToken,
    mut on_chunk: impl FnMut(usize) + Send,
) -> Result<DriveOutcome, TransferError> {
    let mut chunks = 0u64;
    while engine.has_data_left() {
        if cancel.is_cancelled() {
            info!(
                handle = %engine.handle(),
                chunks,
                bytes = engine.bytes_transferred(),
                "transfer cancelled"
            );
            return Ok(DriveOutcome::Cancelled);
        }
        engine.transfer_chunk(&mut on_chunk).await?;
        chunks += 1;
    }
    debug!(
        handle = %engine.handle(),
        chunks,
        bytes = engine.bytes_transferred(),
        "transfer drained"
    );
    Ok(DriveOutcome::Completed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use endpoint_bridge::MemoryBridge;
    use endpoint_protocol::FileMeta;

    #[tokio::test]
    async fn drives_to_completion() {
        let bridge = Arc::new(MemoryBridge::new());
        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let mut engine = ChunkTransferEngine::create_from_buffer(
            bridge.clone(),
            "s",
            &FileMeta::default(),
            data.clone(),
            64,
        )
        .await
        .unwrap();

        let mut total = 0;
        let outcome = drive(&mut engine, &CancellationToken::new(), |n| total += n)
            .await
            .unwrap();
        assert_eq!(outcome, DriveOutcome::Completed);
        assert_eq!(total, 1000);

        let id = engine.close().await.unwrap();
        assert_eq!(bridge.file_data(&id).unwrap(), data);
    }

    #[tokio::test]
    async fn cancel_after_third_chunk_stops_early() {
        let bridge = Arc::new(MemoryBridge::new());
        let mut engine = ChunkTransferEngine::create_from_buffer(
            bridge.clone(),
            "s",
            &FileMeta::default(),
            vec![0u8; 100],
            10,
        )
        .await
        .unwrap();

        let cancel = CancellationToken::new();
        let mut calls = 0;
        let mut bytes = 0;
        let outcome = drive(&mut engine, &cancel, |n| {
            calls += 1;
            bytes += n;
            if calls == 3 {
                cancel.cancel();
            }
        })
        .await
        .unwrap();

        assert_eq!(outcome, DriveOutcome::Cancelled);
        assert!(bytes <= 40);
        assert!(engine.has_data_left());
        engine.close().await.unwrap();
    }

    #[tokio::test]
    async fn pre_cancelled_token_moves_nothing() {
        let bridge = Arc::new(MemoryBridge::new());
        let file_id = bridge.insert_file("s", FileMeta::default(), vec![1; 10]);
        let mut engine = ChunkTransferEngine::open_to_buffer(bridge.clone(), &file_id, 4)
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = drive(&mut engine, &cancel, |_| panic!("no chunk expected"))
            .await
            .unwrap();
        assert_eq!(outcome, DriveOutcome::Cancelled);
        assert_eq!(engine.bytes_transferred(), 0);
    }
}
