//! Subcommand implementations. Every command runs against a fresh
//! in-memory bridge.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, bail};
use endpoint_bridge::MemoryBridge;
use endpoint_entry::{EntryEvent, TransferState};
use endpoint_protocol::FileMeta;
use endpoint_session::{EndpointSession, TransferConfig, TransferOptions};
use endpoint_transfer::{FileDataSource, LocalFileSource};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

fn session(config: TransferConfig) -> anyhow::Result<(Arc<MemoryBridge>, EndpointSession)> {
    let bridge = Arc::new(MemoryBridge::new());
    let session = EndpointSession::new(bridge.clone(), config)?;
    Ok((bridge, session))
}

/// Cancels the returned token on Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping after the current chunk");
            token.cancel();
        }
    });
    cancel
}

fn file_meta(path: &Path) -> FileMeta {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let public = serde_json::json!({ "name": name });
    FileMeta::new(public.to_string().into_bytes(), Vec::new())
}

fn digest(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

pub async fn roundtrip(
    config: TransferConfig,
    path: &Path,
    store: &str,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    let (_bridge, session) = session(config)?;
    let cancel = cancel_on_ctrl_c();
    let original = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;

    let started = Instant::now();
    let options = TransferOptions::new().with_cancel(cancel.clone());
    let file_id = session
        .start_uploading_new_file(store, path, file_meta(path), options.clone())
        .await
        .context("upload failed")?;
    let uploaded = started.elapsed();

    let copy = match output {
        Some(out) => {
            session
                .start_downloading_to_file(&file_id, out, options)
                .await
                .context("download failed")?;
            tokio::fs::read(out)
                .await
                .with_context(|| format!("reading {}", out.display()))?
        }
        None => session
            .start_downloading_to_buffer(&file_id, options)
            .await
            .context("download failed")?,
    };

    let (expected, actual) = (digest(&original), digest(&copy));
    tracing::info!(
        file_id = %file_id,
        bytes = original.len(),
        upload_ms = uploaded.as_millis() as u64,
        total_ms = started.elapsed().as_millis() as u64,
        "roundtrip finished"
    );
    if expected != actual {
        bail!("digest mismatch: uploaded {expected}, downloaded {actual}");
    }
    println!("{file_id} {actual} {}", original.len());
    Ok(())
}

pub async fn send_entry(
    config: TransferConfig,
    files: &[std::path::PathBuf],
    inbox: &str,
    payload: &[u8],
) -> anyhow::Result<()> {
    let (bridge, session) = session(config)?;

    let mut sources: Vec<Box<dyn FileDataSource>> = Vec::with_capacity(files.len());
    for path in files {
        let source = LocalFileSource::open(path, file_meta(path))
            .await
            .with_context(|| format!("opening {}", path.display()))?;
        sources.push(Box::new(source));
    }

    let mut handler = session.prepare_entry_handler(inbox, payload, sources).await?;
    let mut events = handler.take_events().context("event receiver already taken")?;
    let handler = Arc::new(handler);

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                EntryEvent::FileCompleted { index, bytes } => {
                    tracing::info!(index, bytes, "attachment uploaded");
                }
                EntryEvent::StateChanged { from, to } => {
                    tracing::info!(%from, %to, "entry state changed");
                }
                EntryEvent::FileProgress { .. } => {}
            }
        }
    });

    let interrupt = cancel_on_ctrl_c();
    let watcher = {
        let handler = Arc::clone(&handler);
        tokio::spawn(async move {
            interrupt.cancelled().await;
            let _ = handler.cancel();
        })
    };

    let state = handler.start_sending().await?;
    if state != TransferState::FilesSent {
        watcher.abort();
        match handler.last_error() {
            Some(err) => return Err(err).context("attachments failed"),
            None => bail!("entry stopped in state {state}"),
        }
    }
    handler.send_entry().await?;
    watcher.abort();
    let _ = watcher.await;

    drop(handler);
    let _ = printer.await;

    for entry in bridge.sent_entries() {
        println!("{} {} attachment(s)", entry.entry_id, entry.files.len());
    }
    Ok(())
}

pub fn show_config(config: &TransferConfig, save: Option<&Path>) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    if let Some(path) = save {
        config.save_to(path)?;
        tracing::info!(path = %path.display(), "configuration saved");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> TransferConfig {
        TransferConfig {
            default_chunk_size: 8,
            ..TransferConfig::default()
        }
    }

    #[tokio::test]
    async fn roundtrip_through_output_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.txt");
        let output = dir.path().join("out.txt");
        std::fs::write(&input, b"the quick brown fox jumps over the lazy dog").unwrap();

        roundtrip(small_config(), &input, "store", Some(output.as_path()))
            .await
            .unwrap();
        assert_eq!(std::fs::read(&output).unwrap(), std::fs::read(&input).unwrap());
    }

    #[tokio::test]
    async fn entry_with_two_files() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.bin");
        let b = dir.path().join("b.bin");
        std::fs::write(&a, vec![1u8; 20]).unwrap();
        std::fs::write(&b, b"").unwrap();

        send_entry(small_config(), &[a, b], "inbox", b"payload")
            .await
            .unwrap();
    }

    #[test]
    fn meta_carries_file_name() {
        let meta = file_meta(Path::new("/tmp/report.pdf"));
        let public: serde_json::Value = serde_json::from_slice(&meta.public_meta).unwrap();
        assert_eq!(public["name"], "report.pdf");
        assert!(meta.private_meta.is_empty());
    }

    #[test]
    fn config_can_be_saved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        show_config(&small_config(), Some(&path)).unwrap();
        assert_eq!(TransferConfig::load_from(&path).unwrap(), small_config());
    }
}
