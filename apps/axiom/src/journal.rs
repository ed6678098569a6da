//! # Journal Writer
//!
//! Forwards committed mutations from the engine to an async task that
//! appends them to a file, one JSON object per line. The engine only pushes
//! into an unbounded channel, so the tick path never blocks on I/O.

use axiom_core::{AxiomError, MutationEvent, MutationObserver};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Observer end of the journal channel.
#[derive(Debug)]
pub struct ChannelObserver {
    sender: mpsc::UnboundedSender<MutationEvent>,
}

impl MutationObserver for ChannelObserver {
    fn on_mutation(&self, event: &MutationEvent) {
        if self.sender.send(event.clone()).is_err() {
            tracing::warn!(seq = event.seq, "journal writer gone, event dropped");
        }
    }
}

/// The writer task. Finishes once every observer has been dropped.
#[derive(Debug)]
pub struct JournalWriter {
    path: PathBuf,
    handle: JoinHandle<Result<u64, AxiomError>>,
}

impl JournalWriter {
    /// Create (or truncate) `path` and start writing.
    pub async fn spawn(path: &Path) -> Result<(Self, ChannelObserver), AxiomError> {
        let file = tokio::fs::File::create(path)
            .await
            .map_err(|e| AxiomError::IoError(format!("Create journal: {e}")))?;
        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = tokio::spawn(write_events(file, receiver));
        tracing::info!(path = %path.display(), "journal opened");
        Ok((
            Self {
                path: path.to_path_buf(),
                handle,
            },
            ChannelObserver { sender },
        ))
    }

    /// Wait for the remaining events to be flushed. Returns the number of
    /// events written.
    pub async fn finish(self) -> Result<u64, AxiomError> {
        let written = self
            .handle
            .await
            .map_err(|e| AxiomError::IoError(format!("Journal task: {e}")))??;
        tracing::info!(path = %self.path.display(), written, "journal closed");
        Ok(written)
    }
}

async fn write_events(
    file: tokio::fs::File,
    mut receiver: mpsc::UnboundedReceiver<MutationEvent>,
) -> Result<u64, AxiomError> {
    let mut writer = tokio::io::BufWriter::new(file);
    let mut written = 0u64;
    while let Some(event) = receiver.recv().await {
        let mut line = serde_json::to_vec(&event)
            .map_err(|e| AxiomError::SerializationError(format!("Journal event: {e}")))?;
        line.push(b'\n');
        writer
            .write_all(&line)
            .await
            .map_err(|e| AxiomError::IoError(format!("Write journal: {e}")))?;
        written += 1;
    }
    writer
        .flush()
        .await
        .map_err(|e| AxiomError::IoError(format!("Flush journal: {e}")))?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axiom_core::journal::MutationPayload;
    use axiom_core::{EntityRef, MutationOp, Tick, TokenId, Version};

    #[tokio::test]
    async fn events_are_written_as_json_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("journal.jsonl");
        let (writer, observer) = JournalWriter::spawn(&path).await.expect("spawn");

        for seq in 0..3 {
            observer.on_mutation(&MutationEvent {
                seq,
                tick: Tick(1),
                entity: EntityRef::Token(TokenId(seq)),
                op: MutationOp::Delete,
                before: Some(Version::INITIAL),
                after: None,
                payload: MutationPayload::Removed,
            });
        }
        drop(observer);

        assert_eq!(writer.finish().await.expect("finish"), 3);
        let contents = std::fs::read_to_string(&path).expect("read");
        assert_eq!(contents.lines().count(), 3);
    }
}
