//! Destinations for a running process's output.
//!
//! Every chunk the runner reads is handed to a [`Tee`], which writes it to each
//! [`OutputSink`] in turn. A sink that fails is logged and detached; the
//! remaining sinks keep receiving output. In practice this means a broken log
//! file never interrupts the client stream, and a disconnected client never
//! stops the log from being written to the end.

use std::io;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

#[async_trait]
pub trait OutputSink: Send {
    fn name(&self) -> &'static str;

    async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()>;

    /// Called once after the last chunk.
    async fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Forwards chunks to the consumer of a [`super::RunningProcess`].
pub struct ChannelSink {
    tx: mpsc::Sender<Vec<u8>>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Vec<u8>>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl OutputSink for ChannelSink {
    fn name(&self) -> &'static str {
        "stream"
    }

    async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.tx
            .send(chunk.to_vec())
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "output stream receiver dropped"))
    }
}

/// Appends chunks to a file, flushing after each one so readers of the file
/// see progress while the process runs.
pub struct FileSink {
    file: tokio::fs::File,
}

impl FileSink {
    pub fn new(file: tokio::fs::File) -> Self {
        Self { file }
    }
}

#[async_trait]
impl OutputSink for FileSink {
    fn name(&self) -> &'static str {
        "log file"
    }

    async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.file.write_all(chunk).await?;
        self.file.flush().await
    }

    async fn finish(&mut self) -> io::Result<()> {
        self.file.flush().await?;
        self.file.sync_all().await
    }
}

/// Writes every chunk to all attached sinks in order.
pub struct Tee {
    label: String,
    sinks: Vec<Box<dyn OutputSink>>,
}

impl Tee {
    pub fn new(label: impl Into<String>, sinks: Vec<Box<dyn OutputSink>>) -> Self {
        Self {
            label: label.into(),
            sinks,
        }
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    pub async fn write(&mut self, chunk: &[u8]) {
        let mut index = 0;
        while index < self.sinks.len() {
            match self.sinks[index].write_chunk(chunk).await {
                Ok(()) => index += 1,
                Err(e) => {
                    let sink = self.sinks.remove(index);
                    detach_log(&self.label, sink.name(), &e);
                }
            }
        }
    }

    pub async fn finish(&mut self) {
        for sink in &mut self.sinks {
            if let Err(e) = sink.finish().await {
                tracing::warn!(run = %self.label, sink = sink.name(), "failed to finish output: {}", e);
            }
        }
        self.sinks.clear();
    }
}

fn detach_log(label: &str, sink: &str, err: &io::Error) {
    if err.kind() == io::ErrorKind::BrokenPipe {
        tracing::debug!(run = %label, sink, "output consumer went away, continuing without it");
    } else {
        tracing::warn!(run = %label, sink, "output write failed, sink detached: {}", err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct MemorySink(Arc<Mutex<Vec<u8>>>);

    #[async_trait]
    impl OutputSink for MemorySink {
        fn name(&self) -> &'static str {
            "memory"
        }

        async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
            self.0.lock().unwrap().extend_from_slice(chunk);
            Ok(())
        }
    }

    struct BrokenSink;

    #[async_trait]
    impl OutputSink for BrokenSink {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn write_chunk(&mut self, _chunk: &[u8]) -> io::Result<()> {
            Err(io::Error::other("disk full"))
        }
    }

    #[tokio::test]
    async fn failing_sink_is_detached_and_others_continue() {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let mut tee = Tee::new(
            "test",
            vec![Box::new(BrokenSink), Box::new(MemorySink(buf.clone()))],
        );
        tee.write(b"one\n").await;
        assert_eq!(tee.sink_count(), 1);
        tee.write(b"two\n").await;
        assert_eq!(&*buf.lock().unwrap(), b"one\ntwo\n");
    }

    #[tokio::test]
    async fn dropped_receiver_detaches_channel_sink() {
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let buf = Arc::new(Mutex::new(Vec::new()));
        let mut tee = Tee::new(
            "test",
            vec![Box::new(ChannelSink::new(tx)), Box::new(MemorySink(buf.clone()))],
        );
        tee.write(b"still logged\n").await;
        assert_eq!(tee.sink_count(), 1);
        assert_eq!(&*buf.lock().unwrap(), b"still logged\n");
    }

    #[tokio::test]
    async fn file_sink_writes_through() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.log");
        let file = tokio::fs::File::create(&path).await.unwrap();
        let mut sink = FileSink::new(file);
        sink.write_chunk(b"hello\n").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"hello\n");
        sink.finish().await.unwrap();
    }
}
