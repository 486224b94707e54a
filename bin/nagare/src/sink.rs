use std::{
    collections::{hash_map::Entry, HashMap},
    path::PathBuf,
};

use bytes::Bytes;
use nagare::{manifest::ContentType, sink::BufferSink, NagareResult};
use tokio::{
    fs::{File, OpenOptions},
    io::AsyncWriteExt,
    sync::Mutex,
};

/// Writes every source to `<output>/<content type>.mp4`.
///
/// Files are append-only, so removals are ignored.
pub struct FileSink {
    output: PathBuf,
    files: Mutex<HashMap<ContentType, File>>,
}

impl FileSink {
    pub fn new(output: PathBuf) -> Self {
        Self {
            output,
            files: Mutex::new(HashMap::new()),
        }
    }

    fn path(&self, content_type: ContentType) -> PathBuf {
        self.output.join(format!("{}.mp4", content_type.as_str()))
    }
}

#[async_trait::async_trait]
impl BufferSink for FileSink {
    async fn create(
        &self,
        content_type: ContentType,
        mime_type: Option<&str>,
        codecs: Option<&str>,
    ) -> NagareResult<()> {
        tokio::fs::create_dir_all(&self.output).await?;
        let path = self.path(content_type);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .await?;
        tracing::info!(path = %path.display(), mime_type, codecs, "Writing {content_type}");
        self.files.lock().await.insert(content_type, file);
        Ok(())
    }

    async fn append(&self, content_type: ContentType, data: Bytes) -> NagareResult<()> {
        let mut files = self.files.lock().await;
        let file = match files.entry(content_type) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(self.path(content_type))
                    .await?;
                entry.insert(file)
            }
        };
        file.write_all(&data).await?;
        file.flush().await?;
        Ok(())
    }

    async fn remove(&self, content_type: ContentType, start: f64, end: f64) -> NagareResult<()> {
        tracing::trace!(%content_type, start, end, "Ignoring buffer removal");
        Ok(())
    }
}
