use std::collections::VecDeque;

use async_trait::async_trait;
use bytes::Bytes;

use crate::{manifest::ContentType, window::SegmentId, NagareResult};

/// Receiver of the downloaded media, one buffer per content type.
#[async_trait]
pub trait BufferSink: Send + Sync {
    /// Called once per source before anything is appended to it.
    async fn create(
        &self,
        _content_type: ContentType,
        _mime_type: Option<&str>,
        _codecs: Option<&str>,
    ) -> NagareResult<()> {
        Ok(())
    }

    async fn append(&self, content_type: ContentType, data: Bytes) -> NagareResult<()>;

    /// Drop `[start, end)` seconds of presentation time from the buffer.
    async fn remove(&self, content_type: ContentType, start: f64, end: f64) -> NagareResult<()>;
}

#[derive(Debug, Clone)]
pub enum SinkOp {
    /// `segment` is `None` for initialization data.
    Append {
        segment: Option<SegmentId>,
        data: Bytes,
    },
    Remove {
        start: f64,
        end: f64,
    },
}

impl SinkOp {
    pub async fn apply(self, sink: &dyn BufferSink, content_type: ContentType) -> NagareResult<()> {
        match self {
            SinkOp::Append { data, .. } => sink.append(content_type, data).await,
            SinkOp::Remove { start, end } => sink.remove(content_type, start, end).await,
        }
    }
}

/// FIFO of buffer operations of one source. At most one of them is handed
/// out at a time.
#[derive(Debug, Default)]
pub struct SinkQueue {
    queue: VecDeque<SinkOp>,
    in_flight: bool,
}

impl SinkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: SinkOp) {
        self.queue.push_back(op);
    }

    /// The next operation to run, unless one is still running.
    pub fn next(&mut self) -> Option<SinkOp> {
        if self.in_flight {
            return None;
        }
        let op = self.queue.pop_front()?;
        self.in_flight = true;
        Some(op)
    }

    pub fn done(&mut self) {
        self.in_flight = false;
    }

    pub fn is_idle(&self) -> bool {
        !self.in_flight && self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len() + usize::from(self.in_flight)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget queued operations. The running one, if any, still has to
    /// report back through [`SinkQueue::done`].
    pub fn clear(&mut self) {
        self.queue.clear();
    }
}
