//! Reply demultiplexing.
//!
//! One reader task owns the receive socket. Every frame it reads is parsed,
//! handed to the method's [`ReplyMatcher`], and, if it answers a probe in
//! flight, delivered to that probe's completion slot in the [`DispatchTable`].

use crate::parser::{parse_frame, Frame};
use crate::source::Source;
use hoptrace_core::{CorrelationTag, Reply, TraceError, TraceResult};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

const READ_BUFFER_SIZE: usize = 4096;

/// A frame attributed to a probe tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Matched {
    pub tag: CorrelationTag,
    pub responder: IpAddr,
    pub reached: bool,
}

/// Recognizes replies to one probe method.
pub trait ReplyMatcher: Send + Sync + 'static {
    /// Returns the probe a frame answers, if any.
    fn match_frame(&self, frame: &Frame) -> Option<Matched>;
}

/// Completion slots of the probes currently in flight, keyed by tag.
#[derive(Debug, Default)]
pub struct DispatchTable {
    slots: Mutex<HashMap<CorrelationTag, oneshot::Sender<Reply>>>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<CorrelationTag, oneshot::Sender<Reply>>> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers a probe and returns the receiver its reply will arrive on.
    pub fn register(&self, tag: CorrelationTag) -> TraceResult<oneshot::Receiver<Reply>> {
        let mut slots = self.slots();
        if slots.contains_key(&tag) {
            return Err(TraceError::DuplicateTag(tag.to_string()));
        }
        let (tx, rx) = oneshot::channel();
        slots.insert(tag, tx);
        Ok(rx)
    }

    /// Delivers a reply. Returns false when no probe with this tag is waiting.
    pub fn complete(&self, tag: CorrelationTag, reply: Reply) -> bool {
        match self.slots().remove(&tag) {
            Some(tx) => tx.send(reply).is_ok(),
            None => false,
        }
    }

    /// Drops the slot of a probe that stopped waiting.
    pub fn forget(&self, tag: CorrelationTag) {
        self.slots().remove(&tag);
    }

    pub fn contains(&self, tag: CorrelationTag) -> bool {
        self.slots().contains_key(&tag)
    }

    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle to the reader task and its dispatch table.
pub struct Demux {
    table: Arc<DispatchTable>,
    reader: JoinHandle<()>,
}

impl Demux {
    /// Spawns the reader task on the current runtime.
    pub fn spawn<M: ReplyMatcher>(source: Box<dyn Source>, matcher: M) -> Self {
        let table = Arc::new(DispatchTable::new());
        let reader = tokio::spawn(read_loop(source, matcher, Arc::clone(&table)));
        Self { table, reader }
    }

    pub fn table(&self) -> &DispatchTable {
        &self.table
    }

    /// Stops the reader task; the source is closed when the task is dropped.
    pub fn shutdown(&self) {
        self.reader.abort();
    }
}

impl Drop for Demux {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop<M: ReplyMatcher>(
    mut source: Box<dyn Source>,
    matcher: M,
    table: Arc<DispatchTable>,
) {
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let n = match source.read(&mut buf).await {
            Ok(n) => n,
            Err(e) if e.is_retryable() => {
                trace!(error = %e, "Retryable read error, continuing");
                continue;
            }
            Err(e) => {
                warn!(error = %e, "Reply reader stopped, outstanding probes will time out");
                break;
            }
        };
        let received_at = Instant::now();

        let frame = match parse_frame(&buf[..n]) {
            Ok(frame) => frame,
            Err(e) => {
                trace!(error = %e, len = n, "Skipping unparsable frame");
                continue;
            }
        };
        let Some(matched) = matcher.match_frame(&frame) else {
            continue;
        };

        let reply = Reply {
            responder: matched.responder,
            reached: matched.reached,
            received_at,
        };
        if table.complete(matched.tag, reply) {
            debug!(
                tag = %matched.tag,
                ip = %matched.responder,
                reached = matched.reached,
                "Reply matched"
            );
        } else {
            trace!(
                tag = %matched.tag,
                ip = %matched.responder,
                "Reply for a probe no longer waiting"
            );
        }
    }

    if let Err(e) = source.close().await {
        debug!(error = %e, "Failed to close packet source");
    }
}
