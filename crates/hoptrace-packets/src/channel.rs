//! Shared probe channel: one send socket and one reply reader per trace.

use crate::demux::{Demux, ReplyMatcher};
use crate::platform;
use crate::sink::Sink;
use crate::source::Source;
use hoptrace_core::{CorrelationTag, PendingReply, Probe, ProbeOutcome, TraceResult};
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::trace;

/// Raw sockets shared by every probe of a trace run.
///
/// Writes go through a lock, so probe packets leave one at a time. Replies are
/// read by a single task and routed to the waiting probe by correlation tag.
pub struct ProbeChannel {
    target: IpAddr,
    sink: Mutex<Box<dyn Sink>>,
    demux: Demux,
}

impl ProbeChannel {
    /// Opens the platform's raw sockets towards `target`.
    pub async fn open<M: ReplyMatcher>(target: IpAddr, matcher: M) -> TraceResult<Self> {
        let (source, sink) = platform::open(target)?;
        Ok(Self::from_parts(target, source, sink, matcher))
    }

    /// Builds a channel over an existing source and sink.
    pub fn from_parts<M: ReplyMatcher>(
        target: IpAddr,
        source: Box<dyn Source>,
        sink: Box<dyn Sink>,
        matcher: M,
    ) -> Self {
        Self {
            target,
            sink: Mutex::new(sink),
            demux: Demux::spawn(source, matcher),
        }
    }

    pub fn target(&self) -> IpAddr {
        self.target
    }

    /// Whether a probe with this tag is waiting for its reply.
    pub fn is_pending(&self, tag: CorrelationTag) -> bool {
        self.demux.table().contains(tag)
    }

    /// Registers the probe's tag, then writes its packet.
    ///
    /// The send timestamp is taken right before the write.
    pub async fn transmit(
        &self,
        hop_limit: u8,
        index: usize,
        tag: CorrelationTag,
        packet: &[u8],
    ) -> TraceResult<PendingReply> {
        let rx = self.demux.table().register(tag)?;

        let mut sink = self.sink.lock().await;
        let sent_at = Instant::now();
        if let Err(e) = sink.write_to(packet, SocketAddr::new(self.target, 0)).await {
            self.demux.table().forget(tag);
            return Err(e);
        }
        drop(sink);

        trace!(hop_limit, index, %tag, len = packet.len(), "Probe sent");
        let probe = Probe {
            hop_limit,
            index,
            tag,
            sent_at,
        };
        Ok(PendingReply::new(probe, rx))
    }

    /// Waits for a transmitted probe's reply, then releases its tag.
    pub async fn wait(&self, pending: PendingReply, timeout: Duration) -> ProbeOutcome {
        let tag = pending.probe().tag;
        let outcome = pending.wait(timeout).await;
        self.demux.table().forget(tag);
        outcome
    }

    /// Stops the reply reader and closes the send socket.
    pub async fn close(&self) -> TraceResult<()> {
        self.demux.shutdown();
        self.sink.lock().await.close().await
    }
}
