//! Trace execution.
//!
//! A run wires three parts together: the [`Dispatcher`](dispatcher::Dispatcher)
//! schedules probes on a bounded [`WorkerPool`](pool::WorkerPool), each probe
//! reports one outcome over a channel, and the
//! [`HopAggregator`](aggregator::HopAggregator) turns those outcomes into hop
//! groups that are enriched and delivered in hop order.

pub mod aggregator;
pub mod dispatcher;
pub mod pool;

use crate::enrich::Enricher;
use crate::{
    HopGroup, HopSink, HostnameLookup, TraceConfig, TraceError, TracePath, TraceResult, Transceiver,
};
use aggregator::HopAggregator;
use dispatcher::{DispatchPlan, Dispatcher, StopSignal};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Runs traces over one transceiver.
pub struct Tracer<T: ?Sized> {
    transceiver: Arc<T>,
    hostnames: Option<Arc<dyn HostnameLookup>>,
}

impl<T: Transceiver + ?Sized + 'static> Tracer<T> {
    pub fn new(transceiver: Arc<T>) -> Self {
        Self {
            transceiver,
            hostnames: None,
        }
    }

    /// Reverse DNS used when the configuration asks for hostnames.
    pub fn with_hostname_lookup(mut self, lookup: Arc<dyn HostnameLookup>) -> Self {
        self.hostnames = Some(lookup);
        self
    }

    /// Traces the path to `config.dest_ip`.
    ///
    /// Only configuration errors are returned. Probe failures and timeouts
    /// show up as unanswered records, enrichment failures as blank metadata.
    pub async fn run(&self, config: &TraceConfig) -> TraceResult<TracePath> {
        config.validate()?;
        if config.method != self.transceiver.method() {
            return Err(TraceError::InvalidConfig(format!(
                "configured method {} does not match the {} transceiver",
                config.method,
                self.transceiver.method()
            )));
        }

        info!(
            dest = %config.dest_ip,
            method = %config.method,
            first_hop = config.first_hop,
            max_hops = config.max_hops,
            queries = config.queries_per_hop,
            parallel = config.parallel_requests,
            "Starting trace"
        );

        let plan = DispatchPlan {
            first_hop: config.first_hop,
            max_hops: config.max_hops,
            queries_per_hop: config.queries_per_hop,
            parallel_requests: config.parallel_requests,
            timeout: config.timeout,
        };
        let (outcomes_tx, mut outcomes_rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(
            Arc::clone(&self.transceiver),
            plan,
            Arc::new(StopSignal::default()),
            outcomes_tx,
        );

        let hostnames = if config.resolve_hostnames {
            self.hostnames.clone()
        } else {
            None
        };
        let enricher = Enricher::new(config.geo_source.clone(), hostnames);
        let mut aggregator = HopAggregator::new(config.first_hop, config.queries_per_hop);
        let mut path = TracePath::default();

        // The channel closes once the dispatcher has joined every probe.
        let collect = async {
            while let Some(outcome) = outcomes_rx.recv().await {
                aggregator.record(outcome);
                for group in aggregator.take_ready() {
                    deliver(&mut path, group, &enricher, config.sink.as_ref()).await;
                }
            }
        };
        let (last_scheduled, ()) = tokio::join!(dispatcher.run(), collect);

        if !aggregator.is_complete_through(last_scheduled) {
            warn!(
                next_hop = aggregator.next_hop(),
                last_scheduled, "Trace ended with incomplete hop groups"
            );
        }

        info!(
            hops = path.hops.len(),
            reached = path.reached(),
            "Trace finished"
        );
        Ok(path)
    }
}

async fn deliver(
    path: &mut TracePath,
    mut group: HopGroup,
    enricher: &Enricher,
    sink: Option<&HopSink>,
) {
    enricher.enrich_group(&mut group).await;
    let ttl = group.ttl;
    debug!(ttl, reached = group.reached(), "Hop complete");
    path.hops.push(group);
    if let Some(sink) = sink {
        sink(path, ttl);
    }
}
