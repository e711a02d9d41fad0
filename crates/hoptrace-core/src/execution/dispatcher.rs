//! Probe dispatcher: schedules every probe of the configured hop range.

use super::pool::WorkerPool;
use crate::{ProbeOutcome, Transceiver};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

const NOT_REACHED: u16 = u16::MAX;

/// Lowest hop-limit at which the destination has answered so far.
#[derive(Debug)]
pub struct StopSignal(AtomicU16);

impl Default for StopSignal {
    fn default() -> Self {
        Self(AtomicU16::new(NOT_REACHED))
    }
}

impl StopSignal {
    /// Records that the destination answered a probe with this TTL.
    pub fn destination_reached(&self, hop_limit: u8) {
        self.0.fetch_min(hop_limit as u16, Ordering::SeqCst);
    }

    /// The hop-limit beyond which nothing new is scheduled.
    pub fn limit(&self) -> Option<u8> {
        match self.0.load(Ordering::SeqCst) {
            NOT_REACHED => None,
            hop => Some(hop as u8),
        }
    }
}

/// Probe parameters fixed for the whole run.
#[derive(Debug, Clone, Copy)]
pub struct DispatchPlan {
    pub first_hop: u8,
    pub max_hops: u8,
    pub queries_per_hop: usize,
    pub parallel_requests: usize,
    pub timeout: Duration,
}

pub struct Dispatcher<T: ?Sized> {
    transceiver: Arc<T>,
    plan: DispatchPlan,
    stop: Arc<StopSignal>,
    outcomes: mpsc::UnboundedSender<ProbeOutcome>,
}

impl<T: Transceiver + ?Sized + 'static> Dispatcher<T> {
    pub fn new(
        transceiver: Arc<T>,
        plan: DispatchPlan,
        stop: Arc<StopSignal>,
        outcomes: mpsc::UnboundedSender<ProbeOutcome>,
    ) -> Self {
        Self {
            transceiver,
            plan,
            stop,
            outcomes,
        }
    }

    /// Schedules hop after hop until the destination answers or `max_hops` is
    /// scheduled, then waits for every submitted probe to finish.
    ///
    /// Returns the last hop-limit that was scheduled.
    pub async fn run(self) -> u8 {
        let Dispatcher {
            transceiver,
            plan,
            stop,
            outcomes,
        } = self;

        let mut pool = WorkerPool::new(plan.parallel_requests);
        let mut last_scheduled = plan.first_hop;

        'hops: for hop_limit in plan.first_hop..=plan.max_hops {
            for index in 0..plan.queries_per_hop {
                let worker = match pool.idle_worker().await {
                    Ok(worker) => worker,
                    Err(e) => {
                        warn!(error = %e, "Probe workers unavailable, stopping dispatch");
                        break 'hops;
                    }
                };

                // Checked once a worker is free, so a reply that arrived
                // meanwhile is taken into account. Only whole hops are cut
                // off: once a hop has started, all of its measurements run.
                if index == 0 {
                    if let Some(limit) = stop.limit() {
                        if hop_limit > limit {
                            debug!(
                                hop_limit,
                                reached_at = limit,
                                "Destination reached, not scheduling further hops"
                            );
                            break 'hops;
                        }
                    }
                }

                let transceiver = Arc::clone(&transceiver);
                let stop = Arc::clone(&stop);
                let outcomes = outcomes.clone();
                let timeout = plan.timeout;
                let job = async move {
                    let outcome = probe_once(transceiver.as_ref(), hop_limit, index, timeout).await;
                    if outcome.reached {
                        stop.destination_reached(hop_limit);
                    }
                    // The aggregator only hangs up once the trace is over.
                    let _ = outcomes.send(outcome);
                };

                if let Err(e) = worker.start(job) {
                    warn!(error = %e, hop_limit, index, "Could not start probe");
                    break 'hops;
                }
            }
            last_scheduled = hop_limit;
        }

        pool.shutdown().await;
        last_scheduled
    }
}

/// Sends one probe and waits for its reply.
///
/// Every failure ends up as an unanswered outcome.
pub async fn probe_once<T: Transceiver + ?Sized>(
    transceiver: &T,
    hop_limit: u8,
    index: usize,
    timeout: Duration,
) -> ProbeOutcome {
    let tag = match transceiver.next_tag() {
        Ok(tag) => tag,
        Err(e) => {
            debug!(hop_limit, index, error = %e, "Could not allocate correlation tag");
            return ProbeOutcome::no_reply(hop_limit, index);
        }
    };

    let pending = match transceiver.send(hop_limit, index, tag).await {
        Ok(pending) => pending,
        Err(e) => {
            debug!(hop_limit, index, %tag, error = %e, "Probe send failed");
            return ProbeOutcome::no_reply(hop_limit, index);
        }
    };

    let outcome = transceiver.await_reply(pending, timeout).await;
    match outcome.responder {
        Some(ip) => debug!(
            hop_limit,
            index,
            ip = %ip,
            rtt_ms = outcome.rtt.map(|d| d.as_secs_f64() * 1000.0),
            reached = outcome.reached,
            "Probe answered"
        ),
        None => trace!(hop_limit, index, %tag, "Probe timed out"),
    }
    outcome
}
