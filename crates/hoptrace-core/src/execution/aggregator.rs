//! Hop aggregator: turns unordered probe outcomes into ordered hop groups.

use crate::{HopGroup, HopRecord, ProbeOutcome};
use std::collections::BTreeMap;
use tracing::{trace, warn};

/// Progress of a single hop-limit. A hop with no entry is still pending.
#[derive(Debug)]
enum HopState {
    /// Some measurements are still outstanding.
    Measuring {
        outstanding: usize,
        slots: Vec<Option<HopRecord>>,
    },
    /// Every measurement resolved; waiting for lower hops before delivery.
    Complete(HopGroup),
}

/// Buffers outcomes per hop-limit and releases complete groups in order.
#[derive(Debug)]
pub struct HopAggregator {
    queries_per_hop: usize,
    next_hop: u16,
    states: BTreeMap<u8, HopState>,
    finished: bool,
}

impl HopAggregator {
    pub fn new(first_hop: u8, queries_per_hop: usize) -> Self {
        Self {
            queries_per_hop,
            next_hop: first_hop as u16,
            states: BTreeMap::new(),
            finished: false,
        }
    }

    /// Whether a group that reached the destination has been released.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// The next hop-limit waiting to be released.
    pub fn next_hop(&self) -> u16 {
        self.next_hop
    }

    /// Records one outcome. Outcomes arriving after the destination's group
    /// was released are dropped.
    pub fn record(&mut self, outcome: ProbeOutcome) {
        if self.finished || (outcome.hop_limit as u16) < self.next_hop {
            trace!(
                hop_limit = outcome.hop_limit,
                index = outcome.index,
                "Discarding outcome for a hop that is no longer collected"
            );
            return;
        }
        if outcome.index >= self.queries_per_hop {
            warn!(
                hop_limit = outcome.hop_limit,
                index = outcome.index,
                "Discarding outcome with out-of-range measurement index"
            );
            return;
        }

        let queries = self.queries_per_hop;
        let state = self
            .states
            .entry(outcome.hop_limit)
            .or_insert_with(|| HopState::Measuring {
                outstanding: queries,
                slots: vec![None; queries],
            });

        let HopState::Measuring { outstanding, slots } = &mut *state else {
            warn!(
                hop_limit = outcome.hop_limit,
                index = outcome.index,
                "Discarding outcome for an already complete hop"
            );
            return;
        };

        let slot = &mut slots[outcome.index];
        if slot.is_some() {
            warn!(
                hop_limit = outcome.hop_limit,
                index = outcome.index,
                "Discarding duplicate outcome"
            );
            return;
        }
        *slot = Some(HopRecord::from(outcome));
        *outstanding -= 1;

        if *outstanding == 0 {
            let records = slots.iter_mut().filter_map(Option::take).collect();
            *state = HopState::Complete(HopGroup {
                ttl: outcome.hop_limit,
                records,
            });
        }
    }

    /// Releases complete groups that directly follow the last released one,
    /// stopping after the first group that reached the destination.
    pub fn take_ready(&mut self) -> Vec<HopGroup> {
        let mut ready = Vec::new();
        while !self.finished {
            let Ok(hop) = u8::try_from(self.next_hop) else {
                break;
            };
            if !matches!(self.states.get(&hop), Some(HopState::Complete(_))) {
                break;
            }
            let Some(HopState::Complete(group)) = self.states.remove(&hop) else {
                break;
            };
            self.next_hop += 1;
            if group.reached() {
                self.finished = true;
                self.states.clear();
            }
            ready.push(group);
        }
        ready
    }

    /// Whether every hop up to and including `last_hop` has been released.
    pub fn is_complete_through(&self, last_hop: u8) -> bool {
        self.finished || self.next_hop > last_hop as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;
    use std::time::Duration;

    fn answered(hop_limit: u8, index: usize, ip: &str, reached: bool) -> ProbeOutcome {
        ProbeOutcome {
            hop_limit,
            index,
            responder: Some(ip.parse::<IpAddr>().unwrap()),
            rtt: Some(Duration::from_millis(10 + index as u64)),
            reached,
        }
    }

    #[test]
    fn test_group_released_only_when_complete() {
        let mut agg = HopAggregator::new(1, 3);
        agg.record(answered(1, 0, "10.0.0.1", false));
        agg.record(answered(1, 2, "10.0.0.1", false));
        assert!(agg.take_ready().is_empty());

        agg.record(ProbeOutcome::no_reply(1, 1));
        let ready = agg.take_ready();
        assert_eq!(ready.len(), 1);
        let indexes: Vec<usize> = ready[0].records.iter().map(|r| r.index).collect();
        assert_eq!(indexes, vec![0, 1, 2]);
        assert!(ready[0].records[1].address.is_none());
    }

    #[test]
    fn test_groups_released_in_hop_order() {
        let mut agg = HopAggregator::new(1, 1);
        agg.record(answered(3, 0, "10.0.0.3", false));
        agg.record(answered(2, 0, "10.0.0.2", false));
        assert!(agg.take_ready().is_empty());

        agg.record(answered(1, 0, "10.0.0.1", false));
        let ttls: Vec<u8> = agg.take_ready().iter().map(|g| g.ttl).collect();
        assert_eq!(ttls, vec![1, 2, 3]);
        assert_eq!(agg.next_hop(), 4);
    }

    #[test]
    fn test_hops_beyond_destination_are_discarded() {
        let mut agg = HopAggregator::new(1, 1);
        agg.record(answered(3, 0, "192.0.2.1", false));
        agg.record(answered(2, 0, "192.0.2.1", true));
        agg.record(answered(1, 0, "10.0.0.1", false));

        let ready = agg.take_ready();
        assert_eq!(ready.len(), 2);
        assert!(ready[1].reached());
        assert!(agg.is_finished());

        agg.record(answered(4, 0, "192.0.2.1", true));
        assert!(agg.take_ready().is_empty());
    }

    #[test]
    fn test_duplicate_outcome_is_counted_once() {
        let mut agg = HopAggregator::new(5, 2);
        agg.record(answered(5, 0, "10.0.0.5", false));
        agg.record(answered(5, 0, "10.0.0.6", false));
        assert!(agg.take_ready().is_empty());

        agg.record(ProbeOutcome::no_reply(5, 1));
        let ready = agg.take_ready();
        assert_eq!(ready[0].records.len(), 2);
        assert_eq!(
            ready[0].records[0].address,
            Some("10.0.0.5".parse().unwrap())
        );
    }

    #[test]
    fn test_complete_through() {
        let mut agg = HopAggregator::new(1, 1);
        assert!(!agg.is_complete_through(2));
        agg.record(ProbeOutcome::no_reply(1, 0));
        agg.record(ProbeOutcome::no_reply(2, 0));
        agg.take_ready();
        assert!(agg.is_complete_through(2));
    }

    #[test]
    fn test_max_ttl_hop_is_released() {
        let mut agg = HopAggregator::new(255, 1);
        agg.record(ProbeOutcome::no_reply(255, 0));
        assert_eq!(agg.take_ready().len(), 1);
        assert!(agg.is_complete_through(255));
    }
}
