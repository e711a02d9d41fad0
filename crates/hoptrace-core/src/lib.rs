//! Core types, traits, and the trace engine for hoptrace.
//!
//! - [`Transceiver`] trait implemented once per probe method
//! - [`TraceConfig`], [`ProbeOutcome`] and the other core types
//! - [`TracePath`], the ordered hop groups a trace produces
//! - [`Tracer`], which schedules probes and assembles the path
//! - [`TraceError`] for error handling

pub mod enrich;
pub mod error;
pub mod execution;
pub mod result;
pub mod traits;
pub mod types;

pub use enrich::Enricher;
pub use error::{TraceError, TraceResult};
pub use execution::Tracer;
pub use result::{GeoData, HopGroup, HopRecord, TracePath};
pub use traits::{GeoFix, GeoLookup, HostnameLookup, Transceiver};
pub use types::{
    CorrelationTag, GeoSource, HopSink, Method, PendingReply, Probe, ProbeOutcome, Reply,
    TraceConfig,
};
