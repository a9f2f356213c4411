//! Sluice - Pipeline
//!
//! Everything between the receivers and the producer.
//!
//! # Architecture
//!
//! ```text
//!              sync ──┐                        ┌─ out ──→ journal ──┐
//! [Receivers] ────────┼→ Intake → AcceptorPipeline                  ├─→ Dispatcher
//!              async ─┘                        └─ skip ─────────────┘       │
//!                                                                           ↓
//!                             producer ←── PostPipeline ←── [TagStage…] per tag
//! ```
//!
//! # Key Design
//!
//! - **Two intake paths**: sync senders wait, async senders drop when full
//! - **Skip channel**: async overflow bypasses the journal instead of stalling
//! - **Lazy tag pipelines**: built on a tag's first message, torn down when
//!   closed, idle or on shutdown
//! - **No blocking in the dispatcher**: a full tag pipeline drops the
//!   message uncommitted so journal replay brings it back
//! - **Rate-limited drop logging**: see [`DropLog`]

mod acceptor;
mod dispatcher;
mod error;
mod filter_pipeline;
mod metrics;
mod tag_pipeline;

pub use acceptor::{IdGenerator, Intake, IntakeSnapshot, IntakeStreams};
pub use dispatcher::{CloseHook, Dispatcher, DispatcherSnapshot, TagSnapshot};
pub use error::{PipelineError, Result};
pub use filter_pipeline::{
    AcceptorPipeline, FilterPipelineMetrics, FilterPipelineSnapshot, PostPipeline,
};
pub use metrics::DropLog;
pub use tag_pipeline::{TagPipeline, TagPipelineSnapshot};

#[cfg(test)]
mod acceptor_test;
#[cfg(test)]
mod tag_pipeline_test;
