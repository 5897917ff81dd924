//! # mailsluice-pipeline
//!
//! A bounded, provider-adaptive email ingestion pipeline: fetch batches
//! from a mailbox provider, buffer them with real backpressure, and fan
//! them out to a fixed pool of concurrent processors.
//!
//! ## Features
//!
//! - **Bounded backpressure**: a blocking FIFO queue between fetcher and
//!   workers — a slow consumer stalls the producer instead of dropping
//!   or hoarding mail, with no polling or spin-waiting anywhere
//! - **Provider-adaptive strategies**: batch size, concurrency,
//!   timeouts, retry policy and thread-search shape resolved per
//!   provider (`gmail`, `yandex`, …) with a mandatory generic fallback
//! - **Failure isolation**: one bad message never aborts its siblings;
//!   one failed batch never stops the pipeline
//! - **Classification-aware retries**: transient failures back off
//!   exponentially, permanent failures surface immediately
//! - **Observability**: aggregated health with per-component detail,
//!   monotonic metrics snapshots, structured `tracing` events
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use mailsluice_pipeline::{IngestConfig, Pipeline, Poller};
//!
//! #[tokio::main]
//! async fn main() -> mailsluice_pipeline::Result<()> {
//!     let config = IngestConfig::new("imap.gmail.com");
//!
//!     let pipeline = Arc::new(
//!         Pipeline::builder(config.clone())
//!             .gateway(my_gateway)        // impl MailGateway
//!             .processor(my_processor)    // impl MessageProcessor
//!             .build()?,
//!     );
//!     pipeline.start().await?;
//!
//!     // Poll until shutdown.
//!     let poller = Poller::new(Arc::clone(&pipeline), config.poll_interval()).spawn();
//!
//!     // ... on shutdown:
//!     poller.stop().await;
//!     pipeline.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Flow control
//!
//! The pipeline has two deliberate flow-control tiers. The outer
//! [`MessageQueue`] blocks producers when full — that is the
//! backpressure stage. The worker pool's inner submission channel
//! rejects when full — that keeps the dispatch fan-out latency bounded
//! and pushes sustained overload back to the next poll tick.
//!
//! ## Modules
//!
//! - [`pipeline`]: the fetch→queue→dispatch orchestrator
//! - [`queue`]: bounded blocking message queue
//! - [`worker`]: fixed-size worker pool
//! - [`fetcher`]: gateway-facing batch and thread retrieval
//! - [`strategy`]: per-provider tuning and thread-search policies
//! - [`retry`]: retry policy and classification-aware execution
//! - [`gateway`]: capability traits for the provider and the processor
//! - [`poller`]: interval driver
//! - [`config`]: deployment configuration

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod config;
pub mod criteria;
mod error;
pub mod fetcher;
pub mod gateway;
pub mod message;
pub mod pipeline;
pub mod poller;
pub mod queue;
pub mod retry;
pub mod strategy;
pub mod worker;

pub use config::{IngestConfig, RetryOverrides, SearchOverrides, StrategyOverrides};
pub use criteria::{FetchCriteria, FetchCriteriaBuilder, ThreadSearchCriteria};
pub use error::{Error, Result};
pub use fetcher::{FetchProgress, FetchStatus, Fetcher};
pub use gateway::{LoggingProcessor, MailGateway, MailboxInfo, MessageProcessor};
pub use message::EmailMessage;
pub use pipeline::{
    BatchReport, ComponentHealth, Pipeline, PipelineBuilder, PipelineHealth, PipelineMetrics,
    PipelinePhase, PipelineStatus, StatusSnapshot,
};
pub use poller::{Poller, PollerHandle};
pub use queue::{MessageQueue, QueueMetrics};
pub use retry::{RetryManager, RetryPolicy};
pub use strategy::{
    GENERIC_PROVIDER, GenericSearchStrategy, GenericStrategy, GmailSearchStrategy, GmailStrategy,
    PipelineStrategy, SearchComplexity, SearchStrategy, SearchTuning, StrategyFactory,
    ThreadQuery, YandexSearchStrategy, YandexStrategy,
};
pub use worker::{WorkerMetrics, WorkerPool};
