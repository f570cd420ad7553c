//! # httpbeacon
//!
//! A buffered, crash-resilient analytics collector for HTTP server request
//! events. A framework adapter calls [`Client::track`] once per served
//! request; the client batches those events in memory and ships them to
//! an ingestion endpoint on a background task, surviving endpoint outages
//! by spilling to disk and replaying on the next startup.
//!
//! ## Features
//!
//! - **Non-blocking** - `track()` never blocks the request path and never
//!   panics; the worst case is a dropped event.
//! - **Builder Pattern** - configuration via the [`bon`](https://bon-rs.com)
//!   builder pattern, or [`Client::from_env`].
//! - **SSRF-safe** - the ingestion endpoint is validated against private,
//!   loopback, link-local, and CGNAT address ranges before anything is
//!   ever sent to it.
//! - **Crash-resilient** - batches that exhaust their retry budget spill
//!   to an append-only file and are replayed the next time a client
//!   starts against the same endpoint.
//! - **Graceful shutdown** - [`Client::shutdown`] drains the buffer with a
//!   final flush attempt before returning.
//!
//! ## Quick Start
//!
//! ```no_run
//! use httpbeacon::{Client, Event};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::builder()
//!     .endpoint("https://ingest.example.com/v1/events")
//!     .api_key("sk-...")
//!     .build()
//!     .await?;
//!
//! client.track(
//!     Event::new("GET", "/api/widgets", 200)
//!         .with_response_time_ms(12.5),
//! );
//!
//! client.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration
//!
//! Set these environment variables and use [`Client::from_env`]:
//!
//! ```bash
//! HTTPBEACON_ENDPOINT=https://ingest.example.com/v1/events
//! HTTPBEACON_API_KEY=sk-...
//! ```
//!
//! ## License
//!
//! Licensed under either of:
//! - Apache License, Version 2.0 ([LICENSE-APACHE](LICENSE-APACHE))
//! - MIT license ([LICENSE-MIT](LICENSE-MIT))

#![warn(rustdoc::broken_intra_doc_links)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod buffer;
pub mod client;
pub mod driver;
pub mod error;
pub mod event;
pub mod flush;
pub mod secret;
pub mod sender;
pub mod ssrf;
pub mod storage;

pub use client::Client;
pub use error::{Error, Result, SendError};
pub use event::Event;
pub use secret::{Redactor, Secret};
