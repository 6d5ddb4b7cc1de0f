// sage-core/src/lib.rs

//! Declarative data-ingestion and validation engine: configuration
//! documents describe catalogs, packages and senders; the engine
//! enforces that contract over submitted tabular files and routes
//! clean records into a database sink.

#![deny(unsafe_code)]
#![warn(clippy::expect_used, clippy::unwrap_used, clippy::perf)]
#![allow(missing_docs)]

// Business core. Schema model, the Finding/Diagnostic taxonomy, the
// in-memory table and the predicate language. No I/O lives here and
// nothing here knows about the layers below.
pub mod domain;

// What the use cases need from the outside world, as traits: the
// database sink connector and the pre-validation HTTP hook.
pub mod ports;

// The use cases themselves: schema loader, file reader, validator,
// sender gate, sink orchestration, run controller.
pub mod application;

// Concrete adapters behind the ports plus the technical plumbing
// (sqlx pool, reqwest hook, secret resolution, in-memory sink).
pub mod infrastructure;

pub mod error;

// The two things nearly every caller touches.
pub use domain::diagnostic::{Diagnostic, Finding, FindingScope, Severity};
pub use error::SageError;
