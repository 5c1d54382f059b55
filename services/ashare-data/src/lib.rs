//! Ashare Data Library
//!
//! Acquisition and normalization of Chinese A-share market data: index daily
//! bars, intraday ticks, financial indicators and company announcements.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        MarketDataClient                          │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ResultCache ──► FetchOrchestrator ──► AdapterRouter             │
//! │                        │                  ├─ EastmoneyAdapter    │
//! │                        │                  └─ TushareAdapter      │
//! │                        ▼                                         │
//! │                 SchemaRegistry ──► validate ──► ValidationReport │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Failure model
//! - Transport trouble (`UpstreamUnavailable`) is retried per leg with
//!   exponential backoff; exhausted legs become partial failures.
//! - A changed upstream schema (`UpstreamSchemaChanged`) aborts the run.
//! - Malformed rows never fail a run; they are rejected with a reason.

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod analytics;
pub mod data;
pub mod export;

pub use data::{
    DataKind, DataRequest, FetchError, FetchOptions, FetchOutcome, MarketDataClient,
    NormalizedRecord, ValidationReport,
};
pub use export::{CsvExporter, ExportError};
