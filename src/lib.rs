//! Harvester Core Library
//!
//! This library provides a resumable crawl-and-fetch pipeline for an
//! authenticated, paginated listing: it discovers item IDs page by page,
//! scrapes each item's metadata, downloads its artifact, and records
//! progress so an interrupted run picks up where it stopped.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`auth`] - Netscape cookie-file import
//! - [`db`] - Database connection and schema management
//! - [`store`] - Durable per-item progress records
//! - [`session`] - Browsing-session capability and its HTTP backend
//! - [`site`] - Site-specific URLs and selectors
//! - [`gate`] - Waiting out anti-bot interstitials
//! - [`pacing`] - Randomized delays and periodic cooldowns
//! - [`crawler`] - Listing page discovery
//! - [`processor`] - Per-item metadata and artifact state machine
//! - [`pipeline`] - Run orchestration
//! - [`export`] - JSON export of committed records

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod auth;
pub mod crawler;
pub mod db;
pub mod diagnostics;
pub mod export;
pub mod gate;
pub mod pacing;
pub mod pipeline;
pub mod processor;
pub mod session;
pub mod site;
pub mod store;

// Re-export commonly used types
pub use auth::{CookieError, CookieLine, load_cookie_file, parse_netscape_cookies};
pub use crawler::{CrawlError, CrawlOptions, DiscoveryReport, ListingCrawler, page_range};
pub use db::{Database, DbError};
pub use export::{ExportError, write_export};
pub use gate::{ChallengeGate, GateOutcome};
pub use pacing::{DelayKind, DelayRange, PacingPolicy};
pub use pipeline::{Pipeline, PipelineConfig, PipelineError, RunConfig, RunSummary, harvest};
pub use processor::{FailureStage, ItemOutcome, ItemProcessor, ProcessorConfig};
pub use session::{
    BrowserSession, DownloadTarget, DownloadedFile, ElementData, ElementQuery, HttpSession,
    PageSnapshot, SessionError,
};
pub use site::{SiteError, SiteLayout};
pub use store::{ExportRecord, ItemMetadata, ItemRecord, ProgressStore, StoreError};
