//! # convodex
//!
//! A local-first chat-archive ingestion and search tool.
//!
//! convodex ingests a bulk chat-conversation export (the zip archive most
//! chat services let you download), normalizes it into searchable records,
//! builds a full-text index over them, and keeps both the records and the
//! index in a local SQLite store so later sessions skip the re-parse and
//! re-index entirely.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌────────────┐   ┌──────────┐
//! │ Archive  │──▶│ Transform │──▶│   Index    │──▶│  Query   │
//! │ (zip)    │   │  records  │   │ build/     │   │ ranked   │
//! └──────────┘   └─────┬─────┘   │ restore    │   │ results  │
//!                      │         └─────┬──────┘   └──────────┘
//!                      ▼               ▼
//!                 ┌─────────────────────────┐
//!                 │  SQLite blob cache      │
//!                 │  (namespaced, migrated) │
//!                 └─────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! cvx init                      # create the local store
//! cvx load export.zip           # ingest an archive
//! cvx search "kyoto trip"       # fuzzy search
//! cvx search "kyoto" --exact --sort updated
//! cvx export <id> --out one.json
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`archive`] | Archive reading (`conversations.json` extraction) |
//! | [`transform`] | Export-to-record transformation |
//! | [`fingerprint`] | Record-set content fingerprinting |
//! | [`cache`] | Namespaced SQLite blob cache |
//! | [`migrate`] | Cache schema reconciliation |
//! | [`engine`] | Serializable full-text index engine |
//! | [`index`] | Index lifecycle and query orchestration |
//! | [`lifecycle`] | Application startup and session state |
//! | [`export`] | Selection-based record export |

pub mod archive;
pub mod cache;
pub mod config;
pub mod engine;
pub mod export;
pub mod fingerprint;
pub mod index;
pub mod lifecycle;
pub mod migrate;
pub mod models;
pub mod transform;
