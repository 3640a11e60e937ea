//! # Content Indexer
//!
//! An indexing pipeline that walks configured page trees, records and files,
//! extracts text and metadata, and writes normalized rows into one flat
//! index table, with a tag layer for faceting.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ IndexerRunner│──▶│  Indexers    │──▶│ store_in_    │
//! │ lock + jobs  │   │ file / page  │   │ index (upsert│
//! └──────┬───────┘   │ + custom     │   │  + tags)     │
//!        │           └──────────────┘   └──────┬───────┘
//!        ▼                                     ▼
//!   cleanup + report                    SQLite index_records
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! indexer init                  # create database
//! indexer run                   # full reindex
//! indexer run --incremental     # only what changed since the last run
//! indexer status                # lock and last run
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation |
//! | [`models`] | Index records and host rows |
//! | [`error`] | Typed indexing errors |
//! | [`fileinfo`] | Per-file stat snapshot |
//! | [`extract`] | Text extraction by file extension |
//! | [`text`] | Lists, tags and sanitizing |
//! | [`store`] | The index table |
//! | [`host`] | Page tree, filter options, categories, files |
//! | [`storage`] | Managed file storages |
//! | [`status`] | Run lock, last run, job progress |
//! | [`hooks`] | Extension points |
//! | [`context`] | Per-run state and the upsert path |
//! | [`indexer`] | Indexer protocol, base toolkit, file and page indexers |
//! | [`runner`] | Run orchestration and cleanup |
//! | [`report`] | Run report |
//! | [`notify`] | Report mail |

pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod extract;
pub mod fileinfo;
pub mod hooks;
pub mod host;
pub mod indexer;
pub mod migrate;
pub mod models;
pub mod notify;
pub mod report;
pub mod runner;
pub mod status;
pub mod storage;
pub mod store;
pub mod text;
