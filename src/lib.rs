//! # Knowledge Hub
//!
//! A knowledge import pipeline and label-aware retrieval service.
//!
//! Imports are accepted as batches of free-text items, persisted as a task,
//! and queued. A worker pool classifies each item with a language model,
//! embeds it, and writes it to Qdrant and SQLite. Queries run through a
//! hybrid ranker that prefetches candidates by label overlap and ranks
//! them by embedding similarity.
//!
//! ## Architecture
//!
//! ```text
//!   HTTP / CLI ──▶ ImportService ──▶ SQLite (task + items + queue row)
//!                                        │
//!                        poller / channel ▼
//!                  ┌───────────── TaskQueueService ─────────────┐
//!                  ▼                    ▼                      ▼
//!               worker               worker                 worker
//!                  │  classify → filter → embed → upsert (Qdrant, SQLite)
//!                  ▼
//!             task counters / progress
//!
//!   search ──▶ classify query → sparse labels → Qdrant prefetch + dense
//!          ──▶ hydrate from SQLite → keyword fallback → rank
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! khub init                               # create database
//! khub serve                              # API + workers
//! khub import notes.json --repo docs      # queue an import
//! khub status <task-id>
//! khub search "rotating credentials" --repo docs
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite implementation of the storage traits |
//! | [`classifier`] | Ollama classification client |
//! | [`embedding`] | Embedding provider clients |
//! | [`qdrant`] | Qdrant vector index client |
//! | [`queue`] | Durable task queue |
//! | [`worker`] | Worker pool and per-item pipeline |
//! | [`tasks`] | Import submission, status, and recovery |
//! | [`app`] | Service wiring |
//! | [`server`] | HTTP API |
//! | [`error`] | Service error taxonomy |

pub mod app;
pub mod classifier;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod import;
pub mod migrate;
pub mod qdrant;
pub mod queue;
pub mod search;
pub mod server;
pub mod sqlite_store;
pub mod tasks;
pub mod worker;
