//! # Knowledge Hub Core
//!
//! Backend-agnostic logic for Knowledge Hub: data models, the label
//! dictionary, sparse label vectors, storage and collaborator traits,
//! and the hybrid ranking algorithm.
//!
//! This crate contains no tokio, sqlx, HTTP clients, or filesystem I/O.
//! The `knowledge-hub` app crate supplies the concrete backends.

pub mod classify;
pub mod dictionary;
pub mod embedding;
pub mod labels;
pub mod models;
pub mod search;
pub mod store;
pub mod vector;
