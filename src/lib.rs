//! jeeves-watcher: keeps an external vector search store synchronized with
//! a local document corpus.
//!
//! Watches directory globs, extracts text from recognized formats, computes
//! embeddings, and upserts vector points with descriptive metadata; clients
//! issue semantic queries and metadata enrichments over a small HTTP
//! surface. The interesting machinery is the indexing pipeline and its
//! coordination layer: a debounced, prioritized, rate-limited event queue
//! feeding a content-addressed processor, governed by a health supervisor
//! and hot-reloadable inference rules.

pub mod api;
pub mod app;
pub mod chunker;
pub mod config;
pub mod embed;
pub mod error;
pub mod extract;
pub mod gitignore;
pub mod health;
pub mod identity;
pub mod logger;
pub mod processor;
pub mod queue;
pub mod rules;
pub mod scan;
pub mod sidecar;
pub mod vector;
pub mod watcher;
