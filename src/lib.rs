pub mod ala;
pub mod app;
pub mod canonical;
pub mod checklist;
pub mod checkpoint;
pub mod companion;
pub mod config;
pub mod domain;
pub mod enrichment;
pub mod error;
pub mod fetcher;
pub mod globi;
pub mod http;
pub mod occurrence;
pub mod output;
pub mod resolver;
pub mod store;
pub mod sync;
pub mod table;
pub mod tui;
