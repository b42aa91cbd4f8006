//! Glue core configuration
//!
//! Board support hands the core a [`GlueConfig`]; nothing here is persisted.

pub mod schema;

pub use schema::{
    ControllerRegions, DmaConfig, GlueConfig, PortRole, TxChannel, MAX_DMA_CHANNELS,
    MIN_POLL_INTERVAL_MS,
};
