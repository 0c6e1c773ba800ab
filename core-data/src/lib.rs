//! # Local Data Module
//!
//! Owns the SQLite database holding reference data synchronized from
//! GeoNature and TaxHub.
//!
//! ## Overview
//!
//! This module manages:
//! - SQLite schema and migrations
//! - Local entity models (observers, datasets, taxa, nomenclature, ...)
//! - The [`PersistenceGateway`] batch interface used by the sync engine
//! - One SQLite repository per entity kind

pub mod db;
pub mod error;
pub mod gateway;
pub mod models;
pub mod repositories;

pub use error::{DataError, Result};
pub use gateway::PersistenceGateway;
