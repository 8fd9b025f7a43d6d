//! Tonality API Library Crate
//!
//! This library contains the HTTP surface of the training game: configuration,
//! the Postgres session store, API handlers, report rendering and routing.
//! The `api` binary is a thin wrapper around this library.

pub mod config;
pub mod db;
pub mod handlers;
pub mod models;
pub mod report;
pub mod router;
pub mod state;
