// Copyright (c) 2025 Whatsmeow-rs Contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! # whatsmeow-sqlstore
//!
//! Persistent identity, session, and synchronization-key storage for a
//! WhatsApp multi-device client, backed by PostgreSQL, SQLite, or
//! MySQL/MariaDB through a single canonical SQL surface.
//!
//! The [`database::Container`] owns the shared connection pool, runs
//! schema migrations at construction, and hands out per-account
//! [`database::SqlStore`] handles implementing the store traits in
//! [`store`].

pub mod database;
pub mod error;
pub mod store;
pub mod types;
pub mod util;

pub use database::{Container, DatabaseConfig, Dialect, SqlStore};
pub use error::{Error, Result};
pub use types::Jid;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
