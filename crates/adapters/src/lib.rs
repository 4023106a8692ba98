// Copyright 2025 Memory Validation Contributors
// SPDX-License-Identifier: Apache-2.0

//! Production collaborators for the validation harness.
//!
//! - [`PgMemoryStore`] - the memory store over a Postgres pool
//! - [`ReqwestProbe`] - HTTP probing
//! - [`SysinfoProbe`] - process and host resource sampling
//! - [`PgDumpTool`] - dump/restore through `pg_dump` and `psql`

#![warn(missing_docs, rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod http;
pub mod pg_dump;
pub mod postgres;
pub mod system;

pub use http::ReqwestProbe;
pub use pg_dump::PgDumpTool;
pub use postgres::{PgMemoryStore, PgStoreOptions};
pub use system::SysinfoProbe;
