//! PostgreSQL gateway for the commit ledger.
//!
//! [`store::LedgerStore`] is the seam the ingestion pipeline programs
//! against; [`postgres::PgLedgerStore`] is the production implementation.

pub mod postgres;
pub mod store;

pub use postgres::{connect_options, PgLedgerStore};
pub use store::{
    AuthorId, AuthorStage, CommitStage, LedgerStore, RepoId, StoreError, StoreResult,
};
