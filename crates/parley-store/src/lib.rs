//! SQLite persistence for the Parley chat backend.
//!
//! This crate stores threads, messages, and agent runs. All handler writes go
//! through [`ChatStore::with_unit_of_work`], which wraps the closure in a
//! single transaction: commit on `Ok`, rollback on `Err`.
//!
//! Every read is scoped by the requesting user. A thread owned by another
//! user is reported as [`StoreError::Forbidden`] rather than leaking rows.

mod error;
mod store;
mod uow;

pub use error::{Result, StoreError};
pub use store::ChatStore;
pub use uow::UnitOfWork;
