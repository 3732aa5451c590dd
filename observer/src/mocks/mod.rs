//! In-memory collaborators for testing and demos.

use thiserror::Error;

mod cas;
pub use cas::Cas;
mod ledger;
pub use ledger::Ledger;
mod store;
pub use store::Store;
mod writer;
pub use writer::{create, deactivate, recover, update, BatchWriter, Operation};

/// Errors returned by the mocks.
#[derive(Debug, Error)]
pub enum Error {
    #[error("injected failure")]
    Injected,
    #[error("not found: {0}")]
    NotFound(String),
}
