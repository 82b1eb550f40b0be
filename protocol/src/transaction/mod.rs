//! # Transaction Module
//!
//! Construction, signing and verification of Ember transactions: signed,
//! content-addressed data records with no value semantics.
//!
//! ```text
//! types.rs       : the Transaction record, its id and JSON shape
//! signing.rs     : attaching a wallet signature
//! verification.rs: acceptance checks for transactions received from peers
//! ```
//!
//! Lifecycle: build with [`Transaction::new`], sign with
//! [`sign_transaction`], gossip, then every receiver runs
//! [`verify_transaction`] before the mempool sees it.

pub mod signing;
pub mod types;
pub mod verification;

pub use signing::sign_transaction;
pub use types::Transaction;
pub use verification::{verify_transaction, TransactionError};
