//! Attaching a wallet signature to a transaction.
//!
//! Building and signing are separate steps: a [`Transaction`] can be built
//! by anyone, but only the holder of the matching wallet can make it pass
//! [`verify_transaction`](super::verify_transaction).

use super::types::Transaction;
use crate::crypto::{sign, Wallet};

/// Sign a transaction in place with the sender's wallet.
///
/// The signature covers [`Transaction::signing_payload`], the same string the
/// id is hashed from. The caller is responsible for having built the
/// transaction with `wallet.public_key_base64()` as the sender key; signing
/// with another wallet yields a transaction that fails verification.
///
/// # Example
///
/// ```
/// use ember_protocol::crypto::Wallet;
/// use ember_protocol::transaction::{sign_transaction, Transaction};
///
/// let wallet = Wallet::generate();
/// let mut tx = Transaction::new(wallet.public_key_base64(), "bob", "hello");
/// sign_transaction(&mut tx, &wallet);
/// assert!(tx.is_signed());
/// ```
pub fn sign_transaction<'a>(tx: &'a mut Transaction, wallet: &Wallet) -> &'a Transaction {
    let payload = tx.signing_payload();
    tx.signature = sign(wallet, payload.as_bytes());
    tx
}
