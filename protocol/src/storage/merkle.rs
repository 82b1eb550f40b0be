//! Merkle commitment over an ordered list of transaction ids.

use crate::crypto::{hash_concat, sha256_hex};
use crate::transaction::Transaction;

/// Compute the transactions root stored in a block header.
///
/// - no transactions: `sha256_hex("")`
/// - one transaction: its id, not re-hashed
/// - otherwise adjacent ids are combined left to right as
///   `sha256_hex(left ‖ right)`, an odd last element is paired with itself,
///   until one digest remains.
pub fn merkle_root(transactions: &[Transaction]) -> String {
    match transactions {
        [] => sha256_hex(b""),
        [only] => only.id.clone(),
        _ => {
            let mut level: Vec<String> = transactions.iter().map(|tx| tx.id.clone()).collect();
            while level.len() > 1 {
                level = level
                    .chunks(2)
                    .map(|pair| {
                        let left = pair[0].as_str();
                        let right = pair.get(1).map_or(left, String::as_str);
                        hash_concat(&[left, right])
                    })
                    .collect();
            }
            level.pop().unwrap_or_default()
        }
    }
}
