// Copyright (c) 2026 Ember Contributors. MIT License.
// See LICENSE for details.

//! # Ember Protocol Core Library
//!
//! A small proof-of-work blockchain that runs many peers in one process or
//! across machines. Every node keeps its own copy of the chain, stages
//! signed transactions in a mempool, mines blocks on a background thread and
//! gossips with its peers over newline-delimited JSON on plain TCP.
//!
//! ## Architecture
//!
//! - **crypto**: SHA-256 hex digests and ECDSA P-256 wallets.
//! - **transaction**: Signed data-carrying transactions and their checks.
//! - **storage**: Block, header, Merkle root and the validated chain.
//! - **network**: Wire protocol, peer sessions, mempool, miner and node.
//! - **config**: Chain constants and per-node runtime knobs.
//!
//! ## Ground Rules
//!
//! 1. Every node derives the same genesis block from the difficulty alone.
//! 2. Fork choice is length only: a valid longer chain always wins.
//! 3. Nothing received from a peer is trusted before it is re-validated.
//! 4. A malformed message costs the sender a log line, never a connection.

pub mod config;
pub mod crypto;
pub mod network;
pub mod storage;
pub mod transaction;
