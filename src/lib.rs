//! Operator-run escrow coordinator for P2P fiat/crypto trades.
//!
//! The coordinator leases a private chat room to each trade, walks both
//! parties through a details wizard, watches the assigned vault contract
//! for the seller's deposit, arbitrates the fiat handshake, and signs the
//! owner-privileged release or refund on the vault.

pub mod api;
pub mod assigner;
pub mod chain;
pub mod chat;
pub mod config;
pub mod db;
pub mod error;
pub mod escrow;
pub mod handlers;
pub mod metrics;
pub mod registry;
pub mod rooms;
pub mod scheduler;
pub mod types;
pub mod watcher;
