//! Integration test suite for the Duff wallet engine.
//!
//! Tests drive wallets and accounts end to end against an in-memory
//! transport: sync, balance, coin selection, signing, broadcast and
//! persistence.

pub mod helpers;
