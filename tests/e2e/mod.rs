//! End-to-end tests for a2a-paygate.
//!
//! Peers, the facilitator and the JSON-RPC node run in-process on ephemeral
//! ports; nothing here touches a public network.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod discovery;
mod harness;
mod market;
mod payment_flow;
