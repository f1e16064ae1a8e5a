//! End-to-end tests for lensmark.
//!
//! The suite runs the node's HTTP surface, the reconciler, the listener and
//! the signer in one process. The ledger and its websocket subscription are
//! replaced by doubles driven from the tests.
//!
//! ## Running
//!
//! ```bash
//! cargo test --test e2e
//! ```

mod harness;
mod pipeline;
