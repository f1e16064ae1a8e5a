//! # lensmark
//!
//! Backend of a photo marketplace whose authenticity and purchase records are
//! anchored on an Ethereum ledger through attestations.
//!
//! ## Components
//!
//! - **Signer**: prepares EIP-712 delegated attestation and revocation
//!   requests signed by a custody key, for users to submit themselves.
//! - **Listener**: subscribes to resolver events over websocket, normalizes
//!   them and relays each one to the reconciler.
//! - **Reconciler**: applies confirmed events to the database idempotently and
//!   grants a download link after a confirmed purchase.
//! - **Artifacts**: buyer-stamped PNG copies and consumable download links.
//!
//! The node binary serves the reconciler and downloads; the listener binary
//! runs next to it.

pub mod artifact;
pub mod config;
pub mod confirmed;
pub mod error;
pub mod event;
pub mod listener;
pub mod market;
pub mod node;
pub mod outcome;
pub mod reconciler;
pub mod schema;
pub mod server;
pub mod signer;
pub mod storage;

pub use config::{MarketConfig, Secret};
pub use confirmed::{ConfirmedEvent, EventKey, EventKind};
pub use error::{Error, Result};
pub use event::{ListenerEvent, ListenerEventsChannel};
pub use listener::{ListenerState, ReconciliationListener};
pub use market::MarketService;
pub use node::{RunningService, ServiceBuilder};
pub use outcome::Outcome;
pub use reconciler::{ReconcileStatus, Reconciler, Reconciliation};
