//! Ledger log subscriptions.

use crate::error::{Error, Result};
use alloy::primitives::{Address, B256, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder, WsConnect};
use alloy::rpc::types::{Filter, Log};
use alloy::sol;
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use tracing::{debug, info, warn};

sol! {
    /// A listing registration attestation passed the resolver.
    #[derive(Debug, PartialEq, Eq)]
    event PhotoRegistered(address indexed photographer, bytes32 indexed attestationUid, bytes32 contentHash);

    /// A listing registration attestation was revoked.
    #[derive(Debug, PartialEq, Eq)]
    event PhotoRemovedFromSale(address indexed photographer, bytes32 indexed attestationUid);

    /// A purchase attestation passed the resolver.
    #[derive(Debug, PartialEq, Eq)]
    event PhotoPurchased(
        address indexed buyer,
        bytes32 indexed photoRefUID,
        bytes32 indexed purchaseAttUID,
        bytes32 resourceIdHash,
        bytes32 contentHash,
        bool isIpfs
    );
}

/// Where and at what cost a purchase was mined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiptSummary {
    /// Transaction hash.
    pub tx_hash: B256,
    /// Block hash.
    pub block_hash: B256,
    /// Block number.
    pub block_number: u64,
    /// `gas_used * effective_gas_price`, when the receipt was available.
    pub fee_paid: Option<U256>,
}

/// A decoded resolver log.
#[derive(Debug)]
pub enum LedgerLog {
    /// Listing registered.
    Registered(PhotoRegistered),
    /// Listing withdrawn.
    RemovedFromSale(PhotoRemovedFromSale),
    /// Purchase mined.
    Purchased {
        /// Event fields.
        event: PhotoPurchased,
        /// Mining details.
        receipt: ReceiptSummary,
    },
    /// A log that could not be interpreted.
    Unrecognized {
        /// Reason.
        reason: String,
    },
}

/// Stream of resolver logs; an `Err` item or the end of the stream means the
/// subscription is lost. Dropping the stream releases the connection.
pub type LogStream = BoxStream<'static, Result<LedgerLog>>;

/// Source of resolver logs.
#[async_trait]
pub trait EventTransport: Send + Sync {
    /// Open a connection and subscribe to the resolver events.
    ///
    /// # Errors
    ///
    /// Returns `Listener` if the connection or subscription cannot be set up.
    async fn subscribe(&self) -> Result<LogStream>;
}

/// [`EventTransport`] over a websocket RPC endpoint.
#[derive(Debug, Clone)]
pub struct WsTransport {
    url: String,
    registration_resolver: Address,
    purchase_resolver: Address,
}

impl WsTransport {
    /// Create a transport for the two resolver contracts.
    #[must_use]
    pub fn new(url: impl Into<String>, registration_resolver: Address, purchase_resolver: Address) -> Self {
        Self {
            url: url.into(),
            registration_resolver,
            purchase_resolver,
        }
    }

    fn filter(&self) -> Filter {
        Filter::new()
            .address(vec![self.registration_resolver, self.purchase_resolver])
            .event_signature(vec![
                PhotoRegistered::SIGNATURE_HASH,
                PhotoRemovedFromSale::SIGNATURE_HASH,
                PhotoPurchased::SIGNATURE_HASH,
            ])
    }
}

#[async_trait]
impl EventTransport for WsTransport {
    async fn subscribe(&self) -> Result<LogStream> {
        debug!("Connecting to {}", self.url);
        let provider = ProviderBuilder::new()
            .connect_ws(WsConnect::new(self.url.clone()))
            .await
            .map_err(|e| Error::Listener(format!("cannot connect to {}: {e}", self.url)))?
            .erased();

        let subscription = provider
            .subscribe_logs(&self.filter())
            .await
            .map_err(|e| Error::Listener(format!("log subscription failed: {e}")))?;
        info!(
            "Subscribed to resolver logs at {} and {}",
            self.registration_resolver, self.purchase_resolver
        );

        // The closure owns the provider, so the socket lives as long as the stream.
        let stream = subscription.into_stream().then(move |log| {
            let provider = provider.clone();
            async move { Ok(decode(&provider, &log).await) }
        });
        Ok(stream.boxed())
    }
}

async fn decode(provider: &DynProvider, log: &Log) -> LedgerLog {
    let Some(topic) = log.topics().first().copied() else {
        return unrecognized("log without topics");
    };

    if topic == PhotoRegistered::SIGNATURE_HASH {
        return match log.log_decode::<PhotoRegistered>() {
            Ok(decoded) => LedgerLog::Registered(decoded.inner.data),
            Err(e) => unrecognized(format!("bad PhotoRegistered log: {e}")),
        };
    }
    if topic == PhotoRemovedFromSale::SIGNATURE_HASH {
        return match log.log_decode::<PhotoRemovedFromSale>() {
            Ok(decoded) => LedgerLog::RemovedFromSale(decoded.inner.data),
            Err(e) => unrecognized(format!("bad PhotoRemovedFromSale log: {e}")),
        };
    }
    if topic == PhotoPurchased::SIGNATURE_HASH {
        let event = match log.log_decode::<PhotoPurchased>() {
            Ok(decoded) => decoded.inner.data,
            Err(e) => return unrecognized(format!("bad PhotoPurchased log: {e}")),
        };
        return match receipt_summary(provider, log).await {
            Some(receipt) => LedgerLog::Purchased { event, receipt },
            None => unrecognized("PhotoPurchased log is not mined yet"),
        };
    }
    unrecognized(format!("unexpected topic {topic}"))
}

async fn receipt_summary(provider: &DynProvider, log: &Log) -> Option<ReceiptSummary> {
    let tx_hash = log.transaction_hash?;
    let receipt = match provider.get_transaction_receipt(tx_hash).await {
        Ok(receipt) => receipt,
        Err(e) => {
            warn!("Receipt of {tx_hash} unavailable: {e}");
            None
        }
    };

    let fee_paid = receipt
        .as_ref()
        .map(|r| U256::from(r.gas_used) * U256::from(r.effective_gas_price));
    let block_hash = log
        .block_hash
        .or_else(|| receipt.as_ref().and_then(|r| r.block_hash))?;
    let block_number = log
        .block_number
        .or_else(|| receipt.as_ref().and_then(|r| r.block_number))?;

    Some(ReceiptSummary {
        tx_hash,
        block_hash,
        block_number,
        fee_paid,
    })
}

fn unrecognized(reason: impl Into<String>) -> LedgerLog {
    LedgerLog::Unrecognized {
        reason: reason.into(),
    }
}
