//! End-to-end scenarios: signed request, simulated confirmation, relay,
//! reconciliation and download.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::harness::{TestHarness, BUYER_WALLET, OWNER_WALLET};
use alloy::primitives::{B256, U256};
use axum::http::{header, StatusCode};
use lensmark::artifact::{png, BUYER_WALLET_KEY};
use lensmark::listener::{
    LedgerLog, PhotoPurchased, PhotoRegistered, PhotoRemovedFromSale, ReceiptSummary,
};
use lensmark::market::{
    DownloadLinkRequest, PurchaseRequest, RegistrationRequest, RevocationRequest,
};
use lensmark::storage::MarketStore;
use lensmark::{ListenerEvent, ReconcileStatus};

fn fingerprint(hex_str: &str) -> B256 {
    hex_str.parse().unwrap()
}

fn registered(h: &TestHarness, uid: B256) -> LedgerLog {
    LedgerLog::Registered(PhotoRegistered {
        photographer: OWNER_WALLET,
        attestationUid: uid,
        contentHash: fingerprint(&h.listing.content_fingerprint),
    })
}

fn receipt(seed: u8) -> ReceiptSummary {
    ReceiptSummary {
        tx_hash: B256::repeat_byte(seed),
        block_hash: B256::repeat_byte(seed.wrapping_add(1)),
        block_number: 4_200_000 + u64::from(seed),
        fee_paid: Some(U256::from(21_000u64 * 1_000_000_000)),
    }
}

/// Register the seeded listing through the whole pipeline.
async fn register_listing(h: &TestHarness) -> B256 {
    let outcome = h
        .market()
        .request_registration(&RegistrationRequest {
            user_id: h.owner.id,
            listing_id: h.listing.id,
            current_wallet: h.owner.wallet_address.clone(),
        })
        .await
        .unwrap();
    assert!(outcome.is_success(), "{}", outcome.message());

    let uid = B256::repeat_byte(0x0a);
    h.ledger.mine(uid, h.listing_schema_uid);
    assert_eq!(h.relay(registered(h, uid)).await.unwrap(), ReconcileStatus::Applied);
    uid
}

#[tokio::test]
async fn test_purchase_flow_ends_in_single_use_download() {
    let h = TestHarness::setup().await.expect("Failed to setup harness");
    let listing_uid = register_listing(&h).await;

    let listing = h.store.listing(h.listing.id).await.unwrap().unwrap();
    assert_eq!(listing.attestation_ref, Some(listing_uid.to_string()));

    let authorization = h
        .market()
        .request_purchase(&PurchaseRequest {
            user_id: h.buyer.id,
            listing_id: h.listing.id,
            current_wallet: h.buyer.wallet_address.clone(),
            content_addressed: false,
        })
        .await
        .unwrap()
        .into_payload()
        .expect("purchase should be authorized");
    assert_eq!(
        authorization.bundle.value,
        alloy::primitives::utils::parse_ether("0.05").unwrap()
    );
    assert_eq!(authorization.bundle.ref_uid, listing_uid);

    let purchase_uid = B256::repeat_byte(0x0b);
    let status = h
        .relay(LedgerLog::Purchased {
            event: PhotoPurchased {
                buyer: BUYER_WALLET,
                photoRefUID: listing_uid,
                purchaseAttUID: purchase_uid,
                resourceIdHash: authorization.artifact_id_hash,
                contentHash: fingerprint(&authorization.artifact.content_fingerprint),
                isIpfs: false,
            },
            receipt: receipt(0x30),
        })
        .await
        .unwrap();
    assert_eq!(status, ReconcileStatus::Applied);

    let transaction = h
        .store
        .transaction_by_attestation(&purchase_uid.to_string())
        .await
        .unwrap()
        .expect("transaction recorded");
    assert_eq!(transaction.buyer_id, h.buyer.id);
    assert_eq!(transaction.artifact_id, authorization.artifact.id);
    assert_eq!(transaction.block_number, 4_200_048);
    assert_eq!(transaction.fee_paid.as_deref(), Some("21000000000000"));

    let link = h
        .store
        .link_for_artifact(authorization.artifact.id)
        .await
        .unwrap()
        .expect("link granted after purchase");
    assert_eq!(link.max_downloads, Some(1));

    let (status, headers, body) = h.download(&link.token).await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "image/png");
    let entries = png::text_entries(&body).unwrap();
    assert!(entries
        .iter()
        .any(|(k, v)| k == BUYER_WALLET_KEY && *v == h.buyer.wallet_address));

    let (again, _, _) = h.download(&link.token).await.unwrap();
    assert_eq!(again, StatusCode::GONE);

    let renewed = h
        .market()
        .request_download_link(&DownloadLinkRequest {
            user_id: h.buyer.id,
            transaction_id: transaction.id,
        })
        .await
        .unwrap()
        .into_payload()
        .expect("buyer can request a fresh link");
    assert_ne!(renewed.token, link.token);
    let (status, _, _) = h.download(&renewed.token).await.unwrap();
    assert_eq!(status, StatusCode::OK);

    h.teardown().await;
}

#[tokio::test]
async fn test_redelivered_events_are_acknowledged_as_duplicates() {
    let h = TestHarness::setup().await.expect("Failed to setup harness");
    let uid = register_listing(&h).await;

    assert_eq!(
        h.relay(registered(&h, uid)).await.unwrap(),
        ReconcileStatus::Duplicate
    );
    let conflicting = B256::repeat_byte(0x0c);
    assert_eq!(
        h.relay(registered(&h, conflicting)).await.unwrap(),
        ReconcileStatus::Rejected
    );

    let listing = h.store.listing(h.listing.id).await.unwrap().unwrap();
    assert_eq!(listing.attestation_ref, Some(uid.to_string()));

    h.teardown().await;
}

#[tokio::test]
async fn test_revoked_listing_cannot_be_purchased() {
    let h = TestHarness::setup().await.expect("Failed to setup harness");
    let uid = register_listing(&h).await;

    let revocation = h
        .market()
        .request_revocation(&RevocationRequest {
            user_id: h.owner.id,
            attestation_uid: uid.to_string(),
            current_wallet: h.owner.wallet_address.clone(),
        })
        .await
        .unwrap();
    assert!(revocation.is_success(), "{}", revocation.message());
    assert_eq!(revocation.payload().unwrap().uid, uid);

    h.ledger.revoke(uid);
    let status = h
        .relay(LedgerLog::RemovedFromSale(PhotoRemovedFromSale {
            photographer: OWNER_WALLET,
            attestationUid: uid,
        }))
        .await
        .unwrap();
    assert_eq!(status, ReconcileStatus::Applied);

    let purchase = h
        .market()
        .request_purchase(&PurchaseRequest {
            user_id: h.buyer.id,
            listing_id: h.listing.id,
            current_wallet: h.buyer.wallet_address.clone(),
            content_addressed: false,
        })
        .await
        .unwrap();
    assert!(!purchase.is_success());

    let again = h
        .market()
        .request_revocation(&RevocationRequest {
            user_id: h.owner.id,
            attestation_uid: uid.to_string(),
            current_wallet: h.owner.wallet_address.clone(),
        })
        .await
        .unwrap();
    assert!(!again.is_success());

    h.teardown().await;
}

#[tokio::test]
async fn test_content_addressed_purchase_redirects_to_gateway() {
    let h = TestHarness::setup().await.expect("Failed to setup harness");
    let listing_uid = register_listing(&h).await;

    let authorization = h
        .market()
        .request_purchase(&PurchaseRequest {
            user_id: h.buyer.id,
            listing_id: h.listing.id,
            current_wallet: h.buyer.wallet_address.clone(),
            content_addressed: true,
        })
        .await
        .unwrap()
        .into_payload()
        .expect("purchase should be authorized");

    let status = h
        .relay(LedgerLog::Purchased {
            event: PhotoPurchased {
                buyer: BUYER_WALLET,
                photoRefUID: listing_uid,
                purchaseAttUID: B256::repeat_byte(0x0d),
                resourceIdHash: authorization.artifact_id_hash,
                contentHash: fingerprint(&authorization.artifact.content_fingerprint),
                isIpfs: true,
            },
            receipt: receipt(0x40),
        })
        .await
        .unwrap();
    assert_eq!(status, ReconcileStatus::Applied);

    let link = h
        .store
        .link_for_artifact(authorization.artifact.id)
        .await
        .unwrap()
        .expect("link granted after purchase");
    assert_eq!(link.token, authorization.artifact.locator);
    assert!(link.expires_at.is_none());

    for _ in 0..2 {
        let (status, headers, _) = h.download(&link.token).await.unwrap();
        assert_eq!(status, StatusCode::SEE_OTHER);
        assert_eq!(headers[header::LOCATION], link.url.as_str());
    }

    h.teardown().await;
}

#[tokio::test]
async fn test_unrecognized_log_does_not_stall_the_listener() {
    let h = TestHarness::setup().await.expect("Failed to setup harness");

    let report = h
        .emit(LedgerLog::Unrecognized {
            reason: "unknown topic".to_string(),
        })
        .await
        .unwrap();
    assert!(matches!(report, ListenerEvent::Discarded { .. }));

    let uid = B256::repeat_byte(0x0e);
    assert_eq!(
        h.relay(registered(&h, uid)).await.unwrap(),
        ReconcileStatus::Applied
    );

    h.teardown().await;
}

#[tokio::test]
async fn test_purchase_of_unknown_artifact_is_rejected() {
    let h = TestHarness::setup().await.expect("Failed to setup harness");
    let listing_uid = register_listing(&h).await;

    let purchase_uid = B256::repeat_byte(0x0f);
    let status = h
        .relay(LedgerLog::Purchased {
            event: PhotoPurchased {
                buyer: BUYER_WALLET,
                photoRefUID: listing_uid,
                purchaseAttUID: purchase_uid,
                resourceIdHash: B256::ZERO,
                contentHash: B256::repeat_byte(0xee),
                isIpfs: false,
            },
            receipt: receipt(0x50),
        })
        .await
        .unwrap();
    assert_eq!(status, ReconcileStatus::Rejected);
    assert!(h
        .store
        .transaction_by_attestation(&purchase_uid.to_string())
        .await
        .unwrap()
        .is_none());

    h.teardown().await;
}
