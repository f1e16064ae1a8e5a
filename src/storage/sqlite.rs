//! SQLite implementation of [`MarketStore`].

use super::models::{
    normalize_address, normalize_fingerprint, DownloadLink, GeneratedArtifact, Listing, NewArtifact,
    NewLink, NewListing, NewTransaction, NewUser, Transaction, User,
};
use super::MarketStore;
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        username TEXT NOT NULL,
        email TEXT NOT NULL,
        wallet_address TEXT NOT NULL UNIQUE,
        attestation_ref TEXT
    )",
    "CREATE TABLE IF NOT EXISTS listings (
        id TEXT PRIMARY KEY,
        owner_id TEXT NOT NULL REFERENCES users(id),
        title TEXT NOT NULL,
        original_name TEXT NOT NULL,
        mime_type TEXT NOT NULL,
        content_fingerprint TEXT NOT NULL UNIQUE,
        medium TEXT NOT NULL,
        locator TEXT NOT NULL,
        price TEXT NOT NULL,
        attestation_ref TEXT UNIQUE,
        revoked INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS artifacts (
        id TEXT PRIMARY KEY,
        listing_id TEXT NOT NULL REFERENCES listings(id),
        original_name TEXT NOT NULL,
        mime_type TEXT NOT NULL,
        content_fingerprint TEXT NOT NULL UNIQUE,
        medium TEXT NOT NULL,
        locator TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS transactions (
        id TEXT PRIMARY KEY,
        buyer_id TEXT NOT NULL REFERENCES users(id),
        artifact_id TEXT NOT NULL REFERENCES artifacts(id),
        attestation_ref TEXT NOT NULL UNIQUE,
        tx_hash TEXT NOT NULL UNIQUE,
        block_hash TEXT NOT NULL,
        block_number INTEGER NOT NULL,
        fee_paid TEXT,
        created_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS download_links (
        id TEXT PRIMARY KEY,
        artifact_id TEXT NOT NULL REFERENCES artifacts(id),
        buyer_id TEXT NOT NULL REFERENCES users(id),
        medium TEXT NOT NULL,
        token TEXT NOT NULL UNIQUE,
        url TEXT NOT NULL,
        expires_at INTEGER,
        download_count INTEGER NOT NULL DEFAULT 0,
        max_downloads INTEGER,
        created_at INTEGER NOT NULL
    )",
    "DELETE FROM download_links WHERE rowid NOT IN \
        (SELECT MAX(rowid) FROM download_links GROUP BY artifact_id)",
    "DROP INDEX IF EXISTS idx_download_links_artifact",
    "CREATE UNIQUE INDEX IF NOT EXISTS uniq_download_links_artifact ON download_links(artifact_id)",
    "CREATE INDEX IF NOT EXISTS idx_download_links_expiry ON download_links(expires_at)",
];

const USER_COLUMNS: &str = "id, username, email, wallet_address, attestation_ref";
const LISTING_COLUMNS: &str = "id, owner_id, title, original_name, mime_type, content_fingerprint, \
     medium, locator, price, attestation_ref, revoked, created_at";
const ARTIFACT_COLUMNS: &str =
    "id, listing_id, original_name, mime_type, content_fingerprint, medium, locator, created_at";
const TRANSACTION_COLUMNS: &str = "id, buyer_id, artifact_id, attestation_ref, tx_hash, block_hash, \
     block_number, fee_paid, created_at";
const LINK_COLUMNS: &str = "id, artifact_id, buyer_id, medium, token, url, expires_at, \
     download_count, max_downloads, created_at";

/// SQLite-backed market store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `path` and run migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the schema cannot be created.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        // A single writer connection serializes all conditional updates.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        info!("Opened market database at {}", path.display());
        Ok(store)
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub async fn in_memory() -> Result<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        // The database lives as long as its only connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// The underlying connection pool.
    #[must_use]
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

fn conflict_on_unique(err: sqlx::Error, what: impl FnOnce() -> String) -> Error {
    match err {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => Error::Conflict(what()),
        other => Error::Database(other),
    }
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| Error::Storage(format!("invalid timestamp {secs}")))
}

fn uuid_column(row: &SqliteRow, column: &str) -> Result<Uuid> {
    let raw: String = row.try_get(column)?;
    Uuid::parse_str(&raw).map_err(|e| Error::Storage(format!("invalid uuid in {column}: {e}")))
}

fn count_column(row: &SqliteRow, column: &str) -> Result<u32> {
    let raw: i64 = row.try_get(column)?;
    u32::try_from(raw).map_err(|_| Error::Storage(format!("{column} out of range: {raw}")))
}

fn user_from_row(row: &SqliteRow) -> Result<User> {
    Ok(User {
        id: uuid_column(row, "id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        wallet_address: row.try_get("wallet_address")?,
        attestation_ref: row.try_get("attestation_ref")?,
    })
}

fn listing_from_row(row: &SqliteRow) -> Result<Listing> {
    let medium: String = row.try_get("medium")?;
    Ok(Listing {
        id: uuid_column(row, "id")?,
        owner_id: uuid_column(row, "owner_id")?,
        title: row.try_get("title")?,
        original_name: row.try_get("original_name")?,
        mime_type: row.try_get("mime_type")?,
        content_fingerprint: row.try_get("content_fingerprint")?,
        medium: medium.parse()?,
        locator: row.try_get("locator")?,
        price: row.try_get("price")?,
        attestation_ref: row.try_get("attestation_ref")?,
        revoked: row.try_get("revoked")?,
        created_at: timestamp(row.try_get("created_at")?)?,
    })
}

fn artifact_from_row(row: &SqliteRow) -> Result<GeneratedArtifact> {
    let medium: String = row.try_get("medium")?;
    Ok(GeneratedArtifact {
        id: uuid_column(row, "id")?,
        listing_id: uuid_column(row, "listing_id")?,
        original_name: row.try_get("original_name")?,
        mime_type: row.try_get("mime_type")?,
        content_fingerprint: row.try_get("content_fingerprint")?,
        medium: medium.parse()?,
        locator: row.try_get("locator")?,
        created_at: timestamp(row.try_get("created_at")?)?,
    })
}

fn transaction_from_row(row: &SqliteRow) -> Result<Transaction> {
    let block_number: i64 = row.try_get("block_number")?;
    Ok(Transaction {
        id: uuid_column(row, "id")?,
        buyer_id: uuid_column(row, "buyer_id")?,
        artifact_id: uuid_column(row, "artifact_id")?,
        attestation_ref: row.try_get("attestation_ref")?,
        tx_hash: row.try_get("tx_hash")?,
        block_hash: row.try_get("block_hash")?,
        block_number: u64::try_from(block_number)
            .map_err(|_| Error::Storage(format!("negative block number {block_number}")))?,
        fee_paid: row.try_get("fee_paid")?,
        created_at: timestamp(row.try_get("created_at")?)?,
    })
}

fn link_from_row(row: &SqliteRow) -> Result<DownloadLink> {
    let medium: String = row.try_get("medium")?;
    let expires_at: Option<i64> = row.try_get("expires_at")?;
    let max_downloads: Option<i64> = row.try_get("max_downloads")?;
    Ok(DownloadLink {
        id: uuid_column(row, "id")?,
        artifact_id: uuid_column(row, "artifact_id")?,
        buyer_id: uuid_column(row, "buyer_id")?,
        medium: medium.parse()?,
        token: row.try_get("token")?,
        url: row.try_get("url")?,
        expires_at: expires_at.map(timestamp).transpose()?,
        download_count: count_column(row, "download_count")?,
        max_downloads: max_downloads
            .map(|raw| {
                u32::try_from(raw)
                    .map_err(|_| Error::Storage(format!("max_downloads out of range: {raw}")))
            })
            .transpose()?,
        created_at: timestamp(row.try_get("created_at")?)?,
    })
}

#[async_trait]
impl MarketStore for SqliteStore {
    async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn create_user(&self, user: &NewUser) -> Result<User> {
        let wallet = normalize_address(&user.wallet_address);
        let row = sqlx::query(&format!(
            "INSERT INTO users ({USER_COLUMNS}) VALUES (?, ?, ?, ?, ?) RETURNING {USER_COLUMNS}"
        ))
        .bind(Uuid::new_v4().to_string())
        .bind(&user.username)
        .bind(&user.email)
        .bind(&wallet)
        .bind(&user.attestation_ref)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| conflict_on_unique(e, || format!("wallet {wallet} already registered")))?;
        user_from_row(&row)
    }

    async fn user(&self, id: Uuid) -> Result<Option<User>> {
        sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(user_from_row)
            .transpose()
    }

    async fn user_by_address(&self, address: &str) -> Result<Option<User>> {
        sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE wallet_address = ?"
        ))
        .bind(normalize_address(address))
        .fetch_optional(&self.pool)
        .await?
        .as_ref()
        .map(user_from_row)
        .transpose()
    }

    async fn create_listing(&self, listing: &NewListing) -> Result<Listing> {
        let fingerprint = normalize_fingerprint(&listing.content_fingerprint);
        let row = sqlx::query(&format!(
            "INSERT INTO listings ({LISTING_COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, 0, ?) RETURNING {LISTING_COLUMNS}"
        ))
        .bind(Uuid::new_v4().to_string())
        .bind(listing.owner_id.to_string())
        .bind(&listing.title)
        .bind(&listing.original_name)
        .bind(&listing.mime_type)
        .bind(&fingerprint)
        .bind(listing.medium.as_str())
        .bind(&listing.locator)
        .bind(&listing.price)
        .bind(Utc::now().timestamp())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| conflict_on_unique(e, || format!("listing {fingerprint} already exists")))?;
        listing_from_row(&row)
    }

    async fn listing(&self, id: Uuid) -> Result<Option<Listing>> {
        sqlx::query(&format!("SELECT {LISTING_COLUMNS} FROM listings WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(listing_from_row)
            .transpose()
    }

    async fn listing_by_fingerprint(&self, fingerprint: &str) -> Result<Option<Listing>> {
        sqlx::query(&format!(
            "SELECT {LISTING_COLUMNS} FROM listings WHERE content_fingerprint = ?"
        ))
        .bind(normalize_fingerprint(fingerprint))
        .fetch_optional(&self.pool)
        .await?
        .as_ref()
        .map(listing_from_row)
        .transpose()
    }

    async fn listing_by_attestation(&self, uid: &str) -> Result<Option<Listing>> {
        sqlx::query(&format!(
            "SELECT {LISTING_COLUMNS} FROM listings WHERE attestation_ref = ?"
        ))
        .bind(uid.to_ascii_lowercase())
        .fetch_optional(&self.pool)
        .await?
        .as_ref()
        .map(listing_from_row)
        .transpose()
    }

    async fn update_listing_price(&self, id: Uuid, price: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE listings SET price = ? WHERE id = ? AND attestation_ref IS NULL",
        )
        .bind(price)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }
        match self.listing(id).await? {
            Some(_) => Err(Error::Conflict(format!(
                "listing {id} is attested, its price is immutable"
            ))),
            None => Err(Error::NotFound(format!("listing {id}"))),
        }
    }

    async fn delete_listing(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM listings WHERE id = ? AND attestation_ref IS NULL")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }
        match self.listing(id).await? {
            Some(_) => Err(Error::Conflict(format!(
                "listing {id} is attested and can only be revoked"
            ))),
            None => Err(Error::NotFound(format!("listing {id}"))),
        }
    }

    async fn mark_listing_attested(&self, id: Uuid, uid: &str) -> Result<bool> {
        let uid = uid.to_ascii_lowercase();
        let result = sqlx::query(
            "UPDATE listings SET attestation_ref = ? WHERE id = ? AND attestation_ref IS NULL",
        )
        .bind(&uid)
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_on_unique(e, || format!("attestation {uid} already bound")))?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_listing_revoked(&self, uid: &str) -> Result<bool> {
        let result =
            sqlx::query("UPDATE listings SET revoked = 1 WHERE attestation_ref = ? AND revoked = 0")
                .bind(uid.to_ascii_lowercase())
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_artifact(&self, artifact: &NewArtifact) -> Result<GeneratedArtifact> {
        let fingerprint = normalize_fingerprint(&artifact.content_fingerprint);
        let row = sqlx::query(&format!(
            "INSERT INTO artifacts ({ARTIFACT_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
             RETURNING {ARTIFACT_COLUMNS}"
        ))
        .bind(Uuid::new_v4().to_string())
        .bind(artifact.listing_id.to_string())
        .bind(&artifact.original_name)
        .bind(&artifact.mime_type)
        .bind(&fingerprint)
        .bind(artifact.medium.as_str())
        .bind(&artifact.locator)
        .bind(Utc::now().timestamp())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| conflict_on_unique(e, || format!("artifact {fingerprint} already exists")))?;
        artifact_from_row(&row)
    }

    async fn artifact(&self, id: Uuid) -> Result<Option<GeneratedArtifact>> {
        sqlx::query(&format!("SELECT {ARTIFACT_COLUMNS} FROM artifacts WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(artifact_from_row)
            .transpose()
    }

    async fn artifact_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<GeneratedArtifact>> {
        sqlx::query(&format!(
            "SELECT {ARTIFACT_COLUMNS} FROM artifacts WHERE content_fingerprint = ?"
        ))
        .bind(normalize_fingerprint(fingerprint))
        .fetch_optional(&self.pool)
        .await?
        .as_ref()
        .map(artifact_from_row)
        .transpose()
    }

    async fn insert_transaction(&self, transaction: &NewTransaction) -> Result<Transaction> {
        let uid = transaction.attestation_ref.to_ascii_lowercase();
        let tx_hash = transaction.tx_hash.to_ascii_lowercase();
        let block_number = i64::try_from(transaction.block_number).map_err(|_| {
            Error::Storage(format!("block number {} too large", transaction.block_number))
        })?;
        let row = sqlx::query(&format!(
            "INSERT INTO transactions ({TRANSACTION_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
             RETURNING {TRANSACTION_COLUMNS}"
        ))
        .bind(Uuid::new_v4().to_string())
        .bind(transaction.buyer_id.to_string())
        .bind(transaction.artifact_id.to_string())
        .bind(&uid)
        .bind(&tx_hash)
        .bind(transaction.block_hash.to_ascii_lowercase())
        .bind(block_number)
        .bind(&transaction.fee_paid)
        .bind(Utc::now().timestamp())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            conflict_on_unique(e, || {
                format!("transaction {tx_hash} / attestation {uid} already recorded")
            })
        })?;
        transaction_from_row(&row)
    }

    async fn transaction_by_attestation(&self, uid: &str) -> Result<Option<Transaction>> {
        sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE attestation_ref = ?"
        ))
        .bind(uid.to_ascii_lowercase())
        .fetch_optional(&self.pool)
        .await?
        .as_ref()
        .map(transaction_from_row)
        .transpose()
    }

    async fn transaction(&self, id: Uuid) -> Result<Option<Transaction>> {
        sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .as_ref()
        .map(transaction_from_row)
        .transpose()
    }

    async fn link_for_artifact(&self, artifact_id: Uuid) -> Result<Option<DownloadLink>> {
        sqlx::query(&format!(
            "SELECT {LINK_COLUMNS} FROM download_links WHERE artifact_id = ?"
        ))
        .bind(artifact_id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .as_ref()
        .map(link_from_row)
        .transpose()
    }

    async fn link_by_token(&self, token: &str) -> Result<Option<DownloadLink>> {
        sqlx::query(&format!(
            "SELECT {LINK_COLUMNS} FROM download_links WHERE token = ?"
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await?
        .as_ref()
        .map(link_from_row)
        .transpose()
    }

    async fn insert_link(&self, link: &NewLink) -> Result<DownloadLink> {
        let row = sqlx::query(&format!(
            "INSERT INTO download_links ({LINK_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, ?) \
             RETURNING {LINK_COLUMNS}"
        ))
        .bind(Uuid::new_v4().to_string())
        .bind(link.artifact_id.to_string())
        .bind(link.buyer_id.to_string())
        .bind(link.medium.as_str())
        .bind(&link.token)
        .bind(&link.url)
        .bind(link.expires_at.map(|at| at.timestamp()))
        .bind(link.max_downloads.map(i64::from))
        .bind(Utc::now().timestamp())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            conflict_on_unique(e, || {
                format!("artifact {} already has a download link", link.artifact_id)
            })
        })?;
        link_from_row(&row)
    }

    async fn delete_link(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM download_links WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn consume_link(&self, token: &str, now: DateTime<Utc>) -> Result<Option<DownloadLink>> {
        let row = sqlx::query(&format!(
            "UPDATE download_links SET download_count = download_count + 1 \
             WHERE token = ? \
               AND (max_downloads IS NULL OR download_count < max_downloads) \
               AND (expires_at IS NULL OR expires_at > ?) \
             RETURNING {LINK_COLUMNS}"
        ))
        .bind(token)
        .bind(now.timestamp())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(link_from_row).transpose()
    }

    async fn prune_expired_links(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM download_links WHERE expires_at IS NOT NULL AND expires_at <= ?",
        )
        .bind(now.timestamp())
        .execute(&self.pool)
        .await?;
        let pruned = result.rows_affected();
        if pruned > 0 {
            debug!("Pruned {pruned} expired download links");
        }
        Ok(pruned)
    }
}
