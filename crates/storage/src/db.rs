use halves_core::{DateRange, Expense, Month};
use halves_ocr::{AliasTable, Receipt, StoreKey};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

pub type DbPool = Pool<Sqlite>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("Stored document could not be read: {0}")]
    Document(#[from] serde_json::Error),
}

pub async fn create_db(path: &Path) -> Result<DbPool, StorageError> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous = NORMAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA cache_size = -32000")
        .execute(&pool)
        .await?;

    run_migrations(&pool).await?;
    debug!("opened database {}", path.display());

    Ok(pool)
}

async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS receipts (
            id TEXT PRIMARY KEY,
            image_hash TEXT,
            store TEXT NOT NULL,
            store_key TEXT,
            total_cents INTEGER NOT NULL,
            confidence REAL NOT NULL,
            needs_review INTEGER NOT NULL DEFAULT 0,
            verified INTEGER NOT NULL DEFAULT 0,
            exported INTEGER NOT NULL DEFAULT 0,
            document TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_receipts_image_hash ON receipts (image_hash)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS expenses (
            id TEXT PRIMARY KEY,
            payer TEXT NOT NULL,
            date TEXT NOT NULL,
            month TEXT NOT NULL,
            store TEXT NOT NULL,
            total_cents INTEGER NOT NULL,
            receipt_id TEXT,
            document TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_expenses_month ON expenses (month)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS store_aliases (
            alias TEXT PRIMARY KEY,
            store_key TEXT NOT NULL,
            store_name TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

// ── Receipts ──────────────────────────────────────────────────────────────────

/// Inserts or replaces the receipt. Last write wins.
pub async fn save_receipt(pool: &DbPool, receipt: &Receipt) -> Result<(), StorageError> {
    let document = serde_json::to_string(receipt)?;
    sqlx::query(
        r#"
        INSERT INTO receipts (id, image_hash, store, store_key, total_cents, confidence,
                              needs_review, verified, exported, document, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (id) DO UPDATE SET
            image_hash = excluded.image_hash,
            store = excluded.store,
            store_key = excluded.store_key,
            total_cents = excluded.total_cents,
            confidence = excluded.confidence,
            needs_review = excluded.needs_review,
            verified = excluded.verified,
            exported = excluded.exported,
            document = excluded.document,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(receipt.id.to_string())
    .bind(receipt.image.as_ref().map(|i| i.hash_hex.clone()))
    .bind(&receipt.store.name)
    .bind(receipt.store.key.as_ref().map(|k| k.to_string()))
    .bind(receipt.effective_total().to_cents())
    .bind(receipt.confidence.overall as f64)
    .bind(receipt.flags.needs_review)
    .bind(receipt.flags.verified)
    .bind(receipt.flags.exported)
    .bind(document)
    .bind(receipt.created_at)
    .bind(receipt.updated_at)
    .execute(pool)
    .await?;
    Ok(())
}

fn parse_receipts(rows: Vec<(String,)>) -> Result<Vec<Receipt>, StorageError> {
    rows.into_iter()
        .map(|(doc,)| serde_json::from_str(&doc).map_err(StorageError::from))
        .collect()
}

pub async fn get_receipt(pool: &DbPool, id: Uuid) -> Result<Option<Receipt>, StorageError> {
    let row = sqlx::query_as::<_, (String,)>("SELECT document FROM receipts WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|(doc,)| serde_json::from_str(&doc)).transpose()?)
}

/// The oldest receipt uploaded with this image, if any.
pub async fn get_receipt_by_hash(pool: &DbPool, hash_hex: &str) -> Result<Option<Receipt>, StorageError> {
    let row = sqlx::query_as::<_, (String,)>(
        "SELECT document FROM receipts WHERE image_hash = ? ORDER BY created_at LIMIT 1",
    )
    .bind(hash_hex)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|(doc,)| serde_json::from_str(&doc)).transpose()?)
}

/// Flagged for review and not yet verified, oldest first.
pub async fn get_receipts_pending_review(pool: &DbPool) -> Result<Vec<Receipt>, StorageError> {
    let rows = sqlx::query_as::<_, (String,)>(
        "SELECT document FROM receipts WHERE needs_review = 1 AND verified = 0 ORDER BY created_at",
    )
    .fetch_all(pool)
    .await?;
    parse_receipts(rows)
}

pub async fn get_all_receipts(pool: &DbPool) -> Result<Vec<Receipt>, StorageError> {
    let rows = sqlx::query_as::<_, (String,)>("SELECT document FROM receipts ORDER BY created_at")
        .fetch_all(pool)
        .await?;
    parse_receipts(rows)
}

/// Returns whether a row was removed.
pub async fn delete_receipt(pool: &DbPool, id: Uuid) -> Result<bool, StorageError> {
    let result = sqlx::query("DELETE FROM receipts WHERE id = ?")
        .bind(id.to_string())
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

// ── Expenses ──────────────────────────────────────────────────────────────────

pub async fn save_expense(pool: &DbPool, expense: &Expense) -> Result<(), StorageError> {
    let document = serde_json::to_string(expense)?;
    sqlx::query(
        r#"
        INSERT INTO expenses (id, payer, date, month, store, total_cents, receipt_id, document)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (id) DO UPDATE SET
            payer = excluded.payer,
            date = excluded.date,
            month = excluded.month,
            store = excluded.store,
            total_cents = excluded.total_cents,
            receipt_id = excluded.receipt_id,
            document = excluded.document
        "#,
    )
    .bind(expense.id.to_string())
    .bind(expense.payer.to_string())
    .bind(expense.date)
    .bind(expense.month().to_string())
    .bind(&expense.store)
    .bind(expense.total.to_cents())
    .bind(expense.receipt_id.map(|id| id.to_string()))
    .bind(document)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_expense(pool: &DbPool, id: Uuid) -> Result<Option<Expense>, StorageError> {
    let row = sqlx::query_as::<_, (String,)>("SELECT document FROM expenses WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|(doc,)| serde_json::from_str(&doc)).transpose()?)
}

/// Expenses dated in `month`, by date then insertion order.
pub async fn get_expenses_for_month(pool: &DbPool, month: Month) -> Result<Vec<Expense>, StorageError> {
    let rows = sqlx::query_as::<_, (String,)>(
        "SELECT document FROM expenses WHERE month = ? ORDER BY date, created_at, rowid",
    )
    .bind(month.to_string())
    .fetch_all(pool)
    .await?;
    rows.into_iter()
        .map(|(doc,)| serde_json::from_str(&doc).map_err(StorageError::from))
        .collect()
}

/// Expenses dated inside `range` (inclusive), oldest first.
pub async fn get_expenses_between(pool: &DbPool, range: DateRange) -> Result<Vec<Expense>, StorageError> {
    let rows = sqlx::query_as::<_, (String,)>(
        "SELECT document FROM expenses WHERE date >= ? AND date <= ? ORDER BY date, created_at, rowid",
    )
    .bind(range.start)
    .bind(range.end)
    .fetch_all(pool)
    .await?;
    rows.into_iter()
        .map(|(doc,)| serde_json::from_str(&doc).map_err(StorageError::from))
        .collect()
}

pub async fn delete_expense(pool: &DbPool, id: Uuid) -> Result<bool, StorageError> {
    let result = sqlx::query("DELETE FROM expenses WHERE id = ?")
        .bind(id.to_string())
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

// ── Store aliases ─────────────────────────────────────────────────────────────

/// Writes the built-in alias table. Existing aliases are left alone.
pub async fn seed_default_aliases(pool: &DbPool) -> Result<(), StorageError> {
    let table = AliasTable::builtin();
    for entry in table.entries() {
        for alias in &entry.aliases {
            sqlx::query("INSERT OR IGNORE INTO store_aliases (alias, store_key, store_name) VALUES (?, ?, ?)")
                .bind(alias.to_uppercase())
                .bind(entry.key.as_str())
                .bind(&entry.name)
                .execute(pool)
                .await?;
        }
    }
    Ok(())
}

pub async fn get_alias_table(pool: &DbPool) -> Result<AliasTable, StorageError> {
    let rows = sqlx::query_as::<_, (String, String, String)>(
        "SELECT alias, store_key, store_name FROM store_aliases ORDER BY store_key, rowid",
    )
    .fetch_all(pool)
    .await?;

    let mut table = AliasTable::empty();
    for (alias, key, name) in rows {
        table.add_named_alias(StoreKey::new(&key), &name, &alias);
    }
    Ok(table)
}

/// Maps `alias` to `store`, moving it if it already pointed elsewhere. A
/// store seen for the first time takes `store` as its display name.
pub async fn upsert_store_alias(pool: &DbPool, store: &str, alias: &str) -> Result<StoreKey, StorageError> {
    let key = StoreKey::new(store);
    let existing = sqlx::query_as::<_, (String,)>("SELECT store_name FROM store_aliases WHERE store_key = ? LIMIT 1")
        .bind(key.as_str())
        .fetch_optional(pool)
        .await?;
    let name = existing.map(|(n,)| n).unwrap_or_else(|| store.trim().to_string());

    sqlx::query(
        r#"
        INSERT INTO store_aliases (alias, store_key, store_name) VALUES (?, ?, ?)
        ON CONFLICT (alias) DO UPDATE SET store_key = excluded.store_key, store_name = excluded.store_name
        "#,
    )
    .bind(alias.trim().to_uppercase())
    .bind(key.as_str())
    .bind(name)
    .execute(pool)
    .await?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use halves_core::{ExpenseItem, Money, Participant};
    use halves_ocr::{ImageRef, Item, MatchReason, StoreMatch, Totals};

    async fn db() -> (tempfile::TempDir, DbPool) {
        let dir = tempfile::tempdir().unwrap();
        let pool = create_db(&dir.path().join("halves.db")).await.unwrap();
        (dir, pool)
    }

    fn receipt(hash: &str) -> Receipt {
        let mut r = Receipt::new("COSTCO\nKS WATER 4.99\nTOTAL 4.99");
        r.store = StoreMatch::new("Costco", Some(StoreKey::new("costco")), 0.97, MatchReason::ExactAlias);
        r.items = vec![Item::new("KS WATER", Money::from_cents(499), 0.85)];
        r.totals = Totals { subtotal: None, tax: None, total: Some(Money::from_cents(499)) };
        r.image = Some(ImageRef { hash_hex: hash.into(), path: format!("/tmp/{hash}.png").into() });
        r
    }

    #[tokio::test]
    async fn receipt_save_and_load() {
        let (_dir, pool) = db().await;
        let mut r = receipt("aa11");
        save_receipt(&pool, &r).await.unwrap();
        assert_eq!(get_receipt(&pool, r.id).await.unwrap(), Some(r.clone()));

        r.set_item_shared(0, false).unwrap();
        save_receipt(&pool, &r).await.unwrap();
        let loaded = get_receipt(&pool, r.id).await.unwrap().unwrap();
        assert!(!loaded.items[0].shared);
        assert_eq!(get_all_receipts(&pool).await.unwrap().len(), 1);

        assert_eq!(get_receipt_by_hash(&pool, "aa11").await.unwrap().map(|x| x.id), Some(r.id));
        assert!(get_receipt_by_hash(&pool, "bb22").await.unwrap().is_none());

        assert!(delete_receipt(&pool, r.id).await.unwrap());
        assert!(!delete_receipt(&pool, r.id).await.unwrap());
        assert!(get_receipt(&pool, r.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn pending_review_excludes_verified() {
        let (_dir, pool) = db().await;
        let mut flagged = receipt("aa11");
        flagged.flags.needs_review = true;
        let mut verified = receipt("bb22");
        verified.flags.needs_review = true;
        verified.mark_verified().unwrap();
        let fine = receipt("cc33");
        for r in [&flagged, &verified, &fine] {
            save_receipt(&pool, r).await.unwrap();
        }
        let pending = get_receipts_pending_review(&pool).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, flagged.id);
    }

    #[tokio::test]
    async fn expenses_by_month() {
        let (_dir, pool) = db().await;
        let d = |m, day| NaiveDate::from_ymd_opt(2024, m, day).unwrap();
        let mut march = Expense::new(Participant::First, d(3, 20), "Costco", Money::from_cents(2000));
        march.items.push(ExpenseItem::new("WATER", Money::from_cents(2000)));
        let early = Expense::new(Participant::Second, d(3, 2), "H Mart", Money::from_cents(1000));
        let april = Expense::new(Participant::First, d(4, 1), "Key Food", Money::from_cents(500));
        for e in [&march, &early, &april] {
            save_expense(&pool, e).await.unwrap();
        }

        let got = get_expenses_for_month(&pool, Month::new(2024, 3).unwrap()).await.unwrap();
        assert_eq!(got.iter().map(|e| e.id).collect::<Vec<_>>(), [early.id, march.id]);
        assert_eq!(got[1], march);
        assert_eq!(get_expense(&pool, april.id).await.unwrap(), Some(april.clone()));

        let range = DateRange::new(
            NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
            NaiveDate::from_ymd_opt(2024, 4, 1).unwrap(),
        );
        let between = get_expenses_between(&pool, range).await.unwrap();
        assert_eq!(between.iter().map(|e| e.id).collect::<Vec<_>>(), [march.id, april.id]);

        assert!(delete_expense(&pool, april.id).await.unwrap());
        assert!(get_expenses_for_month(&pool, Month::new(2024, 4).unwrap()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn alias_seed_and_upsert() {
        let (_dir, pool) = db().await;
        seed_default_aliases(&pool).await.unwrap();
        seed_default_aliases(&pool).await.unwrap();
        let table = get_alias_table(&pool).await.unwrap();
        assert_eq!(table.lookup("costco wholesale"), Some(&StoreKey::new("costco")));
        assert_eq!(table.display_name(&StoreKey::new("trader_joes")), "Trader Joe's");

        upsert_store_alias(&pool, "costco", "CSTCO").await.unwrap();
        let key = upsert_store_alias(&pool, "Sunrise Deli", "SUNRISE").await.unwrap();
        assert_eq!(key.as_str(), "sunrise_deli");
        let table = get_alias_table(&pool).await.unwrap();
        assert_eq!(table.lookup("cstco"), Some(&StoreKey::new("costco")));
        assert_eq!(table.display_name(&key), "Sunrise Deli");

        // moving an alias to another store
        upsert_store_alias(&pool, "walmart", "CSTCO").await.unwrap();
        let table = get_alias_table(&pool).await.unwrap();
        assert_eq!(table.lookup("CSTCO"), Some(&StoreKey::new("walmart")));
    }
}
