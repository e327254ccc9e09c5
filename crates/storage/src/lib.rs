pub mod db;

pub use db::{
    create_db, delete_expense, delete_receipt, get_alias_table, get_all_receipts, get_expense,
    get_expenses_between, get_expenses_for_month, get_receipt, get_receipt_by_hash, get_receipts_pending_review,
    save_expense, save_receipt, seed_default_aliases, upsert_store_alias, DbPool, StorageError,
};
