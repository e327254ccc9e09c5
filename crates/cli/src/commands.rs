use anyhow::{anyhow, bail, Context as _, Result};
use chrono::NaiveDate;
use halves_core::{AppConfig, BalanceSheet, DateRange, Expense, Grouping, Month, Purchase, SpendingReport};
use halves_export::{
    export_receipt_json, expenses_to_csv, import_receipt_json, monthly_filename, summary_filename,
    summary_to_csv,
};
use halves_ocr::{
    compare, is_receipt_image, seed_expense, sha256_bytes, spawn_intake_watcher, to_hex, GroundTruth,
    Receipt, ReceiptPipeline, StoreKey,
};
use halves_storage::DbPool;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Where `report` takes its purchases from.
#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportSource {
    /// Every stored receipt, dated by its printed date
    Receipts,
    /// Expenses entered for splitting
    Expenses,
}

pub struct Context {
    pub config: AppConfig,
    pub data_dir: PathBuf,
    pub db: DbPool,
}

impl Context {
    pub async fn open(config: AppConfig, data_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;
        let db = halves_storage::create_db(&data_dir.join("halves.db"))
            .await
            .context("Failed to open database")?;
        halves_storage::seed_default_aliases(&db)
            .await
            .context("Failed to seed store aliases")?;
        Ok(Context { config, data_dir, db })
    }

    async fn pipeline(&self) -> Result<ReceiptPipeline> {
        let aliases = halves_storage::get_alias_table(&self.db).await?;
        Ok(ReceiptPipeline::from_config(&self.config, self.data_dir.join("attachments"), aliases))
    }

    async fn receipt(&self, id: Uuid) -> Result<Receipt> {
        halves_storage::get_receipt(&self.db, id)
            .await?
            .ok_or_else(|| anyhow!("No receipt with id {id}"))
    }
}

// ── Output ────────────────────────────────────────────────────────────────────

fn print_receipt(receipt: &Receipt, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(receipt)?);
        return Ok(());
    }

    println!("Receipt {}", receipt.id);
    println!(
        "  Store:      {} ({:.0}%, {})",
        receipt.store.name,
        receipt.store.confidence * 100.0,
        receipt.store.reason
    );
    if let Some(date) = receipt.date {
        println!("  Date:       {date}");
    }
    if let Some(method) = &receipt.payment_method {
        println!("  Payment:    {method}");
    }
    for (i, item) in receipt.items.iter().enumerate() {
        let marker = if item.shared { "shared" } else { "personal" };
        let flag = if item.suspicious { " [check]" } else { "" };
        println!("  {i:>3}  {:<32} {:>10}  {marker}{flag}", item.description, item.line_price.to_string());
    }
    let totals = &receipt.totals;
    if let Some(subtotal) = totals.subtotal {
        println!("       {:<32} {:>10}", "Subtotal", subtotal.to_string());
    }
    if let Some(tax) = totals.tax {
        println!("       {:<32} {:>10}", "Tax", tax.to_string());
    }
    println!("       {:<32} {:>10}", "Total", receipt.effective_total().to_string());
    println!("       {:<32} {:>10}", "Shared items", receipt.shared_items_total().to_string());
    println!(
        "  Confidence: {:.0}%{}",
        receipt.confidence.overall * 100.0,
        if receipt.flags.needs_review { " (needs review)" } else { "" }
    );
    for w in &receipt.warnings {
        println!("  warning: {w}");
    }
    for e in &receipt.errors {
        println!("  error: {e}");
    }
    Ok(())
}

fn print_expense(ctx: &Context, expense: &Expense) {
    let names = &ctx.config.participants;
    println!(
        "{}  {}  {:<20} {:>10}  paid by {}, {} owes {}",
        expense.id,
        expense.date,
        expense.store,
        expense.total.to_string(),
        names.name(expense.payer),
        names.name(expense.owed_by()),
        expense.amount_owed()
    );
}

/// Opens `out`, or a file named `default` in the working directory.
fn create_output(out: Option<PathBuf>, default: String) -> Result<(PathBuf, BufWriter<File>)> {
    let path = out.unwrap_or_else(|| PathBuf::from(default));
    let file = File::create(&path).with_context(|| format!("Failed to create {}", path.display()))?;
    Ok((path, BufWriter::new(file)))
}

// ── Receipts ──────────────────────────────────────────────────────────────────

async fn ingest(ctx: &Context, pipeline: &ReceiptPipeline, path: &Path, store: Option<&StoreKey>) -> Result<Receipt> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let hash = to_hex(&sha256_bytes(&bytes));
    if let Some(existing) = halves_storage::get_receipt_by_hash(&ctx.db, &hash).await? {
        info!("{} was already processed as receipt {}", path.display(), existing.id);
        return Ok(existing);
    }

    let receipt = pipeline.process_file_as(path, store).await?;
    halves_storage::save_receipt(&ctx.db, &receipt).await?;
    info!("stored receipt {} from {}", receipt.id, path.display());
    Ok(receipt)
}

pub async fn process(ctx: &Context, image: &Path, store: Option<&str>, json: bool) -> Result<()> {
    let pipeline = ctx.pipeline().await?;
    let store = store.map(StoreKey::new);
    let receipt = ingest(ctx, &pipeline, image, store.as_ref()).await?;
    print_receipt(&receipt, json)
}

pub async fn text(ctx: &Context, file: &Path, store: Option<&str>, json: bool) -> Result<()> {
    let content = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let pipeline = ctx.pipeline().await?;
    let store = store.map(StoreKey::new);
    let receipt = pipeline.process_text_as(&content, store.as_ref());
    halves_storage::save_receipt(&ctx.db, &receipt).await?;
    print_receipt(&receipt, json)
}

pub async fn reprocess(ctx: &Context, id: Uuid, store: Option<&str>) -> Result<()> {
    let mut receipt = ctx.receipt(id).await?;
    let pipeline = ctx.pipeline().await?;
    let store = store.map(StoreKey::new);
    pipeline.reprocess(&mut receipt, store.as_ref())?;
    halves_storage::save_receipt(&ctx.db, &receipt).await?;
    print_receipt(&receipt, false)
}

pub async fn show(ctx: &Context, id: Uuid, json: bool) -> Result<()> {
    print_receipt(&ctx.receipt(id).await?, json)
}

pub async fn pending(ctx: &Context) -> Result<()> {
    let receipts = halves_storage::get_receipts_pending_review(&ctx.db).await?;
    if receipts.is_empty() {
        println!("Nothing to review.");
        return Ok(());
    }
    for r in receipts {
        let reason = r
            .errors
            .first()
            .or_else(|| r.warnings.first())
            .map(String::as_str)
            .unwrap_or("low confidence");
        println!(
            "{}  {:<20} {:>10}  {:>3.0}%  {reason}",
            r.id,
            r.store.name,
            r.effective_total().to_string(),
            r.confidence.overall * 100.0
        );
    }
    Ok(())
}

pub async fn share(ctx: &Context, id: Uuid, item: usize, shared: bool) -> Result<()> {
    let mut receipt = ctx.receipt(id).await?;
    receipt.set_item_shared(item, shared)?;
    halves_storage::save_receipt(&ctx.db, &receipt).await?;
    println!(
        "{} is now {}; shared items total {}",
        receipt.items[item].description,
        if shared { "shared" } else { "personal" },
        receipt.shared_items_total()
    );
    Ok(())
}

pub async fn verify(ctx: &Context, id: Uuid) -> Result<()> {
    let mut receipt = ctx.receipt(id).await?;
    receipt.mark_verified()?;
    halves_storage::save_receipt(&ctx.db, &receipt).await?;
    println!("Receipt {id} verified.");
    Ok(())
}

pub async fn validate(ctx: &Context, id: Uuid, truth: &Path) -> Result<()> {
    let receipt = ctx.receipt(id).await?;
    let content = std::fs::read_to_string(truth).with_context(|| format!("Failed to read {}", truth.display()))?;
    let truth = GroundTruth::from_json(&content).context("Invalid ground truth file")?;
    let report = compare(&receipt, &truth);
    println!("{report}");
    if !report.passed() {
        bail!("{} of {} checks failed", report.failures().count(), report.checks.len());
    }
    Ok(())
}

// ── Store aliases ─────────────────────────────────────────────────────────────

pub async fn alias_list(ctx: &Context) -> Result<()> {
    let table = halves_storage::get_alias_table(&ctx.db).await?;
    for entry in table.entries() {
        println!("{:<14} {:<16} {}", entry.key, entry.name, entry.aliases.join(", "));
    }
    Ok(())
}

pub async fn alias_add(ctx: &Context, store: &str, alias: &str) -> Result<()> {
    let key = halves_storage::upsert_store_alias(&ctx.db, store, alias).await?;
    println!("{} -> {key}", alias.trim().to_uppercase());
    Ok(())
}

// ── Expenses ──────────────────────────────────────────────────────────────────

pub async fn expense_from_receipt(ctx: &Context, id: Uuid, payer: &str, date: Option<NaiveDate>) -> Result<()> {
    let payer = ctx
        .config
        .participants
        .resolve(payer)
        .ok_or_else(|| anyhow!("Unknown payer '{payer}'"))?;
    let receipt = ctx.receipt(id).await?;
    if receipt.flags.needs_review && !receipt.flags.verified {
        warn!("receipt {id} has not been reviewed yet");
    }
    let expense = seed_expense(&receipt, payer, date);
    halves_storage::save_expense(&ctx.db, &expense).await?;
    print_expense(ctx, &expense);
    Ok(())
}

pub async fn expense_list(ctx: &Context, month: Month) -> Result<()> {
    let expenses = halves_storage::get_expenses_for_month(&ctx.db, month).await?;
    if expenses.is_empty() {
        println!("No expenses for {month}.");
    }
    for e in &expenses {
        print_expense(ctx, e);
    }
    Ok(())
}

pub async fn expense_delete(ctx: &Context, id: Uuid) -> Result<()> {
    if !halves_storage::delete_expense(&ctx.db, id).await? {
        bail!("No expense with id {id}");
    }
    println!("Expense {id} deleted.");
    Ok(())
}

async fn balance_sheet(ctx: &Context, month: Month) -> Result<BalanceSheet> {
    let expenses = halves_storage::get_expenses_for_month(&ctx.db, month).await?;
    Ok(BalanceSheet::new(month, expenses))
}

pub async fn summary(ctx: &Context, month: Month) -> Result<()> {
    let names = &ctx.config.participants;
    let s = balance_sheet(ctx, month).await?.summary(names);
    println!("{}", s.month);
    println!("  Total expenses:  {}", s.total_expenses);
    println!("  Shared:          {}", s.total_shared);
    println!("  {} paid: {}", names.first, s.first_paid);
    println!("  {} paid: {}", names.second, s.second_paid);
    println!("  {}", s.owed_statement);
    Ok(())
}

// ── Reports ───────────────────────────────────────────────────────────────────

async fn load_purchases(ctx: &Context, range: DateRange, source: ReportSource) -> Result<Vec<Purchase>> {
    let purchases = match source {
        ReportSource::Receipts => halves_storage::get_all_receipts(&ctx.db)
            .await?
            .iter()
            .map(Purchase::from)
            .filter(|p| range.contains(p.date))
            .collect(),
        ReportSource::Expenses => halves_storage::get_expenses_between(&ctx.db, range)
            .await?
            .iter()
            .map(Purchase::from)
            .collect(),
    };
    Ok(purchases)
}

pub async fn report(ctx: &Context, range: DateRange, grouping: Grouping, source: ReportSource, json: bool) -> Result<()> {
    let purchases = load_purchases(ctx, range, source).await?;
    info!("report: {} purchases from {source:?} in {range}", purchases.len());
    let report = SpendingReport::build(&purchases, range, grouping);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Spending {} ({} purchases, {})", report.range, report.purchases, report.total);
    println!("  By {}:", report.grouping);
    for (period, total) in &report.by_period {
        println!("    {period:<12} {:>12}", total.to_string());
    }
    println!("  Stores:");
    for s in &report.stores {
        let popular: Vec<&str> = s.popular_items.iter().map(|(name, _)| name.as_str()).collect();
        println!(
            "    {:<24} {:>3} visits {:>12}  avg {:.1} items  {}",
            s.store,
            s.visits,
            s.total_spent.to_string(),
            s.average_basket,
            popular.join(", ")
        );
    }
    println!("  Payment methods:");
    for p in &report.payment_methods {
        println!("    {:<12} {:>3} uses {:>12}", p.method, p.uses, p.total.to_string());
    }
    println!("  Monthly trend:");
    for m in &report.monthly_trend {
        let change = m.change_pct.map(|c| format!("{c:+.1}%")).unwrap_or_default();
        println!("    {}  {:>12}  {change}", m.month, m.total.to_string());
    }
    if !report.largest.is_empty() {
        println!("  Largest:");
        for p in &report.largest {
            println!("    {}  {:<24} {:>12}", p.date, p.store, p.total.to_string());
        }
    }
    if !report.busy_days.is_empty() {
        let days: Vec<String> = report.busy_days.iter().map(|(day, n)| format!("{day} {n}")).collect();
        println!("  Busiest days: {}", days.join(", "));
    }
    Ok(())
}

// ── Export / import ───────────────────────────────────────────────────────────

pub async fn export_csv(ctx: &Context, month: Month, out: Option<PathBuf>) -> Result<()> {
    let sheet = balance_sheet(ctx, month).await?;
    let (path, mut writer) = create_output(out, monthly_filename(month, chrono::Local::now().naive_local()))?;
    expenses_to_csv(&sheet, &ctx.config.participants, &mut writer)?;
    writer.flush()?;
    println!("Wrote {}", path.display());
    Ok(())
}

pub async fn export_summary(ctx: &Context, months: &[Month], out: Option<PathBuf>) -> Result<()> {
    let mut sheets = Vec::with_capacity(months.len());
    for &month in months {
        sheets.push(balance_sheet(ctx, month).await?);
    }
    let (path, mut writer) = create_output(out, summary_filename(chrono::Local::now().naive_local()))?;
    summary_to_csv(&sheets, &ctx.config.participants, &mut writer)?;
    writer.flush()?;
    println!("Wrote {}", path.display());
    Ok(())
}

pub async fn export_receipt(ctx: &Context, id: Uuid, out: Option<PathBuf>) -> Result<()> {
    let mut receipt = ctx.receipt(id).await?;
    let json = export_receipt_json(&mut receipt)?;
    halves_storage::save_receipt(&ctx.db, &receipt).await?;
    match out {
        Some(path) => {
            std::fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Wrote {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

pub async fn import_receipt(ctx: &Context, file: &Path) -> Result<()> {
    let content = std::fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let receipt = import_receipt_json(&content)?;
    if halves_storage::get_receipt(&ctx.db, receipt.id).await?.is_some() {
        warn!("replacing stored receipt {}", receipt.id);
    }
    halves_storage::save_receipt(&ctx.db, &receipt).await?;
    println!("Imported receipt {} ({})", receipt.id, receipt.store.name);
    Ok(())
}

// ── Watch folder ──────────────────────────────────────────────────────────────

pub async fn watch(ctx: &Context, dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    let pipeline = ctx.pipeline().await?;

    // The channel bridges the notify watcher thread and the async processor.
    let (tx, mut rx) = mpsc::channel::<PathBuf>(64);
    let _watcher = spawn_intake_watcher(dir, tx).context("Failed to start intake folder watcher")?;
    info!("watching intake folder {}", dir.display());

    // Anything already waiting in the folder goes first.
    let mut existing: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| is_receipt_image(p))
        .collect();
    existing.sort();
    for path in existing {
        handle_intake(ctx, &pipeline, &path).await;
    }

    loop {
        tokio::select! {
            next = rx.recv() => match next {
                Some(path) => handle_intake(ctx, &pipeline, &path).await,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("stopping watcher");
                break;
            }
        }
    }
    Ok(())
}

async fn handle_intake(ctx: &Context, pipeline: &ReceiptPipeline, path: &Path) {
    match ingest(ctx, pipeline, path, None).await {
        Ok(receipt) => println!(
            "{}  {}  {}  {}",
            receipt.id,
            receipt.store.name,
            receipt.effective_total(),
            if receipt.flags.needs_review { "needs review" } else { "ok" }
        ),
        Err(e) => warn!("receipt pipeline error for {}: {e:#}", path.display()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COSTCO: &str = include_str!("../../ocr/tests/fixtures/costco.txt");

    async fn context(dir: &Path) -> Context {
        Context::open(AppConfig::default(), dir.join("data")).await.unwrap()
    }

    fn may_2023() -> DateRange {
        DateRange::new(
            NaiveDate::from_ymd_opt(2023, 5, 1).unwrap(),
            NaiveDate::from_ymd_opt(2023, 5, 31).unwrap(),
        )
    }

    #[tokio::test]
    async fn report_reads_receipts_and_expenses() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path()).await;
        let file = dir.path().join("costco.txt");
        std::fs::write(&file, COSTCO).unwrap();
        text(&ctx, &file, None, true).await.unwrap();

        let receipts = load_purchases(&ctx, may_2023(), ReportSource::Receipts).await.unwrap();
        assert_eq!(receipts.len(), 1);
        assert_eq!(receipts[0].store, "Costco");
        assert_eq!(receipts[0].total.to_string(), "$33.78");
        assert_eq!(receipts[0].items.len(), 4);

        let june = DateRange::new(
            NaiveDate::from_ymd_opt(2023, 6, 1).unwrap(),
            NaiveDate::from_ymd_opt(2023, 6, 30).unwrap(),
        );
        assert!(load_purchases(&ctx, june, ReportSource::Receipts).await.unwrap().is_empty());
        assert!(load_purchases(&ctx, may_2023(), ReportSource::Expenses).await.unwrap().is_empty());

        let id = halves_storage::get_all_receipts(&ctx.db).await.unwrap()[0].id;
        expense_from_receipt(&ctx, id, "first", None).await.unwrap();
        let expenses = load_purchases(&ctx, may_2023(), ReportSource::Expenses).await.unwrap();
        assert_eq!(expenses.len(), 1);
        assert_eq!(expenses[0].date, NaiveDate::from_ymd_opt(2023, 5, 15).unwrap());

        report(&ctx, may_2023(), Grouping::Week, ReportSource::Receipts, false).await.unwrap();
        report(&ctx, may_2023(), Grouping::Month, ReportSource::Expenses, true).await.unwrap();
    }
}
