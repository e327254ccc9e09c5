use anyhow::{Context as _, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use halves_core::{AppConfig, DateRange, Grouping, Month};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod commands;

use commands::{Context, ReportSource};

/// Scan grocery receipts and split the bill between two people.
#[derive(Parser, Debug)]
#[command(name = "halves")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (defaults to config.toml in the data directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// OCR a receipt image and store the result
    Process {
        image: PathBuf,
        /// Store key to use instead of detecting it
        #[arg(long)]
        store: Option<String>,
        /// Print the receipt as JSON
        #[arg(long)]
        json: bool,
    },
    /// Extract a receipt from OCR text that is already on disk
    Text {
        file: PathBuf,
        #[arg(long)]
        store: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Run classification and extraction again on a stored receipt
    Reprocess {
        id: Uuid,
        #[arg(long)]
        store: Option<String>,
    },
    /// Show one stored receipt
    Show {
        id: Uuid,
        #[arg(long)]
        json: bool,
    },
    /// List receipts flagged for review
    Pending,
    /// Mark an item as shared or personal
    Share {
        id: Uuid,
        /// Item number as printed by `show`
        item: usize,
        #[arg(value_parser = parse_yes_no, action = clap::ArgAction::Set)]
        shared: bool,
    },
    /// Confirm a receipt after review
    Verify { id: Uuid },
    /// Manage store aliases
    Alias {
        #[command(subcommand)]
        action: AliasCommand,
    },
    /// Manage expenses
    Expense {
        #[command(subcommand)]
        action: ExpenseCommand,
    },
    /// Print who owes whom for a month (YYYY-MM)
    Summary { month: Month },
    /// Spending by period, store and payment method
    Report {
        /// First day (defaults to January 1st of the end date's year)
        #[arg(long)]
        from: Option<NaiveDate>,
        /// Last day (defaults to today)
        #[arg(long)]
        to: Option<NaiveDate>,
        /// Bucket size: day, week, month or year
        #[arg(long, default_value_t = Grouping::Month)]
        by: Grouping,
        #[arg(long, value_enum, default_value_t = ReportSource::Receipts)]
        source: ReportSource,
        #[arg(long)]
        json: bool,
    },
    /// Write CSV reports or receipt JSON
    Export {
        #[command(subcommand)]
        action: ExportCommand,
    },
    /// Read exported receipt JSON back in
    Import {
        #[command(subcommand)]
        action: ImportCommand,
    },
    /// Compare a stored receipt against hand-checked ground truth
    Validate { id: Uuid, truth: PathBuf },
    /// Process every image dropped into a folder
    Watch { dir: PathBuf },
}

#[derive(Subcommand, Debug)]
enum AliasCommand {
    List,
    Add { store: String, alias: String },
}

#[derive(Subcommand, Debug)]
enum ExpenseCommand {
    /// Start an expense from a stored receipt
    FromReceipt {
        id: Uuid,
        /// `first`, `second` or a participant's name
        #[arg(long)]
        payer: String,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    List { month: Month },
    Delete { id: Uuid },
}

#[derive(Subcommand, Debug)]
enum ExportCommand {
    /// Monthly expense CSV
    Csv {
        month: Month,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// One row per month
    Summary {
        #[arg(required = true)]
        months: Vec<Month>,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Receipt JSON. The receipt cannot be edited afterwards.
    Receipt {
        id: Uuid,
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum ImportCommand {
    Receipt { file: PathBuf },
}

fn parse_yes_no(s: &str) -> Result<bool, String> {
    match s.to_lowercase().as_str() {
        "yes" | "y" | "true" | "shared" => Ok(true),
        "no" | "n" | "false" | "personal" => Ok(false),
        other => Err(format!("expected yes or no, got '{other}'")),
    }
}

fn report_range(from: Option<NaiveDate>, to: Option<NaiveDate>, today: NaiveDate) -> DateRange {
    let end = to.unwrap_or(today);
    let start = from.unwrap_or(DateRange::year_to_date(end).start);
    DateRange::new(start, end)
}

fn init_tracing(config: &AppConfig) {
    let default = match config.log_level.as_deref() {
        Some(level) => format!("halves={level}"),
        None => "halves=info".to_string(),
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let dirs = directories::ProjectDirs::from("com", "halves", "Halves")
        .context("Could not determine the application data directory")?;
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| dirs.data_dir().join("config.toml"));
    let config = AppConfig::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    init_tracing(&config);

    let data_dir = config
        .storage
        .data_dir
        .clone()
        .unwrap_or_else(|| dirs.data_dir().to_path_buf());
    let ctx = Context::open(config, data_dir).await?;

    match cli.command {
        Command::Process { image, store, json } => commands::process(&ctx, &image, store.as_deref(), json).await,
        Command::Text { file, store, json } => commands::text(&ctx, &file, store.as_deref(), json).await,
        Command::Reprocess { id, store } => commands::reprocess(&ctx, id, store.as_deref()).await,
        Command::Show { id, json } => commands::show(&ctx, id, json).await,
        Command::Pending => commands::pending(&ctx).await,
        Command::Share { id, item, shared } => commands::share(&ctx, id, item, shared).await,
        Command::Verify { id } => commands::verify(&ctx, id).await,
        Command::Alias { action } => match action {
            AliasCommand::List => commands::alias_list(&ctx).await,
            AliasCommand::Add { store, alias } => commands::alias_add(&ctx, &store, &alias).await,
        },
        Command::Expense { action } => match action {
            ExpenseCommand::FromReceipt { id, payer, date } => {
                commands::expense_from_receipt(&ctx, id, &payer, date).await
            }
            ExpenseCommand::List { month } => commands::expense_list(&ctx, month).await,
            ExpenseCommand::Delete { id } => commands::expense_delete(&ctx, id).await,
        },
        Command::Summary { month } => commands::summary(&ctx, month).await,
        Command::Report { from, to, by, source, json } => {
            let range = report_range(from, to, chrono::Local::now().date_naive());
            commands::report(&ctx, range, by, source, json).await
        }
        Command::Export { action } => match action {
            ExportCommand::Csv { month, out } => commands::export_csv(&ctx, month, out).await,
            ExportCommand::Summary { months, out } => commands::export_summary(&ctx, &months, out).await,
            ExportCommand::Receipt { id, out } => commands::export_receipt(&ctx, id, out).await,
        },
        Command::Import { action } => match action {
            ImportCommand::Receipt { file } => commands::import_receipt(&ctx, &file).await,
        },
        Command::Validate { id, truth } => commands::validate(&ctx, id, &truth).await,
        Command::Watch { dir } => commands::watch(&ctx, &dir).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_share_and_expense() {
        let cli = Cli::try_parse_from([
            "halves",
            "share",
            "67e55044-10b1-426f-9247-bb680e5fe0c8",
            "2",
            "no",
        ])
        .unwrap();
        assert!(matches!(cli.command, Command::Share { item: 2, shared: false, .. }));

        let cli = Cli::try_parse_from([
            "halves",
            "expense",
            "from-receipt",
            "67e55044-10b1-426f-9247-bb680e5fe0c8",
            "--payer",
            "second",
            "--date",
            "2024-03-02",
        ])
        .unwrap();
        match cli.command {
            Command::Expense { action: ExpenseCommand::FromReceipt { payer, date, .. } } => {
                assert_eq!(payer, "second");
                assert_eq!(date, NaiveDate::from_ymd_opt(2024, 3, 2));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn share_takes_yes_or_no() {
        let id = "67e55044-10b1-426f-9247-bb680e5fe0c8";
        for (word, expected) in [("yes", true), ("no", false), ("Y", true), ("personal", false)] {
            let cli = Cli::try_parse_from(["halves", "share", id, "0", word]).unwrap();
            match cli.command {
                Command::Share { item, shared, .. } => {
                    assert_eq!(item, 0);
                    assert_eq!(shared, expected, "{word}");
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        assert!(Cli::try_parse_from(["halves", "share", id, "0"]).is_err());
        assert!(Cli::try_parse_from(["halves", "share", id, "0", "maybe"]).is_err());
    }

    #[test]
    fn parses_report_options() {
        let cli = Cli::try_parse_from(["halves", "report", "--from", "2024-01-01", "--by", "week", "--source", "expenses"])
            .unwrap();
        match cli.command {
            Command::Report { from, to, by, source, json } => {
                assert_eq!(from, NaiveDate::from_ymd_opt(2024, 1, 1));
                assert_eq!(to, None);
                assert_eq!(by, Grouping::Week);
                assert_eq!(source, ReportSource::Expenses);
                assert!(!json);
            }
            other => panic!("unexpected {other:?}"),
        }

        let cli = Cli::try_parse_from(["halves", "report"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Report { by: Grouping::Month, source: ReportSource::Receipts, .. }
        ));
        assert!(Cli::try_parse_from(["halves", "report", "--by", "decade"]).is_err());
    }

    #[test]
    fn report_range_defaults_to_year_to_date() {
        let d = |m, day| NaiveDate::from_ymd_opt(2024, m, day).unwrap();
        assert_eq!(report_range(None, None, d(8, 9)), DateRange::new(d(1, 1), d(8, 9)));
        assert_eq!(report_range(Some(d(3, 1)), Some(d(3, 31)), d(8, 9)), DateRange::new(d(3, 1), d(3, 31)));
        assert_eq!(report_range(None, Some(d(2, 10)), d(8, 9)), DateRange::new(d(1, 1), d(2, 10)));
    }

    #[test]
    fn rejects_bad_month() {
        assert!(Cli::try_parse_from(["halves", "summary", "2024-13"]).is_err());
        assert!(parse_yes_no("maybe").is_err());
    }
}
