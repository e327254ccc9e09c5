use chrono::NaiveDateTime;
use halves_core::{BalanceSheet, Money, Month, Participant, Participants};
use std::io::Write;
use tracing::info;

use crate::ExportError;

const MONTHLY_HEADER: [&str; 7] = ["Date", "Store", "Item", "Amount", "Payer", "Shared", "Receipt ID"];
const SUMMARY_HEADER: [&str; 4] = ["Month", "Total Expenses", "Balance", "Statement"];

fn amount(m: Money) -> String {
    format!("{:.2}", m.as_decimal())
}

fn yes_no(b: bool) -> &'static str {
    if b {
        "Yes"
    } else {
        "No"
    }
}

/// Each block gets its own writer so a bare empty line can go between them;
/// an empty csv record would be written as `""`.
fn block_writer<W: Write>(writer: W) -> csv::Writer<W> {
    csv::WriterBuilder::new().flexible(true).from_writer(writer)
}

/// One row per expense item, a blank line, then the month's summary. An
/// expense without items is written as a single unshared row for its total.
pub fn expenses_to_csv<W: Write>(
    sheet: &BalanceSheet,
    names: &Participants,
    mut writer: W,
) -> Result<(), ExportError> {
    let mut wtr = block_writer(&mut writer);
    wtr.write_record(MONTHLY_HEADER)?;

    let mut rows = 0usize;
    for expense in &sheet.expenses {
        let date = expense.date.format("%Y-%m-%d").to_string();
        let payer = names.name(expense.payer);
        let receipt_id = expense.receipt_id.map(|id| id.to_string()).unwrap_or_default();

        if expense.items.is_empty() {
            wtr.write_record([
                date.as_str(),
                expense.store.as_str(),
                "",
                amount(expense.total).as_str(),
                payer,
                yes_no(false),
                receipt_id.as_str(),
            ])?;
            rows += 1;
            continue;
        }
        for item in &expense.items {
            wtr.write_record([
                date.as_str(),
                expense.store.as_str(),
                item.name.as_str(),
                amount(item.amount).as_str(),
                payer,
                yes_no(item.shared),
                receipt_id.as_str(),
            ])?;
            rows += 1;
        }
    }

    wtr.flush()?;
    drop(wtr);
    writer.write_all(b"\n")?;

    let summary = sheet.summary(names);
    let mut wtr = block_writer(&mut writer);
    wtr.write_record(["Summary"])?;
    wtr.write_record(["Total Expenses", amount(summary.total_expenses).as_str()])?;
    wtr.write_record(["Total Shared", amount(summary.total_shared).as_str()])?;
    wtr.write_record([format!("{} Paid", names.first), amount(summary.first_paid)])?;
    wtr.write_record([format!("{} Paid", names.second), amount(summary.second_paid)])?;
    wtr.write_record(["Balance", amount(summary.balance).as_str()])?;
    wtr.write_record(["Balance Statement", summary.owed_statement.as_str()])?;
    wtr.flush()?;

    info!("exported {rows} rows for {}", sheet.month);
    Ok(())
}

/// One row per month, then the overall total and net balance across all of
/// them (positive: the second participant owes the first).
pub fn summary_to_csv<W: Write>(
    sheets: &[BalanceSheet],
    names: &Participants,
    mut writer: W,
) -> Result<(), ExportError> {
    let mut wtr = block_writer(&mut writer);
    wtr.write_record(SUMMARY_HEADER)?;

    let mut total = Money::zero();
    let mut net = Money::zero();
    for sheet in sheets {
        let summary = sheet.summary(names);
        wtr.write_record([
            summary.month.to_string(),
            amount(summary.total_expenses),
            amount(summary.balance),
            summary.owed_statement.clone(),
        ])?;
        total += summary.total_expenses;
        net += summary.balance;
    }

    wtr.flush()?;
    drop(wtr);
    writer.write_all(b"\n")?;

    let mut wtr = block_writer(&mut writer);
    wtr.write_record(["Overall Summary"])?;
    wtr.write_record(["Total Expenses", amount(total).as_str()])?;
    wtr.write_record(["Net Balance", amount(net).as_str()])?;
    let statement = if net.is_positive() {
        format!("{} owes {} {}", names.name(Participant::Second), names.name(Participant::First), net)
    } else if net.is_zero() {
        "All settled! No one owes anything.".to_string()
    } else {
        format!("{} owes {} {}", names.name(Participant::First), names.name(Participant::Second), net.abs())
    };
    wtr.write_record(["Balance Statement", statement.as_str()])?;
    wtr.flush()?;
    Ok(())
}

pub fn monthly_filename(month: Month, now: NaiveDateTime) -> String {
    format!("expenses_{month}_{}.csv", now.format("%Y%m%d_%H%M%S"))
}

pub fn summary_filename(now: NaiveDateTime) -> String {
    format!("expenses_summary_{}.csv", now.format("%Y%m%d_%H%M%S"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use halves_core::{Expense, ExpenseItem};

    fn m(cents: i64) -> Money {
        Money::from_cents(cents)
    }

    fn march() -> BalanceSheet {
        let d = |day| NaiveDate::from_ymd_opt(2024, 3, day).unwrap();
        let mut costco = Expense::new(Participant::First, d(2), "Costco", m(3000));
        costco.items = vec![ExpenseItem::new("WATER", m(1000)), ExpenseItem::new("RAZORS", m(2000))];
        costco.items[1].shared = false;
        let deli = Expense::new(Participant::Second, d(9), "Deli, Inc", m(1250));
        BalanceSheet::new(Month::new(2024, 3).unwrap(), vec![costco, deli])
    }

    fn names() -> Participants {
        Participants { first: "Ana".into(), second: "Ben".into() }
    }

    #[test]
    fn monthly_rows_and_summary() {
        let mut out = Vec::new();
        expenses_to_csv(&march(), &names(), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let expected = "\
Date,Store,Item,Amount,Payer,Shared,Receipt ID
2024-03-02,Costco,WATER,10.00,Ana,Yes,
2024-03-02,Costco,RAZORS,20.00,Ana,No,
2024-03-09,\"Deli, Inc\",,12.50,Ben,No,

Summary
Total Expenses,42.50
Total Shared,10.00
Ana Paid,30.00
Ben Paid,12.50
Balance,5.00
Balance Statement,Ben owes Ana $5.00
";
        assert_eq!(text, expected);
    }

    #[test]
    fn summary_across_months() {
        let april = BalanceSheet::new(Month::new(2024, 4).unwrap(), Vec::new());
        let mut out = Vec::new();
        summary_to_csv(&[march(), april], &names(), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Month,Total Expenses,Balance,Statement");
        assert_eq!(lines[1], "2024-03,42.50,5.00,Ben owes Ana $5.00");
        assert_eq!(lines[2], "2024-04,0.00,0.00,All settled! No one owes anything.");
        assert_eq!(lines[3], "");
        assert_eq!(&lines[5..], ["Total Expenses,42.50", "Net Balance,5.00", "Balance Statement,Ben owes Ana $5.00"]);
    }

    #[test]
    fn filenames() {
        let now = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap().and_hms_opt(9, 5, 0).unwrap();
        assert_eq!(monthly_filename(Month::new(2024, 3).unwrap(), now), "expenses_2024-03_20240331_090500.csv");
        assert_eq!(summary_filename(now), "expenses_summary_20240331_090500.csv");
    }
}
