//! Text renderings of a [`ResultSet`]

use std::io::{self, Write};

use super::ResultSet;
use crate::command::Displayer;

const BANNER: &str = "******************************";

/// Write `results` using the given displayer
///
/// [`Displayer::Pipe`] never reaches the console; it is shown as a column
/// table if it does.
pub fn display(
    results: &ResultSet,
    displayer: Displayer,
    separator: &str,
    out: &mut dyn Write,
) -> io::Result<()> {
    match displayer {
        Displayer::Column | Displayer::Pipe => display_by_column(results, separator, out),
        Displayer::Line => display_by_line(results, out),
        Displayer::Batch => display_by_batch(results, separator, out),
    }
}

pub fn display_by_column(
    results: &ResultSet,
    separator: &str,
    out: &mut dyn Write,
) -> io::Result<()> {
    let Some(rows) = results.rows() else {
        return write_summary(results, "", out);
    };
    let fields = results.fields();

    let total: usize = fields.iter().map(|f| f.display_width).sum();
    let rule = "-".repeat(total + fields.len());

    let names: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();
    writeln!(out, "{}", format_row(results, &names, separator))?;
    writeln!(out, "{}", rule)?;

    for row in rows {
        let cells: Vec<&str> = row.iter().map(String::as_str).collect();
        writeln!(out, "{}", format_row(results, &cells, separator))?;
    }

    write_summary(results, &rule, out)
}

fn format_row(results: &ResultSet, cells: &[&str], separator: &str) -> String {
    results
        .fields()
        .iter()
        .zip(cells)
        .map(|(field, cell)| format!("{:<width$}", cell, width = field.display_width))
        .collect::<Vec<_>>()
        .join(separator)
}

pub fn display_by_line(results: &ResultSet, out: &mut dyn Write) -> io::Result<()> {
    if let Some(rows) = results.rows() {
        let fields = results.fields();
        let name_width = fields
            .iter()
            .map(|f| f.name.chars().count())
            .max()
            .unwrap_or(0)
            + 1;

        for (i, row) in rows.iter().enumerate() {
            writeln!(out, "{} {}. row {}", BANNER, i + 1, BANNER)?;
            for (field, value) in fields.iter().zip(row) {
                let label = format!("{}:", field.name);
                writeln!(out, "{:>width$} {}", label, value, width = name_width)?;
            }
        }
    }

    write_summary(results, "", out)
}

/// Values only, for other programs to read
pub fn display_by_batch(
    results: &ResultSet,
    separator: &str,
    out: &mut dyn Write,
) -> io::Result<()> {
    for row in results.rows().unwrap_or_default() {
        writeln!(out, "{}", row.join(separator))?;
    }
    Ok(())
}

/// Print `header` on its own line, then the row count or affected count
pub fn write_summary(results: &ResultSet, header: &str, out: &mut dyn Write) -> io::Result<()> {
    writeln!(out, "{}", header)?;
    let elapsed = results.elapsed().as_secs_f64();

    if results.has_rows() {
        if results.database_changed().is_some() {
            writeln!(out, "Database changed")?;
        }
        let n = results.num_rows();
        writeln!(out, "{} {} in set ({:.2} sec)", n, plural(n as u64), elapsed)
    } else if results.database_changed().is_some() {
        writeln!(out, "Database changed")
    } else {
        let n = results.affected_rows();
        writeln!(out, "Query OK, {} {} affected ({:.2} sec)", n, plural(n), elapsed)
    }
}

fn plural(n: u64) -> &'static str {
    if n == 1 {
        "row"
    } else {
        "rows"
    }
}
