//! Markdown rendering.

use std::fmt::Write;

use super::{Align, Block, Report, Table};

/// Renders the report as a markdown document.
pub fn render(report: &Report) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "# PostgreSQL Performance Report — {} UTC",
        report.collected_at.format("%Y-%m-%d %H:%M:%S")
    );

    for (i, section) in report.sections.iter().enumerate() {
        let _ = writeln!(out, "\n## {}. {}", i + 1, section.heading());
        for block in &section.blocks {
            out.push('\n');
            match block {
                Block::Heading(text) => {
                    let _ = writeln!(out, "### {}", text);
                }
                Block::Prose(text) => {
                    let _ = writeln!(out, "{}", text);
                }
                Block::Missing(kind) => {
                    let _ = writeln!(out, "_no data collected for {}_", kind);
                }
                Block::Table(table) => render_table(&mut out, table),
            }
        }
    }
    out
}

fn render_table(out: &mut String, table: &Table) {
    let headers: Vec<String> = table.headers.iter().map(|(h, _)| cell(h)).collect();
    let rows: Vec<Vec<String>> = table
        .rows
        .iter()
        .map(|row| row.iter().map(|c| cell(c)).collect())
        .collect();

    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count().max(3)).collect();
    for row in &rows {
        for (w, c) in widths.iter_mut().zip(row) {
            *w = (*w).max(c.chars().count());
        }
    }

    let aligns: Vec<Align> = table.headers.iter().map(|(_, a)| *a).collect();
    write_row(out, &headers, &widths, &aligns);
    out.push('|');
    for (w, align) in widths.iter().zip(&aligns) {
        match align {
            Align::Left => {
                let _ = write!(out, " {} |", "-".repeat(*w));
            }
            Align::Right => {
                let _ = write!(out, " {}: |", "-".repeat(w - 1));
            }
        }
    }
    out.push('\n');
    for row in &rows {
        write_row(out, row, &widths, &aligns);
    }
}

fn write_row(out: &mut String, cells: &[String], widths: &[usize], aligns: &[Align]) {
    out.push('|');
    for ((c, w), align) in cells.iter().zip(widths).zip(aligns) {
        let _ = match align {
            Align::Left => write!(out, " {:<w$} |", c, w = w),
            Align::Right => write!(out, " {:>w$} |", c, w = w),
        };
    }
    out.push('\n');
}

/// Makes text safe for a single table cell.
fn cell(text: &str) -> String {
    text.replace('|', "\\|").replace(['\n', '\r'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{Section, SectionKind};
    use chrono::{TimeZone, Utc};

    fn report(blocks: Vec<Block>) -> Report {
        Report {
            collected_at: Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap(),
            sections: vec![
                Section {
                    kind: SectionKind::Overview,
                    blocks,
                },
                Section {
                    kind: SectionKind::TopQueries,
                    blocks: vec![Block::Missing("top_statements".into())],
                },
            ],
        }
    }

    #[test]
    fn title_and_numbered_sections() {
        let text = render(&report(vec![Block::Prose("hello".into())]));
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "# PostgreSQL Performance Report — 2025-06-01 08:00:00 UTC"
        );
        assert!(text.contains("\n## 1. Overview\n\nhello\n"));
        assert!(text.contains("\n## 2. Top Queries\n\n_no data collected for top_statements_\n"));
    }

    #[test]
    fn tables_are_padded_and_aligned() {
        let mut table = Table::new(&[("State", Align::Left), ("Connections", Align::Right)]);
        table.push(vec!["idle in transaction".into(), "1".into()]);
        table.push(vec!["a|b".into(), "12".into()]);
        let text = render(&report(vec![Block::Table(table)]));

        assert!(text.contains(
            "| State               | Connections |\n\
             | ------------------- | ----------: |\n\
             | idle in transaction |           1 |\n\
             | a\\|b                |          12 |\n"
        ));
    }
}
