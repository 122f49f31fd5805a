//! Flat-file exports of a view: spreadsheet-friendly CSV and a readable
//! plain-text list.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use thiserror::Error;
use tracing::info;

use crate::record::DATE_FORMAT;
use crate::recurrence::format_month_day;
use crate::view::{View, ViewEntry};

pub const FILE_PREFIX: &str = "亲友纪念日导出";

const BYTE_ORDER_MARK: char = '\u{FEFF}';
const CSV_HEADERS: [&str; 5] = ["姓名/标题", "日期", "类型", "倒计时(天)", "备注"];
const TXT_TITLE: &str = "=== 亲友纪念日清单 ===";
const TXT_SEPARATOR: &str = "------------------------";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Txt,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Txt => "txt",
        }
    }

    pub fn render<'a>(self, entries: impl IntoIterator<Item = &'a ViewEntry>) -> String {
        match self {
            ExportFormat::Csv => render_csv(entries),
            ExportFormat::Txt => render_txt(entries),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown export format `{0}`; expected csv|txt")]
pub struct UnknownFormat(pub String);

impl FromStr for ExportFormat {
    type Err = UnknownFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "txt" | "text" => Ok(ExportFormat::Txt),
            other => Err(UnknownFormat(other.to_string())),
        }
    }
}

/// `亲友纪念日导出_<YYYY-MM-DD>.<ext>`
pub fn export_file_name(format: ExportFormat, date: NaiveDate) -> String {
    format!(
        "{}_{}.{}",
        FILE_PREFIX,
        date.format(DATE_FORMAT),
        format.extension()
    )
}

/// CSV with a leading byte-order mark. Every data cell is quoted; the
/// header row is not.
pub fn render_csv<'a>(entries: impl IntoIterator<Item = &'a ViewEntry>) -> String {
    let mut lines = vec![CSV_HEADERS.join(",")];
    for entry in entries {
        let record = &entry.record;
        let cells = [
            record.title.clone(),
            record.iso_date(),
            record.category.label().to_string(),
            entry.days_until.to_string(),
            record.notes().unwrap_or_default().to_string(),
        ];
        let row = cells
            .iter()
            .map(|cell| quote_cell(cell))
            .collect::<Vec<_>>()
            .join(",");
        lines.push(row);
    }

    let mut out = String::new();
    out.push(BYTE_ORDER_MARK);
    out.push_str(&lines.join("\n"));
    out
}

fn quote_cell(cell: &str) -> String {
    format!("\"{}\"", cell.replace('"', "\"\""))
}

pub fn render_txt<'a>(entries: impl IntoIterator<Item = &'a ViewEntry>) -> String {
    let mut out = format!("{TXT_TITLE}\n\n");
    for entry in entries {
        let record = &entry.record;
        out.push_str(&format!("【{}】 - {}\n", record.title, record.category.label()));
        out.push_str(&format!(
            "日期: {} (每年 {})\n",
            record.iso_date(),
            format_month_day(record.date)
        ));
        out.push_str(&format!("状态: 还有 {} 天\n", entry.days_until));
        if let Some(notes) = record.notes() {
            out.push_str(&format!("备注: {notes}\n"));
        }
        out.push_str(TXT_SEPARATOR);
        out.push('\n');
    }
    out
}

/// Renders `view` and writes it into `dir` under the dated file name.
pub fn write_export(
    dir: impl AsRef<Path>,
    format: ExportFormat,
    view: &View,
    today: NaiveDate,
) -> Result<PathBuf> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir).with_context(|| format!("unable to create {}", dir.display()))?;
    let path = dir.join(export_file_name(format, today));
    let contents = format.render(view.iter());
    fs::write(&path, contents).with_context(|| format!("unable to write {}", path.display()))?;
    info!(path = %path.display(), %format, count = view.len(), "export written");
    Ok(path)
}
