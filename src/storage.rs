//! Append-only growth-point history, one JSON object per line.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelRecord {
    pub date: NaiveDate,
    /// Points gained on `date`.
    pub gained: i64,
    /// Running total shown by the app after `date`'s tasks.
    pub total: u64,
}

pub struct LevelLog {
    path: PathBuf,
}

impl LevelLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, record: &LevelRecord) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }

        let line = serde_json::to_string(record)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(format!("{line}\n").as_bytes()).await?;
        file.flush().await?;

        debug!(path = %self.path.display(), date = %record.date, "Appended level record");
        Ok(())
    }

    /// All records in file order. A missing file is an empty history.
    pub async fn load(&self) -> Result<Vec<LevelRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.path).await?;
        let records = content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<LevelRecord>(line) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(line = %line, error = %e, "Skipping invalid level record");
                    None
                }
            })
            .collect();
        Ok(records)
    }
}

/// Current total from a progress label such as `"成长值 1234/2000"`.
pub fn parse_total(text: &str) -> Option<u64> {
    let (before, _) = text.split_once('/')?;
    let digits: String = before
        .chars()
        .rev()
        .take_while(char::is_ascii_digit)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    digits.parse().ok()
}

/// Points of one history row, e.g. `"+5"`.
pub fn parse_points(text: &str) -> Option<i64> {
    let trimmed = text.trim();
    trimmed.strip_prefix('+').unwrap_or(trimmed).trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(day: u32, gained: i64, total: u64) -> LevelRecord {
        LevelRecord {
            date: NaiveDate::from_ymd_opt(2026, 10, day).unwrap(),
            gained,
            total,
        }
    }

    #[tokio::test]
    async fn append_then_load_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = LevelLog::new(dir.path().join("nested/level.jsonl"));

        log.append(&record(18, 12, 1200)).await.unwrap();
        log.append(&record(19, 7, 1207)).await.unwrap();

        let loaded = log.load().await.unwrap();
        assert_eq!(loaded, vec![record(18, 12, 1200), record(19, 7, 1207)]);
    }

    #[tokio::test]
    async fn missing_file_is_empty_history() {
        let dir = tempfile::tempdir().unwrap();
        let log = LevelLog::new(dir.path().join("absent.jsonl"));
        assert!(log.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("level.jsonl");
        std::fs::write(
            &path,
            "{\"date\":\"2026-10-18\",\"gained\":3,\"total\":90}\nnot json\n\n",
        )
        .unwrap();

        let loaded = LevelLog::new(&path).load().await.unwrap();
        assert_eq!(loaded, vec![record(18, 3, 90)]);
    }

    #[test]
    fn record_line_format() {
        let line = serde_json::to_string(&record(19, 5, 1207)).unwrap();
        assert_eq!(line, r#"{"date":"2026-10-19","gained":5,"total":1207}"#);
    }

    #[test]
    fn total_is_number_before_slash() {
        assert_eq!(parse_total("成长值 1234/2000"), Some(1234));
        assert_eq!(parse_total("88/100"), Some(88));
        assert_eq!(parse_total("成长值 /2000"), None);
        assert_eq!(parse_total("1234"), None);
    }

    #[test]
    fn points_accept_leading_plus() {
        assert_eq!(parse_points("+5"), Some(5));
        assert_eq!(parse_points(" 12 "), Some(12));
        assert_eq!(parse_points("-3"), Some(-3));
        assert_eq!(parse_points("签到"), None);
    }
}
