//! Outbound sync of approved/rejected leave to a spreadsheet.
//!
//! The sync runs after the database transaction has committed; a failure
//! here never undoes the decision, it only shows up as a response warning.

use anyhow::Result;
use futures::future::BoxFuture;
use tracing::{debug, warn};

pub trait SheetSync: Send + Sync {
    /// Appends one row to `tab` of sheet `sheet_id`.
    fn append_row<'a>(
        &'a self,
        sheet_id: &'a str,
        tab: &'a str,
        row: Vec<String>,
    ) -> BoxFuture<'a, Result<()>>;

    /// Every row currently in `tab` of sheet `sheet_id`.
    fn list_rows<'a>(&'a self, sheet_id: &'a str, tab: &'a str) -> BoxFuture<'a, Result<Vec<Vec<String>>>>;
}

/// Stands in when no spreadsheet client is built in. Logs every row.
pub struct DisabledSheetSync;

impl SheetSync for DisabledSheetSync {
    fn append_row<'a>(
        &'a self,
        sheet_id: &'a str,
        tab: &'a str,
        row: Vec<String>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            debug!(sheet_id, tab, ?row, "Sheet sync disabled, row not sent");
            Ok(())
        })
    }

    fn list_rows<'a>(&'a self, _sheet_id: &'a str, _tab: &'a str) -> BoxFuture<'a, Result<Vec<Vec<String>>>> {
        Box::pin(async { Ok(Vec::new()) })
    }
}

/// Appends `row` unless the tab already holds a row with the same first
/// cell (the record id). Returns whether a row was written.
pub async fn append_once(sheets: &dyn SheetSync, sheet_id: &str, tab: &str, row: Vec<String>) -> Result<bool> {
    let key = row.first().cloned().unwrap_or_default();
    let existing = sheets.list_rows(sheet_id, tab).await?;
    if !key.is_empty() && existing.iter().any(|r| r.first() == Some(&key)) {
        debug!(sheet_id, tab, key = %key, "Row already in sheet");
        return Ok(false);
    }
    sheets.append_row(sheet_id, tab, row).await?;
    Ok(true)
}

/// Runs the sync and turns a failure into a user-facing warning. Nothing is
/// sent when no sheet is configured.
pub async fn sync_or_warn(
    sheets: &dyn SheetSync,
    sheet_id: Option<&str>,
    tab: &str,
    row: Vec<String>,
) -> Option<String> {
    let Some(sheet_id) = sheet_id else {
        debug!(tab, "No sheet configured, skipping sync");
        return None;
    };
    match append_once(sheets, sheet_id, tab, row).await {
        Ok(_) => None,
        Err(e) => {
            warn!(error = %e, sheet_id, tab, "Spreadsheet sync failed");
            Some(format!("Saved, but spreadsheet sync failed: {e}"))
        }
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::Mutex;

    /// In-memory sheet keyed by (sheet id, tab); fails every call when
    /// `fail` is set.
    #[derive(Default)]
    pub struct RecordingSheetSync {
        pub fail: bool,
        pub rows: Mutex<Vec<(String, String, Vec<String>)>>,
    }

    impl RecordingSheetSync {
        pub fn written(&self) -> usize {
            self.rows.lock().map(|r| r.len()).unwrap_or(0)
        }
    }

    impl SheetSync for RecordingSheetSync {
        fn append_row<'a>(
            &'a self,
            sheet_id: &'a str,
            tab: &'a str,
            row: Vec<String>,
        ) -> BoxFuture<'a, Result<()>> {
            Box::pin(async move {
                if self.fail {
                    anyhow::bail!("sheet quota exceeded");
                }
                self.rows
                    .lock()
                    .map_err(|_| anyhow::anyhow!("poisoned"))?
                    .push((sheet_id.to_string(), tab.to_string(), row));
                Ok(())
            })
        }

        fn list_rows<'a>(&'a self, sheet_id: &'a str, tab: &'a str) -> BoxFuture<'a, Result<Vec<Vec<String>>>> {
            Box::pin(async move {
                if self.fail {
                    anyhow::bail!("sheet quota exceeded");
                }
                let rows = self.rows.lock().map_err(|_| anyhow::anyhow!("poisoned"))?;
                Ok(rows
                    .iter()
                    .filter(|(s, t, _)| s == sheet_id && t == tab)
                    .map(|(_, _, row)| row.clone())
                    .collect())
            })
        }
    }
}
