use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::store::repo::CursorStore;

/// Process-lifetime store; state is lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    cursor: Option<u64>,
    processed: HashMap<String, DateTime<Utc>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CursorStore for MemoryStore {
    fn cursor(&self) -> Result<Option<u64>> {
        Ok(self.cursor)
    }

    fn advance_cursor(&mut self, history_id: u64) -> Result<()> {
        self.cursor = Some(self.cursor.map_or(history_id, |c| c.max(history_id)));
        Ok(())
    }

    fn reset_cursor(&mut self, history_id: u64) -> Result<()> {
        self.cursor = Some(history_id);
        Ok(())
    }

    fn is_processed(&self, id: &str) -> Result<bool> {
        Ok(self.processed.contains_key(id))
    }

    fn mark_processed(&mut self, id: &str, at: DateTime<Utc>) -> Result<()> {
        self.processed.entry(id.to_string()).or_insert(at);
        Ok(())
    }

    fn compact(&mut self, cutoff: DateTime<Utc>) -> Result<usize> {
        let before = self.processed.len();
        self.processed.retain(|_, at| *at >= cutoff);
        Ok(before - self.processed.len())
    }

    fn processed_count(&self) -> Result<usize> {
        Ok(self.processed.len())
    }
}
