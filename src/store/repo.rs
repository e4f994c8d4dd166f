use anyhow::Result;
use chrono::{DateTime, Utc};

/// Change cursor plus the ids already dispatched.
///
/// The cursor only moves forward; `advance_cursor` with a smaller value is a
/// no-op. Processed ids are kept until `compact` drops those recorded before
/// the cutoff.
pub trait CursorStore: Send {
    fn cursor(&self) -> Result<Option<u64>>;
    fn advance_cursor(&mut self, history_id: u64) -> Result<()>;
    /// Unconditionally replace the cursor (expired-cursor recovery only).
    fn reset_cursor(&mut self, history_id: u64) -> Result<()>;

    fn is_processed(&self, id: &str) -> Result<bool>;
    fn mark_processed(&mut self, id: &str, at: DateTime<Utc>) -> Result<()>;

    /// Drop processed ids recorded before `cutoff`; returns how many went.
    fn compact(&mut self, cutoff: DateTime<Utc>) -> Result<usize>;
    fn processed_count(&self) -> Result<usize>;
}
