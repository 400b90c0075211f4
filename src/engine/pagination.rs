//! Cursor pagination over a snapshot.
//!
//! A cursor is an offset into one snapshot generation. Walking pages across a
//! snapshot replacement can repeat or skip records; callers that need a
//! consistent walk should compare `generation` between pages.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::types::{AssetRecord, Snapshot};

pub const DEFAULT_LIMIT: usize = 25;
pub const MIN_LIMIT: usize = 1;
pub const MAX_LIMIT: usize = 100;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PaginationError {
    #[error("invalid cursor: {0:?}")]
    InvalidCursor(String),
}

/// Offset into a snapshot, rendered as a decimal string on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Cursor(pub usize);

impl Cursor {
    /// Absent or empty input means "from the start".
    pub fn parse(raw: Option<&str>) -> Result<Self, PaginationError> {
        match raw.map(str::trim) {
            None | Some("") => Ok(Cursor(0)),
            Some(s) => s
                .parse::<usize>()
                .map(Cursor)
                .map_err(|_| PaginationError::InvalidCursor(s.to_string())),
        }
    }
}

impl std::fmt::Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Clamp a requested page size into `[MIN_LIMIT, MAX_LIMIT]`.
pub fn clamp_limit(requested: Option<i64>) -> usize {
    match requested {
        None => DEFAULT_LIMIT,
        Some(n) if n < MIN_LIMIT as i64 => MIN_LIMIT,
        Some(n) if n > MAX_LIMIT as i64 => MAX_LIMIT,
        Some(n) => n as usize,
    }
}

/// One page of a snapshot.
#[derive(Debug, PartialEq)]
pub struct Page<'a> {
    pub records: &'a [AssetRecord],
    pub next_cursor: Option<Cursor>,
    pub total: usize,
}

/// Slice `[cursor, cursor + limit)` out of the snapshot. `limit` is clamped.
pub fn paginate(snapshot: &Snapshot, cursor: Cursor, limit: usize) -> Page<'_> {
    let limit = limit.clamp(MIN_LIMIT, MAX_LIMIT);
    let total = snapshot.records.len();
    let start = cursor.0.min(total);
    let end = start.saturating_add(limit).min(total);
    let next_cursor = if end < total { Some(Cursor(end)) } else { None };

    Page { records: &snapshot.records[start..end], next_cursor, total }
}

/// JSON shape served by the query endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResponse {
    pub tokens: Vec<AssetRecord>,
    pub next_cursor: Option<String>,
    pub total: usize,
}

impl From<Page<'_>> for PageResponse {
    fn from(page: Page<'_>) -> Self {
        Self {
            tokens: page.records.to_vec(),
            next_cursor: page.next_cursor.map(|c| c.to_string()),
            total: page.total,
        }
    }
}
