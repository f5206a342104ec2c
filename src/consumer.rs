//! Push-style consumer interfaces for reply data.
//!
//! The reply machinery parses server messages and pushes their content into
//! these traits, so callers control how metadata and row bytes are stored.
//! Row column values arrive as raw protocol bytes in windows: `col_begin`
//! opens a column and returns how many bytes the consumer wants next,
//! `col_data` feeds a chunk and returns the next window, and `col_end`
//! closes the column once all bytes were offered. Returning a zero window
//! skips the rest of the column.

use crate::protocol::backend::ColumnMetaMsg;

/// Receives column metadata at the start of each result set.
pub trait MetadataConsumer {
    /// One column description; `pos` counts from zero within the result set.
    fn col_meta(&mut self, pos: u32, meta: ColumnMetaMsg);

    /// All metadata for the result set has arrived. A count of zero means
    /// the statement produced no result set.
    fn col_count(&mut self, count: u32);
}

/// Receives row data during the row stage.
pub trait RowConsumer {
    /// A new row begins. Return `false` to decline the row: its column data
    /// is dropped and streaming continues with the next row.
    fn row_begin(&mut self, row: u64) -> bool;

    /// Column `col` is NULL.
    fn col_null(&mut self, col: u32);

    /// Column `col` begins with `total` bytes pending; returns the first
    /// read window.
    fn col_begin(&mut self, col: u32, total: usize) -> usize;

    /// A chunk of column bytes; returns the next read window.
    fn col_data(&mut self, col: u32, data: &[u8]) -> usize;

    /// Column `col` is complete; `total` is its full byte length.
    fn col_end(&mut self, col: u32, total: usize);

    /// The row is complete.
    fn row_end(&mut self, row: u64);

    /// The row stage ended. `end_of_data` is true when no further result set
    /// follows; `more_resultsets` when one does.
    fn done(&mut self, end_of_data: bool, more_resultsets: bool) {
        let _ = (end_of_data, more_resultsets);
    }
}

/// Receives statement completion events.
pub trait StmtConsumer {
    /// The server confirmed statement completion.
    fn execute_ok(&mut self);
}

/// Row consumer that buffers every column of every row.
#[derive(Debug, Default)]
pub struct CollectRows {
    pub rows: Vec<Vec<Option<Vec<u8>>>>,
    current: Vec<Option<Vec<u8>>>,
}

impl CollectRows {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RowConsumer for CollectRows {
    fn row_begin(&mut self, _row: u64) -> bool {
        self.current.clear();
        true
    }

    fn col_null(&mut self, _col: u32) {
        self.current.push(None);
    }

    fn col_begin(&mut self, _col: u32, total: usize) -> usize {
        self.current.push(Some(Vec::with_capacity(total)));
        total
    }

    fn col_data(&mut self, _col: u32, data: &[u8]) -> usize {
        if let Some(Some(buf)) = self.current.last_mut() {
            buf.extend_from_slice(data);
        }
        usize::MAX
    }

    fn col_end(&mut self, _col: u32, _total: usize) {}

    fn row_end(&mut self, _row: u64) {
        self.rows.push(std::mem::take(&mut self.current));
    }
}

/// Row consumer that drops everything; used when a reply is discarded.
#[derive(Debug, Default)]
pub struct SkipRows;

impl RowConsumer for SkipRows {
    fn row_begin(&mut self, _row: u64) -> bool {
        true
    }

    fn col_null(&mut self, _col: u32) {}

    fn col_begin(&mut self, _col: u32, _total: usize) -> usize {
        0
    }

    fn col_data(&mut self, _col: u32, _data: &[u8]) -> usize {
        0
    }

    fn col_end(&mut self, _col: u32, _total: usize) {}

    fn row_end(&mut self, _row: u64) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_rows_buffers_columns() {
        let mut sink = CollectRows::new();
        assert!(sink.row_begin(0));
        let window = sink.col_begin(0, 4);
        assert_eq!(window, 4);
        sink.col_data(0, b"ab");
        sink.col_data(0, b"cd");
        sink.col_end(0, 4);
        sink.col_null(1);
        sink.row_end(0);

        assert_eq!(sink.rows.len(), 1);
        assert_eq!(sink.rows[0][0].as_deref(), Some(b"abcd".as_slice()));
        assert!(sink.rows[0][1].is_none());
    }

    #[test]
    fn skip_rows_requests_empty_window() {
        let mut sink = SkipRows;
        assert_eq!(sink.col_begin(0, 100), 0);
    }
}
