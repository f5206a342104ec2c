//! Reply state machine.
//!
//! A statement reply arrives as a fixed progression of stages:
//!
//! ```text
//! Metadata -> Rows -> Close -> Done
//!     ^_______|  (FetchDoneMoreResultsets starts the next result set)
//! ```
//!
//! The machine is fed one server message at a time and never touches the
//! transport. A stage ends either by consuming its terminator (`FetchDone`,
//! `StmtExecuteOk`) or by seeing the first message of the next stage; in the
//! latter case the message is left unconsumed ([`StepOutcome::Hold`]) and the
//! caller re-feeds it after resuming. Between a stage boundary and the
//! matching `resume_*` call the machine rejects further input, which lets the
//! caller decide per stage whether to process or discard what follows.

use crate::consumer::{MetadataConsumer, RowConsumer, StmtConsumer};
use crate::error::{Error, Result, ServerError};
use crate::protocol::backend::{parse_column_meta, parse_error, parse_row};
use crate::protocol::frame::server_msg;

/// Reply stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Receiving `ColumnMetaData` messages.
    Metadata,
    /// Receiving `Row` messages.
    Rows,
    /// Waiting for `StmtExecuteOk`.
    Close,
    /// Reply fully processed.
    Done,
}

/// What happened to the message fed to [`ReplyFsm::on_message`].
#[derive(Debug)]
pub enum StepOutcome {
    /// Message consumed; more of the same stage expected.
    Continue,
    /// Message consumed and it ended the current stage.
    StageDone,
    /// Message belongs to the next stage and was NOT consumed; re-feed it
    /// after resuming.
    Hold,
    /// Server reported an error; the reply is finished.
    ServerError(ServerError),
}

/// Consumer for the stage currently being fed.
pub enum StageConsumer<'a> {
    Metadata(&'a mut dyn MetadataConsumer),
    Rows(&'a mut dyn RowConsumer),
    Stmt(&'a mut dyn StmtConsumer),
}

/// State machine for one statement reply.
#[derive(Debug)]
pub struct ReplyFsm {
    stage: Stage,
    /// Stage boundary reached; input rejected until the matching resume.
    completed: bool,
    failed: bool,
    col_count: u32,
    row_count: u64,
    more_results: bool,
}

impl ReplyFsm {
    pub fn new() -> Self {
        Self {
            stage: Stage::Metadata,
            completed: false,
            failed: false,
            col_count: 0,
            row_count: 0,
            more_results: false,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// The current stage has ended and a `resume_*` call is pending.
    pub fn at_stage_boundary(&self) -> bool {
        self.completed
    }

    pub fn is_done(&self) -> bool {
        self.stage == Stage::Done
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Columns seen in the current result set's metadata.
    pub fn col_count(&self) -> u32 {
        self.col_count
    }

    /// Another result set follows the one just finished.
    pub fn more_results(&self) -> bool {
        self.more_results
    }

    /// Enter the row stage after metadata completed.
    pub fn resume_rows(&mut self) -> Result<()> {
        self.resume(Stage::Rows)?;
        self.row_count = 0;
        Ok(())
    }

    /// Enter the metadata stage of the next result set.
    pub fn resume_metadata(&mut self) -> Result<()> {
        self.resume(Stage::Metadata)?;
        self.col_count = 0;
        self.more_results = false;
        Ok(())
    }

    /// Enter the close stage.
    pub fn resume_close(&mut self) -> Result<()> {
        self.resume(Stage::Close)
    }

    fn resume(&mut self, expected: Stage) -> Result<()> {
        if !self.completed || self.stage != expected {
            return Err(Error::InvalidUsage(format!(
                "resume into {:?} stage out of order (at {:?}, boundary: {})",
                expected, self.stage, self.completed
            )));
        }
        self.completed = false;
        Ok(())
    }

    /// Feed one server message. The consumer variant must match the current
    /// stage.
    pub fn on_message(
        &mut self,
        msg_type: u8,
        payload: &[u8],
        consumer: StageConsumer<'_>,
    ) -> Result<StepOutcome> {
        if self.stage == Stage::Done {
            return Err(Error::InvalidUsage("reply already processed".into()));
        }
        if self.completed {
            return Err(Error::InvalidUsage(
                "message fed across a stage boundary".into(),
            ));
        }
        if msg_type == server_msg::ERROR {
            let err = parse_error(payload)?;
            self.stage = Stage::Done;
            self.failed = true;
            return Ok(StepOutcome::ServerError(err));
        }

        match (self.stage, consumer) {
            (Stage::Metadata, StageConsumer::Metadata(sink)) => {
                self.on_metadata(msg_type, payload, sink)
            }
            (Stage::Rows, StageConsumer::Rows(sink)) => self.on_row(msg_type, payload, sink),
            (Stage::Close, StageConsumer::Stmt(sink)) => self.on_close(msg_type, sink),
            (stage, _) => Err(Error::InvalidUsage(format!(
                "consumer does not match {:?} stage",
                stage
            ))),
        }
    }

    fn on_metadata(
        &mut self,
        msg_type: u8,
        payload: &[u8],
        sink: &mut dyn MetadataConsumer,
    ) -> Result<StepOutcome> {
        match msg_type {
            server_msg::RESULTSET_COLUMN_META_DATA => {
                let meta = parse_column_meta(payload)?;
                sink.col_meta(self.col_count, meta);
                self.col_count += 1;
                Ok(StepOutcome::Continue)
            }
            server_msg::RESULTSET_ROW
            | server_msg::RESULTSET_FETCH_DONE
            | server_msg::RESULTSET_FETCH_DONE_MORE_RESULTSETS => {
                sink.col_count(self.col_count);
                self.stage = Stage::Rows;
                self.completed = true;
                Ok(StepOutcome::Hold)
            }
            server_msg::SQL_STMT_EXECUTE_OK => {
                sink.col_count(self.col_count);
                self.stage = Stage::Close;
                self.completed = true;
                Ok(StepOutcome::Hold)
            }
            other => Err(Error::Protocol(format!(
                "unexpected message {} in metadata stage",
                other
            ))),
        }
    }

    fn on_row(
        &mut self,
        msg_type: u8,
        payload: &[u8],
        sink: &mut dyn RowConsumer,
    ) -> Result<StepOutcome> {
        match msg_type {
            server_msg::RESULTSET_ROW => {
                let row = parse_row(payload)?;
                let index = self.row_count;
                self.row_count += 1;
                if sink.row_begin(index) {
                    for (col, data) in row.fields.iter().enumerate() {
                        stream_column(sink, col as u32, data);
                    }
                    sink.row_end(index);
                }
                Ok(StepOutcome::Continue)
            }
            server_msg::RESULTSET_FETCH_DONE => {
                self.stage = Stage::Close;
                self.completed = true;
                self.more_results = false;
                sink.done(true, false);
                Ok(StepOutcome::StageDone)
            }
            server_msg::RESULTSET_FETCH_DONE_MORE_RESULTSETS => {
                self.stage = Stage::Metadata;
                self.completed = true;
                self.more_results = true;
                sink.done(false, true);
                Ok(StepOutcome::StageDone)
            }
            other => Err(Error::Protocol(format!(
                "unexpected message {} in row stage",
                other
            ))),
        }
    }

    fn on_close(&mut self, msg_type: u8, sink: &mut dyn StmtConsumer) -> Result<StepOutcome> {
        match msg_type {
            server_msg::SQL_STMT_EXECUTE_OK => {
                sink.execute_ok();
                self.stage = Stage::Done;
                Ok(StepOutcome::StageDone)
            }
            other => Err(Error::Protocol(format!(
                "unexpected message {} in close stage",
                other
            ))),
        }
    }
}

impl Default for ReplyFsm {
    fn default() -> Self {
        Self::new()
    }
}

/// Push one column's bytes through the consumer's read windows. An empty
/// field encodes NULL.
fn stream_column(sink: &mut dyn RowConsumer, col: u32, data: &[u8]) {
    if data.is_empty() {
        sink.col_null(col);
        return;
    }
    let total = data.len();
    let mut pos = 0;
    let mut window = sink.col_begin(col, total);
    while pos < total && window > 0 {
        let take = window.min(total - pos);
        window = sink.col_data(col, &data[pos..pos + take]);
        pos += take;
    }
    sink.col_end(col, total);
}
