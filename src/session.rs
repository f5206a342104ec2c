//! Session orchestrator.
//!
//! The session owns the transport and serializes every protocol exchange
//! through a FIFO queue of pending work items. A dispatched statement turns
//! into a `Send` item (whose wire bytes are built lazily, right before the
//! write) followed by the receive items of its reply. At most one reply is
//! live at a time: dispatching while a previous reply is unconsumed first
//! drives that reply to completion with its data discarded.
//!
//! Server `Error` messages inside a reply become diagnostics on that reply
//! and surface from [`Reply::finish`]; errors outside any reply (during
//! authentication or reset) accumulate on the session arena. Transport and
//! protocol errors mark the connection broken, after which every call short-
//! circuits with `Error::ConnectionBroken`.

use std::collections::{BTreeMap, VecDeque};

use crate::auth::{Mechanism, Mysql41, Plain};
use crate::column::Column;
use crate::consumer::{MetadataConsumer, RowConsumer, SkipRows, StmtConsumer};
use crate::diag::{Diagnostic, Diagnostics, Severity};
use crate::error::{Error, Result, ServerError};
use crate::op::AsyncOp;
use crate::opts::{AuthSelection, SessionOpts};
use crate::protocol::backend::{
    ColumnMetaMsg, NoticeMsg, parse_auth_data, parse_error, parse_notice, state_param,
    warning_level,
};
use crate::protocol::frame::{Frame, FrameReader, server_msg};
use crate::protocol::frontend::{
    self, CollectionRef, DataModel, FindParams, Limit, UpdateOperation,
};
use crate::state::reply::{ReplyFsm, Stage, StageConsumer, StepOutcome};
use crate::transport::{Readiness, Transport};
use crate::value::Value;

/// Per-statement counters reported by the server through notices.
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    pub rows_affected: u64,
    pub rows_found: u64,
    pub rows_matched: u64,
    pub last_insert_id: Option<u64>,
    /// Document ids generated for an insert without explicit `_id`s.
    pub generated_ids: Vec<String>,
}

/// A queued request whose wire bytes are built only when it is sent.
#[derive(Debug)]
enum DelayedOp {
    StmtExecute {
        namespace: &'static str,
        stmt: String,
        args: Vec<Value>,
    },
    CrudFind(Box<FindParams>),
    CrudInsert {
        collection: CollectionRef,
        data_model: DataModel,
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
    },
    CrudUpdate {
        collection: CollectionRef,
        data_model: DataModel,
        criteria: Option<Vec<u8>>,
        limit: Option<Limit>,
        order: Vec<Vec<u8>>,
        operations: Vec<UpdateOperation>,
    },
    CrudDelete {
        collection: CollectionRef,
        data_model: DataModel,
        criteria: Option<Vec<u8>>,
        limit: Option<Limit>,
        order: Vec<Vec<u8>>,
    },
    SessionReset,
}

impl DelayedOp {
    fn build(&self, out: &mut Vec<u8>) {
        match self {
            DelayedOp::StmtExecute {
                namespace,
                stmt,
                args,
            } => frontend::stmt_execute(out, namespace, stmt, args),
            DelayedOp::CrudFind(params) => frontend::crud_find(out, params),
            DelayedOp::CrudInsert {
                collection,
                data_model,
                columns,
                rows,
            } => frontend::crud_insert(out, collection, *data_model, columns, rows),
            DelayedOp::CrudUpdate {
                collection,
                data_model,
                criteria,
                limit,
                order,
                operations,
            } => frontend::crud_update(
                out,
                collection,
                *data_model,
                criteria.as_deref(),
                limit.as_ref(),
                order,
                operations,
            ),
            DelayedOp::CrudDelete {
                collection,
                data_model,
                criteria,
                limit,
                order,
            } => frontend::crud_delete(
                out,
                collection,
                *data_model,
                criteria.as_deref(),
                limit.as_ref(),
                order,
            ),
            DelayedOp::SessionReset => frontend::session_reset(out),
        }
    }
}

/// Receive phase of the current reply fed by the queue.
#[derive(Debug, Clone, Copy)]
enum RecvPhase {
    Metadata,
    Completion,
}

/// One unit of queued work, processed strictly in order.
#[derive(Debug)]
enum Pending {
    Send(DelayedOp),
    RecvReply(RecvPhase),
    /// Consume and discard the row stage of the current result set.
    DrainRows,
    /// Await a bare `Ok` (session reset).
    RecvOk,
}

/// Accumulates column metadata for the result set being received.
#[derive(Debug)]
struct MetaAccumulator {
    columns: BTreeMap<u32, Column>,
    count: Option<u32>,
    /// Skip storing descriptors while a reply is being discarded.
    discard: bool,
}

impl MetaAccumulator {
    fn new() -> Self {
        Self {
            columns: BTreeMap::new(),
            count: None,
            discard: false,
        }
    }

    fn reset(&mut self) {
        self.columns.clear();
        self.count = None;
    }
}

impl MetadataConsumer for MetaAccumulator {
    fn col_meta(&mut self, pos: u32, meta: ColumnMetaMsg) {
        if !self.discard {
            self.columns.insert(pos, Column::from(meta));
        }
    }

    fn col_count(&mut self, count: u32) {
        self.count = Some(count);
    }
}

#[derive(Debug)]
struct CompletionState {
    ok: bool,
}

impl StmtConsumer for CompletionState {
    fn execute_ok(&mut self) {
        self.ok = true;
    }
}

/// State of the reply currently owned by the session.
#[derive(Debug)]
struct ReplyState {
    fsm: ReplyFsm,
    meta: MetaAccumulator,
    completion: CompletionState,
    diag: Diagnostics,
    error: Option<ServerError>,
    /// Remaining reply data is consumed and thrown away.
    discard: bool,
}

impl ReplyState {
    fn new() -> Self {
        Self {
            fsm: ReplyFsm::new(),
            meta: MetaAccumulator::new(),
            completion: CompletionState { ok: false },
            diag: Diagnostics::new(),
            error: None,
            discard: false,
        }
    }
}

/// A protocol session over an exclusively owned transport.
#[derive(Debug)]
pub struct Session<T: Transport> {
    transport: T,
    reader: FrameReader,
    /// Message that ended a reply stage without being consumed; re-fed to the
    /// next stage before any transport read.
    held: Option<Frame>,
    queue: VecDeque<Pending>,
    reply: Option<ReplyState>,
    valid: bool,
    broken: bool,
    da: Diagnostics,
    opts: SessionOpts,
    stats: SessionStats,
    client_id: Option<u64>,
    expired: bool,
    current_schema: Option<String>,
}

impl<T: Transport> Session<T> {
    /// Authenticate over `transport` and return an established session.
    pub fn establish(transport: T, opts: SessionOpts) -> Result<Self> {
        let current_schema = opts.schema.clone();
        let mut session = Self {
            transport,
            reader: FrameReader::new(),
            held: None,
            queue: VecDeque::new(),
            reply: None,
            valid: false,
            broken: false,
            da: Diagnostics::new(),
            opts,
            stats: SessionStats::default(),
            client_id: None,
            expired: false,
            current_schema,
        };
        session.authenticate()?;
        Ok(session)
    }

    /// Whether the session is established and usable.
    pub fn is_valid(&self) -> bool {
        self.valid && !self.broken
    }

    /// Session-level diagnostics (authentication and connection events).
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.da
    }

    pub fn clear_diagnostics(&mut self) {
        self.da.clear();
    }

    /// Diagnostics of the most recent reply, while it is still owned.
    pub fn reply_diagnostics(&self) -> Option<&Diagnostics> {
        self.reply.as_ref().map(|r| &r.diag)
    }

    /// Counters of the most recently completed statement.
    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Server-assigned client id, once reported.
    pub fn client_id(&self) -> Option<u64> {
        self.client_id
    }

    /// The account authenticated in expired-password mode.
    pub fn account_expired(&self) -> bool {
        self.expired
    }

    /// Schema currently selected, tracked through session state notices.
    pub fn current_schema(&self) -> Option<&str> {
        self.current_schema.as_deref()
    }

    // -- command surface ----------------------------------------------------

    /// Execute a SQL statement.
    pub fn sql(&mut self, stmt: impl Into<String>) -> Result<Reply<'_, T>> {
        self.sql_with_args(stmt, Vec::new())
    }

    /// Execute a SQL statement with scalar placeholder arguments.
    pub fn sql_with_args(
        &mut self,
        stmt: impl Into<String>,
        args: Vec<Value>,
    ) -> Result<Reply<'_, T>> {
        self.dispatch(DelayedOp::StmtExecute {
            namespace: "sql",
            stmt: stmt.into(),
            args,
        })
    }

    /// Execute an admin command in the plugin namespace.
    pub fn admin(&mut self, cmd: impl Into<String>, args: Vec<Value>) -> Result<Reply<'_, T>> {
        self.dispatch(DelayedOp::StmtExecute {
            namespace: "xplugin",
            stmt: cmd.into(),
            args,
        })
    }

    /// Add documents to a collection. Each value is one encoded document.
    pub fn coll_add(
        &mut self,
        collection: CollectionRef,
        documents: Vec<Value>,
    ) -> Result<Reply<'_, T>> {
        let rows = documents.into_iter().map(|doc| vec![doc]).collect();
        self.dispatch(DelayedOp::CrudInsert {
            collection,
            data_model: DataModel::Document,
            columns: Vec::new(),
            rows,
        })
    }

    /// Find documents in a collection.
    pub fn coll_find(&mut self, mut params: FindParams) -> Result<Reply<'_, T>> {
        params.data_model = DataModel::Document;
        self.dispatch(DelayedOp::CrudFind(Box::new(params)))
    }

    /// Update documents in a collection.
    pub fn coll_update(
        &mut self,
        collection: CollectionRef,
        criteria: Option<Vec<u8>>,
        limit: Option<Limit>,
        order: Vec<Vec<u8>>,
        operations: Vec<UpdateOperation>,
    ) -> Result<Reply<'_, T>> {
        self.dispatch(DelayedOp::CrudUpdate {
            collection,
            data_model: DataModel::Document,
            criteria,
            limit,
            order,
            operations,
        })
    }

    /// Remove documents from a collection.
    pub fn coll_remove(
        &mut self,
        collection: CollectionRef,
        criteria: Option<Vec<u8>>,
        limit: Option<Limit>,
        order: Vec<Vec<u8>>,
    ) -> Result<Reply<'_, T>> {
        self.dispatch(DelayedOp::CrudDelete {
            collection,
            data_model: DataModel::Document,
            criteria,
            limit,
            order,
        })
    }

    /// Insert rows into a table.
    pub fn table_insert(
        &mut self,
        collection: CollectionRef,
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
    ) -> Result<Reply<'_, T>> {
        self.dispatch(DelayedOp::CrudInsert {
            collection,
            data_model: DataModel::Table,
            columns,
            rows,
        })
    }

    /// Select rows from a table.
    pub fn table_select(&mut self, mut params: FindParams) -> Result<Reply<'_, T>> {
        params.data_model = DataModel::Table;
        self.dispatch(DelayedOp::CrudFind(Box::new(params)))
    }

    /// Update rows of a table.
    pub fn table_update(
        &mut self,
        collection: CollectionRef,
        criteria: Option<Vec<u8>>,
        limit: Option<Limit>,
        order: Vec<Vec<u8>>,
        operations: Vec<UpdateOperation>,
    ) -> Result<Reply<'_, T>> {
        self.dispatch(DelayedOp::CrudUpdate {
            collection,
            data_model: DataModel::Table,
            criteria,
            limit,
            order,
            operations,
        })
    }

    /// Delete rows from a table.
    pub fn table_delete(
        &mut self,
        collection: CollectionRef,
        criteria: Option<Vec<u8>>,
        limit: Option<Limit>,
        order: Vec<Vec<u8>>,
    ) -> Result<Reply<'_, T>> {
        self.dispatch(DelayedOp::CrudDelete {
            collection,
            data_model: DataModel::Table,
            criteria,
            limit,
            order,
        })
    }

    pub fn begin(&mut self) -> Result<()> {
        self.exec_simple("BEGIN")
    }

    pub fn commit(&mut self) -> Result<()> {
        self.exec_simple("COMMIT")
    }

    pub fn rollback(&mut self) -> Result<()> {
        self.exec_simple("ROLLBACK")
    }

    fn exec_simple(&mut self, stmt: &str) -> Result<()> {
        self.sql(stmt)?.finish()
    }

    /// Reset server-side session state, keeping the session established.
    pub fn reset(&mut self) -> Result<()> {
        self.check_usable()?;
        self.finish_current_reply()?;
        self.queue.push_back(Pending::Send(DelayedOp::SessionReset));
        self.queue.push_back(Pending::RecvOk);
        self.drive_blocking()?;
        self.stats = SessionStats::default();
        Ok(())
    }

    /// Close the session and the connection. Idempotent; errors during the
    /// goodbye exchange are logged, not returned.
    pub fn close(&mut self) -> Result<()> {
        if !self.valid {
            return Ok(());
        }
        self.valid = false;
        if self.broken {
            return Ok(());
        }
        if let Err(e) = self.finish_current_reply() {
            tracing::warn!(error = %e, "discarding reply during close failed");
            return Ok(());
        }
        let mut buf = Vec::new();
        frontend::con_close(&mut buf);
        if self.transport.write_all(&buf).is_err() {
            self.broken = true;
            return Ok(());
        }
        loop {
            match self.next_frame() {
                Ok(frame) if frame.msg_type == server_msg::OK => break,
                Ok(frame) if frame.msg_type == server_msg::ERROR => {
                    if let Ok(err) = parse_error(&frame.payload) {
                        tracing::warn!(code = err.code, "server error on close");
                    }
                    break;
                }
                Ok(_) => continue,
                Err(_) => break,
            }
        }
        Ok(())
    }

    // -- authentication -----------------------------------------------------

    fn authenticate(&mut self) -> Result<()> {
        match self.opts.auth {
            AuthSelection::Plain => {
                let mut mech = self.plain();
                self.try_mechanism(&mut mech)
            }
            AuthSelection::Mysql41 => {
                let mut mech = self.mysql41();
                self.try_mechanism(&mut mech)
            }
            AuthSelection::Auto => {
                let secure = self.transport.is_secure();
                let first = if secure {
                    let mut mech = self.plain();
                    self.try_mechanism(&mut mech)
                } else {
                    let mut mech = self.mysql41();
                    self.try_mechanism(&mut mech)
                };
                match first {
                    Ok(()) => Ok(()),
                    Err(e) if self.auth_retryable(&e) => {
                        tracing::debug!(error = %e, "first mechanism rejected, falling back");
                        self.da.clear();
                        let second = if secure {
                            let mut mech = self.mysql41();
                            self.try_mechanism(&mut mech)
                        } else {
                            let mut mech = self.plain();
                            self.try_mechanism(&mut mech)
                        };
                        match second {
                            Ok(()) => Ok(()),
                            Err(e) if self.auth_retryable(&e) => Err(Error::Auth(
                                "authentication failed with mechanisms PLAIN and MYSQL41".into(),
                            )),
                            Err(e) => Err(e),
                        }
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    /// A server rejection that leaves the connection open for another start.
    fn auth_retryable(&self, e: &Error) -> bool {
        !self.broken && matches!(e, Error::Server(_) | Error::Auth(_))
    }

    fn plain(&self) -> Plain {
        Plain::new(&self.opts.user, self.opts.password.as_deref())
    }

    fn mysql41(&self) -> Mysql41 {
        Mysql41::new(
            &self.opts.user,
            self.opts.password.as_deref(),
            self.opts.schema.as_deref(),
        )
    }

    fn try_mechanism(&mut self, mech: &mut dyn Mechanism) -> Result<()> {
        let mut buf = Vec::new();
        frontend::auth_start(&mut buf, mech.name(), &mech.initial_data(), &mech.initial_response());
        self.send_bytes(&buf)?;
        loop {
            let frame = self.next_frame()?;
            match frame.msg_type {
                server_msg::SESS_AUTHENTICATE_CONTINUE => {
                    let challenge = parse_auth_data(&frame.payload).map_err(|e| self.fail(e))?;
                    let data = mech.continue_data(&challenge)?;
                    let mut buf = Vec::new();
                    frontend::auth_continue(&mut buf, &data);
                    self.send_bytes(&buf)?;
                }
                server_msg::SESS_AUTHENTICATE_OK => {
                    self.valid = true;
                    tracing::debug!(mechanism = mech.name(), "authenticated");
                    return Ok(());
                }
                server_msg::ERROR => {
                    let err = parse_error(&frame.payload).map_err(|e| self.fail(e))?;
                    if err.fatal {
                        self.broken = true;
                    }
                    self.da.push(Diagnostic::from_server(Severity::Error, &err));
                    return Err(Error::Server(err));
                }
                other => {
                    return Err(self.fail(Error::Protocol(format!(
                        "unexpected message {} during authentication",
                        other
                    ))));
                }
            }
        }
    }

    // -- queue machinery ----------------------------------------------------

    fn check_usable(&self) -> Result<()> {
        if self.broken {
            return Err(Error::ConnectionBroken);
        }
        if !self.valid {
            return Err(Error::SessionClosed);
        }
        Ok(())
    }

    fn dispatch(&mut self, op: DelayedOp) -> Result<Reply<'_, T>> {
        self.check_usable()?;
        self.finish_current_reply()?;
        self.stats = SessionStats::default();
        self.reply = Some(ReplyState::new());
        self.queue.push_back(Pending::Send(op));
        self.queue.push_back(Pending::RecvReply(RecvPhase::Metadata));
        Ok(Reply { session: self })
    }

    fn fail(&mut self, e: Error) -> Error {
        if e.is_connection_broken() {
            self.broken = true;
            self.reader.reset();
        }
        e
    }

    fn send_bytes(&mut self, buf: &[u8]) -> Result<()> {
        tracing::trace!(len = buf.len(), "send frame");
        self.transport.write_all(buf).map_err(|e| self.fail(e))
    }

    /// Next non-notice frame without blocking; notices are handled inline.
    fn poll_frame(&mut self) -> Result<Option<Frame>> {
        if let Some(frame) = self.held.take() {
            return Ok(Some(frame));
        }
        loop {
            match self.reader.poll(&mut self.transport) {
                Ok(Some(frame)) => {
                    if frame.msg_type == server_msg::NOTICE {
                        if let Err(e) = self.handle_notice(&frame.payload) {
                            return Err(self.fail(e));
                        }
                        continue;
                    }
                    return Ok(Some(frame));
                }
                Ok(None) => return Ok(None),
                Err(e) => return Err(self.fail(e)),
            }
        }
    }

    fn next_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.poll_frame()? {
                return Ok(frame);
            }
            self.wait_transport()?;
        }
    }

    fn wait_transport(&mut self) -> Result<()> {
        self.transport.wait_readable().map_err(|e| self.fail(e))
    }

    /// Process queued items until the queue is empty (returns true) or the
    /// transport has no bytes available (returns false).
    fn advance_queue(&mut self) -> Result<bool> {
        loop {
            let Some(front) = self.queue.front() else {
                return Ok(true);
            };
            match front {
                Pending::Send(_) => {
                    let Some(Pending::Send(op)) = self.queue.pop_front() else {
                        unreachable!()
                    };
                    let mut buf = Vec::new();
                    op.build(&mut buf);
                    self.send_bytes(&buf)?;
                }
                Pending::RecvReply(phase) => {
                    let phase = *phase;
                    let Some(frame) = self.poll_frame()? else {
                        return Ok(false);
                    };
                    self.feed_reply(phase, frame)?;
                }
                Pending::DrainRows => {
                    let Some(frame) = self.poll_frame()? else {
                        return Ok(false);
                    };
                    self.feed_drain(frame)?;
                }
                Pending::RecvOk => {
                    let Some(frame) = self.poll_frame()? else {
                        return Ok(false);
                    };
                    self.queue.pop_front();
                    match frame.msg_type {
                        server_msg::OK => {}
                        server_msg::ERROR => {
                            let err = parse_error(&frame.payload).map_err(|e| self.fail(e))?;
                            if err.fatal {
                                self.broken = true;
                            }
                            self.da.push(Diagnostic::from_server(Severity::Error, &err));
                            return Err(Error::Server(err));
                        }
                        other => {
                            return Err(self.fail(Error::Protocol(format!(
                                "expected Ok, got message {}",
                                other
                            ))));
                        }
                    }
                }
            }
        }
    }

    fn feed_reply(&mut self, phase: RecvPhase, frame: Frame) -> Result<()> {
        let outcome = {
            let reply = self
                .reply
                .as_mut()
                .ok_or_else(|| Error::InvalidUsage("no reply is open".into()))?;
            match phase {
                RecvPhase::Metadata => reply.fsm.on_message(
                    frame.msg_type,
                    &frame.payload,
                    StageConsumer::Metadata(&mut reply.meta),
                ),
                RecvPhase::Completion => reply.fsm.on_message(
                    frame.msg_type,
                    &frame.payload,
                    StageConsumer::Stmt(&mut reply.completion),
                ),
            }
        };
        match outcome {
            Ok(StepOutcome::Continue) => Ok(()),
            Ok(StepOutcome::StageDone) => {
                // Completion stage consumed its terminator; the reply is done.
                self.queue.pop_front();
                Ok(())
            }
            Ok(StepOutcome::Hold) => {
                self.held = Some(frame);
                self.queue.pop_front();
                self.enter_next_stage()
            }
            Ok(StepOutcome::ServerError(err)) => {
                self.queue.pop_front();
                self.abort_reply(err);
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn feed_drain(&mut self, frame: Frame) -> Result<()> {
        let outcome = {
            let reply = self
                .reply
                .as_mut()
                .ok_or_else(|| Error::InvalidUsage("no reply is open".into()))?;
            let mut skip = SkipRows;
            reply.fsm.on_message(
                frame.msg_type,
                &frame.payload,
                StageConsumer::Rows(&mut skip),
            )
        };
        match outcome {
            Ok(StepOutcome::Continue) => Ok(()),
            Ok(StepOutcome::StageDone) => {
                self.queue.pop_front();
                self.after_rows()
            }
            Ok(StepOutcome::Hold) => unreachable!("row stage never holds messages back"),
            Ok(StepOutcome::ServerError(err)) => {
                self.queue.pop_front();
                self.abort_reply(err);
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Resume the state machine after the metadata stage held a message back.
    fn enter_next_stage(&mut self) -> Result<()> {
        let (stage, discard) = {
            let reply = self.reply.as_mut().ok_or(Error::ConnectionBroken)?;
            (reply.fsm.stage(), reply.discard)
        };
        match stage {
            Stage::Close => {
                let reply = self.reply.as_mut().ok_or(Error::ConnectionBroken)?;
                reply.fsm.resume_close().map_err(|e| self.fail(e))?;
                self.queue
                    .push_front(Pending::RecvReply(RecvPhase::Completion));
                Ok(())
            }
            Stage::Rows => {
                let reply = self.reply.as_mut().ok_or(Error::ConnectionBroken)?;
                reply.fsm.resume_rows().map_err(|e| self.fail(e))?;
                if discard {
                    self.queue.push_front(Pending::DrainRows);
                }
                // Otherwise the queue drains here and the reply handle feeds
                // the row stage on demand.
                Ok(())
            }
            Stage::Metadata | Stage::Done => Err(self.fail(Error::Protocol(format!(
                "unexpected stage {:?} after metadata",
                stage
            )))),
        }
    }

    /// Advance past the end of a row stage: either into the next result
    /// set's metadata or into completion.
    fn after_rows(&mut self) -> Result<()> {
        let resumed = {
            let reply = self.reply.as_mut().ok_or(Error::ConnectionBroken)?;
            if reply.fsm.more_results() {
                let resumed = reply.fsm.resume_metadata();
                if resumed.is_ok() {
                    reply.meta.reset();
                }
                resumed.map(|()| RecvPhase::Metadata)
            } else {
                reply.fsm.resume_close().map(|()| RecvPhase::Completion)
            }
        };
        let phase = resumed.map_err(|e| self.fail(e))?;
        self.queue.push_front(Pending::RecvReply(phase));
        Ok(())
    }

    /// Record a server error that terminated the current reply.
    fn abort_reply(&mut self, err: ServerError) {
        if err.fatal {
            self.broken = true;
        }
        if let Some(reply) = self.reply.as_mut() {
            reply.diag.push(Diagnostic::from_server(Severity::Error, &err));
            reply.error = Some(err);
        } else {
            self.da.push(Diagnostic::from_server(Severity::Error, &err));
        }
        // Remaining receive items of this reply will never be satisfied.
        while matches!(
            self.queue.front(),
            Some(Pending::RecvReply(_) | Pending::DrainRows)
        ) {
            self.queue.pop_front();
        }
    }

    fn drive_blocking(&mut self) -> Result<()> {
        loop {
            if self.advance_queue()? {
                return Ok(());
            }
            self.wait_transport()?;
        }
    }

    fn reply_done(&self) -> bool {
        self.queue.is_empty()
            && self
                .reply
                .as_ref()
                .is_none_or(|r| r.fsm.is_done())
    }

    /// Drive the previous reply to completion, discarding its data, so the
    /// byte stream is clean for the next request.
    fn finish_current_reply(&mut self) -> Result<()> {
        if self.reply_done() {
            self.reply = None;
            return Ok(());
        }
        tracing::warn!("discarding unconsumed reply");
        if let Some(reply) = self.reply.as_mut() {
            reply.discard = true;
            reply.meta.discard = true;
            // A reply paused mid row stage has no queue item; discard from
            // where it stopped.
            if self.queue.is_empty() && reply.fsm.stage() == Stage::Rows {
                self.queue.push_back(Pending::DrainRows);
            }
        }
        self.drive_blocking()?;
        self.reply = None;
        Ok(())
    }

    fn cancel_current(&mut self) {
        let request_sent = !matches!(self.queue.front(), Some(Pending::Send(_)))
            && (!self.queue.is_empty()
                || self.reply.as_ref().is_some_and(|r| !r.fsm.is_done()));
        self.queue.clear();
        self.reply = None;
        self.held = None;
        if request_sent {
            tracing::warn!("operation cancelled with its response outstanding; connection broken");
            self.broken = true;
            self.reader.reset();
        }
    }

    // -- notices ------------------------------------------------------------

    fn handle_notice(&mut self, payload: &[u8]) -> Result<()> {
        match parse_notice(payload)? {
            NoticeMsg::Warning {
                level,
                code,
                message,
            } => {
                let severity = match level {
                    warning_level::NOTE => Severity::Info,
                    warning_level::ERROR => Severity::Error,
                    _ => Severity::Warning,
                };
                // An error-level notice fails the statement it arrived in,
                // even though the server keeps streaming the reply.
                if severity == Severity::Error
                    && let Some(reply) = self.reply.as_mut()
                    && reply.error.is_none()
                {
                    reply.error = Some(ServerError {
                        code,
                        sql_state: String::new(),
                        message: message.clone(),
                        fatal: false,
                    });
                }
                self.push_diag(Diagnostic {
                    severity,
                    code,
                    sql_state: None,
                    message,
                });
            }
            NoticeMsg::SessionStateChanged { param, value } => {
                self.apply_state_change(param, value);
            }
            NoticeMsg::SessionVariableChanged { name } => {
                tracing::trace!(variable = %name, "session variable changed");
            }
        }
        Ok(())
    }

    /// Warnings attach to the open reply; otherwise to the session arena.
    fn push_diag(&mut self, diag: Diagnostic) {
        match self.reply.as_mut() {
            Some(reply) => reply.diag.push(diag),
            None => self.da.push(diag),
        }
    }

    fn apply_state_change(&mut self, param: u32, value: Option<Value>) {
        match param {
            state_param::CLIENT_ID_ASSIGNED => {
                self.client_id = value.and_then(|v| v.as_u64());
            }
            state_param::ACCOUNT_EXPIRED => {
                self.expired = true;
            }
            state_param::CURRENT_SCHEMA => {
                if let Some(Value::Str(schema)) = value {
                    self.current_schema = Some(schema);
                }
            }
            state_param::ROWS_AFFECTED => {
                self.stats.rows_affected = value.and_then(|v| v.as_u64()).unwrap_or(0);
            }
            state_param::ROWS_FOUND => {
                self.stats.rows_found = value.and_then(|v| v.as_u64()).unwrap_or(0);
            }
            state_param::ROWS_MATCHED => {
                self.stats.rows_matched = value.and_then(|v| v.as_u64()).unwrap_or(0);
            }
            state_param::GENERATED_INSERT_ID => {
                self.stats.last_insert_id = value.and_then(|v| v.as_u64());
            }
            state_param::GENERATED_DOCUMENT_IDS => match value {
                Some(Value::Str(id)) => self.stats.generated_ids.push(id),
                Some(Value::Bytes(bytes)) => {
                    if let Ok(id) = crate::codec::decode_text(&bytes) {
                        self.stats.generated_ids.push(id);
                    }
                }
                _ => {}
            },
            state_param::PRODUCED_MESSAGE => {
                if let Some(Value::Str(message)) = value {
                    self.push_diag(Diagnostic::new(Severity::Info, message));
                }
            }
            state_param::TRX_COMMITTED | state_param::TRX_ROLLEDBACK => {
                tracing::trace!(param, "transaction state notice");
            }
            other => {
                tracing::trace!(param = other, "unhandled session state change");
            }
        }
    }
}

/// Handle to the reply of a dispatched statement.
///
/// Borrows the session exclusively: the reply must be consumed (or dropped,
/// in which case the next dispatch discards its data) before the session can
/// be used again.
#[derive(Debug)]
pub struct Reply<'a, T: Transport> {
    session: &'a mut Session<T>,
}

impl<T: Transport> Reply<'_, T> {
    /// Drive the queue until it is empty; blocking.
    fn drive(&mut self) -> Result<()> {
        loop {
            if self.session.advance_queue()? {
                return Ok(());
            }
            self.session.wait_transport()?;
        }
    }

    fn reply_state(&self) -> Result<&ReplyState> {
        self.session
            .reply
            .as_ref()
            .ok_or_else(|| Error::InvalidUsage("reply was cancelled".into()))
    }

    /// Whether a result set is open for row fetching.
    ///
    /// Waits for the reply's metadata if it has not arrived yet.
    pub fn has_results(&mut self) -> Result<bool> {
        self.drive()?;
        let reply = self.reply_state()?;
        Ok(reply.fsm.stage() == Stage::Rows)
    }

    /// Column descriptors of the current result set, in position order.
    pub fn columns(&mut self) -> Result<Vec<Column>> {
        self.drive()?;
        let reply = self.reply_state()?;
        Ok(reply.meta.columns.values().cloned().collect())
    }

    /// Number of columns in the current result set.
    pub fn column_count(&mut self) -> Result<u32> {
        self.drive()?;
        let reply = self.reply_state()?;
        Ok(reply.meta.count.unwrap_or(0))
    }

    /// Stream all rows of the current result set into `sink`.
    ///
    /// Returns once the result set's rows are exhausted. Fails with
    /// `InvalidUsage` when no result set is open.
    pub fn fetch_rows(&mut self, sink: &mut dyn RowConsumer) -> Result<()> {
        if !self.has_results()? {
            return Err(Error::InvalidUsage(
                "no result set is open for row fetching".into(),
            ));
        }
        loop {
            let frame = self.session.next_frame()?;
            let outcome = {
                let reply = self
                    .session
                    .reply
                    .as_mut()
                    .ok_or_else(|| Error::InvalidUsage("reply was cancelled".into()))?;
                reply.fsm.on_message(
                    frame.msg_type,
                    &frame.payload,
                    StageConsumer::Rows(&mut *sink),
                )
            };
            match outcome {
                Ok(StepOutcome::Continue) => continue,
                Ok(StepOutcome::StageDone) => {
                    self.session.after_rows()?;
                    return Ok(());
                }
                Ok(StepOutcome::Hold) => unreachable!("row stage never holds messages back"),
                Ok(StepOutcome::ServerError(err)) => {
                    self.session.abort_reply(err.clone());
                    return Err(Error::Server(err));
                }
                Err(e) => return Err(self.session.fail(e)),
            }
        }
    }

    /// Skip the rest of the current result set and move to the next one.
    ///
    /// Returns whether another result set is open.
    pub fn next_result(&mut self) -> Result<bool> {
        if self.has_results()? {
            let mut skip = SkipRows;
            self.fetch_rows(&mut skip)?;
        }
        self.has_results()
    }

    /// Diagnostics collected for this reply (server errors and warnings).
    pub fn diagnostics(&self) -> &Diagnostics {
        match &self.session.reply {
            Some(reply) => &reply.diag,
            None => &self.session.da,
        }
    }

    /// Consume the reply to completion, discarding unfetched rows.
    ///
    /// Returns the server error that terminated the statement, if any.
    pub fn finish(mut self) -> Result<()> {
        self.block_until_done()?;
        let reply = self.reply_state()?;
        match &reply.error {
            Some(err) => Err(Error::Server(err.clone())),
            None => {
                debug_assert!(reply.completion.ok);
                Ok(())
            }
        }
    }
}

impl<T: Transport> AsyncOp for Reply<'_, T> {
    fn advance(&mut self) -> Result<bool> {
        loop {
            if self.session.reply_done() {
                return Ok(true);
            }
            if self.session.queue.is_empty() {
                // The reply is paused at an unconsumed row stage; advancing
                // past it discards the rows.
                let Some(reply) = self.session.reply.as_mut() else {
                    return Ok(true);
                };
                reply.discard = true;
                reply.meta.discard = true;
                match reply.fsm.stage() {
                    Stage::Rows => self.session.queue.push_back(Pending::DrainRows),
                    _ => unreachable!("reply stalled outside the row stage"),
                }
            }
            if !self.session.advance_queue()? {
                return Ok(false);
            }
        }
    }

    fn is_completed(&self) -> bool {
        self.session.reply_done()
    }

    fn waiting_for(&self) -> Option<Readiness> {
        match self.session.queue.front() {
            Some(Pending::RecvReply(_) | Pending::DrainRows | Pending::RecvOk) => {
                Some(Readiness::Readable)
            }
            _ => None,
        }
    }

    fn wait_ready(&mut self) -> Result<()> {
        self.session.wait_transport()
    }

    fn cancel(&mut self) {
        self.session.cancel_current();
    }
}
