//! Cooperative asynchronous operation contract.
//!
//! Protocol exchanges are modeled as operations stepped by their owner: each
//! `advance` call makes as much progress as the transport allows without
//! blocking, and [`AsyncOp::block_until_done`] drives an operation to
//! completion by interleaving steps with readiness waits. Operations share
//! one connection, so at most one is actively reading at a time; ordering is
//! the session's responsibility.

use crate::error::Result;
use crate::transport::Readiness;

/// An in-flight protocol exchange.
pub trait AsyncOp {
    /// Make as much progress as possible without blocking.
    ///
    /// Returns true once the operation has completed. Calling `advance` on a
    /// completed operation is allowed and returns true.
    fn advance(&mut self) -> Result<bool>;

    /// Whether the operation has completed (successfully or not).
    fn is_completed(&self) -> bool;

    /// Transport readiness the operation is blocked on, if any.
    ///
    /// `None` means the next `advance` can make progress immediately.
    fn waiting_for(&self) -> Option<Readiness>;

    /// Block until the transport readiness reported by [`waiting_for`] is
    /// satisfied.
    ///
    /// [`waiting_for`]: AsyncOp::waiting_for
    fn wait_ready(&mut self) -> Result<()>;

    /// Best-effort abort.
    ///
    /// Cancelling an operation whose request already reached the server
    /// leaves an unsolicited response in the stream; the connection is marked
    /// broken in that case.
    fn cancel(&mut self);

    /// Drive the operation to completion.
    fn block_until_done(&mut self) -> Result<()> {
        loop {
            if self.advance()? {
                return Ok(());
            }
            if self.waiting_for().is_some() {
                self.wait_ready()?;
            }
        }
    }
}
