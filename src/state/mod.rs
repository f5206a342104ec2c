//! Protocol state machines.

pub mod reply;
