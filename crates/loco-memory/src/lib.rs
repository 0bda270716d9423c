//! `loco-memory` – session persistence.
//!
//! Every control session produces an ordered trace of the observations fed
//! to the policy (and the joint targets that resulted).  The trace is kept in
//! memory while the loop runs and written to a single SQLite file when the
//! loop stops, whatever the reason, so it can be replayed offline.
//!
//! # Modules
//!
//! - [`session`] – [`SessionRecorder`][session::SessionRecorder] (in-memory
//!   trace) and [`SessionStore`][session::SessionStore] (SQLite artifact).

pub mod session;

pub use session::{Session, SessionError, SessionRecord, SessionRecorder, SessionStore, SessionSummary};
