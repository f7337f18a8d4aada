//! Headless rendering and synchronization engine for a remote terminal
//! viewer: grid cache, predictive echo, history backfill, frame dispatch,
//! and viewport/follow-tail policy.
//!
//! The crate assumes a single-threaded cooperative event loop drives it (see
//! `SPEC_FULL.md` §5): every mutating method takes `&mut self` and there is
//! no internal locking on the hot per-frame path. Its types are `Send` so a
//! host embedder may move the dispatcher between an async runtime's tasks
//! between frames, but nothing here spawns a runtime of its own.

pub mod backfill;
pub mod cache;
pub mod config;
pub mod dispatch;
pub mod echo;
pub mod error;
pub mod input;
pub mod model;
pub mod protocol;
pub mod telemetry;
pub mod transport;
pub mod viewport;

pub use cache::terminal::{RowSlot, TerminalGrid, TerminalGridSnapshot};
pub use config::TerminalViewerConfig;
pub use dispatch::{DispatchOutcome, FrameDispatcher};
