//! Wire-level frame and update types exchanged with the remote host.
//!
//! Cell payloads on the wire are packed (see [`crate::cache::terminal::packed`]),
//! not the heavy [`crate::model::terminal::cell::Cell`] the grid cache applies
//! updates in terms of; the frame dispatcher is responsible for unpacking one
//! into the other as frames are routed.

use crate::cache::Seq;

pub mod wire;

pub use wire::{
    WireError, decode_client_frame, decode_host_frame, encode_client_frame, encode_host_frame,
};

/// Feature bit for `hello.features`: server will emit authoritative `cursor` frames.
pub const FEATURE_CURSOR_SYNC: u32 = 1 << 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireUpdate {
    Cell {
        row: u64,
        col: u32,
        seq: Seq,
        cell: u64,
    },
    Row {
        row: u64,
        seq: Seq,
        cells: Vec<u64>,
    },
    RowSegment {
        row: u64,
        start_col: u32,
        seq: Seq,
        cells: Vec<u64>,
    },
    Rect {
        row_start: u64,
        row_end: u64,
        col_start: u32,
        col_end: u32,
        seq: Seq,
        cell: u64,
    },
    Trim {
        start: u64,
        count: u64,
    },
    Style {
        id: u32,
        seq: Seq,
        fg: u32,
        bg: u32,
        attrs: u8,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireCursor {
    pub row: u64,
    pub col: u32,
    pub seq: Seq,
    pub visible: bool,
    pub blink: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostFrame {
    Hello {
        subscription: u32,
        features: u32,
    },
    Grid {
        base_row: u64,
        history_rows: u32,
        cols: u32,
        viewport_rows: Option<u32>,
    },
    Snapshot {
        updates: Vec<WireUpdate>,
        cursor: Option<WireCursor>,
    },
    Delta {
        updates: Vec<WireUpdate>,
        cursor: Option<WireCursor>,
    },
    HistoryBackfill {
        range_start: u64,
        range_end: u64,
        updates: Vec<WireUpdate>,
        cursor: Option<WireCursor>,
    },
    SnapshotComplete,
    InputAck {
        seq: Seq,
    },
    Cursor {
        cursor: WireCursor,
    },
    Heartbeat {
        seq: Seq,
    },
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    Input { seq: Seq, data: Vec<u8> },
    Resize { cols: u32, rows: u32 },
    RequestBackfill { start_row: u64, count: u32 },
}
