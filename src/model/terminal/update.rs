//! The tagged update variant applied by the grid cache.
//!
//! Modeled as a single exhaustively-matched enum rather than a trait object
//! per update kind, per the "dynamic dispatch over update kinds" design note:
//! dispatch happens once, in the applier, not scattered across call sites.

use crate::cache::Seq;
use crate::cache::terminal::packed::Style;
use crate::model::terminal::cell::Cell;

#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    Cell {
        row: u64,
        col: usize,
        seq: Seq,
        cell: Cell,
    },
    Row {
        row: u64,
        seq: Seq,
        cells: Vec<Cell>,
    },
    RowSegment {
        row: u64,
        start_col: usize,
        seq: Seq,
        cells: Vec<Cell>,
    },
    Rect {
        row_start: u64,
        row_end: u64,
        col_start: usize,
        col_end: usize,
        seq: Seq,
        cell: Cell,
    },
    Trim {
        start: u64,
        count: u64,
    },
    Style {
        id: u32,
        seq: Seq,
        style: Style,
    },
}
