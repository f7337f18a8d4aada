//! Cursor position types shared between the grid cache and the viewport
//! controller.

use crate::cache::Seq;

/// Full authoritative cursor state tracked by the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorState {
    pub row: u64,
    pub col: usize,
    pub seq: Seq,
    pub visible: bool,
    pub blink: bool,
}

impl Default for CursorState {
    fn default() -> Self {
        CursorState {
            row: 0,
            col: 0,
            seq: 0,
            visible: true,
            blink: false,
        }
    }
}
