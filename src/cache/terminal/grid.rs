//! The terminal grid cache (C1): owns the cell matrix, per-cell sequence
//! numbers, the predicted overlay, cursor state, and the style table.
//!
//! This is a pure data layer driven by a single cooperative event loop (see
//! the concurrency model notes in the crate root docs): every public method
//! takes `&mut self`, there is no internal locking, and callers are expected
//! to run one operation to completion before starting the next.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::ops::Range;

use crate::cache::Seq;
use crate::cache::terminal::packed::{
    PackedCell, Style, StyleId, StyleTable, pack_cell, pack_from_heavy, unpack_cell,
};
use crate::model::terminal::cell::Cell;
use crate::model::terminal::cursor::CursorState;
use crate::model::terminal::update::Update;

pub const DEFAULT_MAX_HISTORY: usize = 5000;

/// A single row's storage state.
#[derive(Debug, Clone, PartialEq)]
pub enum RowSlot {
    Loaded {
        latest_seq: Seq,
        cells: Vec<PackedCell>,
        logical_width: usize,
    },
    Pending,
    Missing,
}

impl RowSlot {
    pub fn is_loaded(&self) -> bool {
        matches!(self, RowSlot::Loaded { .. })
    }
}

/// A speculative character overlaying a loaded cell, keyed by absolute
/// (row, col) in the grid cache's internal prediction map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PredictedCell {
    pub ch: char,
    pub seq: Seq,
}

#[derive(Debug, Clone)]
struct PendingPrediction {
    positions: Vec<(u64, usize)>,
    acked_at_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyContext {
    pub authoritative: bool,
}

impl ApplyContext {
    pub fn authoritative() -> Self {
        ApplyContext {
            authoritative: true,
        }
    }

    pub fn speculative() -> Self {
        ApplyContext {
            authoritative: false,
        }
    }
}

/// A cheap-to-clone rendering of the cache's current state.
#[derive(Debug, Clone)]
pub struct TerminalGridSnapshot {
    pub base_row: u64,
    pub cols: usize,
    pub history_trimmed: bool,
    pub rows: Vec<RowSlot>,
    pub cursor: CursorState,
    pub cursor_authoritative: bool,
    pub has_predictions: bool,
    pub viewport_top: u64,
    pub viewport_height: usize,
    pub follow_tail_desired: bool,
    pub tail_pad_rows: usize,
}

pub struct TerminalGrid {
    base_row: u64,
    cols: usize,
    initial_cols: usize,
    max_history: usize,
    rows: VecDeque<RowSlot>,
    style_table: StyleTable,
    history_trimmed: bool,
    max_seen_seq: Seq,

    predictions: HashMap<(u64, usize), PredictedCell>,
    pending_predictions: BTreeMap<Seq, PendingPrediction>,
    last_prediction_end: Option<(u64, usize)>,

    cursor: CursorState,
    cursor_authoritative: bool,
    cursor_feature_enabled: bool,
    seen_nonzero_cursor: bool,
    server_cursor_col: HashMap<u64, usize>,

    tail_pad_ranges: Vec<Range<u64>>,
    tail_pad_seq_threshold: Seq,

    viewport_top: u64,
    viewport_height: usize,
    follow_tail_desired: bool,

    dirty: bool,
    last_tail_snapshot: Option<Vec<RowSlot>>,
}

impl TerminalGrid {
    pub fn new(cols: usize) -> Self {
        Self::with_max_history(cols, DEFAULT_MAX_HISTORY)
    }

    pub fn with_max_history(cols: usize, max_history: usize) -> Self {
        TerminalGrid {
            base_row: 0,
            cols,
            initial_cols: cols,
            max_history,
            rows: VecDeque::new(),
            style_table: StyleTable::new(),
            history_trimmed: false,
            max_seen_seq: 0,
            predictions: HashMap::new(),
            pending_predictions: BTreeMap::new(),
            last_prediction_end: None,
            cursor: CursorState::default(),
            cursor_authoritative: false,
            cursor_feature_enabled: false,
            seen_nonzero_cursor: false,
            server_cursor_col: HashMap::new(),
            tail_pad_ranges: Vec::new(),
            tail_pad_seq_threshold: 0,
            viewport_top: 0,
            viewport_height: 0,
            follow_tail_desired: false,
            dirty: true,
            last_tail_snapshot: None,
        }
    }

    pub fn style_table(&self) -> &StyleTable {
        &self.style_table
    }

    pub fn base_row(&self) -> u64 {
        self.base_row
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    // ---- lifecycle ----

    pub fn reset(&mut self) {
        self.base_row = 0;
        self.cols = self.initial_cols;
        self.rows.clear();
        self.style_table = StyleTable::new();
        self.history_trimmed = false;
        self.max_seen_seq = 0;
        self.predictions.clear();
        self.pending_predictions.clear();
        self.last_prediction_end = None;
        self.cursor = CursorState::default();
        self.cursor_authoritative = false;
        self.cursor_feature_enabled = false;
        self.seen_nonzero_cursor = false;
        self.server_cursor_col.clear();
        self.tail_pad_ranges.clear();
        self.tail_pad_seq_threshold = 0;
        self.viewport_top = 0;
        self.viewport_height = 0;
        self.follow_tail_desired = false;
        self.dirty = true;
        self.last_tail_snapshot = None;
    }

    pub fn set_base_row(&mut self, r: u64) {
        if r > self.base_row {
            let drop = (r - self.base_row) as usize;
            for _ in 0..drop.min(self.rows.len()) {
                self.rows.pop_front();
            }
            self.base_row = r;
            self.history_trimmed = true;
            self.predictions.retain(|(row, _), _| *row >= r);
            for p in self.pending_predictions.values_mut() {
                p.positions.retain(|(row, _)| *row >= r);
            }
            if self.cursor.row < r {
                self.cursor.row = r;
            }
        } else if r < self.base_row {
            let prepend = (self.base_row - r) as usize;
            for _ in 0..prepend {
                self.rows.push_front(RowSlot::Pending);
            }
            self.base_row = r;
        }
        self.dirty = true;
    }

    pub fn set_history_origin(&mut self, r: u64) {
        let forces_trim = r > 0;
        self.set_base_row(r);
        self.history_trimmed = self.history_trimmed || forces_trim;
    }

    pub fn set_grid_size(&mut self, total_rows: u64, cols: usize) {
        if cols > self.cols {
            self.cols = cols;
        }
        let want_end = self.base_row + total_rows;
        let current_end = self.base_row + self.rows.len() as u64;
        if want_end > current_end {
            let fill_seq = self.max_seen_seq.max(1);
            let blank_cells: Vec<PackedCell> =
                (0..self.cols).map(|_| pack_cell(' ', StyleId::DEFAULT)).collect();
            for _ in current_end..want_end {
                self.rows.push_back(RowSlot::Loaded {
                    latest_seq: fill_seq,
                    cells: blank_cells.clone(),
                    logical_width: 0,
                });
            }
            self.dirty = true;
        } else if want_end < current_end {
            let keep = (want_end - self.base_row) as usize;
            self.rows.truncate(keep);
            self.dirty = true;
        }
        self.enforce_history_limit();
    }

    pub fn enable_cursor_support(&mut self, enabled: bool) {
        self.cursor_feature_enabled = enabled;
    }

    // ---- update application ----

    pub fn apply_updates(&mut self, updates: &[Update], ctx: ApplyContext) -> bool {
        let mut mutated = false;
        for update in updates {
            let applied = match update {
                Update::Cell { row, col, seq, cell } => {
                    self.apply_cell(*row, *col, *seq, cell, ctx.authoritative)
                }
                Update::Row { row, seq, cells } => {
                    self.apply_row(*row, *seq, cells, ctx.authoritative)
                }
                Update::RowSegment {
                    row,
                    start_col,
                    seq,
                    cells,
                } => self.apply_row_segment(*row, *start_col, *seq, cells, ctx.authoritative),
                Update::Rect {
                    row_start,
                    row_end,
                    col_start,
                    col_end,
                    seq,
                    cell,
                } => self.apply_rect(
                    *row_start,
                    *row_end,
                    *col_start,
                    *col_end,
                    *seq,
                    cell,
                    ctx.authoritative,
                ),
                Update::Trim { start, count } => self.apply_trim(*start, *count),
                Update::Style { id, style, .. } => self.apply_style(*id, *style),
            };
            if applied {
                mutated = true;
                if !self.cursor_authoritative {
                    self.apply_cursor_hint(update);
                }
            }
        }
        if mutated {
            self.enforce_history_limit();
            self.dirty = true;
        }
        mutated
    }

    fn apply_cell(&mut self, row: u64, col: usize, seq: Seq, cell: &Cell, authoritative: bool) -> bool {
        if row < self.base_row {
            return false;
        }
        if col + 1 > self.cols {
            self.cols = col + 1;
        }
        if !authoritative && self.is_tail_pad_redundant(row, col, seq, std::slice::from_ref(cell)) {
            return false;
        }
        let Some(idx) = self.ensure_row(row) else {
            return false;
        };
        self.ensure_loaded(idx);
        self.max_seen_seq = self.max_seen_seq.max(seq);
        let packed = pack_from_heavy(cell, &self.style_table);
        let existing_seq = match &self.rows[idx] {
            RowSlot::Loaded { latest_seq, .. } => *latest_seq,
            _ => 0,
        };

        let mut written = false;
        if authoritative || seq >= existing_seq {
            if let RowSlot::Loaded {
                cells,
                latest_seq,
                logical_width,
            } = &mut self.rows[idx]
            {
                if cells.len() <= col {
                    cells.resize(col + 1, pack_cell(' ', StyleId::DEFAULT));
                }
                cells[col] = packed;
                written = true;
                *latest_seq = (*latest_seq).max(seq);
                if !cell.is_blank() && col + 1 > *logical_width {
                    *logical_width = col + 1;
                }
            }
        }
        if written {
            self.predictions.remove(&(row, col));
            self.prune_tail_pad_row(row);
        }
        written
    }

    fn apply_row(&mut self, row: u64, seq: Seq, cells: &[Cell], authoritative: bool) -> bool {
        if row < self.base_row {
            return false;
        }
        let width = cells.len().max(self.cols);
        if width > self.cols {
            self.cols = width;
        }
        if !authoritative && self.is_tail_pad_redundant(row, 0, seq, cells) {
            return false;
        }
        let Some(idx) = self.ensure_row(row) else {
            return false;
        };
        self.ensure_loaded(idx);
        self.max_seen_seq = self.max_seen_seq.max(seq);

        let existing_seq = match &self.rows[idx] {
            RowSlot::Loaded { latest_seq, .. } => *latest_seq,
            _ => 0,
        };
        if !authoritative && seq < existing_seq {
            return false;
        }

        let mut packed_cells = Vec::with_capacity(self.cols);
        for col in 0..self.cols {
            let c = cells.get(col).copied().unwrap_or_default();
            packed_cells.push(pack_from_heavy(&c, &self.style_table));
        }

        if let RowSlot::Loaded {
            cells: row_cells,
            logical_width,
            latest_seq,
        } = &mut self.rows[idx]
        {
            *row_cells = packed_cells;
            *logical_width = recompute_logical_width(row_cells);
            *latest_seq = (*latest_seq).max(seq);
        }
        for col in 0..self.cols {
            self.predictions.remove(&(row, col));
        }
        self.prune_tail_pad_row(row);
        true
    }

    fn apply_row_segment(
        &mut self,
        row: u64,
        start_col: usize,
        seq: Seq,
        cells: &[Cell],
        authoritative: bool,
    ) -> bool {
        if row < self.base_row {
            return false;
        }
        let end_col = start_col + cells.len();
        if end_col > self.cols {
            self.cols = end_col;
        }
        if !authoritative && self.is_tail_pad_redundant(row, start_col, seq, cells) {
            return false;
        }
        let Some(idx) = self.ensure_row(row) else {
            return false;
        };
        self.ensure_loaded(idx);
        self.max_seen_seq = self.max_seen_seq.max(seq);

        let existing_seq = match &self.rows[idx] {
            RowSlot::Loaded { latest_seq, .. } => *latest_seq,
            _ => 0,
        };
        if !authoritative && seq < existing_seq {
            return false;
        }

        let packed_cells: Vec<PackedCell> = cells
            .iter()
            .map(|cell| pack_from_heavy(cell, &self.style_table))
            .collect();

        let mut mutated = false;
        if let RowSlot::Loaded {
            cells: row_cells, ..
        } = &mut self.rows[idx]
        {
            if row_cells.len() < self.cols {
                row_cells.resize(self.cols, pack_cell(' ', StyleId::DEFAULT));
            }
            for (i, packed) in packed_cells.into_iter().enumerate() {
                row_cells[start_col + i] = packed;
                mutated = true;
            }
            if start_col == 0 {
                for col in end_col..row_cells.len() {
                    row_cells[col] = pack_cell(' ', StyleId::DEFAULT);
                }
                mutated = true;
            }
        }
        if mutated {
            let tail = self.cols.saturating_sub(start_col);
            for i in 0..cells.len().max(tail) {
                self.predictions.remove(&(row, start_col + i));
            }
            if let RowSlot::Loaded {
                cells: row_cells,
                logical_width,
                latest_seq,
            } = &mut self.rows[idx]
            {
                *logical_width = recompute_logical_width(row_cells);
                *latest_seq = (*latest_seq).max(seq);
            }
            self.prune_tail_pad_row(row);
        }
        mutated
    }

    fn apply_rect(
        &mut self,
        row_start: u64,
        row_end: u64,
        col_start: usize,
        col_end: usize,
        seq: Seq,
        cell: &Cell,
        authoritative: bool,
    ) -> bool {
        if col_end > self.cols {
            self.cols = col_end;
        }
        let packed = pack_from_heavy(cell, &self.style_table);
        let is_blank_fill = cell.is_blank();
        let mut mutated = false;
        self.max_seen_seq = self.max_seen_seq.max(seq);

        let start_row = row_start.max(self.base_row);
        for row in start_row..row_end {
            if !authoritative {
                let width = col_end.saturating_sub(col_start);
                let row_cells = vec![*cell; width];
                if self.is_tail_pad_redundant(row, col_start, seq, &row_cells) {
                    continue;
                }
            }
            let Some(idx) = self.ensure_row(row) else {
                continue;
            };
            self.ensure_loaded(idx);
            let existing_seq = match &self.rows[idx] {
                RowSlot::Loaded { latest_seq, .. } => *latest_seq,
                _ => 0,
            };
            if !authoritative && seq < existing_seq {
                continue;
            }
            let mut row_mutated = false;
            if let RowSlot::Loaded {
                cells: row_cells, ..
            } = &mut self.rows[idx]
            {
                if row_cells.len() < self.cols {
                    row_cells.resize(self.cols, pack_cell(' ', StyleId::DEFAULT));
                }
                for col in col_start..col_end.min(row_cells.len()) {
                    row_cells[col] = packed;
                    row_mutated = true;
                }
            }
            if row_mutated {
                for col in col_start..col_end {
                    self.predictions.remove(&(row, col));
                }
                if let RowSlot::Loaded {
                    cells: row_cells,
                    logical_width,
                    latest_seq,
                } = &mut self.rows[idx]
                {
                    if is_blank_fill && col_start == 0 && *logical_width <= col_end {
                        *logical_width = col_start;
                    } else {
                        *logical_width = recompute_logical_width(row_cells);
                    }
                    *latest_seq = (*latest_seq).max(seq);
                }
                self.prune_tail_pad_row(row);
                mutated = true;
            }
        }
        mutated
    }

    fn apply_trim(&mut self, start: u64, count: u64) -> bool {
        if count == 0 {
            return false;
        }
        let end = start + count;
        let mut mutated = false;

        if start <= self.base_row && end > self.base_row {
            let new_base = end;
            let drop = (new_base - self.base_row) as usize;
            for _ in 0..drop.min(self.rows.len()) {
                self.rows.pop_front();
            }
            self.base_row = new_base;
            self.history_trimmed = true;
            mutated = true;
        }

        let from = start.max(self.base_row);
        for row in from..end {
            if let Some(idx) = self.row_index(row) {
                self.rows[idx] = RowSlot::Missing;
                mutated = true;
            }
            self.prune_tail_pad_row(row);
        }

        self.predictions.retain(|(row, _), _| !(*row >= start && *row < end));
        for p in self.pending_predictions.values_mut() {
            p.positions.retain(|(row, _)| !(*row >= start && *row < end));
        }
        if self.cursor.row >= start && self.cursor.row < end {
            self.cursor = CursorState::default();
            self.cursor.row = self.base_row;
            self.cursor_authoritative = false;
            self.seen_nonzero_cursor = false;
        }
        mutated
    }

    fn apply_style(&mut self, id: u32, style: Style) -> bool {
        self.style_table.set_or_extend(StyleId(id), style)
    }

    fn apply_cursor_hint(&mut self, update: &Update) {
        match update {
            Update::Cell { row, col, .. } => {
                self.cursor.row = *row;
                self.cursor.col = (*col + 1).min(self.cols);
            }
            Update::Row { row, cells, .. } => {
                self.cursor.row = *row;
                self.cursor.col = cells.len().min(self.cols);
            }
            Update::RowSegment {
                row,
                start_col,
                cells,
                ..
            } => {
                if !cells.is_empty() {
                    self.cursor.row = *row;
                    self.cursor.col = (*start_col + cells.len()).min(self.cols);
                }
            }
            Update::Rect { row_end, col_end, .. } => {
                self.cursor.row = row_end.saturating_sub(1);
                self.cursor.col = (*col_end).min(self.cols);
            }
            Update::Trim { .. } | Update::Style { .. } => {}
        }
    }

    // ---- cursor ----

    pub fn apply_cursor_frame(&mut self, row: u64, col: usize, seq: Seq, visible: bool, blink: bool) {
        if !self.cursor_feature_enabled {
            return;
        }
        let col = col.min(self.cols);
        if !self.seen_nonzero_cursor && row == 0 && col == 0 {
            self.cursor = CursorState {
                row,
                col,
                seq,
                visible: false,
                blink,
            };
            self.cursor_authoritative = true;
            self.dirty = true;
            return;
        }
        self.seen_nonzero_cursor = true;
        self.cursor = CursorState {
            row,
            col,
            seq,
            visible,
            blink,
        };
        self.cursor_authoritative = true;
        self.server_cursor_col.insert(row, col);
        self.dirty = true;
    }

    pub fn minimum_server_column(&self, row: u64) -> usize {
        let logical = self
            .row_index(row)
            .and_then(|idx| match &self.rows[idx] {
                RowSlot::Loaded { logical_width, .. } => Some(*logical_width),
                _ => None,
            })
            .unwrap_or(0);
        let server_col = self.server_cursor_col.get(&row).copied().unwrap_or(0);
        logical.max(server_col)
    }

    // ---- predictions ----

    pub fn register_prediction(&mut self, seq: Seq, bytes: &[u8]) {
        let (row, mut col) = self
            .last_prediction_end
            .unwrap_or((self.cursor.row, self.cursor.col));
        let mut positions = Vec::new();
        for &b in bytes {
            match b {
                0x08 | 0x7F => {
                    if col == 0 {
                        continue;
                    }
                    let floor = self.minimum_server_column(row);
                    if col - 1 < floor {
                        continue;
                    }
                    col -= 1;
                    self.predictions.remove(&(row, col));
                }
                0x20..=0x7E => {
                    let ch = b as char;
                    self.predictions.insert((row, col), PredictedCell { ch, seq });
                    positions.push((row, col));
                    col += 1;
                }
                _ => {}
            }
        }
        self.last_prediction_end = Some((row, col));
        self.pending_predictions.insert(
            seq,
            PendingPrediction {
                positions,
                acked_at_ms: None,
            },
        );
        self.dirty = true;
    }

    pub fn ack_prediction(&mut self, seq: Seq, now_ms: u64) {
        if let Some(p) = self.pending_predictions.get_mut(&seq) {
            p.acked_at_ms = Some(now_ms);
            self.dirty = true;
        }
    }

    pub fn prune_acked_predictions(&mut self, now_ms: u64, grace_ms: u64) {
        let expired: Vec<Seq> = self
            .pending_predictions
            .iter()
            .filter_map(|(seq, p)| {
                p.acked_at_ms
                    .filter(|&t| now_ms.saturating_sub(t) >= grace_ms)
                    .map(|_| *seq)
            })
            .collect();
        for seq in expired {
            self.remove_prediction_cells(seq);
            self.pending_predictions.remove(&seq);
        }
        if self.pending_predictions.is_empty() {
            self.last_prediction_end = None;
        }
        self.dirty = true;
    }

    pub fn clear_prediction_seq(&mut self, seq: Seq) {
        self.remove_prediction_cells(seq);
        self.pending_predictions.remove(&seq);
        if self.pending_predictions.is_empty() {
            self.last_prediction_end = None;
        }
        self.dirty = true;
    }

    pub fn clear_all_predictions(&mut self) {
        self.predictions.clear();
        self.pending_predictions.clear();
        self.last_prediction_end = None;
        self.dirty = true;
    }

    fn remove_prediction_cells(&mut self, seq: Seq) {
        if let Some(p) = self.pending_predictions.get(&seq) {
            let positions = p.positions.clone();
            for pos in positions {
                if let Some(pc) = self.predictions.get(&pos) {
                    if pc.seq == seq {
                        self.predictions.remove(&pos);
                    }
                }
            }
        }
    }

    pub fn has_predictions(&self) -> bool {
        !self.predictions.is_empty()
    }

    pub fn predicted_cell(&self, row: u64, col: usize) -> Option<PredictedCell> {
        self.predictions.get(&(row, col)).copied()
    }

    // ---- tail pad ----

    pub fn mark_tail_pad(&mut self, range: Range<u64>, seq_threshold: Seq) {
        self.tail_pad_ranges.push(range);
        self.tail_pad_seq_threshold = self.tail_pad_seq_threshold.max(seq_threshold);
        self.dirty = true;
    }

    pub fn tail_pad_row_count(&self) -> usize {
        self.tail_pad_ranges
            .iter()
            .map(|r| (r.end - r.start) as usize)
            .sum()
    }

    fn is_tail_pad_redundant(&self, row: u64, start_col: usize, seq: Seq, cells: &[Cell]) -> bool {
        if seq > self.tail_pad_seq_threshold {
            return false;
        }
        if !self.tail_pad_ranges.iter().any(|r| r.contains(&row)) {
            return false;
        }
        let Some(idx) = self.row_index(row) else {
            return false;
        };
        let RowSlot::Loaded { cells: existing, .. } = &self.rows[idx] else {
            return false;
        };
        for (i, cell) in cells.iter().enumerate() {
            let col = start_col + i;
            if col >= existing.len() {
                return false;
            }
            let packed = pack_from_heavy(cell, &self.style_table);
            if existing[col] != packed {
                return false;
            }
        }
        true
    }

    fn prune_tail_pad_row(&mut self, row: u64) {
        let mut changed = false;
        self.tail_pad_ranges.retain_mut(|range| {
            if range.contains(&row) {
                changed = true;
                if range.start == row {
                    range.start += 1;
                } else if range.end == row + 1 {
                    range.end -= 1;
                }
            }
            !range.is_empty()
        });
        if changed && self.tail_pad_ranges.is_empty() {
            self.tail_pad_seq_threshold = 0;
        }
    }

    fn apply_tail_pad_downgrade(&self, rows: &mut [RowSlot], start_abs: u64) {
        for (i, slot) in rows.iter_mut().enumerate() {
            let abs = start_abs + i as u64;
            if self.tail_pad_ranges.iter().any(|r| r.contains(&abs)) {
                *slot = RowSlot::Missing;
            }
        }
    }

    // ---- viewport ----

    pub fn set_viewport(&mut self, top: u64, height: usize) {
        self.viewport_top = top.max(self.base_row);
        self.viewport_height = height;
        self.dirty = true;
    }

    pub fn set_follow_tail(&mut self, follow: bool) {
        self.follow_tail_desired = follow;
        self.dirty = true;
    }

    pub fn visible_rows(&mut self, limit: usize) -> Vec<RowSlot> {
        self.enforce_history_limit();
        if limit == 0 {
            return Vec::new();
        }
        let total_rows = self.rows.len() as u64;
        let rows: Vec<RowSlot> = if self.follow_tail_desired {
            let have = self.rows.len();
            let mut out = Vec::with_capacity(limit);
            let start_abs = if have < limit {
                for _ in 0..(limit - have) {
                    out.push(RowSlot::Missing);
                }
                out.extend(self.rows.iter().cloned());
                self.base_row
            } else {
                out.extend(self.rows.iter().skip(have - limit).cloned());
                self.base_row + (have - limit) as u64
            };
            self.apply_tail_pad_downgrade(&mut out, start_abs);
            out
        } else {
            let max_top = (self.base_row + total_rows)
                .saturating_sub(limit as u64)
                .max(self.base_row);
            let top = self.viewport_top.clamp(self.base_row, max_top);
            let start_idx = (top - self.base_row) as usize;
            let mut out = Vec::with_capacity(limit);
            for i in 0..limit {
                out.push(self.rows.get(start_idx + i).cloned().unwrap_or(RowSlot::Missing));
            }
            self.apply_tail_pad_downgrade(&mut out, top);
            out
        };

        if rows.iter().any(RowSlot::is_loaded) {
            self.last_tail_snapshot = Some(rows.clone());
            rows
        } else {
            self.last_tail_snapshot.clone().unwrap_or(rows)
        }
    }

    // ---- query ----

    pub fn snapshot(&mut self) -> TerminalGridSnapshot {
        self.enforce_history_limit();
        let rows: Vec<RowSlot> = self.rows.iter().cloned().collect();
        if rows.iter().any(RowSlot::is_loaded) {
            self.last_tail_snapshot = Some(rows.clone());
        }
        self.dirty = false;
        TerminalGridSnapshot {
            base_row: self.base_row,
            cols: self.cols,
            history_trimmed: self.history_trimmed,
            rows,
            cursor: self.cursor,
            cursor_authoritative: self.cursor_authoritative,
            has_predictions: self.has_predictions(),
            viewport_top: self.viewport_top,
            viewport_height: self.viewport_height,
            follow_tail_desired: self.follow_tail_desired,
            tail_pad_rows: self.tail_pad_row_count(),
        }
    }

    pub fn get_row(&self, abs: u64) -> Option<&RowSlot> {
        self.row_index(abs).map(|idx| &self.rows[idx])
    }

    pub fn get_row_text(&self, abs: u64) -> Option<String> {
        match self.get_row(abs)? {
            RowSlot::Loaded {
                cells, logical_width, ..
            } => {
                let mut s = String::with_capacity(*logical_width);
                for packed in cells.iter().take(*logical_width) {
                    let (ch, _) = unpack_cell(*packed);
                    s.push(ch);
                }
                Some(s)
            }
            _ => None,
        }
    }

    pub fn first_gap_between(&self, start: u64, end: u64) -> Option<Range<u64>> {
        let mut gap_start: Option<u64> = None;
        for row in start..end {
            let is_gap = match self.row_index(row) {
                None => true,
                Some(idx) => match &self.rows[idx] {
                    RowSlot::Loaded { latest_seq, .. } => *latest_seq == 0,
                    RowSlot::Pending | RowSlot::Missing => true,
                },
            };
            if is_gap {
                if gap_start.is_none() {
                    gap_start = Some(row);
                }
            } else if let Some(s) = gap_start.take() {
                return Some(s..row);
            }
        }
        gap_start.map(|s| s..end)
    }

    // ---- internal helpers ----

    fn row_index(&self, abs: u64) -> Option<usize> {
        if abs < self.base_row {
            return None;
        }
        let idx = (abs - self.base_row) as usize;
        if idx < self.rows.len() { Some(idx) } else { None }
    }

    fn ensure_row(&mut self, abs: u64) -> Option<usize> {
        if abs < self.base_row {
            return None;
        }
        let idx = (abs - self.base_row) as usize;
        while self.rows.len() <= idx {
            self.rows.push_back(RowSlot::Pending);
        }
        Some(idx)
    }

    fn ensure_loaded(&mut self, idx: usize) {
        if !self.rows[idx].is_loaded() {
            self.rows[idx] = RowSlot::Loaded {
                latest_seq: 0,
                cells: vec![pack_cell(' ', StyleId::DEFAULT); self.cols],
                logical_width: 0,
            };
        }
    }

    fn enforce_history_limit(&mut self) {
        while self.rows.len() > self.max_history {
            self.rows.pop_front();
            self.base_row += 1;
            self.history_trimmed = true;
        }
    }
}

fn recompute_logical_width(cells: &[PackedCell]) -> usize {
    for i in (0..cells.len()).rev() {
        let (ch, style) = unpack_cell(cells[i]);
        if !(ch == ' ' && style == StyleId::DEFAULT) {
            return i + 1;
        }
    }
    0
}
