//! Frame dispatcher (C4): the inbound routing table from wire frames to
//! grid/echo/backfill/viewport operations, and the outbound micro-batched
//! input path.
//!
//! The frame-kind surface is grounded on the teacher's
//! `apps/beach/src/protocol/wire.rs`; the external collaborator boundary
//! (`send`/`is_open`) is grounded on `apps/beach/src/transport/mod.rs`'s
//! `Transport` trait shape (see [`crate::transport`]).

use tracing::{debug, info, trace, warn};

use crate::backfill::{BackfillContext, BackfillController, ViewportPhase as BackfillPhase};
use crate::cache::Seq;
use crate::cache::terminal::packed::{PackedCell, Style as PackedStyle, StyleTable, unpack_to_heavy};
use crate::cache::terminal::{ApplyContext, TerminalGrid, TerminalGridSnapshot};
use crate::config::TerminalViewerConfig;
use crate::echo::PredictiveEchoController;
use crate::input::is_predictive_chunk;
use crate::model::terminal::update::Update;
use crate::protocol::{ClientFrame, FEATURE_CURSOR_SYNC, HostFrame, WireUpdate};
use crate::telemetry::{NoopSink, TelemetrySink};
use crate::viewport::{ViewportController, ViewportPhase};

const RESIZE_MIN_ROWS: u32 = 2;
const RESIZE_MAX_ROWS: u32 = 512;
const DEFAULT_HOST_COLS: u32 = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Applied { mutated: bool },
    Rejected,
    Noop,
}

pub struct FrameDispatcher {
    grid: TerminalGrid,
    echo: PredictiveEchoController,
    backfill: BackfillController,
    viewport: ViewportController,
    config: TerminalViewerConfig,

    subscription: Option<u32>,
    cursor_feature_enabled: bool,
    host_cols: Option<u32>,
    host_viewport_rows: Option<u32>,
    closed: bool,
    hydrated_rows: bool,

    next_input_seq: Seq,
    pending_input: Vec<(Seq, Vec<u8>)>,
    pending_input_since_ms: Option<u64>,
    input_flush_delay_ms: u64,
    input_flush_max_bytes: usize,

    telemetry: Box<dyn TelemetrySink>,
}

impl FrameDispatcher {
    pub fn new(cols: usize, config: TerminalViewerConfig) -> Self {
        FrameDispatcher {
            grid: TerminalGrid::with_max_history(cols, config.max_history),
            echo: PredictiveEchoController::new(&config),
            backfill: BackfillController::new(&config),
            viewport: ViewportController::new(&config),
            config,
            subscription: None,
            cursor_feature_enabled: false,
            host_cols: None,
            host_viewport_rows: None,
            closed: false,
            hydrated_rows: false,
            next_input_seq: 0,
            pending_input: Vec::new(),
            pending_input_since_ms: None,
            input_flush_delay_ms: config.input_flush_delay_ms,
            input_flush_max_bytes: config.input_flush_max_bytes,
            telemetry: Box::new(NoopSink),
        }
    }

    /// Inject a telemetry sink (see [`crate::telemetry`]); the embedding host
    /// owns the sink's lifecycle, the dispatcher only ever borrows it.
    pub fn set_telemetry_sink(&mut self, sink: Box<dyn TelemetrySink>) {
        self.telemetry = sink;
    }

    pub fn grid(&self) -> &TerminalGrid {
        &self.grid
    }

    pub fn grid_mut(&mut self) -> &mut TerminalGrid {
        &mut self.grid
    }

    pub fn viewport(&self) -> &ViewportController {
        &self.viewport
    }

    pub fn snapshot(&mut self) -> TerminalGridSnapshot {
        self.grid.snapshot()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// The host PTY's own viewport row count, last reported on a `grid`
    /// frame; consulted by the external sizing strategy for a
    /// match-host-size control, not used internally.
    pub fn host_viewport_rows(&self) -> Option<u32> {
        self.host_viewport_rows
    }

    // ---- inbound ----

    pub fn handle_host_frame(&mut self, frame: &HostFrame, now_ms: u64) -> DispatchOutcome {
        match frame {
            HostFrame::Hello {
                subscription,
                features,
            } => {
                info!(target: "dispatch", subscription, features, "hello");
                self.grid.reset();
                self.subscription = Some(*subscription);
                self.cursor_feature_enabled = features & FEATURE_CURSOR_SYNC != 0;
                self.grid.enable_cursor_support(self.cursor_feature_enabled);
                self.host_cols = None;
                self.hydrated_rows = false;
                self.echo.reset(now_ms);
                self.backfill.handle_hello(*subscription);
                self.viewport = ViewportController::new(&self.config);
                DispatchOutcome::Applied { mutated: true }
            }
            HostFrame::Grid {
                base_row,
                history_rows,
                cols,
                viewport_rows,
            } => {
                self.reconcile_grid_frame(*base_row, *history_rows, *cols);
                self.host_cols = Some(*cols);
                self.host_viewport_rows = *viewport_rows;
                DispatchOutcome::Applied { mutated: true }
            }
            HostFrame::Snapshot { updates, cursor } => {
                let mutated = self.apply_wire_updates(updates, true);
                if let Some(c) = cursor {
                    self.grid.apply_cursor_frame(c.row, c.col as usize, c.seq, c.visible, c.blink);
                }
                self.hydrated_rows = self.hydrated_rows || mutated;
                self.viewport.exit_hydration(0);
                self.notify_backfill(now_ms);
                DispatchOutcome::Applied { mutated }
            }
            HostFrame::Delta { updates, cursor } => {
                let mutated = self.apply_wire_updates(updates, false);
                if let Some(c) = cursor {
                    self.grid.apply_cursor_frame(c.row, c.col as usize, c.seq, c.visible, c.blink);
                }
                self.viewport.exit_hydration(0);
                self.notify_backfill(now_ms);
                DispatchOutcome::Applied { mutated }
            }
            HostFrame::HistoryBackfill {
                range_start,
                range_end,
                updates,
                cursor,
            } => {
                let mutated = self.apply_wire_updates(updates, true);
                if let Some(c) = cursor {
                    self.grid.apply_cursor_frame(c.row, c.col as usize, c.seq, c.visible, c.blink);
                }
                self.backfill.finalize_history_backfill(*range_start, *range_end);
                self.hydrated_rows = self.hydrated_rows || mutated;
                self.notify_backfill(now_ms);
                DispatchOutcome::Applied { mutated }
            }
            HostFrame::SnapshotComplete => {
                self.viewport.exit_hydration(0);
                DispatchOutcome::Noop
            }
            HostFrame::Cursor { cursor } => {
                self.grid
                    .apply_cursor_frame(cursor.row, cursor.col as usize, cursor.seq, cursor.visible, cursor.blink);
                DispatchOutcome::Applied { mutated: true }
            }
            HostFrame::InputAck { seq } => {
                self.grid.ack_prediction(*seq, now_ms);
                self.echo.record_ack(*seq, now_ms);
                DispatchOutcome::Noop
            }
            HostFrame::Heartbeat { .. } => DispatchOutcome::Noop,
            HostFrame::Shutdown => {
                info!(target: "dispatch", "shutdown");
                self.closed = true;
                self.backfill.handle_shutdown();
                DispatchOutcome::Noop
            }
        }
    }

    fn reconcile_grid_frame(&mut self, host_base_row: u64, history_rows: u32, cols: u32) {
        let before_base = self.grid.base_row();
        let before_total = self.grid.snapshot().rows.len() as u64;
        let before_range = (before_total > 0).then(|| before_base..before_base + before_total);
        let host_range =
            (history_rows > 0).then(|| host_base_row..host_base_row + history_rows as u64);

        // Union of the two *non-empty* row ranges: an empty host range must
        // not stretch the grid out to `host_base_row`.
        let (new_base, new_end) = match (before_range, host_range) {
            (Some(b), Some(h)) => (b.start.min(h.start), b.end.max(h.end)),
            (Some(b), None) if self.hydrated_rows => (b.start, b.end),
            (Some(_), None) | (None, None) => (0, 0),
            (None, Some(h)) => (h.start, h.end),
        };

        let target_total = new_end.saturating_sub(new_base);
        self.grid.set_base_row(new_base);
        self.grid.set_grid_size(target_total, cols as usize);
        debug!(target: "dispatch", base_row = new_base, total_rows = target_total, cols, "grid reconciled");
    }

    fn apply_wire_updates(&mut self, updates: &[WireUpdate], authoritative: bool) -> bool {
        let converted: Vec<Update> = {
            let style_table = self.grid.style_table();
            updates
                .iter()
                .filter_map(|u| unpack_wire_update(u, style_table))
                .collect()
        };
        if converted.len() != updates.len() {
            let dropped = (updates.len() - converted.len()) as u64;
            warn!(target: "dispatch", dropped, "malformed update dropped");
            self.telemetry.record_count("updates_dropped", dropped);
        }
        self.telemetry.record_count("updates_applied", converted.len() as u64);
        let ctx = if authoritative {
            ApplyContext::authoritative()
        } else {
            ApplyContext::speculative()
        };
        self.grid.apply_updates(&converted, ctx)
    }

    fn notify_backfill(&mut self, _now_ms: u64) {
        let follow_tail = self.viewport.effective_follow_tail();
        self.grid.set_follow_tail(follow_tail);

        let snapshot = self.grid.snapshot();
        let phase = match self.viewport.phase() {
            ViewportPhase::Hydrating => BackfillPhase::Hydrating,
            ViewportPhase::FollowTail => BackfillPhase::FollowTail,
            ViewportPhase::ManualScrollback => BackfillPhase::ManualScrollback,
            ViewportPhase::CatchingUp => BackfillPhase::CatchingUp,
        };
        self.telemetry
            .record_gauge("tail_pad_rows", snapshot.tail_pad_rows as u64);
        let ctx = BackfillContext {
            near_bottom: follow_tail,
            follow_tail_desired: follow_tail,
            phase,
            tail_padding_rows: snapshot.tail_pad_rows,
        };
        if let Some(request) = self.backfill.maybe_request(&snapshot, &ctx) {
            trace!(target: "backfill", start = request.start_row, count = request.count, "requesting backfill");
        }
    }

    /// Drive the per-animation-frame housekeeping: escalates predictive-echo
    /// glitch pressure for sends that have sat unacked too long, and prunes
    /// predictions that were acked more than the configured grace period ago.
    pub fn tick(&mut self, now_ms: u64) {
        self.echo.tick(now_ms);
        self.grid
            .prune_acked_predictions(now_ms, self.config.prediction_ack_grace_ms);
        self.telemetry
            .record_gauge("echo_overlay_visible", self.echo.overlay().visible as u64);
    }

    // ---- outbound ----

    /// Queue bytes for the next micro-batched `input` flush. Returns the
    /// allocated input sequence, and records the send with the echo
    /// controller if the chunk is predictive.
    pub fn queue_input(&mut self, bytes: &[u8], now_ms: u64) -> Seq {
        let seq = self.next_input_seq;
        self.next_input_seq += 1;
        if self.pending_input_since_ms.is_none() {
            self.pending_input_since_ms = Some(now_ms);
        }
        self.pending_input.push((seq, bytes.to_vec()));
        if is_predictive_chunk(bytes) {
            self.grid.register_prediction(seq, bytes);
            self.echo.record_send(seq, now_ms, true);
        } else {
            self.echo.record_send(seq, now_ms, false);
        }
        seq
    }

    /// Flush pending input if the flush delay has elapsed or the buffer has
    /// grown past the size cap, producing size-capped frames. Each emitted
    /// frame carries the seq it was enqueued under, so a later `input_ack`
    /// matches the prediction/echo bookkeeping recorded at enqueue time.
    pub fn flush_input_if_due(&mut self, now_ms: u64) -> Vec<ClientFrame> {
        let pending_bytes: usize = self.pending_input.iter().map(|(_, b)| b.len()).sum();
        let due_by_time = self
            .pending_input_since_ms
            .is_some_and(|since| now_ms.saturating_sub(since) >= self.input_flush_delay_ms);
        let due_by_size = pending_bytes >= self.input_flush_max_bytes;
        if self.pending_input.is_empty() || !(due_by_time || due_by_size) {
            return Vec::new();
        }

        let mut frames = Vec::new();
        let queued = std::mem::take(&mut self.pending_input);
        self.pending_input_since_ms = None;
        for (seq, bytes) in queued {
            if bytes.len() <= self.input_flush_max_bytes {
                frames.push(ClientFrame::Input { seq, data: bytes });
            } else {
                for chunk in bytes.chunks(self.input_flush_max_bytes) {
                    frames.push(ClientFrame::Input {
                        seq,
                        data: chunk.to_vec(),
                    });
                }
            }
        }
        frames
    }

    pub fn request_host_resize(&self, rows: u32, cols: Option<u32>) -> ClientFrame {
        let clamped_rows = rows.clamp(RESIZE_MIN_ROWS, RESIZE_MAX_ROWS);
        let resolved_cols = cols.unwrap_or_else(|| self.host_cols.unwrap_or(DEFAULT_HOST_COLS));
        ClientFrame::Resize {
            cols: resolved_cols,
            rows: clamped_rows,
        }
    }

    pub fn request_backfill(&self, start_row: u64, count: u32) -> ClientFrame {
        ClientFrame::RequestBackfill { start_row, count }
    }
}

fn unpack_wire_update(update: &WireUpdate, style_table: &StyleTable) -> Option<Update> {
    match update {
        WireUpdate::Cell { row, col, seq, cell } => Some(Update::Cell {
            row: *row,
            col: *col as usize,
            seq: *seq,
            cell: unpack_to_heavy(PackedCell::from_raw(*cell), style_table),
        }),
        WireUpdate::Row { row, seq, cells } => Some(Update::Row {
            row: *row,
            seq: *seq,
            cells: cells
                .iter()
                .map(|&c| unpack_to_heavy(PackedCell::from_raw(c), style_table))
                .collect(),
        }),
        WireUpdate::RowSegment {
            row,
            start_col,
            seq,
            cells,
        } => Some(Update::RowSegment {
            row: *row,
            start_col: *start_col as usize,
            seq: *seq,
            cells: cells
                .iter()
                .map(|&c| unpack_to_heavy(PackedCell::from_raw(c), style_table))
                .collect(),
        }),
        WireUpdate::Rect {
            row_start,
            row_end,
            col_start,
            col_end,
            seq,
            cell,
        } => Some(Update::Rect {
            row_start: *row_start,
            row_end: *row_end,
            col_start: *col_start as usize,
            col_end: *col_end as usize,
            seq: *seq,
            cell: unpack_to_heavy(PackedCell::from_raw(*cell), style_table),
        }),
        WireUpdate::Trim { start, count } => Some(Update::Trim {
            start: *start,
            count: *count,
        }),
        WireUpdate::Style { id, seq, fg, bg, attrs } => Some(Update::Style {
            id: *id,
            seq: *seq,
            style: PackedStyle {
                fg: *fg,
                bg: *bg,
                attrs: *attrs,
            },
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::terminal::packed::{StyleId, pack_cell};
    use crate::telemetry::TracingSink;

    fn wire_row(row: u64, seq: u64, text: &str) -> WireUpdate {
        let cells = text
            .chars()
            .map(|ch| pack_cell(ch, StyleId::DEFAULT).into_raw())
            .collect();
        WireUpdate::Row { row, seq, cells }
    }

    #[test_timeout::timeout]
    fn hello_resets_grid_and_records_subscription() {
        let mut dispatcher = FrameDispatcher::new(80, TerminalViewerConfig::default());
        dispatcher.handle_host_frame(
            &HostFrame::Hello {
                subscription: 7,
                features: FEATURE_CURSOR_SYNC,
            },
            0,
        );
        assert_eq!(dispatcher.subscription, Some(7));
        assert!(dispatcher.cursor_feature_enabled);
    }

    #[test_timeout::timeout]
    fn snapshot_frame_applies_authoritatively() {
        let mut dispatcher = FrameDispatcher::new(80, TerminalViewerConfig::default());
        dispatcher.handle_host_frame(
            &HostFrame::Hello {
                subscription: 1,
                features: 0,
            },
            0,
        );
        let outcome = dispatcher.handle_host_frame(
            &HostFrame::Snapshot {
                updates: vec![wire_row(0, 1, "hi")],
                cursor: None,
            },
            0,
        );
        assert_eq!(outcome, DispatchOutcome::Applied { mutated: true });
        assert_eq!(dispatcher.grid().get_row_text(0), Some("hi".to_string()));
    }

    #[test_timeout::timeout]
    fn scenario_a_grid_handshake_with_prehydrated_history() {
        let mut dispatcher = FrameDispatcher::new(80, TerminalViewerConfig::default());
        dispatcher.handle_host_frame(
            &HostFrame::Hello {
                subscription: 1,
                features: 0,
            },
            0,
        );
        let rows: Vec<WireUpdate> = (0..153).map(|r| wire_row(r, 1, "x")).collect();
        dispatcher.handle_host_frame(
            &HostFrame::Snapshot {
                updates: rows,
                cursor: None,
            },
            0,
        );
        dispatcher.handle_host_frame(
            &HostFrame::Grid {
                base_row: 91,
                history_rows: 62,
                cols: 80,
                viewport_rows: Some(24),
            },
            0,
        );
        let snapshot = dispatcher.snapshot();
        assert_eq!(snapshot.base_row, 0);
        assert!(snapshot.rows.len() >= 153);
        assert!(snapshot.rows[0].is_loaded());
    }

    #[test_timeout::timeout]
    fn scenario_b_grid_frame_with_no_history() {
        let mut dispatcher = FrameDispatcher::new(153, TerminalViewerConfig::default());
        dispatcher.handle_host_frame(
            &HostFrame::Hello {
                subscription: 1,
                features: 0,
            },
            0,
        );
        dispatcher.handle_host_frame(
            &HostFrame::Grid {
                base_row: 62,
                history_rows: 0,
                cols: 153,
                viewport_rows: Some(6),
            },
            0,
        );
        let snapshot = dispatcher.snapshot();
        assert_eq!(snapshot.base_row, 0);
        assert_eq!(snapshot.rows.len(), 0);
    }

    #[test_timeout::timeout]
    fn malformed_cursor_fields_do_not_panic_decode() {
        let mut dispatcher = FrameDispatcher::new(10, TerminalViewerConfig::default());
        dispatcher.handle_host_frame(
            &HostFrame::Hello {
                subscription: 1,
                features: FEATURE_CURSOR_SYNC,
            },
            0,
        );
        let outcome = dispatcher.handle_host_frame(
            &HostFrame::Cursor {
                cursor: crate::protocol::WireCursor {
                    row: 0,
                    col: 3,
                    seq: 1,
                    visible: true,
                    blink: false,
                },
            },
            0,
        );
        assert_eq!(outcome, DispatchOutcome::Applied { mutated: true });
    }

    #[test_timeout::timeout]
    fn input_queue_flushes_after_delay_and_registers_prediction() {
        let mut dispatcher = FrameDispatcher::new(10, TerminalViewerConfig::default());
        let seq = dispatcher.queue_input(b"a", 0);
        assert!(dispatcher.flush_input_if_due(1).is_empty());
        let frames = dispatcher.flush_input_if_due(2);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0], ClientFrame::Input { seq, data: b"a".to_vec() });
        assert!(dispatcher.grid().has_predictions());
    }

    #[test_timeout::timeout]
    fn flushed_input_frame_seq_acks_the_registered_prediction() {
        let mut dispatcher = FrameDispatcher::new(10, TerminalViewerConfig::default());
        let seq = dispatcher.queue_input(b"a", 0);
        let frames = dispatcher.flush_input_if_due(2);
        let ClientFrame::Input { seq: frame_seq, .. } = frames[0] else {
            panic!("expected an Input frame");
        };
        dispatcher.handle_host_frame(&HostFrame::InputAck { seq: frame_seq }, 10);
        assert_eq!(frame_seq, seq);
        assert!(!dispatcher.grid().has_predictions());
    }

    #[test_timeout::timeout]
    fn tick_prunes_acked_predictions_after_grace_period() {
        let mut dispatcher = FrameDispatcher::new(10, TerminalViewerConfig::default());
        dispatcher.queue_input(b"a", 0);
        let frames = dispatcher.flush_input_if_due(2);
        let ClientFrame::Input { seq, .. } = frames[0] else {
            panic!("expected an Input frame");
        };
        dispatcher.handle_host_frame(&HostFrame::InputAck { seq }, 100);
        assert!(dispatcher.grid().has_predictions());
        dispatcher.tick(100 + dispatcher.config.prediction_ack_grace_ms + 1);
        assert!(!dispatcher.grid().has_predictions());
    }

    #[test_timeout::timeout]
    fn oversized_input_flushes_immediately_in_capped_chunks() {
        let mut dispatcher = FrameDispatcher::new(10, TerminalViewerConfig::default());
        let big = vec![b'a'; dispatcher.input_flush_max_bytes + 10];
        dispatcher.queue_input(&big, 0);
        let frames = dispatcher.flush_input_if_due(0);
        assert_eq!(frames.len(), 2);
    }

    #[test_timeout::timeout]
    fn scenario_f_resize_clamp_and_columns() {
        let dispatcher = FrameDispatcher::new(80, TerminalViewerConfig::default());
        let low = dispatcher.request_host_resize(1, None);
        assert_eq!(low, ClientFrame::Resize { cols: 80, rows: 2 });
        let high = dispatcher.request_host_resize(999, Some(12));
        assert_eq!(high, ClientFrame::Resize { cols: 12, rows: 512 });
    }

    #[test_timeout::timeout]
    fn tracing_sink_can_be_injected_in_place_of_the_default_noop_sink() {
        let mut dispatcher = FrameDispatcher::new(10, TerminalViewerConfig::default());
        dispatcher.set_telemetry_sink(Box::new(TracingSink));
        dispatcher.handle_host_frame(
            &HostFrame::Hello {
                subscription: 1,
                features: 0,
            },
            0,
        );
        // Exercises the sink through the snapshot-apply and tick paths; a
        // `tracing` subscriber (if any) receives the debug events, nothing
        // panics without one installed.
        dispatcher.handle_host_frame(
            &HostFrame::Snapshot {
                updates: vec![wire_row(0, 1, "hi")],
                cursor: None,
            },
            0,
        );
        dispatcher.tick(1);
    }

    #[test_timeout::timeout]
    fn shutdown_marks_closed() {
        let mut dispatcher = FrameDispatcher::new(10, TerminalViewerConfig::default());
        dispatcher.handle_host_frame(&HostFrame::Shutdown, 0);
        assert!(dispatcher.is_closed());
    }
}
