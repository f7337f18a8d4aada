//! Broader end-to-end scenarios wired through the public API surface
//! (dispatcher + cache + controllers together), rather than internals.

use beach_term_viewer_core::cache::terminal::packed::{StyleId, StyleTable, pack_cell, unpack_to_heavy};
use beach_term_viewer_core::cache::terminal::{ApplyContext, PredictedCell};
use beach_term_viewer_core::model::terminal::update::Update;
use beach_term_viewer_core::viewport::{ScrollSnapshot, ViewportController, ViewportPhase};
use beach_term_viewer_core::{TerminalGrid, TerminalViewerConfig};

fn row_update(row: u64, seq: u64, text: &str) -> Update {
    let styles = StyleTable::new();
    Update::Row {
        row,
        seq,
        cells: text
            .chars()
            .map(|ch| unpack_to_heavy(pack_cell(ch, StyleId::DEFAULT), &styles))
            .collect(),
    }
}

#[test_timeout::timeout]
fn scenario_c_predictive_echo_visibility_on_hidden_prediction() {
    let mut grid = TerminalGrid::new(10);
    grid.apply_updates(&[row_update(0, 1, "> ")], ApplyContext::authoritative());
    grid.register_prediction(1, b"a");

    assert!(grid.has_predictions());
    assert_eq!(grid.predicted_cell(0, 2), Some(PredictedCell { ch: 'a', seq: 1 }));

    grid.ack_prediction(1, 100);
    grid.prune_acked_predictions(190, 90);
    assert!(grid.has_predictions(), "grace period has not elapsed yet");

    grid.apply_updates(&[row_update(0, 2, "> ")], ApplyContext::authoritative());
    grid.prune_acked_predictions(230, 90);
    assert!(!grid.has_predictions());
    assert_eq!(grid.predicted_cell(0, 2), None);
}

#[test_timeout::timeout]
fn scenario_d_follow_tail_exits_on_manual_scroll_up() {
    let mut viewport = ViewportController::new(&TerminalViewerConfig::default());
    viewport.exit_hydration(0);
    assert_eq!(viewport.phase(), ViewportPhase::FollowTail);
    assert!(viewport.effective_follow_tail());

    let at_tail = ScrollSnapshot {
        scroll_top_px: 1000.0,
        client_height_px: 400.0,
    };
    viewport.classify_scroll(at_tail, 20.0, 2000.0);

    let scrolled_up = ScrollSnapshot {
        scroll_top_px: 995.0,
        client_height_px: 400.0,
    };
    viewport.classify_scroll(scrolled_up, 20.0, 2000.0);

    assert_eq!(viewport.phase(), ViewportPhase::ManualScrollback);
    assert!(!viewport.effective_follow_tail());
}

#[test_timeout::timeout]
fn scenario_e_predictive_backspace_into_prompt_is_blocked() {
    let mut grid = TerminalGrid::new(20);
    grid.enable_cursor_support(true);
    grid.apply_updates(
        &[row_update(0, 1, "(base) user@host %")],
        ApplyContext::authoritative(),
    );
    grid.apply_cursor_frame(0, 18, 2, true, false);

    grid.register_prediction(3, &[0x7f]);

    assert!(!grid.has_predictions());
    let cursor = grid.snapshot().cursor;
    assert_eq!(cursor.col, 18);
}
