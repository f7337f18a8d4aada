//! Viewport / follow-tail controller (C5): a thin policy layer over the
//! grid cache's viewport state. It decides, per scroll event and per commit
//! tick, whether the renderer should stay glued to the tail, honor a manual
//! scroll position, or animate a catch-up while history fills in.
//!
//! Per the cache-vs-viewport ownership design note, the cache remains
//! authoritative for `top`/`height`/`followTail`; this controller only calls
//! `set_viewport`/`set_follow_tail` after deciding, and never holds its own
//! copy of cache state across calls. Scroll-offset bookkeeping concepts
//! (current top, content reflow detection) are grounded on the shape of the
//! teacher's `GridRenderer` in `apps/beach/src/client/grid_renderer.rs`,
//! though no code from it is reused verbatim — that renderer owns pixel-level
//! rendering this crate doesn't.

use crate::config::TerminalViewerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewportPhase {
    Hydrating,
    FollowTail,
    ManualScrollback,
    CatchingUp,
}

#[derive(Debug, Clone, Copy)]
pub struct ScrollSnapshot {
    pub scroll_top_px: f64,
    pub client_height_px: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollClassification {
    Programmatic,
    UserAway,
    AtTail,
    Unclassified,
}

#[derive(Debug, Clone, Copy)]
pub struct TerminalViewportProposal {
    pub viewport_rows: usize,
    pub measured_rows: usize,
    pub fallback_rows: usize,
}

/// A committed viewport change pending emission as an outbound `resize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewportCommit {
    pub rows: usize,
    pub should_resize_host: bool,
}

pub struct ViewportController {
    phase: ViewportPhase,
    follow_tail_desired: bool,
    programmatic_scroll: bool,
    last_scroll: Option<ScrollSnapshot>,
    pending_proposal: Option<usize>,
    pending_since_ms: Option<u64>,
    committed_rows: Option<usize>,
    commit_debounce_ms: u64,
    commit_tolerance_rows: usize,
    auto_resize_host: bool,
}

impl ViewportController {
    pub fn new(config: &TerminalViewerConfig) -> Self {
        ViewportController {
            phase: ViewportPhase::Hydrating,
            follow_tail_desired: true,
            programmatic_scroll: false,
            last_scroll: None,
            pending_proposal: None,
            pending_since_ms: None,
            committed_rows: None,
            commit_debounce_ms: config.viewport_commit_debounce_ms,
            commit_tolerance_rows: config.viewport_commit_tolerance_rows,
            auto_resize_host: config.enable_implicit_host_resize,
        }
    }

    pub fn phase(&self) -> ViewportPhase {
        self.phase
    }

    /// The follow-tail value that should be fed to the grid cache.
    pub fn effective_follow_tail(&self) -> bool {
        if matches!(self.phase, ViewportPhase::Hydrating) {
            return false;
        }
        self.follow_tail_desired && !matches!(self.phase, ViewportPhase::ManualScrollback)
    }

    pub fn set_follow_tail_desired(&mut self, desired: bool) {
        self.follow_tail_desired = desired;
    }

    pub fn exit_hydration(&mut self, tail_padding_rows: usize) {
        if !matches!(self.phase, ViewportPhase::Hydrating) {
            return;
        }
        self.phase = if self.follow_tail_desired && tail_padding_rows > 0 {
            ViewportPhase::CatchingUp
        } else if self.follow_tail_desired {
            ViewportPhase::FollowTail
        } else {
            ViewportPhase::ManualScrollback
        };
    }

    pub fn note_tail_padding(&mut self, tail_padding_rows: usize) {
        match self.phase {
            ViewportPhase::FollowTail if tail_padding_rows > 0 => {
                self.phase = ViewportPhase::CatchingUp;
            }
            ViewportPhase::CatchingUp if tail_padding_rows == 0 => {
                self.phase = ViewportPhase::FollowTail;
            }
            _ => {}
        }
    }

    pub fn begin_programmatic_scroll(&mut self) {
        self.programmatic_scroll = true;
    }

    /// Explicit "jump to tail": re-enters tail intent and clears the
    /// programmatic-scroll guard once the caller's scroll has landed.
    pub fn jump_to_tail(&mut self) {
        self.follow_tail_desired = true;
        if !matches!(self.phase, ViewportPhase::Hydrating) {
            self.phase = ViewportPhase::FollowTail;
        }
        self.programmatic_scroll = true;
    }

    pub fn end_programmatic_scroll(&mut self) {
        self.programmatic_scroll = false;
    }

    pub fn classify_scroll(
        &mut self,
        snapshot: ScrollSnapshot,
        row_height_px: f64,
        content_height_px: f64,
    ) -> ScrollClassification {
        let previous = self.last_scroll.replace(snapshot);

        let reflowed = previous
            .map(|p| (snapshot.client_height_px - p.client_height_px).abs() > 0.25 * row_height_px)
            .unwrap_or(false);

        if self.programmatic_scroll || reflowed {
            return ScrollClassification::Programmatic;
        }

        let delta_top = previous
            .map(|p| snapshot.scroll_top_px - p.scroll_top_px)
            .unwrap_or(0.0);
        let epsilon = 0.5;

        let remaining_px =
            (content_height_px - snapshot.scroll_top_px - snapshot.client_height_px).max(0.0);
        let at_tail = remaining_px <= 2.0 * row_height_px;

        if at_tail {
            return ScrollClassification::AtTail;
        }
        if delta_top < -epsilon {
            if matches!(self.phase, ViewportPhase::FollowTail) {
                self.phase = ViewportPhase::ManualScrollback;
            }
            return ScrollClassification::UserAway;
        }
        ScrollClassification::Unclassified
    }

    /// Two-arg `shouldReenableFollowTail` contract (the open question
    /// resolution recorded in `DESIGN.md`): whether the remaining distance to
    /// the tail is within tolerance to treat the view as "at tail" again.
    pub fn should_reenable_follow_tail(&self, remaining_pixels: f64, line_height_px: f64) -> bool {
        let tolerance = (2.0 * line_height_px).ceil().max(1.0);
        remaining_pixels <= tolerance
    }

    /// Propose a new viewport row count from the sizing strategy; returns a
    /// commit once the debounce interval has elapsed with a stable proposal.
    pub fn propose_viewport(
        &mut self,
        proposal: TerminalViewportProposal,
        now_ms: u64,
    ) -> Option<ViewportCommit> {
        let candidate = proposal.viewport_rows;

        if let Some(committed) = self.committed_rows {
            if candidate.abs_diff(committed) <= self.commit_tolerance_rows {
                self.pending_proposal = None;
                self.pending_since_ms = None;
                return None;
            }
        }

        match self.pending_proposal {
            Some(pending) if candidate.abs_diff(pending) <= self.commit_tolerance_rows => {}
            _ => {
                self.pending_proposal = Some(candidate);
                self.pending_since_ms = Some(now_ms);
            }
        }

        let elapsed = self
            .pending_since_ms
            .map(|since| now_ms.saturating_sub(since))
            .unwrap_or(0);
        if elapsed < self.commit_debounce_ms {
            return None;
        }

        let rows = self.pending_proposal.take()?;
        self.pending_since_ms = None;
        self.committed_rows = Some(rows);
        Some(ViewportCommit {
            rows,
            should_resize_host: self.auto_resize_host,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn hydration_forces_follow_tail_false() {
        let controller = ViewportController::new(&TerminalViewerConfig::default());
        assert_eq!(controller.phase(), ViewportPhase::Hydrating);
        assert!(!controller.effective_follow_tail());
    }

    #[test_timeout::timeout]
    fn exits_hydration_into_follow_tail_when_no_padding() {
        let mut controller = ViewportController::new(&TerminalViewerConfig::default());
        controller.exit_hydration(0);
        assert_eq!(controller.phase(), ViewportPhase::FollowTail);
        assert!(controller.effective_follow_tail());
    }

    #[test_timeout::timeout]
    fn exits_hydration_into_catching_up_with_padding() {
        let mut controller = ViewportController::new(&TerminalViewerConfig::default());
        controller.exit_hydration(5);
        assert_eq!(controller.phase(), ViewportPhase::CatchingUp);
        controller.note_tail_padding(0);
        assert_eq!(controller.phase(), ViewportPhase::FollowTail);
    }

    #[test_timeout::timeout]
    fn user_scroll_up_exits_follow_tail() {
        let mut controller = ViewportController::new(&TerminalViewerConfig::default());
        controller.exit_hydration(0);
        let first = ScrollSnapshot {
            scroll_top_px: 1000.0,
            client_height_px: 400.0,
        };
        controller.classify_scroll(first, 20.0, 2000.0);
        let scrolled_up = ScrollSnapshot {
            scroll_top_px: 900.0,
            client_height_px: 400.0,
        };
        let classification = controller.classify_scroll(scrolled_up, 20.0, 2000.0);
        assert_eq!(classification, ScrollClassification::UserAway);
        assert_eq!(controller.phase(), ViewportPhase::ManualScrollback);
        assert!(!controller.effective_follow_tail());
    }

    #[test_timeout::timeout]
    fn jump_to_tail_reenters_follow_tail() {
        let mut controller = ViewportController::new(&TerminalViewerConfig::default());
        controller.exit_hydration(0);
        controller.phase = ViewportPhase::ManualScrollback;
        controller.jump_to_tail();
        assert_eq!(controller.phase(), ViewportPhase::FollowTail);
        assert!(controller.effective_follow_tail());
    }

    #[test_timeout::timeout]
    fn small_proposal_delta_is_dropped_as_noise() {
        let mut controller = ViewportController::new(&TerminalViewerConfig::default());
        let commit = controller.propose_viewport(
            TerminalViewportProposal {
                viewport_rows: 24,
                measured_rows: 24,
                fallback_rows: 24,
            },
            0,
        );
        assert!(commit.is_none() || commit.unwrap().rows == 24);
        let _ = controller.propose_viewport(
            TerminalViewportProposal {
                viewport_rows: 24,
                measured_rows: 24,
                fallback_rows: 24,
            },
            200,
        );
        let commit = controller.propose_viewport(
            TerminalViewportProposal {
                viewport_rows: 25,
                measured_rows: 25,
                fallback_rows: 25,
            },
            250,
        );
        assert!(commit.is_none());
    }

    #[test_timeout::timeout]
    fn stable_proposal_commits_after_debounce() {
        let mut controller = ViewportController::new(&TerminalViewerConfig::default());
        assert!(controller
            .propose_viewport(
                TerminalViewportProposal {
                    viewport_rows: 40,
                    measured_rows: 40,
                    fallback_rows: 40,
                },
                0,
            )
            .is_none());
        let commit = controller.propose_viewport(
            TerminalViewportProposal {
                viewport_rows: 40,
                measured_rows: 40,
                fallback_rows: 40,
            },
            150,
        );
        assert_eq!(
            commit,
            Some(ViewportCommit {
                rows: 40,
                should_resize_host: false,
            })
        );
    }

    #[test_timeout::timeout]
    fn should_reenable_uses_two_line_height_tolerance() {
        let controller = ViewportController::new(&TerminalViewerConfig::default());
        assert!(controller.should_reenable_follow_tail(10.0, 8.0));
        assert!(!controller.should_reenable_follow_tail(30.0, 8.0));
    }
}
