//! Predictive echo controller (C2): decides whether predicted cells are
//! shown and whether they're underlined, based on smoothed round-trip time
//! and "glitch" pressure from unacknowledged sends.
//!
//! Bookkeeping shape (a sequence-keyed map of in-flight sends) follows the
//! teacher's `PredictiveEcho` tracker; the overlay math itself is this
//! system's own SRTT/glitch algorithm and has no teacher counterpart.

use std::collections::BTreeMap;

use crate::cache::Seq;
use crate::config::TerminalViewerConfig;

const QUICK_CONFIRMATION_MS: u64 = 150;
const GLITCH_SLOW_THRESHOLD_MS: u64 = 250;
const GLITCH_STALL_THRESHOLD_MS: u64 = 5000;
const SRTT_FLAG_HYSTERESIS_MS: f64 = 30.0;
const SRTT_TRIGGER_HIGH_MS: f64 = 30.0;
const SRTT_TRIGGER_LOW_MS: f64 = 20.0;

/// Rendering hint for the overlay: whether predictions are shown at all,
/// and whether they're underlined to signal the connection feels slow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OverlayState {
    pub visible: bool,
    pub underline: bool,
}

pub struct PredictiveEchoController {
    srtt_ms: Option<f64>,
    pending: BTreeMap<Seq, u64>,
    srtt_trigger: bool,
    flagging: bool,
    glitch_trigger: u32,
    last_quick_confirmation_ms: Option<u64>,
    overlay: OverlayState,
    srtt_alpha: f64,
    srtt_flag_high_ms: f64,
    srtt_flag_low_ms: f64,
    glitch_flag_threshold: u32,
}

impl PredictiveEchoController {
    pub fn new(config: &TerminalViewerConfig) -> Self {
        PredictiveEchoController {
            srtt_ms: None,
            pending: BTreeMap::new(),
            srtt_trigger: false,
            flagging: false,
            glitch_trigger: 0,
            last_quick_confirmation_ms: None,
            overlay: OverlayState::default(),
            srtt_alpha: config.srtt_alpha,
            srtt_flag_high_ms: config.srtt_flag_threshold_ms,
            srtt_flag_low_ms: (config.srtt_flag_threshold_ms - SRTT_FLAG_HYSTERESIS_MS).max(0.0),
            glitch_flag_threshold: config.glitch_trigger_threshold,
        }
    }

    pub fn overlay(&self) -> OverlayState {
        self.overlay
    }

    /// Record a send. `predicted` distinguishes speculative input (tracked
    /// for SRTT) from non-predictive bytes (ignored here).
    pub fn record_send(&mut self, seq: Seq, now_ms: u64, predicted: bool) -> bool {
        if predicted {
            self.pending.insert(seq, now_ms);
        }
        self.recompute(now_ms)
    }

    pub fn record_ack(&mut self, seq: Seq, now_ms: u64) -> bool {
        if let Some(sent_at) = self.pending.remove(&seq) {
            let sample = now_ms.saturating_sub(sent_at) as f64;
            self.srtt_ms = Some(match self.srtt_ms {
                Some(prev) => prev + self.srtt_alpha * (sample - prev),
                None => sample,
            });
            if self.glitch_trigger > 0
                && sample < GLITCH_SLOW_THRESHOLD_MS as f64
                && self
                    .last_quick_confirmation_ms
                    .is_none_or(|t| now_ms.saturating_sub(t) >= QUICK_CONFIRMATION_MS)
            {
                self.glitch_trigger -= 1;
                self.last_quick_confirmation_ms = Some(now_ms);
            }
        }
        self.recompute(now_ms)
    }

    /// Escalate glitch pressure for sends that have sat unacked too long.
    pub fn tick(&mut self, now_ms: u64) -> bool {
        for &sent_at in self.pending.values() {
            let age = now_ms.saturating_sub(sent_at);
            if age >= GLITCH_STALL_THRESHOLD_MS {
                self.glitch_trigger = self.glitch_trigger.max(20);
            } else if age >= GLITCH_SLOW_THRESHOLD_MS {
                self.glitch_trigger = self.glitch_trigger.max(10);
            }
        }
        self.recompute(now_ms)
    }

    pub fn reset(&mut self, now_ms: u64) -> bool {
        self.srtt_ms = None;
        self.pending.clear();
        self.srtt_trigger = false;
        self.flagging = false;
        self.glitch_trigger = 0;
        self.last_quick_confirmation_ms = None;
        self.recompute(now_ms)
    }

    fn recompute(&mut self, _now_ms: u64) -> bool {
        let srtt = self.srtt_ms.unwrap_or(0.0);

        if srtt > self.srtt_flag_high_ms || self.glitch_trigger > self.glitch_flag_threshold {
            self.flagging = true;
        } else if self.flagging
            && srtt <= self.srtt_flag_low_ms
            && self.glitch_trigger <= self.glitch_flag_threshold
        {
            self.flagging = false;
        }

        if srtt > SRTT_TRIGGER_HIGH_MS || self.glitch_trigger > 0 {
            self.srtt_trigger = true;
        } else if self.srtt_trigger && srtt <= SRTT_TRIGGER_LOW_MS && self.pending.is_empty() {
            self.srtt_trigger = false;
        }

        let visible = !self.pending.is_empty() || self.srtt_trigger || self.glitch_trigger > 0;
        let underline = visible && (self.flagging || self.glitch_trigger > self.glitch_flag_threshold);

        let next = OverlayState { visible, underline };
        let changed = next != self.overlay;
        self.overlay = next;
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn overlay_hidden_with_no_pending_sends() {
        let controller = PredictiveEchoController::new(&TerminalViewerConfig::default());
        assert_eq!(controller.overlay(), OverlayState::default());
    }

    #[test_timeout::timeout]
    fn overlay_visible_while_send_is_pending() {
        let mut controller = PredictiveEchoController::new(&TerminalViewerConfig::default());
        controller.record_send(1, 0, true);
        assert!(controller.overlay().visible);
    }

    #[test_timeout::timeout]
    fn fast_ack_clears_overlay() {
        let mut controller = PredictiveEchoController::new(&TerminalViewerConfig::default());
        controller.record_send(1, 0, true);
        controller.record_ack(1, 10);
        assert_eq!(controller.overlay(), OverlayState::default());
    }

    #[test_timeout::timeout]
    fn stalled_send_flags_glitch_and_underlines() {
        let mut controller = PredictiveEchoController::new(&TerminalViewerConfig::default());
        controller.record_send(1, 0, true);
        controller.tick(5000);
        let overlay = controller.overlay();
        assert!(overlay.visible);
        assert!(overlay.underline);
    }

    #[test_timeout::timeout]
    fn reset_clears_all_state() {
        let mut controller = PredictiveEchoController::new(&TerminalViewerConfig::default());
        controller.record_send(1, 0, true);
        controller.tick(5000);
        controller.reset(6000);
        assert_eq!(controller.overlay(), OverlayState::default());
    }
}
