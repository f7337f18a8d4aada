//! External transport boundary.
//!
//! The WebRTC data channel itself is out of scope (see `SPEC_FULL.md` §1): this
//! module only defines the trait shape the dispatcher programs against,
//! mirroring the teacher's `Transport` trait in `apps/beach/src/transport/mod.rs`
//! — but synchronous and event-driven rather than `async_trait`-based, since
//! this crate owns no concrete transport and pulls in no async runtime.

use crate::protocol::{ClientFrame, HostFrame};

/// Connection/approval lifecycle surfaced by the transport, named after the
/// `beach:status:*` strings the teacher's transport emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportStatus {
    ApprovalPending,
    Granted,
    Denied,
    Open,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Frame(HostFrame),
    Status(TransportStatus),
    Open,
    Close,
    Error(String),
}

/// A sink the transport delivers events to. Kept as a trait (rather than a
/// channel type) so embedding hosts can wire it to whatever event loop they
/// already run.
pub trait TransportEventSink {
    fn on_event(&mut self, event: TransportEvent);
}

/// The data-channel boundary the dispatcher sends outbound frames through.
pub trait Transport {
    fn send(&mut self, frame: &ClientFrame);
    /// Send the plain-text `"__ready__"` sentinel once after the channel
    /// opens, signalling the host that the viewer is listening.
    fn send_ready_sentinel(&mut self);
    fn is_open(&self) -> bool;
    fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingTransport {
        sent: Vec<ClientFrame>,
        ready_sent: bool,
        open: bool,
    }

    impl Transport for RecordingTransport {
        fn send(&mut self, frame: &ClientFrame) {
            self.sent.push(frame.clone());
        }

        fn send_ready_sentinel(&mut self) {
            self.ready_sent = true;
        }

        fn is_open(&self) -> bool {
            self.open
        }

        fn close(&mut self) {
            self.open = false;
        }
    }

    #[test_timeout::timeout]
    fn trait_is_usable_behind_a_mutable_reference() {
        let mut transport = RecordingTransport {
            sent: Vec::new(),
            ready_sent: false,
            open: true,
        };
        transport.send_ready_sentinel();
        transport.send(&ClientFrame::Resize { cols: 80, rows: 24 });
        assert!(transport.ready_sent);
        assert_eq!(transport.sent.len(), 1);
        transport.close();
        assert!(!transport.is_open());
    }
}
