//! Message priority levels and the static per-type mapping.

use crate::message::HandlerKind;

/// Priority of a queued message. Higher dequeues first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    /// Background reads (history).
    Low,
    /// Regular chat traffic.
    Normal,
    /// Run lifecycle control.
    High,
}

impl Priority {
    /// The static priority mapping for each handler kind.
    ///
    /// Stop/start are control messages: a user asking to cancel a runaway
    /// agent must not queue behind a backlog of chat messages.
    pub fn for_kind(kind: HandlerKind) -> Self {
        match kind {
            HandlerKind::StopAgent => Priority::High,
            HandlerKind::StartAgent => Priority::High,
            HandlerKind::UserMessage => Priority::Normal,
            HandlerKind::GetThreadHistory => Priority::Low,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
        };
        f.write_str(s)
    }
}
