/// Structured events delivered from the chat platform's gateway.
/// Routed by `ModerationEngine::handle_event` into the incremental
/// update path; the reconciliation scan repairs anything these miss.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformEvent {
    ReactionAdded {
        thread_id: i64,
        message_id: i64,
        voter_id: i64,
        emoji: String,
    },
    ReactionRemoved {
        thread_id: i64,
        message_id: i64,
        voter_id: i64,
        emoji: String,
    },
    MessageDeleted {
        thread_id: i64,
        message_id: i64,
    },
    ThreadCreated {
        thread_id: i64,
        name: String,
    },
    ThreadDeleted {
        thread_id: i64,
    },
}
