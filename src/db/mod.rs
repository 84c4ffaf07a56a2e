pub use self::error::DatabaseError;
pub use self::manager::DatabaseManager;
pub use self::models::{
    ActionKind, Appeal, AppealStatus, Ban, BanHistoryRecord, CaseLog, ClosureRecord, NewAppeal,
    NewBan, PurgeSummary, SchedulerState, UserKarma, VoteKind, VoteOutcome,
};
pub use self::stores::{
    AppealStore, BanStore, CaseLogStore, KarmaStore, SchedulerStateStore, ThreadStore,
};

pub mod error;
pub mod manager;
pub mod models;
pub mod schema;
pub mod sqlite;
pub mod stores;
