pub mod backoff;
pub mod logging;
pub mod time;

pub use self::backoff::{AdaptivePacer, BackoffPolicy};
pub use self::time::{format_ts, now_ts, parse_ts};
