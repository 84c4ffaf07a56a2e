pub use self::parser::{
    Config, DatabaseConfig, ForumConfig, LoggingConfig, RetryConfig, SchedulerConfig,
};
pub use self::validator::ConfigError;

mod parser;
mod validator;
