use uuid::Uuid;

/// Shared error type used across all hearth crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("config: {0}")]
    Config(String),

    #[error("invalid time string: {input}")]
    Parse {
        /// App that submitted the string, when known.
        owner: Option<String>,
        input: String,
    },

    #[error("invalid handle: {0}")]
    UnknownHandle(Uuid),

    #[error("dispatch failed for {owner}/{handle}: {reason}")]
    Dispatch {
        owner: String,
        handle: Uuid,
        reason: String,
    },

    #[error("scheduler stopping")]
    Stopping,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn parse(owner: Option<&str>, input: &str) -> Self {
        Error::Parse {
            owner: owner.map(str::to_owned),
            input: input.to_owned(),
        }
    }
}
