#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("timing has not been initialized")]
    NotInitialized,

    #[error("initialize has already been called")]
    AlreadyInitialized,

    #[error("unknown option '{0}'")]
    BadOption(String),

    #[error("bad value {value} for option '{option}'")]
    BadValue { option: &'static str, value: i64 },

    #[error("thread limit of {max} exceeded")]
    ThreadOverflow { max: usize },

    #[error("call stack exceeded {max} levels starting region '{name}'")]
    StackOverflow { name: String, max: usize },

    #[error("stop of region '{0}' which is not running")]
    UnbalancedStop(String),

    #[error("region '{0}' is unknown on this thread")]
    UnknownTimer(String),

    #[error("time source '{0}' is not available")]
    TimeSourceUnavailable(&'static str),

    #[error("counter adapter failure: {0}")]
    CounterAdapter(String),

    #[error("{0}")]
    Io(#[from] std::io::Error),
}
