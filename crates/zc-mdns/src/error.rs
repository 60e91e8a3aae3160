use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum EngineError {
    #[error("responder is closed")]
    Closed,

    #[error("operation timed out")]
    Timeout,
}
