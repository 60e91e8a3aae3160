use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProtoError {
    #[error("Packet truncated at offset {0}")]
    Truncated(usize),

    #[error("Packet too short: {0} bytes")]
    TooShort(usize),

    #[error("Invalid name label at offset {0}")]
    MalformedLabel(usize),

    #[error("Name compression pointer loop")]
    CircularName,

    #[error("Name too long (exceeds 255 wire bytes)")]
    NameTooLong,

    #[error("Outgoing message exceeds the frame size limit")]
    BufferFull,
}
