#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("error writing: {0}")]
    Write(#[source] std::io::Error),
    #[error("error reading: {0}")]
    Read(#[source] std::io::Error),
    #[error("peer disconnected")]
    Disconnected,
    #[error("message of length {len} exceeds the maximum of {max}")]
    TooLarge { len: u32, max: u32 },
    #[error("malformed message: {0}")]
    Malformed(&'static str),
    #[error("message id {0:?} is not valid utf-8")]
    InvalidUtf8(&'static str),
}

pub type Result<T> = core::result::Result<T, Error>;
