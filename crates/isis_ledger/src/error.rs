#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("expected \"DEPOSIT <account> <amount>\" or \"TRANSFER <from> <amount> <to>\", got {0:?}")]
    WrongFieldCount(String),
    #[error("unrecognized command {0:?}, expected DEPOSIT or TRANSFER")]
    UnknownCommand(String),
    #[error("amount {0:?} is not a valid integer")]
    InvalidAmount(String),
    #[error("error opening metrics file {path:?}: {source}")]
    MetricsIo {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = core::result::Result<T, Error>;
