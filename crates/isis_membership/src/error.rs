#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("error reading membership file {path:?}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("membership file is empty, expected a peer count on line 1")]
    MissingPeerCount,
    #[error("peer count {0:?} on line 1 is not a valid integer")]
    InvalidPeerCount(String),
    #[error("expected {expected} peer lines, found {found}")]
    WrongPeerLineCount { expected: usize, found: usize },
    #[error("peer line {line} has {fields} fields, expected 3 (name address port)")]
    WrongFieldCount { line: usize, fields: usize },
    #[error("peer line {line}: port {port:?} is not a valid u16")]
    InvalidPort { line: usize, port: String },
    #[error("duplicate peer name {0:?}")]
    DuplicateName(String),
    #[error("this node's name {0:?} does not appear in the membership file")]
    SelfNotFound(String),
}

pub type Result<T> = core::result::Result<T, Error>;
