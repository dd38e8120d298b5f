#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("peer index {0} is out of range for a {1}-peer group")]
    PeerIndexOutOfRange(isis_wire::NodeIndex, usize),
    #[error("peer {0} is already attached")]
    AlreadyAttached(isis_wire::NodeIndex),
}

pub type Result<T> = core::result::Result<T, Error>;
