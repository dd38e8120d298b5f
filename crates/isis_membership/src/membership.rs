use std::path::Path;

use crate::error::{Error, Result};

/// Index of a node within the fixed peer group, in `[0, N)`. Position in
/// the membership file defines a peer's index.
pub type NodeIndex = u16;

/// One line of the membership file: `<name> <address> <port>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSpec {
    pub name: String,
    pub address: String,
    pub port: u16,
}

/// The parsed membership file: line 1 is the peer count `N`, followed by
/// `N` lines of `PeerSpec`, indexed by position.
#[derive(Debug, Clone)]
pub struct Membership {
    peers: Vec<PeerSpec>,
}

impl Membership {
    pub fn parse(contents: &str) -> Result<Self> {
        let mut lines = contents.lines();
        let count_line = lines.next().ok_or(Error::MissingPeerCount)?;
        let count: usize = count_line
            .trim()
            .parse()
            .map_err(|_| Error::InvalidPeerCount(count_line.to_owned()))?;

        let mut peers = Vec::with_capacity(count);
        for (i, line) in lines.by_ref().take(count).enumerate() {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() != 3 {
                return Err(Error::WrongFieldCount {
                    line: i + 2,
                    fields: fields.len(),
                });
            }
            let port: u16 = fields[2].parse().map_err(|_| Error::InvalidPort {
                line: i + 2,
                port: fields[2].to_owned(),
            })?;
            peers.push(PeerSpec {
                name: fields[0].to_owned(),
                address: fields[1].to_owned(),
                port,
            });
        }

        if peers.len() != count {
            return Err(Error::WrongPeerLineCount {
                expected: count,
                found: peers.len(),
            });
        }

        for i in 0..peers.len() {
            if peers[i + 1..].iter().any(|p| p.name == peers[i].name) {
                return Err(Error::DuplicateName(peers[i].name.clone()));
            }
        }

        Ok(Self { peers })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_owned(),
            source,
        })?;
        Self::parse(&contents)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn peer(&self, idx: NodeIndex) -> Option<&PeerSpec> {
        self.peers.get(idx as usize)
    }

    pub fn index_of(&self, name: &str) -> Option<NodeIndex> {
        self.peers
            .iter()
            .position(|p| p.name == name)
            .map(|i| i as NodeIndex)
    }

    /// Resolves `self_name` to its index, erroring if it is not a member.
    pub fn self_index(&self, self_name: &str) -> Result<NodeIndex> {
        self.index_of(self_name)
            .ok_or_else(|| Error::SelfNotFound(self_name.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> &'static str {
        "3\nnode0 127.0.0.1 9000\nnode1 127.0.0.1 9001\nnode2 127.0.0.1 9002\n"
    }

    #[test]
    fn parses_well_formed_file() {
        let m = Membership::parse(sample()).unwrap();
        assert_eq!(m.peer_count(), 3);
        assert_eq!(m.index_of("node1"), Some(1));
        assert_eq!(m.peer(2).unwrap().port, 9002);
    }

    #[test]
    fn rejects_wrong_line_count() {
        let err = Membership::parse("2\nnode0 127.0.0.1 9000\n").unwrap_err();
        assert!(matches!(err, Error::WrongPeerLineCount { .. }));
    }

    #[test]
    fn rejects_duplicate_names() {
        let err =
            Membership::parse("2\nnode0 127.0.0.1 9000\nnode0 127.0.0.1 9001\n").unwrap_err();
        assert!(matches!(err, Error::DuplicateName(_)));
    }

    #[test]
    fn self_index_reports_missing_name() {
        let m = Membership::parse(sample()).unwrap();
        assert!(matches!(
            m.self_index("ghost"),
            Err(Error::SelfNotFound(_))
        ));
    }

    #[test]
    fn load_reads_the_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("members.txt");
        std::fs::write(&path, sample()).unwrap();
        let m = Membership::load(&path).unwrap();
        assert_eq!(m.peer_count(), 3);
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Membership::load(&dir.path().join("missing.txt")).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }
}
