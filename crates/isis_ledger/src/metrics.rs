use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use isis_wire::Message;

use crate::error::{Error, Result};

/// Per-message delivery metrics, one CSV line per delivered message:
/// `id,start_time,delivery_time,node,priority`. Grounded on `ISISAlgo.go`'s
/// `rDeliver`, which writes the same fields to `system_metrics.txt` for
/// total-order latency graphs; kept as a plain collaborator rather than
/// folded into the ordering core.
pub struct MetricsWriter {
    path: PathBuf,
    file: BufWriter<File>,
}

impl MetricsWriter {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_owned();
        let file = File::create(&path).map_err(|source| Error::MetricsIo {
            path: path.clone(),
            source,
        })?;
        Ok(Self {
            path,
            file: BufWriter::new(file),
        })
    }

    pub fn record(&mut self, msg: &Message, node: isis_wire::NodeIndex, delivered_at: f64) -> Result<()> {
        writeln!(
            self.file,
            "{},{},{},{},{}",
            msg.id, msg.start_time, delivered_at, node, msg.priority
        )
        .map_err(|source| Error::MetricsIo {
            path: self.path.clone(),
            source,
        })
    }

    pub fn flush(&mut self) -> Result<()> {
        self.file.flush().map_err(|source| Error::MetricsIo {
            path: self.path.clone(),
            source,
        })
    }
}

/// Wall-clock time in fractional seconds since the epoch, matching the
/// original's `time.Now().UnixNano() / 1e9` stamp used for `start_time` and
/// metrics. Purely informational: it never feeds the ordering logic.
pub fn now_secs() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use isis_wire::Payload;

    #[test]
    fn records_a_csv_line_per_delivery() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.csv");
        let mut w = MetricsWriter::create(&path).unwrap();
        let msg = Message::new(
            "node0-0".to_owned(),
            0,
            Payload::Deposit { account: "alice".to_owned(), amount: 10 },
            1.0,
        );
        w.record(&msg, 0, 2.5).unwrap();
        w.flush().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
        assert!(contents.starts_with("node0-0,1,2.5,0,"));
    }
}
