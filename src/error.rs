use std::path::PathBuf;
use thiserror::Error;

/// Everything that can go wrong between reading a spec and writing the capture.
/// Errors are never recovered locally: they travel up to `main`.
#[derive(Debug, Error)]
pub enum Error {
    /// The spec tree is malformed (several payloads in a node, no reachable source, bad attributes)
    #[error("structural error in {node}: {reason}")]
    Structural { node: String, reason: String },
    /// The tree is well-formed but refers to something that does not exist
    #[error("semantic error: {0}")]
    Semantic(String),
    /// A node cannot be compiled at that position, e.g. a nested sink
    #[error("cannot instantiate {node}: {reason}")]
    Instantiation { node: String, reason: String },
    /// The input is not valid TOML
    #[error("malformed spec: {0}")]
    Format(#[from] toml::de::Error),
    #[error("cannot access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("pcap export failed: {0}")]
    Pcap(#[from] pcap_file::PcapError),
}

impl Error {
    pub(crate) fn structural(node: impl ToString, reason: impl Into<String>) -> Self {
        Error::Structural {
            node: node.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
