use crate::error::{Error, Result};
use crate::instantiate::{instantiate, Context, PacketStream};
use crate::packet::Packet;
use crate::registry::{RandBytesConfig, SourceKind, SpecFileConfig};
use crate::spec::SpecNode;

use rand_core::RngCore;
use rand_distr::{Distribution, Normal};
use rand_pcg::Pcg32;
use std::path::PathBuf;

/// Extension of spec files looked up by the "spec-file" source
pub const SPEC_EXTENSION: &str = "toml";

/// Largest random payload, the most an IP packet can carry
pub const MAX_PAYLOAD_SIZE: usize = 65535;

/// Build the packet stream of a source node
pub fn build(kind: &SourceKind, ctx: &mut Context) -> Result<PacketStream> {
    match kind {
        SourceKind::Raw(c) => Ok(Box::new(std::iter::repeat(Packet::from_payload(
            c.data.to_bytes(),
        )))),
        SourceKind::RandBytes(c) => Ok(Box::new(RandomBytes::new(c, ctx.fork_rng())?)),
        SourceKind::SpecFile(c) => include_spec(c, ctx),
    }
}

/// Payloads of uniformly random bytes whose size follows a normal distribution
pub struct RandomBytes {
    size: Normal<f64>,
    rng: Pcg32,
    clamped: u64,
}

impl RandomBytes {
    pub fn new(config: &RandBytesConfig, rng: Pcg32) -> Result<Self> {
        let size = Normal::new(config.size, config.deviation)
            .map_err(|e| Error::Semantic(format!("invalid size distribution: {e}")))?;
        Ok(RandomBytes {
            size,
            rng,
            clamped: 0,
        })
    }

    /// How many sizes have been drawn out of [0, MAX_PAYLOAD_SIZE] and clamped
    pub fn clamped(&self) -> u64 {
        self.clamped
    }
}

impl Iterator for RandomBytes {
    type Item = Packet;

    fn next(&mut self) -> Option<Packet> {
        let draw = self.size.sample(&mut self.rng).round();
        let len = if draw < 0. {
            log::warn!("Negative payload size drawn ({draw}), using 0 instead");
            self.clamped += 1;
            0
        } else if draw > MAX_PAYLOAD_SIZE as f64 {
            log::warn!("Payload size drawn ({draw}) too large, using {MAX_PAYLOAD_SIZE} instead");
            self.clamped += 1;
            MAX_PAYLOAD_SIZE
        } else {
            draw as usize
        };
        let mut data = vec![0; len];
        self.rng.fill_bytes(&mut data);
        Some(Packet::from_payload(data))
    }
}

/// Location of an included spec file. Without an explicit directory, the lookup happens next to
/// the top-level spec, even when the include itself comes from another included file.
pub fn spec_file_path(config: &SpecFileConfig, ctx: &Context) -> PathBuf {
    let dir = config.path.as_deref().unwrap_or_else(|| ctx.root_dir());
    dir.join(format!("{}.{SPEC_EXTENSION}", config.name))
}

fn include_spec(config: &SpecFileConfig, ctx: &mut Context) -> Result<PacketStream> {
    let path = spec_file_path(config, ctx);
    log::debug!("Including {}", path.display());
    ctx.include(&path, |ctx| {
        let node = SpecNode::from_file(&path)?;
        instantiate(&node, ctx)?.into_stream()
    })
}
