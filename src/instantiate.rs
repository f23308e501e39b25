use crate::config::Config;
use crate::error::{Error, Result};
use crate::packet::Packet;
use crate::spec::{NodeKind, Payload, SpecNode};
use crate::{modifiers, sources};

use rand_core::{RngCore, SeedableRng};
use rand_pcg::Pcg32;
use std::fs;
use std::path::{Path, PathBuf};

/// A lazy, usually infinite, stream of packets
pub type PacketStream = Box<dyn Iterator<Item = Packet>>;

/// The result of compiling a spec node
pub enum Instance {
    Stream(PacketStream),
    /// An opaque node: its config along with its compiled payload
    Configured(Config, Box<Instance>),
    /// The members of a group, compiled independently
    Group(Vec<Instance>),
}

impl Instance {
    /// The packet stream behind this instance. The config of opaque chain links is dropped.
    pub fn into_stream(self) -> Result<PacketStream> {
        match self {
            Instance::Stream(s) => Ok(s),
            Instance::Configured(_, inner) => inner.into_stream(),
            Instance::Group(_) => Err(Error::Semantic(
                "a group of choices cannot be used as a single payload".into(),
            )),
        }
    }

    /// A weighted-selection choice: its probability and its stream
    pub fn into_choice(self) -> Result<(f64, PacketStream)> {
        match self {
            Instance::Configured(config, inner) => {
                let weight = config
                    .get("probability")
                    .and_then(|p| p.as_f64())
                    .ok_or_else(|| Error::Semantic("choice without probability".into()))?;
                Ok((weight, inner.into_stream()?))
            }
            _ => Err(Error::Semantic("choice without probability".into())),
        }
    }
}

/// What the instantiation carries down the tree: the random source, the directory
/// of the top-level spec used to resolve included files, and the chain of files being included
pub struct Context {
    rng: Pcg32,
    root_dir: PathBuf,
    includes: Vec<PathBuf>,
}

impl Context {
    pub fn new(root_dir: &Path, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => Pcg32::seed_from_u64(s),
            None => Pcg32::from_entropy(),
        };
        Context {
            rng,
            root_dir: root_dir.to_path_buf(),
            includes: vec![],
        }
    }

    /// Context for a top-level spec file: includes are resolved next to it
    pub fn for_spec_file(spec: &Path, seed: Option<u64>) -> Self {
        let dir = spec
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut ctx = Context::new(dir, seed);
        ctx.includes.push(include_key(spec));
        ctx
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// A new generator owned by a single combinator
    pub fn fork_rng(&mut self) -> Pcg32 {
        Pcg32::seed_from_u64(self.rng.next_u64())
    }

    /// Compile an included spec file. A file may be included several times, but not from itself.
    pub fn include<T>(
        &mut self,
        path: &Path,
        compile: impl FnOnce(&mut Context) -> Result<T>,
    ) -> Result<T> {
        let key = include_key(path);
        if self.includes.contains(&key) {
            return Err(Error::Semantic(format!("{} includes itself", path.display())));
        }
        self.includes.push(key);
        let res = compile(self);
        self.includes.pop();
        res
    }
}

fn include_key(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Compile a validated node. Nothing is generated here: the streams are only built.
pub fn instantiate(node: &SpecNode, ctx: &mut Context) -> Result<Instance> {
    log::debug!("Instantiating {node}");
    match node.kind() {
        NodeKind::Sink(_) => Err(Error::Instantiation {
            node: node.to_string(),
            reason: "a sink cannot be used as a payload".into(),
        }),
        NodeKind::Source(kind) => sources::build(kind, ctx).map(Instance::Stream),
        NodeKind::Modifier(kind) => {
            let payload = instantiate_payload(node, ctx)?;
            modifiers::build(kind, payload, ctx).map(Instance::Stream)
        }
        NodeKind::Opaque => Ok(Instance::Configured(
            node.config().clone(),
            Box::new(instantiate_payload(node, ctx)?),
        )),
    }
}

fn instantiate_payload(node: &SpecNode, ctx: &mut Context) -> Result<Instance> {
    match node.payload() {
        Payload::Single(child) => instantiate(child, ctx),
        Payload::Group(children) => children
            .iter()
            .map(|child| instantiate(child, ctx))
            .collect::<Result<Vec<_>>>()
            .map(Instance::Group),
        // validated nodes without payload are sources
        Payload::None => Err(Error::Instantiation {
            node: node.to_string(),
            reason: "no payload to instantiate".into(),
        }),
    }
}

/// Compile the root of a spec: its global directives and its packet stream
pub fn instantiate_root(node: &SpecNode, ctx: &mut Context) -> Result<(Config, PacketStream)> {
    match instantiate(node, ctx)? {
        Instance::Configured(config, payload) => Ok((config, payload.into_stream()?)),
        other => Ok((Config::new(), other.into_stream()?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigValue;
    use crate::packet::LayerKind;

    fn compile(doc: &str) -> Result<(Config, PacketStream)> {
        let node = SpecNode::from_toml_str(doc)?;
        let mut ctx = Context::new(Path::new("."), Some(1));
        instantiate_root(&node, &mut ctx)
    }

    #[test]
    fn test_root() {
        let (config, stream) = compile(
            r#"
_count = 4
[tcpip-ack.ip.tcp]
_seq = "increasing"
_flags = "PA"
[tcpip-ack.ip.tcp.raw]
_data = "hello"
"#,
        )
        .unwrap();
        assert_eq!(config.get("count"), Some(&ConfigValue::Int(4)));
        let packets: Vec<Packet> = stream.take(4).collect();
        let seqs: Vec<u32> = packets.iter().map(|p| p.tcp().unwrap().seq).collect();
        let acks: Vec<u32> = packets.iter().map(|p| p.tcp().unwrap().ack).collect();
        assert_eq!(seqs, vec![0, 0, 1, 1]);
        assert_eq!(acks, vec![0, 0, 0, 1]);
        assert_eq!(packets[0].payload(), b"hello");
        assert!(packets[1].payload().is_empty());
    }

    #[test]
    fn test_nested_sink() {
        let res = compile(
            r#"
[ip.pcap]
_path = "out.pcap"
[ip.pcap.raw]
_data = "x"
"#,
        );
        match res {
            Err(Error::Instantiation { node, .. }) => assert!(node.contains("pcap")),
            Err(e) => panic!("unexpected error {e}"),
            Ok(_) => panic!("a nested sink must be rejected"),
        }
    }

    #[test]
    fn test_weighted_selection() {
        let (_, stream) = compile(
            r#"
[[ip6.pdist]]
_probability = 1
[ip6.pdist.raw]
_data = "a"

[[ip6.pdist]]
_probability = 3
[ip6.pdist.raw]
_data = "b"
"#,
        )
        .unwrap();
        let packets: Vec<Packet> = stream.take(100).collect();
        assert!(packets.iter().all(|p| p.has_layer(LayerKind::Ipv6)));
        assert!(packets.iter().any(|p| p.payload() == b"a"));
        assert!(packets.iter().any(|p| p.payload() == b"b"));
    }

    #[test]
    fn test_opaque_chain_link() {
        let (_, stream) = compile(
            r#"
[ip.wrapper]
_note = "ignored"
[ip.wrapper.raw]
_data = "x"
"#,
        )
        .unwrap();
        let packets: Vec<Packet> = stream.take(2).collect();
        assert!(packets.iter().all(|p| p.payload() == b"x"));
    }

    #[test]
    fn test_seeded_reproducible() {
        let doc = r#"
[ip.tcp]
_seq = "random"
[ip.tcp.randbytes]
_size = 20
_deviation = 5
"#;
        let a: Vec<Packet> = compile(doc).unwrap().1.take(20).collect();
        let b: Vec<Packet> = compile(doc).unwrap().1.take(20).collect();
        assert_eq!(a, b);
    }
}
