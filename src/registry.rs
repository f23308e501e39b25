//! The registered node kinds. A name maps to a closed set of variants, each one carrying its
//! own typed configuration, checked when the spec node is built.

use crate::config::{parse_config, Config};
use crate::packet::{Ipv4Header, Ipv6Header};
use crate::tcp::{TcpConfig, TcpTemplate};

use rand_distr::Normal;
use serde::Deserialize;
use std::path::PathBuf;

pub const SOURCE_NAMES: [&str; 3] = ["raw", "randbytes", "spec-file"];
pub const MODIFIER_NAMES: [&str; 7] = ["ip", "ip4", "ipv4", "ip6", "ipv6", "tcp", "tcpip-ack"];
pub const SINK_NAMES: [&str; 1] = ["pcap"];
/// The weighted selection modifier
pub const PDIST: &str = "pdist";

pub fn is_source_name(name: &str) -> bool {
    SOURCE_NAMES.contains(&name)
}

pub fn is_modifier_name(name: &str) -> bool {
    name == PDIST || MODIFIER_NAMES.contains(&name)
}

pub fn is_sink_name(name: &str) -> bool {
    SINK_NAMES.contains(&name)
}

/// Payload of the raw source: text or explicit bytes
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RawData {
    Text(String),
    Bytes(Vec<u8>),
}

impl RawData {
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            RawData::Text(s) => s.as_bytes().to_vec(),
            RawData::Bytes(b) => b.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    pub data: RawData,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RandBytesConfig {
    /// Mean payload size
    pub size: f64,
    #[serde(default)]
    pub deviation: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpecFileConfig {
    pub name: String,
    /// Lookup directory. Defaults to the directory of the top-level spec file.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Attributes of a `pcap` node. They are only validated: a sink inside a spec is rejected at
/// instantiation, the written file and count come from the command line.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PcapConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub count: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SourceKind {
    Raw(RawConfig),
    RandBytes(RandBytesConfig),
    SpecFile(SpecFileConfig),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModifierKind {
    Ipv4(Ipv4Header),
    Ipv6(Ipv6Header),
    Tcp(TcpTemplate),
    TcpIpAck,
    WeightedSelect,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SinkKind {
    Pcap(PcapConfig),
}

fn typed<T: serde::de::DeserializeOwned>(config: &Config) -> Result<T, String> {
    parse_config(config).map_err(|e| format!("invalid configuration: {}", e.to_string().trim()))
}

fn no_config(config: &Config) -> Result<(), String> {
    match config.keys().next() {
        Some(k) => Err(format!("unexpected attribute {k:?}")),
        None => Ok(()),
    }
}

impl SourceKind {
    /// The source registered under that name, if any
    pub fn from_config(name: &str, config: &Config) -> Option<Result<Self, String>> {
        let kind = match name {
            "raw" => typed(config).map(SourceKind::Raw),
            "randbytes" => typed::<RandBytesConfig>(config).and_then(|c| {
                if !c.size.is_finite() {
                    return Err(format!("invalid size {}", c.size));
                }
                Normal::new(c.size, c.deviation)
                    .map_err(|e| format!("invalid size distribution: {e}"))?;
                Ok(SourceKind::RandBytes(c))
            }),
            "spec-file" => typed(config).map(SourceKind::SpecFile),
            _ => return None,
        };
        Some(kind)
    }
}

impl ModifierKind {
    /// The modifier registered under that name, if any
    pub fn from_config(name: &str, config: &Config) -> Option<Result<Self, String>> {
        let kind = match name {
            "ip" | "ip4" | "ipv4" => typed(config).map(ModifierKind::Ipv4),
            "ip6" | "ipv6" => typed(config).map(ModifierKind::Ipv6),
            "tcp" => typed::<TcpConfig>(config)
                .and_then(TcpTemplate::try_from)
                .map(ModifierKind::Tcp),
            "tcpip-ack" => no_config(config).map(|_| ModifierKind::TcpIpAck),
            PDIST => no_config(config).map(|_| ModifierKind::WeightedSelect),
            _ => return None,
        };
        Some(kind)
    }

    /// Whether the modifier reads a group of choices rather than a single payload
    pub fn takes_group(&self) -> bool {
        matches!(self, ModifierKind::WeightedSelect)
    }
}

impl SinkKind {
    /// The sink registered under that name, if any
    pub fn from_config(name: &str, config: &Config) -> Option<Result<Self, String>> {
        match name {
            "pcap" => Some(typed(config).map(SinkKind::Pcap)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigValue;

    fn config(entries: &[(&str, ConfigValue)]) -> Config {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_names_are_disjoint() {
        for name in SOURCE_NAMES.iter().chain(SINK_NAMES.iter()) {
            assert!(!is_modifier_name(name));
        }
        for name in SINK_NAMES {
            assert!(!is_source_name(name));
        }
    }

    #[test]
    fn test_randbytes() {
        let c = config(&[("size", ConfigValue::Int(10))]);
        assert_eq!(
            SourceKind::from_config("randbytes", &c),
            Some(Ok(SourceKind::RandBytes(RandBytesConfig {
                size: 10.,
                deviation: 0.
            })))
        );
        let c = config(&[
            ("size", ConfigValue::Int(10)),
            ("deviation", ConfigValue::Float(-1.)),
        ]);
        assert!(matches!(
            SourceKind::from_config("randbytes", &c),
            Some(Err(_))
        ));
        assert_eq!(SourceKind::from_config("ip", &c), None);
        for size in [f64::INFINITY, f64::NEG_INFINITY, f64::NAN] {
            let c = config(&[("size", ConfigValue::Float(size))]);
            assert!(matches!(
                SourceKind::from_config("randbytes", &c),
                Some(Err(_))
            ));
        }
        // huge sizes are capped when drawn
        let c = config(&[("size", ConfigValue::Float(1e13))]);
        assert!(matches!(
            SourceKind::from_config("randbytes", &c),
            Some(Ok(_))
        ));
    }

    #[test]
    fn test_pcap() {
        let c = config(&[
            ("path", ConfigValue::Str("out.pcap".into())),
            ("count", ConfigValue::Int(3)),
        ]);
        assert_eq!(
            SinkKind::from_config("pcap", &c),
            Some(Ok(SinkKind::Pcap(PcapConfig {
                path: Some(PathBuf::from("out.pcap")),
                count: Some(3),
            })))
        );
        let c = config(&[("count", ConfigValue::Int(-1))]);
        assert!(matches!(SinkKind::from_config("pcap", &c), Some(Err(_))));
        let c = config(&[("snaplen", ConfigValue::Int(100))]);
        assert!(matches!(SinkKind::from_config("pcap", &c), Some(Err(_))));
    }

    #[test]
    fn test_ip() {
        let c = config(&[
            ("src", ConfigValue::Str("10.0.0.1".into())),
            ("ttl", ConfigValue::Int(3)),
        ]);
        match ModifierKind::from_config("ipv4", &c) {
            Some(Ok(ModifierKind::Ipv4(h))) => {
                assert_eq!(h.src, std::net::Ipv4Addr::new(10, 0, 0, 1));
                assert_eq!(h.dst, std::net::Ipv4Addr::LOCALHOST);
                assert_eq!(h.ttl, 3);
            }
            other => panic!("unexpected {other:?}"),
        }
        // not an address
        let c = config(&[("src", ConfigValue::Str("日本".into()))]);
        assert!(matches!(
            ModifierKind::from_config("ip", &c),
            Some(Err(_))
        ));
        let c = config(&[("colour", ConfigValue::Str("red".into()))]);
        assert!(matches!(
            ModifierKind::from_config("ip6", &c),
            Some(Err(_))
        ));
    }

    #[test]
    fn test_tcp() {
        let c = config(&[
            ("seq", ConfigValue::Str("increasing".into())),
            ("flags", ConfigValue::Str("PA".into())),
            ("dport", ConfigValue::Int(443)),
        ]);
        match ModifierKind::from_config("tcp", &c) {
            Some(Ok(ModifierKind::Tcp(t))) => {
                assert_eq!(t.header.dport, 443);
                assert_eq!(t.header.sport, 20);
                assert_eq!(t.header.flags_string(), "PA");
                assert_eq!(t.seq, crate::tcp::SeqSetting::Policy("increasing".into()));
            }
            other => panic!("unexpected {other:?}"),
        }
        let c = config(&[("flags", ConfigValue::Str("Z".into()))]);
        assert!(matches!(
            ModifierKind::from_config("tcp", &c),
            Some(Err(_))
        ));
    }
}
