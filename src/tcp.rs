use crate::error::{Error, Result};

use pnet_packet::tcp::TcpFlags;
use rand_distr::{Distribution, Uniform};
use rand_pcg::Pcg32;
use serde::Deserialize;
use std::num::Wrapping;
use std::str::FromStr;

/// Flag letters, in the order they are printed
const FLAG_LETTERS: [(char, u8); 8] = [
    ('F', TcpFlags::FIN),
    ('S', TcpFlags::SYN),
    ('R', TcpFlags::RST),
    ('P', TcpFlags::PSH),
    ('A', TcpFlags::ACK),
    ('U', TcpFlags::URG),
    ('E', TcpFlags::ECE),
    ('C', TcpFlags::CWR),
];

/// Upper bound (inclusive) of the "random" sequence-number policy
pub const RANDOM_SEQ_MAX: u32 = 16386;

/// A TCP header layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpHeader {
    pub sport: u16,
    pub dport: u16,
    pub seq: u32,
    pub ack: u32,
    pub flags: u8,
    pub window: u16,
    pub urgptr: u16,
}

impl TcpHeader {
    /// The flags as letters, e.g. "SA"
    pub fn flags_string(&self) -> String {
        FLAG_LETTERS
            .iter()
            .filter(|(_, bit)| self.flags & bit != 0)
            .map(|(c, _)| c)
            .collect()
    }
}

/// Parse flags written as letters ("S", "PA", ...). Returns None on an unknown letter.
pub fn parse_tcp_flags(s: &str) -> Option<u8> {
    s.chars().try_fold(0u8, |acc, c| {
        FLAG_LETTERS
            .iter()
            .find(|(l, _)| *l == c.to_ascii_uppercase())
            .map(|(_, bit)| acc | bit)
    })
}

/// The "seq" attribute of the tcp modifier: either a literal or the name of a policy
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum SeqSetting {
    Fixed(u32),
    Policy(String),
}

impl Default for SeqSetting {
    fn default() -> Self {
        SeqSetting::Fixed(0)
    }
}

fn default_sport() -> u16 {
    20
}

fn default_dport() -> u16 {
    80
}

fn default_flags() -> String {
    "S".into()
}

fn default_window() -> u16 {
    8192
}

/// Configuration of the tcp modifier, as written in the spec
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TcpConfig {
    #[serde(default = "default_sport")]
    sport: u16,
    #[serde(default = "default_dport")]
    dport: u16,
    #[serde(default)]
    seq: SeqSetting,
    #[serde(default)]
    ack: u32,
    #[serde(default = "default_flags")]
    flags: String,
    #[serde(default = "default_window")]
    window: u16,
    #[serde(default)]
    urgptr: u16,
}

/// A validated tcp modifier configuration: a header whose sequence number is filled per packet
#[derive(Debug, Clone, PartialEq)]
pub struct TcpTemplate {
    pub header: TcpHeader,
    pub seq: SeqSetting,
}

impl TryFrom<TcpConfig> for TcpTemplate {
    type Error = String;

    fn try_from(c: TcpConfig) -> std::result::Result<Self, String> {
        let flags =
            parse_tcp_flags(&c.flags).ok_or_else(|| format!("invalid TCP flags {:?}", c.flags))?;
        Ok(TcpTemplate {
            header: TcpHeader {
                sport: c.sport,
                dport: c.dport,
                seq: 0,
                ack: c.ack,
                flags,
                window: c.window,
                urgptr: c.urgptr,
            },
            seq: c.seq,
        })
    }
}

/// Named sequence-number generators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqPolicy {
    /// Independent uniform draws in [0, 16386]
    Random,
    /// 0, 1, 2, ...
    Increasing,
}

impl FromStr for SeqPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "random" => Ok(SeqPolicy::Random),
            "increasing" => Ok(SeqPolicy::Increasing),
            _ => Err(Error::Semantic(format!(
                "unknown TCP sequence generator {s:?}"
            ))),
        }
    }
}

impl SeqPolicy {
    /// A fresh, unbounded sequence for this policy
    pub fn sequence(self, rng: Pcg32) -> Box<dyn Iterator<Item = u32>> {
        match self {
            SeqPolicy::Random => Box::new(RandomSeq {
                rng,
                range: Uniform::new_inclusive(0, RANDOM_SEQ_MAX),
            }),
            SeqPolicy::Increasing => Box::new(IncreasingSeq::default()),
        }
    }
}

impl SeqSetting {
    /// Resolve the setting into the sequence consumed by the tcp modifier, one value per packet
    pub fn sequence(&self, rng: Pcg32) -> Result<Box<dyn Iterator<Item = u32>>> {
        match self {
            SeqSetting::Fixed(n) => Ok(Box::new(std::iter::repeat(*n))),
            SeqSetting::Policy(name) => Ok(name.parse::<SeqPolicy>()?.sequence(rng)),
        }
    }
}

pub struct RandomSeq {
    rng: Pcg32,
    range: Uniform<u32>,
}

impl Iterator for RandomSeq {
    type Item = u32;
    fn next(&mut self) -> Option<u32> {
        Some(self.range.sample(&mut self.rng))
    }
}

#[derive(Default)]
pub struct IncreasingSeq {
    next: Wrapping<u32>,
}

impl Iterator for IncreasingSeq {
    type Item = u32;
    fn next(&mut self) -> Option<u32> {
        let current = self.next.0;
        self.next += 1;
        Some(current)
    }
}
