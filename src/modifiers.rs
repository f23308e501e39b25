use crate::error::{Error, Result};
use crate::instantiate::{Context, Instance, PacketStream};
use crate::packet::{Layer, Packet};
use crate::registry::ModifierKind;
use crate::tcp::TcpHeader;

use pnet_packet::tcp::TcpFlags;
use rand_distr::{Distribution, Uniform};
use rand_pcg::Pcg32;

/// Build the packet stream of a modifier node from its instantiated payload
pub fn build(kind: &ModifierKind, payload: Instance, ctx: &mut Context) -> Result<PacketStream> {
    match kind {
        ModifierKind::Ipv4(header) => {
            let header = header.clone();
            Ok(Box::new(payload.into_stream()?.map(move |p| {
                p.encapsulate(Layer::Ipv4(header.clone()))
            })))
        }
        ModifierKind::Ipv6(header) => {
            let header = header.clone();
            Ok(Box::new(payload.into_stream()?.map(move |p| {
                p.encapsulate(Layer::Ipv6(header.clone()))
            })))
        }
        ModifierKind::Tcp(template) => {
            let seq = template.seq.sequence(ctx.fork_rng())?;
            Ok(Box::new(TcpEncapsulation::new(
                payload.into_stream()?,
                template.header.clone(),
                seq,
            )))
        }
        ModifierKind::TcpIpAck => Ok(Box::new(AckSynthesis::new(payload.into_stream()?))),
        ModifierKind::WeightedSelect => {
            let Instance::Group(members) = payload else {
                return Err(Error::Semantic(
                    "weighted selection expects a group of choices".into(),
                ));
            };
            let choices = members
                .into_iter()
                .map(Instance::into_choice)
                .collect::<Result<Vec<_>>>()?;
            Ok(Box::new(WeightedSelection::new(choices, ctx.fork_rng())?))
        }
    }
}

/// Wraps every packet in a TCP header whose sequence number is taken from a sequence
pub struct TcpEncapsulation {
    inner: PacketStream,
    header: TcpHeader,
    seq: Box<dyn Iterator<Item = u32>>,
}

impl TcpEncapsulation {
    pub fn new(inner: PacketStream, header: TcpHeader, seq: Box<dyn Iterator<Item = u32>>) -> Self {
        TcpEncapsulation { inner, header, seq }
    }
}

impl Iterator for TcpEncapsulation {
    type Item = Packet;

    fn next(&mut self) -> Option<Packet> {
        let packet = self.inner.next()?;
        let mut header = self.header.clone();
        header.seq = self.seq.next()?;
        Some(packet.encapsulate(Layer::Tcp(header)))
    }
}

/// Yields every packet unchanged, each TCP/IP packet being followed by its acknowledgment
pub struct AckSynthesis {
    inner: PacketStream,
    pending: Option<Packet>,
    warnings: u32,
}

impl AckSynthesis {
    pub fn new(inner: PacketStream) -> Self {
        AckSynthesis {
            inner,
            pending: None,
            warnings: 0,
        }
    }

    /// Number of warnings logged so far (at most one)
    pub fn warnings(&self) -> u32 {
        self.warnings
    }
}

/// The acknowledgment of a packet whose TCP layer is at `tcp_index`, right above an IP layer.
/// The ACK number is the original sequence number.
pub fn acknowledgment(packet: &Packet, tcp_index: usize) -> Packet {
    let mut ack = packet.clone();
    ack.clear_payload_after(tcp_index);
    ack.swap_addresses(tcp_index - 1);
    if let Some(Layer::Tcp(tcp)) = ack.layer_mut(tcp_index) {
        tcp.ack = tcp.seq;
        tcp.flags = TcpFlags::ACK;
    }
    ack
}

impl Iterator for AckSynthesis {
    type Item = Packet;

    fn next(&mut self) -> Option<Packet> {
        if let Some(ack) = self.pending.take() {
            return Some(ack);
        }
        let packet = self.inner.next()?;
        match packet.tcp_over_ip() {
            Some(tcp_index) => self.pending = Some(acknowledgment(&packet, tcp_index)),
            None => {
                if self.warnings == 0 {
                    log::warn!("Cannot acknowledge a packet without TCP over IP, skipping its ACK");
                    self.warnings += 1;
                }
            }
        }
        Some(packet)
    }
}

/// Draws each packet from one of several streams, chosen according to relative weights
pub struct WeightedSelection {
    choices: Vec<PacketStream>,
    /// Cumulative weights, in input order
    bounds: Vec<f64>,
    draw: Uniform<f64>,
    rng: Pcg32,
}

impl WeightedSelection {
    pub fn new(choices: Vec<(f64, PacketStream)>, rng: Pcg32) -> Result<Self> {
        let mut total = 0.;
        let mut bounds = Vec::with_capacity(choices.len());
        let mut streams = Vec::with_capacity(choices.len());
        for (weight, stream) in choices {
            if !(weight >= 0. && weight.is_finite()) {
                return Err(Error::Semantic(format!("invalid probability {weight}")));
            }
            total += weight;
            bounds.push(total);
            streams.push(stream);
        }
        if !(total > 0. && total.is_finite()) {
            return Err(Error::Semantic(
                "weighted selection needs a positive and finite total probability".into(),
            ));
        }
        Ok(WeightedSelection {
            choices: streams,
            bounds,
            draw: Uniform::new(0., total),
            rng,
        })
    }

    /// Index of the choice selected by a draw in [0, total): the first whose cumulative weight
    /// is strictly greater than the draw
    pub fn select(&self, draw: f64) -> usize {
        self.bounds
            .iter()
            .position(|bound| draw < *bound)
            .unwrap_or(self.bounds.len() - 1)
    }
}

impl Iterator for WeightedSelection {
    type Item = Packet;

    fn next(&mut self) -> Option<Packet> {
        let draw = self.draw.sample(&mut self.rng);
        let index = self.select(draw);
        self.choices[index].next()
    }
}
