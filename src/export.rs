use crate::error::{Error, Result};
use crate::packet::{Layer, Packet};

use pcap_file::pcap::{PcapHeader, PcapPacket, PcapWriter};
use pnet_packet::ethernet::{EtherType, EtherTypes, MutableEthernetPacket};
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// EtherType of frames whose outermost layer is not IP (local experimental)
const RAW_ETHERTYPE: EtherType = EtherType(0x88b5);

/// Largest captured frame, as libpcap's MAXIMUM_SNAPLEN. Longer frames are truncated.
pub const SNAPLEN: u32 = 262_144;

/// Writes the first packets of a stream into a pcap file
#[derive(Debug, Clone)]
pub struct PcapSink {
    path: PathBuf,
    count: u64,
}

impl PcapSink {
    pub fn new(path: &Path, count: u64) -> Self {
        PcapSink {
            path: path.to_path_buf(),
            count,
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Export exactly `count` packets from the stream (fewer if it ends first).
    /// Nothing beyond that is pulled. Returns the number of written packets.
    pub fn write(&self, stream: impl Iterator<Item = Packet>) -> Result<u64> {
        let file_out = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)
            .map_err(|e| Error::io(&self.path, e))?;
        let header = PcapHeader {
            snaplen: SNAPLEN,
            ..Default::default()
        };
        let mut pcap_writer = PcapWriter::with_header(BufWriter::new(file_out), header)?;
        log::trace!("Saving into {}", self.path.display());

        let mut written = 0;
        for packet in stream.take(self.count as usize) {
            let frame = ethernet_frame(&packet);
            let timestamp = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default();
            let orig_len = u32::try_from(frame.len()).unwrap_or(u32::MAX);
            let captured = &frame[..frame.len().min(SNAPLEN as usize)];
            if captured.len() < frame.len() {
                log::warn!("Frame of {} bytes truncated to {SNAPLEN} bytes", frame.len());
            }
            pcap_writer.write_packet(&PcapPacket::new(timestamp, orig_len, captured))?;
            written += 1;
        }
        pcap_writer
            .into_writer()
            .flush()
            .map_err(|e| Error::io(&self.path, e))?;
        Ok(written)
    }
}

/// Frame a packet in an Ethernet header with zero MAC addresses
pub fn ethernet_frame(packet: &Packet) -> Vec<u8> {
    let bytes = packet.to_bytes();
    let header_len = MutableEthernetPacket::minimum_packet_size();
    let mut frame = vec![0; header_len + bytes.len()];
    frame[header_len..].copy_from_slice(&bytes);
    // the size is already computed, it cannot fail
    let mut eth_packet = MutableEthernetPacket::new(&mut frame).unwrap();
    eth_packet.set_ethertype(match packet.outermost() {
        Some(Layer::Ipv4(_)) => EtherTypes::Ipv4,
        Some(Layer::Ipv6(_)) => EtherTypes::Ipv6,
        _ => RAW_ETHERTYPE,
    });
    frame
}
