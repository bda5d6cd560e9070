//! Push-style frame source.
//!
//! `PeerPushSource` negotiates a peer capture session: the device streams
//! RTP/JPEG datagrams to an agreed UDP endpoint, and a background delivery
//! thread reassembles packets into JPEG frames. Each decoded frame is
//! published into the shared latest-frame slot and handed to the registered
//! frame listener; there is no blocking read for callers to drive, and the
//! workflow cannot assume a delivery cadence.
//!
//! The peer device emits its sensor plane order (blue-first), so decoded
//! frames are normalized through `ChannelOrder::Bgr` before publication.

use anyhow::{anyhow, Context, Result};
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use image::GenericImageView;
use url::Url;

use super::{CameraConfig, CameraStats, FrameListener};
use crate::frame::{ChannelOrder, Frame, LatestFrame};

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;
const RTP_JPEG_PAYLOAD_TYPE: u8 = 26;
const RECV_TIMEOUT: Duration = Duration::from_millis(500);

pub struct PeerPushSource {
    config: CameraConfig,
    socket: Option<UdpSocket>,
    local_addr: Option<SocketAddr>,
    slot: LatestFrame,
    listener: FrameListener,
    stop_flag: Arc<AtomicBool>,
    frames_delivered: Arc<AtomicU64>,
    worker: Option<JoinHandle<()>>,
}

impl PeerPushSource {
    pub(crate) fn new(
        config: CameraConfig,
        url: Url,
        slot: LatestFrame,
        listener: FrameListener,
    ) -> Result<Self> {
        let host = url
            .host_str()
            .ok_or_else(|| anyhow!("udp url missing host"))?;
        let port = url.port().ok_or_else(|| anyhow!("udp url missing port"))?;
        let bind_addr = format!("{}:{}", host, port);
        let socket = UdpSocket::bind(&bind_addr)
            .with_context(|| format!("bind peer session endpoint on {}", bind_addr))?;
        let local_addr = socket.local_addr().ok();
        Ok(Self {
            config,
            socket: Some(socket),
            local_addr,
            slot,
            listener,
            stop_flag: Arc::new(AtomicBool::new(false)),
            frames_delivered: Arc::new(AtomicU64::new(0)),
            worker: None,
        })
    }

    /// Start the delivery thread. Frames arrive asynchronously from here on.
    pub fn connect(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }
        let socket = self
            .socket
            .take()
            .ok_or_else(|| anyhow!("peer session was stopped; open a new source"))?;
        socket
            .set_read_timeout(Some(RECV_TIMEOUT))
            .context("set peer session read timeout")?;

        self.stop_flag.store(false, Ordering::SeqCst);
        let stop_flag = Arc::clone(&self.stop_flag);
        let frames_delivered = Arc::clone(&self.frames_delivered);
        let slot = self.slot.clone();
        let listener = self.listener.clone();
        let source = self.config.url.clone();

        self.worker = Some(std::thread::spawn(move || {
            deliver_frames(socket, stop_flag, frames_delivered, slot, listener, &source);
        }));
        log::info!("peer session open: {}", self.config.url);
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.worker.is_some() && !self.stop_flag.load(Ordering::SeqCst)
    }

    /// Flag the delivery thread down and wait for it to exit.
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        self.socket = None;
    }

    pub fn stats(&self) -> CameraStats {
        CameraStats {
            frames_captured: self.frames_delivered.load(Ordering::SeqCst),
            source: self.config.url.clone(),
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

fn deliver_frames(
    socket: UdpSocket,
    stop_flag: Arc<AtomicBool>,
    frames_delivered: Arc<AtomicU64>,
    slot: LatestFrame,
    listener: FrameListener,
    source: &str,
) {
    let mut assembly: Vec<u8> = Vec::with_capacity(128 * 1024);
    let mut packet = vec![0u8; 64 * 1024];

    while !stop_flag.load(Ordering::SeqCst) {
        let len = match socket.recv_from(&mut packet) {
            Ok((len, _)) => len,
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(e) => {
                log::warn!("peer session socket error on {}: {}", source, e);
                break;
            }
        };

        let (payload, marker) = match parse_rtp_payload(&packet[..len]) {
            Ok(parsed) => parsed,
            Err(e) => {
                log::debug!("discarding peer datagram: {}", e);
                continue;
            }
        };

        if payload.is_empty() {
            continue;
        }

        if assembly.len() + payload.len() > MAX_JPEG_BYTES {
            log::warn!("peer frame exceeded max jpeg size; dropping");
            assembly.clear();
            continue;
        }
        assembly.extend_from_slice(payload);

        if !marker {
            continue;
        }

        // Marker bit closes the frame; decode whatever was assembled.
        let jpeg_bytes = std::mem::take(&mut assembly);
        match decode_peer_jpeg(&jpeg_bytes) {
            Ok(frame) => {
                frames_delivered.fetch_add(1, Ordering::SeqCst);
                listener.emit(&frame);
                slot.publish(frame);
            }
            Err(e) => {
                log::warn!("peer frame decode failed: {}", e);
            }
        }
    }
}

fn decode_peer_jpeg(bytes: &[u8]) -> Result<Frame> {
    let decoded = image::load_from_memory(bytes).context("decode peer jpeg")?;
    let (width, height) = decoded.dimensions();
    let raw = decoded.into_rgb8().into_raw();
    // The device encodes its blue-first plane order straight into the JPEG
    // channels, so what decodes as red is blue.
    Frame::from_wire(raw, width, height, ChannelOrder::Bgr)
}

fn parse_rtp_payload(packet: &[u8]) -> Result<(&[u8], bool)> {
    if packet.len() < 12 {
        return Err(anyhow!("rtp packet too small"));
    }
    let b0 = packet[0];
    let b1 = packet[1];
    let version = b0 >> 6;
    if version != 2 {
        return Err(anyhow!("unsupported rtp version {}", version));
    }
    let padding = (b0 & 0x20) != 0;
    let extension = (b0 & 0x10) != 0;
    let csrc_count = (b0 & 0x0F) as usize;
    let marker = (b1 & 0x80) != 0;
    let payload_type = b1 & 0x7F;
    if payload_type != RTP_JPEG_PAYLOAD_TYPE {
        return Err(anyhow!(
            "unsupported rtp payload type {}; expected {}",
            payload_type,
            RTP_JPEG_PAYLOAD_TYPE
        ));
    }

    let mut offset = 12 + csrc_count * 4;
    if packet.len() < offset {
        return Err(anyhow!("rtp packet missing csrc entries"));
    }

    if extension {
        if packet.len() < offset + 4 {
            return Err(anyhow!("rtp extension header truncated"));
        }
        let ext_len = u16::from_be_bytes([packet[offset + 2], packet[offset + 3]]) as usize;
        offset += 4 + ext_len * 4;
    }

    if packet.len() < offset {
        return Err(anyhow!("rtp packet truncated"));
    }

    let mut payload_end = packet.len();
    if padding {
        let pad_len = *packet.last().unwrap_or(&0) as usize;
        if pad_len > payload_end - offset {
            return Err(anyhow!("invalid rtp padding"));
        }
        payload_end -= pad_len;
    }

    Ok((&packet[offset..payload_end], marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rtp_packet(payload: &[u8], marker: bool) -> Vec<u8> {
        let mut packet = vec![0u8; 12];
        packet[0] = 0x80; // version 2
        packet[1] = RTP_JPEG_PAYLOAD_TYPE | if marker { 0x80 } else { 0 };
        packet.extend_from_slice(payload);
        packet
    }

    #[test]
    fn rtp_payload_and_marker_are_extracted() -> Result<()> {
        let packet = rtp_packet(b"jpeg-bytes", true);
        let (payload, marker) = parse_rtp_payload(&packet)?;
        assert_eq!(payload, b"jpeg-bytes");
        assert!(marker);

        let packet = rtp_packet(b"partial", false);
        let (_, marker) = parse_rtp_payload(&packet)?;
        assert!(!marker);
        Ok(())
    }

    #[test]
    fn malformed_rtp_packets_are_rejected() {
        assert!(parse_rtp_payload(&[0u8; 4]).is_err());

        // Wrong version.
        let mut packet = rtp_packet(b"x", true);
        packet[0] = 0x40;
        assert!(parse_rtp_payload(&packet).is_err());

        // Wrong payload type.
        let mut packet = rtp_packet(b"x", true);
        packet[1] = 96;
        assert!(parse_rtp_payload(&packet).is_err());
    }

    #[test]
    fn peer_jpeg_decode_swaps_red_and_blue() -> Result<()> {
        // Encode a solid red JPEG; the peer convention reads it as blue.
        let red = Frame::from_wire(vec![255, 0, 0].repeat(16 * 16), 16, 16, ChannelOrder::Rgb)?;
        let mut jpeg = Vec::new();
        let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, 95);
        encoder.encode(red.pixels(), 16, 16, image::ExtendedColorType::Rgb8)?;

        let frame = decode_peer_jpeg(&jpeg)?;
        let px = &frame.pixels()[..3];
        assert!(px[2] > 200, "blue channel should carry the signal: {:?}", px);
        assert!(px[0] < 60, "red channel should be near zero: {:?}", px);
        Ok(())
    }
}
