//! The binary packet protocol (RFC 4253 section 6).

use crate::crypto::{AlgorithmProvider, Compression, Mac, Opening, Sealing};
use bytes::{BufMut as _, Bytes, BytesMut};
use std::{io, num::Wrapping};
use tokio::io::{AsyncRead, AsyncReadExt as _};

/// Alignment used while no cipher is active.
const CLEARTEXT_BLOCK_SIZE: usize = 8;
const MIN_PADDING_LEN: usize = 4;
const MIN_PACKET_LEN: usize = 16;

/// A decoded packet, with the sequence number it was received under.
#[derive(Debug, Clone)]
pub(crate) struct Packet {
    pub(crate) seqn: u32,
    pub(crate) payload: Bytes,
}

impl Packet {
    pub(crate) fn message_type(&self) -> Option<u8> {
        self.payload.get(0).copied()
    }
}

/// Traffic counters since the last key installation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Stats {
    pub(crate) bytes: u64,
    pub(crate) packets: u64,
}

/// The keys of one direction, produced by a key exchange.
pub(crate) struct SealingKeys {
    pub(crate) cipher: Box<dyn Sealing>,
    pub(crate) mac: Option<Box<dyn Mac>>,
    pub(crate) compression: Option<Box<dyn Compression>>,
}

pub(crate) struct OpeningKeys {
    pub(crate) cipher: Box<dyn Opening>,
    pub(crate) mac: Option<Box<dyn Mac>>,
    pub(crate) compression: Option<Box<dyn Compression>>,
}

// ==== SendPacket ====

pub(crate) struct SendPacket {
    seqn: Wrapping<u32>,
    keys: Option<SealingKeys>,
    extra_padding_blocks: u8,
    stats: Stats,
    compressed: Vec<u8>,
}

impl SendPacket {
    pub(crate) fn new(extra_padding_blocks: u8) -> Self {
        Self {
            seqn: Wrapping(0),
            keys: None,
            extra_padding_blocks,
            stats: Stats::default(),
            compressed: vec![],
        }
    }

    pub(crate) fn seqn(&self) -> u32 {
        self.seqn.0
    }

    pub(crate) fn stats(&self) -> Stats {
        self.stats
    }

    /// Switches to new keys; called right after sending NEWKEYS.
    pub(crate) fn install(&mut self, keys: SealingKeys, reset_seqn: bool) {
        self.keys = Some(keys);
        self.stats = Stats::default();
        if reset_seqn {
            self.seqn = Wrapping(0);
        }
    }

    #[cfg(test)]
    pub(crate) fn set_seqn(&mut self, seqn: u32) {
        self.seqn = Wrapping(seqn);
    }

    fn padding_length(
        &self,
        payload_len: usize,
        provider: &dyn AlgorithmProvider,
    ) -> Result<usize, crate::Error> {
        let (block_size, aead) = match self.keys {
            Some(ref keys) => (
                std::cmp::max(keys.cipher.block_size(), CLEARTEXT_BLOCK_SIZE),
                keys.cipher.tag_len() > 0,
            ),
            None => (CLEARTEXT_BLOCK_SIZE, false),
        };

        // AEAD constructions leave the length field out of the alignment.
        let aligned = if aead { 1 + payload_len } else { 5 + payload_len };
        let mut padding_len = block_size - aligned % block_size;
        if padding_len < MIN_PADDING_LEN {
            padding_len += block_size;
        }
        while 5 + payload_len + padding_len < MIN_PACKET_LEN {
            padding_len += block_size;
        }

        if self.extra_padding_blocks > 0 {
            let mut r = [0u8; 1];
            provider.fill_random(&mut r[..])?;
            let extra = r[0] as usize % (self.extra_padding_blocks as usize + 1);
            let max_extra = (u8::MAX as usize - padding_len) / block_size;
            padding_len += std::cmp::min(extra, max_extra) * block_size;
        }

        Ok(padding_len)
    }

    /// Encodes a payload into a wire packet and appends it to `buf`.
    pub(crate) fn fill_buf(
        &mut self,
        payload: &[u8],
        provider: &dyn AlgorithmProvider,
        buf: &mut Vec<u8>,
    ) -> Result<(), crate::Error> {
        let payload = match self.keys.as_mut().and_then(|keys| keys.compression.as_mut()) {
            Some(compression) => {
                self.compressed.clear();
                compression.compress(payload, &mut self.compressed)?;
                &self.compressed[..]
            }
            None => payload,
        };

        let padding_length = self.padding_length(payload.len(), provider)?;
        let packet_length = 1 + payload.len() + padding_length;
        let (tag_len, mac_len) = match self.keys {
            Some(ref keys) => (
                keys.cipher.tag_len(),
                keys.mac.as_ref().map_or(0, |mac| mac.mac_len()),
            ),
            None => (0, 0),
        };
        tracing::trace!(
            "packet_length = {}, padding_length = {}",
            packet_length,
            padding_length
        );

        let start = buf.len();
        buf.reserve(4 + packet_length + tag_len + mac_len);
        buf.put_u32(packet_length as u32);
        buf.put_u8(padding_length as u8);
        buf.put_slice(payload);
        let padding_start = buf.len();
        buf.resize(padding_start + padding_length, 0);
        provider.fill_random(&mut buf[padding_start..])?;
        buf.resize(start + 4 + packet_length + tag_len + mac_len, 0);

        if let Some(ref mut keys) = self.keys {
            let seqn = self.seqn.0;
            let (packet, trailer) = buf[start..].split_at_mut(4 + packet_length);
            let (tag, mac_out) = trailer.split_at_mut(tag_len);
            if let Some(ref mac) = keys.mac {
                mac.sign(seqn, packet, mac_out);
            }
            keys.cipher.seal_in_place(seqn, packet, tag)?;
        }

        self.seqn += Wrapping(1);
        self.stats.packets += 1;
        self.stats.bytes += (buf.len() - start) as u64;

        Ok(())
    }
}

// ==== RecvPacket ====

pub(crate) struct RecvPacket {
    seqn: Wrapping<u32>,
    keys: Option<OpeningKeys>,
    max_packet_len: usize,
    // decrypted length of the packet being read.
    packet_length: Option<u32>,
    stats: Stats,
}

impl RecvPacket {
    pub(crate) fn new(max_packet_len: usize) -> Self {
        Self {
            seqn: Wrapping(0),
            keys: None,
            max_packet_len,
            packet_length: None,
            stats: Stats::default(),
        }
    }

    pub(crate) fn seqn(&self) -> u32 {
        self.seqn.0
    }

    pub(crate) fn stats(&self) -> Stats {
        self.stats
    }

    /// Switches to new keys; called right after receiving NEWKEYS.
    pub(crate) fn install(&mut self, keys: OpeningKeys, reset_seqn: bool) {
        self.keys = Some(keys);
        self.stats = Stats::default();
        if reset_seqn {
            self.seqn = Wrapping(0);
        }
    }

    #[cfg(test)]
    pub(crate) fn set_seqn(&mut self, seqn: u32) {
        self.seqn = Wrapping(seqn);
    }

    fn block_size(&self) -> usize {
        self.keys.as_ref().map_or(CLEARTEXT_BLOCK_SIZE, |keys| {
            std::cmp::max(keys.cipher.block_size(), CLEARTEXT_BLOCK_SIZE)
        })
    }

    fn read_length(&mut self, buf: &mut BytesMut) -> Result<Option<u32>, crate::Error> {
        if let Some(len) = self.packet_length {
            return Ok(Some(len));
        }

        let head_len = self.keys.as_ref().map_or(4, |keys| keys.cipher.head_len());
        if buf.len() < head_len {
            return Ok(None);
        }

        let packet_length = match self.keys {
            Some(ref mut keys) => keys
                .cipher
                .decrypt_packet_length(self.seqn.0, &mut buf[..head_len])?,
            None => u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
        };
        tracing::trace!("packet_length = {}", packet_length);

        let len = packet_length as usize;
        let aead = self
            .keys
            .as_ref()
            .map_or(false, |keys| keys.cipher.tag_len() > 0);
        let aligned = if aead { len } else { 4 + len };
        if len < 1 + MIN_PADDING_LEN || 4 + len < head_len {
            return Err(crate::Error::protocol("packet is too short"));
        }
        if len > self.max_packet_len {
            return Err(crate::Error::protocol(format!(
                "packet length {} exceeds the limit",
                len
            )));
        }
        if aligned % self.block_size() != 0 {
            return Err(crate::Error::protocol("packet is not aligned to the block size"));
        }

        self.packet_length = Some(packet_length);
        Ok(Some(packet_length))
    }

    /// Attempts to decode one packet from the front of `buf`.
    ///
    /// Returns `Ok(None)` when more bytes are needed. Any error is fatal to
    /// the connection.
    pub(crate) fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Packet>, crate::Error> {
        let packet_length = match self.read_length(buf)? {
            Some(len) => len,
            None => return Ok(None),
        };
        let len = packet_length as usize;

        let (tag_len, mac_len) = match self.keys {
            Some(ref keys) => (
                keys.cipher.tag_len(),
                keys.mac.as_ref().map_or(0, |mac| mac.mac_len()),
            ),
            None => (0, 0),
        };
        let total = 4 + len + tag_len + mac_len;
        if buf.len() < total {
            return Ok(None);
        }

        let mut frame = buf.split_to(total);
        self.packet_length = None;
        let seqn = self.seqn.0;
        self.seqn += Wrapping(1);
        self.stats.packets += 1;
        self.stats.bytes += total as u64;

        if let Some(ref mut keys) = self.keys {
            let (sealed, mac) = frame.split_at_mut(4 + len + tag_len);
            keys.cipher
                .open_in_place(seqn, sealed, packet_length)
                .map_err(|_| crate::Error::MacMismatch)?;
            if let Some(ref verifier) = keys.mac {
                verifier
                    .verify(seqn, &sealed[..4 + len], mac)
                    .map_err(|_| crate::Error::MacMismatch)?;
            }
        }

        let padding_length = frame[4] as usize;
        if padding_length < MIN_PADDING_LEN || padding_length + 1 > len {
            return Err(crate::Error::protocol("invalid padding length"));
        }
        let payload_end = 4 + len - padding_length;

        let compression = self
            .keys
            .as_mut()
            .and_then(|keys| keys.compression.as_mut());
        let payload = match compression {
            Some(compression) => {
                let mut out = vec![];
                compression.decompress(&frame[5..payload_end], &mut out)?;
                Bytes::from(out)
            }
            None => frame.freeze().slice(5..payload_end),
        };
        if payload.is_empty() {
            return Err(crate::Error::protocol("empty payload"));
        }

        Ok(Some(Packet { seqn, payload }))
    }

    /// Reads from `stream` until a whole packet is decoded.
    pub(crate) async fn recv<R>(
        &mut self,
        stream: &mut R,
        buf: &mut BytesMut,
    ) -> Result<Packet, crate::Error>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            if let Some(packet) = self.decode(buf)? {
                return Ok(packet);
            }
            let amt = stream.read_buf(buf).await.map_err(crate::Error::io)?;
            if amt == 0 {
                return Err(crate::Error::io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed by peer",
                )));
            }
        }
    }
}
