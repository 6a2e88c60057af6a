//! WebSocket frame parsing and serialization
//!
//! Frames are decoded either from an in-memory buffer ([`Frame::parse`]) or
//! straight off an async stream ([`Frame::read_from`]). Both paths share the
//! same header rules: inbound frames must be masked, reserved bits must be
//! clear, and control frames are single-frame and at most 125 bytes.
//!
//! A decoded [`Frame`] always carries its payload unmasked. Server frames are
//! encoded with FIN set and no mask.

use crate::{
    error::{FrameError, Result},
    protocol::{constants::DEFAULT_MAX_FRAME_SIZE, constants::MAX_CONTROL_PAYLOAD, frame::*, Opcode},
};
use bytes::{Buf, BufMut, Bytes, BytesMut};

#[cfg(feature = "tokio-runtime")]
use tokio::io::{AsyncRead, AsyncReadExt};

/// Represents a WebSocket frame according to RFC 6455
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Indicates if this is the final frame in a message
    pub fin: bool,
    /// Reserved bits (RSV1, RSV2, RSV3)
    pub rsv: [bool; 3],
    /// Frame opcode
    pub opcode: Opcode,
    /// Masking key, present on every client-to-server frame
    pub mask: Option<[u8; 4]>,
    /// Unmasked payload data
    pub payload: Bytes,
}

/// Decoding limits for inbound frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameConfig {
    /// Largest payload accepted for a single frame
    pub max_frame_size: usize,
    /// Reject frames whose mask bit is clear
    pub require_mask: bool,
}

impl FrameConfig {
    /// Limits for frames read by a server: masking is mandatory
    pub fn server(max_frame_size: usize) -> Self {
        Self {
            max_frame_size,
            require_mask: true,
        }
    }

    /// Limits for frames read by a client: masking is optional
    pub fn client(max_frame_size: usize) -> Self {
        Self {
            max_frame_size,
            require_mask: false,
        }
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self::server(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl Frame {
    /// Create a new frame with the given opcode and payload
    pub fn new(opcode: Opcode, payload: impl Into<Bytes>) -> Self {
        Self {
            fin: true,
            rsv: [false; 3],
            opcode,
            mask: None,
            payload: payload.into(),
        }
    }

    /// Create a continuation frame
    pub fn continuation(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Continuation, payload)
    }

    /// Create a text frame
    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Text, payload)
    }

    /// Create a binary frame
    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Binary, payload)
    }

    /// Create a close frame with optional code and reason
    pub fn close(code: Option<u16>, reason: Option<&str>) -> Self {
        Self::new(Opcode::Close, close_payload(code, reason))
    }

    /// Create a ping frame
    pub fn ping(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Ping, payload)
    }

    /// Create a pong frame
    pub fn pong(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Pong, payload)
    }

    /// Set the FIN bit
    pub fn fin(mut self, fin: bool) -> Self {
        self.fin = fin;
        self
    }

    /// Set reserved bits
    pub fn rsv(mut self, rsv1: bool, rsv2: bool, rsv3: bool) -> Self {
        self.rsv = [rsv1, rsv2, rsv3];
        self
    }

    /// Mask the frame with a fixed key when serialized
    pub fn with_mask(mut self, mask: [u8; 4]) -> Self {
        self.mask = Some(mask);
        self
    }

    /// Serialize the frame to bytes
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.write_to(&mut buf);
        buf.freeze()
    }

    /// Number of bytes [`Frame::write_to`] will produce
    pub fn encoded_len(&self) -> usize {
        let len = self.payload.len();
        let ext = if len < PAYLOAD_LEN_16 as usize {
            0
        } else if len <= u16::MAX as usize {
            2
        } else {
            8
        };
        let mask = if self.mask.is_some() { MASKING_KEY_LEN } else { 0 };
        2 + ext + mask + len
    }

    /// Write the frame to a buffer
    pub fn write_to(&self, buf: &mut BytesMut) {
        let first_byte = ((self.fin as u8) << 7)
            | ((self.rsv[0] as u8) << 6)
            | ((self.rsv[1] as u8) << 5)
            | ((self.rsv[2] as u8) << 4)
            | self.opcode.value();
        buf.put_u8(first_byte);

        let payload_len = self.payload.len();
        let mask_bit = if self.mask.is_some() { MASK_BIT } else { 0 };

        if payload_len < PAYLOAD_LEN_16 as usize {
            buf.put_u8(mask_bit | payload_len as u8);
        } else if payload_len <= u16::MAX as usize {
            buf.put_u8(mask_bit | PAYLOAD_LEN_16);
            buf.put_u16(payload_len as u16);
        } else {
            buf.put_u8(mask_bit | PAYLOAD_LEN_64);
            buf.put_u64(payload_len as u64);
        }

        match self.mask {
            Some(mask) => {
                buf.put_slice(&mask);
                let start = buf.len();
                buf.put_slice(&self.payload);
                apply_mask(&mut buf[start..], mask);
            }
            None => buf.put_slice(&self.payload),
        }
    }

    /// Parse a frame from bytes, advancing `buf` past it.
    ///
    /// Returns [`FrameError::InsufficientData`] without consuming anything
    /// when `buf` does not yet hold a whole frame. A frame that violates the
    /// reserved-bit or control-frame rules is consumed before the error is
    /// returned, so the buffer stays aligned on the next frame.
    pub fn parse(buf: &mut BytesMut, config: &FrameConfig) -> Result<Self> {
        if buf.len() < 2 {
            return Err(FrameError::InsufficientData {
                needed: 2,
                have: buf.len(),
            }
            .into());
        }

        let header = Header::parse(buf[0], buf[1]);
        header.check_mask(config)?;

        let mut offset = 2 + header.extended_len_bytes();
        if buf.len() < offset {
            return Err(FrameError::InsufficientData {
                needed: offset,
                have: buf.len(),
            }
            .into());
        }
        let payload_len = header.check_len(header.payload_len(&buf[2..offset]), config)?;

        let mask = if header.masked {
            if buf.len() < offset + MASKING_KEY_LEN {
                return Err(FrameError::InsufficientData {
                    needed: offset + MASKING_KEY_LEN,
                    have: buf.len(),
                }
                .into());
            }
            let mut mask = [0u8; 4];
            mask.copy_from_slice(&buf[offset..offset + MASKING_KEY_LEN]);
            offset += MASKING_KEY_LEN;
            Some(mask)
        } else {
            None
        };

        if buf.len() < offset + payload_len {
            return Err(FrameError::InsufficientData {
                needed: offset + payload_len,
                have: buf.len(),
            }
            .into());
        }

        buf.advance(offset);
        let payload = buf.split_to(payload_len);
        header.finish(mask, payload)
    }

    /// Read exactly one frame from an async stream.
    ///
    /// Partial reads are retried until the header, mask and payload are
    /// complete. Oversized and unmasked frames are rejected before their
    /// payload is read.
    #[cfg(feature = "tokio-runtime")]
    pub async fn read_from<R>(reader: &mut R, config: &FrameConfig) -> Result<Self>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut head = [0u8; 2];
        reader.read_exact(&mut head).await?;

        let header = Header::parse(head[0], head[1]);
        header.check_mask(config)?;

        let mut ext = [0u8; 8];
        let ext = &mut ext[..header.extended_len_bytes()];
        reader.read_exact(ext).await?;
        let payload_len = header.check_len(header.payload_len(ext), config)?;

        let mask = if header.masked {
            let mut mask = [0u8; 4];
            reader.read_exact(&mut mask).await?;
            Some(mask)
        } else {
            None
        };

        let mut payload = BytesMut::zeroed(payload_len);
        reader.read_exact(&mut payload).await?;
        header.finish(mask, payload)
    }

    /// Get the payload length
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Check if this is a control frame
    pub fn is_control(&self) -> bool {
        self.opcode.is_control()
    }

    /// Check if this is a data frame
    pub fn is_data(&self) -> bool {
        self.opcode.is_data()
    }

    /// Check if this is the final frame
    pub fn is_final(&self) -> bool {
        self.fin
    }
}

/// Encode a single server frame: FIN set, unmasked
pub fn encode(opcode: Opcode, payload: &[u8]) -> Bytes {
    Frame::new(opcode, Bytes::copy_from_slice(payload)).to_bytes()
}

/// XOR `buf` with `mask`, cycling the key every four bytes.
///
/// Masking is its own inverse.
#[inline]
pub fn apply_mask(buf: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte ^= mask[i & 3];
    }
}

/// Build a close frame payload from a status code and reason
pub fn close_payload(code: Option<u16>, reason: Option<&str>) -> Bytes {
    let mut payload = BytesMut::new();

    if let Some(code) = code {
        payload.put_u16(code);
        if let Some(reason) = reason {
            payload.put_slice(reason.as_bytes());
        }
    }

    payload.freeze()
}

/// Split a close frame payload into its status code and reason
pub fn parse_close_payload(payload: &[u8]) -> Option<(u16, String)> {
    if payload.len() < 2 {
        return None;
    }
    let code = u16::from_be_bytes([payload[0], payload[1]]);
    let reason = String::from_utf8_lossy(&payload[2..]).into_owned();
    Some((code, reason))
}

/// First two bytes of a frame, decoded
#[derive(Debug, Clone, Copy)]
struct Header {
    fin: bool,
    rsv: [bool; 3],
    opcode: Opcode,
    masked: bool,
    len_marker: u8,
}

impl Header {
    fn parse(first_byte: u8, second_byte: u8) -> Self {
        Self {
            fin: first_byte & FIN_BIT != 0,
            rsv: [
                first_byte & RSV1_BIT != 0,
                first_byte & RSV2_BIT != 0,
                first_byte & RSV3_BIT != 0,
            ],
            opcode: Opcode::from_nibble(first_byte),
            masked: second_byte & MASK_BIT != 0,
            len_marker: second_byte & PAYLOAD_LEN_MASK,
        }
    }

    fn check_mask(&self, config: &FrameConfig) -> Result<()> {
        if config.require_mask && !self.masked {
            return Err(FrameError::Unmasked.into());
        }
        Ok(())
    }

    fn extended_len_bytes(&self) -> usize {
        match self.len_marker {
            PAYLOAD_LEN_16 => 2,
            PAYLOAD_LEN_64 => 8,
            _ => 0,
        }
    }

    fn payload_len(&self, ext: &[u8]) -> u64 {
        match self.len_marker {
            PAYLOAD_LEN_16 => u16::from_be_bytes([ext[0], ext[1]]) as u64,
            PAYLOAD_LEN_64 => {
                let mut be = [0u8; 8];
                be.copy_from_slice(&ext[..8]);
                u64::from_be_bytes(be)
            }
            literal => literal as u64,
        }
    }

    fn check_len(&self, len: u64, config: &FrameConfig) -> Result<usize> {
        if len > config.max_frame_size as u64 {
            return Err(FrameError::TooLarge {
                size: len,
                max: config.max_frame_size,
            }
            .into());
        }
        Ok(len as usize)
    }

    fn finish(self, mask: Option<[u8; 4]>, mut payload: BytesMut) -> Result<Frame> {
        if let Some(mask) = mask {
            apply_mask(&mut payload, mask);
        }

        if self.rsv.iter().any(|bit| *bit) {
            return Err(FrameError::ReservedBitsSet.into());
        }

        if self.opcode.is_control() {
            if !self.fin {
                return Err(FrameError::FragmentedControlFrame.into());
            }
            if payload.len() > MAX_CONTROL_PAYLOAD {
                return Err(FrameError::ControlFrameTooLarge(payload.len()).into());
            }
        }

        Ok(Frame {
            fin: self.fin,
            rsv: self.rsv,
            opcode: self.opcode,
            mask,
            payload: payload.freeze(),
        })
    }
}
