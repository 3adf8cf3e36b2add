//! Frame assembly and parsing.
//!
//! Stream layout carried by the data symbols:
//!
//! ```text
//! u16 BE  frame length in data symbols (covers the whole stream)
//! u32 BE  magic "SNLK"
//! u8      version
//! u8      flags (bit0 compressed, bit1 encrypted)
//! u32 BE  body length L_b
//! RS(255,223) codewords over:
//!     [wrapped_key (256 B) | nonce (12 B)]   iff encrypted
//!     body (L_b bytes)
//!     trailer: 16 B AEAD tag iff encrypted, else u32 BE CRC-32
//! 0x55 padding to the symbol boundary
//! ```
//!
//! The 12-byte prefix travels uncoded; the CRC-32 (IEEE) covers the header
//! fields and the body so a miscorrected Reed-Solomon block cannot slip
//! through on the unencrypted path.

use crate::crypto::{NONCE_LEN, TAG_LEN, WRAPPED_KEY_LEN};
use crate::error::{Result, SonicLinkError};
use crate::fec::{self, RsCodec};

pub const MAGIC: u32 = 0x534E_4C4B;
pub const VERSION: u8 = 1;
pub const FLAG_COMPRESSED: u8 = 0b0000_0001;
pub const FLAG_ENCRYPTED: u8 = 0b0000_0010;
pub const PREFIX_LEN: usize = 12;
pub const CRC_LEN: usize = 4;
pub const PAD_BYTE: u8 = 0x55;

/// CRC-32, IEEE polynomial, reflected.
pub fn crc32(data: &[u8]) -> u32 {
    !crc32_update(0xFFFF_FFFF, data)
}

fn crc32_update(mut crc: u32, data: &[u8]) -> u32 {
    for &b in data {
        crc ^= b as u32;
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (0xEDB8_8320 & mask);
        }
    }
    crc
}

/// Encrypted-frame fields that ride inside the FEC region.
pub struct FrameEnvelope {
    pub wrapped_key: [u8; WRAPPED_KEY_LEN],
    pub nonce: [u8; NONCE_LEN],
    pub tag: [u8; TAG_LEN],
}

/// One frame's logical content, before FEC and symbol mapping.
pub struct Frame {
    pub flags: u8,
    pub body: Vec<u8>,
    pub envelope: Option<FrameEnvelope>,
}

fn header_fields(flags: u8, body_len: u32) -> [u8; 10] {
    let mut h = [0u8; 10];
    h[..4].copy_from_slice(&MAGIC.to_be_bytes());
    h[4] = VERSION;
    h[5] = flags;
    h[6..10].copy_from_slice(&body_len.to_be_bytes());
    h
}

fn fec_input_len(flags: u8, body_len: usize) -> usize {
    let extra = if flags & FLAG_ENCRYPTED != 0 {
        WRAPPED_KEY_LEN + NONCE_LEN
    } else {
        0
    };
    let trailer = if flags & FLAG_ENCRYPTED != 0 { TAG_LEN } else { CRC_LEN };
    extra + body_len + trailer
}

/// Assemble the byte stream for one frame. Returns the padded stream and the
/// data symbol count it occupies.
pub fn assemble(frame: &Frame, rs: &RsCodec, bytes_per_symbol: usize) -> Result<(Vec<u8>, u16)> {
    if frame.body.len() > u32::MAX as usize {
        return Err(SonicLinkError::InvalidFrame("body too large".to_string()));
    }
    let encrypted = frame.flags & FLAG_ENCRYPTED != 0;
    if encrypted != frame.envelope.is_some() {
        return Err(SonicLinkError::InvalidFrame(
            "encrypted flag disagrees with envelope".to_string(),
        ));
    }
    let header = header_fields(frame.flags, frame.body.len() as u32);

    let mut input = Vec::with_capacity(fec_input_len(frame.flags, frame.body.len()));
    if let Some(envelope) = &frame.envelope {
        input.extend_from_slice(&envelope.wrapped_key);
        input.extend_from_slice(&envelope.nonce);
    }
    input.extend_from_slice(&frame.body);
    if let Some(envelope) = &frame.envelope {
        input.extend_from_slice(&envelope.tag);
    } else {
        let crc = crc32_update(crc32_update(0xFFFF_FFFF, &header), &frame.body);
        input.extend_from_slice(&(!crc).to_be_bytes());
    }

    let coded = rs.encode_stream(&input);
    let stream_len = PREFIX_LEN + coded.len();
    let symbols = stream_len.div_ceil(bytes_per_symbol);
    if symbols > u16::MAX as usize {
        return Err(SonicLinkError::InvalidFrame(
            "frame exceeds the maximum symbol count".to_string(),
        ));
    }

    let mut stream = Vec::with_capacity(symbols * bytes_per_symbol);
    stream.extend_from_slice(&(symbols as u16).to_be_bytes());
    stream.extend_from_slice(&header);
    stream.extend_from_slice(&coded);
    stream.resize(symbols * bytes_per_symbol, PAD_BYTE);
    Ok((stream, symbols as u16))
}

/// Decoded clear prefix.
#[derive(Debug, Clone, Copy)]
pub struct Prefix {
    pub symbols: u16,
    pub flags: u8,
    pub body_len: u32,
}

/// Validate and read the 12-byte clear prefix.
pub fn parse_prefix(bytes: &[u8]) -> Result<Prefix> {
    if bytes.len() < PREFIX_LEN {
        return Err(SonicLinkError::InvalidFrame("short prefix".to_string()));
    }
    let symbols = u16::from_be_bytes([bytes[0], bytes[1]]);
    let magic = u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);
    if magic != MAGIC {
        return Err(SonicLinkError::InvalidFrame("bad magic".to_string()));
    }
    if bytes[6] != VERSION {
        return Err(SonicLinkError::InvalidFrame(format!(
            "unsupported version {}",
            bytes[6]
        )));
    }
    let flags = bytes[7];
    if symbols == 0 {
        return Err(SonicLinkError::InvalidFrame("zero symbol count".to_string()));
    }
    let body_len = u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
    Ok(Prefix {
        symbols,
        flags,
        body_len,
    })
}

/// Parse a full frame stream (prefix + FEC region + padding).
pub fn parse(stream: &[u8], rs: &RsCodec) -> Result<Frame> {
    let prefix = parse_prefix(stream)?;
    let flags = prefix.flags;
    let body_len = prefix.body_len as usize;

    let input_len = fec_input_len(flags, body_len);
    let region_len = fec::block_count(input_len) * fec::BLOCK_LEN;
    if stream.len() < PREFIX_LEN + region_len {
        return Err(SonicLinkError::InvalidFrame(
            "stream shorter than the declared frame".to_string(),
        ));
    }
    let input = rs.decode_stream(&stream[PREFIX_LEN..PREFIX_LEN + region_len], input_len)?;

    let encrypted = flags & FLAG_ENCRYPTED != 0;
    if encrypted {
        let mut wrapped_key = [0u8; WRAPPED_KEY_LEN];
        wrapped_key.copy_from_slice(&input[..WRAPPED_KEY_LEN]);
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&input[WRAPPED_KEY_LEN..WRAPPED_KEY_LEN + NONCE_LEN]);
        let body_start = WRAPPED_KEY_LEN + NONCE_LEN;
        let body = input[body_start..body_start + body_len].to_vec();
        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(&input[body_start + body_len..]);
        Ok(Frame {
            flags,
            body,
            envelope: Some(FrameEnvelope {
                wrapped_key,
                nonce,
                tag,
            }),
        })
    } else {
        let body = input[..body_len].to_vec();
        let expected = u32::from_be_bytes([
            input[body_len],
            input[body_len + 1],
            input[body_len + 2],
            input[body_len + 3],
        ]);
        let header = header_fields(flags, prefix.body_len);
        let actual = !crc32_update(crc32_update(0xFFFF_FFFF, &header), &body);
        if actual != expected {
            return Err(SonicLinkError::BadCrc);
        }
        Ok(Frame {
            flags,
            body,
            envelope: None,
        })
    }
}
