//! Length-prefix framing codec (§4.5): 4-byte big-endian length followed by
//! the payload. A pure value type over a byte-stream cursor, the same
//! `ReadingHeader`/`ReadingPayload` shape `flux-network`'s `RxState` uses for
//! its own length-prefixed protocol — no ring or socket involved, so it is
//! unit-testable on its own.

use crate::error::{Result, TransportError};

const HEADER_LEN: usize = 4;

/// Where a connection's receive side currently is in decoding one frame.
#[derive(Debug, Clone)]
pub enum FrameDecoder {
    HeaderPartial {
        have: [u8; HEADER_LEN],
        len: usize,
    },
    PayloadPartial {
        len: u32,
        filled: usize,
    },
}

impl FrameDecoder {
    pub fn new() -> FrameDecoder {
        FrameDecoder::HeaderPartial {
            have: [0; HEADER_LEN],
            len: 0,
        }
    }

    fn push_header_byte(have: &mut [u8; HEADER_LEN], len: &mut usize, byte: u8) {
        have[*len] = byte;
        *len += 1;
    }

    /// Consumes as much of `chunk` as possible, calling `on_frame` for every
    /// fully decoded payload. Returns the number of bytes consumed from
    /// `chunk`; a framing error aborts immediately, leaving the decoder in
    /// an indeterminate state — the caller must close the connection rather
    /// than continue feeding it, per §4.5: "resynchronization is not
    /// supported because stream position is ambiguous."
    pub fn decode(
        &mut self,
        chunk: &[u8],
        max_frame: u32,
        mut on_frame: impl FnMut(&[u8]) -> Result<()>,
    ) -> Result<usize> {
        let mut consumed = 0;
        let mut payload = Vec::new();

        while consumed < chunk.len() {
            match self {
                FrameDecoder::HeaderPartial { have, len } => {
                    while *len < HEADER_LEN && consumed < chunk.len() {
                        Self::push_header_byte(have, len, chunk[consumed]);
                        consumed += 1;
                    }
                    if *len == HEADER_LEN {
                        let frame_len = u32::from_be_bytes(*have);
                        if frame_len == 0 {
                            return Err(TransportError::framing("zero-length frame"));
                        }
                        if frame_len > max_frame {
                            return Err(TransportError::framing("oversize frame"));
                        }
                        payload = vec![0u8; frame_len as usize];
                        *self = FrameDecoder::PayloadPartial {
                            len: frame_len,
                            filled: 0,
                        };
                    }
                }

                FrameDecoder::PayloadPartial { len, filled } => {
                    let need = *len as usize - *filled;
                    let take = need.min(chunk.len() - consumed);
                    payload[*filled..*filled + take]
                        .copy_from_slice(&chunk[consumed..consumed + take]);
                    *filled += take;
                    consumed += take;

                    if *filled == *len as usize {
                        on_frame(&payload)?;
                        *self = FrameDecoder::HeaderPartial {
                            have: [0; HEADER_LEN],
                            len: 0,
                        };
                    }
                }
            }
        }

        Ok(consumed)
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        FrameDecoder::new()
    }
}

/// Encodes `payload` as a 4-byte big-endian length prefix followed by the
/// payload bytes. Fails if `payload` exceeds `max_frame`.
pub fn encode(payload: &[u8], max_frame: u32) -> Result<Vec<u8>> {
    if payload.len() > max_frame as usize {
        return Err(TransportError::framing("oversize frame"));
    }
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Decodes a destination-sized read: fails if `dest` cannot hold the
/// frame's declared length, per §4.5's "destination too small" condition.
/// Used by callers that decode a single already-complete frame buffer
/// rather than streaming through [`FrameDecoder`].
pub fn decode_into(framed: &[u8], dest: &mut [u8]) -> Result<usize> {
    if framed.len() < HEADER_LEN {
        return Err(TransportError::framing("truncated header"));
    }
    let len = u32::from_be_bytes(framed[..HEADER_LEN].try_into().unwrap());
    if len == 0 {
        return Err(TransportError::framing("zero-length frame"));
    }
    let len = len as usize;
    if dest.len() < len {
        return Err(TransportError::framing("destination too small"));
    }
    if framed.len() < HEADER_LEN + len {
        return Err(TransportError::framing("truncated payload"));
    }
    dest[..len].copy_from_slice(&framed[HEADER_LEN..HEADER_LEN + len]);
    Ok(len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_a_frame_split_across_many_chunks() {
        let mut dec = FrameDecoder::new();
        let framed = encode(b"hello world", 1 << 20).unwrap();
        let mut frames = Vec::new();

        for byte in framed.chunks(1) {
            dec.decode(byte, 1 << 20, |f| {
                frames.push(f.to_vec());
                Ok(())
            })
            .unwrap();
        }

        assert_eq!(frames, vec![b"hello world".to_vec()]);
    }

    #[test]
    fn decodes_several_frames_in_one_chunk() {
        let mut dec = FrameDecoder::new();
        let mut buf = encode(b"one", 1 << 20).unwrap();
        buf.extend(encode(b"two", 1 << 20).unwrap());

        let mut frames = Vec::new();
        dec.decode(&buf, 1 << 20, |f| {
            frames.push(f.to_vec());
            Ok(())
        })
        .unwrap();

        assert_eq!(frames, vec![b"one".to_vec(), b"two".to_vec()]);
    }

    #[test]
    fn zero_length_frame_is_rejected() {
        let mut dec = FrameDecoder::new();
        let framed = [0u8, 0, 0, 0];
        let err = dec.decode(&framed, 1 << 20, |_| Ok(())).unwrap_err();
        assert!(matches!(err, TransportError::Framing { .. }));
    }

    #[test]
    fn oversize_frame_is_rejected_before_allocating_payload() {
        let mut dec = FrameDecoder::new();
        let framed = 100u32.to_be_bytes();
        let err = dec.decode(&framed, 16, |_| Ok(())).unwrap_err();
        assert!(matches!(err, TransportError::Framing { .. }));
    }

    #[test]
    fn max_frame_boundary_is_accepted() {
        let mut dec = FrameDecoder::new();
        let payload = vec![7u8; 16];
        let framed = encode(&payload, 16).unwrap();
        let mut frames = Vec::new();
        dec.decode(&framed, 16, |f| {
            frames.push(f.to_vec());
            Ok(())
        })
        .unwrap();
        assert_eq!(frames, vec![payload]);
    }

    #[test]
    fn decode_into_rejects_undersized_destination() {
        let framed = encode(b"0123456789", 1 << 20).unwrap();
        let mut dest = [0u8; 4];
        let err = decode_into(&framed, &mut dest).unwrap_err();
        assert!(matches!(err, TransportError::Framing { .. }));
    }

    #[test]
    fn encode_rejects_oversize_payload() {
        let payload = vec![0u8; 17];
        let err = encode(&payload, 16).unwrap_err();
        assert!(matches!(err, TransportError::Framing { .. }));
    }
}
