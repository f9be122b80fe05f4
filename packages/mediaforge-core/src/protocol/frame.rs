//! Binary frame layout: a 4-byte big-endian header length, followed by that
//! many bytes of UTF-8 JSON header, followed by the arbitrary payload.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol_constants::BINARY_HEADER_LEN_BYTES;

/// Header carried by a binary frame. Inbound (upload): `job_id` + the
/// client-provided `filename`. Outbound (artifact delivery): the same shape,
/// echoing the job id and the synthesized output's filename.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameHeader {
    pub job_id: String,
    pub filename: String,
}

/// A decoded binary frame: header plus payload.
#[derive(Debug, Clone)]
pub struct BinaryFrame {
    pub header: FrameHeader,
    pub payload: Bytes,
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame too short to contain a header length prefix")]
    Truncated,
    #[error("declared header length exceeds the bytes available")]
    HeaderLengthOverflow,
    #[error("frame header is not valid JSON: {0}")]
    InvalidHeaderJson(String),
}

impl BinaryFrame {
    pub fn new(header: FrameHeader, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Encodes this frame into the wire layout.
    pub fn encode(&self) -> Bytes {
        let header_json = serde_json::to_vec(&self.header).expect("FrameHeader always serializes");
        let mut buf = BytesMut::with_capacity(
            BINARY_HEADER_LEN_BYTES + header_json.len() + self.payload.len(),
        );
        buf.put_u32(header_json.len() as u32);
        buf.put_slice(&header_json);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Decodes a frame from its wire layout.
    pub fn decode(mut bytes: Bytes) -> Result<Self, FrameError> {
        if bytes.len() < BINARY_HEADER_LEN_BYTES {
            return Err(FrameError::Truncated);
        }
        let header_len = bytes.get_u32() as usize;
        if header_len > bytes.len() {
            return Err(FrameError::HeaderLengthOverflow);
        }
        let header_bytes = bytes.split_to(header_len);
        let header: FrameHeader = serde_json::from_slice(&header_bytes)
            .map_err(|e| FrameError::InvalidHeaderJson(e.to_string()))?;
        Ok(Self {
            header,
            payload: bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_header_and_payload() {
        let frame = BinaryFrame::new(
            FrameHeader {
                job_id: "j1".into(),
                filename: "out.mp4".into(),
            },
            Bytes::from_static(b"fake video bytes"),
        );
        let encoded = frame.encode();
        let decoded = BinaryFrame::decode(encoded).unwrap();
        assert_eq!(decoded.header.job_id, "j1");
        assert_eq!(decoded.header.filename, "out.mp4");
        assert_eq!(decoded.payload, Bytes::from_static(b"fake video bytes"));
    }

    #[test]
    fn rejects_truncated_length_prefix() {
        let bytes = Bytes::from_static(&[0, 0]);
        assert!(matches!(BinaryFrame::decode(bytes), Err(FrameError::Truncated)));
    }

    #[test]
    fn rejects_header_length_longer_than_buffer() {
        let mut buf = BytesMut::new();
        buf.put_u32(1000);
        buf.put_slice(b"short");
        assert!(matches!(
            BinaryFrame::decode(buf.freeze()),
            Err(FrameError::HeaderLengthOverflow)
        ));
    }

    #[test]
    fn rejects_invalid_header_json() {
        let mut buf = BytesMut::new();
        buf.put_u32(5);
        buf.put_slice(b"notjs");
        assert!(matches!(
            BinaryFrame::decode(buf.freeze()),
            Err(FrameError::InvalidHeaderJson(_))
        ));
    }
}
