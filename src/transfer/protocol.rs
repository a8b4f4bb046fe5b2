//! Wire format of the peer channel.
//!
//! Control messages are JSON text frames tagged by `type`. File bytes travel
//! in binary frames:
//!
//! ```text
//! +----------------------+-----------------+-------------+
//! | fileId length: u32 LE| fileId (UTF-8)  | chunk bytes |
//! +----------------------+-----------------+-------------+
//! ```

use serde::{Deserialize, Serialize};

use super::catalog::{FileCatalogEntry, FileId, DEFAULT_MEDIA_TYPE};
use crate::error::ProtocolError;

const LENGTH_PREFIX: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ControlMessage {
    /// Full replacement of the sender's shared-file catalog
    CatalogAnnounce { entries: Vec<FileCatalogEntry> },
    #[serde(rename_all = "camelCase")]
    TransferRequest { file_id: FileId },
    #[serde(rename_all = "camelCase")]
    TransferBegin {
        file_id: FileId,
        name: String,
        byte_size: u64,
        #[serde(default = "default_media_type")]
        media_type: String,
    },
    #[serde(rename_all = "camelCase")]
    TransferEnd { file_id: FileId },
}

fn default_media_type() -> String {
    DEFAULT_MEDIA_TYPE.to_string()
}

impl ControlMessage {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode {
            reason: e.to_string(),
        })
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::UnknownControlMessage {
            reason: e.to_string(),
        })
    }
}

/// A decoded binary frame, borrowing from the received buffer
#[derive(Debug, PartialEq, Eq)]
pub struct DataFrame<'a> {
    pub file_id: &'a str,
    pub chunk: &'a [u8],
}

pub fn encode_frame(file_id: &FileId, chunk: &[u8]) -> Vec<u8> {
    let id = file_id.as_str().as_bytes();
    let mut frame = Vec::with_capacity(LENGTH_PREFIX + id.len() + chunk.len());
    frame.extend_from_slice(&(id.len() as u32).to_le_bytes());
    frame.extend_from_slice(id);
    frame.extend_from_slice(chunk);
    frame
}

pub fn decode_frame(frame: &[u8]) -> Result<DataFrame<'_>, ProtocolError> {
    let malformed = |reason: String| ProtocolError::MalformedFrame { reason };

    if frame.len() < LENGTH_PREFIX {
        return Err(malformed(format!("{} bytes is shorter than the length prefix", frame.len())));
    }
    let (prefix, rest) = frame.split_at(LENGTH_PREFIX);
    let mut len_bytes = [0u8; LENGTH_PREFIX];
    len_bytes.copy_from_slice(prefix);
    let id_len = u32::from_le_bytes(len_bytes) as usize;

    if id_len > rest.len() {
        return Err(malformed(format!(
            "fileId length {} exceeds remaining {} bytes",
            id_len,
            rest.len()
        )));
    }
    let (id, chunk) = rest.split_at(id_len);
    let file_id = std::str::from_utf8(id).map_err(|e| malformed(format!("fileId is not UTF-8: {}", e)))?;

    Ok(DataFrame { file_id, chunk })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_frame_layout() {
        let frame = encode_frame(&FileId::from("k3j9x0ab"), b"hello");
        assert_eq!(&frame[..4], &[8, 0, 0, 0]);
        assert_eq!(&frame[4..12], b"k3j9x0ab");
        assert_eq!(&frame[12..], b"hello");

        let decoded = decode_frame(&frame).unwrap();
        assert_eq!(decoded.file_id, "k3j9x0ab");
        assert_eq!(decoded.chunk, b"hello");
    }

    #[test]
    fn test_frame_with_empty_chunk() {
        let frame = encode_frame(&FileId::from("abc"), &[]);
        let decoded = decode_frame(&frame).unwrap();
        assert_eq!(decoded.file_id, "abc");
        assert!(decoded.chunk.is_empty());
    }

    #[test]
    fn test_malformed_frames() {
        assert!(matches!(
            decode_frame(&[1, 0]),
            Err(ProtocolError::MalformedFrame { .. })
        ));

        // Claims a 300-byte id but carries 3
        let mut frame = 300u32.to_le_bytes().to_vec();
        frame.extend_from_slice(b"abc");
        assert!(decode_frame(&frame).is_err());

        let mut frame = 2u32.to_le_bytes().to_vec();
        frame.extend_from_slice(&[0xff, 0xfe, 1, 2]);
        assert!(decode_frame(&frame).is_err());
    }

    #[test]
    fn test_control_message_shapes() {
        let begin = ControlMessage::TransferBegin {
            file_id: FileId::from("k3j9x0ab"),
            name: "hello.txt".into(),
            byte_size: 5,
            media_type: "text/plain".into(),
        };
        let value: serde_json::Value = serde_json::from_str(&begin.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "transfer-begin",
                "fileId": "k3j9x0ab",
                "name": "hello.txt",
                "byteSize": 5,
                "mediaType": "text/plain",
            })
        );

        let request = ControlMessage::decode(r#"{"type":"transfer-request","fileId":"k3j9x0ab"}"#).unwrap();
        assert_eq!(request, ControlMessage::TransferRequest { file_id: FileId::from("k3j9x0ab") });
    }

    #[test]
    fn test_begin_without_media_type() {
        let msg = ControlMessage::decode(
            r#"{"type":"transfer-begin","fileId":"a","name":"x","byteSize":0}"#,
        )
        .unwrap();
        assert!(matches!(msg, ControlMessage::TransferBegin { media_type, .. } if media_type == DEFAULT_MEDIA_TYPE));
    }

    #[test]
    fn test_unknown_control_message() {
        assert!(matches!(
            ControlMessage::decode(r#"{"type":"chat","text":"hi"}"#),
            Err(ProtocolError::UnknownControlMessage { .. })
        ));
        assert!(ControlMessage::decode("not json").is_err());
    }

    #[test]
    fn test_encode_decode_end() {
        let end = ControlMessage::TransferEnd { file_id: FileId::from("abc") };
        let text = end.encode().unwrap();
        assert!(!text.is_empty());
        assert_eq!(ControlMessage::decode(&text).unwrap(), end);
    }
}
