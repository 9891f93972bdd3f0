//! Save-file envelope.
//!
//! A save is a fixed-size header, a MessagePack summary that tools can read
//! without understanding any subsystem, then one length-prefixed section per
//! subsystem. The script VM's payload is stored as an opaque section.

use std::convert::TryFrom;

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};
use thiserror::Error;

/// Bytes that open every save file ("RWSV").
pub const SAVE_MAGIC: [u8; 4] = *b"RWSV";

/// Envelope revision understood by this crate.
pub const FORMAT_VERSION: u16 = 0x0001;

/// Length of the binary header in bytes.
pub const HEADER_LEN: usize = 4 + 2 + 2 + 4;

/// Per-section prefix: kind plus payload length.
const SECTION_HEADER_LEN: usize = 2 + 4;

/// Subsystems that can own a section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u16)]
pub enum SectionKind {
    Scripts = 0x0001,
    World = 0x0002,
}

impl TryFrom<u16> for SectionKind {
    type Error = ();

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x0001 => Ok(Self::Scripts),
            0x0002 => Ok(Self::World),
            _ => Err(()),
        }
    }
}

/// Fixed header in front of every save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveHeader {
    pub version: u16,
    pub section_count: u16,
    pub summary_len: u32,
}

impl SaveHeader {
    /// Encode the header as big-endian bytes.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[..4].copy_from_slice(&SAVE_MAGIC);
        out[4..6].copy_from_slice(&self.version.to_be_bytes());
        out[6..8].copy_from_slice(&self.section_count.to_be_bytes());
        out[8..12].copy_from_slice(&self.summary_len.to_be_bytes());
        out
    }

    pub fn decode(input: &[u8]) -> Result<Self, SaveError> {
        if input.len() < HEADER_LEN {
            return Err(SaveError::TruncatedHeader);
        }
        if input[..4] != SAVE_MAGIC {
            return Err(SaveError::BadMagic);
        }
        let mut rest = &input[4..HEADER_LEN];
        let version = rest.get_u16();
        if version != FORMAT_VERSION {
            return Err(SaveError::UnsupportedVersion(version));
        }
        let section_count = rest.get_u16();
        let summary_len = rest.get_u32();
        Ok(Self {
            version,
            section_count,
            summary_len,
        })
    }
}

/// Human-facing description of a save, readable without decoding sections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveSummary {
    pub label: String,
    pub game_clock_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<String>,
    #[serde(default)]
    pub sections: Vec<SectionKind>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub kind: SectionKind,
    pub payload: Vec<u8>,
}

/// A decoded (or to-be-encoded) save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveFile {
    pub summary: SaveSummary,
    sections: Vec<Section>,
}

impl SaveFile {
    pub fn new(label: impl Into<String>, game_clock_ms: u64, build: Option<String>) -> Self {
        SaveFile {
            summary: SaveSummary {
                label: label.into(),
                game_clock_ms,
                build,
                sections: Vec::new(),
            },
            sections: Vec::new(),
        }
    }

    /// Stores `payload` under `kind`, replacing an earlier section of the
    /// same kind.
    pub fn insert_section(&mut self, kind: SectionKind, payload: Vec<u8>) {
        match self.sections.iter_mut().find(|section| section.kind == kind) {
            Some(section) => section.payload = payload,
            None => {
                self.sections.push(Section { kind, payload });
                self.summary.sections.push(kind);
            }
        }
    }

    pub fn section(&self, kind: SectionKind) -> Result<&[u8], SaveError> {
        self.sections
            .iter()
            .find(|section| section.kind == kind)
            .map(|section| section.payload.as_slice())
            .ok_or(SaveError::MissingSection(kind))
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }
}

/// Error conditions returned by the envelope helpers.
#[derive(Debug, Error)]
pub enum SaveError {
    #[error("header smaller than {HEADER_LEN} bytes")]
    TruncatedHeader,
    #[error("header magic mismatch")]
    BadMagic,
    #[error("save format version {0:#06x} is not supported")]
    UnsupportedVersion(u16),
    #[error("section kind {0:#06x} is unknown")]
    UnknownSectionKind(u16),
    #[error("length mismatch in {what}: expected {expected} bytes but found {actual}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("too many sections or bytes to frame: {0}")]
    TooLarge(&'static str),
    #[error("summary decode error: {0}")]
    SummaryDecode(#[from] rmp_serde::decode::Error),
    #[error("summary encode error: {0}")]
    SummaryEncode(#[from] rmp_serde::encode::Error),
    #[error("save has no {0:?} section")]
    MissingSection(SectionKind),
    #[error("save frames the {0:?} section more than once")]
    DuplicateSection(SectionKind),
    #[error("summary lists sections {listed:?} but the body holds {framed:?}")]
    SectionListMismatch {
        listed: Vec<SectionKind>,
        framed: Vec<SectionKind>,
    },
}

/// Frames a save for writing to disk.
pub fn encode_save(file: &SaveFile) -> Result<Vec<u8>, SaveError> {
    let summary = rmp_serde::to_vec_named(&file.summary)?;
    let header = SaveHeader {
        version: FORMAT_VERSION,
        section_count: u16::try_from(file.sections.len())
            .map_err(|_| SaveError::TooLarge("section count"))?,
        summary_len: u32::try_from(summary.len()).map_err(|_| SaveError::TooLarge("summary"))?,
    };

    let body: usize = file
        .sections
        .iter()
        .map(|section| SECTION_HEADER_LEN + section.payload.len())
        .sum();
    let mut out = Vec::with_capacity(HEADER_LEN + summary.len() + body);
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(&summary);
    for section in &file.sections {
        let len = u32::try_from(section.payload.len())
            .map_err(|_| SaveError::TooLarge("section payload"))?;
        out.put_u16(section.kind as u16);
        out.put_u32(len);
        out.extend_from_slice(&section.payload);
    }
    Ok(out)
}

/// Parses a framed save, checking every declared length.
pub fn decode_save(bytes: &[u8]) -> Result<SaveFile, SaveError> {
    let header = SaveHeader::decode(bytes)?;
    let mut rest = &bytes[HEADER_LEN..];

    let summary_len = header.summary_len as usize;
    if rest.len() < summary_len {
        return Err(SaveError::LengthMismatch {
            what: "summary",
            expected: summary_len,
            actual: rest.len(),
        });
    }
    let summary: SaveSummary = rmp_serde::from_slice(&rest[..summary_len])?;
    rest.advance(summary_len);

    let mut sections: Vec<Section> = Vec::with_capacity(header.section_count as usize);
    for _ in 0..header.section_count {
        if rest.remaining() < SECTION_HEADER_LEN {
            return Err(SaveError::LengthMismatch {
                what: "section header",
                expected: SECTION_HEADER_LEN,
                actual: rest.remaining(),
            });
        }
        let raw_kind = rest.get_u16();
        let kind =
            SectionKind::try_from(raw_kind).map_err(|_| SaveError::UnknownSectionKind(raw_kind))?;
        if sections.iter().any(|section| section.kind == kind) {
            return Err(SaveError::DuplicateSection(kind));
        }
        let len = rest.get_u32() as usize;
        if rest.remaining() < len {
            return Err(SaveError::LengthMismatch {
                what: "section payload",
                expected: len,
                actual: rest.remaining(),
            });
        }
        sections.push(Section {
            kind,
            payload: rest[..len].to_vec(),
        });
        rest.advance(len);
    }

    if rest.has_remaining() {
        return Err(SaveError::LengthMismatch {
            what: "save body",
            expected: 0,
            actual: rest.remaining(),
        });
    }

    let framed: Vec<SectionKind> = sections.iter().map(|section| section.kind).collect();
    if summary.sections != framed {
        return Err(SaveError::SectionListMismatch {
            listed: summary.sections,
            framed,
        });
    }

    Ok(SaveFile { summary, sections })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SaveFile {
        let mut file = SaveFile::new("Portland - Chinatown", 93_000, Some("dev".into()));
        file.insert_section(SectionKind::Scripts, vec![1, 2, 3, 4]);
        file.insert_section(SectionKind::World, Vec::new());
        file
    }

    #[test]
    fn header_is_big_endian() {
        let header = SaveHeader {
            version: FORMAT_VERSION,
            section_count: 2,
            summary_len: 0x0102_0304,
        };
        let bytes = header.encode();
        assert_eq!(&bytes[..4], b"RWSV");
        assert_eq!(&bytes[4..6], &[0x00, 0x01]);
        assert_eq!(&bytes[8..12], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(SaveHeader::decode(&bytes).expect("header decodes"), header);
    }

    #[test]
    fn sections_survive_framing() {
        let encoded = encode_save(&sample()).expect("save encodes");
        let decoded = decode_save(&encoded).expect("save decodes");
        assert_eq!(decoded, sample());
        assert_eq!(
            decoded.summary.sections,
            vec![SectionKind::Scripts, SectionKind::World]
        );
        assert_eq!(
            decoded.section(SectionKind::Scripts).expect("scripts section"),
            &[1, 2, 3, 4]
        );
    }

    #[test]
    fn replacing_a_section_keeps_one_copy() {
        let mut file = sample();
        file.insert_section(SectionKind::Scripts, vec![9]);
        assert_eq!(file.sections().len(), 2);
        assert_eq!(file.summary.sections.len(), 2);
        assert_eq!(file.section(SectionKind::Scripts).expect("scripts"), &[9]);
    }

    #[test]
    fn missing_section_is_reported() {
        let file = SaveFile::new("empty", 0, None);
        assert!(matches!(
            file.section(SectionKind::Scripts),
            Err(SaveError::MissingSection(SectionKind::Scripts))
        ));
    }

    #[test]
    fn rejects_damaged_envelopes() {
        let encoded = encode_save(&sample()).expect("save encodes");

        assert!(matches!(
            decode_save(&encoded[..6]),
            Err(SaveError::TruncatedHeader)
        ));

        let mut bad_magic = encoded.clone();
        bad_magic[0] = b'X';
        assert!(matches!(decode_save(&bad_magic), Err(SaveError::BadMagic)));

        let mut bad_version = encoded.clone();
        bad_version[5] = 9;
        assert!(matches!(
            decode_save(&bad_version),
            Err(SaveError::UnsupportedVersion(9))
        ));

        // Drop the empty world section and one byte of the scripts payload.
        assert!(matches!(
            decode_save(&encoded[..encoded.len() - 7]),
            Err(SaveError::LengthMismatch {
                what: "section payload",
                ..
            })
        ));

        let mut padded = encoded.clone();
        padded.push(0);
        assert!(matches!(
            decode_save(&padded),
            Err(SaveError::LengthMismatch {
                what: "save body",
                ..
            })
        ));
    }

    #[test]
    fn rejects_a_section_framed_twice() {
        let encoded = encode_save(&sample()).expect("save encodes");
        let header = SaveHeader::decode(&encoded).expect("header decodes");
        let first_section = HEADER_LEN + header.summary_len as usize;
        // Scripts carries four payload bytes; the World header follows it.
        let second_section = first_section + SECTION_HEADER_LEN + 4;
        let mut doubled = encoded.clone();
        doubled[second_section..second_section + 2]
            .copy_from_slice(&(SectionKind::Scripts as u16).to_be_bytes());
        assert!(matches!(
            decode_save(&doubled),
            Err(SaveError::DuplicateSection(SectionKind::Scripts))
        ));
    }

    #[test]
    fn summary_must_list_the_framed_sections() {
        let mut file = sample();
        file.summary.sections.pop();
        let encoded = encode_save(&file).expect("save encodes");
        match decode_save(&encoded) {
            Err(SaveError::SectionListMismatch { listed, framed }) => {
                assert_eq!(listed, vec![SectionKind::Scripts]);
                assert_eq!(framed, vec![SectionKind::Scripts, SectionKind::World]);
            }
            other => panic!("unexpected decode result {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_section_kind() {
        let encoded = encode_save(&sample()).expect("save encodes");
        let header = SaveHeader::decode(&encoded).expect("header decodes");
        let first_section = HEADER_LEN + header.summary_len as usize;
        let mut bad = encoded.clone();
        bad[first_section..first_section + 2].copy_from_slice(&0x0042u16.to_be_bytes());
        assert!(matches!(
            decode_save(&bad),
            Err(SaveError::UnknownSectionKind(0x0042))
        ));
    }
}
