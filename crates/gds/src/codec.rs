//! GDS frame codec.
//!
//! Frame: MAGIC(0x47, 0x44) + code + transaction id + len(2 LE) + payload + crc8 + 0xFF.
//! The transaction id byte is 0x00 for uncorrelated frames.
//! The payload is the postcard encoding of the whole [`Command`] or
//! [`Report`], so the header code is redundant with the payload tag and is
//! checked on decode.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::command::Command;
use crate::report::{Report, ReportKind};
use crate::{GdsError, Result};

/// GDS frame magic bytes ("GD").
pub const MAGIC: [u8; 2] = [0x47, 0x44];

/// Frame terminator.
const TERMINATOR: u8 = 0xff;

/// Header (magic, code, transaction id, length) plus trailer (crc, terminator).
const FRAME_OVERHEAD: usize = 8;

/// Largest `FileTransfer` data block carried by a single frame.
pub const MAX_TRANSFER_CHUNK: usize = 512;

/// CRC8 lookup table used for checksum calculation.
#[rustfmt::skip]
const CRC8_TABLE: [u8; 256] = [
    0,   7,  14,   9,  28,  27,  18,  21,  56,  63,  54,  49,  36,  35,  42,  45,
  112, 119, 126, 121, 108, 107,  98, 101,  72,  79,  70,  65,  84,  83,  90,  93,
  224, 231, 238, 233, 252, 251, 242, 245, 216, 223, 214, 209, 196, 195, 202, 205,
  144, 151, 158, 153, 140, 139, 130, 133, 168, 175, 166, 161, 180, 179, 186, 189,
  199, 192, 201, 206, 219, 220, 213, 210, 255, 248, 241, 246, 227, 228, 237, 234,
  183, 176, 185, 190, 171, 172, 165, 162, 143, 136, 129, 134, 147, 148, 157, 154,
   39,  32,  41,  46,  59,  60,  53,  50,  31,  24,  17,  22,   3,   4,  13,  10,
   87,  80,  89,  94,  75,  76,  69,  66, 111, 104,  97, 102, 115, 116, 125, 122,
  137, 142, 135, 128, 149, 146, 155, 156, 177, 182, 191, 184, 173, 170, 163, 164,
  249, 254, 247, 240, 229, 226, 235, 236, 193, 198, 207, 200, 221, 218, 211, 212,
  105, 110, 103,  96, 117, 114, 123, 124,  81,  86,  95,  88,  77,  74,  67,  68,
   25,  30,  23,  16,   5,   2,  11,  12,  33,  38,  47,  40,  61,  58,  51,  52,
   78,  73,  64,  71,  82,  85,  92,  91, 118, 113, 120, 127, 106, 109, 100,  99,
   62,  57,  48,  55,  34,  37,  44,  43,   6,   1,   8,  15,  26,  29,  20,  19,
  174, 169, 160, 167, 178, 181, 188, 187, 150, 145, 152, 159, 138, 141, 132, 131,
  222, 217, 208, 215, 194, 197, 204, 203, 230, 225, 232, 239, 250, 253, 244, 243,
];

/// Compute CRC8 checksum over a byte slice.
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc: u8 = 0;
    for &b in data {
        crc = CRC8_TABLE[(crc ^ b) as usize];
    }
    crc
}

fn build_frame(code: u8, transaction_id: u8, payload: &[u8]) -> Result<Vec<u8>> {
    let len = u16::try_from(payload.len())
        .map_err(|_| GdsError::Frame(format!("payload too large: {} bytes", payload.len())))?;
    let mut buf = Vec::with_capacity(FRAME_OVERHEAD + payload.len());
    buf.extend_from_slice(&MAGIC);
    buf.push(code);
    buf.push(transaction_id);
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(payload);
    buf.push(crc8(payload));
    buf.push(TERMINATOR);
    Ok(buf)
}

/// Split a frame into its header code and verified payload.
fn split_frame(frame: &[u8]) -> Result<(u8, &[u8])> {
    if frame.len() < FRAME_OVERHEAD {
        return Err(GdsError::Frame(format!("frame too short: {} bytes", frame.len())));
    }
    if frame[..2] != MAGIC {
        return Err(GdsError::Frame(format!(
            "bad magic {:#04x} {:#04x}",
            frame[0], frame[1]
        )));
    }
    let code = frame[2];
    let len = u16::from_le_bytes([frame[4], frame[5]]) as usize;
    if frame.len() != FRAME_OVERHEAD + len {
        return Err(GdsError::Frame(format!(
            "length mismatch: header says {len}, frame carries {}",
            frame.len() - FRAME_OVERHEAD
        )));
    }
    let payload = &frame[6..6 + len];
    if frame[6 + len + 1] != TERMINATOR {
        return Err(GdsError::Frame("missing terminator".into()));
    }
    let expected = crc8(payload);
    let actual = frame[6 + len];
    if expected != actual {
        return Err(GdsError::Frame(format!(
            "crc mismatch: expected {expected:#04x}, got {actual:#04x}"
        )));
    }
    Ok((code, payload))
}

fn encode<T: Serialize>(code: u8, transaction_id: u8, value: &T) -> Result<Vec<u8>> {
    let payload = postcard::to_allocvec(value)?;
    build_frame(code, transaction_id, &payload)
}

fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    Ok(postcard::from_bytes(payload)?)
}

pub fn encode_command(command: &Command) -> Result<Vec<u8>> {
    encode(command.code(), 0, command)
}

/// Encode a command whose response will be correlated by `transaction_id`.
pub fn encode_command_with_id(command: &Command, transaction_id: u8) -> Result<Vec<u8>> {
    encode(command.code(), transaction_id, command)
}

/// Transaction id carried in a frame header, if the frame is long enough.
pub fn frame_transaction_id(frame: &[u8]) -> Option<u8> {
    (frame.len() >= FRAME_OVERHEAD).then(|| frame[3])
}

pub fn decode_command(frame: &[u8]) -> Result<Command> {
    let (code, payload) = split_frame(frame)?;
    let command: Command = decode(payload)?;
    if command.code() != code {
        return Err(GdsError::KindMismatch {
            header: code,
            payload: command.code(),
        });
    }
    Ok(command)
}

pub fn encode_report(report: &Report) -> Result<Vec<u8>> {
    encode(report.kind().code(), report.transaction_id().unwrap_or(0), report)
}

pub fn decode_report(frame: &[u8]) -> Result<Report> {
    let (code, payload) = split_frame(frame)?;
    let kind = ReportKind::from_code(code).ok_or(GdsError::UnknownReportKind(code))?;
    let report: Report = decode(payload)?;
    if report.kind() != kind {
        return Err(GdsError::KindMismatch {
            header: code,
            payload: report.kind().code(),
        });
    }
    Ok(report)
}
