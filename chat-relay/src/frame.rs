use std::fmt;

use crate::error::FieldError;

pub const ANNOUNCE_TAG: u8 = b'N';
pub const OUTBOUND_TAG: u8 = b'S';
pub const DELIVERED_TAG: u8 = b'M';

/// Field separator inside a record.
pub const SEPARATOR: u8 = b' ';
/// Record terminator.
pub const TERMINATOR: u8 = b'\n';

/// One record of the line protocol.
///
/// `Announce` and `Outbound` travel from client to relay, `Delivered` from
/// relay to every client.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Frame {
    Announce { name: String },
    Outbound { text: String },
    Delivered { name: String, text: String },
}

impl Frame {
    pub fn announce(name: impl Into<String>) -> Self {
        Frame::Announce { name: name.into() }
    }

    pub fn outbound(text: impl Into<String>) -> Self {
        Frame::Outbound { text: text.into() }
    }

    pub fn delivered(name: impl Into<String>, text: impl Into<String>) -> Self {
        Frame::Delivered {
            name: name.into(),
            text: text.into(),
        }
    }

    pub fn tag(&self) -> u8 {
        match self {
            Frame::Announce { .. } => ANNOUNCE_TAG,
            Frame::Outbound { .. } => OUTBOUND_TAG,
            Frame::Delivered { .. } => DELIVERED_TAG,
        }
    }

    /// Encodes the frame as one newline-terminated record.
    ///
    /// Fields are written verbatim. A field holding a delimiter produces a
    /// record that decodes differently; use [`Frame::validate`] first when the
    /// input is untrusted.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.push(self.tag());
        out.push(SEPARATOR);
        match self {
            Frame::Announce { name } => out.extend_from_slice(name.as_bytes()),
            Frame::Outbound { text } => out.extend_from_slice(text.as_bytes()),
            Frame::Delivered { name, text } => {
                out.extend_from_slice(name.as_bytes());
                out.push(SEPARATOR);
                out.extend_from_slice(text.as_bytes());
            }
        }
        out.push(TERMINATOR);
        out
    }

    fn encoded_len(&self) -> usize {
        let body = match self {
            Frame::Announce { name } => name.len(),
            Frame::Outbound { text } => text.len(),
            Frame::Delivered { name, text } => name.len() + 1 + text.len(),
        };
        body + 3
    }

    /// Checks that every field survives an encode/decode round trip.
    pub fn validate(&self) -> Result<(), FieldError> {
        match self {
            Frame::Announce { name } => validate_name(name),
            Frame::Outbound { text } => validate_text(text),
            Frame::Delivered { name, text } => {
                validate_name(name)?;
                validate_text(text)
            }
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Announce { name } => write!(f, "N {name}"),
            Frame::Outbound { text } => write!(f, "S {text}"),
            Frame::Delivered { name, text } => write!(f, "M {name} {text}"),
        }
    }
}

/// Names end at the first space of an `M` record, so they may hold neither delimiter.
pub fn validate_name(name: &str) -> Result<(), FieldError> {
    if name.contains('\n') {
        return Err(FieldError::Newline { field: "name" });
    }
    if name.contains(' ') {
        return Err(FieldError::Space { field: "name" });
    }
    Ok(())
}

pub fn validate_text(text: &str) -> Result<(), FieldError> {
    if text.contains('\n') {
        return Err(FieldError::Newline { field: "text" });
    }
    Ok(())
}
