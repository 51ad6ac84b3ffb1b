use std::{io, net::SocketAddr};

use thiserror::Error;

use crate::registry::PeerId;

/// The relay could not bind its listening socket.
#[derive(Debug, Error)]
#[error("failed to bind {addr}")]
pub struct BindError {
    pub addr: SocketAddr,
    #[source]
    pub source: io::Error,
}

/// A record on the wire violated the framing rules.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unknown frame tag {0:?}")]
    UnknownTag(String),
    #[error("truncated frame")]
    Truncated,
    #[error("frame tag {0:?} is missing its field separator")]
    MissingSeparator(char),
    #[error("frame field is not valid UTF-8")]
    InvalidUtf8,
    #[error("frame exceeds {limit} bytes")]
    FrameTooLong { limit: usize },
}

/// Why a call to [`crate::codec::FrameReader::read_frame`] produced no frame.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The stream closed cleanly on a record boundary.
    #[error("end of stream")]
    EndOfStream,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("read failed")]
    Io(#[from] io::Error),
}

impl DecodeError {
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, DecodeError::EndOfStream)
    }
}

/// A broadcast could not reach one peer. Delivery to the others is unaffected.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("write to peer {peer} failed")]
    Io {
        peer: PeerId,
        #[source]
        source: io::Error,
    },
    #[error("write to peer {peer} timed out")]
    TimedOut { peer: PeerId },
}

impl DeliveryError {
    pub fn peer(&self) -> PeerId {
        match self {
            DeliveryError::Io { peer, .. } | DeliveryError::TimedOut { peer } => *peer,
        }
    }
}

/// A frame field holds a byte the wire format uses as a delimiter.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FieldError {
    #[error("{field} must not contain a newline")]
    Newline { field: &'static str },
    #[error("{field} must not contain a space")]
    Space { field: &'static str },
}
