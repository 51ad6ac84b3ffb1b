//! Async reader and writer for the line protocol in [`crate::frame`].

use std::io;

use futures::Stream;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
    error::{DecodeError, ProtocolError},
    frame::{ANNOUNCE_TAG, DELIVERED_TAG, Frame, OUTBOUND_TAG, SEPARATOR, TERMINATOR},
};

/// Upper bound on one record, delimiters included.
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024;

/// Bytes read up to a stop byte, or up to end of stream when `end` is `None`.
struct Field {
    bytes: Vec<u8>,
    end: Option<u8>,
}

/// Decodes frames from a buffered byte stream.
///
/// `read_frame` is not cancel safe once a record has started arriving: a
/// partially read record is lost if the future is dropped. Callers that race it
/// against a shutdown signal must stop reading afterwards.
pub struct FrameReader<R> {
    reader: R,
    max_frame_len: usize,
}

impl<R> FrameReader<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self::with_max_frame_len(reader, DEFAULT_MAX_FRAME_LEN)
    }

    pub fn with_max_frame_len(reader: R, max_frame_len: usize) -> Self {
        Self {
            reader,
            max_frame_len,
        }
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Reads the next record.
    ///
    /// Returns [`DecodeError::EndOfStream`] only when the stream ends exactly on
    /// a record boundary. Ending anywhere inside a record is
    /// [`ProtocolError::Truncated`].
    pub async fn read_frame(&mut self) -> Result<Frame, DecodeError> {
        let mut budget = self.max_frame_len;

        let tag = self.read_field(&[SEPARATOR, TERMINATOR], &mut budget).await?;
        let Some(tag_end) = tag.end else {
            if tag.bytes.is_empty() {
                return Err(DecodeError::EndOfStream);
            }
            return Err(ProtocolError::Truncated.into());
        };

        match tag.bytes.as_slice() {
            [ANNOUNCE_TAG] => {
                expect_separator(ANNOUNCE_TAG, tag_end)?;
                let name = self.read_last_field(&mut budget).await?;
                Ok(Frame::Announce { name })
            }
            [OUTBOUND_TAG] => {
                expect_separator(OUTBOUND_TAG, tag_end)?;
                let text = self.read_last_field(&mut budget).await?;
                Ok(Frame::Outbound { text })
            }
            [DELIVERED_TAG] => {
                expect_separator(DELIVERED_TAG, tag_end)?;
                let name = self.read_field(&[SEPARATOR, TERMINATOR], &mut budget).await?;
                match name.end {
                    Some(SEPARATOR) => {}
                    Some(_) => return Err(ProtocolError::MissingSeparator('M').into()),
                    None => return Err(ProtocolError::Truncated.into()),
                }
                let name = into_string(name.bytes)?;
                let text = self.read_last_field(&mut budget).await?;
                Ok(Frame::Delivered { name, text })
            }
            other => {
                let tag = String::from_utf8_lossy(other).into_owned();
                Err(ProtocolError::UnknownTag(tag).into())
            }
        }
    }

    /// Turns the reader into a lazy stream of frames.
    ///
    /// The stream ends on a clean end of stream. Any other failure is yielded
    /// once and ends the stream.
    pub fn into_frames(self) -> impl Stream<Item = Result<Frame, DecodeError>> {
        futures::stream::unfold(Some(self), |state| async move {
            let Some(mut reader) = state else {
                return None;
            };
            match reader.read_frame().await {
                Ok(frame) => Some((Ok(frame), Some(reader))),
                Err(DecodeError::EndOfStream) => None,
                Err(err) => Some((Err(err), None)),
            }
        })
    }

    async fn read_last_field(&mut self, budget: &mut usize) -> Result<String, DecodeError> {
        let field = self.read_field(&[TERMINATOR], budget).await?;
        if field.end.is_none() {
            return Err(ProtocolError::Truncated.into());
        }
        into_string(field.bytes)
    }

    async fn read_field(&mut self, stops: &[u8], budget: &mut usize) -> Result<Field, DecodeError> {
        let mut bytes = Vec::new();
        loop {
            let available = self.reader.fill_buf().await?;
            if available.is_empty() {
                return Ok(Field { bytes, end: None });
            }

            let (used, end) = match available.iter().position(|byte| stops.contains(byte)) {
                Some(index) => (index + 1, Some(available[index])),
                None => (available.len(), None),
            };
            if used > *budget {
                return Err(ProtocolError::FrameTooLong {
                    limit: self.max_frame_len,
                }
                .into());
            }
            *budget -= used;

            let kept = if end.is_some() { used - 1 } else { used };
            bytes.extend_from_slice(&available[..kept]);
            self.reader.consume(used);

            if end.is_some() {
                return Ok(Field { bytes, end });
            }
        }
    }
}

fn expect_separator(tag: u8, end: u8) -> Result<(), ProtocolError> {
    if end == SEPARATOR {
        Ok(())
    } else {
        Err(ProtocolError::MissingSeparator(char::from(tag)))
    }
}

fn into_string(bytes: Vec<u8>) -> Result<String, DecodeError> {
    String::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUtf8.into())
}

/// Encodes frames onto a byte stream, flushing after every record.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W> FrameWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn write_frame(&mut self, frame: &Frame) -> io::Result<()> {
        self.write_encoded(&frame.encode()).await
    }

    /// Writes a record produced by [`Frame::encode`].
    pub async fn write_encoded(&mut self, record: &[u8]) -> io::Result<()> {
        self.writer.write_all(record).await?;
        self.writer.flush().await
    }

    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.writer.shutdown().await
    }
}
