use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
};
use tracing::{info, warn};

use crate::{
    cli::ClientArgs,
    codec::{FrameReader, FrameWriter},
    error::DecodeError,
    frame::Frame,
};

pub async fn run(args: ClientArgs) -> Result<()> {
    let announce = Frame::announce(args.name.clone());
    announce.validate().context("invalid display name")?;

    let (reader, mut writer) = establish_connection(args.server).await?;
    writer
        .write_frame(&announce)
        .await
        .context("failed to announce name")?;

    let mut printer = tokio::spawn(print_deliveries(reader));
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    loop {
        select! {
            line = stdin.next_line() => {
                if !handle_stdin_line(line?, &mut writer).await? {
                    break;
                }
            }
            printed = &mut printer => {
                printed.context("printer task failed")??;
                write_stdout("*** relay closed the connection").await?;
                break;
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                if let Err(error) = ctrl_c {
                    warn!(?error, "ctrl-c handler failed");
                }
                break;
            }
        }
    }

    shutdown_connection(&mut writer).await;
    printer.abort();
    Ok(())
}

async fn establish_connection(
    server: SocketAddr,
) -> Result<(
    FrameReader<BufReader<OwnedReadHalf>>,
    FrameWriter<OwnedWriteHalf>,
)> {
    let stream = TcpStream::connect(server)
        .await
        .with_context(|| format!("failed to connect to {server}"))?;

    info!("connected to {}", server);

    let (reader, writer) = stream.into_split();
    Ok((
        FrameReader::new(BufReader::new(reader)),
        FrameWriter::new(writer),
    ))
}

/// Returns `false` once the user is done chatting.
async fn handle_stdin_line(
    line: Option<String>,
    writer: &mut FrameWriter<OwnedWriteHalf>,
) -> Result<bool> {
    let Some(line) = line else {
        return Ok(false);
    };

    let text = line.trim_end();
    if text.is_empty() {
        return Ok(true);
    }

    if text.eq_ignore_ascii_case("/quit") {
        write_stdout("*** leaving chat").await?;
        return Ok(false);
    }

    writer
        .write_frame(&Frame::outbound(text))
        .await
        .context("failed to send message")?;
    Ok(true)
}

/// Prints every delivered message until the relay closes the stream.
///
/// Owns the reader so no partially read record is lost to a `select!`.
async fn print_deliveries(mut reader: FrameReader<BufReader<OwnedReadHalf>>) -> Result<()> {
    loop {
        match reader.read_frame().await {
            Ok(frame) => match render(&frame) {
                Some(line) => write_stdout(&line).await?,
                None => warn!(%frame, "ignoring unexpected frame from relay"),
            },
            Err(DecodeError::EndOfStream) => return Ok(()),
            Err(err) => return Err(err).context("failed to read from relay"),
        }
    }
}

/// Terminal rendering of a relay frame; only `Delivered` frames are shown.
pub fn render(frame: &Frame) -> Option<String> {
    match frame {
        Frame::Delivered { name, text } if name.is_empty() => Some(format!("<anonymous> {text}")),
        Frame::Delivered { name, text } => Some(format!("<{name}> {text}")),
        Frame::Announce { .. } | Frame::Outbound { .. } => None,
    }
}

async fn shutdown_connection(writer: &mut FrameWriter<OwnedWriteHalf>) {
    if let Err(error) = writer.shutdown().await {
        warn!(?error, "failed to shutdown client writer cleanly");
    }
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}
