use std::net::SocketAddr;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay, accepting TCP connections and broadcasting messages.
    Server(ServerArgs),
    /// Connect to a relay and chat from the terminal.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Socket address the relay should bind to. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub listen: SocketAddr,

    /// Milliseconds a single peer write may take during a broadcast.
    #[arg(long, default_value_t = 5_000)]
    pub write_timeout_ms: u64,

    /// Longest accepted record in bytes, delimiters included.
    #[arg(long, default_value_t = crate::codec::DEFAULT_MAX_FRAME_LEN)]
    pub max_frame_len: usize,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Display name announced to the relay. Must not contain spaces.
    #[arg(long)]
    pub name: String,

    /// Address of the relay to connect to.
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub server: SocketAddr,
}
