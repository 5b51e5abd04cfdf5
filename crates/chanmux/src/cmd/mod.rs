use clap::{Args, Subcommand};

use crate::exit::CliResult;

pub mod listen;
pub mod send;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Accept connections and print received frames.
    Listen(ListenArgs),
    /// Send a single frame.
    Send(SendArgs),
}

pub fn run(command: Command) -> CliResult<i32> {
    match command {
        Command::Listen(args) => listen::run(args),
        Command::Send(args) => send::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Address to bind, e.g. 127.0.0.1:9000.
    pub addr: String,
    /// Exit after receiving N frames.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Address to connect to, e.g. 127.0.0.1:9000.
    pub addr: String,
    /// Channel to send on.
    #[arg(long, short = 'c', default_value = "1")]
    pub channel: u8,
    /// JSON payload, sent as an object frame.
    #[arg(long, conflicts_with = "data")]
    pub json: Option<String>,
    /// Raw string payload, sent as a data frame.
    #[arg(long, conflicts_with = "json")]
    pub data: Option<String>,
    /// Wait for one object back and print it (requires --json).
    #[arg(long)]
    pub wait: bool,
    /// Maximum time to wait for the reply (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub wait_timeout: String,
}
