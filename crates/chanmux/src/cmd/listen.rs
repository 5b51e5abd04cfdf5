use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use crossbeam_channel::Sender;
use serde_json::{json, Value};
use tracing::{info, warn};

use chanmux_net::{ServerHandler, TcpServer};
use chanmux_router::{ConnectionEvents, ConnectionHandle};
use chanmux_wire::{CommError, WireConfig};

use crate::cmd::ListenArgs;
use crate::exit::{net_error, CliError, CliResult, INTERNAL, SUCCESS};

/// Prints every received frame as one JSON line on stdout.
struct PrintSink {
    remaining: Option<AtomicUsize>,
    done: Sender<()>,
}

impl PrintSink {
    fn tick(&self) {
        if let Some(remaining) = &self.remaining {
            if remaining.fetch_sub(1, Ordering::SeqCst) <= 1 {
                let _ = self.done.try_send(());
            }
        }
    }
}

impl ConnectionEvents<Value> for PrintSink {
    fn object_message(&self, handle: &ConnectionHandle<Value>, channel: u8, message: Value) {
        println!(
            "{}",
            json!({
                "kind": "object",
                "conn": handle.id(),
                "channel": channel,
                "message": message,
            })
        );
        self.tick();
    }

    fn data_message(&self, handle: &ConnectionHandle<Value>, channel: u8, data: Bytes) {
        println!(
            "{}",
            json!({
                "kind": "data",
                "conn": handle.id(),
                "channel": channel,
                "len": data.len(),
                "text": String::from_utf8_lossy(&data),
            })
        );
        self.tick();
    }

    fn disconnected(&self, handle: &ConnectionHandle<Value>, expected: bool) {
        info!(conn = %handle.id(), expected, "client disconnected");
    }

    fn error(&self, handle: &ConnectionHandle<Value>, error: CommError) {
        warn!(conn = %handle.id(), %error, "client connection failed");
    }
}

struct PrintHandler {
    sink: Arc<PrintSink>,
}

impl ServerHandler<Value> for PrintHandler {
    fn events(&self) -> Arc<dyn ConnectionEvents<Value>> {
        Arc::clone(&self.sink) as Arc<dyn ConnectionEvents<Value>>
    }
}

pub fn run(args: ListenArgs) -> CliResult<i32> {
    let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);
    let handler = Arc::new(PrintHandler {
        sink: Arc::new(PrintSink {
            remaining: args.count.map(AtomicUsize::new),
            done: done_tx.clone(),
        }),
    });

    let server = TcpServer::bind(args.addr.as_str(), handler, WireConfig::default())
        .map_err(|err| net_error("bind failed", err))?;
    info!(addr = %server.local_addr(), "listening");

    ctrlc::set_handler(move || {
        let _ = done_tx.try_send(());
    })
    .map_err(|err| CliError::new(INTERNAL, format!("failed to install signal handler: {err}")))?;

    let _ = done_rx.recv();
    server.stop();
    Ok(SUCCESS)
}
