//! Two endpoints volley a message back and forth over one multiplexed
//! channel: the server answers through its default callbacks, the client
//! drives the exchange with a registered state machine.
//!
//! Run with: cargo run --example ping-pong

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{bounded, Sender};
use serde::{Deserialize, Serialize};

use chanmux::net::{connect, ServerHandler, TcpServer};
use chanmux::router::{
    ChannelFsm, ChannelGroups, ConnectionEvents, ConnectionHandle, Step,
};
use chanmux::wire::{CommError, WireConfig};

const CHANNEL: u8 = 1;
const VOLLEYS: u32 = 6;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Volley {
    text: String,
    hops: u32,
}

/// Server side: bump the hop count and return the message.
struct EchoSink;

impl ConnectionEvents<Volley> for EchoSink {
    fn object_message(&self, handle: &ConnectionHandle<Volley>, channel: u8, message: Volley) {
        println!("server <- {} (hops {})", message.text, message.hops);
        let reply = Volley {
            text: message.text,
            hops: message.hops + 1,
        };
        handle.write_object(channel, &reply, true);
    }

    fn data_message(&self, _handle: &ConnectionHandle<Volley>, _channel: u8, _data: Bytes) {}

    fn disconnected(&self, _handle: &ConnectionHandle<Volley>, expected: bool) {
        println!("server: client left (expected: {expected})");
    }

    fn error(&self, _handle: &ConnectionHandle<Volley>, error: CommError) {
        eprintln!("server: connection failed: {error}");
    }
}

struct EchoHandler;

impl ServerHandler<Volley> for EchoHandler {
    fn events(&self) -> Arc<dyn ConnectionEvents<Volley>> {
        Arc::new(EchoSink)
    }
}

/// Client side: open the exchange from `init`, return each volley until
/// enough hops have accumulated, then finish.
struct Rally {
    done: Sender<u32>,
}

impl ChannelFsm<Volley> for Rally {
    type State = u32;

    fn init(&mut self, handle: &ConnectionHandle<Volley>) -> u32 {
        handle.write_object(
            CHANNEL,
            &Volley {
                text: "ping".to_string(),
                hops: 0,
            },
            true,
        );
        0
    }

    fn on_object(
        &mut self,
        _state: u32,
        channel: u8,
        message: Volley,
        handle: &ConnectionHandle<Volley>,
    ) -> Step<u32> {
        println!("client <- {} (hops {})", message.text, message.hops);
        if message.hops < VOLLEYS {
            handle.write_object(channel, &message, true);
        } else {
            let _ = self.done.send(message.hops);
        }
        Step::Next(message.hops)
    }

    fn on_data(
        &mut self,
        state: u32,
        _channel: u8,
        _data: Bytes,
        _handle: &ConnectionHandle<Volley>,
    ) -> Step<u32> {
        Step::Next(state)
    }

    fn is_final(&self, state: &u32, _handle: &ConnectionHandle<Volley>) -> bool {
        *state >= VOLLEYS
    }
}

/// Client connection events; the rally itself runs in the state machine.
struct Quiet;

impl ConnectionEvents<Volley> for Quiet {
    fn object_message(&self, _handle: &ConnectionHandle<Volley>, _channel: u8, _message: Volley) {}
    fn data_message(&self, _handle: &ConnectionHandle<Volley>, _channel: u8, _data: Bytes) {}
    fn disconnected(&self, _handle: &ConnectionHandle<Volley>, _expected: bool) {}
    fn error(&self, _handle: &ConnectionHandle<Volley>, error: CommError) {
        eprintln!("client: connection failed: {error}");
    }
}

fn main() {
    let server = TcpServer::bind("127.0.0.1:0", Arc::new(EchoHandler), WireConfig::default())
        .expect("bind server");
    println!("server on {}", server.local_addr());

    // The rally channel gets its own group, so a stuck rally could never
    // starve traffic on the side channel.
    let groups = ChannelGroups::default()
        .with_group([CHANNEL])
        .with_group([2]);
    let client = connect(
        server.local_addr(),
        "ping-pong-client",
        Arc::new(Quiet),
        &groups,
        WireConfig::default(),
    )
    .expect("connect client");

    let (done_tx, done_rx) = bounded(1);
    client
        .handle()
        .register_fsm(CHANNEL, Rally { done: done_tx })
        .expect("channel is configured")
        .expect("connection is up");

    let hops = done_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("rally finished");
    println!("rally complete after {hops} hops");

    client.disconnect();
    client.join();
    server.stop();
}
