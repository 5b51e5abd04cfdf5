use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde_json::Value;

use chanmux_net::{connect, request};
use chanmux_router::{ChannelGroups, ChannelRouter, ConnectionEvents, ConnectionHandle};
use chanmux_wire::{CommError, WireConfig};

use crate::cmd::SendArgs;
use crate::exit::{net_error, CliError, CliResult, SUCCESS, USAGE};

/// Event sink for fire-and-forget sends.
struct Discard;

impl ConnectionEvents<Value> for Discard {
    fn object_message(&self, _handle: &ConnectionHandle<Value>, _channel: u8, _message: Value) {}
    fn data_message(&self, _handle: &ConnectionHandle<Value>, _channel: u8, _data: Bytes) {}
    fn disconnected(&self, _handle: &ConnectionHandle<Value>, _expected: bool) {}
    fn error(&self, _handle: &ConnectionHandle<Value>, _error: CommError) {}
}

pub fn run(args: SendArgs) -> CliResult<i32> {
    let timeout = parse_duration(&args.wait_timeout)?;

    if let Some(raw) = &args.json {
        let value: Value = serde_json::from_str(raw)
            .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}")))?;
        if args.wait {
            let reply = request(args.addr.as_str(), args.channel, &value, timeout)
                .map_err(|err| net_error("request failed", err))?;
            println!("{reply}");
        } else {
            let router = one_shot_router(&args.addr)?;
            router.handle().write_object(args.channel, &value, true);
            router.disconnect();
            router.join();
        }
        return Ok(SUCCESS);
    }

    if let Some(data) = &args.data {
        if args.wait {
            return Err(CliError::new(USAGE, "--wait requires --json"));
        }
        let router = one_shot_router(&args.addr)?;
        router.handle().write_data(args.channel, data.as_bytes(), true);
        router.disconnect();
        router.join();
        return Ok(SUCCESS);
    }

    Err(CliError::new(USAGE, "one of --json or --data is required"))
}

fn one_shot_router(addr: &str) -> CliResult<ChannelRouter<Value>> {
    connect(
        addr,
        "send",
        Arc::new(Discard),
        &ChannelGroups::single(),
        WireConfig::default(),
    )
    .map_err(|err| net_error("connect failed", err))
}

fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        _ => Err(CliError::new(
            USAGE,
            format!("unsupported duration unit: {unit}"),
        )),
    }
}
