// SPDX-License-Identifier: GPL-3.0-or-later
/*
 * PLDM responder daemon.
 *
 * Copyright (c) 2025 Code Construct
 */

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use argh::FromArgs;
#[allow(unused)]
use log::{debug, error, info, trace, warn};

use mctp::{Channel, Eid};
use mctp_mux::{MuxKind, MuxSocket};
use pldm_platform::{Connector, EventHandlers, LogSink};
use pldmd::{Dispatcher, IpmiHandler, ResponderConfig};

/// IPMI completion code: invalid command
const IPMI_CC_INVALID_CMD: u8 = 0xc1;

/// No local IPMI service, every request is refused.
struct NoIpmi;

impl IpmiHandler for NoIpmi {
    fn handle(
        &self,
        eid: Eid,
        netfn: u8,
        cmd: u8,
        _data: &[u8],
    ) -> std::io::Result<Vec<u8>> {
        debug!("EID {eid}: refusing IPMI netfn {netfn:#04x} cmd {cmd:#04x}");
        Ok(vec![IPMI_CC_INVALID_CMD])
    }
}

#[derive(FromArgs, Debug)]
#[argh(description = "PLDM responder")]
struct Args {
    /// bus number of the PLDM mux
    #[argh(option, default = "0")]
    bus: u8,

    /// terminus ID to report
    #[argh(option, default = "1")]
    tid: u8,

    /// delay before polling a terminus for events, in milliseconds
    #[argh(option, default = "100")]
    poll_delay_ms: u64,

    /// verbose
    #[argh(switch, short = 'v')]
    verbose: bool,

    /// trace, extra verbose
    #[argh(switch)]
    trace: bool,
}

fn run(config: &ResponderConfig) -> anyhow::Result<()> {
    let bus = config.bus;
    let connector: Connector = Arc::new(
        move || -> mctp::Result<Box<dyn Channel + Send>> {
            Ok(Box::new(MuxSocket::connect(MuxKind::Pldm, bus)?))
        },
    );

    let events = EventHandlers::builder()
        .standard(Arc::new(LogSink), config.sensor_names.clone())
        .build();

    let dispatcher =
        Dispatcher::from_config(config, events, connector, Arc::new(NoIpmi))
            .context("Can't register handlers")?;

    let mut chan = MuxSocket::connect(MuxKind::Pldm, bus)
        .with_context(|| format!("Can't connect to PLDM mux for bus {bus}"))?;
    info!("Responding on {} as TID {}", chan.name(), config.tid);

    loop {
        dispatcher.serve_one(&mut chan).context("Receive failed")?;
    }
}

fn main() -> anyhow::Result<()> {
    let args: Args = argh::from_env();

    let level = if args.trace {
        log::LevelFilter::Trace
    } else if args.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Warn
    };
    env_logger::Builder::new().filter_level(level).init();

    let config = ResponderConfig {
        bus: args.bus,
        tid: args.tid,
        poll_delay: Duration::from_millis(args.poll_delay_ms),
        ..Default::default()
    };

    run(&config)
}
