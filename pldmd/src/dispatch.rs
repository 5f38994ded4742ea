// SPDX-License-Identifier: MIT OR Apache-2.0
/*
 * PLDM request dispatch.
 *
 * Copyright (c) 2025 Code Construct
 */

//! Routing of incoming requests to handler sets.
//!
//! A request is routed on its PLDM type to the Platform or OEM handler
//! set, anything else goes to the Base set. The handler set then routes on
//! command code. A command with no handler gets no response at all, which
//! the requester sees as a timeout.

use std::sync::Arc;

#[allow(unused)]
use log::{debug, error, info, trace, warn};

use mctp::{Channel, Eid};
use pldm::control::responder::CapabilityRegistry;
use pldm::handler::complete;
use pldm::oem::PLDM_TYPE_OEM;
use pldm::{CommandResult, PldmRequest, PldmResponse};
use pldm_platform::poll::Connector;
use pldm_platform::{EventHandlers, PlatformResponder, Poller, PLDM_TYPE_PLATFORM};

use crate::config::ResponderConfig;
use crate::oem::{IpmiHandler, OemHandlers};

/// The handler set answering one request
#[derive(Debug, Clone, Copy)]
pub enum HandlerSet<'a> {
    /// Base (type 0) discovery commands, and the fallback for unrouted types
    Base(&'a CapabilityRegistry),
    /// Platform (type 2)
    Platform(&'a PlatformResponder),
    /// OEM (type 0x3f)
    Oem(&'a OemHandlers),
}

impl HandlerSet<'_> {
    /// Run the handler for `req`. `None` if the set has no handler for
    /// the command.
    pub fn handle(&self, req: &PldmRequest, eid: Eid) -> Option<CommandResult> {
        match self {
            Self::Base(r) => r.handle(req, eid),
            Self::Platform(p) => p.handle(req, eid),
            Self::Oem(o) => o.handle(req, eid),
        }
    }
}

/// Request dispatcher, owning every handler set.
#[derive(Debug)]
pub struct Dispatcher {
    registry: CapabilityRegistry,
    platform: PlatformResponder,
    oem: OemHandlers,
}

impl Dispatcher {
    /// Create a dispatcher from handler sets.
    ///
    /// The capability registry advertises exactly the commands of
    /// `platform` and `oem`.
    pub fn new(
        tid: u8,
        platform: PlatformResponder,
        oem: OemHandlers,
    ) -> pldm::Result<Self> {
        let mut registry = CapabilityRegistry::new(tid);
        registry.register_type(
            PLDM_TYPE_PLATFORM,
            PlatformResponder::VERSION,
            &platform.commands(),
        )?;
        registry.register_type(
            PLDM_TYPE_OEM,
            OemHandlers::VERSION,
            &oem.commands(),
        )?;
        Ok(Self {
            registry,
            platform,
            oem,
        })
    }

    /// Create the standard handler sets for `config`.
    ///
    /// Poll workers open their channels through `connector`.
    pub fn from_config(
        config: &ResponderConfig,
        events: EventHandlers,
        connector: Connector,
        ipmi: Arc<dyn IpmiHandler>,
    ) -> pldm::Result<Self> {
        let events = Arc::new(events);
        let poller = Poller::new(connector, events.clone(), config.poll_delay);
        let platform = PlatformResponder::new(events, poller);
        let oem = OemHandlers::new(config.iana, ipmi);
        Self::new(config.tid, platform, oem)
    }

    /// Supported types and commands
    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// The platform handler set
    pub fn platform(&self) -> &PlatformResponder {
        &self.platform
    }

    /// Select the handler set for a PLDM type
    pub fn handler_set(&self, typ: u8) -> HandlerSet<'_> {
        match typ {
            PLDM_TYPE_PLATFORM => HandlerSet::Platform(&self.platform),
            PLDM_TYPE_OEM => HandlerSet::Oem(&self.oem),
            _ => HandlerSet::Base(&self.registry),
        }
    }

    /// Handle a decoded request.
    ///
    /// Returns `None` when no response is to be sent: the command has no
    /// handler, or the request was a datagram.
    pub fn handle(&self, req: &PldmRequest, eid: Eid) -> Option<PldmResponse> {
        let Some(res) = self.handler_set(req.typ).handle(req, eid) else {
            info!(
                "EID {eid}: unsupported command {:#04x} for type {:#04x}",
                req.cmd, req.typ
            );
            return None;
        };

        if let Err(e) = &res {
            debug!(
                "EID {eid}: type {:#04x} cmd {:#04x} failed: {e}",
                req.typ, req.cmd
            );
        }

        if req.datagram {
            trace!("EID {eid}: no response to datagram");
            return None;
        }
        Some(complete(req, res))
    }

    /// Handle a raw request message, returning the response message.
    ///
    /// Messages that aren't requests are dropped.
    pub fn dispatch(&self, eid: Eid, msg: &[u8]) -> Option<Vec<u8>> {
        let req = match PldmRequest::from_buf(msg) {
            Ok(r) => r,
            Err(e) => {
                debug!("EID {eid}: dropping message: {e}");
                return None;
            }
        };
        self.handle(&req, eid).map(|r| r.to_buf())
    }

    /// Receive one message from `chan` and send any response.
    ///
    /// Malformed frames are dropped. Errors are returned only when the
    /// channel itself has failed.
    pub fn serve_one(&self, chan: &mut impl Channel) -> mctp::Result<()> {
        let (eid, msg) = match chan.recv_from() {
            Ok(m) => m,
            // idle
            Err(mctp::Error::TimedOut) => return Ok(()),
            Err(e @ (mctp::Error::RxFailure | mctp::Error::InvalidInput)) => {
                debug!("Dropping bad frame: {e}");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if let Some(rsp) = self.dispatch(eid, &msg) {
            if let Err(e) = chan.send(eid, &rsp) {
                warn!("EID {eid}: failed to send response: {e}");
            }
        }
        Ok(())
    }
}
