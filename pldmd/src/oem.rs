// SPDX-License-Identifier: MIT OR Apache-2.0
/*
 * PLDM OEM responder.
 *
 * Copyright (c) 2025 Code Construct
 */

//! OEM (type 0x3f) command handlers.
//!
//! Every OEM request payload begins with the manufacturer IANA number. The
//! only command implemented is an IPMI bridge, handing an embedded IPMI
//! request to a local [`IpmiHandler`].

use std::sync::Arc;

#[allow(unused)]
use log::{debug, error, info, trace, warn};

use mctp::Eid;
use pldm::oem::{split_iana, Iana, PLDM_TYPE_OEM};
use pldm::{CCode, CommandResult, CommandTable, Handler, PldmRequest};

/// OEM command codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OemCmd {
    /// Forward an IPMI request
    IpmiBridge = 0x01,
}

/// A local IPMI request handler.
pub trait IpmiHandler: Send + Sync {
    /// Handle an IPMI request from `eid`.
    ///
    /// Returns the raw IPMI response, starting with the IPMI completion
    /// code.
    fn handle(
        &self,
        eid: Eid,
        netfn: u8,
        cmd: u8,
        data: &[u8],
    ) -> std::io::Result<Vec<u8>>;
}

/// Handlers for OEM commands
pub struct OemHandlers {
    iana: Iana,
    ipmi: Arc<dyn IpmiHandler>,
    table: CommandTable<Self>,
}

impl core::fmt::Debug for OemHandlers {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OemHandlers")
            .field("iana", &self.iana)
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

impl OemHandlers {
    /// Type version reported by GetPLDMVersion
    pub const VERSION: u32 = 0xf1f0f000;

    /// Handlers accepting requests prefixed with `iana`
    pub fn new(iana: Iana, ipmi: Arc<dyn IpmiHandler>) -> Self {
        let cmds: [(u8, Handler<Self>); 1] =
            [(OemCmd::IpmiBridge as u8, Self::cmd_ipmi)];
        Self {
            iana,
            ipmi,
            table: CommandTable::new(cmds),
        }
    }

    /// Commands implemented, for capability registration
    pub fn commands(&self) -> Vec<u8> {
        self.table.commands()
    }

    /// Handle an OEM request. `None` means the command is not implemented.
    pub fn handle(&self, req: &PldmRequest, eid: Eid) -> Option<CommandResult> {
        if req.typ != PLDM_TYPE_OEM {
            return Some(Err(CCode::ERROR_INVALID_PLDM_TYPE.into()));
        }
        self.table.dispatch(self, req, eid)
    }

    fn cmd_ipmi(&self, req: &PldmRequest, eid: Eid) -> CommandResult {
        let rest = split_iana(&req.data, &self.iana)?;
        let [netfn, cmd, data @ ..] = rest else {
            return Err(CCode::ERROR_INVALID_LENGTH.into());
        };
        trace!("IPMI from EID {eid}: netfn {netfn:#04x} cmd {cmd:#04x}");

        let ipmi = self.ipmi.handle(eid, *netfn, *cmd, data).map_err(|e| {
            warn!("IPMI request netfn {netfn:#04x} cmd {cmd:#04x} failed: {e}");
            CCode::ERROR
        })?;

        let mut rsp = Vec::with_capacity(self.iana.len() + 2 + ipmi.len());
        rsp.extend_from_slice(&self.iana);
        rsp.push(*netfn);
        rsp.push(*cmd);
        rsp.extend_from_slice(&ipmi);
        Ok(rsp)
    }
}
