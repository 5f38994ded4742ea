// SPDX-License-Identifier: MIT OR Apache-2.0
/*
 * PLDM base responder implementation.
 *
 * Copyright (c) 2025 Code Construct
 */

//! Platform Level Data Model (PLDM) base protocol responder support
//!
//! [`CapabilityRegistry`] records which PLDM types, commands and versions
//! this endpoint supports, and answers the type-0 discovery commands from
//! that record. It is populated once at start-up and read-only afterwards.

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use deku::{DekuContainerRead, DekuContainerWrite};
use mctp::Eid;

use crate::control::{self, control_ccode, xfer_op, Cmd, PLDM_TYPE_CONTROL};
use crate::handler::{CommandResult, CommandTable, Handler};
use crate::util::encode_bitmap;
use crate::{CCode, PldmError, PldmRequest, Result, TransferFlag};

/// Unassigned terminus ID
pub const TID_UNASSIGNED: u8 = 0x00;

/// PLDM base specification version 1.1.0
pub const PLDM_BASE_VERSION: u32 = 0xf1f1f000;

const CRC32: crc::Crc<u32, crc::Table<16>> =
    crc::Crc::<u32, crc::Table<16>>::new(&crc::CRC_32_ISO_HDLC);

#[derive(Debug)]
struct TypeData {
    id: u8,
    version: u32,
    commands: [u8; 32],
}

impl TypeData {
    fn new(id: u8, version: u32, commands: &[u8]) -> Self {
        Self {
            id,
            version,
            commands: encode_bitmap(commands.iter().copied()),
        }
    }
}

/// Supported PLDM types, and the type-0 handler set answering for them.
#[derive(Debug)]
pub struct CapabilityRegistry {
    tid: u8,
    types: Vec<TypeData>,
    table: CommandTable<Self>,
}

impl CapabilityRegistry {
    /// Create a registry with terminus ID `tid`.
    ///
    /// The base type itself is registered with the commands handled here.
    pub fn new(tid: u8) -> Self {
        let cmds: [(u8, Handler<Self>); 4] = [
            (Cmd::GetTID as u8, Self::cmd_get_tid),
            (Cmd::GetPLDMVersion as u8, Self::cmd_get_version),
            (Cmd::GetPLDMTypes as u8, Self::cmd_get_types),
            (Cmd::GetPLDMCommands as u8, Self::cmd_get_commands),
        ];
        let table = CommandTable::new(cmds);
        let base = TypeData::new(
            PLDM_TYPE_CONTROL,
            PLDM_BASE_VERSION,
            &table.commands(),
        );
        Self {
            tid,
            types: vec![base],
            table,
        }
    }

    /// Register a new PLDM type.
    ///
    /// This populates data returned by the base Get PLDM Types, Get PLDM
    /// Version and Get PLDM Commands responses. Each type may only be
    /// registered once.
    pub fn register_type(
        &mut self,
        id: u8,
        version: u32,
        commands: &[u8],
    ) -> Result<()> {
        if id >= 64 || self.supports(id) {
            debug!("can't register PLDM type {id:#04x}");
            return Err(PldmError::InvalidArgument);
        }
        self.types.push(TypeData::new(id, version, commands));
        Ok(())
    }

    /// Returns our terminus ID
    pub fn tid(&self) -> u8 {
        self.tid
    }

    /// Whether `typ` is registered
    pub fn supports(&self, typ: u8) -> bool {
        self.find(typ).is_some()
    }

    /// Returns the version record for `typ`
    pub fn version(&self, typ: u8) -> Option<u32> {
        self.find(typ).map(|t| t.version)
    }

    /// Returns the supported command bitmap for `typ`
    pub fn commands(&self, typ: u8) -> Option<&[u8; 32]> {
        self.find(typ).map(|t| &t.commands)
    }

    /// Returns the supported type bitmap
    pub fn types_bitmap(&self) -> [u8; 8] {
        encode_bitmap(self.types.iter().map(|t| t.id))
    }

    fn find(&self, typ: u8) -> Option<&TypeData> {
        self.types.iter().find(|t| t.id == typ)
    }

    /// Handle an incoming request routed to the base handler set.
    ///
    /// Requests for a PLDM type other than the base type are answered with
    /// an invalid type error. Returns `None` for base commands without a
    /// handler.
    pub fn handle(&self, req: &PldmRequest, eid: Eid) -> Option<CommandResult> {
        if req.typ != PLDM_TYPE_CONTROL {
            debug!("no handler set for PLDM type {:#04x}", req.typ);
            return Some(Err(CCode::ERROR_INVALID_PLDM_TYPE.into()));
        }
        self.table.dispatch(self, req, eid)
    }

    fn cmd_get_tid(&self, _req: &PldmRequest, _eid: Eid) -> CommandResult {
        let resp = control::GetTIDResp { tid: self.tid };
        Ok(resp.to_bytes()?)
    }

    fn cmd_get_version(&self, req: &PldmRequest, _eid: Eid) -> CommandResult {
        let (_rest, vreq) =
            control::GetPLDMVersionReq::from_bytes((req.data.as_slice(), 0))?;

        if vreq.xfer_op != xfer_op::GET_FIRST_PART {
            return Err(control_ccode::INVALID_TRANSFER_OPERATION_FLAG.into());
        }

        let version = self
            .version(vreq.pldm_type)
            .ok_or(CCode::ERROR_INVALID_PLDM_TYPE)?;

        let resp = control::GetPLDMVersionResp {
            next_handle: 0,
            xfer_flag: TransferFlag::StartAndEnd as u8,
            version,
            crc: CRC32.checksum(&version.to_le_bytes()),
        };
        Ok(resp.to_bytes()?)
    }

    fn cmd_get_types(&self, _req: &PldmRequest, _eid: Eid) -> CommandResult {
        let resp = control::GetPLDMTypesResp {
            types: self.types_bitmap(),
        };
        Ok(resp.to_bytes()?)
    }

    fn cmd_get_commands(&self, req: &PldmRequest, _eid: Eid) -> CommandResult {
        let (_rest, creq) =
            control::GetPLDMCommandsReq::from_bytes((req.data.as_slice(), 0))?;

        let typ = self
            .find(creq.pldm_type)
            .ok_or(CCode::ERROR_INVALID_PLDM_TYPE)?;

        if typ.version != creq.version {
            debug!(
                "Get PLDM Commands for type {:#04x} with version {:#010x}, have {:#010x}",
                typ.id, creq.version, typ.version
            );
        }

        let resp = control::GetPLDMCommandsResp {
            commands: typ.commands,
        };
        Ok(resp.to_bytes()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::complete;
    use crate::util::decode_bitmap;
    use proptest::prelude::*;

    fn run(r: &CapabilityRegistry, cmd: Cmd, data: &[u8]) -> (u8, Vec<u8>) {
        let req =
            PldmRequest::new_data(PLDM_TYPE_CONTROL, cmd as u8, data.to_vec());
        let rsp = complete(&req, r.handle(&req, Eid(8)).unwrap());
        (rsp.cc, rsp.data)
    }

    fn registry() -> CapabilityRegistry {
        let mut r = CapabilityRegistry::new(1);
        r.register_type(1, 0xf1f0f000, &[]).unwrap();
        r.register_type(4, 0xf1f0f000, &[0x01, 0x02]).unwrap();
        r
    }

    #[test]
    fn get_tid() {
        assert_eq!(run(&registry(), Cmd::GetTID, &[]), (0, vec![1]));
    }

    #[test]
    fn get_types() {
        let (cc, data) = run(&registry(), Cmd::GetPLDMTypes, &[]);
        assert_eq!(cc, 0);
        assert_eq!(data, [0b0001_0011, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn get_commands() {
        let r = registry();
        let mut req = vec![0x00];
        req.extend_from_slice(&PLDM_BASE_VERSION.to_le_bytes());
        let (cc, data) = run(&r, Cmd::GetPLDMCommands, &req);
        assert_eq!(cc, 0);
        assert_eq!(data.len(), 32);
        assert_eq!(decode_bitmap(&data), [0x02, 0x03, 0x04, 0x05]);

        let req = [0x04, 0x00, 0xf0, 0xf0, 0xf1];
        let (cc, data) = run(&r, Cmd::GetPLDMCommands, &req);
        assert_eq!(cc, 0);
        assert_eq!(decode_bitmap(&data), [0x01, 0x02]);

        // short
        let (cc, _) = run(&r, Cmd::GetPLDMCommands, &[0x04, 0x00]);
        assert_eq!(cc, CCode::ERROR_INVALID_LENGTH as u8);
    }

    #[test]
    fn get_version() {
        let r = registry();
        let (cc, data) = run(&r, Cmd::GetPLDMVersion, &[0, 0, 0, 0, 1, 0]);
        assert_eq!(cc, 0);
        let crc = CRC32.checksum(&[0x00, 0xf0, 0xf1, 0xf1]).to_le_bytes();
        let mut expect = vec![0, 0, 0, 0, 0x05, 0x00, 0xf0, 0xf1, 0xf1];
        expect.extend_from_slice(&crc);
        assert_eq!(data, expect);

        let (cc, _) = run(&r, Cmd::GetPLDMVersion, &[0, 0, 0, 0, 1, 9]);
        assert_eq!(cc, CCode::ERROR_INVALID_PLDM_TYPE as u8);

        let (cc, _) = run(&r, Cmd::GetPLDMVersion, &[0, 0, 0, 0, 0, 0]);
        assert_eq!(cc, control_ccode::INVALID_TRANSFER_OPERATION_FLAG);
    }

    #[test]
    fn non_base_type() {
        let r = registry();
        let req = PldmRequest::new(0x05, Cmd::GetTID as u8);
        let rsp = complete(&req, r.handle(&req, Eid(8)).unwrap());
        assert_eq!(rsp.cc, CCode::ERROR_INVALID_PLDM_TYPE as u8);
        assert_eq!(rsp.typ, 0x05);
    }

    #[test]
    fn unhandled_command() {
        let r = registry();
        let req = PldmRequest::new(PLDM_TYPE_CONTROL, Cmd::SetTID as u8);
        assert!(r.handle(&req, Eid(8)).is_none());
    }

    #[test]
    fn duplicate_type() {
        let mut r = registry();
        assert!(r.register_type(4, 0xf1f0f000, &[]).is_err());
        assert!(r.register_type(64, 0xf1f0f000, &[]).is_err());
    }

    proptest! {
        #[test]
        fn unknown_type_commands(
            typ in 5u8..64,
            tail in proptest::collection::vec(any::<u8>(), 4..12),
        ) {
            let r = registry();
            let mut req = vec![typ];
            req.extend_from_slice(&tail);
            let (cc, data) = run(&r, Cmd::GetPLDMCommands, &req);
            prop_assert_eq!(cc, CCode::ERROR_INVALID_PLDM_TYPE as u8);
            prop_assert!(data.is_empty());
        }
    }
}
