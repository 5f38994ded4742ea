// SPDX-License-Identifier: MIT OR Apache-2.0
/*
 * PLDM Messaging Control and Discovery ("PLDM Control") definitions.
 *
 * Copyright (c) 2025 Code Construct
 */

//! PLDM Messaging Control and Discovery ("PLDM Control" / type 0) messaging
//! support.
//!
//! This module provides definitions for PLDM control requests and responses.

use deku::{DekuRead, DekuWrite};
use num_derive::FromPrimitive;

pub mod responder;

/// PLDM type code for Messaging Control and Discovery
pub const PLDM_TYPE_CONTROL: u8 = 0;

/// PLDM Control command codes
#[allow(missing_docs)]
#[repr(u8)]
#[derive(FromPrimitive, Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Cmd {
    SetTID = 0x01,
    GetTID = 0x02,
    GetPLDMVersion = 0x03,
    GetPLDMTypes = 0x04,
    GetPLDMCommands = 0x05,
    SelectPLDMVersion = 0x06,
    NegotiateTransferParameters = 0x07,
    MultipartSend = 0x08,
    MultipartReceive = 0x09,
}

/// Control-specific completion codes
#[allow(missing_docs)]
pub mod control_ccode {
    pub const INVALID_DATA_TRANSFER_HANDLE: u8 = 0x80;
    pub const INVALID_TRANSFER_OPERATION_FLAG: u8 = 0x81;
    pub const INVALID_PLDM_TYPE_IN_REQUEST_DATA: u8 = 0x83;
    pub const INVALID_PLDM_VERSION_IN_REQUEST_DATA: u8 = 0x84;
}

/// Transfer operation flags for multipart Get requests
#[allow(missing_docs)]
pub mod xfer_op {
    pub const GET_NEXT_PART: u8 = 0x00;
    pub const GET_FIRST_PART: u8 = 0x01;
}

/// Get TID response
#[allow(missing_docs)]
#[derive(Debug, DekuRead, DekuWrite, PartialEq, Eq, Clone)]
pub struct GetTIDResp {
    pub tid: u8,
}

/// Get PLDM Version request
#[allow(missing_docs)]
#[derive(Debug, DekuRead, DekuWrite, PartialEq, Eq, Clone)]
#[deku(endian = "little")]
pub struct GetPLDMVersionReq {
    pub xfer_handle: u32,
    pub xfer_op: u8,
    pub pldm_type: u8,
}

/// Get PLDM Version response
///
/// Single-part only: carries one version entry and its CRC-32.
#[allow(missing_docs)]
#[derive(Debug, DekuRead, DekuWrite, PartialEq, Eq, Clone)]
#[deku(endian = "little")]
pub struct GetPLDMVersionResp {
    pub next_handle: u32,
    pub xfer_flag: u8,
    pub version: u32,
    pub crc: u32,
}

/// Get PLDM Types response
#[allow(missing_docs)]
#[derive(Debug, DekuRead, DekuWrite, PartialEq, Eq, Clone)]
pub struct GetPLDMTypesResp {
    pub types: [u8; 8],
}

/// Get PLDM Commands request
#[allow(missing_docs)]
#[derive(Debug, DekuRead, DekuWrite, PartialEq, Eq, Clone)]
#[deku(endian = "little")]
pub struct GetPLDMCommandsReq {
    pub pldm_type: u8,
    pub version: u32,
}

/// Get PLDM Commands response
#[allow(missing_docs)]
#[derive(Debug, DekuRead, DekuWrite, PartialEq, Eq, Clone)]
pub struct GetPLDMCommandsResp {
    pub commands: [u8; 32],
}
