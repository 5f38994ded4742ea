// SPDX-License-Identifier: MIT OR Apache-2.0
/*
 * PLDM firmware update: PLDM type 5 messaging
 *
 * Copyright (c) 2023 Code Construct
 */
#![forbid(unsafe_code)]

//! PLDM for Firmware Update (DSP0267), update agent side.
//!
//! [`pkg`] parses firmware update packages, and [`ua`] drives a firmware
//! device through an update from a package.

use core::fmt;
use log::debug;

use enumset::{EnumSet, EnumSetType};
use num_derive::FromPrimitive;

use nom::{
    branch::alt,
    bytes::complete::take,
    combinator::{all_consuming, map, map_opt, map_res, rest},
    multi::length_count,
    number::complete::{le_u16, le_u32, le_u8},
    sequence::tuple,
    IResult,
};

/// PLDM firmware packaging
pub mod pkg;
/// Update Agent
pub mod ua;

pub use ua::{run_update, update, PldmUpdateError, UpdateOptions};

/// PLDM type code for firmware update
pub const PLDM_TYPE_FW: u8 = 5;

/// Largest RequestFirmwareData length we offer in RequestUpdate
pub const MAX_TRANSFER_SIZE: u32 = 1024;

/// Smallest transfer size every firmware device must accept
pub const BASELINE_TRANSFER_SIZE: u32 = 32;

/// PLDM firmware update commands
#[allow(missing_docs)]
#[derive(FromPrimitive, Debug, PartialEq, Eq, Clone, Copy)]
#[repr(u8)]
pub enum Cmd {
    QueryDeviceIdentifiers = 0x01,
    GetFirmwareParameters = 0x02,
    RequestUpdate = 0x10,
    GetPackageData = 0x11,
    GetDeviceMetaData = 0x12,
    PassComponentTable = 0x13,
    UpdateComponent = 0x14,
    RequestFirmwareData = 0x15,
    TransferComplete = 0x16,
    VerifyComplete = 0x17,
    ApplyComplete = 0x18,
    GetMetaData = 0x19,
    ActivateFirmware = 0x1A,
    GetStatus = 0x1B,
    CancelUpdateComponent = 0x1C,
    CancelUpdate = 0x1D,
}

/// Firmware update completion codes
#[allow(missing_docs)]
pub mod fw_codes {
    pub const NOT_IN_UPDATE_MODE: u8 = 0x80;
    pub const ALREADY_IN_UPDATE_MODE: u8 = 0x81;
    pub const DATA_OUT_OF_RANGE: u8 = 0x82;
    pub const INVALID_TRANSFER_LENGTH: u8 = 0x83;
    pub const INVALID_STATE_FOR_COMMAND: u8 = 0x84;
    pub const INCOMPLETE_UPDATE: u8 = 0x85;
    pub const BUSY_IN_BACKGROUND: u8 = 0x86;
    pub const CANCEL_PENDING: u8 = 0x87;
    pub const COMMAND_NOT_EXPECTED: u8 = 0x88;
    pub const RETRY_REQUEST_FW_DATA: u8 = 0x89;
    pub const UNABLE_TO_INITIATE_UPDATE: u8 = 0x8A;
    pub const ACTIVATION_NOT_REQUIRED: u8 = 0x8B;
    pub const SELF_CONTAINED_ACTIVATION_NOT_PERMITTED: u8 = 0x8C;
    pub const NO_DEVICE_METADATA: u8 = 0x8D;
    pub const RETRY_REQUEST_UPDATE: u8 = 0x8E;
    pub const NO_PACKAGE_DATA: u8 = 0x8F;
    pub const INVALID_TRANSFER_HANDLE: u8 = 0x90;
    pub const INVALID_TRANSFER_OPERATION_FLAG: u8 = 0x91;
}

/// Firmware device states, as reported by GetStatus
#[allow(missing_docs)]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[repr(u8)]
pub enum PldmFDState {
    Idle = 0,
    LearnComponents = 1,
    ReadyXfer = 2,
    Download = 3,
    Verify = 4,
    Apply = 5,
    Activate = 6,
}

impl TryFrom<u8> for PldmFDState {
    type Error = &'static str;
    fn try_from(value: u8) -> core::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Idle),
            1 => Ok(Self::LearnComponents),
            2 => Ok(Self::ReadyXfer),
            3 => Ok(Self::Download),
            4 => Ok(Self::Verify),
            5 => Ok(Self::Apply),
            6 => Ok(Self::Activate),
            _ => Err("unknown state!"),
        }
    }
}

impl PldmFDState {
    /// Parse a single state byte
    pub fn parse(buf: &[u8]) -> VResult<&[u8], Self> {
        map_res(le_u8, TryInto::<PldmFDState>::try_into)(buf)
    }
}

type VResult<I, O> = IResult<I, O>;

/// A PLDM firmware string: text, or raw bytes of an unsupported encoding
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescriptorString {
    String(String),
    Bytes(Vec<u8>),
}

impl fmt::Display for DescriptorString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let trim_chars = ['\0', ' '];
        match self {
            Self::String(s) => {
                write!(
                    f,
                    "{}",
                    s.trim_end_matches(&trim_chars).escape_default()
                )
            }
            Self::Bytes(bs) => {
                for b in bs.iter() {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
        }
    }
}

impl DescriptorString {
    /// Append as (type, length, data), as used in update requests.
    ///
    /// Strings longer than 255 bytes are truncated.
    pub fn write_utf8_bytes(&self, v: &mut Vec<u8>) {
        let (typ, b) = match self {
            Self::String(s) => (0x01, s.as_bytes()),
            Self::Bytes(b) => (0x00, b.as_slice()),
        };
        let b = &b[..b.len().min(u8::MAX as usize)];
        v.push(typ);
        v.push(b.len() as u8);
        v.extend_from_slice(b);
    }

    /// A string from UTF-8 (or ASCII) bytes
    pub fn new_utf8(v: &[u8]) -> Option<Self> {
        let s = core::str::from_utf8(v).ok()?;
        Some(Self::String(s.to_string()))
    }

    /// Unknown-encoding bytes
    pub fn new_bytes(v: &[u8]) -> Option<Self> {
        Some(Self::Bytes(v.to_vec()))
    }

    /// Whether the string is empty
    pub fn is_empty(&self) -> bool {
        match self {
            Self::String(s) => s.is_empty(),
            Self::Bytes(b) => b.is_empty(),
        }
    }
}

/// A device identification descriptor
#[allow(missing_docs)]
#[derive(Debug, Clone)]
pub enum Descriptor {
    PciVid(u16),
    Iana(u32),
    Uuid(uuid::Uuid),
    Vendor {
        title: Option<DescriptorString>,
        data: Vec<u8>,
    },
    /// A descriptor type we don't decode
    Other {
        typ: u16,
        data: Vec<u8>,
    },
}

/// Parse a string body of known type and length
pub fn parse_string<'a>(
    typ: u8,
    len: u8,
) -> impl FnMut(&'a [u8]) -> VResult<&'a [u8], DescriptorString> {
    map_opt(take(len), move |d: &[u8]| match typ {
        0 => DescriptorString::new_bytes(d),
        // ascii or utf-8
        1 | 2 => DescriptorString::new_utf8(d),
        _ => {
            debug!("unimplemented string type {typ}");
            None
        }
    })
}

/// Parse a string where type, length and data are adjacent (in that order)
pub fn parse_string_adjacent(buf: &[u8]) -> VResult<&[u8], DescriptorString> {
    let (r, (typ, len)) = tuple((le_u8, le_u8))(buf)?;
    parse_string(typ, len)(r)
}

impl Descriptor {
    fn parse_pcivid(buf: &[u8]) -> VResult<&[u8], Self> {
        map(le_u16, Self::PciVid)(buf)
    }

    fn parse_iana(buf: &[u8]) -> VResult<&[u8], Self> {
        map(le_u32, Self::Iana)(buf)
    }

    fn parse_uuid(buf: &[u8]) -> VResult<&[u8], Self> {
        map_res(take(16usize), |b| {
            let u = uuid::Uuid::from_slice(b)?;
            Ok::<Descriptor, uuid::Error>(Self::Uuid(u))
        })(buf)
    }

    fn parse_vendor(buf: &[u8]) -> VResult<&[u8], Self> {
        // Attempt to parse with a proper title string; if not present just
        // consume everything as byte data
        let f1 = |(t, d): (_, &[u8])| Self::Vendor {
            title: Some(t),
            data: d.to_vec(),
        };
        let f2 = |d: &[u8]| Self::Vendor {
            title: None,
            data: d.to_vec(),
        };
        alt((map(tuple((parse_string_adjacent, rest)), f1), map(rest, f2)))(
            buf,
        )
    }

    /// Parse a type-length-value descriptor
    pub fn parse(buf: &[u8]) -> VResult<&[u8], Self> {
        let (r, (typ, len)) = tuple((le_u16, le_u16))(buf)?;
        let (r, d) = take(len)(r)?;
        let (_, desc) = match typ {
            0x0000 => all_consuming(Self::parse_pcivid)(d)?,
            0x0001 => all_consuming(Self::parse_iana)(d)?,
            0x0002 => all_consuming(Self::parse_uuid)(d)?,
            0xffff => Self::parse_vendor(d)?,
            _ => (
                d,
                Self::Other {
                    typ,
                    data: d.to_vec(),
                },
            ),
        };
        Ok((r, desc))
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PciVid(id) => write!(f, "pci-vid:{:04x}", id),
            Self::Iana(id) => write!(f, "iana:{:08x}", id),
            Self::Uuid(id) => write!(f, "uuid:{}", id),
            Self::Vendor { title, data } => {
                match title {
                    Some(t) => write!(f, "vendor:{}", t)?,
                    None => write!(f, "vendor:")?,
                }
                write!(f, "[")?;
                for b in data {
                    write!(f, "{:02x}", b)?;
                }
                write!(f, "]")
            }
            Self::Other { typ, data } => {
                write!(f, "type-{typ:04x}:[")?;
                for b in data {
                    write!(f, "{:02x}", b)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl PartialEq for Descriptor {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Vendor { data: s, .. }, Self::Vendor { data: o, .. }) => {
                s == o
            }
            (Self::Iana(s), Self::Iana(o)) => s == o,
            (Self::Uuid(s), Self::Uuid(o)) => s == o,
            (Self::PciVid(s), Self::PciVid(o)) => s == o,
            (
                Self::Other { typ: st, data: sd },
                Self::Other { typ: ot, data: od },
            ) => st == ot && sd == od,
            _ => false,
        }
    }
}

/// The identifier set of one firmware device
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceIdentifiers {
    /// Descriptors, the first being the initial descriptor
    pub ids: Vec<Descriptor>,
}

impl DeviceIdentifiers {
    /// Parse a count-prefixed descriptor list
    pub fn parse(buf: &[u8]) -> VResult<&[u8], Self> {
        length_count(le_u8, Descriptor::parse)(buf)
            .map(|(rest, ids)| (rest, Self { ids }))
    }
}

impl fmt::Display for DeviceIdentifiers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for id in self.ids.iter() {
            write!(f, "{}{}", if first { "" } else { "," }, id)?;
            first = false;
        }
        Ok(())
    }
}

/// Component classification, from DSP0267 table 19
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentClassification {
    Unknown,
    Other,
    Firmware,
    /// Any other classification code
    Code(u16),
}

impl From<u16> for ComponentClassification {
    fn from(x: u16) -> Self {
        match x {
            0x0000 => Self::Unknown,
            0x0001 => Self::Other,
            0x000a => Self::Firmware,
            c => Self::Code(c),
        }
    }
}

impl From<&ComponentClassification> for u16 {
    fn from(c: &ComponentClassification) -> u16 {
        match c {
            ComponentClassification::Unknown => 0x0000,
            ComponentClassification::Other => 0x0001,
            ComponentClassification::Firmware => 0x000a,
            ComponentClassification::Code(c) => *c,
        }
    }
}

#[allow(missing_docs)]
#[derive(EnumSetType, Debug)]
pub enum ActivationMethod {
    PendingComponentImageSet = 7,
    PendingImage = 6,
    ACPowerCycle = 5,
    DCPowerCycle = 4,
    SystemReboot = 3,
    MediumSpecificReset = 2,
    SelfContained = 1,
    Automatic = 0,
}

/// Set of activation methods
pub type ActivationMethods = EnumSet<ActivationMethod>;

/// RequestUpdate response
#[derive(Debug)]
pub struct RequestUpdateResponse {
    /// Length of metadata the device will offer at the end of the update
    pub fd_metadata_len: u16,
    /// Non-zero if the device will fetch package data
    pub fd_will_sent_gpd: u8,
}

impl RequestUpdateResponse {
    /// Parse the response payload after the completion code
    pub fn parse(buf: &[u8]) -> VResult<&[u8], Self> {
        let (r, t) = tuple((le_u16, le_u8))(buf)?;
        Ok((
            r,
            RequestUpdateResponse {
                fd_metadata_len: t.0,
                fd_will_sent_gpd: t.1,
            },
        ))
    }
}

/// GetStatus response
#[allow(missing_docs)]
#[derive(Debug)]
pub struct GetStatusResponse {
    pub current_state: PldmFDState,
    pub previous_state: PldmFDState,
    pub aux_state: u8,
    pub aux_state_status: u8,
    pub progress_percent: u8,
    pub reason_code: u8,
    pub update_option_flags_enabled: u32,
}

impl GetStatusResponse {
    /// Parse the response payload after the completion code
    pub fn parse(buf: &[u8]) -> VResult<&[u8], Self> {
        let (r, t) = tuple((
            PldmFDState::parse,
            PldmFDState::parse,
            le_u8,
            le_u8,
            le_u8,
            le_u8,
            le_u32,
        ))(buf)?;
        Ok((
            r,
            Self {
                current_state: t.0,
                previous_state: t.1,
                aux_state: t.2,
                aux_state_status: t.3,
                progress_percent: t.4,
                reason_code: t.5,
                update_option_flags_enabled: t.6,
            },
        ))
    }
}

impl fmt::Display for GetStatusResponse {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{:?}", self.current_state)
    }
}

/// Progress of a component transfer
#[derive(Debug, Clone)]
pub struct UpdateTransferProgress {
    /// Index of the component in the package
    pub component: usize,
    /// The RequestFirmwareData just served, as (offset, length)
    pub cur_xfer: Option<(u32, u32)>,
    /// Approximate completion of this component
    pub percent: u8,
    /// Transfer rate in bytes per second
    pub bps: f32,
    /// Time since the transfer started
    pub duration: chrono::Duration,
    /// Estimated time to completion
    pub remaining: chrono::Duration,
    /// Set once the device reports the transfer complete
    pub complete: bool,
}
