// SPDX-License-Identifier: MIT OR Apache-2.0
/*
 * PLDM platform monitoring and control message definitions.
 *
 * Copyright (c) 2025 Code Construct
 */

//! Platform (type 2) wire structures for event reception and polling.

#[allow(unused)]
use log::{debug, error, info, trace, warn};

use deku::{
    deku_derive, DekuContainerRead, DekuError, DekuRead, DekuWrite,
};
use num_derive::FromPrimitive;

use pldm::TransferFlag;

/// PLDM Platform Commands
#[allow(missing_docs)]
#[derive(FromPrimitive, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Clone, Copy)]
#[repr(u8)]
pub enum Cmd {
    GetTerminusUID = 0x03,
    SetEventReceiver = 0x04,
    GetEventReceiver = 0x05,
    PlatformEventMessage = 0x0A,
    PollForPlatformEventMessage = 0x0B,
    EventMessageSupported = 0x0C,
    EventMessageBufferSize = 0x0D,
}

/// Event class codes carried in PlatformEventMessage
#[allow(missing_docs)]
pub mod event_class {
    pub const SENSOR: u8 = 0x00;
    pub const EFFECTER: u8 = 0x01;
    pub const REDFISH_TASK_EXECUTED: u8 = 0x02;
    pub const REDFISH_MESSAGE: u8 = 0x03;
    pub const PDR_REPOSITORY_CHANGE: u8 = 0x04;
    pub const MESSAGE_POLL: u8 = 0x05;
    pub const HEARTBEAT_TIMER_ELAPSED: u8 = 0x06;
    pub const CPER: u8 = 0x07;
    /// Vendor-defined platform fault record
    pub const OEM_FAULT_RECORD: u8 = 0xfa;
}

/// `platformEventStatus` values in a PlatformEventMessage response
#[allow(missing_docs)]
pub mod event_status {
    pub const NO_LOGGING: u8 = 0x00;
    pub const LOGGING_DISABLED: u8 = 0x01;
    pub const LOG_FULL: u8 = 0x02;
    pub const ACCEPTED_FOR_LOGGING: u8 = 0x03;
    pub const LOGGED: u8 = 0x04;
    pub const LOGGING_REJECTED: u8 = 0x05;
}

/// Format version of event messages we understand
pub const EVENT_FORMAT_VERSION: u8 = 0x01;

/// `EventIDToAcknowledge` when nothing is being acknowledged
pub const EVENT_ID_NULL: u16 = 0x0000;

/// Event ID sentinel: fragment in progress, or acknowledgement complete
pub const EVENT_ID_ACK: u16 = 0xffff;

// repr(u8) doesn't work with with field-less variants for Deku
#[allow(missing_docs)]
#[derive(Debug, Eq, PartialEq, Hash, Clone, DekuWrite, DekuRead)]
#[deku(endian = "little", ctx = "data_size: u8", id = "data_size")]
pub enum SensorData {
    #[deku(id = 0)]
    U8(u8),
    #[deku(id = 1)]
    I8(i8),
    #[deku(id = 2)]
    U16(u16),
    #[deku(id = 3)]
    I16(i16),
    #[deku(id = 4)]
    U32(u32),
    #[deku(id = 5)]
    I32(i32),
}

impl core::fmt::Display for SensorData {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::U8(v) => write!(f, "{v}"),
            Self::I8(v) => write!(f, "{v}"),
            Self::U16(v) => write!(f, "{v}"),
            Self::I16(v) => write!(f, "{v}"),
            Self::U32(v) => write!(f, "{v}"),
            Self::I32(v) => write!(f, "{v}"),
        }
    }
}

#[allow(missing_docs)]
#[derive(
    FromPrimitive, Debug, PartialEq, Eq, Copy, Clone, DekuRead, DekuWrite,
)]
#[deku(id_type = "u8")]
#[repr(u8)]
pub enum SensorOperationalState {
    Enabled = 0,
    Disabled,
    Unavailable,
    StatusUnknown,
    Failed,
    Initializing,
    ShuttingDown,
    InTest,
}

#[allow(missing_docs)]
#[derive(
    FromPrimitive, Debug, PartialEq, Eq, Copy, Clone, DekuRead, DekuWrite,
)]
#[deku(id_type = "u8")]
#[repr(u8)]
pub enum SensorState {
    Unknown = 0,
    Normal,
    Warning,
    Critical,
    Fatal,
    LowerWarning,
    LowerCritical,
    LowerFatal,
    UpperWarning,
    UpperCritical,
    UpperFatal,
}

#[allow(missing_docs)]
#[derive(Debug, DekuRead, DekuWrite, PartialEq, Eq, Clone, Copy, Hash)]
#[deku(endian = "little")]
pub struct SensorId(pub u16);

impl core::fmt::Display for SensorId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}

/// Fixed leading fields of a PlatformEventMessage request
#[allow(missing_docs)]
#[derive(Debug, DekuRead, DekuWrite, PartialEq, Eq, Clone)]
pub struct PlatformEventMessageHead {
    pub format_version: u8,
    pub tid: u8,
    pub event_class: u8,
}

/// PlatformEventMessage request: head plus class-specific event data
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PlatformEventMessageReq<'a> {
    /// Fixed fields
    pub head: PlatformEventMessageHead,
    /// Event data, interpreted according to `head.event_class`
    pub data: &'a [u8],
}

impl<'a> PlatformEventMessageReq<'a> {
    /// Decode from a request payload
    pub fn parse(buf: &'a [u8]) -> Result<Self, DekuError> {
        let ((rest, _), head) = PlatformEventMessageHead::from_bytes((buf, 0))?;
        Ok(Self { head, data: rest })
    }
}

/// Sensor event class types
#[allow(missing_docs)]
pub mod sensor_event_class {
    pub const SENSOR_OP_STATE: u8 = 0x00;
    pub const STATE_SENSOR_STATE: u8 = 0x01;
    pub const NUMERIC_SENSOR_STATE: u8 = 0x02;
}

/// Leading fields of sensor event data
#[allow(missing_docs)]
#[derive(Debug, DekuRead, DekuWrite, PartialEq, Eq, Clone)]
pub struct SensorEventHead {
    pub sensor: SensorId,
    pub class: u8,
}

#[allow(missing_docs)]
#[derive(Debug, DekuRead, DekuWrite, PartialEq, Eq, Clone)]
pub struct SensorOpStateEvent {
    pub present_op_state: SensorOperationalState,
    pub previous_op_state: SensorOperationalState,
}

#[allow(missing_docs)]
#[derive(Debug, DekuRead, DekuWrite, PartialEq, Eq, Clone)]
pub struct StateSensorStateEvent {
    pub offset: u8,
    pub event_state: u8,
    pub previous_state: u8,
}

#[allow(missing_docs)]
#[deku_derive(DekuRead)]
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct NumericSensorStateEvent {
    pub event_state: SensorState,
    pub previous_state: SensorState,
    #[deku(temp)]
    data_size: u8,
    #[deku(ctx = "*data_size")]
    pub reading: SensorData,
}

/// pldmMessagePollEvent data
#[allow(missing_docs)]
#[derive(Debug, DekuRead, DekuWrite, PartialEq, Eq, Clone)]
#[deku(endian = "little")]
pub struct MessagePollEvent {
    pub format_version: u8,
    pub event_id: u16,
    pub data_transfer_handle: u32,
}

/// PollForPlatformEventMessage transfer operations
#[allow(missing_docs)]
#[derive(
    FromPrimitive, Debug, PartialEq, Eq, Copy, Clone, DekuRead, DekuWrite,
)]
#[deku(id_type = "u8")]
#[repr(u8)]
pub enum TransferOperation {
    GetNextPart = 0,
    GetFirstPart = 1,
    AcknowledgementOnly = 2,
}

/// PollForPlatformEventMessage request
#[allow(missing_docs)]
#[derive(Debug, DekuRead, DekuWrite, PartialEq, Eq, Clone)]
pub struct PollForPlatformEventMessageReq {
    pub format_version: u8,
    pub xfer_op: TransferOperation,
    #[deku(endian = "little")]
    pub data_transfer_handle: u32,
    #[deku(endian = "little")]
    pub event_id_to_ack: u16,
}

#[derive(Debug, DekuRead, DekuWrite, PartialEq, Eq, Clone)]
#[deku(endian = "little")]
struct PollRespHead {
    tid: u8,
    event_id: u16,
}

#[derive(Debug, DekuRead, DekuWrite, PartialEq, Eq, Clone)]
#[deku(endian = "little")]
struct PollRespPart {
    next_handle: u32,
    xfer_flag: u8,
    event_class: u8,
    data_size: u32,
}

/// One fragment of event data returned by a poll
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct EventPart {
    /// Continuation handle for the next GetNextPart
    pub next_handle: u32,
    /// Position of this fragment
    pub flag: TransferFlag,
    /// Class of the event being transferred
    pub event_class: u8,
    /// Fragment bytes
    pub data: Vec<u8>,
    /// CRC-32 over the whole event, present on `End` fragments
    pub checksum: Option<u32>,
}

/// PollForPlatformEventMessage response payload (after the completion code)
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PollForPlatformEventMessageResp {
    /// Terminus ID
    pub tid: u8,
    /// Event ID, or one of [`EVENT_ID_NULL`] / [`EVENT_ID_ACK`]
    pub event_id: u16,
    /// Event data, absent for the sentinel event IDs
    pub part: Option<EventPart>,
}

impl PollForPlatformEventMessageResp {
    /// Decode from a response payload
    pub fn parse(buf: &[u8]) -> Result<Self, DekuError> {
        let ((rest, _), head) = PollRespHead::from_bytes((buf, 0))?;

        if head.event_id == EVENT_ID_NULL || head.event_id == EVENT_ID_ACK {
            return Ok(Self {
                tid: head.tid,
                event_id: head.event_id,
                part: None,
            });
        }

        let ((rest, _), p) = PollRespPart::from_bytes((rest, 0))?;
        let flag = num_traits::FromPrimitive::from_u8(p.xfer_flag).ok_or(
            DekuError::Parse(
                format!("bad transfer flag {:#04x}", p.xfer_flag).into(),
            ),
        )?;

        let size = p.data_size as usize;
        let Some((data, rest)) = rest.split_at_checked(size) else {
            return Err(DekuError::Parse("event data truncated".into()));
        };

        let checksum = if flag == TransferFlag::End {
            let Some(c) = rest.first_chunk::<4>() else {
                return Err(DekuError::Parse("missing checksum".into()));
            };
            Some(u32::from_le_bytes(*c))
        } else {
            None
        };

        Ok(Self {
            tid: head.tid,
            event_id: head.event_id,
            part: Some(EventPart {
                next_handle: p.next_handle,
                flag,
                event_class: p.event_class,
                data: data.to_vec(),
                checksum,
            }),
        })
    }
}
