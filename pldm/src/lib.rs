// SPDX-License-Identifier: Apache-2.0
/*
 * PLDM base message definitions.
 *
 * Copyright (c) 2023 Code Construct
 */

#![warn(missing_docs)]

//! Platform Level Data Model (PLDM) base protocol support
//!
//! This crate implements some base communication primitives for PLDM,
//! used to construct higher-level PLDM messaging applications: the message
//! header codec, completion codes, request/response transfer over an
//! [`mctp::Channel`], and the command table used by responders.

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use mctp::Eid;
use num_derive::FromPrimitive;
use thiserror::Error;

pub mod control;
pub mod handler;
pub mod oem;
pub mod util;

pub use handler::{CommandResult, CommandTable, Handler, PldmCommandError};

#[doc(hidden)]
pub use log as __log;

/// Maximum size of a PLDM message, defining our buffer sizes.
pub const PLDM_MAX_MSGSIZE: usize = 1024;

/// Number of send/receive attempts made by [`pldm_send_then_recv`]
pub const XFER_ATTEMPTS: usize = 2;

/// Generic PLDM error type
#[derive(Error, Debug)]
pub enum PldmError {
    /// PLDM protocol error
    #[error("PLDM protocol error: {0}")]
    Protocol(String),
    /// Transport communication error
    #[error("MCTP error: {0}")]
    Transport(#[from] mctp::Error),
    /// A response carried a failure completion code
    #[error("PLDM completion code 0x{0:02x}")]
    Completion(u8),
    /// Invalid argument
    #[error("Invalid argument")]
    InvalidArgument,
}

/// Creates a [`PldmError::Protocol`].
///
/// An optional second argument is a format string for detail, which is
/// logged at debug level but not carried in the error.
#[macro_export]
macro_rules! proto_error {
    ($msg: expr, $($desc: tt)+) => {{
        $crate::__log::debug!("{}: {}", $msg, format_args!($($desc)+));
        $crate::PldmError::Protocol(::std::string::String::from($msg))
    }};
    ($msg: expr) => {{
        $crate::PldmError::Protocol(::std::string::String::from($msg))
    }};
}

/// PLDM protocol return type
pub type Result<T> = std::result::Result<T, PldmError>;

/// Generic PLDM completion codes
#[allow(missing_docs)]
#[repr(u8)]
#[allow(non_camel_case_types)]
#[derive(FromPrimitive, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CCode {
    SUCCESS = 0,
    ERROR = 1,
    ERROR_INVALID_DATA = 2,
    ERROR_INVALID_LENGTH = 3,
    ERROR_NOT_READY = 4,
    ERROR_UNSUPPORTED_PLDM_CMD = 5,
    ERROR_INVALID_PLDM_TYPE = 32,
}

/// Returns `Ok` for a success completion code
pub fn ccode_result(cc: u8) -> Result<()> {
    if cc == CCode::SUCCESS as u8 {
        Ok(())
    } else {
        Err(PldmError::Completion(cc))
    }
}

/// Multipart transfer position flags, shared by several PLDM types
#[allow(missing_docs)]
#[repr(u8)]
#[derive(FromPrimitive, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferFlag {
    Start = 0x01,
    Middle = 0x02,
    End = 0x04,
    StartAndEnd = 0x05,
}

impl TransferFlag {
    /// Flag for item `idx` of a `len`-item sequence
    pub fn for_index(idx: usize, len: usize) -> Self {
        match (idx == 0, idx + 1 >= len) {
            (true, true) => Self::StartAndEnd,
            (true, false) => Self::Start,
            (false, true) => Self::End,
            (false, false) => Self::Middle,
        }
    }

    /// Whether this fragment begins a new transfer
    pub fn is_start(&self) -> bool {
        matches!(self, Self::Start | Self::StartAndEnd)
    }
}

/// Message direction, from the header Rq and D bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Rq=1, D=0
    Request,
    /// Rq=0, D=0
    Response,
    /// Rq=1, D=1: unacknowledged request
    AsyncNotify,
}

const HDR_RQ: u8 = 0x80;
const HDR_D: u8 = 0x40;
const HDR_IID_MASK: u8 = 0x1f;
const HDR_TYPE_MASK: u8 = 0x3f;

/// Maximum PLDM instance ID
pub const IID_MAX: u8 = HDR_IID_MASK;

/// Fixed 3-byte PLDM message header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PldmHeader {
    /// Instance ID, pairing a response with its request
    pub iid: u8,
    /// Message direction
    pub dir: Direction,
    /// PLDM type
    pub typ: u8,
    /// Command code
    pub cmd: u8,
}

impl PldmHeader {
    /// Encoded header length
    pub const LEN: usize = 3;

    /// Encode to wire format
    pub fn encode(&self) -> [u8; Self::LEN] {
        let dir = match self.dir {
            Direction::Request => HDR_RQ,
            Direction::Response => 0,
            Direction::AsyncNotify => HDR_RQ | HDR_D,
        };
        [dir | (self.iid & HDR_IID_MASK), self.typ & HDR_TYPE_MASK, self.cmd]
    }

    /// Decode the header at the start of `buf`
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let Some(h) = buf.get(..Self::LEN) else {
            return Err(proto_error!("Short PLDM header", "{} bytes", buf.len()));
        };
        let dir = match (h[0] & HDR_RQ != 0, h[0] & HDR_D != 0) {
            (true, false) => Direction::Request,
            (true, true) => Direction::AsyncNotify,
            (false, false) => Direction::Response,
            (false, true) => {
                return Err(proto_error!("Reserved PLDM header direction"))
            }
        };
        Ok(Self {
            iid: h[0] & HDR_IID_MASK,
            dir,
            typ: h[1] & HDR_TYPE_MASK,
            cmd: h[2],
        })
    }
}

/// Base PLDM request type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PldmRequest {
    /// PLDM Instance ID
    pub iid: u8,
    /// PLDM type.
    pub typ: u8,
    /// PLDM command code
    pub cmd: u8,
    /// Sent as an unacknowledged (datagram) request
    pub datagram: bool,
    /// PLDM command data payload
    pub data: Vec<u8>,
}

impl PldmRequest {
    /// Create a new PLDM request for a given PLDM message type and command
    /// number.
    pub fn new(typ: u8, cmd: u8) -> Self {
        Self::new_data(typ, cmd, Vec::new())
    }

    /// Create a new PLDM request with a data payload.
    pub fn new_data(typ: u8, cmd: u8, data: Vec<u8>) -> Self {
        Self {
            iid: 0,
            typ,
            cmd,
            datagram: false,
            data,
        }
    }

    /// Create a PLDM request from message data.
    ///
    /// Fails if the message is too short for a header, or is not a request.
    pub fn from_buf(buf: &[u8]) -> Result<Self> {
        let hdr = PldmHeader::decode(buf)?;
        let datagram = match hdr.dir {
            Direction::Request => false,
            Direction::AsyncNotify => true,
            Direction::Response => {
                return Err(proto_error!("Not a request message"))
            }
        };

        Ok(PldmRequest {
            iid: hdr.iid,
            typ: hdr.typ,
            cmd: hdr.cmd,
            datagram,
            data: buf[PldmHeader::LEN..].to_vec(),
        })
    }

    /// Returns the request header
    pub fn header(&self) -> PldmHeader {
        PldmHeader {
            iid: self.iid,
            dir: if self.datagram {
                Direction::AsyncNotify
            } else {
                Direction::Request
            },
            typ: self.typ,
            cmd: self.cmd,
        }
    }

    /// Serialise header and payload
    pub fn to_buf(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(PldmHeader::LEN + self.data.len());
        buf.extend_from_slice(&self.header().encode());
        buf.extend_from_slice(&self.data);
        buf
    }

    /// Set the data payload for this request
    pub fn set_data(&mut self, data: Vec<u8>) {
        self.data = data;
    }

    /// Create a success response to this request, using the instance,
    /// type and command from the original request.
    pub fn response(&self) -> PldmResponse {
        PldmResponse {
            iid: self.iid,
            typ: self.typ,
            cmd: self.cmd,
            cc: CCode::SUCCESS as u8,
            data: Vec::new(),
        }
    }

    /// Create a completion-code-only response to this request.
    pub fn error_response(&self, cc: u8) -> PldmResponse {
        let mut r = self.response();
        r.cc = cc;
        r
    }
}

/// Base PLDM response type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PldmResponse {
    /// PLDM Instance ID
    pub iid: u8,
    /// PLDM type
    pub typ: u8,
    /// PLDM command code (defined by the original request)
    pub cmd: u8,
    /// PLDM completion code
    pub cc: u8,
    /// PLDM response data payload. Does not include the cc field.
    pub data: Vec<u8>,
}

impl PldmResponse {
    /// Parse a response message.
    pub fn from_buf(buf: &[u8]) -> Result<Self> {
        let hdr = PldmHeader::decode(buf)?;
        if hdr.dir != Direction::Response {
            return Err(proto_error!("Not a response message"));
        }
        let Some(cc) = buf.get(PldmHeader::LEN) else {
            return Err(proto_error!("Short response", "{} bytes", buf.len()));
        };

        Ok(Self {
            iid: hdr.iid,
            typ: hdr.typ,
            cmd: hdr.cmd,
            cc: *cc,
            data: buf[PldmHeader::LEN + 1..].to_vec(),
        })
    }

    /// Returns the response header
    pub fn header(&self) -> PldmHeader {
        PldmHeader {
            iid: self.iid,
            dir: Direction::Response,
            typ: self.typ,
            cmd: self.cmd,
        }
    }

    /// Serialise header, completion code and payload
    pub fn to_buf(&self) -> Vec<u8> {
        let mut buf =
            Vec::with_capacity(PldmHeader::LEN + 1 + self.data.len());
        buf.extend_from_slice(&self.header().encode());
        buf.push(self.cc);
        buf.extend_from_slice(&self.data);
        buf
    }

    /// Set the data payload for this response
    pub fn set_data(&mut self, data: Vec<u8>) {
        self.data = data;
    }
}

/// Sends a request message and waits for the matching response.
///
/// `buf` must hold a request; anything else is rejected without sending.
/// Up to [`XFER_ATTEMPTS`] send/receive attempts are made when receiving
/// fails or the reply doesn't match the request's instance, type and
/// command. Send failures are not retried here, as the transport already
/// does so.
pub fn pldm_send_then_recv(
    chan: &mut impl mctp::Channel,
    eid: Eid,
    buf: &[u8],
) -> Result<Vec<u8>> {
    let req = PldmHeader::decode(buf)?;
    if req.dir != Direction::Request {
        debug!("refusing to send non-request {req:?}");
        return Err(PldmError::InvalidArgument);
    }

    let mut err = PldmError::Transport(mctp::Error::RxFailure);
    for attempt in 1..=XFER_ATTEMPTS {
        chan.send(eid, buf)?;

        let rsp = match chan.recv(eid) {
            Ok(r) => r,
            Err(e) => {
                debug!("eid {eid}: receive attempt {attempt} failed: {e}");
                err = e.into();
                continue;
            }
        };

        match PldmHeader::decode(&rsp) {
            Ok(h)
                if h.dir == Direction::Response
                    && h.iid == req.iid
                    && h.typ == req.typ
                    && h.cmd == req.cmd =>
            {
                return Ok(rsp)
            }
            Ok(h) => {
                warn!("eid {eid}: mismatched reply {h:?} to {req:?}");
                err = PldmError::Transport(mctp::Error::InvalidInput);
            }
            Err(e) => err = e,
        }
    }

    Err(err)
}

/// Main PLDM transfer operation.
///
/// Sends a Request, and waits for a response, blocking. This is generally
/// used by PLDM Requesters, which issue commands to Responders.
pub fn pldm_xfer(
    chan: &mut impl mctp::Channel,
    eid: Eid,
    req: &PldmRequest,
) -> Result<PldmResponse> {
    let rx = pldm_send_then_recv(chan, eid, &req.to_buf())?;
    PldmResponse::from_buf(&rx)
}

/// Receive an incoming PLDM request, which must come from `eid`.
///
/// Responder implementations will typically want to respond via
/// [`pldm_tx_resp`].
pub fn pldm_rx_req_from(
    chan: &mut impl mctp::Channel,
    eid: Eid,
) -> Result<PldmRequest> {
    let rx = chan.recv(eid)?;
    PldmRequest::from_buf(&rx)
}

/// Transmit an outgoing PLDM response
///
/// Performs a blocking send on the specified channel.
pub fn pldm_tx_resp(
    chan: &mut impl mctp::Channel,
    eid: Eid,
    resp: &PldmResponse,
) -> Result<()> {
    chan.send(eid, &resp.to_buf())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::VecDeque;

    fn dir_strategy() -> impl Strategy<Value = Direction> {
        prop_oneof![
            Just(Direction::Request),
            Just(Direction::Response),
            Just(Direction::AsyncNotify),
        ]
    }

    proptest! {
        #[test]
        fn header_roundtrip(
            iid in 0..=IID_MAX,
            typ in 0u8..0x40,
            cmd in any::<u8>(),
            dir in dir_strategy(),
        ) {
            let h = PldmHeader { iid, dir, typ, cmd };
            prop_assert_eq!(PldmHeader::decode(&h.encode()).unwrap(), h);
        }

        #[test]
        fn request_response_roundtrip(
            iid in 0..=IID_MAX,
            typ in 0u8..0x40,
            cmd in any::<u8>(),
            cc in any::<u8>(),
            data in proptest::collection::vec(any::<u8>(), 0..16),
        ) {
            let mut req = PldmRequest::new_data(typ, cmd, data.clone());
            req.iid = iid;
            prop_assert_eq!(&PldmRequest::from_buf(&req.to_buf()).unwrap(), &req);

            let mut rsp = req.error_response(cc);
            rsp.set_data(data);
            prop_assert_eq!(PldmResponse::from_buf(&rsp.to_buf()).unwrap(), rsp);
        }
    }

    #[test]
    fn header_layout() {
        let req = PldmRequest::new_data(0x02, 0x0a, vec![0x01]);
        assert_eq!(req.to_buf(), [0x80, 0x02, 0x0a, 0x01]);

        let mut rsp = req.error_response(CCode::ERROR_INVALID_DATA as u8);
        rsp.iid = 3;
        assert_eq!(rsp.to_buf(), [0x03, 0x02, 0x0a, 0x02]);
    }

    #[test]
    fn short_messages() {
        assert!(PldmRequest::from_buf(&[0x80, 0x00]).is_err());
        assert!(PldmResponse::from_buf(&[0x00, 0x00, 0x02]).is_err());
        // a response isn't a request
        assert!(PldmRequest::from_buf(&[0x00, 0x00, 0x02, 0x00]).is_err());
    }

    #[test]
    fn transfer_flags() {
        assert_eq!(TransferFlag::for_index(0, 1), TransferFlag::StartAndEnd);
        assert_eq!(TransferFlag::for_index(0, 3), TransferFlag::Start);
        assert_eq!(TransferFlag::for_index(1, 3), TransferFlag::Middle);
        assert_eq!(TransferFlag::for_index(2, 3), TransferFlag::End);
    }

    /// Replays canned receive results, recording sends.
    struct Script {
        sent: Vec<Vec<u8>>,
        rx: VecDeque<mctp::Result<Vec<u8>>>,
    }

    impl mctp::Channel for Script {
        fn send(&mut self, _eid: Eid, buf: &[u8]) -> mctp::Result<()> {
            self.sent.push(buf.to_vec());
            Ok(())
        }

        fn recv_from(&mut self) -> mctp::Result<(Eid, Vec<u8>)> {
            let r = self.rx.pop_front().unwrap_or(Err(mctp::Error::TimedOut));
            r.map(|b| (Eid(9), b))
        }
    }

    #[test]
    fn xfer_retries_receive() {
        let mut s = Script {
            sent: vec![],
            rx: VecDeque::from([
                Err(mctp::Error::TimedOut),
                Ok(vec![0x00, 0x00, 0x02, 0x00, 0x07]),
            ]),
        };
        let req = PldmRequest::new(0x00, 0x02);
        let rsp = pldm_xfer(&mut s, Eid(9), &req).unwrap();
        assert_eq!(rsp.cc, 0);
        assert_eq!(rsp.data, [0x07]);
        assert_eq!(s.sent.len(), 2);
    }

    #[test]
    fn xfer_gives_up() {
        let mut s = Script {
            sent: vec![],
            rx: VecDeque::from([
                // wrong command
                Ok(vec![0x00, 0x00, 0x03, 0x00]),
                Err(mctp::Error::TimedOut),
                Ok(vec![0x00, 0x00, 0x02, 0x00]),
            ]),
        };
        let req = PldmRequest::new(0x00, 0x02);
        assert!(pldm_xfer(&mut s, Eid(9), &req).is_err());
        assert_eq!(s.sent.len(), XFER_ATTEMPTS);
    }

    #[test]
    fn xfer_rejects_non_request() {
        let mut s = Script {
            sent: vec![],
            rx: VecDeque::new(),
        };
        let r = pldm_send_then_recv(&mut s, Eid(9), &[0x00, 0x00, 0x02, 0x00]);
        assert!(matches!(r, Err(PldmError::InvalidArgument)));
        assert!(s.sent.is_empty());
    }
}
