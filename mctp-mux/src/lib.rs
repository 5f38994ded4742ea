// SPDX-License-Identifier: MIT OR Apache-2.0
/*
 * MCTP support through a per-bus mux daemon socket
 *
 * Copyright (c) 2024 Code Construct
 */

#![warn(missing_docs)]

//! Interface to the per-bus MCTP mux daemon.
//!
//! The daemon owns the physical MCTP binding for one bus, and accepts
//! clients on a `SOCK_SEQPACKET` socket in the abstract unix namespace.
//! Each datagram on that socket is one MCTP message, prefixed with the
//! remote endpoint ID and the MCTP message type:
//!
//! ```text
//!  +-----+----------+-----------------------+
//!  | eid | msg type | message payload ...   |
//!  +-----+----------+-----------------------+
//! ```
//!
//! [`MuxSocket`] wraps the client end of that socket and implements
//! [`mctp::Channel`].
//!
//! ```no_run
//! use mctp::Channel;
//! use mctp_mux::{MuxKind, MuxSocket};
//!
//! let mut sock = MuxSocket::connect(MuxKind::Pldm, 2)?;
//! let (eid, msg) = sock.recv_from()?;
//! # Ok::<(), mctp::Error>(())
//! ```

use core::mem;
use std::io::Error;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use mctp::{Eid, MsgType, Result, MCTP_TYPE_PLDM};

/// Socket-level send and receive deadline.
pub const MUX_TIMEOUT: Duration = Duration::from_secs(10);

/// Length of the `[eid, msg type]` framing prefix.
pub const PREFIX_LEN: usize = 2;

/// Smallest message payload the mux will deliver: a PLDM header.
pub const MIN_PAYLOAD_LEN: usize = 3;

/// Which daemon endpoint to connect to on a bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxKind {
    /// General PLDM traffic
    Pldm,
    /// Firmware update traffic
    FirmwareUpdate,
}

/// Returns the daemon endpoint name for `kind` on `bus`.
///
/// This is the abstract socket name, without the leading NUL.
pub fn endpoint_name(kind: MuxKind, bus: u8) -> String {
    match kind {
        MuxKind::Pldm => format!("pldm-mux{bus}"),
        MuxKind::FirmwareUpdate => format!("pldm-fwup-mux{bus}"),
    }
}

/// Builds a framed datagram for `payload`.
pub fn encode_frame(eid: Eid, typ: MsgType, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(PREFIX_LEN + payload.len());
    buf.push(eid.0);
    buf.push(typ.0);
    buf.extend_from_slice(payload);
    buf
}

/// Splits a received datagram into source EID and payload.
///
/// Fails on datagrams shorter than the smallest possible framed message, or
/// with a message type other than `typ`.
pub fn decode_frame(buf: &[u8], typ: MsgType) -> Result<(Eid, &[u8])> {
    if buf.len() < PREFIX_LEN + MIN_PAYLOAD_LEN {
        debug!("short mux frame, {} bytes", buf.len());
        return Err(mctp::Error::RxFailure);
    }
    let (prefix, payload) = buf.split_at(PREFIX_LEN);
    if prefix[1] != typ.0 {
        debug!("mux frame type {:#04x}, expected {:#04x}", prefix[1], typ.0);
        return Err(mctp::Error::InvalidInput);
    }
    Ok((Eid(prefix[0]), payload))
}

// helper for IO error construction
fn last_os_error() -> mctp::Error {
    mctp::Error::Io(Error::last_os_error())
}

fn abstract_addr(name: &str) -> Result<(libc::sockaddr_un, libc::socklen_t)> {
    // safety: sockaddr_un is plain data, all-zeroes is a valid value
    let mut addr: libc::sockaddr_un = unsafe { mem::zeroed() };
    addr.sun_family = libc::AF_UNIX as libc::sa_family_t;

    let name = name.as_bytes();
    // sun_path[0] stays NUL, selecting the abstract namespace
    if name.len() + 1 > addr.sun_path.len() {
        return Err(mctp::Error::BadArgument);
    }
    for (d, s) in addr.sun_path[1..].iter_mut().zip(name) {
        *d = *s as libc::c_char;
    }

    let len = mem::size_of::<libc::sa_family_t>() + 1 + name.len();
    Ok((addr, len as libc::socklen_t))
}

/// Client connection to a mux daemon.
pub struct MuxSocket {
    fd: OwnedFd,
    typ: MsgType,
    name: String,
}

impl MuxSocket {
    /// Connect to the `kind` daemon for `bus`, carrying PLDM messages.
    ///
    /// Fails immediately if no daemon is listening.
    pub fn connect(kind: MuxKind, bus: u8) -> Result<Self> {
        Self::connect_name(&endpoint_name(kind, bus), MCTP_TYPE_PLDM)
    }

    /// Connect to a daemon by abstract socket name.
    pub fn connect_name(name: &str, typ: MsgType) -> Result<Self> {
        let (addr, addr_len) = abstract_addr(name)?;

        let rc = unsafe {
            libc::socket(
                libc::AF_UNIX,
                libc::SOCK_SEQPACKET | libc::SOCK_CLOEXEC,
                0,
            )
        };
        if rc < 0 {
            return Err(last_os_error());
        }
        // safety: the fd is valid, and we have exclusive ownership
        let fd = unsafe { OwnedFd::from_raw_fd(rc) };

        let rc = unsafe {
            libc::connect(
                fd.as_raw_fd(),
                (&addr as *const libc::sockaddr_un) as *const libc::sockaddr,
                addr_len,
            )
        };
        if rc < 0 {
            let e = last_os_error();
            debug!("connect to {name} failed: {e}");
            return Err(e);
        }

        let sock = Self::from_fd(fd, typ, name)?;
        debug!("connected to mux {name}");
        Ok(sock)
    }

    /// Wrap an already-connected `SOCK_SEQPACKET` descriptor.
    ///
    /// Socket timeouts are set to [`MUX_TIMEOUT`].
    pub fn from_fd(fd: OwnedFd, typ: MsgType, name: &str) -> Result<Self> {
        let s = Self {
            fd,
            typ,
            name: name.to_string(),
        };
        s.set_timeout(libc::SO_RCVTIMEO, MUX_TIMEOUT)?;
        s.set_timeout(libc::SO_SNDTIMEO, MUX_TIMEOUT)?;
        Ok(s)
    }

    /// Returns the daemon endpoint name
    pub fn name(&self) -> &str {
        &self.name
    }

    fn set_timeout(&self, opt: libc::c_int, dur: Duration) -> Result<()> {
        // Avoid warnings about using time_t with musl.
        #![allow(deprecated)]

        let tv = libc::timeval {
            tv_sec: dur.as_secs() as libc::time_t,
            tv_usec: dur.subsec_micros() as libc::suseconds_t,
        };
        let rc = unsafe {
            libc::setsockopt(
                self.as_raw_fd(),
                libc::SOL_SOCKET,
                opt,
                (&tv as *const libc::timeval) as *const libc::c_void,
                mem::size_of::<libc::timeval>() as libc::socklen_t,
            )
        };

        if rc < 0 {
            Err(last_os_error())
        } else {
            Ok(())
        }
    }

    fn io_send(&self, buf: &[u8]) -> std::io::Result<usize> {
        let rc = unsafe {
            libc::send(
                self.as_raw_fd(),
                buf.as_ptr() as *const libc::c_void,
                buf.len() as libc::size_t,
                0,
            )
        };
        if rc < 0 {
            Err(Error::last_os_error())
        } else {
            Ok(rc as usize)
        }
    }

    // Receive into buf with the given flags. With MSG_TRUNC the returned
    // length is that of the datagram, which may exceed buf.len()
    fn io_recv(
        &self,
        buf: &mut [u8],
        flags: libc::c_int,
    ) -> std::io::Result<usize> {
        let rc = unsafe {
            libc::recv(
                self.as_raw_fd(),
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len() as libc::size_t,
                flags,
            )
        };
        if rc < 0 {
            Err(Error::last_os_error())
        } else {
            Ok(rc as usize)
        }
    }

    /// Send a framed message to `eid`.
    ///
    /// A send that fails with `EAGAIN` is retried once.
    pub fn send_frame(&self, eid: Eid, payload: &[u8]) -> Result<()> {
        let frame = encode_frame(eid, self.typ, payload);

        let res = match self.io_send(&frame) {
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                debug!("{}: send would block, retrying", self.name);
                self.io_send(&frame)
            }
            r => r,
        };

        let sz = res.map_err(|e| {
            warn!("{}: send to eid {eid} failed: {e}", self.name);
            mctp::Error::from(e)
        })?;
        if sz != frame.len() {
            return Err(mctp::Error::TxFailure);
        }
        trace!("{}: sent {} bytes to eid {eid}", self.name, payload.len());
        Ok(())
    }

    /// Returns the length of the next pending datagram, without consuming
    /// it.
    pub fn peek_len(&self) -> Result<usize> {
        let mut none = [0u8; 0];
        let len = self.io_recv(&mut none, libc::MSG_PEEK | libc::MSG_TRUNC)?;
        Ok(len)
    }

    /// Receive the next framed message, returning its source and payload.
    ///
    /// The datagram is consumed even when it is rejected.
    pub fn recv_frame(&self) -> Result<(Eid, Vec<u8>)> {
        let len = self.peek_len()?;
        // a zero-length read on a seqpacket socket is the peer hanging up
        let mut buf = vec![0u8; len.max(1)];
        let rx = self.io_recv(&mut buf, 0)?;
        if rx == 0 {
            return Err(mctp::Error::Unreachable);
        }
        buf.truncate(rx);

        let (eid, payload) = decode_frame(&buf, self.typ)?;
        trace!("{}: received {} bytes from eid {eid}", self.name, payload.len());
        Ok((eid, payload.to_vec()))
    }
}

impl AsRawFd for MuxSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl mctp::Channel for MuxSocket {
    fn send(&mut self, eid: Eid, buf: &[u8]) -> Result<()> {
        self.send_frame(eid, buf)
    }

    fn recv_from(&mut self) -> Result<(Eid, Vec<u8>)> {
        self.recv_frame()
    }
}
