// SPDX-License-Identifier: MIT OR Apache-2.0
/*
 * MCTP common types and traits.
 *
 * Copyright (c) 2024 Code Construct
 */

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Management Component Transport Protocol (MCTP)
//!
//! This crate provides common types for MCTP, and the [`Channel`] trait.
//! Transport implementations implement [`Channel`] so that higher layer
//! protocols can exchange whole messages with remote endpoints.

/// MCTP endpoint ID
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Eid(pub u8);

impl Eid {
    /// Construct a new normal EID.
    ///
    /// Reserved, Null, and Broadcast EIDs are rejected.
    pub const fn new_normal(eid: u8) -> Result<Eid> {
        if eid <= 7 || eid == 0xff {
            Err(Error::BadArgument)
        } else {
            Ok(Eid(eid))
        }
    }
}

impl core::fmt::Display for Eid {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::fmt::Result {
        self.0.fmt(fmt)
    }
}

impl core::str::FromStr for Eid {
    type Err = String;

    /// Decimal, or hex with a `0x` prefix.
    fn from_str(s: &str) -> core::result::Result<Self, String> {
        let v = match s.to_ascii_lowercase().strip_prefix("0x") {
            Some(h) => u8::from_str_radix(h, 16),
            None => s.parse(),
        };
        v.map(Eid).map_err(|e| e.to_string())
    }
}

/// Special EID value: broadcast and/or match any.
pub const MCTP_ADDR_ANY: Eid = Eid(0xff);
/// Special EID value: NULL
pub const MCTP_ADDR_NULL: Eid = Eid(0x00);

/// MCTP Message type field
///
/// Note that this does not include the Integrity Check bit; the
/// most-significant bit will always be zero.
///
/// Defined values are in DSP0239
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct MsgType(pub u8);

impl core::fmt::Display for MsgType {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::fmt::Result {
        self.0.fmt(fmt)
    }
}

/// MCTP Control Protocol
pub const MCTP_TYPE_CONTROL: MsgType = MsgType(0x00);
/// PLDM
pub const MCTP_TYPE_PLDM: MsgType = MsgType(0x01);
/// NC-SI over MCTP
pub const MCTP_TYPE_NCSI: MsgType = MsgType(0x02);

/// An error type for MCTP transports
///
/// The options here intend to capture typical transport failures, but also
/// allow platform-specific errors to be reported through the `Io` member.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// Failure in transmit path, typically transport-specific
    TxFailure,
    /// Failure in receive path, typically transport-specific
    RxFailure,
    /// Timed out waiting for the remote peer
    TimedOut,
    /// Bad argument
    BadArgument,
    /// Received message did not match what the caller expected
    InvalidInput,
    /// The remote peer cannot be reached
    Unreachable,
    /// Provided buffer is too small
    NoSpace,
    /// Operation is unsupported
    Unsupported,
    /// IO error from transport binding
    Io(std::io::Error),
}

impl std::error::Error for Error {}

impl core::fmt::Display for Error {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            Self::Io(i) => write!(fmt, "MCTP IO Error: {}", i),
            _ => write!(fmt, "MCTP Error: {:?}", self),
        }
    }
}

impl From<Error> for std::io::Error {
    fn from(e: Error) -> std::io::Error {
        std::io::Error::other(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Error {
        match e.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                Error::TimedOut
            }
            _ => Error::Io(e),
        }
    }
}

/// MCTP result type
pub type Result<T> = core::result::Result<T, Error>;

/// A blocking message channel to one or more MCTP peers.
///
/// A `Channel` carries messages of a single MCTP message type, fixed when
/// the channel is created. Each `send` or `recv` moves one complete
/// message; fragmentation is the transport's concern.
pub trait Channel {
    /// Send a message to `eid`, blocking.
    fn send(&mut self, eid: Eid, buf: &[u8]) -> Result<()>;

    /// Blocking receive of the next message, from any peer.
    ///
    /// Returns the source endpoint and the message payload.
    fn recv_from(&mut self) -> Result<(Eid, Vec<u8>)>;

    /// Blocking receive of the next message, which must originate from
    /// `eid`.
    ///
    /// A message from any other peer is discarded and reported as
    /// [`Error::InvalidInput`].
    fn recv(&mut self, eid: Eid) -> Result<Vec<u8>> {
        let (src, buf) = self.recv_from()?;
        if src != eid {
            return Err(Error::InvalidInput);
        }
        Ok(buf)
    }
}

impl<C: Channel + ?Sized> Channel for &mut C {
    fn send(&mut self, eid: Eid, buf: &[u8]) -> Result<()> {
        (**self).send(eid, buf)
    }

    fn recv_from(&mut self) -> Result<(Eid, Vec<u8>)> {
        (**self).recv_from()
    }

    fn recv(&mut self, eid: Eid) -> Result<Vec<u8>> {
        (**self).recv(eid)
    }
}

impl<C: Channel + ?Sized> Channel for Box<C> {
    fn send(&mut self, eid: Eid, buf: &[u8]) -> Result<()> {
        (**self).send(eid, buf)
    }

    fn recv_from(&mut self) -> Result<(Eid, Vec<u8>)> {
        (**self).recv_from()
    }

    fn recv(&mut self, eid: Eid) -> Result<Vec<u8>> {
        (**self).recv(eid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eid_parse() {
        assert_eq!("9".parse::<Eid>(), Ok(Eid(9)));
        assert_eq!("0x1d".parse::<Eid>(), Ok(Eid(0x1d)));
        assert!("0x1ff".parse::<Eid>().is_err());
        assert!(Eid::new_normal(0xff).is_err());
        assert!(Eid::new_normal(8).is_ok());
    }

    struct Fixed(Eid);

    impl Channel for Fixed {
        fn send(&mut self, _eid: Eid, _buf: &[u8]) -> Result<()> {
            Ok(())
        }

        fn recv_from(&mut self) -> Result<(Eid, Vec<u8>)> {
            Ok((self.0, vec![1, 2, 3]))
        }
    }

    #[test]
    fn recv_checks_source() {
        let mut c = Fixed(Eid(10));
        assert_eq!(c.recv(Eid(10)).unwrap(), vec![1, 2, 3]);
        assert!(matches!(c.recv(Eid(11)), Err(Error::InvalidInput)));
    }
}
