// SPDX-License-Identifier: MIT OR Apache-2.0
/*
 * PLDM platform event polling.
 *
 * Copyright (c) 2025 Code Construct
 */

//! Retrieval of queued events with PollForPlatformEventMessage.
//!
//! A terminus announces queued events with a message poll event. We then
//! poll it from a worker thread until it reports no further events,
//! reassembling multipart events and checking their CRC-32 before
//! passing them to the [`EventHandlers`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[allow(unused)]
use log::{debug, error, info, trace, warn};

use deku::DekuContainerWrite;
use mctp::{Channel, Eid};
use pldm::{pldm_xfer, proto_error, PldmError, PldmRequest, TransferFlag};

use crate::events::{EventContext, EventHandlers, EventOutcome};
use crate::proto::*;
use crate::PLDM_TYPE_PLATFORM;

const CRC32: crc::Crc<u32, crc::Table<16>> =
    crc::Crc::<u32, crc::Table<16>>::new(&crc::CRC_32_ISO_HDLC);

/// Largest reassembled event we will buffer from a terminus
pub const MAX_EVENT_SIZE: usize = 64 * 1024;

/// Opens a fresh transport channel for a poll worker
pub type Connector =
    Arc<dyn Fn() -> mctp::Result<Box<dyn Channel + Send>> + Send + Sync>;

/// What the caller should do after [`PollSession::advance`]
#[derive(Debug, PartialEq, Eq)]
pub enum PollStep {
    /// Send the next request
    Continue,
    /// A complete event is ready; dispatch it and send the next request
    Event {
        /// Event class
        class: u8,
        /// Reassembled event data
        data: Vec<u8>,
    },
    /// The last event failed its integrity check and was dropped
    Corrupt {
        /// Checksum sent by the terminus
        expected: u32,
        /// Checksum computed over the received data
        actual: u32,
    },
    /// The event being reassembled exceeded [`MAX_EVENT_SIZE`] and the
    /// session should be abandoned
    Oversize {
        /// Buffered length including the rejected part
        len: usize,
    },
    /// The terminus has no more events
    Done,
}

/// Poll conversation state with one terminus
#[derive(Debug)]
pub struct PollSession {
    eid: Eid,
    tid: u8,
    op: TransferOperation,
    handle: u32,
    ack: u16,
    buf: Vec<u8>,
}

impl PollSession {
    /// A session that will begin by fetching the first part of the
    /// oldest event
    pub fn new(eid: Eid, tid: u8) -> Self {
        Self {
            eid,
            tid,
            op: TransferOperation::GetFirstPart,
            handle: 0,
            ack: EVENT_ID_NULL,
            buf: Vec::new(),
        }
    }

    /// Endpoint being polled
    pub fn eid(&self) -> Eid {
        self.eid
    }

    /// Terminus being polled
    pub fn tid(&self) -> u8 {
        self.tid
    }

    /// Next request to send
    pub fn request(&self) -> PollForPlatformEventMessageReq {
        PollForPlatformEventMessageReq {
            format_version: EVENT_FORMAT_VERSION,
            xfer_op: self.op,
            data_transfer_handle: self.handle,
            event_id_to_ack: self.ack,
        }
    }

    fn restart(&mut self) {
        self.op = TransferOperation::GetFirstPart;
        self.handle = 0;
        self.ack = EVENT_ID_NULL;
    }

    fn acknowledge(&mut self, event_id: u16) {
        self.op = TransferOperation::AcknowledgementOnly;
        self.handle = 0;
        self.ack = event_id;
    }

    /// Update the session with a poll response
    pub fn advance(&mut self, rsp: &PollForPlatformEventMessageResp) -> PollStep {
        if self.op == TransferOperation::AcknowledgementOnly
            && rsp.event_id == EVENT_ID_ACK
        {
            trace!("ack complete, fetching next event");
            self.restart();
            return PollStep::Continue;
        }

        if rsp.event_id == EVENT_ID_NULL {
            return PollStep::Done;
        }

        let Some(part) = &rsp.part else {
            warn!(
                "Unexpected event ID {:#06x} from TID {} during {:?}",
                rsp.event_id, self.tid, self.op
            );
            return PollStep::Done;
        };

        if part.flag.is_start() {
            self.buf.clear();
        }
        let len = self.buf.len() + part.data.len();
        if len > MAX_EVENT_SIZE {
            self.buf = Vec::new();
            self.restart();
            return PollStep::Oversize { len };
        }
        self.buf.extend_from_slice(&part.data);

        match part.flag {
            TransferFlag::Start | TransferFlag::Middle => {
                self.op = TransferOperation::GetNextPart;
                self.handle = part.next_handle;
                self.ack = EVENT_ID_ACK;
                PollStep::Continue
            }
            TransferFlag::StartAndEnd => {
                self.acknowledge(rsp.event_id);
                PollStep::Event {
                    class: part.event_class,
                    data: core::mem::take(&mut self.buf),
                }
            }
            TransferFlag::End => {
                self.acknowledge(rsp.event_id);
                let data = core::mem::take(&mut self.buf);
                let actual = CRC32.checksum(&data);
                let expected = part.checksum.unwrap_or(!actual);
                if actual == expected {
                    PollStep::Event {
                        class: part.event_class,
                        data,
                    }
                } else {
                    PollStep::Corrupt { expected, actual }
                }
            }
        }
    }
}

/// Poll `eid` until it has no queued events, dispatching each to `events`.
///
/// Transport and decode failures end the session, as does an event larger
/// than [`MAX_EVENT_SIZE`].
pub fn poll_terminus(
    chan: &mut impl Channel,
    session: &mut PollSession,
    events: &EventHandlers,
) -> pldm::Result<()> {
    let ctx = EventContext {
        eid: session.eid,
        tid: session.tid,
    };

    loop {
        let data = session
            .request()
            .to_bytes()
            .map_err(|_| PldmError::InvalidArgument)?;
        let req = PldmRequest::new_data(
            PLDM_TYPE_PLATFORM,
            Cmd::PollForPlatformEventMessage as u8,
            data,
        );
        let rsp = pldm_xfer(chan, session.eid, &req)?;
        pldm::ccode_result(rsp.cc)?;

        let poll = PollForPlatformEventMessageResp::parse(&rsp.data)
            .map_err(|e| proto_error!("Bad poll response", "{e}"))?;

        match session.advance(&poll) {
            PollStep::Done => break,
            PollStep::Continue => (),
            PollStep::Event { class, data } => {
                match events.handle(&ctx, class, &data) {
                    EventOutcome::Handled => (),
                    EventOutcome::Unhandled => {
                        info!(
                            "TID {} polled event class {class:#04x} not handled",
                            ctx.tid
                        )
                    }
                    EventOutcome::Failed(e) => {
                        warn!(
                            "TID {} polled event class {class:#04x}: {e}",
                            ctx.tid
                        )
                    }
                }
            }
            PollStep::Corrupt { expected, actual } => {
                error!(
                    "TID {} event {:#06x} checksum mismatch, expected {expected:#010x} got {actual:#010x}",
                    ctx.tid, poll.event_id
                );
            }
            PollStep::Oversize { len } => {
                return Err(proto_error!(
                    "Polled event too large",
                    "TID {} event {:#06x} reached {len} bytes",
                    ctx.tid,
                    poll.event_id
                ));
            }
        }
    }
    debug!("TID {} event queue drained", ctx.tid);
    Ok(())
}

// Running workers, with a flag set when another poll was requested while
// the worker was busy.
type ActiveSet = Arc<Mutex<HashMap<(Eid, u8), bool>>>;

// Removes a terminus from the active set when its worker ends.
struct ActiveGuard {
    active: ActiveSet,
    key: (Eid, u8),
}

impl ActiveGuard {
    // Claims a pending rerun, or removes the entry. Check and removal
    // share one lock.
    fn rerun(&self) -> bool {
        let mut a = self.active.lock().unwrap_or_else(|e| e.into_inner());
        match a.get_mut(&self.key) {
            Some(pending) if *pending => {
                *pending = false;
                true
            }
            _ => {
                a.remove(&self.key);
                false
            }
        }
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let mut a = self.active.lock().unwrap_or_else(|e| e.into_inner());
        a.remove(&self.key);
    }
}

/// Spawns poll workers, at most one per (EID, TID)
pub struct Poller {
    connector: Connector,
    events: Arc<EventHandlers>,
    delay: Duration,
    active: ActiveSet,
}

impl core::fmt::Debug for Poller {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Poller")
            .field("delay", &self.delay)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

impl Poller {
    /// `delay` is slept before the first poll, so that the terminus has
    /// received our PlatformEventMessage response.
    pub fn new(
        connector: Connector,
        events: Arc<EventHandlers>,
        delay: Duration,
    ) -> Self {
        Self {
            connector,
            events,
            delay,
            active: Default::default(),
        }
    }

    /// Whether a worker is running for this terminus
    pub fn is_active(&self, eid: Eid, tid: u8) -> bool {
        let a = self.active.lock().unwrap_or_else(|e| e.into_inner());
        a.contains_key(&(eid, tid))
    }

    /// Start polling a terminus in the background.
    ///
    /// Returns false if a worker for the terminus is already running, or
    /// could not be started. A running worker is asked to poll again once
    /// its current session ends, so events queued after it last saw an
    /// empty queue are still fetched.
    pub fn start(&self, eid: Eid, tid: u8) -> bool {
        let key = (eid, tid);
        {
            let mut a = self.active.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(pending) = a.get_mut(&key) {
                debug!("Poll of EID {eid} TID {tid} already running");
                *pending = true;
                return false;
            }
            a.insert(key, false);
        }
        let guard = ActiveGuard {
            active: self.active.clone(),
            key,
        };

        let connector = self.connector.clone();
        let events = self.events.clone();
        let delay = self.delay;

        let r = std::thread::Builder::new()
            .name(format!("poll-{eid}-{tid}"))
            .spawn(move || {
                if !delay.is_zero() {
                    std::thread::sleep(delay);
                }
                let mut chan = match connector() {
                    Ok(c) => c,
                    Err(e) => {
                        error!("Poll of EID {eid}: can't open channel: {e}");
                        return;
                    }
                };
                loop {
                    let mut session = PollSession::new(eid, tid);
                    if let Err(e) = poll_terminus(&mut chan, &mut session, &events) {
                        warn!("Poll of EID {eid} TID {tid} failed: {e}");
                    }
                    if !guard.rerun() {
                        break;
                    }
                    debug!("Polling EID {eid} TID {tid} again");
                }
            });

        if let Err(e) = r {
            error!("Failed spawning poll worker: {e}");
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(
        event_id: u16,
        flag: TransferFlag,
        next: u32,
        data: &[u8],
        checksum: Option<u32>,
    ) -> PollForPlatformEventMessageResp {
        PollForPlatformEventMessageResp {
            tid: 1,
            event_id,
            part: Some(EventPart {
                next_handle: next,
                flag,
                event_class: 0xfa,
                data: data.to_vec(),
                checksum,
            }),
        }
    }

    fn sentinel(event_id: u16) -> PollForPlatformEventMessageResp {
        PollForPlatformEventMessageResp {
            tid: 1,
            event_id,
            part: None,
        }
    }

    #[test]
    fn multipart_sequence() {
        let mut s = PollSession::new(Eid(8), 1);
        let r = s.request();
        assert_eq!(r.xfer_op, TransferOperation::GetFirstPart);
        assert_eq!(r.event_id_to_ack, EVENT_ID_NULL);

        assert_eq!(
            s.advance(&part(3, TransferFlag::Start, 0x100, b"ab", None)),
            PollStep::Continue
        );
        let r = s.request();
        assert_eq!(r.xfer_op, TransferOperation::GetNextPart);
        assert_eq!(r.data_transfer_handle, 0x100);
        assert_eq!(r.event_id_to_ack, EVENT_ID_ACK);

        s.advance(&part(3, TransferFlag::Middle, 0x200, b"cd", None));
        assert_eq!(s.request().data_transfer_handle, 0x200);

        let crc = CRC32.checksum(b"abcdef");
        assert_eq!(
            s.advance(&part(3, TransferFlag::End, 0, b"ef", Some(crc))),
            PollStep::Event {
                class: 0xfa,
                data: b"abcdef".to_vec()
            }
        );
        let r = s.request();
        assert_eq!(r.xfer_op, TransferOperation::AcknowledgementOnly);
        assert_eq!(r.event_id_to_ack, 3);

        assert_eq!(s.advance(&sentinel(EVENT_ID_ACK)), PollStep::Continue);
        let r = s.request();
        assert_eq!(r.xfer_op, TransferOperation::GetFirstPart);
        assert_eq!(r.event_id_to_ack, EVENT_ID_NULL);

        assert_eq!(s.advance(&sentinel(EVENT_ID_NULL)), PollStep::Done);
    }

    #[test]
    fn bad_checksum() {
        let mut s = PollSession::new(Eid(8), 1);
        s.advance(&part(4, TransferFlag::Start, 1, b"xy", None));
        let good = CRC32.checksum(b"xyz");
        let step = s.advance(&part(4, TransferFlag::End, 0, b"z", Some(!good)));
        assert_eq!(
            step,
            PollStep::Corrupt {
                expected: !good,
                actual: good
            }
        );
        // still acknowledged
        assert_eq!(s.request().event_id_to_ack, 4);
    }

    #[test]
    fn start_clears_buffer() {
        let mut s = PollSession::new(Eid(8), 1);
        s.advance(&part(5, TransferFlag::Start, 1, b"stale", None));
        let step = s.advance(&part(6, TransferFlag::StartAndEnd, 0, b"new", None));
        assert_eq!(
            step,
            PollStep::Event {
                class: 0xfa,
                data: b"new".to_vec()
            }
        );
    }

    #[test]
    fn oversize_event_abandoned() {
        let mut s = PollSession::new(Eid(8), 1);
        let chunk = [0x55u8; 1024];
        assert_eq!(
            s.advance(&part(7, TransferFlag::Start, 1, &chunk, None)),
            PollStep::Continue
        );
        let mut step = PollStep::Continue;
        for n in 2..=MAX_EVENT_SIZE / chunk.len() + 1 {
            step = s.advance(&part(7, TransferFlag::Middle, n as u32, &chunk, None));
            if step != PollStep::Continue {
                break;
            }
        }
        assert_eq!(
            step,
            PollStep::Oversize {
                len: MAX_EVENT_SIZE + chunk.len()
            }
        );
        assert!(s.buf.is_empty());
        assert_eq!(s.request().xfer_op, TransferOperation::GetFirstPart);
    }
}
