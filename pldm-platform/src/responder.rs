// SPDX-License-Identifier: MIT OR Apache-2.0
/*
 * PLDM platform responder.
 *
 * Copyright (c) 2025 Code Construct
 */

//! Platform (type 2) command handlers.

use std::sync::Arc;

#[allow(unused)]
use log::{debug, error, info, trace, warn};

use deku::DekuContainerRead;
use mctp::Eid;
use pldm::{CCode, CommandResult, CommandTable, Handler, PldmRequest};

use crate::events::{EventContext, EventHandlers, EventOutcome};
use crate::poll::Poller;
use crate::proto::*;
use crate::PLDM_TYPE_PLATFORM;

/// Handlers for platform commands received from termini
#[derive(Debug)]
pub struct PlatformResponder {
    events: Arc<EventHandlers>,
    poller: Poller,
    table: CommandTable<Self>,
}

impl PlatformResponder {
    /// Type version reported by GetPLDMVersion
    pub const VERSION: u32 = 0xf1f2f000;

    /// `poller` should share `events` so polled events reach the same
    /// handlers as pushed ones.
    pub fn new(events: Arc<EventHandlers>, poller: Poller) -> Self {
        let cmds: [(u8, Handler<Self>); 1] =
            [(Cmd::PlatformEventMessage as u8, Self::cmd_platform_event)];
        let table = CommandTable::new(cmds);
        Self {
            events,
            poller,
            table,
        }
    }

    /// Commands implemented, for capability registration
    pub fn commands(&self) -> Vec<u8> {
        self.table.commands()
    }

    /// Handle a platform request. `None` means the command is not
    /// implemented and no response should be sent.
    pub fn handle(&self, req: &PldmRequest, eid: Eid) -> Option<CommandResult> {
        if req.typ != PLDM_TYPE_PLATFORM {
            return Some(Err(CCode::ERROR_INVALID_PLDM_TYPE.into()));
        }
        self.table.dispatch(self, req, eid)
    }

    fn cmd_platform_event(&self, req: &PldmRequest, eid: Eid) -> CommandResult {
        let msg = PlatformEventMessageReq::parse(&req.data)?;
        let ctx = EventContext {
            eid,
            tid: msg.head.tid,
        };
        if msg.head.format_version != EVENT_FORMAT_VERSION {
            debug!(
                "Event format version {:#04x} from EID {eid}",
                msg.head.format_version
            );
        }

        let status = match msg.head.event_class {
            event_class::HEARTBEAT_TIMER_ELAPSED => {
                trace!("Heartbeat from EID {eid} TID {}", ctx.tid);
                event_status::NO_LOGGING
            }
            event_class::MESSAGE_POLL => {
                let (_, poll) = MessagePollEvent::from_bytes((msg.data, 0))?;
                if poll.format_version != EVENT_FORMAT_VERSION {
                    return Err(CCode::ERROR_INVALID_DATA.into());
                }
                debug!(
                    "Message poll from EID {eid} TID {}, event {:#06x}",
                    ctx.tid, poll.event_id
                );
                self.poller.start(eid, ctx.tid);
                event_status::NO_LOGGING
            }
            class => match self.events.handle(&ctx, class, msg.data) {
                EventOutcome::Handled => event_status::NO_LOGGING,
                EventOutcome::Failed(e) => return Err(e),
                EventOutcome::Unhandled => {
                    info!(
                        "Unhandled event class {class:#04x} from EID {eid}, {} bytes",
                        msg.data.len()
                    );
                    event_status::LOGGED
                }
            },
        };

        Ok(vec![status])
    }
}
