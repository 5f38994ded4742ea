// SPDX-License-Identifier: MIT OR Apache-2.0
/*
 * PLDM platform monitoring and control.
 *
 * Copyright (c) 2025 Code Construct
 */

//! Platform Level Data Model (PLDM) Platform Monitoring and Control
//!
//! Event reception: PlatformEventMessage handling, event class handlers,
//! and polling of queued events.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod events;
pub mod poll;
pub mod proto;
pub mod responder;

pub use events::{EventContext, EventHandler, EventHandlers, EventSink, LogSink};
pub use poll::{Connector, Poller};
pub use responder::PlatformResponder;

/// PLDM type code for platform monitoring and control
pub const PLDM_TYPE_PLATFORM: u8 = 2;
