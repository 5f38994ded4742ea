// SPDX-License-Identifier: MIT OR Apache-2.0
/*
 * PLDM responder daemon.
 *
 * Copyright (c) 2025 Code Construct
 */

//! PLDM responder
//!
//! Answers Base, Platform and OEM requests from MCTP endpoints. See
//! [`Dispatcher`] for routing.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod dispatch;
pub mod oem;

pub use config::ResponderConfig;
pub use dispatch::{Dispatcher, HandlerSet};
pub use oem::{IpmiHandler, OemHandlers};
