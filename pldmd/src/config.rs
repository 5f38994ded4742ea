// SPDX-License-Identifier: MIT OR Apache-2.0
/*
 * PLDM responder configuration.
 *
 * Copyright (c) 2025 Code Construct
 */

use std::sync::Arc;
use std::time::Duration;

use pldm::oem::Iana;
use pldm_platform::events::SensorNames;

/// Responder settings, fixed at start-up.
#[derive(Debug, Clone)]
pub struct ResponderConfig {
    /// Daemon bus number
    pub bus: u8,
    /// Terminus ID reported by GetTID
    pub tid: u8,
    /// Manufacturer identifier accepted on OEM commands
    pub iana: Iana,
    /// Wait before the first poll after a message poll event
    pub poll_delay: Duration,
    /// Names for sensor IDs, used when logging sensor events
    pub sensor_names: Arc<SensorNames>,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            bus: 0,
            tid: 1,
            // enterprise number 40981
            iana: [0x15, 0xa0, 0x00],
            poll_delay: Duration::from_millis(100),
            sensor_names: Default::default(),
        }
    }
}
