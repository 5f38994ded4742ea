// SPDX-License-Identifier: MIT OR Apache-2.0
/*
 * PLDM platform event handling.
 *
 * Copyright (c) 2025 Code Construct
 */

//! Event class handlers.
//!
//! [`EventHandlers`] maps an event class to the handlers interested in it.
//! The same registry serves events pushed by PlatformEventMessage and
//! events reassembled by the poll worker.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

#[allow(unused)]
use log::{debug, error, info, trace, warn};

use deku::DekuContainerRead;
use mctp::Eid;
use pldm::PldmCommandError;

use crate::proto::*;

/// Where an event came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventContext {
    /// Source endpoint
    pub eid: Eid,
    /// Terminus ID reported in the event
    pub tid: u8,
}

/// Handler for one event class. Receives the class-specific event data.
pub type EventHandler =
    Arc<dyn Fn(&EventContext, &[u8]) -> Result<(), PldmCommandError> + Send + Sync>;

/// Sensor IDs to human readable names
pub type SensorNames = HashMap<u16, String>;

/// A decoded sensor event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SensorEvent {
    /// Sensor operational state change
    OpState(SensorOpStateEvent),
    /// State sensor transition
    State(StateSensorStateEvent),
    /// Numeric sensor threshold transition
    Numeric(NumericSensorStateEvent),
}

impl SensorEvent {
    /// Decode sensor event data, returning the sensor ID and event
    pub fn parse(data: &[u8]) -> Result<(SensorId, Self), PldmCommandError> {
        let ((rest, _), head) = SensorEventHead::from_bytes((data, 0))?;
        let ev = match head.class {
            sensor_event_class::SENSOR_OP_STATE => {
                Self::OpState(SensorOpStateEvent::from_bytes((rest, 0))?.1)
            }
            sensor_event_class::STATE_SENSOR_STATE => {
                Self::State(StateSensorStateEvent::from_bytes((rest, 0))?.1)
            }
            sensor_event_class::NUMERIC_SENSOR_STATE => Self::Numeric(
                NumericSensorStateEvent::from_bytes((rest, 0))?.1,
            ),
            c => {
                debug!("Unknown sensor event class {c:#04x}");
                return Err(pldm::CCode::ERROR_INVALID_DATA.into());
            }
        };
        Ok((head.sensor, ev))
    }
}

impl core::fmt::Display for SensorEvent {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::OpState(e) => write!(
                f,
                "operational state {:?} -> {:?}",
                e.previous_op_state, e.present_op_state
            ),
            Self::State(e) => write!(
                f,
                "state offset {} {} -> {}",
                e.offset, e.previous_state, e.event_state
            ),
            Self::Numeric(e) => write!(
                f,
                "{:?} -> {:?}, reading {}",
                e.previous_state, e.event_state, e.reading
            ),
        }
    }
}

/// Receives events that outlive the responder: logs and fault records.
pub trait EventSink: Send + Sync {
    /// A sensor event arrived. `name` is the configured sensor name, if any.
    fn sensor_event(
        &self,
        ctx: &EventContext,
        sensor: SensorId,
        name: Option<&str>,
        event: &SensorEvent,
    );

    /// A vendor fault record arrived. Returns an error if it could not be
    /// stored.
    fn fault_record(&self, ctx: &EventContext, data: &[u8]) -> std::io::Result<()>;
}

/// An [`EventSink`] that writes everything to the log.
#[derive(Debug, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn sensor_event(
        &self,
        ctx: &EventContext,
        sensor: SensorId,
        name: Option<&str>,
        event: &SensorEvent,
    ) {
        match name {
            Some(n) => info!("TID {} sensor {n}: {event}", ctx.tid),
            None => info!("TID {} sensor {sensor}: {event}", ctx.tid),
        }
    }

    fn fault_record(&self, ctx: &EventContext, data: &[u8]) -> std::io::Result<()> {
        warn!(
            "Fault record from EID {} TID {}: {:x?}",
            ctx.eid, ctx.tid, data
        );
        Ok(())
    }
}

/// Outcome of offering an event to [`EventHandlers`]
#[derive(Debug, PartialEq, Eq)]
pub enum EventOutcome {
    /// No handler registered for the class
    Unhandled,
    /// All handlers for the class accepted the event
    Handled,
    /// A handler rejected the event
    Failed(PldmCommandError),
}

/// Registry of event handlers, keyed by event class
#[derive(Default, Clone)]
pub struct EventHandlers {
    classes: BTreeMap<u8, Vec<EventHandler>>,
}

impl core::fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventHandlers")
            .field("classes", &self.classes.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl EventHandlers {
    /// Start building a registry
    pub fn builder() -> EventHandlersBuilder {
        EventHandlersBuilder::default()
    }

    /// Whether any handler exists for `class`
    pub fn handles(&self, class: u8) -> bool {
        self.classes.contains_key(&class)
    }

    /// Run every handler registered for `class`.
    ///
    /// All handlers run even if an earlier one fails; the first failure
    /// is reported.
    pub fn handle(&self, ctx: &EventContext, class: u8, data: &[u8]) -> EventOutcome {
        let Some(handlers) = self.classes.get(&class) else {
            return EventOutcome::Unhandled;
        };

        let mut outcome = EventOutcome::Handled;
        for h in handlers {
            if let Err(e) = h(ctx, data) {
                debug!("Event class {class:#04x} handler failed: {e}");
                if outcome == EventOutcome::Handled {
                    outcome = EventOutcome::Failed(e);
                }
            }
        }
        outcome
    }
}

/// Builder for [`EventHandlers`]
#[derive(Default)]
pub struct EventHandlersBuilder {
    classes: BTreeMap<u8, Vec<EventHandler>>,
}

impl EventHandlersBuilder {
    /// Add a handler for `class`. Multiple handlers per class are run in
    /// registration order.
    pub fn handler(mut self, class: u8, h: EventHandler) -> Self {
        self.classes.entry(class).or_default().push(h);
        self
    }

    /// Merge a set of extra handlers, such as OEM event classes
    pub fn merge<I>(mut self, extra: I) -> Self
    where
        I: IntoIterator<Item = (u8, EventHandler)>,
    {
        for (class, h) in extra {
            self = self.handler(class, h);
        }
        self
    }

    /// Register the sensor event and fault record handlers, reporting to
    /// `sink`.
    pub fn standard(self, sink: Arc<dyn EventSink>, names: Arc<SensorNames>) -> Self {
        let s = sink.clone();
        let sensor: EventHandler = Arc::new(move |ctx: &EventContext, data: &[u8]| {
            let (sensor, ev) = SensorEvent::parse(data)?;
            let name = names.get(&sensor.0).map(String::as_str);
            s.sensor_event(ctx, sensor, name, &ev);
            Ok(())
        });

        let fault: EventHandler = Arc::new(move |ctx: &EventContext, data: &[u8]| {
            sink.fault_record(ctx, data).map_err(|e| {
                warn!("Storing fault record failed: {e}");
                PldmCommandError::from(pldm::CCode::ERROR)
            })
        });

        self.handler(event_class::SENSOR, sensor)
            .handler(event_class::OEM_FAULT_RECORD, fault)
    }

    /// Finish the registry
    pub fn build(self) -> EventHandlers {
        EventHandlers {
            classes: self.classes,
        }
    }
}
