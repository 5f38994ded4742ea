// SPDX-License-Identifier: MIT OR Apache-2.0
/*
 * Copyright (c) 2025 Code Construct
 */

use std::collections::{HashMap, VecDeque};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use mctp::{Channel, Eid};
use pldm::control::{self, PLDM_TYPE_CONTROL};
use pldm::oem::PLDM_TYPE_OEM;
use pldm::util::decode_bitmap;
use pldm::{CCode, PldmRequest, PldmResponse};
use pldm_platform::events::SensorEvent;
use pldm_platform::proto::{event_class, event_status, Cmd, SensorId};
use pldm_platform::{
    Connector, EventContext, EventHandlers, EventSink, PLDM_TYPE_PLATFORM,
};
use pldmd::{Dispatcher, IpmiHandler, ResponderConfig};

const PEER: Eid = Eid(0x12);

fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Default)]
struct Recorder {
    sensors: Mutex<Vec<(u16, Option<String>, SensorEvent)>>,
    faults: Mutex<Vec<Vec<u8>>>,
}

impl EventSink for Recorder {
    fn sensor_event(
        &self,
        _ctx: &EventContext,
        sensor: SensorId,
        name: Option<&str>,
        event: &SensorEvent,
    ) {
        self.sensors.lock().unwrap().push((
            sensor.0,
            name.map(str::to_string),
            event.clone(),
        ));
    }

    fn fault_record(&self, _ctx: &EventContext, data: &[u8]) -> std::io::Result<()> {
        self.faults.lock().unwrap().push(data.to_vec());
        Ok(())
    }
}

#[derive(Default)]
struct Ipmi {
    calls: Mutex<usize>,
}

impl IpmiHandler for Ipmi {
    fn handle(
        &self,
        _eid: Eid,
        _netfn: u8,
        _cmd: u8,
        _data: &[u8],
    ) -> std::io::Result<Vec<u8>> {
        *self.calls.lock().unwrap() += 1;
        Ok(vec![0x00, 0x42])
    }
}

struct Fixture {
    dispatcher: Dispatcher,
    sink: Arc<Recorder>,
    ipmi: Arc<Ipmi>,
    polls: mpsc::Receiver<()>,
}

fn fixture() -> Fixture {
    init_log();
    let sink = Arc::new(Recorder::default());
    let ipmi = Arc::new(Ipmi::default());

    let mut names = HashMap::new();
    names.insert(0x0010, "CPU0_TEMP".to_string());
    let config = ResponderConfig {
        tid: 7,
        poll_delay: Duration::ZERO,
        sensor_names: Arc::new(names),
        ..Default::default()
    };

    let (tx, polls) = mpsc::channel();
    let tx = Mutex::new(tx);
    let connector: Connector =
        Arc::new(move || -> mctp::Result<Box<dyn Channel + Send>> {
            let _ = tx.lock().unwrap().send(());
            Err(mctp::Error::Unreachable)
        });

    let events = EventHandlers::builder()
        .standard(sink.clone(), config.sensor_names.clone())
        .build();
    let dispatcher =
        Dispatcher::from_config(&config, events, connector, ipmi.clone())
            .unwrap();

    Fixture {
        dispatcher,
        sink,
        ipmi,
        polls,
    }
}

fn request(typ: u8, cmd: u8, data: &[u8]) -> Vec<u8> {
    let mut req = PldmRequest::new_data(typ, cmd, data.to_vec());
    req.iid = 5;
    req.to_buf()
}

fn exchange(f: &Fixture, typ: u8, cmd: u8, data: &[u8]) -> PldmResponse {
    let rsp = f
        .dispatcher
        .dispatch(PEER, &request(typ, cmd, data))
        .expect("no response");
    let rsp = PldmResponse::from_buf(&rsp).unwrap();
    assert_eq!((rsp.iid, rsp.typ, rsp.cmd), (5, typ, cmd));
    rsp
}

fn platform_event(f: &Fixture, class: u8, event: &[u8]) -> PldmResponse {
    let mut data = vec![0x01, 0x03, class];
    data.extend_from_slice(event);
    exchange(f, PLDM_TYPE_PLATFORM, Cmd::PlatformEventMessage as u8, &data)
}

#[test]
fn discovery_matches_handler_sets() {
    let f = fixture();

    let rsp = exchange(&f, PLDM_TYPE_CONTROL, control::Cmd::GetTID as u8, &[]);
    assert_eq!((rsp.cc, rsp.data), (0, vec![7]));

    let rsp =
        exchange(&f, PLDM_TYPE_CONTROL, control::Cmd::GetPLDMTypes as u8, &[]);
    assert_eq!(rsp.cc, 0);
    assert_eq!(rsp.data, [0b0000_0101, 0, 0, 0, 0, 0, 0, 0x80]);

    let mut req = vec![PLDM_TYPE_PLATFORM];
    req.extend_from_slice(&0xf1f2f000u32.to_le_bytes());
    let rsp =
        exchange(&f, PLDM_TYPE_CONTROL, control::Cmd::GetPLDMCommands as u8, &req);
    assert_eq!(rsp.cc, 0);
    assert_eq!(decode_bitmap(&rsp.data), [Cmd::PlatformEventMessage as u8]);

    let mut req = vec![PLDM_TYPE_OEM];
    req.extend_from_slice(&0xf1f0f000u32.to_le_bytes());
    let rsp =
        exchange(&f, PLDM_TYPE_CONTROL, control::Cmd::GetPLDMCommands as u8, &req);
    assert_eq!(rsp.cc, 0);
    assert_eq!(decode_bitmap(&rsp.data), [0x01]);

    let reg = f.dispatcher.registry();
    assert_eq!(reg.version(PLDM_TYPE_PLATFORM), Some(0xf1f2f000));
    assert_eq!(reg.version(PLDM_TYPE_OEM), Some(0xf1f0f000));
}

#[test]
fn unknown_type_is_refused() {
    let f = fixture();
    // firmware update isn't served here
    let rsp = exchange(&f, 0x05, 0x01, &[]);
    assert_eq!(rsp.cc, CCode::ERROR_INVALID_PLDM_TYPE as u8);
    assert!(rsp.data.is_empty());
}

#[test]
fn unknown_command_is_dropped() {
    let f = fixture();
    let d = &f.dispatcher;
    assert!(d
        .dispatch(PEER, &request(PLDM_TYPE_PLATFORM, 0x51, &[]))
        .is_none());
    assert!(d
        .dispatch(PEER, &request(PLDM_TYPE_CONTROL, control::Cmd::SetTID as u8, &[1]))
        .is_none());
    assert!(d.dispatch(PEER, &request(PLDM_TYPE_OEM, 0x40, &[])).is_none());
}

#[test]
fn malformed_messages() {
    let f = fixture();
    let d = &f.dispatcher;

    // short header
    assert!(d.dispatch(PEER, &[0x80, 0x02]).is_none());

    // a response
    let req = PldmRequest::new(PLDM_TYPE_CONTROL, control::Cmd::GetTID as u8);
    assert!(d.dispatch(PEER, &req.response().to_buf()).is_none());

    // handler decode failure gets a completion code
    let rsp = exchange(&f, PLDM_TYPE_PLATFORM, Cmd::PlatformEventMessage as u8, &[1]);
    assert_eq!(rsp.cc, CCode::ERROR_INVALID_LENGTH as u8);
}

#[test]
fn datagram_is_handled_silently() {
    let f = fixture();
    let mut req = PldmRequest::new_data(
        PLDM_TYPE_PLATFORM,
        Cmd::PlatformEventMessage as u8,
        vec![0x01, 0x03, event_class::OEM_FAULT_RECORD, 0xaa],
    );
    req.datagram = true;
    assert!(f.dispatcher.dispatch(PEER, &req.to_buf()).is_none());
    assert_eq!(*f.sink.faults.lock().unwrap(), [vec![0xaa]]);
}

#[test]
fn platform_events() {
    let f = fixture();

    let rsp = platform_event(&f, event_class::HEARTBEAT_TIMER_ELAPSED, &[0x01, 0x3c]);
    assert_eq!((rsp.cc, rsp.data), (0, vec![event_status::NO_LOGGING]));

    // state sensor 0x10, offset 0, state 2 from 1
    let rsp = platform_event(&f, event_class::SENSOR, &[0x10, 0x00, 0x01, 0x00, 0x02, 0x01]);
    assert_eq!((rsp.cc, rsp.data), (0, vec![event_status::NO_LOGGING]));

    // unnamed sensor
    let rsp = platform_event(&f, event_class::SENSOR, &[0x11, 0x00, 0x01, 0x00, 0x02, 0x01]);
    assert_eq!(rsp.cc, 0);

    let sensors = f.sink.sensors.lock().unwrap();
    assert_eq!(sensors.len(), 2);
    assert_eq!(sensors[0].0, 0x10);
    assert_eq!(sensors[0].1.as_deref(), Some("CPU0_TEMP"));
    assert!(matches!(
        &sensors[0].2,
        SensorEvent::State(e) if e.event_state == 2 && e.previous_state == 1
    ));
    assert_eq!(sensors[1].1, None);
    drop(sensors);

    let rsp = platform_event(&f, event_class::OEM_FAULT_RECORD, &[0xde, 0xad]);
    assert_eq!((rsp.cc, rsp.data), (0, vec![event_status::NO_LOGGING]));
    assert_eq!(*f.sink.faults.lock().unwrap(), [vec![0xde, 0xad]]);

    // nothing registered for effecter events
    let rsp = platform_event(&f, event_class::EFFECTER, &[0x01, 0x00]);
    assert_eq!((rsp.cc, rsp.data), (0, vec![event_status::LOGGED]));
}

#[test]
fn message_poll_spawns_worker() {
    let f = fixture();

    let rsp = platform_event(
        &f,
        event_class::MESSAGE_POLL,
        &[0x01, 0x20, 0x00, 0, 0, 0, 0],
    );
    assert_eq!((rsp.cc, rsp.data), (0, vec![event_status::NO_LOGGING]));
    f.polls.recv_timeout(Duration::from_secs(5)).unwrap();

    // unsupported poll event format
    let rsp = platform_event(
        &f,
        event_class::MESSAGE_POLL,
        &[0x02, 0x20, 0x00, 0, 0, 0, 0],
    );
    assert_eq!(rsp.cc, CCode::ERROR_INVALID_DATA as u8);
}

#[test]
fn oem_ipmi_bridge() {
    let f = fixture();

    let rsp = exchange(&f, PLDM_TYPE_OEM, 0x01, &[0x15, 0xa0, 0x00, 0x06, 0x01]);
    assert_eq!(rsp.cc, 0);
    assert_eq!(rsp.data, [0x15, 0xa0, 0x00, 0x06, 0x01, 0x00, 0x42]);

    let rsp = exchange(&f, PLDM_TYPE_OEM, 0x01, &[0x00, 0xa0, 0x15, 0x06, 0x01]);
    assert_eq!(rsp.cc, CCode::ERROR_INVALID_DATA as u8);

    let rsp = exchange(&f, PLDM_TYPE_OEM, 0x01, &[0x15, 0xa0]);
    assert_eq!(rsp.cc, CCode::ERROR_INVALID_DATA as u8);

    assert_eq!(*f.ipmi.calls.lock().unwrap(), 1);
}

/// Channel yielding a fixed sequence of receive results.
struct Scripted {
    rx: VecDeque<mctp::Result<(Eid, Vec<u8>)>>,
    sent: Vec<(Eid, Vec<u8>)>,
}

impl Channel for Scripted {
    fn send(&mut self, eid: Eid, buf: &[u8]) -> mctp::Result<()> {
        self.sent.push((eid, buf.to_vec()));
        Ok(())
    }

    fn recv_from(&mut self) -> mctp::Result<(Eid, Vec<u8>)> {
        self.rx.pop_front().unwrap_or(Err(mctp::Error::TimedOut))
    }
}

#[test]
fn bad_frames_dont_stop_serving() {
    let f = fixture();
    let get_tid = request(PLDM_TYPE_CONTROL, control::Cmd::GetTID as u8, &[]);
    let mut chan = Scripted {
        rx: VecDeque::from([
            // short frame, then a frame with the wrong message type
            Err(mctp::Error::RxFailure),
            Err(mctp::Error::InvalidInput),
            Err(mctp::Error::TimedOut),
            Ok((PEER, get_tid)),
            Err(mctp::Error::Unreachable),
        ]),
        sent: Vec::new(),
    };

    for _ in 0..4 {
        f.dispatcher.serve_one(&mut chan).unwrap();
    }
    assert_eq!(chan.sent.len(), 1);
    let (eid, rsp) = &chan.sent[0];
    assert_eq!(*eid, PEER);
    let rsp = PldmResponse::from_buf(rsp).unwrap();
    assert_eq!((rsp.cc, rsp.data), (0, vec![7]));

    // peer hung up
    assert!(matches!(
        f.dispatcher.serve_one(&mut chan),
        Err(mctp::Error::Unreachable)
    ));
}
