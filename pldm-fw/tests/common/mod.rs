// SPDX-License-Identifier: MIT OR Apache-2.0
/*
 * Copyright (c) 2025 Code Construct
 */

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io::Write;

use mctp::{Channel, Eid};
use pldm::{PldmRequest, PldmResponse};
use pldm_fw::{Cmd, PLDM_TYPE_FW};

pub const DEVICE: Eid = Eid(0x30);

pub const UUID_1_0: &str = "f018878c-cb7d-4943-9800-a02f059aca02";
pub const UUID_1_1: &str = "1244d264-8d7d-4718-a030-fc8a56587d5a";
pub const UUID_1_2: &str = "3119ce2f-e80a-4a99-af6d-46f8b121f6bf";

pub fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub struct TestComponent {
    pub identifier: u16,
    pub image: Vec<u8>,
    pub version: &'static str,
}

fn push_str(v: &mut Vec<u8>, s: &str) {
    v.push(0x01);
    v.push(s.len() as u8);
    v.extend_from_slice(s.as_bytes());
}

/// Builds a package image with one firmware device record selecting every
/// component.
pub fn build_package(uuid: &str, comps: &[TestComponent]) -> Vec<u8> {
    let uuid = uuid::Uuid::parse_str(uuid).unwrap();
    let v11 = uuid != uuid::Uuid::parse_str(UUID_1_0).unwrap();
    let v12 = uuid == uuid::Uuid::parse_str(UUID_1_2).unwrap();
    let bitmap_bits: u16 = 8;

    // device record
    let mut rec_body = vec![];
    let mut bitmap = 0u8;
    for i in 0..comps.len() {
        bitmap |= 1 << i;
    }
    rec_body.push(bitmap);
    rec_body.extend_from_slice(b"set-1.0");
    // iana descriptor
    rec_body.extend_from_slice(&[0x01, 0x00, 0x04, 0x00]);
    rec_body.extend_from_slice(&40981u32.to_le_bytes());

    let mut rec = vec![];
    rec.extend_from_slice(&(11 + rec_body.len() as u16).to_le_bytes());
    rec.push(1); // descriptor count
    rec.extend_from_slice(&0u32.to_le_bytes());
    rec.push(0x01);
    rec.push(7); // "set-1.0"
    rec.extend_from_slice(&0u16.to_le_bytes());
    rec.extend_from_slice(&rec_body);

    let comp_entry_len = |c: &TestComponent| {
        22 + c.version.len() + if v12 { 4 + 2 } else { 0 }
    };

    let mut hdr_len = 16 + 1 + 2 + 13 + 2 + 2 + "pkg-1".len();
    hdr_len += 1 + rec.len();
    if v11 {
        hdr_len += 1;
    }
    hdr_len += 2 + comps.iter().map(comp_entry_len).sum::<usize>();
    hdr_len += 4; // checksum

    let mut v = vec![];
    v.extend_from_slice(uuid.as_bytes());
    v.push(if v12 { 3 } else if v11 { 2 } else { 1 });
    v.extend_from_slice(&(hdr_len as u16).to_le_bytes());
    v.extend_from_slice(&[0u8; 13]);
    v.extend_from_slice(&bitmap_bits.to_le_bytes());
    push_str(&mut v, "pkg-1");
    v.push(1);
    v.extend_from_slice(&rec);
    if v11 {
        v.push(0); // downstream devices
    }
    v.extend_from_slice(&(comps.len() as u16).to_le_bytes());

    let mut offset = hdr_len;
    for c in comps {
        v.extend_from_slice(&0x000au16.to_le_bytes());
        v.extend_from_slice(&c.identifier.to_le_bytes());
        v.extend_from_slice(&0x100u32.to_le_bytes());
        v.extend_from_slice(&0u16.to_le_bytes());
        v.extend_from_slice(&0x0002u16.to_le_bytes());
        v.extend_from_slice(&(offset as u32).to_le_bytes());
        v.extend_from_slice(&(c.image.len() as u32).to_le_bytes());
        push_str(&mut v, c.version);
        if v12 {
            v.extend_from_slice(&2u32.to_le_bytes());
            v.extend_from_slice(&[0xde, 0xad]);
        }
        offset += c.image.len();
    }
    v.extend_from_slice(&0u32.to_le_bytes());
    assert_eq!(v.len(), hdr_len);

    for c in comps {
        v.extend_from_slice(&c.image);
    }
    v
}

pub fn package_file(bytes: &[u8]) -> tempfile::NamedTempFile {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    f.write_all(bytes).unwrap();
    f.flush().unwrap();
    f
}

pub fn open_package(bytes: &[u8]) -> pldm_fw::pkg::Package {
    let f = package_file(bytes);
    pldm_fw::pkg::Package::parse(f.reopen().unwrap()).unwrap()
}

pub fn two_components() -> Vec<TestComponent> {
    vec![
        TestComponent {
            identifier: 0x1001,
            image: (0..100u8).collect(),
            version: "a-1",
        },
        TestComponent {
            identifier: 0x1002,
            image: vec![0x55; 40],
            version: "b-1",
        },
    ]
}

/// Request the device makes of the update agent
pub fn rfd(offset: u32, len: u32) -> (Cmd, Vec<u8>) {
    let mut d = offset.to_le_bytes().to_vec();
    d.extend_from_slice(&len.to_le_bytes());
    (Cmd::RequestFirmwareData, d)
}

/// A firmware device that answers agent requests successfully (unless
/// told otherwise), then plays a script of its own requests once every
/// component has been offered with UpdateComponent.
pub struct Device {
    /// Commands of agent requests, in order
    pub requests: Vec<PldmRequest>,
    /// Agent responses to scripted device requests
    pub responses: Vec<PldmResponse>,
    /// Completion code overrides, by command
    pub fail: HashMap<u8, u8>,
    /// State reported by GetStatus
    pub state: u8,
    components: usize,
    update_components: usize,
    script: VecDeque<(Cmd, Vec<u8>)>,
    rx: VecDeque<Vec<u8>>,
    iid: u8,
}

impl Device {
    pub fn new(components: usize, script: Vec<(Cmd, Vec<u8>)>) -> Self {
        Self {
            requests: vec![],
            responses: vec![],
            fail: HashMap::new(),
            state: 0,
            components,
            update_components: 0,
            script: script.into(),
            rx: VecDeque::new(),
            iid: 0,
        }
    }

    pub fn commands(&self) -> Vec<u8> {
        self.requests.iter().map(|r| r.cmd).collect()
    }

    fn next_script(&mut self) {
        if let Some((cmd, data)) = self.script.pop_front() {
            let mut req = PldmRequest::new_data(PLDM_TYPE_FW, cmd as u8, data);
            req.iid = self.iid;
            self.iid = (self.iid + 1) & 0x1f;
            self.rx.push_back(req.to_buf());
        }
    }

    fn answer(&mut self, req: &PldmRequest) -> PldmResponse {
        if let Some(cc) = self.fail.get(&req.cmd) {
            return req.error_response(*cc);
        }
        let data = match req.cmd {
            c if c == Cmd::GetStatus as u8 => {
                vec![self.state, 0, 0, 0, 0, 0, 0, 0, 0, 0]
            }
            c if c == Cmd::RequestUpdate as u8 => vec![0, 0, 0],
            c if c == Cmd::PassComponentTable as u8 => vec![0, 0],
            c if c == Cmd::UpdateComponent as u8 => vec![0; 8],
            c if c == Cmd::ActivateFirmware as u8 => vec![5, 0],
            c if c == Cmd::CancelUpdate as u8 => vec![0; 9],
            _ => return req.error_response(0x05),
        };
        let mut rsp = req.response();
        rsp.set_data(data);
        rsp
    }
}

impl Channel for Device {
    fn send(&mut self, eid: Eid, buf: &[u8]) -> mctp::Result<()> {
        assert_eq!(eid, DEVICE);
        if let Ok(req) = PldmRequest::from_buf(buf) {
            assert_eq!(req.typ, PLDM_TYPE_FW);
            let rsp = self.answer(&req);
            self.rx.push_back(rsp.to_buf());
            let start = req.cmd == Cmd::UpdateComponent as u8 && rsp.cc == 0;
            self.requests.push(req);
            if start {
                self.update_components += 1;
                if self.update_components == self.components {
                    self.next_script();
                }
            }
        } else {
            let rsp = PldmResponse::from_buf(buf).unwrap();
            self.responses.push(rsp);
            self.next_script();
        }
        Ok(())
    }

    fn recv_from(&mut self) -> mctp::Result<(Eid, Vec<u8>)> {
        let buf = self.rx.pop_front().ok_or(mctp::Error::TimedOut)?;
        Ok((DEVICE, buf))
    }
}
