// SPDX-License-Identifier: MIT OR Apache-2.0
/*
 * PLDM firmware update agent.
 *
 * Copyright (c) 2023 Code Construct
 */

//! PLDM Firmware Update Agent
//!
//! [`run_update`] drives one firmware device through an update over an
//! open channel:
//!
//! 1. RequestUpdate
//! 2. PassComponentTable for each component
//! 3. UpdateComponent for each component
//! 4. serve device requests (RequestFirmwareData, TransferComplete,
//!    VerifyComplete, ApplyComplete) until ApplyComplete
//! 5. ActivateFirmware
//!
//! Any failure after RequestUpdate has been attempted results in a
//! CancelUpdate.

use std::path::Path;

#[allow(unused)]
use log::{debug, error, info, trace, warn};

use thiserror::Error;

use nom::{
    number::complete::{le_u16, le_u32, le_u8},
    sequence::tuple,
    IResult,
};
use num_traits::FromPrimitive;

use mctp::{Channel, Eid};
use mctp_mux::{MuxKind, MuxSocket};
use pldm::{PldmError, PldmRequest, PldmResponse, TransferFlag};

use crate::pkg;
use crate::{
    fw_codes, Cmd, GetStatusResponse, PldmFDState, RequestUpdateResponse,
    UpdateTransferProgress, BASELINE_TRANSFER_SIZE, MAX_TRANSFER_SIZE,
    PLDM_TYPE_FW,
};

/// Update agent result type
pub type Result<T> = core::result::Result<T, PldmUpdateError>;

/// Update failure
#[derive(Error, Debug)]
pub enum PldmUpdateError {
    /// PLDM messaging or transport failure
    #[error("PLDM error: {0}")]
    Pldm(#[from] PldmError),
    /// Malformed message from the device
    #[error("PLDM protocol error: {0}")]
    Protocol(String),
    /// The device answered a command with a failure completion code
    #[error("PLDM command (0x{0:02x}) failed with 0x{1:02x}")]
    Command(u8, u8),
    /// The device reported an update failure
    #[error("PLDM Update error: {0}")]
    Update(String),
    /// The package could not be read
    #[error("PLDM Package error: {0}")]
    Package(#[from] pkg::PldmPackageError),
}

impl PldmUpdateError {
    fn new_command(cmd: Cmd, cc: u8) -> Self {
        Self::Command(cmd as u8, cc)
    }

    fn new_proto(desc: String) -> Self {
        Self::Protocol(desc)
    }

    fn new_update(desc: String) -> Self {
        Self::Update(desc)
    }
}

impl From<mctp::Error> for PldmUpdateError {
    fn from(e: mctp::Error) -> Self {
        Self::Pldm(e.into())
    }
}

/// Update behaviour options
#[derive(Debug, Clone)]
pub struct UpdateOptions {
    /// ComponentClassificationIndex to send. Defaults to the component's
    /// position in the update.
    pub classification_index: Option<u8>,
    /// Only update the component with this identifier
    pub component: Option<u16>,
    /// Query the device state first, cancelling any update in progress
    pub reset_stale_session: bool,
    /// Request activation of self-contained components
    pub self_contained_activation: bool,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            classification_index: None,
            component: None,
            reset_stale_session: true,
            self_contained_activation: false,
        }
    }
}

/// A component taking part in the update
#[derive(Debug, Clone, Copy)]
struct Selected<'a> {
    /// index in the package
    pkg_index: usize,
    classification_index: u8,
    comp: &'a pkg::PackageComponent,
}

fn select_components<'a>(
    package: &'a pkg::Package,
    opts: &UpdateOptions,
) -> Result<Vec<Selected<'a>>> {
    let sel = package
        .components
        .iter()
        .enumerate()
        .filter(|(_, c)| opts.component.map_or(true, |id| c.identifier == id))
        .enumerate()
        .map(|(n, (pkg_index, comp))| Selected {
            pkg_index,
            classification_index: opts
                .classification_index
                .unwrap_or(n.min(u8::MAX as usize) as u8),
            comp,
        })
        .collect::<Vec<_>>();

    if sel.is_empty() {
        return Err(PldmUpdateError::new_update(match opts.component {
            Some(id) => format!("no component with identifier {id:#06x}"),
            None => "package has no components".into(),
        }));
    }
    Ok(sel)
}

/// Send a firmware update request, failing on a non-zero completion code
fn fw_xfer(
    chan: &mut impl Channel,
    eid: Eid,
    cmd: Cmd,
    data: Vec<u8>,
) -> Result<PldmResponse> {
    let req = PldmRequest::new_data(PLDM_TYPE_FW, cmd as u8, data);
    let rsp = pldm::pldm_xfer(chan, eid, &req)?;

    if rsp.cc != 0 {
        return Err(PldmUpdateError::new_command(cmd, rsp.cc));
    }
    Ok(rsp)
}

/// Query the device's update state
pub fn get_status(chan: &mut impl Channel, eid: Eid) -> Result<GetStatusResponse> {
    let rsp = fw_xfer(chan, eid, Cmd::GetStatus, vec![])?;
    let (_, res) = GetStatusResponse::parse(&rsp.data).map_err(|_e| {
        PldmUpdateError::new_proto("can't parse Get Status response".into())
    })?;
    Ok(res)
}

/// Abandon any update in progress on the device
pub fn cancel_update(chan: &mut impl Channel, eid: Eid) -> Result<()> {
    let rsp = fw_xfer(chan, eid, Cmd::CancelUpdate, vec![])?;
    debug!("cancel rsp: data {:02x?}", rsp.data);
    Ok(())
}

fn reset_stale_session(chan: &mut impl Channel, eid: Eid) {
    match get_status(chan, eid) {
        Ok(st) => {
            debug!("device state {st}");
            if !matches!(st.current_state, PldmFDState::Idle | PldmFDState::Apply)
            {
                info!("Device in {:?} state, cancelling", st.current_state);
                if let Err(e) = cancel_update(chan, eid) {
                    warn!("Failed to reset update state: {e}");
                }
            }
        }
        Err(e) => warn!("Failed to get device status: {e}"),
    }
}

/// Enter update mode
pub fn request_update(
    chan: &mut impl Channel,
    eid: Eid,
    package: &pkg::Package,
    num_components: usize,
) -> Result<RequestUpdateResponse> {
    let mut data = vec![];
    data.extend_from_slice(&MAX_TRANSFER_SIZE.to_le_bytes());
    data.extend_from_slice(&(num_components as u16).to_le_bytes());
    data.push(1); // MaximumOutstandingTransferRequests
    data.extend_from_slice(&0u16.to_le_bytes()); // PackageDataLength
    package.image_set_version().write_utf8_bytes(&mut data);

    let rsp = fw_xfer(chan, eid, Cmd::RequestUpdate, data)?;

    let (_, res) = RequestUpdateResponse::parse(&rsp.data).map_err(|_e| {
        PldmUpdateError::new_proto("can't parse RU response".into())
    })?;
    if res.fd_will_sent_gpd != 0 {
        warn!("Device expects package data, none available");
    }
    Ok(res)
}

// Fields common to PassComponentTable and UpdateComponent
fn component_fields(sel: &Selected, data: &mut Vec<u8>) {
    let c = u16::from(&sel.comp.classification);
    data.extend_from_slice(&c.to_le_bytes());
    data.extend_from_slice(&sel.comp.identifier.to_le_bytes());
    data.push(sel.classification_index);
    data.extend_from_slice(&sel.comp.comparison_stamp.to_le_bytes());
}

fn pass_component_table(
    chan: &mut impl Channel,
    eid: Eid,
    sel: &Selected,
    flag: TransferFlag,
) -> Result<()> {
    let mut data = vec![flag as u8];
    component_fields(sel, &mut data);
    sel.comp.version.write_utf8_bytes(&mut data);

    let rsp = fw_xfer(chan, eid, Cmd::PassComponentTable, data)?;

    let [resp, code, ..] = rsp.data[..] else {
        return Err(PldmUpdateError::new_proto("Invalid PCT response".into()));
    };

    if resp != 0 {
        return Err(PldmUpdateError::new_update(format!(
            "component {} not updateable, code {code:#04x}",
            sel.pkg_index
        )));
    }
    Ok(())
}

fn update_component(chan: &mut impl Channel, eid: Eid, sel: &Selected) -> Result<()> {
    let mut data = vec![];
    component_fields(sel, &mut data);
    data.extend_from_slice(&(sel.comp.file_size as u32).to_le_bytes());
    // UpdateOptionFlags: no forced update
    data.extend_from_slice(&0u32.to_le_bytes());
    sel.comp.version.write_utf8_bytes(&mut data);

    let rsp = fw_xfer(chan, eid, Cmd::UpdateComponent, data)?;

    let r: IResult<_, _> = tuple((le_u8, le_u8, le_u32, le_u16))(&rsp.data[..]);
    let (_, (compat, code, _flags, _delay)) = r.map_err(|_e| {
        PldmUpdateError::new_proto("can't parse UpdateComponent response".into())
    })?;

    if compat != 0 {
        return Err(PldmUpdateError::new_update(format!(
            "component {} rejected, code {code:#04x}",
            sel.pkg_index
        )));
    }
    Ok(())
}

/// Activate the updated firmware
pub fn activate_firmware(
    chan: &mut impl Channel,
    eid: Eid,
    self_contained: bool,
) -> Result<()> {
    let data = vec![self_contained as u8];
    let rsp = fw_xfer(chan, eid, Cmd::ActivateFirmware, data)?;
    if let Ok((_, t)) = le_u16::<_, nom::error::Error<_>>(&rsp.data[..]) {
        info!("Activation expected to take {t} seconds");
    }
    Ok(())
}

// Serves device-initiated requests during the transfer phase.
struct Transfer<'a, C, F> {
    chan: &'a mut C,
    eid: Eid,
    package: &'a pkg::Package,
    comps: &'a [Selected<'a>],
    cur: usize,
    done: u64,
    start: chrono::DateTime<chrono::Utc>,
    progress: F,
}

impl<'a, C, F> Transfer<'a, C, F>
where
    C: Channel,
    F: FnMut(&UpdateTransferProgress),
{
    fn current(&self) -> Selected<'a> {
        // comps is never empty
        self.comps[self.cur.min(self.comps.len() - 1)]
    }

    /// Runs until ApplyComplete. Ok if it was successful.
    fn run(&mut self) -> Result<()> {
        loop {
            let req = pldm::pldm_rx_req_from(&mut *self.chan, self.eid)?;

            let cmd = if req.typ == PLDM_TYPE_FW {
                Cmd::from_u8(req.cmd)
            } else {
                None
            };

            match cmd {
                Some(Cmd::RequestFirmwareData) => self.request_fw_data(&req)?,
                Some(Cmd::TransferComplete) => {
                    let res = self.complete_result(&req)?;
                    if res != 0 {
                        return Err(PldmUpdateError::new_update(format!(
                            "firmware transfer error: 0x{res:02x}"
                        )));
                    }
                    self.report(None, true);
                    self.cur += 1;
                    self.done = 0;
                    self.start = chrono::Utc::now();
                }
                Some(Cmd::VerifyComplete) => {
                    let res = self.complete_result(&req)?;
                    if res != 0 {
                        return Err(PldmUpdateError::new_update(format!(
                            "firmware verify failure: 0x{res:02x}"
                        )));
                    }
                    debug!("verify complete");
                }
                Some(Cmd::ApplyComplete) => {
                    let res = self.complete_result(&req)?;
                    // 0x01: success with modified activation method
                    if res > 0x01 {
                        return Err(PldmUpdateError::new_update(format!(
                            "firmware apply failure: 0x{res:02x}"
                        )));
                    }
                    debug!("apply complete");
                    return Ok(());
                }
                _ => {
                    error!(
                        "Unexpected command during update: type {:#04x} cmd {:#04x}",
                        req.typ, req.cmd
                    );
                    return Err(PldmUpdateError::new_proto(format!(
                        "unexpected command 0x{:02x} during update",
                        req.cmd
                    )));
                }
            }
        }
    }

    // Acknowledges a *Complete request, returning its result byte
    fn complete_result(&mut self, req: &PldmRequest) -> Result<u8> {
        let Some(&res) = req.data.first() else {
            return Err(PldmUpdateError::new_proto(format!(
                "short request for command 0x{:02x}",
                req.cmd
            )));
        };
        pldm::pldm_tx_resp(&mut *self.chan, self.eid, &req.response())?;
        Ok(res)
    }

    fn request_fw_data(&mut self, req: &PldmRequest) -> Result<()> {
        let r: IResult<_, _> = tuple((le_u32, le_u32))(&req.data[..]);
        let (_, (offset, len)) = r.map_err(|_e| {
            PldmUpdateError::new_proto("RFD parse error".into())
        })?;

        let sel = self.current();
        let limit = sel.comp.file_size as u64 + BASELINE_TRANSFER_SIZE as u64;

        let rsp = if !(BASELINE_TRANSFER_SIZE..=MAX_TRANSFER_SIZE).contains(&len)
        {
            warn!("RequestFirmwareData length {len} out of range");
            req.error_response(fw_codes::INVALID_TRANSFER_LENGTH)
        } else if offset as u64 + len as u64 > limit {
            warn!("RequestFirmwareData offset {offset:#x} + {len} beyond image");
            req.error_response(fw_codes::DATA_OUT_OF_RANGE)
        } else {
            let mut buf = vec![0u8; len as usize];
            self.package.read_component(sel.comp, offset, &mut buf)?;
            let mut rsp = req.response();
            rsp.set_data(buf);
            rsp
        };

        pldm::pldm_tx_resp(&mut *self.chan, self.eid, &rsp)?;

        if rsp.cc == 0 {
            self.done += len as u64;
            self.report(Some((offset, len)), false);
        }
        Ok(())
    }

    fn report(&mut self, cur_xfer: Option<(u32, u32)>, complete: bool) {
        let sel = self.current();
        let size = sel.comp.file_size as u64;
        let elapsed = chrono::Utc::now() - self.start;

        // blocks may be repeated
        let done = self.done.min(size);
        let percent = if complete || size == 0 {
            100
        } else {
            (100 * done / size) as u8
        };

        let secs = elapsed.num_milliseconds() as f32 / 1000.0;
        let bps = if secs > 0.0 { self.done as f32 / secs } else { 0.0 };
        let remaining = if complete || bps <= 0.0 {
            chrono::Duration::zero()
        } else {
            chrono::Duration::milliseconds(
                ((size - done) as f32 / bps * 1000.0) as i64,
            )
        };

        let u = UpdateTransferProgress {
            component: sel.pkg_index,
            cur_xfer,
            percent,
            bps,
            duration: elapsed,
            remaining,
            complete,
        };
        (self.progress)(&u);
    }
}

fn update_sequence<F>(
    chan: &mut impl Channel,
    eid: Eid,
    package: &pkg::Package,
    comps: &[Selected],
    opts: &UpdateOptions,
    progress: F,
) -> Result<()>
where
    F: FnMut(&UpdateTransferProgress),
{
    let ru = request_update(chan, eid, package, comps.len())?;
    debug!("RequestUpdate: metadata len {}", ru.fd_metadata_len);

    for (n, sel) in comps.iter().enumerate() {
        pass_component_table(
            chan,
            eid,
            sel,
            TransferFlag::for_index(n, comps.len()),
        )?;
    }
    info!("Passed {} components", comps.len());

    for sel in comps {
        update_component(chan, eid, sel)?;
    }

    Transfer {
        chan: &mut *chan,
        eid,
        package,
        comps,
        cur: 0,
        done: 0,
        start: chrono::Utc::now(),
        progress,
    }
    .run()?;

    activate_firmware(chan, eid, opts.self_contained_activation)?;
    info!("Firmware activated");
    Ok(())
}

/// Update a device from `package` over an open channel.
///
/// Progress is reported through `progress` during component transfer.
/// On failure after the update has started, CancelUpdate is sent; the
/// original error is returned whatever the outcome of the cancel.
pub fn run_update<F>(
    chan: &mut impl Channel,
    eid: Eid,
    package: &pkg::Package,
    opts: &UpdateOptions,
    progress: F,
) -> Result<()>
where
    F: FnMut(&UpdateTransferProgress),
{
    let comps = select_components(package, opts)?;

    if opts.reset_stale_session {
        reset_stale_session(chan, eid);
    }

    let res = update_sequence(chan, eid, package, &comps, opts, progress);
    if let Err(e) = &res {
        error!("Update failed: {e}");
        match cancel_update(chan, eid) {
            Ok(()) => info!("Update cancelled"),
            Err(ce) => warn!("CancelUpdate failed: {ce}"),
        }
    }
    res
}

/// Update the device `eid` on `bus` from the package file at `path`.
///
/// Opens the firmware update mux for `bus`. The connection and package
/// are released on return.
pub fn update<F>(
    bus: u8,
    eid: Eid,
    path: &Path,
    opts: &UpdateOptions,
    progress: F,
) -> Result<()>
where
    F: FnMut(&UpdateTransferProgress),
{
    let file = std::fs::File::open(path).map_err(pkg::PldmPackageError::from)?;
    let package = pkg::Package::parse(file)?;
    let mut chan = MuxSocket::connect(MuxKind::FirmwareUpdate, bus)?;
    run_update(&mut chan, eid, &package, opts, progress)
}
