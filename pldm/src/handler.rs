// SPDX-License-Identifier: MIT OR Apache-2.0
/*
 * PLDM responder command tables.
 *
 * Copyright (c) 2025 Code Construct
 */

//! Responder-side command handling.
//!
//! A responder for one PLDM type keeps an immutable [`CommandTable`],
//! mapping command codes to plain functions over the responder's own state.
//! Handlers return the response payload, or a completion code that becomes
//! a completion-code-only response.

use std::collections::BTreeMap;

use deku::DekuError;
use mctp::Eid;

use crate::{CCode, PldmError, PldmRequest, PldmResponse};

/// A completion code returned from a failed command handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PldmCommandError(pub u8);

impl From<CCode> for PldmCommandError {
    fn from(value: CCode) -> Self {
        Self(value as u8)
    }
}

impl From<u8> for PldmCommandError {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl From<DekuError> for PldmCommandError {
    fn from(err: DekuError) -> Self {
        let cc = match err {
            DekuError::Incomplete(_) => CCode::ERROR_INVALID_LENGTH,
            DekuError::Parse(_) => CCode::ERROR_INVALID_DATA,
            _ => CCode::ERROR,
        };
        Self(cc as u8)
    }
}

impl From<PldmError> for PldmCommandError {
    fn from(_: PldmError) -> Self {
        CCode::ERROR.into()
    }
}

impl core::fmt::Display for PldmCommandError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "CC: 0x{:02x}", self.0)
    }
}

/// Result of a command handler: the response payload (after the
/// completion code), or a failure completion code.
pub type CommandResult = core::result::Result<Vec<u8>, PldmCommandError>;

/// A command handler over responder state `S`.
///
/// `eid` is the requesting endpoint.
pub type Handler<S> = fn(&S, &PldmRequest, Eid) -> CommandResult;

/// Immutable mapping of command code to handler.
pub struct CommandTable<S> {
    handlers: BTreeMap<u8, Handler<S>>,
}

impl<S> CommandTable<S> {
    /// Create a table from `(command, handler)` pairs.
    pub fn new(entries: impl IntoIterator<Item = (u8, Handler<S>)>) -> Self {
        Self {
            handlers: entries.into_iter().collect(),
        }
    }

    /// Returns the handler for `cmd`
    pub fn get(&self, cmd: u8) -> Option<Handler<S>> {
        self.handlers.get(&cmd).copied()
    }

    /// Supported command codes, ascending.
    pub fn commands(&self) -> Vec<u8> {
        self.handlers.keys().copied().collect()
    }

    /// Runs the handler for `req`, if there is one.
    pub fn dispatch(
        &self,
        state: &S,
        req: &PldmRequest,
        eid: Eid,
    ) -> Option<CommandResult> {
        self.get(req.cmd).map(|h| h(state, req, eid))
    }
}

impl<S> core::fmt::Debug for CommandTable<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_set().entries(self.handlers.keys()).finish()
    }
}

/// Builds the response for `req` from a handler result.
pub fn complete(req: &PldmRequest, res: CommandResult) -> PldmResponse {
    match res {
        Ok(data) => {
            let mut r = req.response();
            r.set_data(data);
            r
        }
        Err(e) => req.error_response(e.0),
    }
}
