//! Application callbacks and the engine capability surface.
//!
//! Six owned slots, fired inline on the reactor thread. Each callback
//! receives an [`Ops`] handle through which it may act on any
//! connection of the same engine — sends and closes buffer immediately,
//! the actual socket traffic happens on the following writable events.
//! Dispatch takes the slot out for the duration of the call, so a
//! callback re-entering the engine can trigger the other callbacks but
//! never itself.

use crate::error::Error;
use crate::frame::OpCode;
use crate::machine::{self, ConnState};
use crate::server::Core;
use crate::slab::ConnId;
use crate::stats::ServerStats;

type OpenFn = Box<dyn FnMut(&mut Ops, ConnId) + Send>;
type MessageFn = Box<dyn FnMut(&mut Ops, ConnId, &[u8], bool) + Send>;
type CloseFn = Box<dyn FnMut(&mut Ops, ConnId, bool) + Send>;
type ErrorFn = Box<dyn FnMut(&mut Ops, ConnId, Error) + Send>;
type SignalFn = Box<dyn FnMut(&mut Ops, ConnId) + Send>;

/// The callback set, held by value at the server.
#[derive(Default)]
pub(crate) struct Callbacks {
    pub(crate) open: Option<OpenFn>,
    pub(crate) message: Option<MessageFn>,
    pub(crate) close: Option<CloseFn>,
    pub(crate) error: Option<ErrorFn>,
    pub(crate) backpressure: Option<SignalFn>,
    pub(crate) drain: Option<SignalFn>,
}

/// What a callback may do while it runs.
pub struct Ops<'a> {
    pub(crate) core: &'a mut Core,
    pub(crate) hooks: &'a mut Callbacks,
}

impl Ops<'_> {
    /// Queue a text frame on an open connection.
    ///
    /// Outside the open state nothing is sent and the state machine's
    /// verdict is returned; a stale handle reports
    /// [`Error::ConnectionClosed`].
    pub fn send(&mut self, id: ConnId, payload: &[u8]) -> Result<(), Error> {
        self.request_send(id, payload, OpCode::Text)
    }

    /// Queue a binary frame on an open connection.
    pub fn send_binary(&mut self, id: ConnId, payload: &[u8]) -> Result<(), Error> {
        self.request_send(id, payload, OpCode::Binary)
    }

    fn request_send(&mut self, id: ConnId, payload: &[u8], opcode: OpCode) -> Result<(), Error> {
        if self.core.slab.get(id).is_none() {
            return Err(Error::ConnectionClosed);
        }
        machine::request_send(self.core, self.hooks, id.slot(), payload, opcode)
    }

    /// Close a connection with the given status code (1000 for a normal
    /// closure).
    pub fn close(&mut self, id: ConnId, code: u16) -> Result<(), Error> {
        if self.core.slab.get(id).is_none() {
            return Err(Error::ConnectionClosed);
        }
        machine::request_close(self.core, self.hooks, id.slot(), code)
    }

    /// Current protocol state; `None` for a stale handle.
    pub fn state(&self, id: ConnId) -> Option<ConnState> {
        self.core.slab.get(id).map(|conn| conn.state)
    }

    /// Most recent error recorded on the connection.
    pub fn last_error(&self, id: ConnId) -> Option<Error> {
        self.core.slab.get(id).and_then(|conn| conn.last_error)
    }

    /// Connections currently owned by the reactor.
    pub fn connection_count(&self) -> usize {
        self.core.slab.len()
    }

    /// The shared statistics block.
    pub fn stats(&self) -> &ServerStats {
        &self.core.stats
    }
}

macro_rules! fire {
    ($slot: ident, $core: expr, $hooks: expr $(, $arg: expr)*) => {
        if let Some(mut cb) = $hooks.$slot.take() {
            cb(
                &mut Ops {
                    core: &mut *$core,
                    hooks: &mut *$hooks,
                },
                $($arg),*
            );
            $hooks.$slot = Some(cb);
        }
    };
}

pub(crate) fn fire_open(core: &mut Core, hooks: &mut Callbacks, id: ConnId) {
    fire!(open, core, hooks, id);
}

pub(crate) fn fire_message(
    core: &mut Core,
    hooks: &mut Callbacks,
    id: ConnId,
    payload: &[u8],
    binary: bool,
) {
    fire!(message, core, hooks, id, payload, binary);
}

pub(crate) fn fire_close(core: &mut Core, hooks: &mut Callbacks, id: ConnId, clean: bool) {
    fire!(close, core, hooks, id, clean);
}

pub(crate) fn fire_error(core: &mut Core, hooks: &mut Callbacks, id: ConnId, error: Error) {
    fire!(error, core, hooks, id, error);
}

pub(crate) fn fire_backpressure(core: &mut Core, hooks: &mut Callbacks, id: ConnId) {
    fire!(backpressure, core, hooks, id);
}

pub(crate) fn fire_drain(core: &mut Core, hooks: &mut Callbacks, id: ConnId) {
    fire!(drain, core, hooks, id);
}
