//! Protocol state machine.
//!
//! Each connection state is a static table of three plain function
//! pointers — data-received, send-request, close-request — over the
//! engine core. Dispatch indexes the table with the connection's state
//! tag, so there is no allocation and no indirect-call hierarchy behind
//! a transition: changing state is writing the tag.
//!
//! Transition side effects: entering `Open` fires `on_open`; entering
//! `Closing` stamps the closing clock; entering `Closed` shuts the
//! socket down and fires `on_close` (only for connections that actually
//! reached `Open`, and exactly once — `Closed` is sticky).

use std::time::Instant;

use log::debug;

use crate::callback::{self, Callbacks};
use crate::conn::FRAME_SCRATCH;
use crate::error::Error;
use crate::frame::{mask, FrameHead, Mask, OpCode};
use crate::server::Core;
use crate::stats::ServerStats;

/// Connection protocol state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Waiting for the http upgrade request.
    Handshaking = 0,
    /// Websocket established.
    Open = 1,
    /// Close frame sent, draining until the peer's close frame.
    Closing = 2,
    /// Terminal.
    Closed = 3,
}

type DataFn = fn(&mut Core, &mut Callbacks, usize) -> Result<(), Error>;
type SendFn = fn(&mut Core, &mut Callbacks, usize, &[u8], OpCode) -> Result<(), Error>;
type CloseFn = fn(&mut Core, &mut Callbacks, usize, u16) -> Result<(), Error>;

struct StateTable {
    data_received: DataFn,
    send_request: SendFn,
    close_request: CloseFn,
}

/// Indexed by `ConnState as usize`.
static TABLES: [StateTable; 4] = [
    // Handshaking
    StateTable {
        data_received: handshaking_data,
        send_request: reject_send_invalid,
        close_request: handshaking_close,
    },
    // Open
    StateTable {
        data_received: open_data,
        send_request: open_send,
        close_request: open_close,
    },
    // Closing
    StateTable {
        data_received: closing_data,
        send_request: reject_send_invalid,
        close_request: closing_close,
    },
    // Closed
    StateTable {
        data_received: closed_data,
        send_request: closed_send,
        close_request: closed_close,
    },
];

macro_rules! conn_at {
    ($core: expr, $slot: expr) => {
        match $core.slab.slot_mut($slot) {
            Some(conn) => conn,
            None => return Err(Error::Internal),
        }
    };
}

// ============================================================================
// Reactor entry points
// ============================================================================

/// Read path: gathered read into the receive ring, then the current
/// state's data-received handler.
pub(crate) fn service_read(
    core: &mut Core,
    hooks: &mut Callbacks,
    slot: usize,
) -> Result<(), Error> {
    let n = conn_at!(core, slot).fill()?;
    if n == 0 {
        // would-block, retry next iteration
        return Ok(());
    }
    ServerStats::add(&core.stats.bytes_in, n as u64);
    dispatch_data(core, hooks, slot)
}

/// Write path: drain the transmit ring, then evaluate the low
/// watermark.
pub(crate) fn service_write(
    core: &mut Core,
    hooks: &mut Callbacks,
    slot: usize,
) -> Result<(), Error> {
    let gathered = core.cfg.gathered_write;
    let conn = conn_at!(core, slot);
    if !conn.has_pending_tx() {
        return Ok(());
    }

    let n = conn.flush(gathered)?;
    if n > 0 {
        ServerStats::add(&core.stats.bytes_out, n as u64);
        check_low_watermark(core, hooks, slot);
    }
    Ok(())
}

/// Dispatch new buffered bytes to the current state.
pub(crate) fn dispatch_data(
    core: &mut Core,
    hooks: &mut Callbacks,
    slot: usize,
) -> Result<(), Error> {
    let state = conn_at!(core, slot).state;
    (TABLES[state as usize].data_received)(core, hooks, slot)
}

/// Application send request against the current state.
pub(crate) fn request_send(
    core: &mut Core,
    hooks: &mut Callbacks,
    slot: usize,
    payload: &[u8],
    opcode: OpCode,
) -> Result<(), Error> {
    let state = conn_at!(core, slot).state;
    (TABLES[state as usize].send_request)(core, hooks, slot, payload, opcode)
}

/// Application close request against the current state.
pub(crate) fn request_close(
    core: &mut Core,
    hooks: &mut Callbacks,
    slot: usize,
    code: u16,
) -> Result<(), Error> {
    let state = conn_at!(core, slot).state;
    (TABLES[state as usize].close_request)(core, hooks, slot, code)
}

/// Swap the state tag and apply the transition side effects.
pub(crate) fn transition(
    core: &mut Core,
    hooks: &mut Callbacks,
    slot: usize,
    to: ConnState,
    clean: bool,
) {
    enum Effect {
        None,
        Open,
        Close,
    }

    let (effect, id) = {
        let Some(conn) = core.slab.slot_mut(slot) else {
            return;
        };
        if conn.state == ConnState::Closed {
            return;
        }
        conn.state = to;

        let effect = match to {
            ConnState::Handshaking => Effect::None,
            ConnState::Open => {
                conn.opened = true;
                debug!("#{}: open", conn.serial());
                Effect::Open
            }
            ConnState::Closing => {
                conn.entered_closing = Some(Instant::now());
                Effect::None
            }
            ConnState::Closed => {
                conn.shutdown();
                debug!("#{}: closed (clean: {})", conn.serial(), clean);
                if conn.opened {
                    Effect::Close
                } else {
                    Effect::None
                }
            }
        };
        (effect, conn.id())
    };

    match effect {
        Effect::Open => callback::fire_open(core, hooks, id),
        Effect::Close => callback::fire_close(core, hooks, id, clean),
        Effect::None => {}
    }
}

// ============================================================================
// Watermark protocol
// ============================================================================

/// After a push: pause and fire `on_backpressure` when occupancy rises
/// above the high mark.
pub(crate) fn check_high_watermark(core: &mut Core, hooks: &mut Callbacks, slot: usize) {
    let high = core.cfg.high_watermark;
    let tripped = {
        let Some(conn) = core.slab.slot_mut(slot) else {
            return;
        };
        if !conn.write_paused && conn.tx.len() > high {
            conn.write_paused = true;
            Some(conn.id())
        } else {
            None
        }
    };
    if let Some(id) = tripped {
        callback::fire_backpressure(core, hooks, id);
    }
}

/// After a drain: release and fire `on_drain` when occupancy falls
/// below the low mark.
pub(crate) fn check_low_watermark(core: &mut Core, hooks: &mut Callbacks, slot: usize) {
    let low = core.cfg.low_watermark;
    let released = {
        let Some(conn) = core.slab.slot_mut(slot) else {
            return;
        };
        if conn.write_paused && conn.tx.len() < low {
            conn.write_paused = false;
            Some(conn.id())
        } else {
            None
        }
    };
    if let Some(id) = released {
        callback::fire_drain(core, hooks, id);
    }
}

// ============================================================================
// Handshaking
// ============================================================================

fn handshaking_data(core: &mut Core, hooks: &mut Callbacks, slot: usize) -> Result<(), Error> {
    let done = conn_at!(core, slot).handshake_step()?;
    if done {
        transition(core, hooks, slot, ConnState::Open, true);
    }
    Ok(())
}

fn handshaking_close(
    core: &mut Core,
    hooks: &mut Callbacks,
    slot: usize,
    _code: u16,
) -> Result<(), Error> {
    transition(core, hooks, slot, ConnState::Closed, false);
    Ok(())
}

// ============================================================================
// Open
// ============================================================================

fn open_data(core: &mut Core, hooks: &mut Callbacks, slot: usize) -> Result<(), Error> {
    loop {
        let mut scratch = [0_u8; FRAME_SCRATCH];
        let (len, id) = {
            let conn = conn_at!(core, slot);
            (conn.rx.peek(&mut scratch), conn.id())
        };
        if len == 0 {
            return Ok(());
        }

        let Some((head, head_len)) = FrameHead::decode(&scratch[..len])? else {
            // incomplete head, wait for more
            return Ok(());
        };

        // a frame that can never fit the scratch is unsupported
        if head.length > (FRAME_SCRATCH - head_len) as u64 {
            return Err(Error::FrameParse);
        }
        let total = head_len + head.length as usize;
        if len < total {
            // incomplete payload, wait for more
            return Ok(());
        }

        let payload = &mut scratch[head_len..total];
        if let Mask::Key(key) = head.mask {
            mask::apply_mask_wide(key, payload);
        }

        match head.opcode {
            OpCode::Text | OpCode::Binary => {
                ServerStats::add(&core.stats.messages_in, 1);
                let binary = head.opcode == OpCode::Binary;
                callback::fire_message(core, hooks, id, payload, binary);
            }
            OpCode::Close => {
                transition(core, hooks, slot, ConnState::Closed, false);
                return Ok(());
            }
            OpCode::Ping => {
                if conn_at!(core, slot).write_frame(OpCode::Pong, payload).is_err() {
                    ServerStats::add(&core.stats.buffer_overflows, 1);
                }
                check_high_watermark(core, hooks, slot);
            }
            OpCode::Pong | OpCode::Continue => {}
        }

        let conn = conn_at!(core, slot);
        conn.rx.advance(total);
        if conn.state != ConnState::Open {
            // a callback started the close sequence; the remaining
            // bytes belong to the next state's handler
            return Ok(());
        }
    }
}

fn open_send(
    core: &mut Core,
    hooks: &mut Callbacks,
    slot: usize,
    payload: &[u8],
    opcode: OpCode,
) -> Result<(), Error> {
    // overflow is logged at the push site and never escapes
    match conn_at!(core, slot).write_frame(opcode, payload) {
        Ok(()) => ServerStats::add(&core.stats.messages_out, 1),
        Err(_) => ServerStats::add(&core.stats.buffer_overflows, 1),
    }
    check_high_watermark(core, hooks, slot);
    Ok(())
}

fn open_close(
    core: &mut Core,
    hooks: &mut Callbacks,
    slot: usize,
    code: u16,
) -> Result<(), Error> {
    if conn_at!(core, slot).write_close_frame(code).is_err() {
        ServerStats::add(&core.stats.buffer_overflows, 1);
    }
    check_high_watermark(core, hooks, slot);
    transition(core, hooks, slot, ConnState::Closing, true);
    Ok(())
}

// ============================================================================
// Closing
// ============================================================================

fn closing_data(core: &mut Core, hooks: &mut Callbacks, slot: usize) -> Result<(), Error> {
    let mut scratch = [0_u8; 1024];
    let len = conn_at!(core, slot).rx.peek(&mut scratch);
    if len == 0 {
        return Ok(());
    }

    if let Some((head, _)) = FrameHead::decode(&scratch[..len])? {
        if head.opcode == OpCode::Close {
            // close handshake complete
            transition(core, hooks, slot, ConnState::Closed, true);
        }
    }
    Ok(())
}

fn closing_close(
    _core: &mut Core,
    _hooks: &mut Callbacks,
    _slot: usize,
    _code: u16,
) -> Result<(), Error> {
    // already closing
    Ok(())
}

// ============================================================================
// Closed / rejections
// ============================================================================

fn reject_send_invalid(
    core: &mut Core,
    _hooks: &mut Callbacks,
    slot: usize,
    _payload: &[u8],
    _opcode: OpCode,
) -> Result<(), Error> {
    if let Some(conn) = core.slab.slot_ref(slot) {
        debug!("#{}: cannot send: connection not open", conn.serial());
    }
    Err(Error::InvalidState)
}

fn closed_data(_core: &mut Core, _hooks: &mut Callbacks, _slot: usize) -> Result<(), Error> {
    Err(Error::ConnectionClosed)
}

fn closed_send(
    _core: &mut Core,
    _hooks: &mut Callbacks,
    _slot: usize,
    _payload: &[u8],
    _opcode: OpCode,
) -> Result<(), Error> {
    Err(Error::ConnectionClosed)
}

fn closed_close(
    _core: &mut Core,
    _hooks: &mut Callbacks,
    _slot: usize,
    _code: u16,
) -> Result<(), Error> {
    Err(Error::ConnectionClosed)
}
