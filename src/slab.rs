//! Connection arena.
//!
//! The reactor owns every connection in a fixed slab; the application
//! refers to them through [`ConnId`] handles carrying a slot number and
//! a generation counter. Releasing a slot bumps its generation, so a
//! handle kept across removal dereferences to nothing instead of to a
//! recycled connection.

use crate::conn::Connection;

/// Compile-time connection capacity.
pub const MAX_CONNECTIONS: usize = 64;

/// Generational connection handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId {
    slot: u16,
    gen: u32,
}

impl ConnId {
    #[inline]
    pub(crate) const fn new(slot: usize, gen: u32) -> Self {
        Self {
            slot: slot as u16,
            gen,
        }
    }

    #[inline]
    pub(crate) const fn slot(&self) -> usize {
        self.slot as usize
    }
}

struct Slot {
    gen: u32,
    conn: Option<Connection>,
}

/// Fixed slab plus the reactor's iteration list.
pub(crate) struct ConnSlab {
    slots: Box<[Slot]>,
    free: Vec<usize>,
    active: Vec<usize>,
}

impl ConnSlab {
    pub(crate) fn new(capacity: usize) -> Self {
        let slots: Box<[Slot]> = (0..capacity).map(|_| Slot { gen: 0, conn: None }).collect();
        // free list popped from the back, lowest slot first
        let free: Vec<usize> = (0..capacity).rev().collect();
        Self {
            slots,
            free,
            active: Vec::with_capacity(capacity),
        }
    }

    /// Active connection count.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.active.len()
    }

    /// Slots in reactor iteration order.
    #[inline]
    pub(crate) fn active(&self) -> &[usize] {
        &self.active
    }

    /// Handle for an occupied slot.
    #[inline]
    pub(crate) fn id_at(&self, slot: usize) -> ConnId {
        ConnId::new(slot, self.slots[slot].gen)
    }

    /// Take ownership of a connection; `None` when the slab is full.
    /// The connection learns its own handle.
    pub(crate) fn insert(&mut self, mut conn: Connection) -> Option<ConnId> {
        let slot = self.free.pop()?;
        let id = ConnId::new(slot, self.slots[slot].gen);
        conn.set_id(id);
        self.slots[slot].conn = Some(conn);
        self.active.push(slot);
        Some(id)
    }

    /// Direct slot access for the reactor.
    #[inline]
    pub(crate) fn slot_ref(&self, slot: usize) -> Option<&Connection> {
        self.slots.get(slot)?.conn.as_ref()
    }

    /// Direct slot access for the reactor.
    #[inline]
    pub(crate) fn slot_mut(&mut self, slot: usize) -> Option<&mut Connection> {
        self.slots.get_mut(slot)?.conn.as_mut()
    }

    /// Generation-checked dereference.
    pub(crate) fn get(&self, id: ConnId) -> Option<&Connection> {
        let slot = self.slots.get(id.slot())?;
        if slot.gen != id.gen {
            return None;
        }
        slot.conn.as_ref()
    }

    /// Generation-checked dereference.
    pub(crate) fn get_mut(&mut self, id: ConnId) -> Option<&mut Connection> {
        let slot = self.slots.get_mut(id.slot())?;
        if slot.gen != id.gen {
            return None;
        }
        slot.conn.as_mut()
    }

    /// Swap-remove every terminally closed connection from the active
    /// list and release its slot; returns the removed count. Iteration
    /// order of the survivors is stable within a reactor iteration.
    pub(crate) fn compact(&mut self, mut is_dead: impl FnMut(&Connection) -> bool) -> usize {
        let mut removed = 0;
        let mut i = 0;
        while i < self.active.len() {
            let slot = self.active[i];
            let dead = self.slots[slot].conn.as_ref().map_or(true, &mut is_dead);
            if dead {
                self.active.swap_remove(i);
                self.slots[slot].conn = None;
                self.slots[slot].gen = self.slots[slot].gen.wrapping_add(1);
                self.free.push(slot);
                removed += 1;
            } else {
                i += 1;
            }
        }
        removed
    }
}
