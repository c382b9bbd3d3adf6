/*
 * waiters.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Poolwire, a pooled HTTP/1.1 client transport.
 *
 * Poolwire is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Poolwire is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Poolwire.  If not, see <http://www.gnu.org/licenses/>.
 */

//! FIFO waiter queue: a doubly-linked list threaded through a slab, so a cancelled waiter
//! can unlink itself in O(1) by id.

/// Handle to a queued entry. Stale after the entry is popped or removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WaiterId {
    index: usize,
    generation: u64,
}

enum Slot<T> {
    Occupied {
        value: T,
        generation: u64,
        prev: Option<usize>,
        next: Option<usize>,
    },
    Vacant {
        next_free: Option<usize>,
    },
}

pub(crate) struct WaiterQueue<T> {
    slots: Vec<Slot<T>>,
    head: Option<usize>,
    tail: Option<usize>,
    free: Option<usize>,
    len: usize,
    generation: u64,
}

impl<T> WaiterQueue<T> {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            head: None,
            tail: None,
            free: None,
            len: 0,
            generation: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn push_back(&mut self, value: T) -> WaiterId {
        self.generation += 1;
        let generation = self.generation;
        let slot = Slot::Occupied {
            value,
            generation,
            prev: self.tail,
            next: None,
        };
        let index = match self.free {
            Some(index) => {
                if let Slot::Vacant { next_free } = self.slots[index] {
                    self.free = next_free;
                }
                self.slots[index] = slot;
                index
            }
            None => {
                self.slots.push(slot);
                self.slots.len() - 1
            }
        };
        match self.tail {
            Some(tail) => self.set_next(tail, Some(index)),
            None => self.head = Some(index),
        }
        self.tail = Some(index);
        self.len += 1;
        WaiterId { index, generation }
    }

    pub(crate) fn pop_front(&mut self) -> Option<T> {
        let index = self.head?;
        self.unlink(index)
    }

    /// Remove the entry if it is still queued.
    pub(crate) fn remove(&mut self, id: WaiterId) -> Option<T> {
        match self.slots.get(id.index) {
            Some(Slot::Occupied { generation, .. }) if *generation == id.generation => self.unlink(id.index),
            _ => None,
        }
    }

    fn set_next(&mut self, index: usize, to: Option<usize>) {
        if let Slot::Occupied { next, .. } = &mut self.slots[index] {
            *next = to;
        }
    }

    fn set_prev(&mut self, index: usize, to: Option<usize>) {
        if let Slot::Occupied { prev, .. } = &mut self.slots[index] {
            *prev = to;
        }
    }

    fn unlink(&mut self, index: usize) -> Option<T> {
        let vacant = Slot::Vacant { next_free: self.free };
        let (value, prev, next) = match std::mem::replace(&mut self.slots[index], vacant) {
            Slot::Occupied { value, prev, next, .. } => (value, prev, next),
            occupied_or_not => {
                self.slots[index] = occupied_or_not;
                return None;
            }
        };
        match prev {
            Some(p) => self.set_next(p, next),
            None => self.head = next,
        }
        match next {
            Some(n) => self.set_prev(n, prev),
            None => self.tail = prev,
        }
        self.free = Some(index);
        self.len -= 1;
        Some(value)
    }
}
