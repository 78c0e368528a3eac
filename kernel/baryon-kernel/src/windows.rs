//! Kernel-side window table.
//!
//! The kernel only tracks opaque window handles with a z-order; the
//! compositor (an external collaborator) consumes the table to paint.
//! Handles are slot indices into a fixed table; the slab owns the
//! entries, the handle is just a stable integer.

use baryon_sched::TaskId;

/// Window table capacity.
pub const MAX_WINDOWS: usize = 32;
/// Maximum title length in bytes.
pub const TITLE_LEN: usize = 48;

/// An opaque window handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowId(u8);

impl WindowId {
    fn index(self) -> usize {
        self.0 as usize
    }

    /// The raw slot value, for the ABI's opaque handle encoding.
    #[must_use]
    pub fn raw(self) -> u8 {
        self.0
    }
}

/// Window placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    /// Left edge.
    pub x: i32,
    /// Top edge.
    pub y: i32,
    /// Width in pixels.
    pub w: u32,
    /// Height in pixels.
    pub h: u32,
}

/// One window slot.
#[derive(Debug, Clone, Copy)]
pub struct Window {
    /// Placement on screen.
    pub rect: Rect,
    /// Stacking position; higher paints later (frontmost).
    pub z: u32,
    /// The task that created the window.
    pub owner: Option<TaskId>,
    title: [u8; TITLE_LEN],
    title_len: u8,
}

impl Window {
    /// The window title.
    #[must_use]
    pub fn title(&self) -> &str {
        core::str::from_utf8(&self.title[..usize::from(self.title_len)]).unwrap_or("")
    }
}

/// The window table.
pub struct WindowTable {
    slots: [Option<Window>; MAX_WINDOWS],
    next_z: u32,
}

impl WindowTable {
    /// An empty table.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: [None; MAX_WINDOWS],
            next_z: 1,
        }
    }

    /// Creates a window on top of the stack.
    pub fn create(&mut self, title: &str, rect: Rect, owner: Option<TaskId>) -> Option<WindowId> {
        let slot = self.slots.iter().position(Option::is_none)?;
        let mut buf = [0u8; TITLE_LEN];
        let len = title.len().min(TITLE_LEN);
        buf[..len].copy_from_slice(&title.as_bytes()[..len]);
        #[allow(clippy::cast_possible_truncation)]
        let title_len = len as u8;
        self.slots[slot] = Some(Window {
            rect,
            z: self.next_z,
            owner,
            title: buf,
            title_len,
        });
        self.next_z += 1;
        #[allow(clippy::cast_possible_truncation)]
        let id = WindowId(slot as u8);
        Some(id)
    }

    /// Closes a window, releasing its slot.
    pub fn close(&mut self, id: WindowId) {
        self.slots[id.index()] = None;
    }

    /// Raises a window to the front.
    pub fn raise(&mut self, id: WindowId) {
        if let Some(win) = self.slots[id.index()].as_mut() {
            win.z = self.next_z;
            self.next_z += 1;
        }
    }

    /// Looks up a window.
    #[must_use]
    pub fn get(&self, id: WindowId) -> Option<&Window> {
        self.slots[id.index()].as_ref()
    }

    /// The frontmost window, if any.
    #[must_use]
    pub fn front(&self) -> Option<WindowId> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|w| (i, w.z)))
            .max_by_key(|&(_, z)| z)
            .map(|(i, _)| {
                #[allow(clippy::cast_possible_truncation)]
                let id = WindowId(i as u8);
                id
            })
    }

    /// Number of live windows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// True when no windows exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for WindowTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECT: Rect = Rect {
        x: 10,
        y: 10,
        w: 320,
        h: 200,
    };

    #[test]
    fn create_assigns_increasing_z() {
        let mut table = WindowTable::new();
        let a = table.create("Files", RECT, None).unwrap();
        let b = table.create("Terminal", RECT, None).unwrap();
        assert!(table.get(a).unwrap().z < table.get(b).unwrap().z);
        assert_eq!(table.front(), Some(b));
        assert_eq!(table.get(a).unwrap().title(), "Files");
    }

    #[test]
    fn raise_moves_to_front() {
        let mut table = WindowTable::new();
        let a = table.create("a", RECT, None).unwrap();
        let _b = table.create("b", RECT, None).unwrap();
        table.raise(a);
        assert_eq!(table.front(), Some(a));
    }

    #[test]
    fn close_releases_slot_for_reuse() {
        let mut table = WindowTable::new();
        let a = table.create("a", RECT, None).unwrap();
        table.close(a);
        assert!(table.get(a).is_none());
        assert_eq!(table.len(), 0);
        let again = table.create("again", RECT, None).unwrap();
        assert_eq!(again, a);
    }

    #[test]
    fn table_capacity_is_bounded() {
        let mut table = WindowTable::new();
        for i in 0..MAX_WINDOWS {
            assert!(table.create("w", RECT, None).is_some(), "slot {i}");
        }
        assert!(table.create("overflow", RECT, None).is_none());
    }
}
