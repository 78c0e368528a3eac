//! The kernel API table: the stable ABI between kernel and CDL modules.
//!
//! One `#[repr(C)]` structure of `extern "C"` function pointers. The
//! field order IS the ABI: changing it requires re-linking every module,
//! so additions are appended and nothing is ever reordered or removed.
//! The table groups process control, filesystem access, the GUI
//! surface, string/memory utilities, clock and memory queries, and the
//! socket layer, ending with the `process_events` hook modules call
//! during long operations.

use core::ffi::{c_char, c_int, c_uint, c_ulong, c_void};

/// Opaque window handle passed across the ABI.
pub type WinHandle = *mut c_void;

/// Window paint callback: `(x, y, w, h)`.
pub type PaintCb = Option<unsafe extern "C" fn(c_int, c_int, c_int, c_int)>;
/// Key input callback.
pub type InputCb = Option<unsafe extern "C" fn(c_int)>;
/// Mouse callback: `(x, y, buttons)`.
pub type MouseCb = Option<unsafe extern "C" fn(c_int, c_int, c_int)>;
/// Menu selection callback: `(menu, item)`.
pub type MenuCb = Option<unsafe extern "C" fn(c_int, c_int)>;

/// Maximum items per menu.
pub const MAX_MENU_ITEMS: usize = 5;

/// One menu item definition.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct MenuItem {
    /// Visible label, NUL terminated.
    pub label: [c_char; 16],
    /// Action identifier handed back to the callback host.
    pub action_id: [c_char; 32],
}

/// One menu definition.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct MenuDef {
    /// Menu title, NUL terminated.
    pub name: [c_char; 12],
    /// The items.
    pub items: [MenuItem; MAX_MENU_ITEMS],
    /// Number of valid items.
    pub item_count: c_int,
}

/// The kernel API table. Append-only.
#[repr(C)]
pub struct KernelApi {
    // ── 1. System & memory ─────────────────────────────────────────
    /// Writes a NUL-terminated string to the console/log.
    pub print: unsafe extern "C" fn(*const c_char),
    /// Allocates zeroed memory.
    pub malloc: unsafe extern "C" fn(c_ulong) -> *mut c_void,
    /// Resizes an allocation.
    pub realloc: unsafe extern "C" fn(*mut c_void, c_ulong) -> *mut c_void,
    /// Frees an allocation.
    pub free: unsafe extern "C" fn(*mut c_void),
    /// Terminates the calling module's task.
    pub exit: unsafe extern "C" fn(),
    /// Loads and runs another module by path.
    pub exec: unsafe extern "C" fn(*const c_char) -> c_int,
    /// `exec` with launch arguments.
    pub exec_with_args: unsafe extern "C" fn(*const c_char, *const c_char) -> c_int,
    /// Copies the launch arguments into the caller's buffer.
    pub get_launch_args: unsafe extern "C" fn(*mut c_char, c_int),

    // ── 2. Filesystem ──────────────────────────────────────────────
    /// Reads a file into a buffer; returns bytes read or a negative
    /// error.
    pub fs_read: unsafe extern "C" fn(*const c_char, *mut c_char, c_int) -> c_int,
    /// Writes a buffer to a file.
    pub fs_write: unsafe extern "C" fn(*const c_char, *const c_char, c_int) -> c_int,
    /// Lists a directory into an entry array.
    pub fs_list: unsafe extern "C" fn(*const c_char, *mut c_void, c_int) -> c_int,
    /// Creates a file (`is_dir = 0`) or directory.
    pub fs_create: unsafe extern "C" fn(*const c_char, c_int) -> c_int,
    /// Deletes a file or empty directory.
    pub fs_delete: unsafe extern "C" fn(*const c_char) -> c_int,
    /// Renames within a directory.
    pub fs_rename: unsafe extern "C" fn(*const c_char, *const c_char) -> c_int,
    /// Existence probe.
    pub fs_exists: unsafe extern "C" fn(*const c_char) -> c_int,

    // ── 3. GUI & graphics ──────────────────────────────────────────
    /// Creates a window with paint/input/mouse callbacks.
    pub create_window:
        unsafe extern "C" fn(*const c_char, c_int, c_int, PaintCb, InputCb, MouseCb) -> WinHandle,
    /// Fills a rectangle.
    pub draw_rect: unsafe extern "C" fn(c_int, c_int, c_int, c_int, c_int),
    /// Draws a string.
    pub draw_text: unsafe extern "C" fn(c_int, c_int, *const c_char, c_int),
    /// Draws a string clipped to a width.
    pub draw_text_clipped: unsafe extern "C" fn(c_int, c_int, *const c_char, c_int, c_int),
    /// Draws a named embedded image.
    pub draw_image: unsafe extern "C" fn(c_int, c_int, *const c_char),
    /// Draws a named embedded image scaled.
    pub draw_image_scaled: unsafe extern "C" fn(c_int, c_int, c_int, c_int, *const c_char),
    /// Fills a rounded rectangle.
    pub draw_rect_rounded: unsafe extern "C" fn(c_int, c_int, c_int, c_int, c_int, c_int),
    /// Attaches a menu bar definition to a window.
    pub set_window_menu: unsafe extern "C" fn(WinHandle, *const MenuDef, c_int, MenuCb),

    // ── 4. String & memory utilities ───────────────────────────────
    /// `memset`.
    pub memset: unsafe extern "C" fn(*mut c_void, c_int, c_ulong),
    /// `memcpy` (non-overlapping).
    pub memcpy: unsafe extern "C" fn(*mut c_void, *const c_void, c_ulong),
    /// `strcpy`.
    pub strcpy: unsafe extern "C" fn(*mut c_char, *const c_char),
    /// `strncpy`.
    pub strncpy: unsafe extern "C" fn(*mut c_char, *const c_char, c_ulong),
    /// `strcmp`.
    pub strcmp: unsafe extern "C" fn(*const c_char, *const c_char) -> c_int,
    /// `strncmp`.
    pub strncmp: unsafe extern "C" fn(*const c_char, *const c_char, c_ulong) -> c_int,
    /// `strchr`.
    pub strchr: unsafe extern "C" fn(*const c_char, c_int) -> *mut c_char,
    /// `strstr`.
    pub strstr: unsafe extern "C" fn(*const c_char, *const c_char) -> *mut c_char,
    /// `memmove` (overlap allowed; copy and move are distinct on this
    /// ABI precisely because aliasing is legal only here).
    pub memmove: unsafe extern "C" fn(*mut c_void, *const c_void, c_ulong),
    /// Minimal `sprintf` (`%s %d %c %02X`).
    pub sprintf: unsafe extern "C" fn(*mut c_char, *const c_char, ...) -> c_int,
    /// `strlen`.
    pub strlen: unsafe extern "C" fn(*const c_char) -> c_ulong,
    /// Integer to decimal string.
    pub itoa: unsafe extern "C" fn(c_int, *mut c_char),

    // ── 5. Hardware & stats ────────────────────────────────────────
    /// Monotonic tick count (50 Hz).
    pub get_ticks: unsafe extern "C" fn() -> c_uint,
    /// Heap bytes in use.
    pub mem_used: unsafe extern "C" fn() -> c_uint,
    /// Total heap bytes.
    pub mem_total: unsafe extern "C" fn() -> c_uint,
    /// Modifier key state: `(ctrl, shift, alt)` out-pointers.
    pub get_kbd_state: unsafe extern "C" fn(*mut c_int, *mut c_int, *mut c_int),
    /// Filesystem generation counter for cache invalidation.
    pub get_fs_generation: unsafe extern "C" fn() -> c_uint,

    // ── 6. Network ─────────────────────────────────────────────────
    /// ICMP echo to a dotted-quad address; result text in the buffer.
    pub ping: unsafe extern "C" fn(*const c_char, *mut c_char, c_int) -> c_int,
    /// Allocates a socket.
    pub socket: unsafe extern "C" fn(c_int, c_int, c_int) -> c_int,
    /// Binds to a local port.
    pub bind: unsafe extern "C" fn(c_int, *const c_void, c_int) -> c_int,
    /// Connects to a remote endpoint.
    pub connect: unsafe extern "C" fn(c_int, *const c_void, c_int) -> c_int,
    /// Sends a datagram to an explicit destination.
    pub sendto:
        unsafe extern "C" fn(c_int, *const c_void, c_ulong, c_int, *const c_void, c_int) -> c_int,
    /// Sends on a connected socket.
    pub send: unsafe extern "C" fn(c_int, *const c_void, c_ulong, c_int) -> c_int,
    /// Receives with source address capture.
    pub recvfrom:
        unsafe extern "C" fn(c_int, *mut c_void, c_ulong, c_int, *mut c_void, *mut c_int) -> c_int,
    /// Receives on a connected socket.
    pub recv: unsafe extern "C" fn(c_int, *mut c_void, c_ulong, c_int) -> c_int,
    /// Closes a socket.
    pub close: unsafe extern "C" fn(c_int) -> c_int,
    /// Interface name/address/MAC query.
    pub net_get_interface_info:
        unsafe extern "C" fn(*const c_char, *mut c_char, *mut c_char) -> c_int,
    /// Resolves a hostname to a dotted quad.
    pub dns_resolve: unsafe extern "C" fn(*const c_char, *mut c_char, c_int) -> c_int,
    /// One-shot HTTP GET.
    pub http_get: unsafe extern "C" fn(*const c_char, *mut c_char, c_int) -> c_int,

    // ── 7. Event processing ────────────────────────────────────────
    /// Called by modules during long operations to keep the system
    /// responsive: pumps the NIC and repaints the active window.
    pub process_events: unsafe extern "C" fn(),
}

/// Number of function-pointer fields; the appended-only ABI grows this.
pub const KERNEL_API_FIELDS: usize = 53;

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::{offset_of, size_of};

    const PTR: usize = size_of::<*const ()>();

    #[test]
    fn table_is_exactly_the_declared_pointers() {
        // Every field is one function pointer; padding would break the
        // ABI contract with C modules.
        assert_eq!(size_of::<KernelApi>(), KERNEL_API_FIELDS * PTR);
    }

    #[test]
    fn group_offsets_pin_the_field_order() {
        assert_eq!(offset_of!(KernelApi, print), 0);
        assert_eq!(offset_of!(KernelApi, fs_read), 8 * PTR);
        assert_eq!(offset_of!(KernelApi, create_window), 15 * PTR);
        assert_eq!(offset_of!(KernelApi, memset), 23 * PTR);
        assert_eq!(offset_of!(KernelApi, get_ticks), 35 * PTR);
        assert_eq!(offset_of!(KernelApi, ping), 40 * PTR);
        assert_eq!(offset_of!(KernelApi, process_events), 52 * PTR);
    }

    #[test]
    fn menu_def_layout_matches_the_abi() {
        assert_eq!(size_of::<MenuItem>(), 48);
        assert_eq!(offset_of!(MenuDef, items), 12);
        assert_eq!(offset_of!(MenuDef, item_count), 12 + 5 * 48);
    }
}
