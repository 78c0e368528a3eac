//! Implementations behind the kernel API table.
//!
//! Everything a CDL module can do funnels through these `extern "C"`
//! shims into the subsystem singletons. The table itself is a static;
//! its address is what the loader hands to every module entry.

use alloc::string::String;
use alloc::vec;
use core::ffi::{c_char, c_int, c_uint, c_ulong, c_void};
use core::fmt;

use baryon_core::sync::SpinLock;
use baryon_core::{kinfo, kprint, kwarn};
use baryon_elf::{ElfError, ElfFile, LoadPlan, LoadedImage};
use baryon_fs::{DirEntry, FsError};
use baryon_net::{Ipv4Addr, NetError};

use crate::cdl::{module_name_from_path, CdlEntry, ModuleId, ModuleRegistry};
use crate::kapi::{InputCb, KernelApi, MenuCb, MenuDef, MouseCb, PaintCb, WinHandle};
use crate::windows::{Rect, WindowTable};

static MODULES: SpinLock<ModuleRegistry> = SpinLock::new(ModuleRegistry::new());
static WINDOWS: SpinLock<WindowTable> = SpinLock::new(WindowTable::new());
static LAUNCH_ARGS: SpinLock<[u8; 256]> = SpinLock::new([0; 256]);

/// Errors surfaced by the module loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadError {
    /// Filesystem failure reading the image.
    Fs(FsError),
    /// ELF validation or relocation failure.
    Elf(ElfError),
    /// No memory for the image slab.
    OutOfMemory,
    /// The entry returned no export table.
    NoExports,
    /// The registry is full.
    RegistryFull,
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fs(e) => write!(f, "filesystem: {e}"),
            Self::Elf(e) => write!(f, "elf: {e}"),
            Self::OutOfMemory => f.write_str("out of memory"),
            Self::NoExports => f.write_str("module returned no exports"),
            Self::RegistryFull => f.write_str("module table full"),
        }
    }
}

/// Loads a CDL from the filesystem, relocates it, runs its entry with
/// the API table, and registers the exports.
pub fn load_module(path: &str) -> Result<ModuleId, LoadError> {
    let cred = crate::kfs::current_cred();

    // Size from the directory entry, then the whole file into a heap
    // buffer (covers the maximum PT_LOAD file offset by construction).
    let entry = crate::kfs::with_volume(|v| v.stat(path, cred))
        .map_err(LoadError::Fs)?
        .map_err(LoadError::Fs)?;
    let mut file = vec![0u8; entry.size as usize];
    crate::kfs::with_volume(|v| v.read_file(path, &mut file, cred))
        .map_err(LoadError::Fs)?
        .map_err(LoadError::Fs)?;

    let elf = ElfFile::parse(&file).map_err(LoadError::Elf)?;
    let plan = LoadPlan::compute(&elf).map_err(LoadError::Elf)?;

    let slab_len = plan.size() as usize;
    let slab_ptr = crate::kmm::with_heap(|heap| heap.alloc_page_aligned(slab_len, None));
    if slab_ptr.is_null() {
        return Err(LoadError::OutOfMemory);
    }
    // SAFETY: Fresh page-aligned allocation of `slab_len` bytes.
    let slab = unsafe { core::slice::from_raw_parts_mut(slab_ptr, slab_len) };
    let base = slab_ptr as u32;

    let image = LoadedImage::load(&file, slab, base).map_err(LoadError::Elf)?;
    if image.skipped_relocs > 0 {
        kwarn!("cdl: {} unsupported relocations skipped", image.skipped_relocs);
    }
    drop(file);

    let name = module_name_from_path(path);
    kinfo!("cdl: {} at {:#010x} ({} bytes)", name, base, image.size);

    // SAFETY: The image is fully relocated for `base` and the entry
    // offset came from its validated header. The ABI fixes the entry
    // signature.
    let exports = unsafe {
        let entry: CdlEntry = core::mem::transmute(base + image.entry_offset);
        entry(&KERNEL_API)
    };
    if exports.is_null() {
        return Err(LoadError::NoExports);
    }

    MODULES
        .lock()
        .register(name, base, image.size, exports)
        .ok_or(LoadError::RegistryFull)
}

/// Looks up an exported symbol of a loaded module.
#[must_use]
pub fn get_proc_address(id: ModuleId, symbol: &str) -> Option<*const ()> {
    // SAFETY: Active modules keep their image resident.
    unsafe { MODULES.lock().proc_address(id, symbol) }
}

/// Deactivates a module slot (image retained until reuse).
pub fn unload_module(id: ModuleId) {
    MODULES.lock().unload(id);
}

// ---------------------------------------------------------------------
// C string helpers
// ---------------------------------------------------------------------

/// Borrow a NUL-terminated C string, bounded to 1024 bytes.
///
/// # Safety
///
/// `ptr` must be null or point at readable memory with a terminator
/// inside the bound.
unsafe fn cstr<'a>(ptr: *const c_char) -> &'a str {
    if ptr.is_null() {
        return "";
    }
    // SAFETY: Caller contract.
    let bytes = unsafe { core::slice::from_raw_parts(ptr.cast::<u8>(), 1024) };
    let len = bytes.iter().position(|&b| b == 0).unwrap_or(0);
    core::str::from_utf8(&bytes[..len]).unwrap_or("")
}

/// Copies `s` plus a terminator into a caller buffer of `max` bytes.
unsafe fn copy_out(s: &str, out: *mut c_char, max: c_int) {
    if out.is_null() || max <= 0 {
        return;
    }
    let max = max as usize;
    let n = s.len().min(max - 1);
    // SAFETY: Caller supplied a buffer of at least `max` bytes.
    unsafe {
        core::ptr::copy_nonoverlapping(s.as_ptr(), out.cast::<u8>(), n);
        out.add(n).write(0);
    }
}

fn fs_err(e: FsError) -> c_int {
    match e {
        FsError::Io => -1,
        FsError::NoFs => -2,
        FsError::Full => -3,
        FsError::NotFound => -4,
        FsError::Exists => -5,
        FsError::Access => -6,
        FsError::NotEmpty => -7,
        FsError::Param => -8,
    }
}

fn net_err(e: NetError) -> c_int {
    match e {
        NetError::NoRoute => -2,
        NetError::Timeout => -3,
        NetError::ConnectionRefused => -4,
        NetError::ConnectionReset => -5,
        NetError::BufferFull => -6,
        NetError::Param => -7,
        NetError::Device => -8,
    }
}

// ---------------------------------------------------------------------
// 1. System & memory
// ---------------------------------------------------------------------

unsafe extern "C" fn k_print(s: *const c_char) {
    // SAFETY: ABI contract: NUL-terminated string.
    let text = unsafe { cstr(s) };
    kprint!("{}", text);
}

unsafe extern "C" fn k_malloc(size: c_ulong) -> *mut c_void {
    crate::kmm::with_heap(|heap| heap.alloc(size as usize)).cast()
}

unsafe extern "C" fn k_realloc(ptr: *mut c_void, size: c_ulong) -> *mut c_void {
    crate::kmm::with_heap(|heap| heap.realloc(ptr.cast(), size as usize)).cast()
}

unsafe extern "C" fn k_free(ptr: *mut c_void) {
    crate::kmm::with_heap(|heap| {
        let _ = heap.free(ptr.cast());
    });
}

unsafe extern "C" fn k_exit() {
    crate::ksched::exit_current();
}

unsafe extern "C" fn k_exec(path: *const c_char) -> c_int {
    // SAFETY: ABI contract.
    let path = unsafe { cstr(path) };
    // Launching `Name.app` means loading the bundle's code module.
    let mut owned;
    let actual = if let Some(stem) = path.strip_suffix(".app") {
        owned = String::from(stem);
        owned.push_str(".cdl");
        owned.as_str()
    } else {
        path
    };
    match load_module(actual) {
        Ok(id) => c_int::from(id.0),
        Err(e) => {
            kwarn!("exec: {} failed ({})", actual, e);
            -1
        }
    }
}

unsafe extern "C" fn k_exec_with_args(path: *const c_char, args: *const c_char) -> c_int {
    {
        let mut stored = LAUNCH_ARGS.lock();
        stored.fill(0);
        // SAFETY: ABI contract.
        let args = unsafe { cstr(args) };
        let n = args.len().min(stored.len() - 1);
        stored[..n].copy_from_slice(&args.as_bytes()[..n]);
    }
    // SAFETY: Forwarded ABI contract.
    unsafe { k_exec(path) }
}

unsafe extern "C" fn k_get_launch_args(out: *mut c_char, max: c_int) {
    let stored = LAUNCH_ARGS.lock();
    let len = stored.iter().position(|&b| b == 0).unwrap_or(0);
    let text = core::str::from_utf8(&stored[..len]).unwrap_or("");
    // SAFETY: ABI contract: `out` has `max` bytes.
    unsafe { copy_out(text, out, max) };
}

// ---------------------------------------------------------------------
// 2. Filesystem
// ---------------------------------------------------------------------

unsafe extern "C" fn k_fs_read(path: *const c_char, out: *mut c_char, max: c_int) -> c_int {
    if out.is_null() || max < 0 {
        return fs_err(FsError::Param);
    }
    // SAFETY: ABI contract for both pointers.
    let path = unsafe { cstr(path) };
    let buf = unsafe { core::slice::from_raw_parts_mut(out.cast::<u8>(), max as usize) };
    let cred = crate::kfs::current_cred();
    match crate::kfs::with_volume(|v| v.read_file(path, buf, cred)) {
        Ok(Ok(n)) => n as c_int,
        Ok(Err(e)) | Err(e) => fs_err(e),
    }
}

unsafe extern "C" fn k_fs_write(path: *const c_char, data: *const c_char, len: c_int) -> c_int {
    if data.is_null() || len < 0 {
        return fs_err(FsError::Param);
    }
    // SAFETY: ABI contract.
    let path = unsafe { cstr(path) };
    let buf = unsafe { core::slice::from_raw_parts(data.cast::<u8>(), len as usize) };
    let cred = crate::kfs::current_cred();
    match crate::kfs::with_volume(|v| v.write_file(path, buf, cred)) {
        Ok(Ok(n)) => n as c_int,
        Ok(Err(e)) | Err(e) => fs_err(e),
    }
}

unsafe extern "C" fn k_fs_list(path: *const c_char, out: *mut c_void, max: c_int) -> c_int {
    if out.is_null() || max <= 0 {
        return fs_err(FsError::Param);
    }
    // SAFETY: ABI contract; the entry array layout is the on-disk one.
    let path = unsafe { cstr(path) };
    let cred = crate::kfs::current_cred();
    let mut entries = vec![DirEntry::empty(); (max as usize).min(128)];
    let count = match crate::kfs::with_volume(|v| {
        let block = v.dir_block(path, cred)?;
        v.listdir(block, &mut entries)
    }) {
        Ok(Ok(n)) => n,
        Ok(Err(e)) | Err(e) => return fs_err(e),
    };
    // Serialize in the 64-byte on-disk format the ABI promises.
    let raw = out.cast::<u8>();
    let mut block = [0u8; baryon_fs::BLOCK_SIZE];
    for (i, entry) in entries[..count].iter().enumerate() {
        entry.store(&mut block, 0);
        // SAFETY: `out` holds `max` 64-byte records.
        unsafe {
            core::ptr::copy_nonoverlapping(block.as_ptr(), raw.add(i * 64), 64);
        }
    }
    count as c_int
}

unsafe extern "C" fn k_fs_create(path: *const c_char, is_dir: c_int) -> c_int {
    // SAFETY: ABI contract.
    let path = unsafe { cstr(path) };
    let cred = crate::kfs::current_cred();
    match crate::kfs::with_volume(|v| v.create(path, is_dir != 0, cred)) {
        Ok(Ok(())) => 0,
        Ok(Err(e)) | Err(e) => fs_err(e),
    }
}

unsafe extern "C" fn k_fs_delete(path: *const c_char) -> c_int {
    // SAFETY: ABI contract.
    let path = unsafe { cstr(path) };
    let cred = crate::kfs::current_cred();
    match crate::kfs::with_volume(|v| v.delete(path, cred)) {
        Ok(Ok(())) => 0,
        Ok(Err(e)) | Err(e) => fs_err(e),
    }
}

unsafe extern "C" fn k_fs_rename(old: *const c_char, new: *const c_char) -> c_int {
    // SAFETY: ABI contract.
    let (old, new) = unsafe { (cstr(old), cstr(new)) };
    let cred = crate::kfs::current_cred();
    match crate::kfs::with_volume(|v| v.rename(old, new, cred)) {
        Ok(Ok(())) => 0,
        Ok(Err(e)) | Err(e) => fs_err(e),
    }
}

unsafe extern "C" fn k_fs_exists(path: *const c_char) -> c_int {
    // SAFETY: ABI contract.
    let path = unsafe { cstr(path) };
    let cred = crate::kfs::current_cred();
    match crate::kfs::with_volume(|v| v.stat(path, cred)) {
        Ok(Ok(_)) => 1,
        _ => 0,
    }
}

// ---------------------------------------------------------------------
// 3. GUI surface
// ---------------------------------------------------------------------
//
// The compositor consumes the window table and does the actual
// painting; the kernel keeps the handles and fills raw rectangles for
// modules drawing before the compositor attaches.

unsafe extern "C" fn k_create_window(
    title: *const c_char,
    w: c_int,
    h: c_int,
    _paint: PaintCb,
    _input: InputCb,
    _mouse: MouseCb,
) -> WinHandle {
    // SAFETY: ABI contract.
    let title = unsafe { cstr(title) };
    let current = crate::ksched::with(|sched| sched.current());
    let rect = Rect {
        x: 64,
        y: 64,
        w: w.max(0) as u32,
        h: h.max(0) as u32,
    };
    match WINDOWS.lock().create(title, rect, current) {
        // Slot + 1 so a null handle stays "no window".
        Some(id) => (usize::from(id.raw()) + 1) as WinHandle,
        None => core::ptr::null_mut(),
    }
}

unsafe extern "C" fn k_draw_rect(x: c_int, y: c_int, w: c_int, h: c_int, color: c_int) {
    crate::drivers::console::fill_rect(x, y, w, h, color as u32);
}

unsafe extern "C" fn k_draw_text(_x: c_int, _y: c_int, text: *const c_char, _color: c_int) {
    // Glyph rendering belongs to the compositor's font stack; until it
    // attaches, text surfaces on the log.
    // SAFETY: ABI contract.
    let text = unsafe { cstr(text) };
    kprint!("{}", text);
}

unsafe extern "C" fn k_draw_text_clipped(
    x: c_int,
    y: c_int,
    text: *const c_char,
    color: c_int,
    _max_w: c_int,
) {
    // SAFETY: Forwarded ABI contract.
    unsafe { k_draw_text(x, y, text, color) };
}

unsafe extern "C" fn k_draw_image(_x: c_int, _y: c_int, name: *const c_char) {
    // The embedded-image asset store is an external collaborator.
    // SAFETY: ABI contract.
    let name = unsafe { cstr(name) };
    kwarn!("gfx: draw_image '{}' before compositor attach", name);
}

unsafe extern "C" fn k_draw_image_scaled(
    x: c_int,
    y: c_int,
    _w: c_int,
    _h: c_int,
    name: *const c_char,
) {
    // SAFETY: Forwarded ABI contract.
    unsafe { k_draw_image(x, y, name) };
}

unsafe extern "C" fn k_draw_rect_rounded(
    x: c_int,
    y: c_int,
    w: c_int,
    h: c_int,
    color: c_int,
    _radius: c_int,
) {
    crate::drivers::console::fill_rect(x, y, w, h, color as u32);
}

unsafe extern "C" fn k_set_window_menu(
    _win: WinHandle,
    _menus: *const MenuDef,
    count: c_int,
    _cb: MenuCb,
) {
    kinfo!("gfx: window menu registered ({} menus)", count);
}

// ---------------------------------------------------------------------
// 4. String & memory utilities
// ---------------------------------------------------------------------

unsafe extern "C" fn k_memset(dst: *mut c_void, value: c_int, n: c_ulong) {
    // SAFETY: ABI contract: dst has n bytes.
    unsafe { core::ptr::write_bytes(dst.cast::<u8>(), value as u8, n as usize) };
}

unsafe extern "C" fn k_memcpy(dst: *mut c_void, src: *const c_void, n: c_ulong) {
    // SAFETY: ABI contract: non-overlapping buffers of n bytes.
    unsafe { core::ptr::copy_nonoverlapping(src.cast::<u8>(), dst.cast::<u8>(), n as usize) };
}

unsafe extern "C" fn k_memmove(dst: *mut c_void, src: *const c_void, n: c_ulong) {
    // SAFETY: ABI contract: buffers of n bytes, overlap allowed.
    unsafe { core::ptr::copy(src.cast::<u8>(), dst.cast::<u8>(), n as usize) };
}

unsafe extern "C" fn k_strcpy(dst: *mut c_char, src: *const c_char) {
    // SAFETY: ABI contract: dst holds the source plus terminator.
    unsafe {
        let s = cstr(src);
        core::ptr::copy_nonoverlapping(s.as_ptr().cast::<c_char>(), dst, s.len());
        dst.add(s.len()).write(0);
    }
}

unsafe extern "C" fn k_strncpy(dst: *mut c_char, src: *const c_char, n: c_ulong) {
    // SAFETY: ABI contract: dst holds n bytes.
    unsafe {
        let s = cstr(src);
        let copy = s.len().min(n as usize);
        core::ptr::copy_nonoverlapping(s.as_ptr().cast::<c_char>(), dst, copy);
        for i in copy..n as usize {
            dst.add(i).write(0);
        }
    }
}

unsafe extern "C" fn k_strcmp(a: *const c_char, b: *const c_char) -> c_int {
    // SAFETY: ABI contract.
    let (a, b) = unsafe { (cstr(a), cstr(b)) };
    match a.cmp(b) {
        core::cmp::Ordering::Less => -1,
        core::cmp::Ordering::Equal => 0,
        core::cmp::Ordering::Greater => 1,
    }
}

unsafe extern "C" fn k_strncmp(a: *const c_char, b: *const c_char, n: c_ulong) -> c_int {
    // SAFETY: ABI contract.
    let (a, b) = unsafe { (cstr(a), cstr(b)) };
    let n = n as usize;
    let a = &a.as_bytes()[..a.len().min(n)];
    let b = &b.as_bytes()[..b.len().min(n)];
    match a.cmp(b) {
        core::cmp::Ordering::Less => -1,
        core::cmp::Ordering::Equal => 0,
        core::cmp::Ordering::Greater => 1,
    }
}

unsafe extern "C" fn k_strchr(s: *const c_char, c: c_int) -> *mut c_char {
    // SAFETY: ABI contract.
    let text = unsafe { cstr(s) };
    match text.bytes().position(|b| c_int::from(b) == c) {
        // SAFETY: Offset stays within the scanned string.
        Some(i) => unsafe { s.add(i).cast_mut() },
        None => core::ptr::null_mut(),
    }
}

unsafe extern "C" fn k_strstr(hay: *const c_char, needle: *const c_char) -> *mut c_char {
    // SAFETY: ABI contract.
    let (h, n) = unsafe { (cstr(hay), cstr(needle)) };
    match h.find(n) {
        // SAFETY: Offset stays within the haystack.
        Some(i) => unsafe { hay.add(i).cast_mut() },
        None => core::ptr::null_mut(),
    }
}

unsafe extern "C" fn k_strlen(s: *const c_char) -> c_ulong {
    // SAFETY: ABI contract.
    unsafe { cstr(s) }.len() as c_ulong
}

unsafe extern "C" fn k_itoa(value: c_int, out: *mut c_char) {
    let (buf, n) = itoa_buf(value);
    let text = core::str::from_utf8(&buf[..n]).unwrap_or("");
    // SAFETY: ABI contract: out holds the digits plus terminator.
    unsafe { copy_out(text, out, 16) };
}

fn itoa_buf(value: c_int) -> ([u8; 12], usize) {
    let mut buf = [0u8; 12];
    let mut n = 0;
    let mut v = i64::from(value);
    let negative = v < 0;
    if negative {
        v = -v;
    }
    loop {
        buf[n] = b'0' + (v % 10) as u8;
        n += 1;
        v /= 10;
        if v == 0 {
            break;
        }
    }
    if negative {
        buf[n] = b'-';
        n += 1;
    }
    buf[..n].reverse();
    (buf, n)
}

/// Minimal `sprintf`: `%s %d %c %x %02X` plus literal `%%`.
unsafe extern "C" fn k_sprintf(out: *mut c_char, fmt: *const c_char, mut args: ...) -> c_int {
    // SAFETY: ABI contract for fmt and out.
    let fmt = unsafe { cstr(fmt) };
    let mut result = String::new();
    let mut chars = fmt.bytes().peekable();
    // SAFETY: Each `arg` call matches a conversion the caller supplied.
    unsafe {
        while let Some(c) = chars.next() {
            if c != b'%' {
                result.push(c as char);
                continue;
            }
            match chars.next() {
                Some(b's') => result.push_str(cstr(args.arg::<*const c_char>())),
                Some(b'd') => {
                    let (buf, n) = itoa_buf(args.arg::<c_int>());
                    result.push_str(core::str::from_utf8(&buf[..n]).unwrap_or(""));
                }
                Some(b'c') => result.push(args.arg::<c_int>() as u8 as char),
                Some(b'x') => {
                    let _ = fmt::write(&mut result, format_args!("{:x}", args.arg::<c_uint>()));
                }
                Some(b'0') => {
                    // Only the %02X form the original ABI used.
                    let _ = chars.next(); // '2'
                    let _ = chars.next(); // 'X'
                    let _ = fmt::write(&mut result, format_args!("{:02X}", args.arg::<c_uint>()));
                }
                Some(b'%') => result.push('%'),
                Some(other) => {
                    result.push('%');
                    result.push(other as char);
                }
                None => result.push('%'),
            }
        }
        copy_out(&result, out, 1024);
    }
    result.len() as c_int
}

// ---------------------------------------------------------------------
// 5. Hardware & stats
// ---------------------------------------------------------------------

unsafe extern "C" fn k_get_ticks() -> c_uint {
    crate::time::ticks() as c_uint
}

unsafe extern "C" fn k_mem_used() -> c_uint {
    crate::kmm::usage().0 as c_uint
}

unsafe extern "C" fn k_mem_total() -> c_uint {
    crate::kmm::usage().1 as c_uint
}

unsafe extern "C" fn k_get_kbd_state(ctrl: *mut c_int, shift: *mut c_int, alt: *mut c_int) {
    let m = crate::drivers::i8042::modifiers();
    // SAFETY: ABI contract: out-pointers are valid or null.
    unsafe {
        if !ctrl.is_null() {
            ctrl.write(c_int::from(m.ctrl));
        }
        if !shift.is_null() {
            shift.write(c_int::from(m.shift));
        }
        if !alt.is_null() {
            alt.write(c_int::from(m.alt));
        }
    }
}

unsafe extern "C" fn k_get_fs_generation() -> c_uint {
    crate::kfs::generation()
}

// ---------------------------------------------------------------------
// 6. Network
// ---------------------------------------------------------------------

/// `sockaddr_in` as modules lay it out.
#[repr(C)]
struct SockAddrIn {
    family: u16,
    /// Big-endian port.
    port: u16,
    /// Network-order address.
    addr: [u8; 4],
    zero: [u8; 8],
}

unsafe fn parse_sockaddr(ptr: *const c_void) -> Option<(Ipv4Addr, u16)> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: ABI contract: sockaddr_in layout.
    let sa = unsafe { &*ptr.cast::<SockAddrIn>() };
    Some((Ipv4Addr(sa.addr), u16::from_be(sa.port)))
}

unsafe extern "C" fn k_ping(ip: *const c_char, out: *mut c_char, max: c_int) -> c_int {
    // SAFETY: ABI contract.
    let text = unsafe { cstr(ip) };
    let Some(addr) = Ipv4Addr::parse(text) else {
        return net_err(NetError::Param);
    };
    let result = crate::knet::with_stack(|stack, dev, clock| stack.ping(dev, clock, addr));
    match result {
        Some(Ok(rtt_ticks)) => {
            let ms = rtt_ticks * 1000 / u64::from(crate::time::HZ);
            let mut line = String::new();
            let _ = fmt::write(&mut line, format_args!("reply from {text}: time={ms}ms"));
            // SAFETY: ABI contract: out has max bytes.
            unsafe { copy_out(&line, out, max) };
            0
        }
        Some(Err(e)) => net_err(e),
        None => net_err(NetError::Device),
    }
}

unsafe extern "C" fn k_socket(domain: c_int, stype: c_int, proto: c_int) -> c_int {
    crate::knet::with_stack(|stack, _, _| stack.socket(domain, stype, proto))
        .map_or(net_err(NetError::Device), |r| r.unwrap_or_else(net_err))
}

unsafe extern "C" fn k_bind(fd: c_int, addr: *const c_void, _len: c_int) -> c_int {
    // SAFETY: ABI contract.
    let Some((_, port)) = (unsafe { parse_sockaddr(addr) }) else {
        return net_err(NetError::Param);
    };
    crate::knet::with_stack(|stack, _, _| stack.bind(fd, port))
        .map_or(net_err(NetError::Device), |r| {
            r.map_or_else(net_err, |()| 0)
        })
}

unsafe extern "C" fn k_connect(fd: c_int, addr: *const c_void, _len: c_int) -> c_int {
    // SAFETY: ABI contract.
    let Some((ip, port)) = (unsafe { parse_sockaddr(addr) }) else {
        return net_err(NetError::Param);
    };
    crate::knet::with_stack(|stack, dev, clock| stack.connect(fd, dev, clock, ip, port))
        .map_or(net_err(NetError::Device), |r| {
            r.map_or_else(net_err, |()| 0)
        })
}

unsafe extern "C" fn k_sendto(
    fd: c_int,
    data: *const c_void,
    len: c_ulong,
    _flags: c_int,
    dest: *const c_void,
    _dest_len: c_int,
) -> c_int {
    if data.is_null() {
        return net_err(NetError::Param);
    }
    // SAFETY: ABI contract: data has len bytes.
    let buf = unsafe { core::slice::from_raw_parts(data.cast::<u8>(), len as usize) };
    // SAFETY: ABI contract.
    match unsafe { parse_sockaddr(dest) } {
        Some((ip, port)) => {
            crate::knet::with_stack(|stack, dev, clock| stack.sendto(fd, dev, clock, buf, ip, port))
                .map_or(net_err(NetError::Device), |r| {
                    r.map_or_else(net_err, |n| n as c_int)
                })
        }
        None => crate::knet::with_stack(|stack, dev, clock| stack.send(fd, dev, clock, buf))
            .map_or(net_err(NetError::Device), |r| {
                r.map_or_else(net_err, |n| n as c_int)
            }),
    }
}

unsafe extern "C" fn k_send(fd: c_int, data: *const c_void, len: c_ulong, flags: c_int) -> c_int {
    // SAFETY: Forwarded ABI contract.
    unsafe { k_sendto(fd, data, len, flags, core::ptr::null(), 0) }
}

unsafe extern "C" fn k_recvfrom(
    fd: c_int,
    out: *mut c_void,
    len: c_ulong,
    _flags: c_int,
    src: *mut c_void,
    src_len: *mut c_int,
) -> c_int {
    if out.is_null() {
        return net_err(NetError::Param);
    }
    // SAFETY: ABI contract: out has len bytes.
    let buf = unsafe { core::slice::from_raw_parts_mut(out.cast::<u8>(), len as usize) };
    let result =
        crate::knet::with_stack(|stack, dev, clock| stack.recvfrom(fd, dev, clock, buf));
    match result {
        Some(Ok((n, ip, port))) => {
            if !src.is_null() {
                // SAFETY: ABI contract: sockaddr_in out-buffer.
                unsafe {
                    src.cast::<SockAddrIn>().write(SockAddrIn {
                        family: 2,
                        port: port.to_be(),
                        addr: ip.0,
                        zero: [0; 8],
                    });
                    if !src_len.is_null() {
                        src_len.write(core::mem::size_of::<SockAddrIn>() as c_int);
                    }
                }
            }
            n as c_int
        }
        Some(Err(e)) => net_err(e),
        None => net_err(NetError::Device),
    }
}

unsafe extern "C" fn k_recv(fd: c_int, out: *mut c_void, len: c_ulong, flags: c_int) -> c_int {
    // SAFETY: Forwarded ABI contract.
    unsafe { k_recvfrom(fd, out, len, flags, core::ptr::null_mut(), core::ptr::null_mut()) }
}

unsafe extern "C" fn k_close(fd: c_int) -> c_int {
    let now = crate::time::ticks();
    crate::knet::with_stack(|stack, dev, _| stack.close_socket(fd, dev, now));
    0
}

unsafe extern "C" fn k_net_get_interface_info(
    _name: *const c_char,
    out_ip: *mut c_char,
    out_mac: *mut c_char,
) -> c_int {
    let info = crate::knet::with_stack(|stack, dev, _| {
        (stack.config().ip, baryon_net::NetDevice::mac(dev))
    });
    let Some((ip, mac)) = info else {
        return net_err(NetError::Device);
    };
    let mut text = String::new();
    let _ = fmt::write(&mut text, format_args!("{ip}"));
    // SAFETY: ABI contract for both out buffers.
    unsafe {
        copy_out(&text, out_ip, 16);
        text.clear();
        let _ = fmt::write(&mut text, format_args!("{mac}"));
        copy_out(&text, out_mac, 18);
    }
    0
}

unsafe extern "C" fn k_dns_resolve(name: *const c_char, out: *mut c_char, max: c_int) -> c_int {
    // SAFETY: ABI contract.
    let name = unsafe { cstr(name) };
    if max < 16 {
        return net_err(NetError::Param);
    }
    let result = crate::knet::with_stack(|stack, dev, clock| stack.dns_resolve(dev, clock, name));
    match result {
        Some(Ok(ip)) => {
            let mut text = String::new();
            let _ = fmt::write(&mut text, format_args!("{ip}"));
            // SAFETY: ABI contract.
            unsafe { copy_out(&text, out, max) };
            0
        }
        Some(Err(e)) => net_err(e),
        None => net_err(NetError::Device),
    }
}

unsafe extern "C" fn k_http_get(url: *const c_char, out: *mut c_char, max: c_int) -> c_int {
    // SAFETY: ABI contract.
    let url = unsafe { cstr(url) };
    if out.is_null() || max <= 0 {
        return net_err(NetError::Param);
    }
    let rest = url.strip_prefix("http://").unwrap_or(url);
    let (host, path) = rest.split_once('/').map_or((rest, ""), |(h, p)| (h, p));
    let (host, port) = host
        .split_once(':')
        .and_then(|(h, p)| p.parse::<u16>().ok().map(|p| (h, p)))
        .unwrap_or((host, 80));

    let mut body = vec![0u8; (max as usize).saturating_sub(1)];
    let mut full_path = String::from("/");
    full_path.push_str(path);

    let result = crate::knet::with_stack(|stack, dev, clock| {
        let ip = stack.dns_resolve(dev, clock, host)?;
        stack.http_get(dev, clock, ip, port, host, &full_path, &mut body)
    });
    match result {
        Some(Ok(n)) => {
            // SAFETY: ABI contract: out has max bytes.
            unsafe {
                core::ptr::copy_nonoverlapping(body.as_ptr(), out.cast::<u8>(), n);
                out.add(n).write(0);
            }
            n as c_int
        }
        Some(Err(e)) => net_err(e),
        None => net_err(NetError::Device),
    }
}

// ---------------------------------------------------------------------
// 7. Event processing
// ---------------------------------------------------------------------

unsafe extern "C" fn k_process_events() {
    // Keep the machine responsive inside module-side long operations:
    // pump the NIC and give the scheduler a chance to rotate.
    crate::knet::drain_nic();
    crate::ksched::yield_now();
}

/// The table handed to every module entry. Append-only.
pub static KERNEL_API: KernelApi = KernelApi {
    print: k_print,
    malloc: k_malloc,
    realloc: k_realloc,
    free: k_free,
    exit: k_exit,
    exec: k_exec,
    exec_with_args: k_exec_with_args,
    get_launch_args: k_get_launch_args,
    fs_read: k_fs_read,
    fs_write: k_fs_write,
    fs_list: k_fs_list,
    fs_create: k_fs_create,
    fs_delete: k_fs_delete,
    fs_rename: k_fs_rename,
    fs_exists: k_fs_exists,
    create_window: k_create_window,
    draw_rect: k_draw_rect,
    draw_text: k_draw_text,
    draw_text_clipped: k_draw_text_clipped,
    draw_image: k_draw_image,
    draw_image_scaled: k_draw_image_scaled,
    draw_rect_rounded: k_draw_rect_rounded,
    set_window_menu: k_set_window_menu,
    memset: k_memset,
    memcpy: k_memcpy,
    strcpy: k_strcpy,
    strncpy: k_strncpy,
    strcmp: k_strcmp,
    strncmp: k_strncmp,
    strchr: k_strchr,
    strstr: k_strstr,
    memmove: k_memmove,
    sprintf: k_sprintf,
    strlen: k_strlen,
    itoa: k_itoa,
    get_ticks: k_get_ticks,
    mem_used: k_mem_used,
    mem_total: k_mem_total,
    get_kbd_state: k_get_kbd_state,
    get_fs_generation: k_get_fs_generation,
    ping: k_ping,
    socket: k_socket,
    bind: k_bind,
    connect: k_connect,
    sendto: k_sendto,
    send: k_send,
    recvfrom: k_recvfrom,
    recv: k_recv,
    close: k_close,
    net_get_interface_info: k_net_get_interface_info,
    dns_resolve: k_dns_resolve,
    http_get: k_http_get,
    process_events: k_process_events,
};
