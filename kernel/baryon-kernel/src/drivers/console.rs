//! Boot console: VGA text mode, or a 32-bpp linear framebuffer when the
//! bootloader provides one.
//!
//! Only used until the compositor takes over the display; afterwards it
//! keeps serving as a log sink target for panics.

use core::fmt::{self, Write};

use baryon_core::sync::SpinLock;

use crate::multiboot::Framebuffer;

const VGA_TEXT: u32 = 0xB8000;
const VGA_COLS: usize = 80;
const VGA_ROWS: usize = 25;
/// Light grey on black.
const VGA_ATTR: u8 = 0x07;

enum Backend {
    None,
    VgaText { col: usize, row: usize },
    Fb(Framebuffer),
}

struct Console {
    backend: Backend,
}

static CONSOLE: SpinLock<Console> = SpinLock::new(Console {
    backend: Backend::None,
});

/// Selects the backend: the framebuffer when present, else VGA text.
pub fn init(framebuffer: Option<Framebuffer>) {
    let mut console = CONSOLE.lock();
    console.backend = match framebuffer {
        Some(fb) if fb.bpp == 32 => Backend::Fb(fb),
        _ => {
            // SAFETY: Clearing the identity-mapped VGA text buffer.
            unsafe {
                let base = VGA_TEXT as *mut u16;
                for i in 0..VGA_COLS * VGA_ROWS {
                    base.add(i).write_volatile(u16::from(VGA_ATTR) << 8 | u16::from(b' '));
                }
            }
            Backend::VgaText { col: 0, row: 0 }
        }
    };
}

impl Console {
    fn put_char(&mut self, c: u8) {
        match &mut self.backend {
            Backend::None | Backend::Fb(_) => {
                // Text on the framebuffer is the compositor's business;
                // before it runs, the serial log carries boot output.
            }
            Backend::VgaText { col, row } => {
                if c == b'\n' {
                    *col = 0;
                    *row += 1;
                } else {
                    let offset = *row * VGA_COLS + *col;
                    // SAFETY: offset stays inside the 80x25 text buffer.
                    unsafe {
                        (VGA_TEXT as *mut u16)
                            .add(offset)
                            .write_volatile(u16::from(VGA_ATTR) << 8 | u16::from(c));
                    }
                    *col += 1;
                    if *col == VGA_COLS {
                        *col = 0;
                        *row += 1;
                    }
                }
                if *row == VGA_ROWS {
                    scroll();
                    *row = VGA_ROWS - 1;
                }
            }
        }
    }
}

fn scroll() {
    // SAFETY: Moves rows 1..25 up one line within the text buffer.
    unsafe {
        let base = VGA_TEXT as *mut u16;
        core::ptr::copy(base.add(VGA_COLS), base, VGA_COLS * (VGA_ROWS - 1));
        for i in 0..VGA_COLS {
            base.add(VGA_COLS * (VGA_ROWS - 1) + i)
                .write_volatile(u16::from(VGA_ATTR) << 8 | u16::from(b' '));
        }
    }
}

impl Write for Console {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            self.put_char(byte);
        }
        Ok(())
    }
}

/// Log-sink adapter: serial plus the console.
pub fn sink(args: fmt::Arguments<'_>) {
    super::serial::sink(args);
    if let Some(mut console) = CONSOLE.try_lock() {
        let _ = console.write_fmt(args);
    }
}

/// Fills a rectangle on the framebuffer (no-op in text mode; the GUI
/// ops only make sense with a linear framebuffer).
pub fn fill_rect(x: i32, y: i32, w: i32, h: i32, color: u32) {
    let console = CONSOLE.lock();
    let Backend::Fb(fb) = &console.backend else {
        return;
    };
    if w <= 0 || h <= 0 {
        return;
    }
    let x0 = x.max(0) as u32;
    let y0 = y.max(0) as u32;
    let x1 = ((x + w) as u32).min(fb.width);
    let y1 = ((y + h) as u32).min(fb.height);
    let pixels_per_row = fb.pitch / 4;
    // SAFETY: The framebuffer is mapped; the loop bounds are clamped
    // to the mode dimensions.
    unsafe {
        #[allow(clippy::cast_possible_truncation)]
        let base = fb.addr as u32 as *mut u32;
        for row in y0..y1 {
            for col in x0..x1 {
                base.add((row * pixels_per_row + col) as usize)
                    .write_volatile(color);
            }
        }
    }
}

/// Fills the screen with a panic color so the diagnostic is visible
/// even without a working console; text still goes to serial.
pub fn panic_screen() {
    let console = CONSOLE.lock();
    if let Backend::Fb(fb) = &console.backend {
        let pixels_per_row = fb.pitch / 4;
        // SAFETY: The framebuffer was mapped during boot; bounds come
        // from the bootloader's mode description.
        unsafe {
            #[allow(clippy::cast_possible_truncation)]
            let base = fb.addr as u32 as *mut u32;
            for y in 0..fb.height {
                for x in 0..fb.width {
                    base.add((y * pixels_per_row + x) as usize)
                        .write_volatile(0x00AA_1111);
                }
            }
        }
    }
}
