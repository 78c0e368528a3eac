//! Interrupt stubs and the common dispatch routine.
//!
//! Every vector funnels through `isr_common`: `pusha`, call the Rust
//! dispatcher with the current stack pointer, switch to whatever stack
//! pointer it returns, `popa`, drop the vector/error slots, `iret`.
//! Preemption is exactly that returned-stack-pointer mechanism: the
//! timer vector hands the frame to the scheduler, which may answer with
//! another task's saved frame.

use core::sync::atomic::{AtomicU8, Ordering};

use baryon_core::kfatal;
use baryon_mm::paging::PageFaultCode;

use super::apic;

core::arch::global_asm!(
    r#"
.section .text
.altmacro

.macro MAKE_STUB n
vec\n:
    .if (\n == 8) || ((\n >= 10) && (\n <= 14)) || (\n == 17)
    .else
    push 0
    .endif
    push \n
    jmp isr_common
.endm

.set v, 0
.rept 48
    MAKE_STUB %v
    .set v, v+1
.endr
MAKE_STUB 128

spurious_stub:
    iretd

isr_common:
    pusha
    mov eax, esp
    push eax
    call isr_dispatch
    add esp, 4
    mov esp, eax
    popa
    add esp, 8
    iretd

.macro STUB_ADDR n
    .long vec\n
.endm

.section .rodata
.global VECTOR_STUBS
VECTOR_STUBS:
.set v, 0
.rept 48
    STUB_ADDR %v
    .set v, v+1
.endr
.global VECTOR_STUB_SOFT
VECTOR_STUB_SOFT:
    .long vec128
.global VECTOR_STUB_SPURIOUS
VECTOR_STUB_SPURIOUS:
    .long spurious_stub
.section .text
"#
);

extern "C" {
    static VECTOR_STUBS: [u32; 48];
    static VECTOR_STUB_SOFT: u32;
    static VECTOR_STUB_SPURIOUS: u32;
}

/// The saved register frame `isr_common` builds, ascending addresses.
#[repr(C)]
pub struct InterruptFrame {
    /// `pusha` block, EDI lowest.
    pub edi: u32,
    /// ESI.
    pub esi: u32,
    /// EBP.
    pub ebp: u32,
    /// Dummy ESP slot.
    pub esp_dummy: u32,
    /// EBX.
    pub ebx: u32,
    /// EDX.
    pub edx: u32,
    /// ECX.
    pub ecx: u32,
    /// EAX.
    pub eax: u32,
    /// Vector number pushed by the stub.
    pub vector: u32,
    /// CPU or dummy error code.
    pub err: u32,
    /// Interrupted EIP.
    pub eip: u32,
    /// Interrupted CS.
    pub cs: u32,
    /// Interrupted EFLAGS.
    pub eflags: u32,
}

/// The vector the NIC driver routed its interrupt to (0 = none).
static NIC_VECTOR: AtomicU8 = AtomicU8::new(0);

/// Registers the NIC's interrupt vector with the dispatcher.
pub fn set_nic_vector(vector: u8) {
    NIC_VECTOR.store(vector, Ordering::Relaxed);
}

/// Returns the stub address for a vector, for the IDT builder.
pub(super) fn stub_address(vector: usize) -> u32 {
    // SAFETY: The statics are defined by the assembly block above.
    unsafe {
        match vector {
            0..=47 => VECTOR_STUBS[vector],
            0x80 => VECTOR_STUB_SOFT,
            _ => VECTOR_STUB_SPURIOUS,
        }
    }
}

/// The Rust side of every interrupt. Returns the stack pointer to
/// resume on; only the timer vector ever returns a different one.
#[no_mangle]
extern "C" fn isr_dispatch(esp: u32) -> u32 {
    // SAFETY: `esp` points at the frame isr_common just built.
    let frame = unsafe { &*(esp as *const InterruptFrame) };
    let vector = frame.vector;

    match vector {
        14 => {
            let address = super::read_cr2();
            let code = PageFaultCode::from_bits(frame.err);
            kfatal!(
                "page fault at {:#010x} ({}) eip={:#010x}",
                address,
                code,
                frame.eip
            );
            crate::panic::panic_halt("page fault");
        }
        0..=31 => {
            kfatal!(
                "cpu exception {} err={:#x} eip={:#010x}",
                vector,
                frame.err,
                frame.eip
            );
            crate::panic::panic_halt("cpu exception");
        }
        32 => {
            // Preemption source: may return a different task's frame.
            let next = crate::time::timer_interrupt(esp);
            apic::eoi();
            return next;
        }
        33 => crate::drivers::i8042::keyboard_interrupt(),
        44 => crate::drivers::i8042::mouse_interrupt(),
        0x80 => crate::knet::soft_interrupt(),
        v if v as u8 == NIC_VECTOR.load(Ordering::Relaxed) => crate::knet::nic_interrupt(),
        _ => {}
    }

    if (32..48).contains(&vector) || vector == 0x80 {
        apic::eoi();
    }
    esp
}
