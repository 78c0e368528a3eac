//! Scheduler glue: the global instance, task stacks, idle.

use alloc::vec;

use baryon_core::sync::IrqLock;
use baryon_core::{kinfo, kwarn};
use baryon_sched::{Scheduler, TaskId, PRIORITY_IDLE};

use crate::arch::x86::halt;
use crate::taskframe::build_initial_frame;

/// Kernel stack size per task, in 32-bit words (32 KiB).
const STACK_WORDS: usize = 8 * 1024;

static SCHED: IrqLock<Scheduler> = IrqLock::new(Scheduler::new());

/// Runs `f` with the scheduler.
pub fn with<R>(f: impl FnOnce(&mut Scheduler) -> R) -> R {
    f(&mut SCHED.lock())
}

/// Creates the idle task. Called once before the timer starts.
pub fn init() {
    let idle = spawn("idle", idle_task, PRIORITY_IDLE, 0);
    assert!(idle.is_some(), "idle task");
    kinfo!("sched: idle task ready");
}

/// Spawns a kernel task: allocates its stack, seeds the artificial
/// interrupt frame, registers it Ready.
pub fn spawn(name: &str, entry: extern "C" fn() -> !, priority: u8, uid: u8) -> Option<TaskId> {
    // The stack is owned by the task for its whole life; reclaim on
    // zombie-reap is a known simplification (tasks are long-lived).
    let stack = vec![0u32; STACK_WORDS].leak();
    let top = stack.as_ptr() as u32 + (STACK_WORDS as u32) * 4;
    let esp = build_initial_frame(stack, top, entry as usize as u32);

    let id = with(|sched| sched.spawn(name, esp, priority, uid));
    if id.is_none() {
        kwarn!("sched: task table full spawning '{}'", name);
    }
    id
}

/// The uid of the running task (root when none).
#[must_use]
pub fn current_uid() -> u8 {
    with(|sched| {
        sched
            .current()
            .and_then(|id| sched.task(id).map(|t| t.uid))
            .unwrap_or(0)
    })
}

/// Voluntarily yields the CPU.
pub fn yield_now() {
    with(Scheduler::yield_now);
    force_reschedule();
}

/// Sleeps the current task for `ms` milliseconds.
pub fn sleep(ms: u64) {
    let now = crate::time::ticks();
    with(|sched| sched.sleep(now, ms));
    force_reschedule();
}

/// Exits the current task; the slot is reaped on the next decision.
pub fn exit_current() -> ! {
    with(Scheduler::exit_current);
    force_reschedule();
    // The zombie never runs again; if the switch has not happened yet,
    // halt until the timer takes us away.
    loop {
        halt();
    }
}

/// Forces an immediate scheduling decision by raising the timer vector.
fn force_reschedule() {
    // SAFETY: Vector 32 is the timer path; invoking it software-side
    // runs the ordinary scheduling decision.
    unsafe { core::arch::asm!("int 32", options(nostack)) };
}

/// The priority-255 idle task: halt until something happens.
extern "C" fn idle_task() -> ! {
    loop {
        halt();
    }
}
