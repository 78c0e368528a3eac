//! Preemptive priority scheduler.
//!
//! 256 priority levels (0 = highest, 255 = idle), FIFO round-robin within
//! a level, preemption driven by the timer tick. Tasks live in a fixed
//! arena and every reference between scheduler structures is a [`TaskId`]
//! index, never a pointer; the ready queues are intrusive lists threaded
//! through the arena.
//!
//! The crate is pure state-machine logic: the timer ISR calls
//! [`Scheduler::tick`] and then [`Scheduler::schedule`], which returns the
//! stack pointer the interrupt stub should resume on. Building the initial
//! stack frame for a new task is the kernel's business; the scheduler only
//! sees the resulting stack pointer.

#![cfg_attr(not(test), no_std)]

use baryon_core::kdebug;

mod task;

pub use task::{BlockReason, Task, TaskId, TaskState, MAX_TASKS, NAME_LEN};

/// Number of priority levels.
pub const PRIORITY_LEVELS: usize = 256;
/// Priority of the idle task.
pub const PRIORITY_IDLE: u8 = 255;
/// Default priority for kernel threads.
pub const PRIORITY_KERNEL: u8 = 32;
/// Default priority for user tasks.
pub const PRIORITY_USER: u8 = 128;
/// Default time quantum in ticks.
pub const DEFAULT_SLICE: u32 = 10;
/// Timer tick period in milliseconds (50 Hz).
pub const TICK_MS: u64 = 20;

/// Counters exposed for diagnostics.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchedStats {
    /// Total context switches performed.
    pub context_switches: u64,
    /// Tasks created over the lifetime of the scheduler.
    pub tasks_created: u64,
    /// Tasks reaped after exiting.
    pub tasks_destroyed: u64,
}

/// The scheduler: task arena, ready queues, and the running task.
pub struct Scheduler {
    tasks: [Option<Task>; MAX_TASKS],
    heads: [Option<TaskId>; PRIORITY_LEVELS],
    tails: [Option<TaskId>; PRIORITY_LEVELS],
    current: Option<TaskId>,
    /// Minimum priority index that may have a non-empty queue. Monotone
    /// hint: lowered eagerly on enqueue, raised lazily during picks.
    highest_ready: u8,
    default_slice: u32,
    stats: SchedStats,
}

impl Scheduler {
    /// Creates an empty scheduler with the default time slice.
    #[must_use]
    pub const fn new() -> Self {
        Self::with_slice(DEFAULT_SLICE)
    }

    /// Creates an empty scheduler with a custom default time slice.
    #[must_use]
    pub const fn with_slice(slice: u32) -> Self {
        Self {
            tasks: [const { None }; MAX_TASKS],
            heads: [None; PRIORITY_LEVELS],
            tails: [None; PRIORITY_LEVELS],
            current: None,
            highest_ready: PRIORITY_IDLE,
            default_slice: slice,
            stats: SchedStats {
                context_switches: 0,
                tasks_created: 0,
                tasks_destroyed: 0,
            },
        }
    }

    /// Registers a new task and makes it Ready.
    ///
    /// `esp` is the stack pointer of the artificial interrupt frame the
    /// kernel laid out on the task's stack. Returns `None` when the arena
    /// is full.
    pub fn spawn(&mut self, name: &str, esp: u32, priority: u8, uid: u8) -> Option<TaskId> {
        let slot = self.tasks.iter().position(Option::is_none)?;
        let id = TaskId::new(slot);
        let mut task = Task::new(id, name, esp, priority, uid);
        task.slice = self.default_slice;
        self.tasks[slot] = Some(task);
        self.stats.tasks_created += 1;
        self.enqueue(id, priority);
        kdebug!("sched: '{}' ready at priority {}", name, priority);
        Some(id)
    }

    /// Removes a task entirely (queue and arena).
    pub fn remove(&mut self, id: TaskId) {
        let Some(task) = self.task(id) else { return };
        let priority = task.priority;
        if task.state == TaskState::Ready {
            self.unlink(id, priority);
        }
        if self.current == Some(id) {
            self.current = None;
        }
        self.tasks[id.index()] = None;
        self.stats.tasks_destroyed += 1;
    }

    /// Returns a shared view of a task.
    #[must_use]
    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks[id.index()].as_ref()
    }

    /// Returns the currently running task id.
    #[must_use]
    pub fn current(&self) -> Option<TaskId> {
        self.current
    }

    /// Returns scheduler counters.
    #[must_use]
    pub fn stats(&self) -> SchedStats {
        self.stats
    }

    /// Blocks the current task with `reason` and forces a reschedule on
    /// the next [`schedule`](Self::schedule) call.
    pub fn block(&mut self, reason: BlockReason) {
        if let Some(id) = self.current {
            if let Some(task) = self.tasks[id.index()].as_mut() {
                task.state = TaskState::Blocked;
                task.block_reason = reason;
                task.slice = 0;
            }
        }
    }

    /// Makes a blocked task Ready again.
    pub fn unblock(&mut self, id: TaskId) {
        let Some(task) = self.tasks[id.index()].as_mut() else {
            return;
        };
        if task.state != TaskState::Blocked {
            return;
        }
        task.state = TaskState::Ready;
        task.block_reason = BlockReason::None;
        let priority = task.priority;
        self.enqueue(id, priority);
        self.maybe_preempt(priority);
    }

    /// Voluntarily gives up the remainder of the time slice.
    pub fn yield_now(&mut self) {
        if let Some(id) = self.current {
            if let Some(task) = self.tasks[id.index()].as_mut() {
                task.slice = 0;
            }
        }
    }

    /// Puts the current task to sleep for `ms` milliseconds.
    pub fn sleep(&mut self, now: u64, ms: u64) {
        if let Some(id) = self.current {
            if let Some(task) = self.tasks[id.index()].as_mut() {
                task.state = TaskState::Sleeping;
                task.wake_tick = now + ms.div_ceil(TICK_MS).max(1);
                task.slice = 0;
            }
        }
    }

    /// Marks the current task as exited; the arena slot is reclaimed by
    /// the next scheduling decision.
    pub fn exit_current(&mut self) {
        if let Some(id) = self.current {
            if let Some(task) = self.tasks[id.index()].as_mut() {
                task.state = TaskState::Zombie;
                task.slice = 0;
            }
        }
    }

    /// Changes a task's priority, re-queueing it if it is Ready.
    pub fn set_priority(&mut self, id: TaskId, priority: u8) {
        let Some(task) = self.task(id) else { return };
        let old = task.priority;
        if old == priority {
            return;
        }
        let ready = task.state == TaskState::Ready;
        if ready {
            self.unlink(id, old);
        }
        if let Some(task) = self.tasks[id.index()].as_mut() {
            task.priority = priority;
        }
        if ready {
            self.enqueue(id, priority);
        }
    }

    /// Timer tick: burns one slice tick of the running task and wakes any
    /// sleeper whose deadline has passed.
    pub fn tick(&mut self, now: u64) {
        if let Some(id) = self.current {
            if let Some(task) = self.tasks[id.index()].as_mut() {
                if task.slice > 0 {
                    task.slice -= 1;
                    task.time_used += 1;
                }
            }
        }

        for slot in 0..MAX_TASKS {
            let wake = matches!(
                self.tasks[slot],
                Some(ref t) if t.state == TaskState::Sleeping && t.wake_tick <= now
            );
            if wake {
                let id = TaskId::new(slot);
                let priority = self.tasks[slot].as_ref().map_or(PRIORITY_IDLE, |t| t.priority);
                if let Some(task) = self.tasks[slot].as_mut() {
                    task.state = TaskState::Ready;
                    task.wake_tick = 0;
                }
                self.enqueue(id, priority);
                self.maybe_preempt(priority);
            }
        }
    }

    /// Expires the running task's slice when a strictly higher-priority
    /// task has just become Ready, so the next decision dispatches it.
    fn maybe_preempt(&mut self, woken_priority: u8) {
        if let Some(id) = self.current {
            if let Some(task) = self.tasks[id.index()].as_mut() {
                if task.state == TaskState::Running && woken_priority < task.priority {
                    task.slice = 0;
                }
            }
        }
    }

    /// The scheduling decision, run at the tail of the timer interrupt.
    ///
    /// Takes the interrupted stack pointer and returns the one to resume
    /// on; when they differ, the IRQ stub switches stacks before IRET.
    pub fn schedule(&mut self, current_esp: u32) -> u32 {
        // 1. Nothing to do while the running task still has slice left.
        if let Some(id) = self.current {
            if let Some(task) = self.tasks[id.index()].as_ref() {
                if task.state == TaskState::Running && task.slice > 0 {
                    return current_esp;
                }
            }
        }

        // 2. Save the outgoing context and park or reap the task.
        if let Some(id) = self.current {
            let reap = {
                let Some(task) = self.tasks[id.index()].as_mut() else {
                    self.current = None;
                    return current_esp;
                };
                task.esp = current_esp;
                if task.state == TaskState::Running {
                    task.state = TaskState::Ready;
                }
                task.state == TaskState::Zombie
            };
            if reap {
                self.tasks[id.index()] = None;
                self.stats.tasks_destroyed += 1;
                self.current = None;
            } else if self.tasks[id.index()].as_ref().map(|t| t.state) == Some(TaskState::Ready) {
                let priority = self.tasks[id.index()].as_ref().map_or(0, |t| t.priority);
                self.enqueue(id, priority);
            }
        }

        // 3. Pick the head of the highest-priority non-empty queue.
        let Some(next) = self.pick() else {
            // Only reachable before the idle task exists.
            return current_esp;
        };

        // 4. Dispatch.
        let same = self.current == Some(next);
        self.current = Some(next);
        let slice = self.default_slice;
        let esp = {
            let task = self.tasks[next.index()].as_mut().expect("picked task exists");
            task.state = TaskState::Running;
            task.slice = slice;
            task.esp
        };
        if !same {
            self.stats.context_switches += 1;
        }
        esp
    }

    /// Dequeues the best ready task.
    fn pick(&mut self) -> Option<TaskId> {
        let mut level = self.highest_ready as usize;
        loop {
            if let Some(id) = self.dequeue(level as u8) {
                self.highest_ready = level as u8;
                return Some(id);
            }
            // Lazy refresh of the hint: this level is empty, move on.
            if level == PRIORITY_LEVELS - 1 {
                self.highest_ready = PRIORITY_IDLE;
                return None;
            }
            level += 1;
        }
    }

    /// Appends a task to the tail of its priority queue.
    fn enqueue(&mut self, id: TaskId, priority: u8) {
        if let Some(task) = self.tasks[id.index()].as_mut() {
            task.next = None;
        }
        match self.tails[priority as usize] {
            None => {
                self.heads[priority as usize] = Some(id);
                self.tails[priority as usize] = Some(id);
            }
            Some(tail) => {
                if let Some(task) = self.tasks[tail.index()].as_mut() {
                    task.next = Some(id);
                }
                self.tails[priority as usize] = Some(id);
            }
        }
        if priority < self.highest_ready {
            self.highest_ready = priority;
        }
    }

    /// Pops the head of a priority queue.
    fn dequeue(&mut self, priority: u8) -> Option<TaskId> {
        let head = self.heads[priority as usize]?;
        let next = self.tasks[head.index()].as_ref().and_then(|t| t.next);
        self.heads[priority as usize] = next;
        if next.is_none() {
            self.tails[priority as usize] = None;
        }
        if let Some(task) = self.tasks[head.index()].as_mut() {
            task.next = None;
        }
        Some(head)
    }

    /// Removes a task from the middle of its priority queue.
    fn unlink(&mut self, id: TaskId, priority: u8) {
        let mut prev: Option<TaskId> = None;
        let mut cur = self.heads[priority as usize];
        while let Some(c) = cur {
            let next = self.tasks[c.index()].as_ref().and_then(|t| t.next);
            if c == id {
                match prev {
                    None => self.heads[priority as usize] = next,
                    Some(p) => {
                        if let Some(task) = self.tasks[p.index()].as_mut() {
                            task.next = next;
                        }
                    }
                }
                if self.tails[priority as usize] == Some(id) {
                    self.tails[priority as usize] = prev;
                }
                if let Some(task) = self.tasks[id.index()].as_mut() {
                    task.next = None;
                }
                return;
            }
            prev = cur;
            cur = next;
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Runs one full timer interrupt: tick then schedule.
    fn timer_irq(sched: &mut Scheduler, now: u64) -> u32 {
        sched.tick(now);
        sched.schedule(0xDEAD_0000)
    }

    fn ticks_used(sched: &Scheduler, id: TaskId) -> u64 {
        sched.task(id).map_or(0, |t| t.time_used)
    }

    #[test]
    fn spawn_and_first_dispatch() {
        let mut sched = Scheduler::new();
        let idle = sched.spawn("idle", 0x1000, PRIORITY_IDLE, 0).unwrap();
        let a = sched.spawn("a", 0x2000, 10, 0).unwrap();
        sched.schedule(0);
        assert_eq!(sched.current(), Some(a));
        assert_eq!(sched.task(a).unwrap().state, TaskState::Running);
        assert_eq!(sched.task(idle).unwrap().state, TaskState::Ready);
    }

    #[test]
    fn round_robin_is_fair_within_a_level() {
        // Two tasks at priority 10, slice 5: over 30 ticks each runs 15.
        let mut sched = Scheduler::with_slice(5);
        sched.spawn("idle", 0, PRIORITY_IDLE, 0).unwrap();
        let a = sched.spawn("a", 0xA000, 10, 0).unwrap();
        let b = sched.spawn("b", 0xB000, 10, 0).unwrap();
        let c = sched.spawn("c", 0xC000, 20, 0).unwrap();
        sched.schedule(0);
        for now in 1..=30 {
            timer_irq(&mut sched, now);
        }
        assert_eq!(ticks_used(&sched, a), 15);
        assert_eq!(ticks_used(&sched, b), 15);
        assert_eq!(ticks_used(&sched, c), 0);
    }

    #[test]
    fn higher_priority_always_wins() {
        let mut sched = Scheduler::new();
        sched.spawn("idle", 0, PRIORITY_IDLE, 0).unwrap();
        let low = sched.spawn("low", 0x1000, 200, 0).unwrap();
        sched.schedule(0);
        assert_eq!(sched.current(), Some(low));
        let high = sched.spawn("high", 0x2000, 5, 0).unwrap();
        // Low task's slice expires; high must be picked next.
        sched.yield_now();
        sched.schedule(0x1111);
        assert_eq!(sched.current(), Some(high));
        // And low never runs again while high stays runnable.
        for now in 1..=50 {
            timer_irq(&mut sched, now);
            assert_eq!(sched.current(), Some(high));
        }
    }

    #[test]
    fn schedule_returns_saved_esp_of_next_task() {
        let mut sched = Scheduler::new();
        sched.spawn("idle", 0x1D1E, PRIORITY_IDLE, 0).unwrap();
        let a = sched.spawn("a", 0xAAAA, 10, 0).unwrap();
        let b = sched.spawn("b", 0xBBBB, 10, 0).unwrap();
        assert_eq!(sched.schedule(0), 0xAAAA);
        assert_eq!(sched.current(), Some(a));
        sched.yield_now();
        // The outgoing esp is saved and the incoming one returned.
        assert_eq!(sched.schedule(0xA1A1), 0xBBBB);
        assert_eq!(sched.current(), Some(b));
        assert_eq!(sched.task(a).unwrap().esp, 0xA1A1);
    }

    #[test]
    fn block_and_unblock_round_trip() {
        let mut sched = Scheduler::new();
        sched.spawn("idle", 0, PRIORITY_IDLE, 0).unwrap();
        let a = sched.spawn("a", 0xA000, 10, 0).unwrap();
        let b = sched.spawn("b", 0xB000, 10, 0).unwrap();
        sched.schedule(0);
        assert_eq!(sched.current(), Some(a));
        sched.block(BlockReason::Io);
        sched.schedule(0xA1);
        assert_eq!(sched.current(), Some(b));
        assert_eq!(sched.task(a).unwrap().state, TaskState::Blocked);
        sched.unblock(a);
        assert_eq!(sched.task(a).unwrap().state, TaskState::Ready);
        sched.yield_now();
        sched.schedule(0xB1);
        assert_eq!(sched.current(), Some(a));
    }

    #[test]
    fn sleeper_wakes_after_deadline() {
        let mut sched = Scheduler::new();
        let idle = sched.spawn("idle", 0, PRIORITY_IDLE, 0).unwrap();
        let a = sched.spawn("a", 0xA000, 10, 0).unwrap();
        sched.schedule(0);
        sched.sleep(0, 100); // 5 ticks at 20 ms/tick
        sched.schedule(0xA1);
        assert_eq!(sched.current(), Some(idle));
        for now in 1..=4 {
            timer_irq(&mut sched, now);
            assert_eq!(sched.current(), Some(idle));
        }
        timer_irq(&mut sched, 5);
        assert_eq!(sched.current(), Some(a));
    }

    #[test]
    fn zombie_is_reaped_on_next_decision() {
        let mut sched = Scheduler::new();
        sched.spawn("idle", 0, PRIORITY_IDLE, 0).unwrap();
        let a = sched.spawn("a", 0xA000, 10, 0).unwrap();
        sched.schedule(0);
        assert_eq!(sched.current(), Some(a));
        sched.exit_current();
        sched.schedule(0xA1);
        assert!(sched.task(a).is_none());
        assert_eq!(sched.stats().tasks_destroyed, 1);
    }

    #[test]
    fn set_priority_requeues_ready_task() {
        let mut sched = Scheduler::new();
        sched.spawn("idle", 0, PRIORITY_IDLE, 0).unwrap();
        let a = sched.spawn("a", 0xA000, 10, 0).unwrap();
        let b = sched.spawn("b", 0xB000, 20, 0).unwrap();
        sched.schedule(0);
        assert_eq!(sched.current(), Some(a));
        // Promote b above a; after a's slice it takes over.
        sched.set_priority(b, 5);
        sched.yield_now();
        sched.schedule(0xA1);
        assert_eq!(sched.current(), Some(b));
    }

    #[test]
    fn arena_exhaustion_returns_none() {
        let mut sched = Scheduler::new();
        for i in 0..MAX_TASKS {
            assert!(sched.spawn("t", i as u32, 10, 0).is_some());
        }
        assert!(sched.spawn("overflow", 0, 10, 0).is_none());
    }

    #[test]
    fn context_switch_counter_increments() {
        let mut sched = Scheduler::with_slice(1);
        sched.spawn("idle", 0, PRIORITY_IDLE, 0).unwrap();
        sched.spawn("a", 0xA000, 10, 0).unwrap();
        sched.spawn("b", 0xB000, 10, 0).unwrap();
        sched.schedule(0);
        let before = sched.stats().context_switches;
        for now in 1..=4 {
            timer_irq(&mut sched, now);
        }
        assert_eq!(sched.stats().context_switches, before + 4);
    }
}
