//! Task control blocks.

/// Maximum number of live tasks.
pub const MAX_TASKS: usize = 64;
/// Maximum task name length in bytes.
pub const NAME_LEN: usize = 32;

/// Stable index of a task in the scheduler arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskId(u8);

impl TaskId {
    /// Builds an id from an arena slot index.
    #[must_use]
    pub(crate) fn new(index: usize) -> Self {
        debug_assert!(index < MAX_TASKS);
        #[allow(clippy::cast_possible_truncation)]
        let index = index as u8;
        Self(index)
    }

    /// The arena slot this id refers to.
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Runnable, waiting in a priority queue.
    Ready,
    /// Currently on the CPU. Exactly one task is Running.
    Running,
    /// Waiting on a resource; not in any queue.
    Blocked,
    /// Exited; the slot is reclaimed on the next scheduling decision.
    Zombie,
    /// Waiting for a wake tick.
    Sleeping,
}

/// Why a blocked task is blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    /// Not blocked.
    None,
    /// Waiting for disk I/O.
    Io,
    /// Waiting for an input event.
    Input,
    /// Waiting for network activity.
    Net,
    /// Waiting for a child task to exit.
    Child,
}

/// A task control block.
///
/// The task exclusively owns its kernel stack; `esp` is the saved stack
/// pointer of its interrupt frame while it is not running.
#[derive(Debug, Clone)]
pub struct Task {
    /// Arena id.
    pub id: TaskId,
    /// Owning user id (0 = root).
    pub uid: u8,
    /// Priority, 0 = highest, 255 = idle.
    pub priority: u8,
    /// Lifecycle state.
    pub state: TaskState,
    /// Reason while `state == Blocked`.
    pub block_reason: BlockReason,
    /// Saved stack pointer (top of the interrupt frame).
    pub esp: u32,
    /// Remaining time quantum in ticks.
    pub slice: u32,
    /// Total ticks spent running.
    pub time_used: u64,
    /// Absolute tick at which a Sleeping task wakes.
    pub wake_tick: u64,
    /// Queue link: next task in the same priority queue.
    pub(crate) next: Option<TaskId>,
    name: [u8; NAME_LEN],
    name_len: u8,
}

impl Task {
    /// Creates a Ready task with a fresh control block.
    pub(crate) fn new(id: TaskId, name: &str, esp: u32, priority: u8, uid: u8) -> Self {
        let mut buf = [0u8; NAME_LEN];
        let bytes = name.as_bytes();
        let len = bytes.len().min(NAME_LEN);
        buf[..len].copy_from_slice(&bytes[..len]);
        #[allow(clippy::cast_possible_truncation)]
        let name_len = len as u8;
        Self {
            id,
            uid,
            priority,
            state: TaskState::Ready,
            block_reason: BlockReason::None,
            esp,
            slice: 0,
            time_used: 0,
            wake_tick: 0,
            next: None,
            name: buf,
            name_len,
        }
    }

    /// The task's name.
    #[must_use]
    pub fn name(&self) -> &str {
        core::str::from_utf8(&self.name[..self.name_len as usize]).unwrap_or("?")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_is_truncated_to_capacity() {
        let long = "x".repeat(NAME_LEN + 10);
        let task = Task::new(TaskId::new(0), &long, 0, 10, 0);
        assert_eq!(task.name().len(), NAME_LEN);
    }

    #[test]
    fn new_task_is_ready() {
        let task = Task::new(TaskId::new(1), "net", 0x8000, 32, 0);
        assert_eq!(task.state, TaskState::Ready);
        assert_eq!(task.block_reason, BlockReason::None);
        assert_eq!(task.name(), "net");
    }
}
