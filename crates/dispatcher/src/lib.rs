//! Dispatcher
//!
//! 决定“什么时候执行什么”：时间槽评估、任务生命周期状态机，以及把工作池
//! 的执行回报写回任务表的状态监听器。

pub mod state_listener;
pub mod state_machine;
pub mod time_slot_scheduler;

pub use state_listener::StateListener;
pub use state_machine::{SlotTracker, TaskEntry, TaskStateMachine, TaskTable};
pub use time_slot_scheduler::{DueTask, TickOutcome, TimeSlotScheduler};
