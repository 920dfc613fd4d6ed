use tracing::{debug, info_span};

use chronoforge_core::models::{TaskExecutionRecord, TaskState, TimeSlot};
use chronoforge_core::StructuredLogger;

use crate::state_machine::{SlotTracker, TaskTable};

/// 点触发的最小容忍窗口
const MIN_POINT_GRACE_MS: i64 = 60_000;

/// 本次 tick 判定为到期的任务
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueTask {
    pub name: String,
    /// 触发时刻（点触发时刻或窗口起点）
    pub due_at_ms: i64,
}

#[derive(Debug, Default)]
pub struct TickOutcome {
    /// 按 (due_at_ms, name) 排序，已转入 Scheduled
    pub due: Vec<DueTask>,
    /// 仍在排队或运行而被跳过的任务
    pub skipped: Vec<String>,
}

/// 时间槽调度器
///
/// 每个 tick 对任务表做一次评估，决定哪些任务到期。调度器本身不执行任务，
/// 只负责把到期任务转入 Scheduled 并交给调用方分发。
#[derive(Debug, Clone)]
pub struct TimeSlotScheduler {
    tick_interval_ms: i64,
}

impl TimeSlotScheduler {
    pub fn new(tick_interval_ms: u64) -> Self {
        Self {
            tick_interval_ms: i64::try_from(tick_interval_ms).unwrap_or(i64::MAX),
        }
    }

    /// 点触发判定的容忍窗口：至少一分钟，且不小于 tick 间隔，避免 tick 跨过整分钟时漏触发
    pub fn point_grace_ms(&self) -> i64 {
        self.tick_interval_ms.max(MIN_POINT_GRACE_MS)
    }

    /// 若在 `now_ms` 到期，返回本次触发的去重键
    pub fn due_occurrence(&self, slot: &TimeSlot, tracker: &SlotTracker, now_ms: i64) -> Option<i64> {
        let occurrence = match slot {
            TimeSlot::Point { .. } => {
                let latest = slot.latest_point_occurrence(now_ms)?;
                (now_ms - latest < self.point_grace_ms()).then_some(latest)?
            }
            TimeSlot::Window { .. } => slot.window_at(now_ms)?.start(),
        };
        (!tracker.has_fired(occurrence)).then_some(occurrence)
    }

    /// 评估一次 tick
    ///
    /// - 上一次运行已结束的任务先回到 Idle
    /// - 到期且空闲的任务转入 Scheduled
    /// - 到期但仍在排队或运行的任务记录一次跳过，本次触发被消费，不会补发
    pub fn collect_due(&self, table: &mut TaskTable, now_ms: i64) -> TickOutcome {
        let span = info_span!("collect_due", now_ms = now_ms);
        let _guard = span.enter();

        let mut outcome = TickOutcome::default();
        for entry in table.iter_mut() {
            entry.settle();

            let slot = entry.spec().time_slot;
            if let Some(occurrence) = self.due_occurrence(&slot, &entry.tracker, now_ms) {
                entry.tracker.mark_fired(occurrence);
                let name = entry.name().to_string();

                if entry.state().is_busy() {
                    StructuredLogger::log_task_skipped(&name, "任务仍在运行");
                    entry.push_record(TaskExecutionRecord::skipped(
                        name.as_str(),
                        now_ms,
                        "previous run still in progress",
                    ));
                    outcome.skipped.push(name);
                } else if entry.transition(TaskState::Scheduled).is_ok() {
                    outcome.due.push(DueTask {
                        name,
                        due_at_ms: occurrence,
                    });
                }
            }
            entry.next_fire_ms = slot.next_fire_after(now_ms);
        }

        outcome
            .due
            .sort_by(|a, b| a.due_at_ms.cmp(&b.due_at_ms).then_with(|| a.name.cmp(&b.name)));
        if !outcome.due.is_empty() || !outcome.skipped.is_empty() {
            debug!(due = outcome.due.len(), skipped = outcome.skipped.len(), "tick 评估完成");
        }
        outcome
    }
}
