use crate::process::{self, CommandOutput};
use crate::store::tasks::{self, Task, TaskUpdate};

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::{io, thread, time::Duration};

use chrono::{DateTime, Utc};
use cron::Schedule;
use dashmap::DashMap;
use log::{info, warn};
use once_cell::sync::Lazy;
use thiserror::Error;

// Upper bound on cancellation latency for schedule threads
const SLICE_MS: u64 = 1000;
// Stored output is capped so one chatty task cannot bloat the store
const OUTPUT_TAIL_CHARS: usize = 4000;

// task id -> cancel flag of the thread currently owning that schedule
static RUNNING: Lazy<DashMap<String, Arc<AtomicBool>>> = Lazy::new(DashMap::new);

#[derive(Debug, Error)]
pub enum Error {
    #[error("task '{id}' not found")]
    NotFound { id: String },
    #[error("invalid cron expression '{expr}': {detail}")]
    BadSchedule { expr: String, detail: String },
    #[error("{0}")]
    Store(#[from] anyhow::Error),
    #[error("command failed to run: {0}")]
    Exec(#[from] io::Error),
}

/// Accepts standard 5-field cron by prepending seconds=0. Expressions with
/// 6 or 7 fields pass through unchanged.
pub fn normalize(expr: &str) -> String {
    let fields = expr.split_whitespace().count();
    if fields == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    }
}

pub fn parse(expr: &str) -> Result<Schedule, Error> {
    Schedule::from_str(&normalize(expr))
        .map_err(|err| Error::BadSchedule { expr: expr.into(), detail: err.to_string() })
}

/// Next occurrence after now, `None` for schedules that never fire again.
pub fn next_occurrence(expr: &str) -> Result<Option<DateTime<Utc>>, Error> {
    Ok(parse(expr)?.upcoming(Utc).next())
}

/// Validates the schedule, then persists and (if active) schedules the task.
pub fn create(task: Task) -> Result<Task, Error> {
    parse(&task.schedule)?;
    let task = tasks::create(task)?;
    if task.active {
        schedule(&task)?;
        return Ok(tasks::get(&task.id)?.unwrap_or(task));
    }
    Ok(task)
}

/// Applies store changes and restarts or cancels the schedule thread to match.
pub fn apply_update(id: &str, changes: TaskUpdate) -> Result<Task, Error> {
    tasks::get(id)?.ok_or_else(|| Error::NotFound { id: id.into() })?;
    if let Some(expr) = &changes.schedule {
        parse(expr)?;
    }

    let task = tasks::update(id, changes)?;
    if task.active {
        schedule(&task)?;
    } else {
        cancel(id);
        tasks::set_next_run(id, None)?;
    }
    Ok(tasks::get(id)?.unwrap_or(task))
}

pub fn remove(id: &str) -> Result<(), Error> {
    cancel(id);
    tasks::delete(id)?;
    Ok(())
}

pub fn enable(id: &str) -> Result<Task, Error> {
    let current = tasks::get(id)?.ok_or_else(|| Error::NotFound { id: id.into() })?;
    parse(&current.schedule)?;

    let task = tasks::set_active(id, true)?;
    schedule(&task)?;
    Ok(tasks::get(id)?.unwrap_or(task))
}

pub fn disable(id: &str) -> Result<Task, Error> {
    tasks::get(id)?.ok_or_else(|| Error::NotFound { id: id.into() })?;

    cancel(id);
    let task = tasks::set_active(id, false)?;
    tasks::set_next_run(id, None)?;
    Ok(tasks::get(id)?.unwrap_or(task))
}

/// Spawns the background thread for one task, replacing any thread already
/// registered under the id, and rewrites the stored `next_run`.
pub fn schedule(task: &Task) -> Result<(), Error> {
    let schedule = parse(&task.schedule)?;

    cancel(&task.id);
    let flag = Arc::new(AtomicBool::new(true));
    RUNNING.insert(task.id.clone(), flag.clone());

    tasks::set_next_run(&task.id, schedule.upcoming(Utc).next())?;

    let id = task.id.clone();
    let command = task.command.clone();
    thread::spawn(move || run_loop(id, command, schedule, flag));
    Ok(())
}

/// Stops the schedule thread for `id` if one is registered. The thread
/// notices within one sleep slice.
pub fn cancel(id: &str) {
    if let Some((_, flag)) = RUNNING.remove(id) {
        flag.store(false, Ordering::Relaxed);
    }
}

pub fn is_scheduled(id: &str) -> bool {
    RUNNING.contains_key(id)
}

/// Schedules every active task at daemon startup. Returns how many went live.
pub fn init_all() -> usize {
    let list = match tasks::list() {
        Ok(list) => list,
        Err(err) => {
            warn!("scheduler startup skipped, task store unreadable: {err}");
            return 0;
        }
    };

    let mut scheduled = 0;
    for task in list.into_iter().filter(|task| task.active) {
        match schedule(&task) {
            Ok(()) => {
                scheduled += 1;
                info!("scheduled task '{}' ({})", task.id, task.schedule);
            }
            Err(err) => warn!("task '{}' not scheduled: {err}", task.id),
        }
    }
    scheduled
}

/// Runs the task synchronously, stamps the run and returns the raw output.
pub fn run_now(id: &str) -> Result<CommandOutput, Error> {
    let task = tasks::get(id)?.ok_or_else(|| Error::NotFound { id: id.into() })?;

    let ran_at = Utc::now();
    let output = process::run_sync(&process::shell_argv(&task.command), None)?;

    let combined = combined_output(&output);
    if let Err(err) = tasks::record_run(id, ran_at, task.next_run, Some(tail(&combined))) {
        warn!("failed to record manual run of task '{id}': {err}");
    }
    Ok(output)
}

fn run_loop(id: String, command: String, schedule: Schedule, flag: Arc<AtomicBool>) {
    for target in schedule.upcoming(Utc) {
        loop {
            if !flag.load(Ordering::Relaxed) {
                return;
            }
            let remaining = target.signed_duration_since(Utc::now()).num_milliseconds();
            if remaining <= 0 {
                break;
            }
            thread::sleep(Duration::from_millis((remaining as u64).min(SLICE_MS)));
        }
        if !flag.load(Ordering::Relaxed) {
            return;
        }

        fire(&id, &command, schedule.upcoming(Utc).next());
    }

    // schedule ran out of occurrences
    deregister(&id, &flag);
}

// A replacement thread may own the registry slot by now, so only remove
// the entry when it still holds our own flag.
fn deregister(id: &str, flag: &Arc<AtomicBool>) {
    RUNNING.remove_if(id, |_, current| Arc::ptr_eq(current, flag));
}

fn fire(id: &str, command: &str, next: Option<DateTime<Utc>>) {
    let ran_at = Utc::now();
    let output = match process::run_sync(&process::shell_argv(command), None) {
        Ok(out) => tail(&combined_output(&out)),
        Err(err) => {
            warn!("task '{id}' failed to run: {err}");
            format!("failed to run: {err}")
        }
    };

    if let Err(err) = tasks::record_run(id, ran_at, next, Some(output)) {
        warn!("failed to record run of task '{id}': {err}");
    }
}

fn combined_output(out: &CommandOutput) -> String {
    let mut text = out.stdout.clone();
    if !out.stderr.is_empty() {
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&out.stderr);
    }
    text
}

fn tail(text: &str) -> String {
    if text.len() <= OUTPUT_TAIL_CHARS {
        return text.into();
    }
    let mut cut = text.len() - OUTPUT_TAIL_CHARS;
    while !text.is_char_boundary(cut) {
        cut += 1;
    }
    text[cut..].into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: &str, schedule: &str, command: &str, active: bool) -> Task {
        Task {
            id: id.into(),
            name: id.into(),
            schedule: schedule.into(),
            command: command.into(),
            active,
            kind: None,
            last_run: None,
            next_run: None,
            last_run_output: None,
        }
    }

    fn wait_until(mut done: impl FnMut() -> bool) -> bool {
        for _ in 0..50 {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(100));
        }
        false
    }

    #[test]
    fn test_normalize_prepends_seconds() {
        assert_eq!(normalize("0 3 * * *"), "0 0 3 * * *");
        assert_eq!(normalize("*/5 * * * * *"), "*/5 * * * * *");
        assert_eq!(normalize("0 0 1 1 * * 2099"), "0 0 1 1 * * 2099");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse("0 3 * * *").is_ok());
        assert!(parse("* * * * * *").is_ok());
        assert!(matches!(parse("not a schedule"), Err(Error::BadSchedule { .. })));
        assert!(matches!(parse("99 99 * * *"), Err(Error::BadSchedule { .. })));
    }

    #[test]
    fn test_next_occurrence_is_in_the_future() {
        let next = next_occurrence("* * * * * *").unwrap().unwrap();
        let gap = next.signed_duration_since(Utc::now()).num_seconds();
        assert!((0..=2).contains(&gap));
    }

    #[test]
    fn test_tail_cuts_on_char_boundary() {
        assert_eq!(tail("short"), "short");

        let long = "é".repeat(OUTPUT_TAIL_CHARS);
        let cut = tail(&long);
        assert!(cut.len() <= OUTPUT_TAIL_CHARS);
        assert!(cut.chars().all(|c| c == 'é'));
    }

    #[test]
    fn test_create_rejects_bad_schedule() {
        crate::testenv::init();
        let result = create(sample("broken", "whenever", "echo hi", false));
        assert!(matches!(result, Err(Error::BadSchedule { .. })));
    }

    #[test]
    fn test_scheduled_task_fires_and_records() {
        crate::testenv::init();
        create(sample("ticker", "* * * * * *", "echo tick", true)).unwrap();
        assert!(is_scheduled("ticker"));

        assert!(wait_until(|| {
            tasks::get("ticker").unwrap().unwrap().last_run.is_some()
        }));
        let task = tasks::get("ticker").unwrap().unwrap();
        assert!(task.next_run.is_some());
        assert!(task.last_run_output.unwrap().contains("tick"));

        cancel("ticker");
        assert!(!is_scheduled("ticker"));
    }

    #[test]
    fn test_enable_disable_round_trip() {
        crate::testenv::init();
        create(sample("toggle", "0 3 * * *", "echo hi", false)).unwrap();
        assert!(!is_scheduled("toggle"));

        let task = enable("toggle").unwrap();
        assert!(task.active);
        assert!(task.next_run.is_some());
        assert!(is_scheduled("toggle"));

        let task = disable("toggle").unwrap();
        assert!(!task.active);
        assert!(task.next_run.is_none());
        assert!(!is_scheduled("toggle"));
    }

    #[test]
    fn test_run_now_captures_output() {
        crate::testenv::init();
        create(sample("manual", "0 3 * * *", "echo manual-run", false)).unwrap();

        let output = run_now("manual").unwrap();
        assert_eq!(output.code, Some(0));
        assert!(output.stdout.contains("manual-run"));

        let task = tasks::get("manual").unwrap().unwrap();
        assert!(task.last_run.is_some());
        assert!(task.last_run_output.unwrap().contains("manual-run"));

        assert!(matches!(run_now("absent"), Err(Error::NotFound { .. })));
    }

    #[test]
    fn test_update_restarts_active_schedule() {
        crate::testenv::init();
        create(sample("shifty", "* * * * * *", "echo a", true)).unwrap();
        assert!(is_scheduled("shifty"));

        let changes = TaskUpdate { command: Some("echo b".into()), ..TaskUpdate::default() };
        let task = apply_update("shifty", changes).unwrap();
        assert_eq!(task.command, "echo b");
        assert!(is_scheduled("shifty"));

        remove("shifty").unwrap();
        assert!(!is_scheduled("shifty"));
        assert!(tasks::get("shifty").unwrap().is_none());
    }
}
