//! Cron registry for the updater jobs.
//!
//! Each registered job gets its own thread: ticks run to completion before
//! the next firing is considered, so a job never overlaps itself. A
//! panicking tick is caught and logged; it must neither kill the process
//! nor suppress future ticks. Schedules are evaluated in local time.

use std::panic::AssertUnwindSafe;
use std::str::FromStr;

use anyhow::Context;
use chrono::Local;
use cron::Schedule;

struct Job {
    name: String,
    schedule: Schedule,
    task: Box<dyn Fn() + Send + 'static>
}

#[derive(Default)]
pub struct UpdaterScheduler {
    jobs: Vec<Job>
}

impl UpdaterScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job under a cron expression (with a seconds field,
    /// e.g. `0 */10 * * * *`).
    pub fn register(&mut self, name: impl Into<String>, cron_expr: &str, task: impl Fn() + Send + 'static) -> anyhow::Result<()> {
        let name = name.into();

        let schedule = Schedule::from_str(cron_expr)
            .with_context(|| format!("invalid cron expression {cron_expr:?} for job {name}"))?;

        tracing::info!("{name} registered cron: {cron_expr}");

        self.jobs.push(Job {
            name,
            schedule,
            task: Box::new(task)
        });

        Ok(())
    }

    /// Spawn the job threads and return. Threads run for the lifetime of
    /// the process.
    pub fn start(self) {
        for job in self.jobs {
            std::thread::spawn(move || run_job(job));
        }
    }
}

fn run_job(job: Job) {
    loop {
        let Some(next) = job.schedule.upcoming(Local).next() else {
            tracing::warn!("{} has no future firings, stopping", job.name);
            return;
        };

        let wait = (next - Local::now()).to_std().unwrap_or_default();

        std::thread::sleep(wait);

        if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(&job.task)) {
            tracing::error!("{} tick panicked: {}", job.name, panic_message(&panic));
        }
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        return message.to_string();
    }

    if let Some(message) = panic.downcast_ref::<String>() {
        return message.clone();
    }

    String::from("unknown panic")
}
