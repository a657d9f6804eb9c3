//! Alarm sources: the daily pivot alarm and the periodic frost re-check

use crate::clock::Clock;
use crate::error::EngineError;
use chrono::{DateTime, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc};
use cron::Schedule;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Cron expression firing every day at the pivot
#[must_use]
pub fn daily_expression(pivot: NaiveTime) -> String {
    format!("0 {} {} * * *", pivot.minute(), pivot.hour())
}

/// Parse the daily cron schedule for a pivot
pub fn daily_schedule(pivot: NaiveTime) -> Result<Schedule, EngineError> {
    let expression = daily_expression(pivot);
    Schedule::from_str(&expression)
        .map_err(|e| EngineError::InvalidCron(format!("{expression}: {e}")))
}

/// Next pivot alarm strictly after `after`
pub fn next_fire_after<Tz: TimeZone>(
    pivot: NaiveTime,
    after: &DateTime<Tz>,
) -> Result<Option<DateTime<Tz>>, EngineError> {
    Ok(daily_schedule(pivot)?.after(after).next())
}

/// Next pivot alarm strictly after a wall-clock reading
pub fn next_local_fire(
    pivot: NaiveTime,
    now: NaiveDateTime,
) -> Result<Option<NaiveDateTime>, EngineError> {
    let anchored = Utc.from_utc_datetime(&now);
    Ok(next_fire_after(pivot, &anchored)?.map(|next| next.naive_utc()))
}

/// Spawn the daily alarm task
///
/// The task sleeps until the next pivot as read from `clock` and then
/// awaits `on_fire`. A new value on `pivot_rx` reschedules it immediately;
/// the task ends when the sender is dropped.
pub fn spawn_daily<F, Fut>(
    label: String,
    clock: Arc<dyn Clock>,
    mut pivot_rx: watch::Receiver<NaiveTime>,
    on_fire: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        loop {
            let pivot = *pivot_rx.borrow_and_update();
            let now = clock.now();
            let next = match next_local_fire(pivot, now) {
                Ok(Some(next)) => next,
                Ok(None) => {
                    tracing::warn!("[{}] No upcoming pivot alarm for {}", label, pivot);
                    break;
                }
                Err(e) => {
                    tracing::error!("[{}] Cannot schedule pivot alarm: {}", label, e);
                    break;
                }
            };

            let duration = (next - now)
                .to_std()
                .unwrap_or(Duration::from_secs(1));

            tracing::debug!(
                "[{}] Next pivot alarm at {} (in {:?})",
                label,
                next,
                duration
            );

            tokio::select! {
                () = tokio::time::sleep(duration) => {
                    tracing::info!("[{}] Pivot alarm fired", label);
                    on_fire().await;
                    // Small delay to avoid double-firing
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                changed = pivot_rx.changed() => {
                    if changed.is_err() {
                        tracing::debug!("[{}] Pivot channel closed, stopping alarm", label);
                        break;
                    }
                    tracing::debug!("[{}] Pivot changed, rescheduling alarm", label);
                }
            }
        }
    })
}

/// Spawn a task awaiting `on_tick` every `period`, skipping the immediate first tick
pub fn spawn_interval<F, Fut>(label: String, period: Duration, on_tick: F) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // Skip the first immediate tick
        interval.tick().await;

        loop {
            interval.tick().await;
            tracing::debug!("[{}] Interval tick", label);
            on_tick().await;
        }
    })
}
