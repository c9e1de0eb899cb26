//! Scheduled-job trigger
//!
//! Fires on a cron expression or fixed interval, performs the
//! outbound fetch, and hands the body to the module through the
//! registry. A transient fetch failure is logged and the job stays
//! scheduled for its next occurrence; there is no retry within the
//! same firing.

use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use pdi_common::{PdiError, Result};

use super::{TriggerDelivery, TriggerPayload};
use crate::config::ScheduleKind;
use crate::fetch::ApiFetcher;

#[derive(Clone)]
enum ParsedSchedule {
    Cron(Box<cron::Schedule>),
    Interval(Duration),
}

impl ParsedSchedule {
    /// Time until the next firing, or `None` when the schedule has no
    /// further occurrences.
    fn next_wait(&self) -> Option<Duration> {
        match self {
            ParsedSchedule::Cron(schedule) => {
                let next = schedule.upcoming(Utc).next()?;
                Some((next - Utc::now()).to_std().unwrap_or(Duration::ZERO))
            },
            ParsedSchedule::Interval(interval) => Some(*interval),
        }
    }
}

pub struct ScheduledTrigger {
    schedule: ParsedSchedule,
    endpoint: String,
    bearer_token: Option<String>,
    fetcher: Arc<dyn ApiFetcher>,
    delivery: TriggerDelivery,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ScheduledTrigger {
    /// Build the trigger, parsing the schedule eagerly so a bad cron
    /// expression fails construction rather than the first firing.
    pub fn new(
        schedule: &ScheduleKind,
        endpoint: String,
        bearer_token: Option<String>,
        fetcher: Arc<dyn ApiFetcher>,
        delivery: TriggerDelivery,
    ) -> Result<Self> {
        let schedule = match schedule {
            ScheduleKind::Cron { expression } => {
                let parsed = cron::Schedule::from_str(expression).map_err(|e| {
                    PdiError::Configuration(format!(
                        "instance '{}': invalid cron expression '{}': {}",
                        delivery.module_id(),
                        expression,
                        e
                    ))
                })?;
                ParsedSchedule::Cron(Box::new(parsed))
            },
            ScheduleKind::Interval { secs } => {
                if *secs == 0 {
                    return Err(PdiError::Configuration(format!(
                        "instance '{}': interval must be greater than 0",
                        delivery.module_id()
                    )));
                }
                ParsedSchedule::Interval(Duration::from_secs(*secs))
            },
        };

        Ok(Self {
            schedule,
            endpoint,
            bearer_token,
            fetcher,
            delivery,
            task: Mutex::new(None),
        })
    }
}

#[async_trait]
impl super::IngestionTrigger for ScheduledTrigger {
    async fn start(&self) -> Result<()> {
        let schedule = self.schedule.clone();
        let endpoint = self.endpoint.clone();
        let bearer_token = self.bearer_token.clone();
        let fetcher = Arc::clone(&self.fetcher);
        let delivery = self.delivery.clone();

        let handle = tokio::spawn(async move {
            loop {
                let Some(wait) = schedule.next_wait() else {
                    warn!(
                        instance = %delivery.module_id(),
                        "Schedule has no further occurrences, job retiring"
                    );
                    break;
                };
                tokio::time::sleep(wait).await;

                run_fetch(&endpoint, bearer_token.as_deref(), fetcher.as_ref(), &delivery).await;
            }
        });

        let mut slot = self.task.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(handle);

        info!(
            instance = %self.delivery.module_id(),
            endpoint = %self.endpoint,
            "Scheduled trigger started"
        );
        Ok(())
    }

    async fn stop(&self) {
        let handle = {
            let mut slot = self.task.lock().unwrap_or_else(|e| e.into_inner());
            slot.take()
        };
        if let Some(handle) = handle {
            handle.abort();
        }
        info!(instance = %self.delivery.module_id(), "Scheduled trigger stopped");
    }

    fn queued_count(&self) -> usize {
        0
    }
}

/// One firing: fetch and deliver. Every failure path logs and
/// returns; the scheduler loop is free to fire again next occurrence.
async fn run_fetch(
    endpoint: &str,
    bearer_token: Option<&str>,
    fetcher: &dyn ApiFetcher,
    delivery: &TriggerDelivery,
) {
    match fetcher.get(endpoint, bearer_token).await {
        Ok(Some(body)) => delivery.deliver(TriggerPayload::Fetched(body)),
        Ok(None) => warn!(
            instance = %delivery.module_id(),
            endpoint = %endpoint,
            "Fetch produced no payload, waiting for next occurrence"
        ),
        Err(e) => warn!(
            instance = %delivery.module_id(),
            endpoint = %endpoint,
            error = %e,
            "Transient fetch failure, job remains scheduled"
        ),
    }
}
