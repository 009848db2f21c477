use crate::application::settlement::SettlementScheduler;
use crate::error::{EscrowError, Result};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

fn scheduler_error(e: impl std::fmt::Display) -> EscrowError {
    EscrowError::Scheduler(e.to_string())
}

/// Runs the calendar settlement batch on a cron schedule.
pub struct SettlementCron {
    scheduler: JobScheduler,
    settlement: SettlementScheduler,
    schedule: String,
}

impl SettlementCron {
    pub async fn new(settlement: SettlementScheduler, schedule: impl Into<String>) -> Result<Self> {
        let scheduler = JobScheduler::new().await.map_err(scheduler_error)?;
        Ok(Self {
            scheduler,
            settlement,
            schedule: schedule.into(),
        })
    }

    /// Registers the settlement job and starts ticking.
    pub async fn start(&mut self) -> Result<()> {
        info!(schedule = %self.schedule, "Starting settlement scheduler");

        let settlement = self.settlement.clone();
        let job = Job::new_async(self.schedule.as_str(), move |_uuid, _lock| {
            let settlement = settlement.clone();
            Box::pin(async move {
                info!("Scheduled settlement triggered");
                if let Err(e) = settlement.run_settlement().await {
                    error!(error = %e, "Scheduled settlement failed");
                }
            })
        })
        .map_err(scheduler_error)?;

        self.scheduler.add(job).await.map_err(scheduler_error)?;
        self.scheduler.start().await.map_err(scheduler_error)?;
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        self.scheduler.shutdown().await.map_err(scheduler_error)?;
        info!("Settlement scheduler stopped");
        Ok(())
    }
}
