use uuid::Uuid;

use crate::scheduler::job::JobUpdate;
use crate::scheduler::store::JobStore;

/// Forwards partial progress for one processing attempt to the store.
///
/// Reports are dropped once the attempt is no longer current, e.g. after a
/// cancel reset the job to pending.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    store: JobStore,
    job_id: Uuid,
    attempt: u32,
}

impl ProgressReporter {
    pub fn new(store: JobStore, job_id: Uuid, attempt: u32) -> Self {
        Self {
            store,
            job_id,
            attempt,
        }
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Report progress in percent. Values are capped at 100 and never move
    /// the job's progress backwards. Returns false if the report was dropped.
    pub async fn report(&self, percent: f64) -> bool {
        self.store
            .update_attempt(&self.job_id, self.attempt, JobUpdate::Progress(percent))
            .await
    }
}
