use serde::Serialize;
use uuid::Uuid;

use crate::config::DEFAULT_MAX_JOBS;
use crate::error::{BatchError, Result};
use crate::scheduler::job::{AudioFile, Job, JobStatus, JobUpdate};

/// Outcome of a submission: the jobs that were queued and how many files
/// were turned away because the queue was full.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitOutcome {
    pub accepted: Vec<Job>,
    pub rejected: usize,
}

/// Ordered collection of jobs, kept in submission order.
#[derive(Debug)]
pub struct JobQueue {
    jobs: Vec<Job>,
    max_jobs: usize,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_JOBS)
    }

    pub fn with_capacity(max_jobs: usize) -> Self {
        Self {
            jobs: Vec::new(),
            max_jobs,
        }
    }

    /// Create one pending job per file, in order, until the queue is full.
    /// Files that do not fit are counted in `rejected`.
    pub fn submit(&mut self, files: Vec<AudioFile>) -> SubmitOutcome {
        let room = self.remaining_capacity();
        let total = files.len();

        let accepted: Vec<Job> = files.into_iter().take(room).map(Job::new).collect();
        self.jobs.extend(accepted.iter().cloned());

        SubmitOutcome {
            rejected: total - accepted.len(),
            accepted,
        }
    }

    pub fn get_job(&self, id: &Uuid) -> Option<&Job> {
        self.jobs.iter().find(|j| j.id == *id)
    }

    pub fn get_job_mut(&mut self, id: &Uuid) -> Option<&mut Job> {
        self.jobs.iter_mut().find(|j| j.id == *id)
    }

    /// Apply a transition to one job. Unknown ids and illegal transitions
    /// are no-ops and return false.
    pub fn update_job(&mut self, id: &Uuid, update: JobUpdate) -> bool {
        match self.get_job_mut(id) {
            Some(job) => job.apply(update),
            None => false,
        }
    }

    /// Apply a transition only while the job is still processing the given
    /// attempt. Used by the processor so that a cancelled attempt can never
    /// write into a later one.
    pub fn update_attempt(&mut self, id: &Uuid, attempt: u32, update: JobUpdate) -> bool {
        match self.get_job_mut(id) {
            Some(job) if job.attempt == attempt && job.status == JobStatus::Processing => {
                job.apply(update)
            }
            _ => false,
        }
    }

    /// Remove a job. Jobs that are processing cannot be removed.
    pub fn remove(&mut self, id: &Uuid) -> Result<Job> {
        let index = self
            .jobs
            .iter()
            .position(|j| j.id == *id)
            .ok_or(BatchError::JobNotFound(*id))?;

        if self.jobs[index].status == JobStatus::Processing {
            return Err(BatchError::InvalidState(format!(
                "job {} is processing and cannot be removed",
                id
            )));
        }

        Ok(self.jobs.remove(index))
    }

    /// Return a failed job to pending so it is picked up again.
    pub fn retry(&mut self, id: &Uuid) -> Result<()> {
        let job = self.get_job_mut(id).ok_or(BatchError::JobNotFound(*id))?;
        if job.status != JobStatus::Error {
            return Err(BatchError::InvalidState(format!(
                "job {} is {}, only failed jobs can be retried",
                id, job.status
            )));
        }
        job.apply(JobUpdate::Reset);
        Ok(())
    }

    /// Remove every job. Returns the number of jobs removed.
    pub fn clear(&mut self) -> usize {
        let removed = self.jobs.len();
        self.jobs.clear();
        removed
    }

    /// Earliest-submitted pending job
    pub fn next_pending(&self) -> Option<&Job> {
        self.jobs.iter().find(|j| j.status == JobStatus::Pending)
    }

    /// Force every processing job back to pending with its progress reset.
    /// Returns the ids that were reset.
    pub fn reset_processing(&mut self) -> Vec<Uuid> {
        self.jobs
            .iter_mut()
            .filter(|j| j.status == JobStatus::Processing)
            .map(|j| {
                j.apply(JobUpdate::Reset);
                j.id
            })
            .collect()
    }

    /// All jobs in submission order
    pub fn all_jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn pending_jobs(&self) -> Vec<&Job> {
        self.jobs
            .iter()
            .filter(|j| j.status == JobStatus::Pending)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.jobs.len() >= self.max_jobs
    }

    pub fn max_jobs(&self) -> usize {
        self.max_jobs
    }

    pub fn remaining_capacity(&self) -> usize {
        self.max_jobs.saturating_sub(self.jobs.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BatchConfig;

    #[test]
    fn default_capacity_matches_batch_config() {
        let queue = JobQueue::new();
        assert_eq!(queue.max_jobs(), BatchConfig::default().max_jobs);
        assert_eq!(queue.remaining_capacity(), DEFAULT_MAX_JOBS);
    }

    fn files(n: usize) -> Vec<AudioFile> {
        (0..n)
            .map(|i| AudioFile::from_metadata(format!("reef_{i}.wav"), 1024))
            .collect()
    }

    #[test]
    fn submit_within_capacity_accepts_all() {
        let mut queue = JobQueue::with_capacity(5);
        let outcome = queue.submit(files(3));
        assert_eq!(outcome.accepted.len(), 3);
        assert_eq!(outcome.rejected, 0);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.remaining_capacity(), 2);
    }

    #[test]
    fn submit_over_capacity_rejects_remainder() {
        let mut queue = JobQueue::with_capacity(4);
        queue.submit(files(3));
        let outcome = queue.submit(files(3));
        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(outcome.rejected, 2);
        assert!(queue.is_full());

        let outcome = queue.submit(files(2));
        assert!(outcome.accepted.is_empty());
        assert_eq!(outcome.rejected, 2);
    }

    #[test]
    fn jobs_keep_submission_order() {
        let mut queue = JobQueue::new();
        queue.submit(files(4));
        let names: Vec<&str> = queue.all_jobs().iter().map(|j| j.filename()).collect();
        assert_eq!(names, vec!["reef_0.wav", "reef_1.wav", "reef_2.wav", "reef_3.wav"]);
        assert_eq!(queue.next_pending().unwrap().filename(), "reef_0.wav");
    }

    #[test]
    fn update_unknown_job_is_noop() {
        let mut queue = JobQueue::new();
        queue.submit(files(1));
        assert!(!queue.update_job(&Uuid::new_v4(), JobUpdate::Started));
        assert_eq!(queue.pending_jobs().len(), 1);
    }

    #[test]
    fn stale_attempt_is_ignored() {
        let mut queue = JobQueue::new();
        let id = queue.submit(files(1)).accepted[0].id;
        queue.update_job(&id, JobUpdate::Started);
        queue.reset_processing();
        queue.update_job(&id, JobUpdate::Started);

        assert!(!queue.update_attempt(&id, 1, JobUpdate::Progress(90.0)));
        assert!(queue.update_attempt(&id, 2, JobUpdate::Progress(10.0)));
        assert_eq!(queue.get_job(&id).unwrap().progress, 10.0);
    }

    #[test]
    fn remove_rejects_processing_job() {
        let mut queue = JobQueue::new();
        let id = queue.submit(files(1)).accepted[0].id;
        queue.update_job(&id, JobUpdate::Started);

        let err = queue.remove(&id).unwrap_err();
        assert!(matches!(err, BatchError::InvalidState(_)));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn remove_unknown_job_is_not_found() {
        let mut queue = JobQueue::new();
        let err = queue.remove(&Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, BatchError::JobNotFound(_)));
    }

    #[test]
    fn removed_slot_frees_capacity() {
        let mut queue = JobQueue::with_capacity(2);
        let outcome = queue.submit(files(2));
        queue.remove(&outcome.accepted[0].id).unwrap();
        assert_eq!(queue.remaining_capacity(), 1);
    }

    #[test]
    fn retry_only_from_error() {
        let mut queue = JobQueue::new();
        let id = queue.submit(files(1)).accepted[0].id;
        assert!(matches!(
            queue.retry(&id).unwrap_err(),
            BatchError::InvalidState(_)
        ));

        queue.update_job(&id, JobUpdate::Started);
        queue.update_job(&id, JobUpdate::Failed("Processing timeout".into()));
        queue.retry(&id).unwrap();

        let job = queue.get_job(&id).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0.0);
        assert!(job.error.is_none());
        assert!(job.result.is_none());
    }

    #[test]
    fn reset_processing_returns_reset_ids() {
        let mut queue = JobQueue::new();
        let outcome = queue.submit(files(2));
        let id = outcome.accepted[1].id;
        queue.update_job(&id, JobUpdate::Started);
        queue.update_job(&id, JobUpdate::Progress(55.0));

        assert_eq!(queue.reset_processing(), vec![id]);
        let job = queue.get_job(&id).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0.0);
    }

    #[test]
    fn clear_empties_queue() {
        let mut queue = JobQueue::new();
        queue.submit(files(3));
        assert_eq!(queue.clear(), 3);
        assert!(queue.is_empty());
    }
}
