use std::cmp::Ordering;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SimlabError};
use crate::scheduler::job::{Job, JobId};

const DEFAULT_MAX_JOBS: usize = 10_000;

/// Sort key for pending jobs. Lower sorts first; ties go to the lower job id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorityPolicy {
    /// Earliest submission first.
    #[default]
    Fifo,
    /// Fewest requested resources first.
    Size,
    /// Shortest requested time first.
    Duration,
}

impl PriorityPolicy {
    pub fn compare(&self, a: &Job, b: &Job) -> Ordering {
        let primary = match self {
            PriorityPolicy::Fifo => a.submission_time.total_cmp(&b.submission_time),
            PriorityPolicy::Size => a.requested_resources.cmp(&b.requested_resources),
            PriorityPolicy::Duration => a.requested_time.total_cmp(&b.requested_time),
        };
        primary.then_with(|| a.id.cmp(&b.id))
    }
}

impl std::fmt::Display for PriorityPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PriorityPolicy::Fifo => write!(f, "fifo"),
            PriorityPolicy::Size => write!(f, "size"),
            PriorityPolicy::Duration => write!(f, "duration"),
        }
    }
}

impl FromStr for PriorityPolicy {
    type Err = SimlabError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "fifo" => Ok(PriorityPolicy::Fifo),
            "size" => Ok(PriorityPolicy::Size),
            "duration" => Ok(PriorityPolicy::Duration),
            other => Err(SimlabError::InvalidConfiguration(format!(
                "unknown priority policy '{other}'"
            ))),
        }
    }
}

/// Pending jobs kept in priority order.
#[derive(Debug, Clone)]
pub struct JobQueue {
    jobs: Vec<Job>,
    policy: PriorityPolicy,
    pool_capacity: u32,
    max_jobs: usize,
}

impl JobQueue {
    /// Queue for a pool of `pool_capacity` units. Jobs that could never fit
    /// are refused at insertion.
    pub fn new(policy: PriorityPolicy, pool_capacity: u32) -> Self {
        Self::with_capacity(policy, pool_capacity, DEFAULT_MAX_JOBS)
    }

    pub fn with_capacity(policy: PriorityPolicy, pool_capacity: u32, max_jobs: usize) -> Self {
        Self {
            jobs: Vec::new(),
            policy,
            pool_capacity,
            max_jobs,
        }
    }

    pub fn policy(&self) -> PriorityPolicy {
        self.policy
    }

    /// Insert a job at its priority position.
    pub fn push(&mut self, job: Job) -> Result<()> {
        if job.requested_resources > self.pool_capacity {
            return Err(SimlabError::UnsatisfiableJob {
                job_id: job.id,
                requested: job.requested_resources,
                capacity: self.pool_capacity,
            });
        }
        if self.jobs.len() >= self.max_jobs {
            return Err(SimlabError::InvalidConfiguration(format!(
                "job queue is full ({} jobs)",
                self.max_jobs
            )));
        }
        if self.contains(job.id) {
            return Err(SimlabError::Inconsistent(format!(
                "job {} is already queued",
                job.id
            )));
        }
        let policy = self.policy;
        let at = self
            .jobs
            .partition_point(|queued| policy.compare(queued, &job) == Ordering::Less);
        self.jobs.insert(at, job);
        Ok(())
    }

    pub fn peek(&self) -> Option<&Job> {
        self.jobs.first()
    }

    pub fn pop_front(&mut self) -> Option<Job> {
        if self.jobs.is_empty() {
            None
        } else {
            Some(self.jobs.remove(0))
        }
    }

    pub fn remove(&mut self, job_id: JobId) -> Option<Job> {
        let pos = self.jobs.iter().position(|j| j.id == job_id)?;
        Some(self.jobs.remove(pos))
    }

    pub fn get(&self, job_id: JobId) -> Option<&Job> {
        self.jobs.iter().find(|j| j.id == job_id)
    }

    pub fn contains(&self, job_id: JobId) -> bool {
        self.jobs.iter().any(|j| j.id == job_id)
    }

    /// Jobs in priority order.
    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.jobs.iter()
    }

    pub fn ids(&self) -> Vec<JobId> {
        self.jobs.iter().map(|j| j.id).collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: JobId, submit: f64, res: u32, time: f64) -> Job {
        Job::new(id, submit, res, time)
    }

    #[test]
    fn fifo_orders_by_submission_then_id() {
        let mut q = JobQueue::new(PriorityPolicy::Fifo, 8);
        q.push(job(3, 5.0, 1, 10.0)).unwrap();
        q.push(job(2, 1.0, 1, 10.0)).unwrap();
        q.push(job(1, 5.0, 1, 10.0)).unwrap();
        assert_eq!(q.ids(), vec![2, 1, 3]);
    }

    #[test]
    fn size_policy() {
        let mut q = JobQueue::new(PriorityPolicy::Size, 8);
        q.push(job(1, 0.0, 4, 10.0)).unwrap();
        q.push(job(2, 1.0, 1, 10.0)).unwrap();
        q.push(job(3, 2.0, 4, 10.0)).unwrap();
        q.push(job(4, 3.0, 2, 10.0)).unwrap();
        assert_eq!(q.ids(), vec![2, 4, 1, 3]);
    }

    #[test]
    fn duration_policy() {
        let mut q = JobQueue::new(PriorityPolicy::Duration, 8);
        q.push(job(1, 0.0, 1, 30.0)).unwrap();
        q.push(job(2, 1.0, 1, 5.0)).unwrap();
        q.push(job(3, 2.0, 1, 5.0)).unwrap();
        assert_eq!(q.ids(), vec![2, 3, 1]);
        assert_eq!(q.peek().map(|j| j.id), Some(2));
    }

    #[test]
    fn oversized_job_is_unsatisfiable() {
        let mut q = JobQueue::new(PriorityPolicy::Fifo, 4);
        let err = q.push(job(1, 0.0, 5, 1.0)).unwrap_err();
        assert!(matches!(
            err,
            SimlabError::UnsatisfiableJob {
                job_id: 1,
                requested: 5,
                capacity: 4
            }
        ));
        assert!(q.is_empty());
    }

    #[test]
    fn remove_and_pop() {
        let mut q = JobQueue::new(PriorityPolicy::Fifo, 4);
        q.push(job(1, 0.0, 1, 1.0)).unwrap();
        q.push(job(2, 1.0, 1, 1.0)).unwrap();
        q.push(job(3, 2.0, 1, 1.0)).unwrap();

        assert_eq!(q.remove(2).map(|j| j.id), Some(2));
        assert!(q.remove(2).is_none());
        assert_eq!(q.pop_front().map(|j| j.id), Some(1));
        assert_eq!(q.ids(), vec![3]);
    }

    #[test]
    fn full_queue_refuses() {
        let mut q = JobQueue::with_capacity(PriorityPolicy::Fifo, 4, 1);
        q.push(job(1, 0.0, 1, 1.0)).unwrap();
        assert!(q.push(job(2, 0.0, 1, 1.0)).is_err());
    }

    #[test]
    fn policy_parses() {
        assert_eq!("FIFO".parse::<PriorityPolicy>().unwrap(), PriorityPolicy::Fifo);
        assert_eq!("size".parse::<PriorityPolicy>().unwrap(), PriorityPolicy::Size);
        assert!("random".parse::<PriorityPolicy>().is_err());
    }
}
