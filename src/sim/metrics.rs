use serde::{Deserialize, Serialize};

use crate::scheduler::{Job, JobStatus};

/// Aggregate scheduling metrics for one run.
///
/// - makespan: latest end minus earliest submission
/// - waiting time: start minus submission, over jobs that started
/// - turnaround: end minus submission, over jobs that started and ended
/// - utilization: resource-time consumed over `capacity * makespan`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub total_jobs: usize,
    pub completed_jobs: usize,
    pub killed_jobs: usize,
    pub rejected_jobs: usize,
    pub simulation_time: f64,
    pub makespan: f64,
    pub average_waiting_time: f64,
    pub average_turnaround_time: f64,
    pub resource_utilization: f64,
}

impl RunMetrics {
    /// `rejected_jobs` is passed in because rejected jobs never started and
    /// look like killed jobs otherwise.
    pub fn compute<'a>(
        jobs: impl IntoIterator<Item = &'a Job>,
        capacity: u32,
        rejected_jobs: usize,
        simulation_time: f64,
    ) -> Self {
        let jobs: Vec<&Job> = jobs.into_iter().collect();
        let total_jobs = jobs.len();
        let completed_jobs = jobs
            .iter()
            .filter(|j| j.status == JobStatus::Completed)
            .count();
        let killed_jobs = jobs
            .iter()
            .filter(|j| j.status == JobStatus::Killed)
            .count()
            .saturating_sub(rejected_jobs);

        let first_submit = jobs
            .iter()
            .map(|j| j.submission_time)
            .min_by(|a, b| a.total_cmp(b));
        let last_end = jobs
            .iter()
            .filter_map(|j| j.end_time)
            .max_by(|a, b| a.total_cmp(b));
        let makespan = match (first_submit, last_end) {
            (Some(s), Some(e)) if e > s => e - s,
            _ => 0.0,
        };

        let waits: Vec<f64> = jobs.iter().filter_map(|j| j.waiting_time()).collect();
        let turnarounds: Vec<f64> = jobs
            .iter()
            .filter(|j| j.start_time.is_some())
            .filter_map(|j| j.turnaround_time())
            .collect();

        let consumed: f64 = jobs
            .iter()
            .filter_map(|j| j.run_duration().map(|d| d * j.requested_resources as f64))
            .sum();
        let available = capacity as f64 * makespan;
        let resource_utilization = if available > 0.0 {
            consumed / available
        } else {
            0.0
        };

        Self {
            total_jobs,
            completed_jobs,
            killed_jobs,
            rejected_jobs,
            simulation_time,
            makespan,
            average_waiting_time: mean(&waits),
            average_turnaround_time: mean(&turnarounds),
            resource_utilization,
        }
    }

    pub fn failed_jobs(&self) -> usize {
        self.killed_jobs + self.rejected_jobs
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finished(id: u64, submit: f64, start: f64, end: f64, res: u32) -> Job {
        let mut job = Job::new(id, submit, res, end - start);
        job.status = JobStatus::Completed;
        job.start_time = Some(start);
        job.end_time = Some(end);
        job
    }

    #[test]
    fn empty_run() {
        let m = RunMetrics::compute(std::iter::empty(), 4, 0, 0.0);
        assert_eq!(m.total_jobs, 0);
        assert_eq!(m.makespan, 0.0);
        assert_eq!(m.resource_utilization, 0.0);
    }

    #[test]
    fn basic_metrics() {
        let jobs = vec![
            finished(1, 0.0, 0.0, 10.0, 2),
            finished(2, 0.0, 10.0, 20.0, 4),
        ];
        let m = RunMetrics::compute(&jobs, 4, 0, 20.0);
        assert_eq!(m.completed_jobs, 2);
        assert_eq!(m.makespan, 20.0);
        assert_eq!(m.average_waiting_time, 5.0);
        assert_eq!(m.average_turnaround_time, 15.0);
        // (2*10 + 4*10) / (4*20)
        assert!((m.resource_utilization - 0.75).abs() < 1e-9);
    }

    #[test]
    fn rejected_jobs_are_not_counted_as_killed() {
        let mut rejected = Job::new(3, 1.0, 9, 5.0);
        rejected.status = JobStatus::Killed;
        rejected.end_time = Some(1.0);
        let jobs = vec![finished(1, 0.0, 0.0, 4.0, 1), rejected];
        let m = RunMetrics::compute(&jobs, 4, 1, 4.0);
        assert_eq!(m.killed_jobs, 0);
        assert_eq!(m.rejected_jobs, 1);
        assert_eq!(m.failed_jobs(), 1);
        assert_eq!(m.average_turnaround_time, 4.0);
    }
}
