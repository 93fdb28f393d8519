//! Workload and topology documents.
//!
//! Workloads use the Batsim JSON layout:
//!
//! ```json
//! {
//!   "nb_res": 4,
//!   "jobs": [{ "id": "w0!1", "subtime": 0, "res": 2, "walltime": 100, "profile": "p100" }],
//!   "profiles": { "p100": { "type": "delay", "delay": 100 } },
//!   "kills": [{ "job_id": 1, "time": 50 }]
//! }
//! ```
//!
//! A job runs for its profile's `delay` when one is given, otherwise for its
//! full walltime. `kills` is optional.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SimlabError};
use crate::scheduler::{Job, JobId, SimTime};

/// Compute topology: how many identical resource units a run gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    pub resources: u32,
}

impl Topology {
    pub fn new(resources: u32) -> Self {
        Self { resources }
    }
}

/// Job list plus externally requested kills.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Workload {
    pub jobs: Vec<Job>,
    pub kills: Vec<(JobId, SimTime)>,
    /// Resource count declared by the document, if any.
    pub nb_res: Option<u32>,
}

impl Workload {
    pub fn new(jobs: Vec<Job>) -> Self {
        Self {
            jobs,
            ..Default::default()
        }
    }

    pub fn with_kill(mut self, job_id: JobId, time: SimTime) -> Self {
        self.kills.push((job_id, time));
        self
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let doc: WorkloadDocument = serde_json::from_str(json)?;
        doc.into_workload()
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Topology implied by the document's `nb_res`.
    pub fn topology(&self) -> Option<Topology> {
        self.nb_res.map(Topology::new)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Reject malformed job lists before anything is allocated.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for job in &self.jobs {
            if !seen.insert(job.id) {
                return Err(invalid(format!("duplicate job id {}", job.id)));
            }
            if job.requested_resources == 0 {
                return Err(invalid(format!("job {} requests no resources", job.id)));
            }
            if !is_time(job.submission_time) {
                return Err(invalid(format!(
                    "job {} has invalid submission time {}",
                    job.id, job.submission_time
                )));
            }
            if !is_time(job.requested_time) || !is_time(job.run_time) {
                return Err(invalid(format!("job {} has an invalid duration", job.id)));
            }
        }
        for &(job_id, time) in &self.kills {
            if !seen.contains(&job_id) {
                return Err(invalid(format!("kill request for unknown job {job_id}")));
            }
            if !is_time(time) {
                return Err(invalid(format!("kill request for job {job_id} has invalid time")));
            }
        }
        Ok(())
    }
}

fn is_time(t: SimTime) -> bool {
    t.is_finite() && t >= 0.0
}

fn invalid(msg: String) -> SimlabError {
    SimlabError::InvalidConfiguration(msg)
}

/// Batsim job ids are either plain integers or `"<workload>!<n>"` strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobRef {
    Number(u64),
    Text(String),
}

impl JobRef {
    pub fn resolve(&self) -> Result<JobId> {
        match self {
            JobRef::Number(n) => Ok(*n),
            JobRef::Text(s) => {
                let tail = s.rsplit('!').next().unwrap_or(s);
                tail.parse()
                    .map_err(|_| invalid(format!("job id '{s}' has no numeric part")))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEntry {
    pub id: JobRef,
    pub subtime: f64,
    pub res: u32,
    pub walltime: f64,
    #[serde(default)]
    pub profile: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileEntry {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub delay: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KillEntry {
    pub job_id: JobRef,
    pub time: f64,
}

/// On-disk workload layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadDocument {
    #[serde(default)]
    pub nb_res: Option<u32>,
    pub jobs: Vec<JobEntry>,
    #[serde(default)]
    pub profiles: BTreeMap<String, ProfileEntry>,
    #[serde(default)]
    pub kills: Vec<KillEntry>,
}

impl WorkloadDocument {
    pub fn into_workload(self) -> Result<Workload> {
        let mut jobs = Vec::with_capacity(self.jobs.len());
        for entry in &self.jobs {
            let id = entry.id.resolve()?;
            let mut job = Job::new(id, entry.subtime, entry.res, entry.walltime);
            if let Some(name) = &entry.profile {
                let profile = self
                    .profiles
                    .get(name)
                    .ok_or_else(|| invalid(format!("job {id} references unknown profile '{name}'")))?;
                if let Some(delay) = profile.delay {
                    job = job.with_run_time(delay);
                }
            }
            jobs.push(job);
        }
        let kills = self
            .kills
            .iter()
            .map(|k| Ok((k.job_id.resolve()?, k.time)))
            .collect::<Result<Vec<_>>>()?;

        let workload = Workload {
            jobs,
            kills,
            nb_res: self.nb_res,
        };
        workload.validate()?;
        Ok(workload)
    }
}
