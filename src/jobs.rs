use crate::signals;

/// Fixed capacity of the job table.
pub const MAX_JOBS: usize = 100;

/// Upper bound, in bytes, on a stored command line. Longer text is truncated
/// at a character boundary.
pub const MAX_CMDLINE: usize = 512;

/// The lifecycle state of a tracked job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Owns the terminal; the shell is waiting on it.
    Foreground,
    /// Executing in the background.
    Running,
    /// Suspended by SIGTSTP/SIGSTOP, resumable with SIGCONT.
    Stopped,
}

impl JobState {
    /// Display label, unpadded. `jobs` pads it to a 10-column field.
    pub fn label(self) -> &'static str {
        match self {
            JobState::Foreground => "Foreground",
            JobState::Running => "Running",
            JobState::Stopped => "Stopped",
        }
    }
}

/// A single tracked pipeline: one process group plus its display text.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: u32,
    pub pgid: libc::pid_t,
    pub state: JobState,
    pub cmdline: String,
    /// Group members not yet reaped. The job is retired with its last member.
    procs: Vec<libc::pid_t>,
}

/// Insertion failure: every slot in the table is occupied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableFull;

/// The shell's job table. Slot-indexed with a fixed capacity; the single
/// source of truth for which process groups the shell is tracking.
///
/// Every mutation republishes the foreground process group so the signal
/// handlers always read a value consistent with the table.
pub struct JobTable {
    slots: Vec<Option<Job>>,
}

impl Default for JobTable {
    fn default() -> Self {
        Self::new()
    }
}

impl JobTable {
    pub fn new() -> Self {
        Self {
            slots: (0..MAX_JOBS).map(|_| None).collect(),
        }
    }

    fn iter(&self) -> impl Iterator<Item = &Job> {
        self.slots.iter().flatten()
    }

    /// Next job id: one more than the highest id currently in use. A freed
    /// low id is not reused until every higher id is also freed.
    fn next_id(&self) -> u32 {
        self.iter().map(|job| job.id).max().map_or(1, |id| id + 1)
    }

    /// Register a new job in the lowest free slot. Returns the assigned id.
    pub fn add(
        &mut self,
        pgid: libc::pid_t,
        state: JobState,
        cmdline: &str,
        procs: Vec<libc::pid_t>,
    ) -> Result<u32, TableFull> {
        let slot = self
            .slots
            .iter()
            .position(|slot| slot.is_none())
            .ok_or(TableFull)?;
        if state == JobState::Foreground {
            self.demote_foreground();
        }
        let id = self.next_id();
        self.slots[slot] = Some(Job {
            id,
            pgid,
            state,
            cmdline: bounded_cmdline(cmdline),
            procs,
        });
        self.sync_foreground();
        Ok(id)
    }

    /// Remove and return the job with the given id; `None` if absent.
    #[cfg_attr(not(test), allow(dead_code))]
    pub fn remove_by_id(&mut self, id: u32) -> Option<Job> {
        self.remove_where(|job| job.id == id)
    }

    /// Remove and return the job owning the given process group; `None` if
    /// absent. The reaper retires finished jobs through this.
    pub fn remove_by_group(&mut self, pgid: libc::pid_t) -> Option<Job> {
        self.remove_where(|job| job.pgid == pgid)
    }

    fn remove_where(&mut self, pred: impl Fn(&Job) -> bool) -> Option<Job> {
        for slot in &mut self.slots {
            if slot.as_ref().is_some_and(&pred) {
                let job = slot.take();
                self.sync_foreground();
                return job;
            }
        }
        None
    }

    pub fn find_by_id(&self, id: u32) -> Option<&Job> {
        self.iter().find(|job| job.id == id)
    }

    pub fn find_by_group(&self, pgid: libc::pid_t) -> Option<&Job> {
        self.iter().find(|job| job.pgid == pgid)
    }

    /// The job currently marked Foreground, if any. At most one exists.
    pub fn find_foreground(&self) -> Option<&Job> {
        self.iter().find(|job| job.state == JobState::Foreground)
    }

    /// Resolve a user-supplied job reference to a job id. `%N` selects by job
    /// id, a bare number by process-group id. Returns `None` for malformed
    /// tokens and for references that match no live job.
    pub fn resolve_reference(&self, token: &str) -> Option<u32> {
        if let Some(rest) = token.strip_prefix('%') {
            let id: u32 = rest.parse().ok()?;
            self.find_by_id(id).map(|job| job.id)
        } else {
            let pgid: libc::pid_t = token.parse().ok()?;
            self.find_by_group(pgid).map(|job| job.id)
        }
    }

    /// Update the state of the job with the given id. Returns whether it
    /// existed. Promoting a job to Foreground demotes any current foreground
    /// job to Running so at most one foreground job exists.
    pub fn set_state(&mut self, id: u32, state: JobState) -> bool {
        if state == JobState::Foreground {
            self.demote_foreground();
        }
        let Some(job) = self.slots.iter_mut().flatten().find(|job| job.id == id) else {
            return false;
        };
        job.state = state;
        self.sync_foreground();
        true
    }

    fn demote_foreground(&mut self) {
        for job in self.slots.iter_mut().flatten() {
            if job.state == JobState::Foreground {
                job.state = JobState::Running;
            }
        }
    }

    /// Whether any job is Running or Stopped. A foreground job does not
    /// count: `wait` only lingers on background work.
    pub fn has_active_jobs(&self) -> bool {
        self.iter()
            .any(|job| matches!(job.state, JobState::Running | JobState::Stopped))
    }

    /// Snapshots of all live jobs in slot order.
    pub fn list(&self) -> Vec<Job> {
        self.iter().cloned().collect()
    }

    /// Highest-id job not already in the foreground; the default target when
    /// `fg` is called without an argument.
    pub fn fg_candidate_id(&self) -> Option<u32> {
        self.iter()
            .filter(|job| job.state != JobState::Foreground)
            .map(|job| job.id)
            .max()
    }

    /// Record that `pid` was reaped in a stopped state. The first stop of a
    /// job returns a snapshot for the notification banner; repeats and
    /// unknown pids return `None`.
    pub fn record_stop(&mut self, pid: libc::pid_t) -> Option<Job> {
        let job = self
            .slots
            .iter_mut()
            .flatten()
            .find(|job| job.procs.contains(&pid))?;
        if job.state == JobState::Stopped {
            return None;
        }
        job.state = JobState::Stopped;
        let snapshot = job.clone();
        self.sync_foreground();
        Some(snapshot)
    }

    /// Record that `pid` was reaped after terminating. When it was the job's
    /// last live member the job is retired; the retired job is returned if it
    /// ran in the background, which is the cue to print its Done banner.
    /// Foreground jobs are retired silently.
    pub fn record_exit(&mut self, pid: libc::pid_t) -> Option<Job> {
        let job = self
            .slots
            .iter_mut()
            .flatten()
            .find(|job| job.procs.contains(&pid))?;
        job.procs.retain(|&member| member != pid);
        if !job.procs.is_empty() {
            return None;
        }
        let pgid = job.pgid;
        let job = self.remove_by_group(pgid)?;
        if job.state == JobState::Foreground {
            None
        } else {
            Some(job)
        }
    }

    /// Republish the foreground process group for the signal handlers: the
    /// foreground job's pgid, or 0 when there is none.
    fn sync_foreground(&self) {
        let pgid = self.find_foreground().map_or(0, |job| job.pgid);
        signals::publish_foreground(pgid);
    }
}

fn bounded_cmdline(text: &str) -> String {
    if text.len() <= MAX_CMDLINE {
        return text.to_string();
    }
    let mut end = MAX_CMDLINE;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}
