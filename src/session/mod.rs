pub mod guard;
pub mod history;

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::data_dir;
use crate::error::GuardError;
use crate::model::story::{StoryInput, WorkItemId};
use crate::model::test_case::{TestCase, TestStep};
use guard::{PushDecision, PushState, SubmissionGuard};

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SessionData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub story: Option<StoryInput>,
    /// Work item the story was fetched from; the default push parent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_item: Option<WorkItemId>,
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
    #[serde(default)]
    pub guard: SubmissionGuard,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push_pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

/// Changes to one test case. `steps` replaces every step and is applied
/// before `step`. Step indices are 1-based; one past the last step appends a
/// new step.
#[derive(Debug, Default, Clone)]
pub struct CaseEdit {
    pub title: Option<String>,
    pub description: Option<String>,
    pub steps: Option<Vec<TestStep>>,
    pub step: Option<StepEdit>,
}

#[derive(Debug, Clone)]
pub struct StepEdit {
    pub index: usize,
    pub action: Option<String>,
    pub expected_result: Option<String>,
}

impl CaseEdit {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.steps.is_none()
            && self.step.is_none()
    }
}

/// The working state of one identity, kept as JSON between commands.
pub struct SessionStore {
    path: PathBuf,
    data: SessionData,
}

impl SessionStore {
    pub fn open(identity: &str) -> Result<Self> {
        Self::open_at(session_path(identity))
    }

    pub fn open_at(path: PathBuf) -> Result<Self> {
        let data = read_data(&path)?;
        let mut store = Self { path, data };
        store.clean_stale_push()?;
        Ok(store)
    }

    /// Pick up changes another process wrote since this store was opened.
    pub fn reload(&mut self) -> Result<()> {
        self.data = read_data(&self.path)?;
        self.clean_stale_push()
    }

    pub fn data(&self) -> &SessionData {
        &self.data
    }

    fn save(&mut self) -> Result<()> {
        self.data.updated_at = Some(chrono::Utc::now().to_rfc3339());
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.data)?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        Ok(())
    }

    fn clean_stale_push(&mut self) -> Result<()> {
        if !matches!(self.data.guard.state(), PushState::Submitting { .. }) {
            return Ok(());
        }
        let alive = self.data.push_pid.map(is_process_alive).unwrap_or(false);
        if !alive {
            tracing::warn!("previous push did not finish; treating the batch as not submitted");
            self.data.guard.abandon();
            self.data.push_pid = None;
            self.save()?;
        }
        Ok(())
    }

    /// A new story starts a new batch.
    pub fn set_story(&mut self, story: StoryInput, source_item: Option<WorkItemId>) -> Result<()> {
        self.data.story = Some(story);
        self.data.source_item = source_item;
        self.data.test_cases.clear();
        self.data.guard.reset();
        self.save()
    }

    pub fn set_test_cases(&mut self, cases: Vec<TestCase>) -> Result<()> {
        self.data.test_cases = cases;
        self.data.guard.reset();
        self.save()
    }

    /// `case_number` is 1-based, as shown by `show`.
    pub fn edit_case(&mut self, case_number: usize, edit: CaseEdit) -> Result<()> {
        if edit.is_empty() {
            bail!("Nothing to change: pass --title, --description, --steps-from or --step");
        }
        validate_edit(&edit)?;
        let count = self.data.test_cases.len();
        let Some(case) = case_number
            .checked_sub(1)
            .and_then(|i| self.data.test_cases.get_mut(i))
        else {
            bail!("No test case {case_number} (there are {count})");
        };

        if let Some(title) = edit.title {
            case.title = title;
        }
        if let Some(description) = edit.description {
            case.description = description;
        }
        if let Some(steps) = edit.steps {
            case.steps = steps;
        }
        if let Some(step) = edit.step {
            apply_step_edit(&mut case.steps, step)?;
        }

        self.data.guard.mark_edited();
        self.save()
    }

    pub fn push_decision(&self, parent_id: WorkItemId) -> PushDecision {
        self.data.guard.check(parent_id)
    }

    /// Checks the guard against the file on disk, not the copy read at open,
    /// and records the push before releasing the lock. A second process then
    /// sees `Submitting` held by a live pid.
    pub fn begin_push(&mut self, parent_id: WorkItemId, confirmed: bool) -> Result<()> {
        let _lock = SessionLock::acquire(&self.path)?;
        self.reload()?;
        self.data.guard.begin(parent_id, confirmed)?;
        self.data.push_pid = Some(std::process::id());
        self.save()
    }

    pub fn finish_push(&mut self, success_count: usize) -> Result<()> {
        let _lock = SessionLock::acquire(&self.path)?;
        self.reload()?;
        self.data.guard.finish(success_count);
        self.data.push_pid = None;
        self.save()
    }
}

const LOCK_ATTEMPTS: u32 = 50;
const LOCK_RETRY: Duration = Duration::from_millis(20);

/// Exclusive `<session>.lock` file holding the owner's pid. Removed on drop.
struct SessionLock {
    path: PathBuf,
}

impl SessionLock {
    fn acquire(session: &Path) -> Result<Self> {
        let path = session.with_extension("lock");
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        for _ in 0..LOCK_ATTEMPTS {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    write!(file, "{}", std::process::id())
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    let holder = std::fs::read_to_string(&path)
                        .ok()
                        .and_then(|pid| pid.trim().parse::<u32>().ok());
                    if let Some(pid) = holder {
                        if !is_process_alive(pid) {
                            tracing::warn!(pid, "removing session lock left by a dead process");
                            let _ = std::fs::remove_file(&path);
                            continue;
                        }
                    }
                    std::thread::sleep(LOCK_RETRY);
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to create {}", path.display()))
                }
            }
        }
        Err(GuardError::InFlight.into())
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn read_data(path: &Path) -> Result<SessionData> {
    if !path.exists() {
        return Ok(SessionData::default());
    }
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Every field a test case ends up with must be non-blank.
fn validate_edit(edit: &CaseEdit) -> Result<()> {
    let blank = |value: &Option<String>| value.as_deref().is_some_and(|v| v.trim().is_empty());
    if blank(&edit.title) {
        bail!("Title cannot be empty");
    }
    if blank(&edit.description) {
        bail!("Description cannot be empty");
    }
    if let Some(steps) = &edit.steps {
        if steps.is_empty() {
            bail!("A test case needs at least one step");
        }
        if let Some(n) = steps
            .iter()
            .position(|s| s.action.trim().is_empty() || s.expected_result.trim().is_empty())
        {
            bail!("Step {} needs both an action and an expected result", n + 1);
        }
    }
    if let Some(step) = &edit.step {
        if blank(&step.action) {
            bail!("Step {} action cannot be empty", step.index);
        }
        if blank(&step.expected_result) {
            bail!("Step {} expected result cannot be empty", step.index);
        }
    }
    Ok(())
}

fn apply_step_edit(steps: &mut Vec<TestStep>, edit: StepEdit) -> Result<()> {
    let len = steps.len();
    if edit.index == 0 || edit.index > len + 1 {
        bail!("Step {} is out of range (1..={})", edit.index, len + 1);
    }
    if edit.index == len + 1 {
        let (Some(action), Some(expected)) = (edit.action, edit.expected_result) else {
            bail!("A new step needs both --action and --expected");
        };
        steps.push(TestStep::new(action, expected));
        return Ok(());
    }
    let step = &mut steps[edit.index - 1];
    if let Some(action) = edit.action {
        step.action = action;
    }
    if let Some(expected) = edit.expected_result {
        step.expected_result = expected;
    }
    Ok(())
}

fn session_path(identity: &str) -> PathBuf {
    let file: String = identity
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    data_dir().join("sessions").join(format!("{file}.json"))
}

fn is_process_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as i32, 0) == 0 }
}
