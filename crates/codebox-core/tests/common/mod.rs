//! In-memory sandbox runtime shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use codebox_core::errors::SandboxError;
use codebox_core::{
    RunnerSettings, SandboxConnector, SandboxExecutor, SandboxOutput, SandboxStage, WaitOutcome,
    WorkspaceConfig,
};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

type Responder = Arc<dyn Fn(&str, &str) -> SandboxOutput + Send + Sync>;

#[derive(Clone)]
pub enum WaitBehavior {
    Immediate,
    Delay(Duration),
    /// Blocks until [`MockSandbox::release`] hands out a permit.
    UntilReleased,
}

/// Holds a sandbox step up before it runs.
#[derive(Clone, Copy)]
pub enum Stall {
    For(Duration),
    Forever,
}

#[derive(Debug, Clone)]
pub struct CreatedSandbox {
    pub image: String,
    pub host_path: PathBuf,
    pub filename: String,
    pub code: String,
}

#[derive(Default)]
struct State {
    created: Vec<CreatedSandbox>,
    running: HashSet<String>,
    removed: Vec<String>,
    max_running: usize,
    entered: Vec<SandboxStage>,
}

/// Scriptable [`SandboxExecutor`]. Clones share state, so every worker built
/// from one [`MockConnector`] reports into the same counters.
#[derive(Clone)]
pub struct MockSandbox {
    state: Arc<Mutex<State>>,
    fail_at: Option<SandboxStage>,
    stalls: Vec<(SandboxStage, Stall)>,
    wait: WaitBehavior,
    wait_outcome: Option<WaitOutcome>,
    responder: Responder,
    gate: Arc<Semaphore>,
    next_id: Arc<AtomicUsize>,
}

impl MockSandbox {
    /// By default every sandbox exits with status 0 and prints its source code.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            fail_at: None,
            stalls: Vec::new(),
            wait: WaitBehavior::Immediate,
            wait_outcome: None,
            responder: Arc::new(|_, code| SandboxOutput::new(code, "")),
            gate: Arc::new(Semaphore::new(0)),
            next_id: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing_at(mut self, stage: SandboxStage) -> Self {
        self.fail_at = Some(stage);
        self
    }

    /// Delays `stage` of every sandbox. Waits are scripted with [`Self::waiting`].
    pub fn stalling_at(mut self, stage: SandboxStage, stall: Stall) -> Self {
        self.stalls.push((stage, stall));
        self
    }

    pub fn waiting(mut self, wait: WaitBehavior) -> Self {
        self.wait = wait;
        self
    }

    pub fn with_wait_outcome(mut self, outcome: WaitOutcome) -> Self {
        self.wait_outcome = Some(outcome);
        self
    }

    pub fn responding<F>(mut self, responder: F) -> Self
    where
        F: Fn(&str, &str) -> SandboxOutput + Send + Sync + 'static,
    {
        self.responder = Arc::new(responder);
        self
    }

    /// Lets `n` blocked waits complete.
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn created(&self) -> Vec<CreatedSandbox> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.state.lock().unwrap().removed.clone()
    }

    pub fn running(&self) -> usize {
        self.state.lock().unwrap().running.len()
    }

    pub fn max_running(&self) -> usize {
        self.state.lock().unwrap().max_running
    }

    /// Whether any sandbox has begun `stage`.
    pub fn has_entered(&self, stage: SandboxStage) -> bool {
        self.state.lock().unwrap().entered.contains(&stage)
    }

    /// Polls until some sandbox begins `stage`.
    pub async fn reached(&self, stage: SandboxStage) {
        while !self.has_entered(stage) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn enter(&self, stage: SandboxStage) {
        self.state.lock().unwrap().entered.push(stage);
        let stall = self
            .stalls
            .iter()
            .find(|(stalled, _)| *stalled == stage)
            .map(|(_, stall)| *stall);
        match stall {
            Some(Stall::For(delay)) => tokio::time::sleep(delay).await,
            Some(Stall::Forever) => std::future::pending::<()>().await,
            None => {}
        }
    }

    fn check(&self, stage: SandboxStage) -> Result<(), SandboxError> {
        if self.fail_at == Some(stage) {
            return Err(SandboxError::Runtime(format!("{} refused", stage)));
        }
        Ok(())
    }

    fn code_of(&self, sandbox_id: &str) -> Option<CreatedSandbox> {
        let index: usize = sandbox_id.strip_prefix("sbx-")?.parse().ok()?;
        self.state.lock().unwrap().created.get(index).cloned()
    }
}

#[async_trait]
impl SandboxExecutor for MockSandbox {
    async fn create(&self, image: &str, host_path: &Path) -> Result<String, SandboxError> {
        self.enter(SandboxStage::Create).await;
        self.check(SandboxStage::Create)?;

        let entries: Vec<_> = std::fs::read_dir(host_path)
            .map_err(|e| SandboxError::Runtime(e.to_string()))?
            .filter_map(Result::ok)
            .collect();
        assert_eq!(entries.len(), 1, "workspace must hold exactly one file");
        let filename = entries[0].file_name().to_string_lossy().to_string();
        let code = std::fs::read_to_string(entries[0].path())
            .map_err(|e| SandboxError::Runtime(e.to_string()))?;

        let mut state = self.state.lock().unwrap();
        let id = format!("sbx-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        state.created.push(CreatedSandbox {
            image: image.to_string(),
            host_path: host_path.to_path_buf(),
            filename,
            code,
        });
        Ok(id)
    }

    async fn start(&self, sandbox_id: &str) -> Result<(), SandboxError> {
        self.enter(SandboxStage::Start).await;
        self.check(SandboxStage::Start)?;
        let mut state = self.state.lock().unwrap();
        state.running.insert(sandbox_id.to_string());
        state.max_running = state.max_running.max(state.running.len());
        Ok(())
    }

    async fn wait_until_exited(&self, sandbox_id: &str) -> WaitOutcome {
        self.state.lock().unwrap().entered.push(SandboxStage::Wait);
        match &self.wait {
            WaitBehavior::Immediate => {}
            WaitBehavior::Delay(delay) => tokio::time::sleep(*delay).await,
            WaitBehavior::UntilReleased => {
                if let Ok(permit) = self.gate.acquire().await {
                    permit.forget();
                }
            }
        }
        self.state.lock().unwrap().running.remove(sandbox_id);

        self.wait_outcome.clone().unwrap_or(WaitOutcome::Exited(0))
    }

    async fn fetch_output(&self, sandbox_id: &str) -> Result<SandboxOutput, SandboxError> {
        self.enter(SandboxStage::FetchOutput).await;
        self.check(SandboxStage::FetchOutput)?;
        let created = self
            .code_of(sandbox_id)
            .ok_or_else(|| SandboxError::NotFound(sandbox_id.to_string()))?;
        Ok((self.responder)(&created.filename, &created.code))
    }

    async fn remove(&self, sandbox_id: &str) -> Result<(), SandboxError> {
        self.enter(SandboxStage::Remove).await;
        self.check(SandboxStage::Remove)?;
        let mut state = self.state.lock().unwrap();
        state.running.remove(sandbox_id);
        state.removed.push(sandbox_id.to_string());
        Ok(())
    }
}

/// Hands every worker a clone of one [`MockSandbox`], refusing the listed
/// worker slots.
pub struct MockConnector {
    sandbox: MockSandbox,
    refuse: HashSet<usize>,
    attempts: AtomicUsize,
}

impl MockConnector {
    pub fn new(sandbox: MockSandbox) -> Self {
        Self {
            sandbox,
            refuse: HashSet::new(),
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn refusing(mut self, slots: impl IntoIterator<Item = usize>) -> Self {
        self.refuse.extend(slots);
        self
    }
}

impl SandboxConnector for MockConnector {
    fn connect(&self) -> Result<Arc<dyn SandboxExecutor>, SandboxError> {
        let slot = self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.refuse.contains(&slot) {
            return Err(SandboxError::ConnectionFailed(format!(
                "daemon unreachable for slot {}",
                slot
            )));
        }
        Ok(Arc::new(self.sandbox.clone()))
    }
}

/// Toy interpreter: `print('x')` lines become `x\n` on stdout, and Java
/// sources without a `Main` class fail to compile on stderr.
pub fn toy_runtime(filename: &str, code: &str) -> SandboxOutput {
    if filename == "Main.java" {
        if code.contains("class Main") {
            return SandboxOutput::new("", "");
        }
        return SandboxOutput::new(
            "",
            "Main.java:1: error: class, interface, enum, or record expected\n1 error\n",
        );
    }

    let stdout: String = code
        .lines()
        .filter_map(|line| {
            line.trim()
                .strip_prefix("print('")
                .and_then(|rest| rest.strip_suffix("')"))
        })
        .map(|text| format!("{}\n", text))
        .collect();
    SandboxOutput::new(stdout, "")
}

pub fn settings_in(root: &Path) -> RunnerSettings {
    RunnerSettings {
        execution_timeout: Duration::from_secs(5),
        workspace: WorkspaceConfig {
            root: Some(root.to_path_buf()),
            prefix: "temp".to_string(),
        },
    }
}

/// Counts the entries left under a workspace root.
pub fn leftover_workspaces(root: &Path) -> usize {
    std::fs::read_dir(root).map(|entries| entries.count()).unwrap_or(0)
}

pub fn counts_by_id<'a>(ids: impl IntoIterator<Item = &'a str>) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for id in ids {
        *counts.entry(id.to_string()).or_insert(0) += 1;
    }
    counts
}
