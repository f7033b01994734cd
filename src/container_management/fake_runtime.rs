//! In-memory container engine for tests.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

use super::output_buffer::OutputBuffer;
use super::runtime::ContainerRuntime;
use super::types::{ContainerSpec, ContainerState, LogOutput, RunState};
use crate::error_handling::types::RuntimeError;

/// What a fake container does once started.
#[derive(Debug, Clone)]
pub enum FakeProgram {
    /// Exits right away with the given code and output.
    Exit {
        code: i64,
        stdout: String,
        stderr: String,
    },
    /// Runs until stopped.
    Hang,
    /// Runs until stopped and prints a startup banner.
    Serve,
}

impl FakeProgram {
    pub fn exit(code: i64, stdout: &str, stderr: &str) -> Self {
        FakeProgram::Exit {
            code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }
}

struct FakeContainer {
    spec: ContainerSpec,
    program: FakeProgram,
    state: RunState,
    exit_code: Option<i64>,
    files: BTreeMap<String, String>,
}

type Behavior = Box<dyn Fn(&ContainerSpec) -> FakeProgram + Send + Sync>;

pub struct FakeRuntime {
    behavior: Behavior,
    containers: Mutex<HashMap<String, FakeContainer>>,
    specs: Mutex<Vec<ContainerSpec>>,
    next_id: AtomicUsize,
    fail_create: AtomicBool,
    fail_remove: AtomicBool,
    fail_inspect: AtomicBool,
    pull_delay_ms: AtomicU64,
    exited: Notify,
}

impl FakeRuntime {
    /// Every container exits 0 without output.
    pub fn new() -> Self {
        Self::with_behavior(|_| FakeProgram::exit(0, "", ""))
    }

    pub fn with_behavior<F>(behavior: F) -> Self
    where
        F: Fn(&ContainerSpec) -> FakeProgram + Send + Sync + 'static,
    {
        Self {
            behavior: Box::new(behavior),
            containers: Mutex::new(HashMap::new()),
            specs: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(1),
            fail_create: AtomicBool::new(false),
            fail_remove: AtomicBool::new(false),
            fail_inspect: AtomicBool::new(false),
            pull_delay_ms: AtomicU64::new(0),
            exited: Notify::new(),
        }
    }

    fn containers(&self) -> std::sync::MutexGuard<'_, HashMap<String, FakeContainer>> {
        self.containers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_remove(&self, fail: bool) {
        self.fail_remove.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_inspect(&self, fail: bool) {
        self.fail_inspect.store(fail, Ordering::SeqCst);
    }

    /// Makes every `ensure_image` take `delay`, like a slow pull.
    pub fn set_pull_delay(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.pull_delay_ms.store(millis, Ordering::SeqCst);
    }

    /// Removes a container behind the system's back.
    pub fn kill_externally(&self, id: &str) {
        self.containers().remove(id);
        self.exited.notify_waiters();
    }

    /// Makes a running container exit with `code`.
    pub fn crash(&self, id: &str, code: i64) {
        if let Some(container) = self.containers().get_mut(id) {
            container.state = RunState::Exited;
            container.exit_code = Some(code);
        }
        self.exited.notify_waiters();
    }

    pub fn exists(&self, id: &str) -> bool {
        self.containers().contains_key(id)
    }

    /// Containers the engine still knows about.
    pub fn live_count(&self) -> usize {
        self.containers().len()
    }

    pub fn container_ids(&self) -> Vec<String> {
        self.containers().keys().cloned().collect()
    }

    pub fn created_count(&self) -> usize {
        self.specs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Specs of every container ever created, in order.
    pub fn specs(&self) -> Vec<ContainerSpec> {
        self.specs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn files_of(&self, id: &str) -> BTreeMap<String, String> {
        self.containers()
            .get(id)
            .map(|c| c.files.clone())
            .unwrap_or_default()
    }

    /// Adds a file as if the container had written it.
    pub fn write_file(&self, id: &str, path: &str, content: &str) {
        if let Some(container) = self.containers().get_mut(id) {
            container.files.insert(path.to_string(), content.to_string());
        }
    }
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

fn read_tree(root: &Path, dir: &Path, out: &mut BTreeMap<String, String>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            read_tree(root, &path, out)?;
        } else {
            let relative = path
                .strip_prefix(root)
                .map(|p| p.to_string_lossy().replace('\\', "/"))
                .unwrap_or_default();
            out.insert(relative, std::fs::read_to_string(&path).unwrap_or_default());
        }
    }
    Ok(())
}

fn tail_lines(text: &str, tail: Option<usize>) -> String {
    match tail {
        None => text.to_string(),
        Some(n) => {
            let lines: Vec<&str> = text.lines().collect();
            let start = lines.len().saturating_sub(n);
            let mut out = lines[start..].join("\n");
            if !out.is_empty() && text.ends_with('\n') {
                out.push('\n');
            }
            out
        }
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn ensure_image(&self, _image: &str) -> Result<(), RuntimeError> {
        let delay = self.pull_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(RuntimeError::Unavailable("fake engine refuses create".into()));
        }
        let id = format!("fake-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let program = (self.behavior)(spec);
        self.specs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(spec.clone());
        self.containers().insert(
            id.clone(),
            FakeContainer {
                spec: spec.clone(),
                program,
                state: RunState::Created,
                exit_code: None,
                files: BTreeMap::new(),
            },
        );
        Ok(id)
    }

    async fn copy_into(
        &self,
        id: &str,
        host_dir: &Path,
        _container_dir: &str,
    ) -> Result<(), RuntimeError> {
        let mut files = BTreeMap::new();
        read_tree(host_dir, host_dir, &mut files)?;
        let mut containers = self.containers();
        let container = containers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        container.files.extend(files);
        Ok(())
    }

    async fn copy_out(
        &self,
        id: &str,
        _container_dir: &str,
        host_dir: &Path,
    ) -> Result<(), RuntimeError> {
        let files = self.files_of(id);
        if !self.exists(id) {
            return Err(RuntimeError::NotFound(id.to_string()));
        }
        for (relative, content) in files {
            let target = host_dir.join(relative);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(target, content)?;
        }
        Ok(())
    }

    async fn start(&self, id: &str) -> Result<(), RuntimeError> {
        let mut containers = self.containers();
        let container = containers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        match &container.program {
            FakeProgram::Exit { code, .. } => {
                container.state = RunState::Exited;
                container.exit_code = Some(*code);
            }
            FakeProgram::Hang | FakeProgram::Serve => container.state = RunState::Running,
        }
        drop(containers);
        self.exited.notify_waiters();
        Ok(())
    }

    async fn wait(&self, id: &str) -> Result<i64, RuntimeError> {
        loop {
            let notified = self.exited.notified();
            {
                let containers = self.containers();
                let container = containers
                    .get(id)
                    .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
                if container.state == RunState::Exited {
                    return Ok(container.exit_code.unwrap_or(0));
                }
            }
            notified.await;
        }
    }

    async fn stop(&self, id: &str, _grace: Duration) -> Result<(), RuntimeError> {
        if let Some(container) = self.containers().get_mut(id) {
            if container.state != RunState::Exited {
                container.state = RunState::Exited;
                container.exit_code = Some(137);
            }
        }
        self.exited.notify_waiters();
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), RuntimeError> {
        if self.fail_remove.load(Ordering::SeqCst) {
            return Err(RuntimeError::CommandFailed {
                command: format!("fake rm -f {}", id),
                status: Some(1),
                stderr: "device or resource busy".into(),
            });
        }
        self.containers().remove(id);
        self.exited.notify_waiters();
        Ok(())
    }

    async fn inspect(&self, id: &str) -> Result<Option<ContainerState>, RuntimeError> {
        if self.fail_inspect.load(Ordering::SeqCst) {
            return Err(RuntimeError::Unavailable("fake engine not answering".into()));
        }
        Ok(self.containers().get(id).map(|c| ContainerState {
            state: c.state,
            exit_code: c.exit_code,
        }))
    }

    async fn logs(
        &self,
        id: &str,
        tail: Option<usize>,
        limit: usize,
    ) -> Result<LogOutput, RuntimeError> {
        let containers = self.containers();
        let container = containers
            .get(id)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        if container.state == RunState::Created {
            return Ok(LogOutput::default());
        }
        let (stdout, stderr) = match &container.program {
            FakeProgram::Exit { stdout, stderr, .. } => (stdout.clone(), stderr.clone()),
            FakeProgram::Hang => (String::new(), String::new()),
            FakeProgram::Serve => (
                format!("serving {} on {}\n", container.spec.name, container.spec.image),
                String::new(),
            ),
        };
        Ok(LogOutput {
            stdout: OutputBuffer::bounded(&tail_lines(&stdout, tail), limit),
            stderr: OutputBuffer::bounded(&tail_lines(&stderr, tail), limit),
        })
    }
}
