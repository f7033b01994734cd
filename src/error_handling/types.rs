use std::fmt;

use crate::registry::record::ContainerStatus;

/// Coarse classification used by callers to decide what to tell the user.
///
/// - `InvalidRequest`: the request itself was wrong (unsupported language, bad path...).
/// - `Unavailable`: the system could not honor it right now (ports exhausted, engine down).
/// - `StartupFailed`: a container was created but the application never came up.
/// - `Internal`: persistence or other unexpected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidRequest,
    Unavailable,
    StartupFailed,
    Internal,
}

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    BadPortsRange(String),
    BadTtlBounds(String),
    NotInRange(String),
    UnknownLanguage(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::BadPortsRange(e) => write!(f, "Port range error: {}", e),
            ConfigError::BadTtlBounds(e) => write!(f, "TTL bounds error: {}", e),
            ConfigError::NotInRange(e) => write!(f, "Value out of range: {}", e),
            ConfigError::UnknownLanguage(e) => write!(f, "Unknown language table entry: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

#[derive(Debug)]
pub enum RuntimeError {
    Unavailable(String),
    CommandFailed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },
    NotFound(String),
    IoError(std::io::Error),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::Unavailable(e) => write!(f, "Container runtime not available: {}", e),
            RuntimeError::CommandFailed {
                command,
                status,
                stderr,
            } => match status {
                Some(code) => write!(
                    f,
                    "Runtime command `{}` failed with status {}: {}",
                    command,
                    code,
                    stderr.trim()
                ),
                None => write!(f, "Runtime command `{}` failed: {}", command, stderr.trim()),
            },
            RuntimeError::NotFound(id) => write!(f, "Container {} not found", id),
            RuntimeError::IoError(e) => write!(f, "Runtime IO error: {}", e),
        }
    }
}

impl std::error::Error for RuntimeError {}

impl From<std::io::Error> for RuntimeError {
    fn from(err: std::io::Error) -> Self {
        RuntimeError::IoError(err)
    }
}

#[derive(Debug)]
pub enum StorageError {
    ReadFailed(String),
    WriteFailed(String),
    Corrupt(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::ReadFailed(e) => write!(f, "Storage read failed: {}", e),
            StorageError::WriteFailed(e) => write!(f, "Storage write failed: {}", e),
            StorageError::Corrupt(e) => write!(f, "Registry document is corrupt: {}", e),
        }
    }
}

impl std::error::Error for StorageError {}

#[derive(Debug)]
pub enum RegistryError {
    NotFound(String),
    DuplicateId(String),
    PortInUse(u16),
    InvalidTransition {
        id: String,
        from: ContainerStatus,
        to: ContainerStatus,
    },
    Storage(StorageError),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::NotFound(id) => write!(f, "Record {} not found", id),
            RegistryError::DuplicateId(id) => write!(f, "Record {} already exists", id),
            RegistryError::PortInUse(port) => {
                write!(f, "Port {} is already held by a live record", port)
            }
            RegistryError::InvalidTransition { id, from, to } => write!(
                f,
                "Record {} cannot move from {:?} to {:?}",
                id, from, to
            ),
            RegistryError::Storage(e) => write!(f, "Registry storage error: {}", e),
        }
    }
}

impl std::error::Error for RegistryError {}

impl From<StorageError> for RegistryError {
    fn from(err: StorageError) -> Self {
        RegistryError::Storage(err)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum PortError {
    NoPortsAvailable { start: u16, end: u16 },
}

impl fmt::Display for PortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortError::NoPortsAvailable { start, end } => {
                write!(f, "No ports available in range {}-{}", start, end)
            }
        }
    }
}

impl std::error::Error for PortError {}

#[derive(Debug)]
pub enum WorkspaceError {
    InvalidPath(String),
    IoError(std::io::Error),
}

impl fmt::Display for WorkspaceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkspaceError::InvalidPath(p) => write!(f, "Invalid project file path: {}", p),
            WorkspaceError::IoError(e) => write!(f, "Workspace IO error: {}", e),
        }
    }
}

impl std::error::Error for WorkspaceError {}

impl From<std::io::Error> for WorkspaceError {
    fn from(err: std::io::Error) -> Self {
        WorkspaceError::IoError(err)
    }
}

#[derive(Debug)]
pub enum ExecutionError {
    UnsupportedLanguage(String),
    NoEntryFile(String),
    Workspace(WorkspaceError),
    Runtime(RuntimeError),
    Registry(RegistryError),
}

impl ExecutionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecutionError::UnsupportedLanguage(_)
            | ExecutionError::NoEntryFile(_)
            | ExecutionError::Workspace(WorkspaceError::InvalidPath(_)) => ErrorKind::InvalidRequest,
            ExecutionError::Runtime(_) => ErrorKind::Unavailable,
            ExecutionError::Workspace(_) | ExecutionError::Registry(_) => ErrorKind::Internal,
        }
    }
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionError::UnsupportedLanguage(l) => {
                write!(f, "Execution is not supported for language '{}'", l)
            }
            ExecutionError::NoEntryFile(l) => write!(f, "No executable entry file found for {}", l),
            ExecutionError::Workspace(e) => write!(f, "{}", e),
            ExecutionError::Runtime(e) => write!(f, "{}", e),
            ExecutionError::Registry(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ExecutionError {}

impl From<WorkspaceError> for ExecutionError {
    fn from(err: WorkspaceError) -> Self {
        ExecutionError::Workspace(err)
    }
}

impl From<RuntimeError> for ExecutionError {
    fn from(err: RuntimeError) -> Self {
        ExecutionError::Runtime(err)
    }
}

impl From<RegistryError> for ExecutionError {
    fn from(err: RegistryError) -> Self {
        ExecutionError::Registry(err)
    }
}

#[derive(Debug)]
pub enum PreviewError {
    UnsupportedLanguage(String),
    UnsupportedFramework(String),
    PortsExhausted(PortError),
    AlreadyRunning { id: String, url: String },
    StartupFailed { reason: String, logs: String },
    Workspace(WorkspaceError),
    Runtime(RuntimeError),
    Registry(RegistryError),
}

impl PreviewError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PreviewError::UnsupportedLanguage(_)
            | PreviewError::UnsupportedFramework(_)
            | PreviewError::AlreadyRunning { .. }
            | PreviewError::Workspace(WorkspaceError::InvalidPath(_)) => ErrorKind::InvalidRequest,
            PreviewError::PortsExhausted(_) | PreviewError::Runtime(_) => ErrorKind::Unavailable,
            PreviewError::StartupFailed { .. } => ErrorKind::StartupFailed,
            PreviewError::Workspace(_) | PreviewError::Registry(_) => ErrorKind::Internal,
        }
    }
}

impl fmt::Display for PreviewError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreviewError::UnsupportedLanguage(l) => {
                write!(f, "Preview is not supported for language '{}'", l)
            }
            PreviewError::UnsupportedFramework(fw) => {
                write!(f, "Preview is not supported for framework '{}'", fw)
            }
            PreviewError::PortsExhausted(e) => write!(f, "{}", e),
            PreviewError::AlreadyRunning { id, url } => {
                write!(f, "Preview {} is already running at {}", id, url)
            }
            PreviewError::StartupFailed { reason, .. } => {
                write!(f, "Preview failed to start: {}", reason)
            }
            PreviewError::Workspace(e) => write!(f, "{}", e),
            PreviewError::Runtime(e) => write!(f, "{}", e),
            PreviewError::Registry(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for PreviewError {}

impl From<PortError> for PreviewError {
    fn from(err: PortError) -> Self {
        PreviewError::PortsExhausted(err)
    }
}

impl From<WorkspaceError> for PreviewError {
    fn from(err: WorkspaceError) -> Self {
        PreviewError::Workspace(err)
    }
}

impl From<RuntimeError> for PreviewError {
    fn from(err: RuntimeError) -> Self {
        PreviewError::Runtime(err)
    }
}

impl From<RegistryError> for PreviewError {
    fn from(err: RegistryError) -> Self {
        PreviewError::Registry(err)
    }
}

#[derive(Debug)]
pub enum ControllerError {
    ConfigurationError(ConfigError),
    RuntimeError(RuntimeError),
    RegistryError(RegistryError),
    InitializationFailed(String),
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerError::ConfigurationError(e) => write!(f, "Configuration error: {}", e),
            ControllerError::RuntimeError(e) => write!(f, "Runtime error: {}", e),
            ControllerError::RegistryError(e) => write!(f, "Registry error: {}", e),
            ControllerError::InitializationFailed(e) => write!(f, "Initialization failed: {}", e),
        }
    }
}

impl std::error::Error for ControllerError {}

impl From<ConfigError> for ControllerError {
    fn from(err: ConfigError) -> Self {
        ControllerError::ConfigurationError(err)
    }
}

impl From<RuntimeError> for ControllerError {
    fn from(err: RuntimeError) -> Self {
        ControllerError::RuntimeError(err)
    }
}

impl From<RegistryError> for ControllerError {
    fn from(err: RegistryError) -> Self {
        ControllerError::RegistryError(err)
    }
}
