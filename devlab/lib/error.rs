use std::{
    error::Error,
    fmt::{self, Display},
    path::PathBuf,
};
use thiserror::Error;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a devlab-related operation.
pub type DevlabResult<T> = Result<T, DevlabError>;

/// An error that occurred during a devlab operation.
#[derive(Debug, Error)]
pub enum DevlabError {
    /// An I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An error that can represent any error.
    #[error(transparent)]
    Custom(#[from] AnyError),

    /// An error that occurred while serializing or deserializing JSON.
    #[error("serde json error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    /// An error that occurred while serializing or deserializing YAML.
    #[error("serde yaml error: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),

    /// An error that occurred during a unix signal or process operation.
    #[error("process signal error: {0}")]
    Signal(#[from] nix::Error),

    /// An error that occurred when a join handle returned an error.
    #[error("join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),

    /// No project configuration file was found.
    #[error("no devlab configuration found starting from: {0}")]
    ConfigNotFound(PathBuf),

    /// A component name did not match any configured component.
    #[error("unknown component: {0}")]
    UnknownComponent(String),

    /// A docker object with a matching name exists but is not labeled as belonging to
    /// this project.
    #[error("{kind} '{name}' exists but is not managed by this devlab project")]
    OwnershipConflict {
        /// The kind of docker object (container, image, network).
        kind: String,

        /// The name of the conflicting object.
        name: String,
    },

    /// No supported container engine executable was found on the PATH.
    #[error("no container engine found (tried docker, podman)")]
    EngineNotFound,

    /// The container engine executable exists but is not usable.
    #[error("container engine is not usable: {0}")]
    EngineUnusable(String),

    /// A provisioning script failed.
    #[error("script '{script}' for component '{component}' failed with exit code {code}")]
    ScriptFailure {
        /// The component the script belongs to.
        component: String,

        /// The script string as configured.
        script: String,

        /// The exit code the script returned.
        code: i32,
    },

    /// A script string could not be parsed.
    #[error("invalid script: {0}")]
    InvalidScript(String),

    /// An image reference string could not be parsed.
    #[error("invalid image reference: {0}")]
    InvalidImageReference(String),

    /// A child process had to be killed after ignoring its termination signal.
    #[error("process '{0}' did not exit after termination and was killed")]
    ProcessHung(String),

    /// A host component process survived the full kill escalation.
    #[error("host process for component '{component}' (pid {pid}) could not be stopped")]
    HostProcessSurvived {
        /// The component the process belongs to.
        component: String,

        /// The pid of the surviving process.
        pid: i32,
    },

    /// One or more components failed to come up.
    #[error("{count} component(s) failed to start")]
    ComponentsFailed {
        /// The number of components that failed.
        count: usize,
    },

    /// An image referencing a custom registry can not be pulled because the registry has
    /// no stored credentials.
    #[error("registry '{0}' requires authentication, run 'docker login {0}' first")]
    RegistryNotLoggedIn(String),

    /// An action requires a running container that is not running.
    #[error("component '{0}' has no running container")]
    ContainerNotRunning(String),

    /// A required build file is missing.
    #[error("dockerfile not found: {0}")]
    DockerfileNotFound(PathBuf),
}

/// An error that can represent any error.
#[derive(Debug)]
pub struct AnyError {
    error: anyhow::Error,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl DevlabError {
    /// Creates a new `Err` result.
    pub fn custom(error: impl Into<anyhow::Error>) -> DevlabError {
        DevlabError::Custom(AnyError {
            error: error.into(),
        })
    }
}

impl AnyError {
    /// Downcasts the error to a `T`.
    pub fn downcast<T>(&self) -> Option<&T>
    where
        T: Display + fmt::Debug + Send + Sync + 'static,
    {
        self.error.downcast_ref::<T>()
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Creates an `Ok` `DevlabResult`.
#[allow(non_snake_case)]
pub fn Ok<T>(value: T) -> DevlabResult<T> {
    Result::Ok(value)
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl PartialEq for AnyError {
    fn eq(&self, other: &Self) -> bool {
        self.error.to_string() == other.error.to_string()
    }
}

impl Display for AnyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl Error for AnyError {}
