use std::path::{Path, PathBuf};

use getset::Getters;

use crate::{
    config::DevlabConfig,
    docker::DockerHelper,
    state::EnvState,
    DevlabResult,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The label every devlab-managed object carries, across all projects.
pub const DEVLAB_TYPE_LABEL: &str = "com.lab.type=devlab";

/// The label key recording which project directory owns an object.
pub const PROJECT_LABEL_KEY: &str = "com.lab.project";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Everything an orchestration action needs for one project: the loaded configuration, the
/// project root, and a runtime gateway scoped to this project's ownership label.
///
/// The global multi-project actions build one context per discovered project instead of
/// mutating shared state.
#[derive(Debug, Clone, Getters)]
pub struct DevlabContext {
    /// The project root directory.
    #[getset(get = "pub with_prefix")]
    project_root: PathBuf,

    /// The configuration file the context was loaded from.
    #[getset(get = "pub with_prefix")]
    config_path: PathBuf,

    /// The loaded project configuration.
    #[getset(get = "pub with_prefix")]
    config: DevlabConfig,

    /// The runtime gateway, filtered to this project.
    #[getset(get = "pub with_prefix")]
    docker: DockerHelper,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl DevlabContext {
    /// Loads the context for the project at `root`, or the project found by walking up from
    /// the current directory when `root` is `None`.
    pub async fn load(root: Option<PathBuf>) -> DevlabResult<Self> {
        let start = match root {
            Some(root) => root,
            None => std::env::current_dir()?,
        };
        let (config, project_root, config_path) = DevlabConfig::discover(&start).await?;

        let project_label = format!("{}={}", PROJECT_LABEL_KEY, project_root.display());
        let docker = DockerHelper::init(
            Some(project_label.clone()),
            vec![DEVLAB_TYPE_LABEL.to_string(), project_label],
            Some(config.get_domain().clone()),
        )
        .await?;

        Ok(Self {
            project_root,
            config_path,
            config,
            docker,
        })
    }

    /// Builds a context from already loaded parts. [`load`](Self::load) is the usual entry
    /// point; this one exists for callers that manage discovery and the gateway themselves.
    pub fn from_parts(
        project_root: PathBuf,
        config_path: PathBuf,
        config: DevlabConfig,
        docker: DockerHelper,
    ) -> Self {
        Self {
            project_root,
            config_path,
            config,
            docker,
        }
    }

    /// Builds a gateway for devlab's own base images: labeled as devlab-managed but not
    /// tied to any single project.
    pub async fn base_image_docker(&self) -> DevlabResult<DockerHelper> {
        DockerHelper::init(
            None,
            vec![DEVLAB_TYPE_LABEL.to_string()],
            Some(self.config.get_domain().clone()),
        )
        .await
    }

    /// Returns the path of this project's persisted environment file.
    pub fn up_env_file(&self) -> PathBuf {
        self.config.up_env_file(&self.project_root)
    }

    /// Loads this project's persisted environment state.
    pub async fn env_state(&self) -> DevlabResult<EnvState> {
        EnvState::load(self.up_env_file()).await
    }

    /// Returns the configured network name, if the project manages one.
    pub fn network_name(&self) -> Option<&str> {
        self.config.get_network().get_name().as_deref()
    }
}

/// Builds a gateway that sees every devlab-managed object across all projects.
pub async fn global_docker() -> DevlabResult<DockerHelper> {
    DockerHelper::init(Some(DEVLAB_TYPE_LABEL.to_string()), vec![], None).await
}

/// Extracts the owning project path from a container's inspect labels.
pub fn project_from_labels(details: &serde_json::Value) -> Option<String> {
    details
        .pointer(&format!("/Config/Labels/{}", PROJECT_LABEL_KEY))
        .and_then(|value| value.as_str())
        .map(|value| value.to_string())
}

impl AsRef<Path> for DevlabContext {
    fn as_ref(&self) -> &Path {
        &self.project_root
    }
}
