use std::{
    collections::{BTreeSet, HashMap},
    path::{Path, PathBuf},
};

use getset::Getters;
use serde::{Deserialize, Serialize};
use tracing::debug;
use typed_builder::TypedBuilder;

use crate::{
    config::{Component, ForegroundComponent, Ordinal, DEFAULT_DOMAIN, DEFAULT_NETWORK_DRIVER},
    state::UP_ENV_FILE,
    utils::find_project_root,
    DevlabError, DevlabResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The project configuration, loaded from a `DevlabConfig.{json,yaml,yml}` file at the
/// project root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Getters)]
#[getset(get = "pub with_prefix")]
pub struct DevlabConfig {
    /// The DNS domain containers are given.
    #[serde(default = "default_domain")]
    pub(super) domain: String,

    /// Whether the first-run wizard is enabled for this project.
    #[serde(default = "default_true")]
    pub(super) wizard_enabled: bool,

    /// The components making up the environment, by name.
    #[serde(default)]
    pub(super) components: HashMap<String, Component>,

    /// The single component run attached, if any.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub(super) foreground_component: Option<ForegroundComponent>,

    /// The project network, created on `up` when named.
    #[serde(default)]
    pub(super) network: NetworkConfig,

    /// Project-relative paths devlab manages.
    #[serde(default)]
    pub(super) paths: PathsConfig,

    /// Components whose persisted state must be wiped when the host address changes.
    /// Matched by name prefix.
    #[serde(default)]
    pub(super) reprovisionable_components: Vec<String>,

    /// Project-declared images built from project dockerfiles.
    #[serde(default)]
    pub(super) runtime_images: HashMap<String, RuntimeImage>,

    /// Disable buildkit when building images.
    #[serde(default)]
    pub(super) disable_buildkit: bool,
}

/// The project network configuration.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder, PartialEq, Getters)]
#[getset(get = "pub with_prefix")]
pub struct NetworkConfig {
    /// The network name. Unnamed means no project network is managed.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(default, setter(strip_option, into))]
    pub(super) name: Option<String>,

    /// The subnet in CIDR notation.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(default, setter(strip_option, into))]
    pub(super) cidr: Option<String>,

    /// The gateway address.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(default, setter(strip_option, into))]
    pub(super) gateway: Option<String>,

    /// The address range containers are assigned from.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(default, setter(strip_option, into))]
    pub(super) ip_range: Option<String>,

    /// Enable ipv6 on the network.
    #[serde(default)]
    #[builder(default)]
    pub(super) ipv6: bool,

    /// The network driver.
    #[serde(default = "default_network_driver")]
    #[builder(default = DEFAULT_NETWORK_DRIVER.to_string(), setter(into))]
    pub(super) driver: String,

    /// The exact bridge device name to create.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(default, setter(strip_option, into))]
    pub(super) device_name: Option<String>,
}

/// Project-relative paths devlab manages.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Getters)]
#[getset(get = "pub with_prefix")]
pub struct PathsConfig {
    /// The directory components persist state under, relative to the project root.
    #[serde(default)]
    pub(super) component_persistence: String,

    /// Project-relative paths wiped when resetting devlab's own state.
    #[serde(default)]
    pub(super) reset_paths: Vec<String>,

    /// Paths additionally wiped by `reset --full`, relative to the project root.
    #[serde(default)]
    pub(super) reset_full: Vec<String>,

    /// First-run wizard marker files beneath the persistence directory, cleared by
    /// `reset --full`.
    #[serde(default)]
    pub(super) component_persistence_wizard_paths: Vec<String>,
}

/// A project-declared image built from a project dockerfile.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder, PartialEq, Getters)]
#[getset(get = "pub with_prefix")]
pub struct RuntimeImage {
    /// The tag the image is built as.
    #[serde(default = "default_tag")]
    #[builder(default = "latest".to_string(), setter(into))]
    pub(super) tag: String,

    /// The dockerfile, relative to the project root.
    #[builder(setter(into))]
    pub(super) docker_file: String,

    /// Extra options appended to the build invocation.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    #[builder(default)]
    pub(super) build_opts: Vec<String>,

    /// Never pass `--pull` when building this image.
    #[serde(default)]
    #[builder(default)]
    pub(super) skip_pull: bool,

    /// Where the image sorts among builds.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(default, setter(strip_option))]
    pub(super) ordinal: Option<Ordinal>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl DevlabConfig {
    /// Loads a configuration file, dispatching on its extension (`.json` vs `.yaml`/`.yml`).
    pub async fn load(path: &Path) -> DevlabResult<Self> {
        let contents = tokio::fs::read_to_string(path).await?;
        let config = match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&contents)?,
            _ => serde_json::from_str(&contents)?,
        };
        Ok(config)
    }

    /// Walks up from `start` to find and load the project configuration.
    ///
    /// Returns the configuration, the project root, and the configuration file path.
    pub async fn discover(start: &Path) -> DevlabResult<(Self, PathBuf, PathBuf)> {
        let (root, config_path) = find_project_root(start)
            .ok_or_else(|| DevlabError::ConfigNotFound(start.to_path_buf()))?;
        debug!("found project config: {}", config_path.display());

        let config = Self::load(&config_path).await?;
        Ok((config, root, config_path))
    }

    /// Resolves a set of requested component names against the configuration.
    ///
    /// Each filter matches exactly, as a glob pattern, or as a name prefix; `*` therefore
    /// selects everything. A filter matching nothing fails with
    /// [`UnknownComponent`](DevlabError::UnknownComponent). Names in `virtual_components`
    /// are accepted verbatim even though no component defines them. The result is sorted
    /// and deduplicated.
    pub fn resolve_components(
        &self,
        filters: &[String],
        enabled_only: bool,
        virtual_components: &[&str],
    ) -> DevlabResult<Vec<String>> {
        let mut all: Vec<String> = self
            .components
            .iter()
            .filter(|(_, comp)| !enabled_only || *comp.get_enabled())
            .map(|(name, _)| name.clone())
            .collect();
        if let Some(fg) = &self.foreground_component {
            all.push(fg.get_name().clone());
        }

        if filters.is_empty() {
            all.sort();
            return Ok(all);
        }

        let mut selected = BTreeSet::new();
        for filter in filters {
            if virtual_components.contains(&filter.as_str()) {
                debug!("selecting '{}' as a virtual component", filter);
                selected.insert(filter.clone());
                continue;
            }

            let pattern = glob::Pattern::new(filter).ok();
            let mut found = false;
            for name in &all {
                let matched = name == filter
                    || pattern
                        .as_ref()
                        .map(|pat| pat.matches(name))
                        .unwrap_or(false)
                    || name.starts_with(filter.as_str());
                if matched {
                    found = true;
                    selected.insert(name.clone());
                }
            }

            if !found {
                return Err(DevlabError::UnknownComponent(filter.clone()));
            }
        }

        Ok(selected.into_iter().collect())
    }

    /// Looks up a component by name, checking the foreground component too.
    pub fn find_component(&self, name: &str) -> Option<&Component> {
        if let Some(fg) = &self.foreground_component {
            if fg.get_name() == name {
                return Some(fg.get_component());
            }
        }
        self.components.get(name)
    }

    /// Returns the name of the foreground component, if one is configured.
    pub fn foreground_name(&self) -> Option<&str> {
        self.foreground_component
            .as_ref()
            .map(|fg| fg.get_name().as_str())
    }

    /// Returns the directory components persist state under.
    pub fn persistence_dir(&self, project_root: &Path) -> PathBuf {
        project_root.join(&self.paths.component_persistence)
    }

    /// Returns the path of the persisted environment file for this project.
    pub fn up_env_file(&self, project_root: &Path) -> PathBuf {
        self.persistence_dir(project_root).join(UP_ENV_FILE)
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn default_domain() -> String {
    DEFAULT_DOMAIN.to_string()
}

fn default_network_driver() -> String {
    DEFAULT_NETWORK_DRIVER.to_string()
}

fn default_tag() -> String {
    "latest".to_string()
}

fn default_true() -> bool {
    true
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for DevlabConfig {
    fn default() -> Self {
        Self {
            domain: default_domain(),
            wizard_enabled: true,
            components: HashMap::new(),
            foreground_component: None,
            network: NetworkConfig::default(),
            paths: PathsConfig::default(),
            reprovisionable_components: vec![],
            runtime_images: HashMap::new(),
            disable_buildkit: false,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            name: None,
            cidr: None,
            gateway: None,
            ip_range: None,
            ipv6: false,
            driver: default_network_driver(),
            device_name: None,
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> DevlabConfig {
        serde_yaml::from_str(
            r#"
components:
  ledger-db:
    image: postgres:16
    ordinal:
      group: 0
      number: 1
  api:
    image: devlab_api:latest
  api-metrics:
    image: devlab_metrics:latest
  worker:
    enabled: false
    image: devlab_worker:latest
foreground_component:
  name: cli
  image: devlab_base:latest
network:
  name: devlab
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_defaults_fill_in() {
        let config: DevlabConfig = serde_yaml::from_str("components: {}").unwrap();
        assert_eq!(config.get_domain(), DEFAULT_DOMAIN);
        assert!(*config.get_wizard_enabled());
        assert_eq!(config.get_network().get_name(), &None);
        assert_eq!(config.get_network().get_driver(), DEFAULT_NETWORK_DRIVER);
    }

    #[test]
    fn test_get_components_wildcard_includes_foreground() {
        let config = sample_config();
        let components = config
            .resolve_components(&["*".to_string()], true, &[])
            .unwrap();
        assert_eq!(
            components,
            vec!["api", "api-metrics", "cli", "ledger-db"]
        );
    }

    #[test]
    fn test_get_components_disabled_included_when_asked() {
        let config = sample_config();
        let components = config
            .resolve_components(&["*".to_string()], false, &[])
            .unwrap();
        assert!(components.contains(&"worker".to_string()));
    }

    #[test]
    fn test_get_components_prefix_and_exact() {
        let config = sample_config();
        let components = config
            .resolve_components(&["api".to_string()], true, &[])
            .unwrap();
        assert_eq!(components, vec!["api", "api-metrics"]);

        let exact = config
            .resolve_components(&["ledger-db".to_string()], true, &[])
            .unwrap();
        assert_eq!(exact, vec!["ledger-db"]);
    }

    #[test]
    fn test_get_components_unknown_fails() {
        let config = sample_config();
        let err = config
            .resolve_components(&["nope".to_string()], true, &[])
            .unwrap_err();
        assert!(matches!(err, DevlabError::UnknownComponent(name) if name == "nope"));
    }

    #[test]
    fn test_get_components_virtual_passes_through() {
        let config = sample_config();
        let components = config
            .resolve_components(&["devlab".to_string()], true, &["devlab"])
            .unwrap();
        assert_eq!(components, vec!["devlab"]);
    }

    #[test]
    fn test_up_env_file_under_persistence_dir() {
        let mut config = sample_config();
        config.paths.component_persistence = "persist".to_string();
        assert_eq!(
            config.up_env_file(Path::new("/proj")),
            PathBuf::from("/proj/persist/devlab_up.env")
        );
    }

    #[tokio::test]
    async fn test_discover_loads_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("src/deep");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(
            dir.path().join("DevlabConfig.yaml"),
            "components:\n  db:\n    image: postgres:16\n",
        )
        .unwrap();

        let (config, root, path) = DevlabConfig::discover(&nested).await.unwrap();
        assert_eq!(root, dir.path());
        assert_eq!(path, dir.path().join("DevlabConfig.yaml"));
        assert!(config.get_components().contains_key("db"));
    }
}
