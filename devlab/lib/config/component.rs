use getset::Getters;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::config::{Script, DEFAULT_ORDINAL_GROUP, DEFAULT_ORDINAL_NUMBER};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A `(group, number)` pair controlling where a component or image sorts among its peers.
///
/// Groups are compared first, then numbers. Uniqueness is not required.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, TypedBuilder, PartialEq, Eq, PartialOrd, Ord,
)]
pub struct Ordinal {
    /// The coarse ordering bucket.
    #[serde(default = "default_ordinal_group")]
    #[builder(default = DEFAULT_ORDINAL_GROUP)]
    pub(super) group: u32,

    /// The fine position within the group.
    #[serde(default = "default_ordinal_number")]
    #[builder(default = DEFAULT_ORDINAL_NUMBER)]
    pub(super) number: u32,
}

/// Whether a component is backed by a container or a host process.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    /// Backed by a container managed through the runtime gateway.
    #[default]
    Container,

    /// Backed by a process run directly on the operator's machine.
    Host,
}

/// A named unit of the development environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TypedBuilder, PartialEq, Getters)]
#[getset(get = "pub with_prefix")]
pub struct Component {
    /// Whether the component is a container or a host process.
    #[serde(rename = "type", default)]
    #[builder(default)]
    pub(super) kind: ComponentKind,

    /// Disabled components cannot be brought up.
    #[serde(default = "default_true")]
    #[builder(default = true)]
    pub(super) enabled: bool,

    /// Where the component sorts among its peers.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(default, setter(strip_option))]
    pub(super) ordinal: Option<Ordinal>,

    /// The image to run (container components).
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(default, setter(strip_option, into))]
    pub(super) image: Option<String>,

    /// The command to launch (host components).
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(default, setter(strip_option, into))]
    pub(super) cmd: Option<String>,

    /// The shell the `sh` action opens instead of `/bin/bash`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(default, setter(strip_option, into))]
    pub(super) shell: Option<String>,

    /// Volume mounts, relative paths resolved against the project root.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    #[builder(default)]
    pub(super) mounts: Vec<String>,

    /// Ports published to the host.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    #[builder(default)]
    pub(super) ports: Vec<String>,

    /// Extra options appended to the runtime's `run` invocation.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    #[builder(default)]
    pub(super) run_opts: Vec<String>,

    /// Give the container the tmpfs mounts systemd expects.
    #[serde(default)]
    #[builder(default)]
    pub(super) systemd_support: bool,

    /// Extra arguments for the systemd tmpfs mounts.
    #[serde(skip_serializing_if = "String::is_empty", default)]
    #[builder(default, setter(into))]
    pub(super) systemd_tmpfs_args: String,

    /// Scripts run before the component is created or launched.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    #[builder(default)]
    pub(super) pre_scripts: Vec<Script>,

    /// Provisioning scripts, run once when the container is first created.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    #[builder(default)]
    pub(super) scripts: Vec<Script>,

    /// Scripts run after a successful background start.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    #[builder(default)]
    pub(super) post_up_scripts: Vec<Script>,

    /// Scripts run while the component is still up, before it is stopped.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    #[builder(default)]
    pub(super) down_scripts: Vec<Script>,

    /// Scripts run after the component has been stopped.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    #[builder(default)]
    pub(super) post_down_scripts: Vec<Script>,

    /// A script whose JSON output refines the component's health in `status`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(default, setter(strip_option))]
    pub(super) status_script: Option<Script>,

    /// Persisted state paths deleted by `reset`, relative to the component's
    /// persistence directory.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    #[builder(default)]
    pub(super) reset_paths: Vec<String>,
}

/// The single component run attached and interactively, started last and stopped first.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder, PartialEq, Getters)]
#[getset(get = "pub with_prefix")]
pub struct ForegroundComponent {
    /// The component's name.
    #[builder(setter(into))]
    pub(super) name: String,

    /// The component's attributes.
    #[serde(flatten)]
    pub(super) component: Component,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Ordinal {
    /// Returns the group component of the pair.
    pub fn get_group(&self) -> u32 {
        self.group
    }

    /// Returns the number component of the pair.
    pub fn get_number(&self) -> u32 {
        self.number
    }
}

impl Component {
    /// Returns the component's ordinal, falling back to the default when none is declared.
    pub fn ordinal_or_default(&self) -> Ordinal {
        self.ordinal.unwrap_or_default()
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn default_ordinal_group() -> u32 {
    DEFAULT_ORDINAL_GROUP
}

fn default_ordinal_number() -> u32 {
    DEFAULT_ORDINAL_NUMBER
}

fn default_true() -> bool {
    true
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for Ordinal {
    fn default() -> Self {
        Self {
            group: DEFAULT_ORDINAL_GROUP,
            number: DEFAULT_ORDINAL_NUMBER,
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_deserializes_with_defaults() {
        let comp: Component = serde_yaml::from_str("image: postgres:16").unwrap();
        assert_eq!(comp.get_kind(), &ComponentKind::Container);
        assert!(*comp.get_enabled());
        assert_eq!(comp.ordinal_or_default(), Ordinal::default());
        assert_eq!(comp.get_image().as_deref(), Some("postgres:16"));
    }

    #[test]
    fn test_component_host_type_and_scripts() {
        let yaml = r#"
type: host
cmd: ./scripts/serve.sh
ordinal:
  group: 1
pre_scripts:
  - "host: mkdir -p data"
"#;
        let comp: Component = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(comp.get_kind(), &ComponentKind::Host);
        assert_eq!(comp.ordinal_or_default().get_group(), 1);
        assert_eq!(comp.ordinal_or_default().get_number(), DEFAULT_ORDINAL_NUMBER);
        assert!(comp.get_pre_scripts()[0].is_host());
    }

    #[test]
    fn test_ordinal_ordering_is_group_then_number() {
        let early = Ordinal {
            group: 0,
            number: 50,
        };
        let late = Ordinal {
            group: 1,
            number: 1,
        };
        assert!(early < late);
        assert!(Ordinal::default() > late);
    }

    #[test]
    fn test_foreground_component_flattens_attributes() {
        let yaml = r#"
name: cli
image: devlab_base:latest
"#;
        let fg: ForegroundComponent = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(fg.get_name(), "cli");
        assert_eq!(fg.get_component().get_image().as_deref(), Some("devlab_base:latest"));
    }
}
