use std::fmt::{self, Display};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::docker::is_valid_hostname;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A lifecycle script, parsed from its configuration string at load time.
///
/// The configuration syntax is a small prefix DSL:
///
/// - `CMD` runs inside the component's own running container
/// - `running_container|NAME: CMD` runs inside the already-running container `NAME`
/// - `helper_container|IMAGE^TAG^NAME: CMD` runs inside a fresh, auto-removed container
///   of `IMAGE:TAG` named `NAME`, with the project directory mounted in
/// - `host: CMD` or `!!CMD` runs on the operator's machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    /// The original configuration string.
    raw: String,

    /// Where the command runs.
    kind: ScriptKind,

    /// The command with any mode prefix stripped.
    command: String,
}

/// Where a [`Script`] runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptKind {
    /// Inside the component's own running container.
    Default,

    /// On the operator's machine.
    Host,

    /// Inside another already-running container.
    RunningContainer {
        /// The container to exec into.
        container: String,
    },

    /// Inside a fresh, auto-removed helper container.
    HelperContainer {
        /// The image to run, possibly carrying a registry host.
        image: String,

        /// The image tag.
        tag: String,

        /// The name for the ephemeral container.
        container: String,
    },
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Script {
    /// Parses a configuration string. Never fails: a string with no recognized prefix is a
    /// command for the component's own container.
    pub fn parse(raw: &str) -> Self {
        if let Some(rest) = raw.strip_prefix("helper_container|") {
            let (target, command) = peel_target(rest);
            let (image, tag, container) = split_helper_target(&target);
            return Self {
                raw: raw.to_string(),
                kind: ScriptKind::HelperContainer {
                    image,
                    tag,
                    container,
                },
                command,
            };
        }

        if let Some(rest) = raw.strip_prefix("running_container|") {
            let (container, command) = peel_target(rest);
            return Self {
                raw: raw.to_string(),
                kind: ScriptKind::RunningContainer { container },
                command,
            };
        }

        if let Some(rest) = raw.strip_prefix("!!") {
            return Self {
                raw: raw.to_string(),
                kind: ScriptKind::Host,
                command: rest.trim().to_string(),
            };
        }

        if let Some(rest) = raw.strip_prefix("host:") {
            return Self {
                raw: raw.to_string(),
                kind: ScriptKind::Host,
                command: rest.trim().to_string(),
            };
        }

        Self {
            raw: raw.to_string(),
            kind: ScriptKind::Default,
            command: raw.trim().to_string(),
        }
    }

    /// Returns the original configuration string.
    pub fn get_raw(&self) -> &str {
        &self.raw
    }

    /// Returns where the command runs.
    pub fn get_kind(&self) -> &ScriptKind {
        &self.kind
    }

    /// Returns the command with any mode prefix stripped.
    pub fn get_command(&self) -> &str {
        &self.command
    }

    /// Returns true when the script runs on the operator's machine.
    pub fn is_host(&self) -> bool {
        self.kind == ScriptKind::Host
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Splits `NAME: CMD` into the target name and the command.
///
/// A target that looks like a registry hostname followed by a port keeps the `host:port`
/// pair together, so `registry.example.com:5000/app: CMD` peels off the whole image
/// reference rather than stopping at the first colon.
fn peel_target(rest: &str) -> (String, String) {
    let mut segments = rest.splitn(3, ':');
    let first = segments.next().unwrap_or("");
    let second = segments.next();

    let mut name = first.to_string();
    if first.contains('.') && is_valid_hostname(first) {
        if let Some(second) = second {
            let port_part = second.split('/').next().unwrap_or("");
            let digits = port_part.chars().take_while(|ch| ch.is_ascii_digit()).count();
            if digits >= 2 && second.contains('/') {
                name = format!("{}:{}", first, second);
            }
        }
    }

    let command = rest
        .get(name.len() + 1..)
        .map(|cmd| cmd.trim().to_string())
        .unwrap_or_default();

    (name, command)
}

/// Decomposes a helper-container `IMAGE^TAG^NAME` target. A missing tag defaults to
/// `latest` and a missing container name defaults to the image name.
fn split_helper_target(target: &str) -> (String, String, String) {
    let mut parts = target.split('^');
    let image = parts.next().unwrap_or("").to_string();
    let tag = match parts.next() {
        Some(tag) if !tag.is_empty() => tag.to_string(),
        _ => "latest".to_string(),
    };
    let container = match parts.next() {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => image.clone(),
    };

    (image, tag, container)
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl Serialize for Script {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for Script {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

impl From<&str> for Script {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_default_mode() {
        let script = Script::parse("/devlab/provision.sh --init");
        assert_eq!(script.get_kind(), &ScriptKind::Default);
        assert_eq!(script.get_command(), "/devlab/provision.sh --init");
    }

    #[test]
    fn test_parse_host_prefixes() {
        let script = Script::parse("host: make migrate");
        assert_eq!(script.get_kind(), &ScriptKind::Host);
        assert_eq!(script.get_command(), "make migrate");

        let bang = Script::parse("!!./scripts/seed.sh");
        assert_eq!(bang.get_kind(), &ScriptKind::Host);
        assert_eq!(bang.get_command(), "./scripts/seed.sh");
    }

    #[test]
    fn test_parse_running_container() {
        let script = Script::parse("running_container|ledger-db-devlab: pg_isready");
        assert_eq!(
            script.get_kind(),
            &ScriptKind::RunningContainer {
                container: "ledger-db-devlab".to_string()
            }
        );
        assert_eq!(script.get_command(), "pg_isready");
    }

    #[test]
    fn test_parse_helper_container_full_target() {
        let script = Script::parse("helper_container|devlab_helper^stable^setup: /devlab/setup.sh");
        assert_eq!(
            script.get_kind(),
            &ScriptKind::HelperContainer {
                image: "devlab_helper".to_string(),
                tag: "stable".to_string(),
                container: "setup".to_string(),
            }
        );
        assert_eq!(script.get_command(), "/devlab/setup.sh");
    }

    #[test]
    fn test_parse_helper_container_defaults() {
        let script = Script::parse("helper_container|devlab_helper: id");
        assert_eq!(
            script.get_kind(),
            &ScriptKind::HelperContainer {
                image: "devlab_helper".to_string(),
                tag: "latest".to_string(),
                container: "devlab_helper".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_helper_container_registry_port() {
        let script =
            Script::parse("helper_container|registry.example.com:5000/tools^1.2^prep: run.sh");
        assert_eq!(
            script.get_kind(),
            &ScriptKind::HelperContainer {
                image: "registry.example.com:5000/tools".to_string(),
                tag: "1.2".to_string(),
                container: "prep".to_string(),
            }
        );
        assert_eq!(script.get_command(), "run.sh");
    }

    #[test]
    fn test_round_trips_through_serde_as_string() {
        let script: Script = serde_yaml::from_str("\"host: echo hi\"").unwrap();
        assert_eq!(script.get_kind(), &ScriptKind::Host);

        let rendered = serde_yaml::to_string(&script).unwrap();
        let reparsed: Script = serde_yaml::from_str(&rendered).unwrap();
        assert_eq!(reparsed, script);
    }
}
