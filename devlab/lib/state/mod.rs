//! Persistent per-project environment state.
//!
//! State is stored as a bash style env file next to the project's persistence directory so
//! that scripts can source it directly. Booleans are written bare and lowercase, strings
//! are written quoted, and keys are upper-cased on write.

use std::{
    collections::BTreeMap,
    fmt::{self, Display},
    path::{Path, PathBuf},
};

use chrono::Utc;
use getset::Getters;

use crate::DevlabResult;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The file name holding the state written by `up`.
pub const UP_ENV_FILE: &str = "devlab_up.env";

/// The state key holding the host IP recorded at the last `up`.
pub const HOST_IP_KEY: &str = "HOST_IP";

/// The state key recording whether components were bound to the host interface.
pub const BIND_TO_HOST_KEY: &str = "BIND_TO_HOST";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A single value in the state store.
///
/// The on-disk format only distinguishes booleans from strings. Everything that is not the
/// literal `true` or `false` round-trips as a string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvValue {
    /// A boolean, written bare and lowercase.
    Bool(bool),

    /// A string, written enclosed in double quotes.
    Str(String),
}

/// The environment state store backing a single project.
#[derive(Debug, Clone, Getters)]
pub struct EnvState {
    /// The file the state is persisted to.
    #[getset(get = "pub with_prefix")]
    path: PathBuf,

    entries: BTreeMap<String, EnvValue>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl EnvValue {
    /// Returns the value as a string slice when it is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            EnvValue::Str(s) => Some(s),
            EnvValue::Bool(_) => None,
        }
    }

    /// Returns the value as a boolean when it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            EnvValue::Bool(b) => Some(*b),
            EnvValue::Str(_) => None,
        }
    }
}

impl EnvState {
    /// Loads the state file at `path`, returning an empty store when the file does not
    /// exist yet.
    pub async fn load(path: impl Into<PathBuf>) -> DevlabResult<Self> {
        let path = path.into();
        let mut entries = BTreeMap::new();

        if tokio::fs::try_exists(&path).await? {
            let contents = tokio::fs::read_to_string(&path).await?;
            for line in contents.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }

                let (key, raw) = match line.split_once('=') {
                    Some(pair) => pair,
                    None => (line, ""),
                };

                entries.insert(key.to_string(), parse_value(raw));
            }
        }

        Ok(Self { path, entries })
    }

    /// Persists the store, overwriting the whole file.
    pub async fn save(&self) -> DevlabResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut out = format!("# Written by devlab on {}\n", Utc::now().to_rfc3339());
        for (key, value) in &self.entries {
            out.push_str(&format!("{}={}\n", key, value));
        }

        tokio::fs::write(&self.path, out).await?;
        Ok(())
    }

    /// Returns the value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&EnvValue> {
        self.entries.get(key)
    }

    /// Stores `value` under `key`, upper-casing the key.
    pub fn set(&mut self, key: &str, value: EnvValue) {
        self.entries.insert(key.to_uppercase(), value);
    }

    /// Removes the value stored under `key`.
    pub fn remove(&mut self, key: &str) -> Option<EnvValue> {
        self.entries.remove(key)
    }

    /// Returns true when the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over all entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &EnvValue)> {
        self.entries.iter()
    }

    /// Returns the recorded pid for a host component, when one is stored and parses.
    pub fn component_pid(&self, component: &str) -> Option<i32> {
        self.get(&pid_key(component))
            .and_then(EnvValue::as_str)
            .and_then(|s| s.parse().ok())
    }

    /// Records the pid for a host component.
    pub fn set_component_pid(&mut self, component: &str, pid: i32) {
        self.set(&pid_key(component), EnvValue::Str(pid.to_string()));
    }

    /// Clears the recorded pid for a host component.
    pub fn clear_component_pid(&mut self, component: &str) {
        self.remove(&pid_key(component));
    }

    /// Returns the host IP recorded at the last `up`.
    pub fn host_ip(&self) -> Option<&str> {
        self.get(HOST_IP_KEY).and_then(EnvValue::as_str)
    }

    /// Returns whether components were bound to the host interface at the last `up`.
    pub fn bind_to_host(&self) -> Option<bool> {
        self.get(BIND_TO_HOST_KEY).and_then(EnvValue::as_bool)
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns the state key holding the pid of a host component.
pub fn pid_key(component: &str) -> String {
    format!("{}_PID", component.to_uppercase())
}

fn parse_value(raw: &str) -> EnvValue {
    let mut val = raw;
    for quote in ['"', '\''] {
        if val.len() >= 2 && val.starts_with(quote) && val.ends_with(quote) {
            val = &val[1..val.len() - 1];
        }
    }

    match val.to_lowercase().as_str() {
        "true" => EnvValue::Bool(true),
        "false" => EnvValue::Bool(false),
        _ => EnvValue::Str(val.to_string()),
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Display for EnvValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvValue::Bool(b) => write!(f, "{}", b),
            EnvValue::Str(s) => write!(f, "\"{}\"", s),
        }
    }
}

impl From<&str> for EnvValue {
    fn from(value: &str) -> Self {
        EnvValue::Str(value.to_string())
    }
}

impl From<String> for EnvValue {
    fn from(value: String) -> Self {
        EnvValue::Str(value)
    }
}

impl From<bool> for EnvValue {
    fn from(value: bool) -> Self {
        EnvValue::Bool(value)
    }
}

impl AsRef<Path> for EnvState {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test(tokio::test)]
    async fn test_env_state_round_trip_preserves_types() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(UP_ENV_FILE);

        let mut state = EnvState::load(&path).await.unwrap();
        assert!(state.is_empty());

        state.set("host_ip", EnvValue::from("192.168.1.10"));
        state.set(BIND_TO_HOST_KEY, EnvValue::from(true));
        state.set_component_pid("api-server", 4242);
        state.save().await.unwrap();

        let reloaded = EnvState::load(&path).await.unwrap();
        assert_eq!(reloaded.host_ip(), Some("192.168.1.10"));
        assert_eq!(reloaded.bind_to_host(), Some(true));
        assert_eq!(reloaded.component_pid("api-server"), Some(4242));
    }

    #[test_log::test(tokio::test)]
    async fn test_env_state_upper_cases_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(UP_ENV_FILE);

        let mut state = EnvState::load(&path).await.unwrap();
        state.set("lower_var", EnvValue::from("foobar"));
        state.save().await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("LOWER_VAR=\"foobar\""));
    }

    #[test_log::test(tokio::test)]
    async fn test_env_state_parses_values_with_equals() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(UP_ENV_FILE);
        std::fs::write(&path, "TOKEN=\"a=b=c\"\nFLAG=false\n").unwrap();

        let state = EnvState::load(&path).await.unwrap();
        assert_eq!(
            state.get("TOKEN"),
            Some(&EnvValue::Str("a=b=c".to_string()))
        );
        assert_eq!(state.get("FLAG"), Some(&EnvValue::Bool(false)));
    }

    #[test_log::test(tokio::test)]
    async fn test_env_state_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let state = EnvState::load(dir.path().join("absent.env")).await.unwrap();
        assert!(state.is_empty());
    }

    #[test]
    fn test_pid_key_upper_cases_component() {
        assert_eq!(pid_key("api-server"), "API-SERVER_PID");
    }
}
