use std::path::{Component, Path, PathBuf};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Configuration file names recognized at a project root, in lookup order.
pub const CONFIG_FILE_NAMES: &[&str] = &[
    "DevlabConfig.json",
    "DevlabConfig.yaml",
    "DevlabConfig.yml",
    "Devlabconfig.json",
    "Devlabconfig.yaml",
    "Devlabconfig.yml",
];

/// The suffix appended to a component name to form its container name.
pub const CONTAINER_NAME_SUFFIX: &str = "-devlab";

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns the container name for a component.
pub fn container_name(component: &str) -> String {
    format!("{}{}", component, CONTAINER_NAME_SUFFIX)
}

/// Returns the component name for a container name, if the container carries the devlab
/// suffix.
pub fn component_from_container_name(container: &str) -> Option<&str> {
    container.strip_suffix(CONTAINER_NAME_SUFFIX)
}

/// Walks up from `start` looking for a recognized configuration file.
///
/// Returns the project root and the configuration file path.
pub fn find_project_root(start: &Path) -> Option<(PathBuf, PathBuf)> {
    let mut dir = start.to_path_buf();

    loop {
        for name in CONFIG_FILE_NAMES {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return Some((dir, candidate));
            }
        }

        if !dir.pop() {
            return None;
        }
    }
}

/// Sanitizes a user supplied relative path so it can never escape its base directory.
///
/// Parent-directory segments and root prefixes are stripped.
pub fn sanitize_relative_path(path: &str) -> PathBuf {
    Path::new(path)
        .components()
        .filter_map(|comp| match comp {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect()
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_name_round_trip() {
        assert_eq!(container_name("ledger-db"), "ledger-db-devlab");
        assert_eq!(
            component_from_container_name("ledger-db-devlab"),
            Some("ledger-db")
        );
        assert_eq!(component_from_container_name("ledger-db"), None);
    }

    #[test]
    fn test_find_project_root_walks_up() {
        let root = tempfile::tempdir().expect("tempdir");
        let nested = root.path().join("a/b/c");
        std::fs::create_dir_all(&nested).expect("create nested");
        std::fs::write(root.path().join("DevlabConfig.yaml"), "components: {}")
            .expect("write config");

        let (found_root, found_config) =
            find_project_root(&nested).expect("config should be found");

        assert_eq!(found_root, root.path());
        assert_eq!(found_config, root.path().join("DevlabConfig.yaml"));
    }

    #[test]
    fn test_find_project_root_missing() {
        let root = tempfile::tempdir().expect("tempdir");
        assert!(find_project_root(root.path()).is_none());
    }

    #[test]
    fn test_sanitize_relative_path_strips_escapes() {
        assert_eq!(
            sanitize_relative_path("../../etc/passwd"),
            PathBuf::from("etc/passwd")
        );
        assert_eq!(
            sanitize_relative_path("/absolute/dir"),
            PathBuf::from("absolute/dir")
        );
        assert_eq!(
            sanitize_relative_path("data/../data/files"),
            PathBuf::from("data/data/files")
        );
    }
}
