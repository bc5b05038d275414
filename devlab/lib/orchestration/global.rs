//! Cross-project discovery: every devlab-managed container on the machine, grouped by the
//! project that owns it.

use std::{collections::BTreeMap, path::PathBuf};

use tracing::info;

use crate::{utils::component_from_container_name, DevlabError, DevlabResult};

use super::{
    context::{global_docker, project_from_labels},
    restart, DevlabContext,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The project bucket for containers that carry the devlab label but no project label.
pub const ORPHANED_PROJECT: &str = "ORPHANED (Unknown project origin)";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// One container in the global status report.
#[derive(Debug, Clone)]
pub struct GlobalContainer {
    /// The container name.
    pub name: String,

    /// `up` or `stopped`.
    pub status: String,

    /// Rendered port bindings.
    pub ports: Vec<String>,
}

/// Every devlab-managed container belonging to one project.
#[derive(Debug, Clone)]
pub struct GlobalProject {
    /// The project root path, or [`ORPHANED_PROJECT`].
    pub project: String,

    /// The project's containers.
    pub containers: Vec<GlobalContainer>,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Reports every devlab-managed container on this machine, grouped by owning project.
pub async fn global_status() -> DevlabResult<Vec<GlobalProject>> {
    let docker = global_docker().await?;
    let containers = docker.get_containers(false).await?;

    let mut projects: BTreeMap<String, Vec<GlobalContainer>> = BTreeMap::new();
    for container in containers {
        let details = docker.inspect_container(&container.name).await?;
        let project = details
            .first()
            .and_then(project_from_labels)
            .unwrap_or_else(|| ORPHANED_PROJECT.to_string());

        let ports = details
            .first()
            .map(|details| render_port_bindings(details))
            .unwrap_or_default();

        projects.entry(project).or_default().push(GlobalContainer {
            status: if container.is_up() {
                "up".to_string()
            } else {
                "stopped".to_string()
            },
            name: container.name,
            ports,
        });
    }

    Ok(projects
        .into_iter()
        .map(|(project, containers)| GlobalProject {
            project,
            containers,
        })
        .collect())
}

/// Restarts every devlab-managed project on this machine, each with its own configuration.
pub async fn global_restart(update_images: bool) -> DevlabResult<()> {
    let docker = global_docker().await?;
    let containers = docker.get_containers(false).await?;

    let mut projects: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for container in containers {
        let details = docker.inspect_container(&container.name).await?;
        let project = details.first().and_then(project_from_labels).ok_or_else(|| {
            DevlabError::custom(anyhow::anyhow!(
                "container '{}' carries no project label, remove it by hand",
                container.name
            ))
        })?;

        let component = component_from_container_name(&container.name)
            .unwrap_or(&container.name)
            .to_string();
        projects.entry(project).or_default().push(component);
    }

    for (project, components) in projects {
        info!("restarting project: {}", project);
        let ctx = DevlabContext::load(Some(PathBuf::from(&project))).await?;
        restart::restart(&ctx, &components, update_images).await?;
    }

    Ok(())
}

/// Renders a container's `HostConfig.PortBindings` into operator-facing lines.
fn render_port_bindings(details: &serde_json::Value) -> Vec<String> {
    let Some(bindings) = details
        .pointer("/HostConfig/PortBindings")
        .and_then(|value| value.as_object())
    else {
        return vec![];
    };

    let mut rendered = vec![];
    for (cont_port, host_sides) in bindings {
        let (port, proto) = match cont_port.split_once('/') {
            Some((port, proto)) => (port, proto),
            None => (cont_port.as_str(), "tcp"),
        };
        let Some(host_sides) = host_sides.as_array() else {
            continue;
        };
        for side in host_sides {
            let host_port = side
                .pointer("/HostPort")
                .and_then(|value| value.as_str())
                .unwrap_or("");
            rendered.push(format!(
                "Host: {}({}) -> Cont: {}",
                host_port, proto, port
            ));
        }
    }

    rendered
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_port_bindings() {
        let details: serde_json::Value = serde_json::json!({
            "HostConfig": {
                "PortBindings": {
                    "5432/tcp": [{"HostIp": "", "HostPort": "15432"}]
                }
            }
        });

        let rendered = render_port_bindings(&details);
        assert_eq!(rendered, vec!["Host: 15432(tcp) -> Cont: 5432"]);
    }

    #[test]
    fn test_render_port_bindings_absent() {
        let details = serde_json::json!({"HostConfig": {}});
        assert!(render_port_bindings(&details).is_empty());
    }
}
