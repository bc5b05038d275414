//! Reporting the live state of the environment.

use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::{
    config::{Component, ComponentKind},
    docker::{parse_local_ports, ContainerRecord},
    runtime::process_alive,
    scripts::{run_script, ScriptOpts},
    utils::{component_from_container_name, container_name, port_check},
    DevlabResult,
};

use super::{ordering, DevlabContext};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// How long the fallback port probe waits before declaring a component degraded.
const PORT_CHECK_TIMEOUT: Duration = Duration::from_secs(2);

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The observed state of one component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentState {
    /// The container (or host process) is up.
    Running,

    /// A container exists but is not running.
    Stopped,

    /// No container (or live host process) exists.
    Missing,
}

/// A link a component's status script advertises to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLink {
    /// The rendered link.
    pub link: String,

    /// A short description of where the link goes.
    pub comment: String,
}

/// Everything `status` knows about one component.
#[derive(Debug, Clone)]
pub struct ComponentStatus {
    /// The component name.
    pub component: String,

    /// The container name, or the pid for a running host component.
    pub container_name: String,

    /// The observed state.
    pub state: ComponentState,

    /// The health string, empty for components that are not running.
    pub health: String,

    /// The host-local side of each published port.
    pub local_ports: Vec<String>,

    /// Links the component's status script advertises.
    pub links: Vec<StatusLink>,
}

/// The full status report for a project.
#[derive(Debug, Clone, Default)]
pub struct StatusReport {
    /// Per-component statuses, in start order.
    pub components: Vec<ComponentStatus>,

    /// devlab-suffixed containers that match no configured component.
    pub orphaned: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct StatusScriptOutput {
    #[serde(default)]
    status: StatusScriptHealth,

    #[serde(default)]
    links: Vec<StatusScriptLink>,
}

#[derive(Debug, Deserialize, Default)]
struct StatusScriptHealth {
    #[serde(default)]
    health: String,
}

#[derive(Debug, Deserialize)]
struct StatusScriptLink {
    link: String,

    #[serde(default)]
    comment: String,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Builds the status report: each configured component's state, health, ports, and links,
/// plus any orphaned containers left over from deleted components.
pub async fn status(ctx: &DevlabContext) -> DevlabResult<StatusReport> {
    let config = ctx.get_config();
    let all = config.resolve_components(&[], false, &[])?;
    let order = ordering::up_order(config, &all)?;

    let containers = ctx.get_docker().get_containers(false).await?;
    let env = ctx.env_state().await?;
    let host_ip = env.host_ip().unwrap_or("127.0.0.1").to_string();

    let mut report = StatusReport::default();

    for container in &containers {
        if let Some(component) = component_from_container_name(&container.name) {
            if !order.iter().any(|name| name.as_str() == component) {
                report.orphaned.push(container.name.clone());
            }
        }
    }

    for name in &order {
        let Some(comp) = config.find_component(name) else {
            continue;
        };

        let status = match comp.get_kind() {
            ComponentKind::Host => {
                let pid = env.component_pid(name).filter(|pid| process_alive(*pid));
                ComponentStatus {
                    component: name.clone(),
                    container_name: pid
                        .map(|pid| format!("pid:{}", pid))
                        .unwrap_or_else(|| "n/a".to_string()),
                    state: if pid.is_some() {
                        ComponentState::Running
                    } else {
                        ComponentState::Missing
                    },
                    health: String::new(),
                    local_ports: vec![],
                    links: vec![],
                }
            }
            ComponentKind::Container => {
                container_status(ctx, name, comp, &containers, &host_ip).await?
            }
        };

        report.components.push(status);
    }

    Ok(report)
}

async fn container_status(
    ctx: &DevlabContext,
    name: &str,
    comp: &Component,
    containers: &[ContainerRecord],
    host_ip: &str,
) -> DevlabResult<ComponentStatus> {
    let cont_name = container_name(name);
    let record = containers.iter().find(|cont| cont.name == cont_name);

    let state = match record {
        Some(record) if record.is_up() => ComponentState::Running,
        Some(_) => ComponentState::Stopped,
        None => ComponentState::Missing,
    };

    let local_ports: Vec<String> = if state == ComponentState::Running {
        comp.get_ports()
            .iter()
            .map(|port| parse_local_ports(port))
            .collect()
    } else {
        vec![]
    };

    let mut health = String::new();
    let mut links = vec![];

    if state == ComponentState::Running {
        match comp.get_status_script() {
            Some(script) => {
                let out = run_script(
                    ctx.get_docker(),
                    ctx.get_project_root(),
                    ctx.network_name(),
                    script,
                    &cont_name,
                    ScriptOpts::builder().interactive(false).build(),
                )
                .await;

                match out {
                    Result::Ok(out) if out.success() => {
                        match serde_json::from_str::<StatusScriptOutput>(&out.stdout.join("\n")) {
                            Result::Ok(parsed) => {
                                health = parsed.status.health;
                                links = render_links(
                                    parsed.links,
                                    &cont_name,
                                    host_ip,
                                    local_ports.first().map(String::as_str),
                                );
                            }
                            Result::Err(err) => {
                                warn!(
                                    "status script for component '{}' produced invalid JSON: {}",
                                    name, err
                                );
                            }
                        }
                    }
                    Result::Ok(out) => {
                        warn!(
                            "status script for component '{}' failed with exit code {}",
                            name, out.code
                        );
                    }
                    Result::Err(err) => {
                        warn!(
                            "status script for component '{}' could not be run: {}",
                            name, err
                        );
                    }
                }
            }
            None => {
                if !local_ports.is_empty() {
                    health = "healthy".to_string();
                    for port in &local_ports {
                        if port.contains("(udp)") {
                            debug!("skipping udp port check for component '{}'", name);
                            continue;
                        }
                        let Some(port) = local_port_number(port) else {
                            continue;
                        };
                        if !port_check("127.0.0.1", port, PORT_CHECK_TIMEOUT).await {
                            health = "degraded".to_string();
                        }
                        break;
                    }
                }
            }
        }
    }

    Ok(ComponentStatus {
        component: name.to_string(),
        container_name: cont_name,
        state,
        health,
        local_ports,
        links,
    })
}

/// Fills the placeholders a status script may use in its link templates.
fn render_links(
    raw: Vec<StatusScriptLink>,
    container: &str,
    host_ip: &str,
    local_port: Option<&str>,
) -> Vec<StatusLink> {
    let port = local_port
        .and_then(|port| port.split('(').next())
        .unwrap_or("");

    raw.into_iter()
        .map(|entry| StatusLink {
            link: entry
                .link
                .replace("{container_name}", container)
                .replace("{host_ip}", host_ip)
                .replace("{local_port}", port),
            comment: entry.comment,
        })
        .collect()
}

/// Extracts the numeric port out of a rendered local port such as `8080(tcp)`.
fn local_port_number(rendered: &str) -> Option<u16> {
    rendered.split('(').next()?.parse().ok()
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl std::fmt::Display for ComponentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComponentState::Running => write!(f, "running"),
            ComponentState::Stopped => write!(f, "stopped"),
            ComponentState::Missing => write!(f, "missing"),
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
    fn test_render_links_fills_placeholders() {
        let raw = vec![StatusScriptLink {
            link: "http://{host_ip}:{local_port}/admin".to_string(),
            comment: "admin UI".to_string(),
        }];

        let links = render_links(raw, "api-devlab", "192.168.1.10", Some("8080(tcp)"));
        assert_eq!(links[0].link, "http://192.168.1.10:8080/admin");
        assert_eq!(links[0].comment, "admin UI");
    }

    #[test]
    fn test_local_port_number() {
        assert_eq!(local_port_number("8080(tcp)"), Some(8080));
        assert_eq!(local_port_number("5000-5010(tcp)"), None);
    }

    #[test]
    fn test_status_script_output_parses() {
        let parsed: StatusScriptOutput = serde_json::from_str(
            r#"{"status": {"health": "healthy"}, "links": [{"link": "http://{host_ip}/"}]}"#,
        )
        .unwrap();
        assert_eq!(parsed.status.health, "healthy");
        assert_eq!(parsed.links.len(), 1);
        assert_eq!(parsed.links[0].comment, "");
    }
}
