//! Opening an interactive shell (or one-off command) inside a component.

use tracing::debug;

use crate::{
    config::Script,
    scripts::{run_script, ScriptOpts},
    utils::container_name,
    DevlabError, DevlabResult,
};

use super::DevlabContext;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The shell opened when a component declares none.
pub const DEFAULT_SHELL: &str = "/bin/bash";

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Runs `command` attached inside the component's container, defaulting to the
/// component's configured shell. The container has to be running.
pub async fn shell(
    ctx: &DevlabContext,
    component: &str,
    command: Option<String>,
    user: Option<String>,
) -> DevlabResult<()> {
    let comp = ctx
        .get_config()
        .find_component(component)
        .ok_or_else(|| DevlabError::UnknownComponent(component.to_string()))?;

    let command = command
        .or_else(|| comp.get_shell().clone())
        .unwrap_or_else(|| DEFAULT_SHELL.to_string());

    // Exiting a shell with a non-zero status is not an error worth logging.
    let ignore_nonzero_rc = command.ends_with("/bin/bash") || command.ends_with("/bin/sh");

    let cont_name = container_name(component);
    let containers = ctx.get_docker().get_containers(false).await?;
    let running = containers
        .iter()
        .find(|cont| cont.name == cont_name)
        .map(|cont| cont.is_up())
        .unwrap_or(false);
    if !running {
        return Err(DevlabError::ContainerNotRunning(component.to_string()));
    }

    debug!("running '{}' in container: {}", command, cont_name);
    let script = Script::parse(&command);
    let opts = match user {
        Some(user) => ScriptOpts::builder()
            .ignore_nonzero_rc(ignore_nonzero_rc)
            .user(user)
            .build(),
        None => ScriptOpts::builder()
            .ignore_nonzero_rc(ignore_nonzero_rc)
            .build(),
    };

    run_script(
        ctx.get_docker(),
        ctx.get_project_root(),
        ctx.network_name(),
        &script,
        &cont_name,
        opts,
    )
    .await?;

    Ok(())
}
