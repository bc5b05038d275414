//! Stopping components, in reverse start order.

use nix::sys::signal::Signal;
use tracing::{debug, info, warn};

use crate::{
    config::{Component, ComponentKind, Script, ScriptKind},
    runtime::{process_alive, signal_process, TERM_WAIT_POLLS},
    scripts::{run_script, ScriptOpts},
    state::EnvState,
    utils::container_name,
    DevlabError, DevlabResult,
};

use super::{ordering, DevlabContext};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// How many one-second polls a killed host process gets before it is declared a survivor.
pub const KILL_WAIT_POLLS: u32 = 5;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Brings the selected components down: the foreground component first, then the rest in
/// reverse ordinal order. With `rm` the stopped containers are removed as well.
pub async fn down(ctx: &DevlabContext, components: &[String], rm: bool) -> DevlabResult<()> {
    let selected = ctx
        .get_config()
        .resolve_components(components, false, &[])?;
    let order = ordering::down_order(ctx.get_config(), &selected)?;

    let containers = ctx.get_docker().get_containers(false).await?;
    let mut env = ctx.env_state().await?;

    for name in &order {
        let comp = ctx
            .get_config()
            .find_component(name)
            .ok_or_else(|| DevlabError::UnknownComponent(name.clone()))?;

        match comp.get_kind() {
            ComponentKind::Host => down_host_component(ctx, name, comp, &mut env).await?,
            ComponentKind::Container => {
                let cont_name = container_name(name);
                let record = containers.iter().find(|cont| cont.name == cont_name);

                let Some(record) = record else {
                    debug!("component '{}' has no container, skipping", name);
                    continue;
                };

                if record.is_up() {
                    run_down_scripts(ctx, name, &cont_name, comp.get_down_scripts()).await;
                    info!("stopping container: {}", cont_name);
                    ctx.get_docker().stop_container(&cont_name).await?;
                } else {
                    debug!("container '{}' is already stopped", cont_name);
                }

                if rm {
                    info!("removing container: {}", cont_name);
                    ctx.get_docker().rm_container(&cont_name, true).await?;
                }

                run_post_down_scripts(ctx, name, &cont_name, comp.get_post_down_scripts()).await;
            }
        }
    }

    Ok(())
}

/// Stops a host component by escalating signals against its recorded pid: SIGTERM with
/// patient polling, then one SIGKILL with a shorter poll budget. A process that survives
/// both is a hard error.
async fn down_host_component(
    ctx: &DevlabContext,
    name: &str,
    comp: &Component,
    env: &mut EnvState,
) -> DevlabResult<()> {
    let cont_name = container_name(name);

    match env.component_pid(name) {
        Some(pid) if process_alive(pid) => {
            run_down_scripts(ctx, name, &cont_name, comp.get_down_scripts()).await;

            info!("stopping host component '{}' (pid {})", name, pid);
            let _ = signal_process(pid, Signal::SIGTERM);
            let mut alive = wait_for_death(pid, TERM_WAIT_POLLS).await;

            if alive {
                warn!(
                    "host component '{}' (pid {}) ignored SIGTERM, killing it",
                    name, pid
                );
                let _ = signal_process(pid, Signal::SIGKILL);
                alive = wait_for_death(pid, KILL_WAIT_POLLS).await;
            }

            if alive {
                return Err(DevlabError::HostProcessSurvived {
                    component: name.to_string(),
                    pid,
                });
            }

            env.clear_component_pid(name);
            env.save().await?;
        }
        Some(pid) => {
            debug!(
                "recorded pid {} for host component '{}' is already gone",
                pid, name
            );
            env.clear_component_pid(name);
            env.save().await?;
        }
        None => debug!("host component '{}' is not running", name),
    }

    run_post_down_scripts(ctx, name, &cont_name, comp.get_post_down_scripts()).await;
    Ok(())
}

/// Runs the scripts that have to happen while a component is still up. A failing script
/// aborts the rest of the list but never blocks the stop itself.
async fn run_down_scripts(ctx: &DevlabContext, component: &str, container: &str, scripts: &[Script]) {
    for script in scripts {
        match run_one(ctx, script, container).await {
            Ok(out) if out.success() => {}
            Ok(out) => {
                warn!(
                    "down script '{}' for component '{}' failed with exit code {}, \
                     skipping the remaining down scripts",
                    script.get_raw(),
                    component,
                    out.code
                );
                break;
            }
            Err(err) => {
                warn!(
                    "down script '{}' for component '{}' could not be run: {}",
                    script.get_raw(),
                    component,
                    err
                );
                break;
            }
        }
    }
}

/// Runs the scripts that happen after a component has stopped. At that point the
/// component's own container cannot execute anything, so a script without a target falls
/// back to the host with a warning.
async fn run_post_down_scripts(
    ctx: &DevlabContext,
    component: &str,
    container: &str,
    scripts: &[Script],
) {
    for script in scripts {
        let script = match script.get_kind() {
            ScriptKind::Default => {
                warn!(
                    "post-down script '{}' for component '{}' has no target and the \
                     component is down, running it on the host instead",
                    script.get_raw(),
                    component
                );
                Script::parse(&format!("host: {}", script.get_command()))
            }
            _ => script.clone(),
        };

        match run_one(ctx, &script, container).await {
            Ok(out) if out.success() => {}
            Ok(out) => {
                warn!(
                    "post-down script '{}' for component '{}' failed with exit code {}, \
                     skipping the remaining post-down scripts",
                    script.get_raw(),
                    component,
                    out.code
                );
                break;
            }
            Err(err) => {
                warn!(
                    "post-down script '{}' for component '{}' could not be run: {}",
                    script.get_raw(),
                    component,
                    err
                );
                break;
            }
        }
    }
}

async fn run_one(
    ctx: &DevlabContext,
    script: &Script,
    container: &str,
) -> DevlabResult<crate::runtime::CommandOutput> {
    run_script(
        ctx.get_docker(),
        ctx.get_project_root(),
        ctx.network_name(),
        script,
        container,
        ScriptOpts::builder().interactive(false).log_output(true).build(),
    )
    .await
}

async fn wait_for_death(pid: i32, polls: u32) -> bool {
    for _ in 0..polls {
        if !process_alive(pid) {
            return false;
        }
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
    }
    process_alive(pid)
}
