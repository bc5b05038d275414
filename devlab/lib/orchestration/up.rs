//! Bringing components up, in ordinal order.

use std::collections::HashMap;

use tracing::{debug, error, info, warn};
use typed_builder::TypedBuilder;

use crate::{
    config::{Component, ComponentKind, Script},
    docker::{ContainerRecord, DockerObjKind, RunContainerOpts},
    images::{ensure_registry_auth, get_needed_images},
    runtime::{process_alive, Command},
    scripts::{run_script, ScriptOpts},
    state::{EnvState, EnvValue, BIND_TO_HOST_KEY, HOST_IP_KEY},
    utils::{container_name, get_primary_ip},
    DevlabError, DevlabResult,
};

use super::{build, down, ordering, reset, update, DevlabContext};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// How an `up` run behaves.
#[derive(Debug, Clone, Default, TypedBuilder)]
pub struct UpOpts {
    /// Skip the one-time provisioning scripts of newly created containers.
    #[builder(default)]
    pub skip_provision: bool,

    /// Record that components bind to the host interface, so a host address change later
    /// forces reprovisioning.
    #[builder(default)]
    pub bind_to_host: bool,

    /// Rebuild internal images and pull external ones before starting anything.
    #[builder(default)]
    pub update_images: bool,

    /// Leave a partially started component running when its provisioning fails.
    #[builder(default)]
    pub keep_up_on_error: bool,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Brings the selected components up.
///
/// Components start in ordinal order; the foreground component, when selected, starts last,
/// runs attached, and the whole environment is brought down again when it exits. The first
/// component failure stops the run, and the error carries how many components failed.
pub async fn up(ctx: &DevlabContext, components: &[String], opts: UpOpts) -> DevlabResult<()> {
    let config = ctx.get_config();
    let mut selected = config.resolve_components(components, false, &[])?;

    if components.is_empty() {
        selected.retain(|name| {
            config
                .find_component(name)
                .map(|comp| *comp.get_enabled() || config.foreground_name() == Some(name.as_str()))
                .unwrap_or(false)
        });
    } else {
        for name in &selected {
            let comp = config
                .find_component(name)
                .ok_or_else(|| DevlabError::UnknownComponent(name.clone()))?;
            if !*comp.get_enabled() && config.foreground_name() != Some(name.as_str()) {
                return Err(DevlabError::custom(anyhow::anyhow!(
                    "component '{}' is disabled and cannot be brought up",
                    name
                )));
            }
        }
    }

    let order = ordering::up_order(config, &selected)?;

    let (mut env, force_reprov) = record_up_env(ctx, &opts).await?;

    if opts.update_images {
        update::update_component_images(ctx, &order, true).await?;
    }

    let needed = get_needed_images(ctx.get_docker(), config, ctx.get_project_root(), &order).await?;
    let base_to_build = needed.base_images.to_build();
    if !base_to_build.is_empty() {
        build::build(ctx, &base_to_build, build::BuildOpts::default()).await?;
    }

    ensure_network(ctx).await?;

    let runtime_to_build = needed.runtime_images.to_build();
    if !runtime_to_build.is_empty() {
        build::build(ctx, &runtime_to_build, build::BuildOpts::default()).await?;
    }

    tokio::fs::create_dir_all(config.persistence_dir(ctx.get_project_root())).await?;
    ensure_registry_auth(config, &order).await?;

    let mut failed = 0usize;
    let mut containers = ctx.get_docker().get_containers(false).await?;

    for name in &order {
        if config.foreground_name() == Some(name.as_str()) {
            continue;
        }

        let cont_name = container_name(name);
        let status = ctx
            .get_docker()
            .obj_status(&cont_name, DockerObjKind::Container)
            .await?;
        if status.exists && !status.owned {
            return Err(DevlabError::OwnershipConflict {
                kind: "container".to_string(),
                name: cont_name,
            });
        }

        if force_reprov
            && status.exists
            && config
                .get_reprovisionable_components()
                .iter()
                .any(|prefix| name.starts_with(prefix.as_str()))
        {
            info!("host address changed, reprovisioning component: {}", name);
            reset::reset(
                ctx,
                std::slice::from_ref(name),
                reset::ResetOpts::default(),
            )
            .await?;
            containers = ctx.get_docker().get_containers(false).await?;
        }

        if let Err(err) = component_up(
            ctx,
            name,
            &containers,
            &mut env,
            opts.skip_provision,
            true,
            opts.keep_up_on_error,
        )
        .await
        {
            error!("failed to bring up component '{}': {}", name, err);
            failed += 1;
            break;
        }
    }

    if failed == 0 {
        if let Some(foreground) = config.foreground_name() {
            if order.iter().any(|name| name == foreground) {
                let containers = ctx.get_docker().get_containers(false).await?;
                let result = component_up(
                    ctx,
                    foreground,
                    &containers,
                    &mut env,
                    true,
                    false,
                    opts.keep_up_on_error,
                )
                .await;
                // The attached component has exited, take the environment with it.
                down::down(ctx, &[], false).await?;
                result?;
            }
        }
    }

    if opts.update_images {
        ctx.get_docker().prune_images(true).await?;
    }

    if failed > 0 {
        return Err(DevlabError::ComponentsFailed { count: failed });
    }
    Ok(())
}

/// Makes sure the configured project network exists and is ours. The engine-provided
/// `host` network is used as-is.
pub(crate) async fn ensure_network(ctx: &DevlabContext) -> DevlabResult<()> {
    let Some(name) = ctx.network_name() else {
        return Ok(());
    };
    if name == "host" {
        return Ok(());
    }

    let status = ctx
        .get_docker()
        .obj_status(name, DockerObjKind::Network)
        .await?;
    if status.exists && !status.owned {
        return Err(DevlabError::OwnershipConflict {
            kind: "network".to_string(),
            name: name.to_string(),
        });
    }
    if !status.exists {
        info!("creating network: {}", name);
        let out = ctx
            .get_docker()
            .create_network(ctx.get_config().get_network())
            .await?;
        if !out.success() {
            return Err(DevlabError::custom(anyhow::anyhow!(
                "failed to create network '{}': {}",
                name,
                out.joined()
            )));
        }
    }

    Ok(())
}

/// Reconciles the persisted environment with this run's flags.
///
/// A stored `BIND_TO_HOST` wins over the flag, with a warning. When binding to the host,
/// a changed host address forces reprovisioning of the components that bake it in.
async fn record_up_env(ctx: &DevlabContext, opts: &UpOpts) -> DevlabResult<(EnvState, bool)> {
    let mut env = ctx.env_state().await?;
    let primary_ip = get_primary_ip().to_string();
    let mut force_reprov = false;

    let bind_to_host = match env.bind_to_host() {
        Some(stored) => {
            if stored != opts.bind_to_host {
                warn!(
                    "using previously stored bind_to_host={} instead of the requested value, \
                     run 'devlab reset' to change it",
                    stored
                );
            }
            stored
        }
        None => opts.bind_to_host,
    };

    if bind_to_host {
        if let Some(stored_ip) = env.host_ip() {
            if stored_ip != primary_ip {
                info!(
                    "host address changed from {} to {}, reprovisionable components will be \
                     reprovisioned",
                    stored_ip, primary_ip
                );
                force_reprov = true;
            }
        }
    }

    env.set(HOST_IP_KEY, EnvValue::from(primary_ip));
    env.set(BIND_TO_HOST_KEY, EnvValue::from(bind_to_host));
    env.save().await?;

    Ok((env, force_reprov))
}

/// Brings a single component up.
async fn component_up(
    ctx: &DevlabContext,
    name: &str,
    containers: &[ContainerRecord],
    env: &mut EnvState,
    skip_provision: bool,
    background: bool,
    keep_up_on_error: bool,
) -> DevlabResult<()> {
    let comp = ctx
        .get_config()
        .find_component(name)
        .ok_or_else(|| DevlabError::UnknownComponent(name.to_string()))?;

    match comp.get_kind() {
        ComponentKind::Host => host_component_up(ctx, name, comp, env, background).await,
        ComponentKind::Container => {
            container_component_up(
                ctx,
                name,
                comp,
                containers,
                skip_provision,
                background,
                keep_up_on_error,
            )
            .await
        }
    }
}

async fn container_component_up(
    ctx: &DevlabContext,
    name: &str,
    comp: &Component,
    containers: &[ContainerRecord],
    skip_provision: bool,
    background: bool,
    keep_up_on_error: bool,
) -> DevlabResult<()> {
    let cont_name = container_name(name);

    if let Some(record) = containers.iter().find(|cont| cont.name == cont_name) {
        if record.is_up() {
            debug!("component '{}' is already up", name);
            return Ok(());
        }

        info!("starting existing container: {}", cont_name);
        let out = ctx.get_docker().start_container(&cont_name, false).await?;
        if !out.success() {
            return Err(DevlabError::custom(anyhow::anyhow!(
                "failed to start container '{}': {}",
                cont_name,
                out.joined()
            )));
        }
        return Ok(());
    }

    run_scripts(ctx, name, &cont_name, comp.get_pre_scripts(), true).await?;

    let image = comp.get_image().clone().ok_or_else(|| {
        DevlabError::custom(anyhow::anyhow!("component '{}' declares no image", name))
    })?;

    let mounts: Vec<String> = comp
        .get_mounts()
        .iter()
        .map(|mount| {
            if mount.starts_with('/') {
                mount.clone()
            } else {
                format!("{}/{}", ctx.get_project_root().display(), mount)
            }
        })
        .collect();

    let mut run_opts = comp.get_run_opts().clone();
    if !background {
        // Attached containers clean up after themselves.
        run_opts.push("--rm".to_string());
    }

    info!("bringing up component: {}", name);
    let builder = RunContainerOpts::builder()
        .image(image)
        .name(cont_name.clone())
        .ports(comp.get_ports().clone())
        .mounts(mounts)
        .run_opts(run_opts)
        .background(background)
        .interactive(!background)
        .ignore_nonzero_rc(!background)
        .systemd_support(*comp.get_systemd_support())
        .systemd_tmpfs_args(comp.get_systemd_tmpfs_args().clone());
    let env_file = ctx.up_env_file();
    let env_file = env_file.is_file().then_some(env_file);
    let container_opts = match (ctx.network_name(), env_file) {
        (Some(network), Some(env_file)) => builder.network(network).env_file(env_file).build(),
        (Some(network), None) => builder.network(network).build(),
        (None, Some(env_file)) => builder.env_file(env_file).build(),
        (None, None) => builder.build(),
    };

    let out = ctx.get_docker().run_container(container_opts).await?;
    if !out.success() && background {
        if !keep_up_on_error {
            let _ = down::down(ctx, std::slice::from_ref(&name.to_string()), true).await;
        }
        return Err(DevlabError::custom(anyhow::anyhow!(
            "failed to run container '{}': {}",
            cont_name,
            out.joined()
        )));
    }

    if background {
        if !skip_provision {
            if let Err(err) = run_scripts(ctx, name, &cont_name, comp.get_scripts(), false).await {
                if !keep_up_on_error {
                    let _ = down::down(ctx, std::slice::from_ref(&name.to_string()), true).await;
                }
                return Err(err);
            }
        }

        if let Err(err) = run_scripts(ctx, name, &cont_name, comp.get_post_up_scripts(), false).await
        {
            if !keep_up_on_error {
                let _ = down::down(ctx, std::slice::from_ref(&name.to_string()), true).await;
            }
            return Err(err);
        }
    }

    Ok(())
}

/// Launches a host component.
///
/// Detached components run in their own session with the pid recorded in the environment
/// state. The foreground case records the pid first, then stays attached until the process
/// exits.
async fn host_component_up(
    ctx: &DevlabContext,
    name: &str,
    comp: &Component,
    env: &mut EnvState,
    background: bool,
) -> DevlabResult<()> {
    if let Some(pid) = env.component_pid(name) {
        if process_alive(pid) {
            debug!(
                "host component '{}' is already running (pid {})",
                name, pid
            );
            return Ok(());
        }
        env.clear_component_pid(name);
    }

    let cont_name = container_name(name);
    run_scripts(ctx, name, &cont_name, comp.get_pre_scripts(), true).await?;

    let cmd = comp.get_cmd().clone().ok_or_else(|| {
        DevlabError::custom(anyhow::anyhow!("host component '{}' declares no cmd", name))
    })?;

    let vars: HashMap<String, String> = env
        .iter()
        .map(|(key, value)| {
            let rendered = match value {
                EnvValue::Bool(b) => b.to_string(),
                EnvValue::Str(s) => s.clone(),
            };
            (key.clone(), rendered)
        })
        .collect();

    info!("bringing up host component: {}", name);
    let command = Command::builder()
        .program(cmd)
        .env(vars)
        .current_dir(ctx.get_project_root())
        .use_shell(true)
        .build();

    if background {
        let pid = command.spawn_detached()?;
        env.set_component_pid(name, pid);
        env.save().await?;
        info!("host component '{}' started (pid {})", name, pid);
    } else {
        let running = command.spawn().await?;
        if let Some(pid) = running.get_pid() {
            env.set_component_pid(name, pid);
            env.save().await?;
        }
        running.wait().await?;
        env.clear_component_pid(name);
        env.save().await?;
    }

    Ok(())
}

/// Runs a list of lifecycle scripts, failing on the first non-zero exit.
async fn run_scripts(
    ctx: &DevlabContext,
    component: &str,
    container: &str,
    scripts: &[Script],
    interactive: bool,
) -> DevlabResult<()> {
    for script in scripts {
        let out = run_script(
            ctx.get_docker(),
            ctx.get_project_root(),
            ctx.network_name(),
            script,
            container,
            ScriptOpts::builder()
                .interactive(interactive)
                .log_output(!interactive)
                .build(),
        )
        .await?;

        if !out.success() {
            return Err(DevlabError::ScriptFailure {
                component: component.to_string(),
                script: script.get_raw().to_string(),
                code: out.code,
            });
        }
    }

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::{
        os::unix::fs::PermissionsExt,
        path::{Path, PathBuf},
    };

    use super::*;
    use crate::{
        config::DevlabConfig,
        docker::{DockerHelper, Engine},
        orchestration::PROJECT_LABEL_KEY,
    };

    /// A container engine stand-in. It records every invocation next to itself and answers
    /// the listing commands from two seedable state files, one for this project's
    /// containers and one for everything on the machine.
    const ENGINE_SCRIPT: &str = r#"#!/bin/sh
log="$(dirname "$0")/invocations.log"
owned="$(dirname "$0")/containers.owned"
all="$(dirname "$0")/containers.all"
echo "$*" >> "$log"
case "$1" in
    ps)
        case "$*" in
            *--filter*) cat "$owned" 2>/dev/null ;;
            *) cat "$all" 2>/dev/null ;;
        esac
        ;;
    images)
        printf 'devlab_base:latest\ndevlab_helper:latest\npostgres:16\n'
        ;;
    run)
        name=""
        prev=""
        for arg in "$@"; do
            [ "$prev" = "--name" ] && name="$arg"
            prev="$arg"
        done
        echo "cid,Up 1 second,$name" >> "$owned"
        echo "cid,Up 1 second,$name" >> "$all"
        echo cid
        ;;
    rm)
        shift
        [ "$1" = "-f" ] && shift
        grep -v ",$1$" "$owned" > "$owned.tmp" 2>/dev/null
        mv "$owned.tmp" "$owned"
        grep -v ",$1$" "$all" > "$all.tmp" 2>/dev/null
        mv "$all.tmp" "$all"
        ;;
    container)
        exit 1
        ;;
    image)
        [ "$2" = "inspect" ] && exit 1
        ;;
esac
exit 0
"#;

    fn write_engine(dir: &Path) -> PathBuf {
        let bin = dir.join("engine");
        std::fs::write(&bin, ENGINE_SCRIPT).unwrap();
        let mut perms = std::fs::metadata(&bin).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&bin, perms).unwrap();
        bin
    }

    fn test_context(dir: &Path, config_yaml: &str) -> DevlabContext {
        let config: DevlabConfig = serde_yaml::from_str(config_yaml).unwrap();
        let project_label = format!("{}={}", PROJECT_LABEL_KEY, dir.display());
        let docker = DockerHelper::with_binary(
            write_engine(dir),
            Engine::Docker,
            Some(project_label.clone()),
            vec![project_label],
            None,
        );
        DevlabContext::from_parts(
            dir.to_path_buf(),
            dir.join("DevlabConfig.yaml"),
            config,
            docker,
        )
    }

    fn seed_containers(dir: &Path, owned: &str, all: &str) {
        std::fs::write(dir.join("containers.owned"), owned).unwrap();
        std::fs::write(dir.join("containers.all"), all).unwrap();
    }

    fn engine_log(dir: &Path) -> Vec<String> {
        std::fs::read_to_string(dir.join("invocations.log"))
            .unwrap_or_default()
            .lines()
            .map(|line| line.to_string())
            .collect()
    }

    #[test_log::test(tokio::test)]
    async fn test_up_is_a_noop_for_a_running_component() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path(), "components:\n  db:\n    image: postgres:16\n");
        seed_containers(
            dir.path(),
            "abc,Up 2 hours,db-devlab\n",
            "abc,Up 2 hours,db-devlab\n",
        );

        up(&ctx, &[], UpOpts::default()).await.unwrap();

        let log = engine_log(dir.path());
        assert!(!log.iter().any(|line| {
            line.starts_with("run ") || line.starts_with("start ") || line.starts_with("build ")
        }));
    }

    #[test_log::test(tokio::test)]
    async fn test_up_aborts_on_foreign_container_without_mutating() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path(), "components:\n  db:\n    image: postgres:16\n");
        // The container exists on the machine but does not carry this project's label.
        seed_containers(dir.path(), "", "zzz,Up 2 hours,db-devlab\n");

        let err = up(&ctx, &[], UpOpts::default()).await.unwrap_err();
        assert!(matches!(
            err,
            DevlabError::OwnershipConflict { ref name, .. } if name == "db-devlab"
        ));

        let mutating = ["run ", "start ", "stop ", "rm ", "rmi ", "build "];
        let log = engine_log(dir.path());
        assert!(log
            .iter()
            .all(|line| !mutating.iter().any(|verb| line.starts_with(verb))));
    }

    #[test_log::test(tokio::test)]
    async fn test_provision_failure_tears_the_container_down() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = r#"
components:
  db:
    image: postgres:16
    scripts:
      - "host: exit 1"
"#;
        let ctx = test_context(dir.path(), yaml);

        let err = up(&ctx, &[], UpOpts::default()).await.unwrap_err();
        assert!(matches!(err, DevlabError::ComponentsFailed { count: 1 }));

        let log = engine_log(dir.path());
        assert!(log.iter().any(|line| line.starts_with("stop db-devlab")));
        assert!(log.iter().any(|line| line.starts_with("rm -f db-devlab")));

        let remaining =
            std::fs::read_to_string(dir.path().join("containers.all")).unwrap_or_default();
        assert!(remaining.trim().is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn test_provision_failure_keeps_container_when_asked() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = r#"
components:
  db:
    image: postgres:16
    scripts:
      - "host: exit 1"
"#;
        let ctx = test_context(dir.path(), yaml);

        let err = up(
            &ctx,
            &[],
            UpOpts::builder().keep_up_on_error(true).build(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DevlabError::ComponentsFailed { count: 1 }));

        let log = engine_log(dir.path());
        assert!(!log.iter().any(|line| line.starts_with("rm ")));
        let remaining =
            std::fs::read_to_string(dir.path().join("containers.all")).unwrap_or_default();
        assert!(remaining.contains("db-devlab"));
    }

    #[test_log::test(tokio::test)]
    async fn test_stale_host_pid_is_replaced_on_up() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = "components:\n  agent:\n    type: host\n    cmd: \"sleep 0.2\"\n";
        let ctx = test_context(dir.path(), yaml);

        let mut env = ctx.env_state().await.unwrap();
        env.set_component_pid("agent", 99_999_999);
        env.save().await.unwrap();

        up(&ctx, &[], UpOpts::default()).await.unwrap();

        let env = ctx.env_state().await.unwrap();
        let pid = env.component_pid("agent").unwrap();
        assert_ne!(pid, 99_999_999);
        assert!(pid > 0);
    }
}
