//! Wiping component state so provisioning starts from scratch.

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};

use tracing::{debug, info};
use typed_builder::TypedBuilder;

use crate::{utils::sanitize_relative_path, DevlabError, DevlabResult};

use super::{down, ordering, DevlabContext};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The virtual component selecting devlab's own project state.
pub const DEVLAB_TARGET: &str = "devlab";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// How a `reset` run behaves.
#[derive(Debug, Clone, Default, TypedBuilder)]
pub struct ResetOpts {
    /// Also wipe the project paths listed under `reset_full`, returning the checkout to a
    /// pristine state. Only valid when resetting everything.
    #[builder(default)]
    pub full: bool,

    /// Clear first-run wizard markers even for components that are enabled.
    #[builder(default)]
    pub reset_wizard: bool,

    /// The operator has confirmed a destructive full reset.
    #[builder(default)]
    pub confirmed: bool,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Resets the selected components: brings them down with their containers removed and
/// deletes their persisted state. The virtual `devlab` target resets the project-level
/// state, including the environment file.
pub async fn reset(ctx: &DevlabContext, components: &[String], opts: ResetOpts) -> DevlabResult<()> {
    let config = ctx.get_config();
    let mut selected = config.resolve_components(components, false, &[DEVLAB_TARGET])?;

    let mut full = opts.full;
    let mut reset_wizard = opts.reset_wizard;

    if full {
        let named: BTreeSet<&String> = selected
            .iter()
            .filter(|name| name.as_str() != DEVLAB_TARGET)
            .collect();
        let all = config.resolve_components(&[], false, &[])?;
        if !components.is_empty() && named != all.iter().collect::<BTreeSet<_>>() {
            return Err(DevlabError::custom(anyhow::anyhow!(
                "a full reset applies to the whole environment, not individual components"
            )));
        }
        if !opts.confirmed {
            return Err(DevlabError::custom(anyhow::anyhow!(
                "full reset aborted, it needs confirmation"
            )));
        }
        if !selected.iter().any(|name| name == DEVLAB_TARGET) {
            selected.push(DEVLAB_TARGET.to_string());
        }
        reset_wizard = true;
    }

    let order = ordering::reset_order(config, &selected)?;
    let persistence = config.persistence_dir(ctx.get_project_root());

    for name in &order {
        if name == DEVLAB_TARGET {
            continue;
        }
        let comp = config
            .find_component(name)
            .ok_or_else(|| DevlabError::UnknownComponent(name.clone()))?;

        info!("resetting component: {}", name);
        if *comp.get_enabled() {
            down::down(ctx, std::slice::from_ref(name), true).await?;
        }

        for path in comp.get_reset_paths() {
            remove_path(&component_state_path(&persistence, name, path)).await?;
        }

        if *config.get_wizard_enabled() && (reset_wizard || !*comp.get_enabled()) {
            for path in config.get_paths().get_component_persistence_wizard_paths() {
                remove_path(&component_state_path(&persistence, name, path)).await?;
            }
        }
    }

    if order.iter().any(|name| name == DEVLAB_TARGET) {
        info!("resetting devlab project state");
        for path in config.get_paths().get_reset_paths() {
            remove_path(&ctx.get_project_root().join(sanitize_relative_path(path))).await?;
        }
        remove_path(&ctx.up_env_file()).await?;
    }

    if full {
        for path in config.get_paths().get_reset_full() {
            remove_path(&ctx.get_project_root().join(sanitize_relative_path(path))).await?;
        }
    }

    Ok(())
}

/// Returns the on-disk location of a component-relative state path, with traversal
/// segments stripped.
fn component_state_path(persistence: &Path, component: &str, path: &str) -> PathBuf {
    persistence
        .join(component)
        .join(sanitize_relative_path(path))
}

async fn remove_path(path: &Path) -> DevlabResult<()> {
    match tokio::fs::metadata(path).await {
        Result::Ok(meta) if meta.is_dir() => {
            info!("removing directory: {}", path.display());
            tokio::fs::remove_dir_all(path).await?;
        }
        Result::Ok(_) => {
            info!("removing file: {}", path.display());
            tokio::fs::remove_file(path).await?;
        }
        Result::Err(_) => debug!("path already absent: {}", path.display()),
    }
    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_state_path_strips_traversal() {
        let path = component_state_path(Path::new("/proj/persist"), "db", "../../etc/passwd");
        assert_eq!(path, PathBuf::from("/proj/persist/db/etc/passwd"));
    }
}
