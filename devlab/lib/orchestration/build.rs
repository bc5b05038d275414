//! Building devlab's base images and the project's runtime images.

use std::{collections::HashMap, path::Path};

use tracing::{debug, info};
use typed_builder::TypedBuilder;

use crate::{
    config::{find_base_image, DEVLAB_HOME},
    docker::{BuildImageOpts, DockerHelper, DockerObjKind},
    images::get_needed_images,
    DevlabError, DevlabResult,
};

use super::{ordering, up, DevlabContext};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// How a `build` run behaves.
#[derive(Debug, Clone, Default, TypedBuilder)]
pub struct BuildOpts {
    /// Remove existing images before building them.
    #[builder(default)]
    pub clean: bool,

    /// Pass `--pull` so parent images are refreshed, except for locally built parents.
    #[builder(default)]
    pub pull: bool,

    /// Pass `--no-cache`.
    #[builder(default)]
    pub no_cache: bool,

    /// Images that must never be pulled even when `pull` is set.
    #[builder(default)]
    pub skip_pull_images: Vec<String>,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Builds the named images, base images before runtime images, each class in its ordinal
/// order. An empty list (or `*`) selects everything the configured components need. The
/// first failed build aborts the batch; dangling images are pruned either way.
pub async fn build(ctx: &DevlabContext, images: &[String], opts: BuildOpts) -> DevlabResult<()> {
    let config = ctx.get_config();

    let mut base_targets: Vec<String> = vec![];
    let mut runtime_targets: Vec<String> = vec![];

    if images.is_empty() || images.iter().any(|image| image == "*") {
        let all = config.resolve_components(&[], false, &[])?;
        let needed =
            get_needed_images(ctx.get_docker(), config, ctx.get_project_root(), &all).await?;
        base_targets.extend(needed.base_images.missing.iter().cloned());
        base_targets.extend(needed.base_images.exists.iter().cloned());
        runtime_targets.extend(needed.runtime_images.missing.iter().cloned());
        runtime_targets.extend(needed.runtime_images.exists.iter().cloned());
    } else {
        for image in images {
            let bare = image.split(':').next().unwrap_or(image).to_string();
            if find_base_image(&bare).is_some() {
                base_targets.push(bare);
            } else if config.get_runtime_images().contains_key(&bare) {
                runtime_targets.push(bare);
            } else {
                return Err(DevlabError::custom(anyhow::anyhow!(
                    "unknown image: {}",
                    image
                )));
            }
        }
    }

    base_targets = ordering::ordinal_sort(&base_targets, |name| {
        find_base_image(name).map(|base| base.ordinal)
    })?;
    runtime_targets = ordering::ordinal_sort(&runtime_targets, |name| {
        config
            .get_runtime_images()
            .get(name)
            .map(|runtime| (*runtime.get_ordinal()).unwrap_or_default())
    })?;

    up::ensure_network(ctx).await?;

    // Locally built images are never pull candidates.
    let mut never_pull: Vec<String> = opts.skip_pull_images.clone();
    never_pull.extend(base_targets.iter().cloned());
    never_pull.extend(runtime_targets.iter().cloned());

    let base_docker = ctx.base_image_docker().await?;
    let result = build_batch(
        ctx,
        &base_docker,
        &base_targets,
        &runtime_targets,
        &never_pull,
        &opts,
    )
    .await;

    ctx.get_docker().prune_images(false).await?;
    result
}

async fn build_batch(
    ctx: &DevlabContext,
    base_docker: &DockerHelper,
    base_targets: &[String],
    runtime_targets: &[String],
    never_pull: &[String],
    opts: &BuildOpts,
) -> DevlabResult<()> {
    let config = ctx.get_config();

    for name in base_targets {
        let Some(base) = find_base_image(name) else {
            continue;
        };
        let full = base.name_and_tag();
        let dockerfile = base.docker_file_path();

        let status = base_docker.obj_status(name, DockerObjKind::ImageBare).await?;
        if status.exists {
            // Rebuilt base images must not leave the old layers tagged.
            let out = base_docker.rm_image(&full).await?;
            if !out.success() {
                return Err(DevlabError::custom(anyhow::anyhow!(
                    "failed to remove image '{}': {}",
                    full,
                    out.joined()
                )));
            }
        }

        let build_opts =
            assemble_build_opts(vec![], opts, name, never_pull, &dockerfile).await;
        info!("building base image: {}", full);
        run_build(
            base_docker,
            ctx,
            base.name,
            base.tag,
            DEVLAB_HOME.as_path(),
            &dockerfile,
            build_opts,
            false,
        )
        .await?;
    }

    for name in runtime_targets {
        let runtime = config.get_runtime_images().get(name).ok_or_else(|| {
            DevlabError::custom(anyhow::anyhow!("unknown runtime image: {}", name))
        })?;
        let full = format!("{}:{}", name, runtime.get_tag());
        let dockerfile = ctx.get_project_root().join(runtime.get_docker_file());

        let status = ctx.get_docker().obj_status(&full, DockerObjKind::Image).await?;
        if status.exists && !status.owned {
            return Err(DevlabError::OwnershipConflict {
                kind: "image".to_string(),
                name: full,
            });
        }
        if opts.clean && status.exists {
            let out = ctx.get_docker().rm_image(&full).await?;
            if !out.success() {
                return Err(DevlabError::custom(anyhow::anyhow!(
                    "failed to remove image '{}': {}",
                    full,
                    out.joined()
                )));
            }
        }

        let mut skip_pull = never_pull.to_vec();
        if *runtime.get_skip_pull() {
            skip_pull.push(name.clone());
        }
        let build_opts = assemble_build_opts(
            runtime.get_build_opts().clone(),
            opts,
            name,
            &skip_pull,
            &dockerfile,
        )
        .await;
        info!("building runtime image: {}", full);
        run_build(
            ctx.get_docker(),
            ctx,
            name,
            runtime.get_tag(),
            ctx.get_project_root(),
            &dockerfile,
            build_opts,
            true,
        )
        .await?;
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_build(
    docker: &DockerHelper,
    ctx: &DevlabContext,
    name: &str,
    tag: &str,
    context: &Path,
    dockerfile: &Path,
    build_opts: Vec<String>,
    apply_filter_label: bool,
) -> DevlabResult<()> {
    let mut env = HashMap::new();
    if *ctx.get_config().get_disable_buildkit() {
        env.insert("DOCKER_BUILDKIT".to_string(), "0".to_string());
    }

    let builder = BuildImageOpts::builder()
        .name(name)
        .tags(vec![tag.to_string()])
        .context(context)
        .docker_file(dockerfile)
        .build_opts(build_opts)
        .apply_filter_label(apply_filter_label)
        .env(env);
    let opts = match ctx.network_name() {
        Some(network) => builder.network(network).build(),
        None => builder.build(),
    };

    let out = docker.build_image(opts).await?;
    if !out.success() {
        return Err(DevlabError::custom(anyhow::anyhow!(
            "failed to build image '{}:{}'",
            name,
            tag
        )));
    }
    Ok(())
}

/// Assembles the extra `build` flags for one image, deciding whether `--pull` is safe.
///
/// Pulling is skipped when the image is on the never-pull list or its dockerfile's parent
/// is itself built locally.
async fn assemble_build_opts(
    mut build_opts: Vec<String>,
    opts: &BuildOpts,
    name: &str,
    never_pull: &[String],
    dockerfile: &Path,
) -> Vec<String> {
    if opts.pull {
        let parent = dockerfile_parent(dockerfile).await;
        let skip = never_pull.iter().any(|skip| skip == name)
            || parent
                .as_deref()
                .map(|parent| never_pull.iter().any(|skip| skip == parent))
                .unwrap_or(false);
        if skip {
            debug!("not passing --pull for locally sourced image: {}", name);
        } else {
            build_opts.push("--pull".to_string());
        }
    }
    if opts.no_cache {
        build_opts.push("--no-cache".to_string());
    }
    build_opts
}

/// Returns the bare name of the first `FROM` image in a dockerfile.
async fn dockerfile_parent(dockerfile: &Path) -> Option<String> {
    let contents = tokio::fs::read_to_string(dockerfile).await.ok()?;
    for line in contents.lines() {
        let line = line.trim();
        if line.len() > 5 && line[..4].eq_ignore_ascii_case("FROM") {
            let image = line[4..].split_whitespace().next()?;
            return Some(image.split(':').next().unwrap_or(image).to_string());
        }
    }
    None
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dockerfile_parent_strips_tag_and_stage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Dockerfile");
        std::fs::write(&path, "# builder\nFROM devlab_base:latest AS build\nRUN true\n").unwrap();

        assert_eq!(
            dockerfile_parent(&path).await.as_deref(),
            Some("devlab_base")
        );
    }

    #[tokio::test]
    async fn test_dockerfile_parent_missing_file() {
        assert_eq!(dockerfile_parent(Path::new("/nonexistent/Dockerfile")).await, None);
    }
}
