//! Refreshing the images components run on.

use tracing::info;

use crate::{config::BASE_IMAGES, images::get_needed_images, DevlabError, DevlabResult};

use super::{build, DevlabContext};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Rebuilds every internal image the selected components use, devlab's own base images
/// included, and pulls the external ones.
pub async fn update_images(ctx: &DevlabContext, components: &[String]) -> DevlabResult<()> {
    let selected = ctx
        .get_config()
        .resolve_components(components, false, &[])?;
    update_component_images(ctx, &selected, false).await
}

/// Refreshes the images of the given components.
///
/// Internal images (runtime ones, plus the base images unless skipped) are rebuilt clean
/// with their parents pulled; external registry images are pulled directly. A failed pull
/// is fatal.
pub async fn update_component_images(
    ctx: &DevlabContext,
    components: &[String],
    skip_base_images: bool,
) -> DevlabResult<()> {
    let needed = get_needed_images(
        ctx.get_docker(),
        ctx.get_config(),
        ctx.get_project_root(),
        components,
    )
    .await?;

    let mut internal: Vec<String> = vec![];
    if !skip_base_images {
        internal.extend(needed.base_images.exists.iter().cloned());
        internal.extend(needed.base_images.missing.iter().cloned());
    }
    internal.extend(needed.runtime_images.exists.iter().cloned());
    internal.extend(needed.runtime_images.missing.iter().cloned());

    if !internal.is_empty() {
        // Base images never get pulled over, they only exist locally.
        let skip_pull: Vec<String> = BASE_IMAGES.iter().map(|base| base.name.to_string()).collect();
        build::build(
            ctx,
            &internal,
            build::BuildOpts::builder()
                .clean(true)
                .pull(true)
                .skip_pull_images(skip_pull)
                .build(),
        )
        .await?;
    }

    for image in needed
        .external_images
        .exists
        .iter()
        .chain(needed.external_images.missing.iter())
    {
        info!("pulling image: {}", image);
        let out = ctx.get_docker().pull_image(image).await?;
        if !out.success() {
            return Err(DevlabError::custom(anyhow::anyhow!(
                "failed to pull image: {}",
                image
            )));
        }
    }

    Ok(())
}
