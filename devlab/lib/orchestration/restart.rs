//! Restarting components by composing `down` and `up`.

use crate::DevlabResult;

use super::{down, up, DevlabContext};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Brings the selected components down and back up.
///
/// With `update_images` the containers are removed on the way down so they come back on
/// freshly rebuilt images.
pub async fn restart(
    ctx: &DevlabContext,
    components: &[String],
    update_images: bool,
) -> DevlabResult<()> {
    down::down(ctx, components, update_images).await?;
    up::up(
        ctx,
        components,
        up::UpOpts::builder().update_images(update_images).build(),
    )
    .await
}
