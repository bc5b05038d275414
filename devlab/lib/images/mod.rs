//! Resolution of the images a set of components needs, diffed against local state.

use std::path::Path;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::{
    config::{find_base_image, ComponentKind, DevlabConfig, Script, ScriptKind, BASE_IMAGES},
    docker::{DockerHelper, DockerObjKind, ImageRef},
    DevlabError, DevlabResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The local state of one class of images.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageDiff {
    /// Images not present locally.
    pub missing: Vec<String>,

    /// Images present locally.
    pub exists: Vec<String>,

    /// Images present locally and carrying this project's label.
    pub exists_owned: Vec<String>,

    /// Images present but stale against their dockerfile's `last_modified` label.
    pub needs_update: Vec<String>,
}

/// Everything the requested components need, classified by image class.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NeededImages {
    /// Devlab's own bootstrap images.
    pub base_images: ImageDiff,

    /// Project-declared images built from project dockerfiles.
    pub runtime_images: ImageDiff,

    /// Registry images that are pulled, never built.
    pub external_images: ImageDiff,
}

#[derive(Debug, Deserialize, Default)]
struct RegistryAuthFile {
    #[serde(default)]
    auths: serde_json::Map<String, serde_json::Value>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ImageDiff {
    /// Returns the images that have to be built or rebuilt.
    pub fn to_build(&self) -> Vec<String> {
        let mut images = self.missing.clone();
        images.extend(self.needs_update.iter().cloned());
        images
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Walks the requested components' declared images and every helper-container script image,
/// classifies each into base/runtime/external, and diffs against the local image list.
pub async fn get_needed_images(
    docker: &DockerHelper,
    config: &DevlabConfig,
    project_root: &Path,
    components: &[String],
) -> DevlabResult<NeededImages> {
    let mut result = NeededImages::default();
    let mut runtime_refs: Vec<String> = vec![];
    let mut external_refs: Vec<String> = vec![];

    for base in BASE_IMAGES.iter() {
        let status = docker
            .obj_status(base.name, DockerObjKind::ImageBare)
            .await?;
        if !status.exists {
            debug!("base image '{}' not found locally", base.name);
            result.base_images.missing.push(base.name.to_string());
            continue;
        }
        result.base_images.exists.push(base.name.to_string());
        if check_build_image_needs_update(docker, base.name, &base.docker_file_path()).await? {
            result.base_images.needs_update.push(base.name.to_string());
        }
        if status.owned {
            result.base_images.exists_owned.push(base.name.to_string());
        }
    }

    for name in components {
        let comp = match config.find_component(name) {
            Some(comp) => comp,
            None => return Err(DevlabError::UnknownComponent(name.clone())),
        };
        if comp.get_kind() == &ComponentKind::Host {
            debug!("component '{}' is host type, no image needed", name);
            continue;
        }
        let is_foreground = config.foreground_name() == Some(name.as_str());
        if !*comp.get_enabled() && !is_foreground {
            continue;
        }

        if let Some(image) = comp.get_image() {
            classify_image(
                &ImageRef::parse(image),
                config,
                &mut runtime_refs,
                &mut external_refs,
            );
        }

        let script_lists: Vec<&Script> = comp
            .get_pre_scripts()
            .iter()
            .chain(comp.get_scripts().iter())
            .chain(comp.get_post_up_scripts().iter())
            .chain(comp.get_status_script().iter())
            .collect();
        for script in script_lists {
            if let ScriptKind::HelperContainer { image, tag, .. } = script.get_kind() {
                let mut image_ref = ImageRef::parse(image);
                image_ref.tag = tag.clone();
                classify_image(&image_ref, config, &mut runtime_refs, &mut external_refs);
            }
        }
    }

    for image in &runtime_refs {
        let bare = bare_name(image);
        let status = docker.obj_status(image, DockerObjKind::Image).await?;
        if !status.exists {
            debug!("runtime image '{}' not found locally", image);
            result.runtime_images.missing.push(bare);
            continue;
        }
        if let Some(runtime) = config.get_runtime_images().get(&bare) {
            let dockerfile = project_root.join(runtime.get_docker_file());
            if check_build_image_needs_update(docker, image, &dockerfile).await? {
                result.runtime_images.needs_update.push(image.clone());
            }
        }
        result.runtime_images.exists.push(bare.clone());
        if status.owned {
            result.runtime_images.exists_owned.push(bare);
        }
    }

    for image in &external_refs {
        let status = docker.obj_status(image, DockerObjKind::Image).await?;
        if !status.exists {
            debug!("external image '{}' not found locally", image);
            result.external_images.missing.push(image.clone());
            continue;
        }
        result.external_images.exists.push(image.clone());
        if status.owned {
            result.external_images.exists_owned.push(image.clone());
        }
    }

    Ok(result)
}

/// Compares a dockerfile's `last_modified` label against the one baked into the local
/// image. Stale means the strings differ; a dockerfile without the label never needs an
/// update.
pub async fn check_build_image_needs_update(
    docker: &DockerHelper,
    image: &str,
    dockerfile: &Path,
) -> DevlabResult<bool> {
    let contents = match tokio::fs::read_to_string(dockerfile).await {
        Ok(contents) => contents,
        Err(_) => {
            // An image can exist without its dockerfile being installed locally. Nothing
            // to compare against, so it is not stale.
            debug!(
                "dockerfile '{}' is not readable, no update needed",
                dockerfile.display()
            );
            return Ok(false);
        }
    };
    let declared = match dockerfile_last_modified(&contents) {
        Some(value) => value,
        None => {
            debug!(
                "no last_modified label in '{}', no update needed",
                dockerfile.display()
            );
            return Ok(false);
        }
    };

    let image = if image.contains(':') {
        image.to_string()
    } else {
        format!("{}:latest", image)
    };
    let inspected = docker.inspect_image(&image).await?;
    let current = inspected
        .first()
        .and_then(|details| details.pointer("/Config/Labels/last_modified"))
        .and_then(|value| value.as_str());

    match current {
        Some(current) if current == declared => Ok(false),
        current => {
            debug!(
                "image '{}' last_modified '{:?}' differs from dockerfile '{}'",
                image, current, declared
            );
            Ok(true)
        }
    }
}

/// Verifies the operator has registry auth for every component image hosted on a custom
/// registry, failing with a "docker login" hint otherwise.
pub async fn ensure_registry_auth(
    config: &DevlabConfig,
    components: &[String],
) -> DevlabResult<()> {
    let mut auths: Option<RegistryAuthFile> = None;

    for name in components {
        let comp = match config.find_component(name) {
            Some(comp) => comp,
            None => continue,
        };
        if comp.get_kind() == &ComponentKind::Host {
            continue;
        }
        let image = match comp.get_image() {
            Some(image) => image,
            None => continue,
        };
        let host = match ImageRef::parse(image).host {
            Some(host) => host,
            None => continue,
        };

        if auths.is_none() {
            auths = Some(load_registry_auths().await);
        }
        let logged_in = auths
            .as_ref()
            .map(|file| file.auths.contains_key(&host))
            .unwrap_or(false);
        if !logged_in {
            warn!(
                "this project uses an image hosted on the custom registry: {}, and you appear \
                 to have never authenticated to it. Please execute: docker login {}",
                host, host
            );
            return Err(DevlabError::RegistryNotLoggedIn(host));
        }
    }

    Ok(())
}

async fn load_registry_auths() -> RegistryAuthFile {
    let Some(home) = dirs::home_dir() else {
        return RegistryAuthFile::default();
    };
    let path = home.join(".docker/config.json");
    match tokio::fs::read_to_string(&path).await {
        Ok(contents) => serde_json::from_str(&contents).unwrap_or_default(),
        Err(_) => RegistryAuthFile::default(),
    }
}

fn classify_image(
    image_ref: &ImageRef,
    config: &DevlabConfig,
    runtime_refs: &mut Vec<String>,
    external_refs: &mut Vec<String>,
) {
    let bare = image_ref.bare_image.clone();

    if let Some(runtime) = config.get_runtime_images().get(&bare) {
        let name_and_tag = format!("{}:{}", bare, runtime.get_tag());
        if !runtime_refs.contains(&name_and_tag) {
            debug!("discovered needed runtime image: '{}'", name_and_tag);
            runtime_refs.push(name_and_tag);
        }
        return;
    }

    if find_base_image(&bare).is_some() {
        debug!("discovered needed base image: '{}'", bare);
        return;
    }

    // External references keep their registry host so pulls hit the right place.
    let full = image_ref.to_string();
    if !external_refs.contains(&full) {
        debug!("discovered needed external image: '{}'", full);
        external_refs.push(full);
    }
}

fn dockerfile_last_modified(contents: &str) -> Option<String> {
    let mut found = None;
    for line in contents.lines() {
        if line.starts_with("LABEL") && line.contains("last_modified") {
            let value = line
                .split_whitespace()
                .nth(1)
                .and_then(|pair| pair.split_once('='))
                .map(|(_, val)| val.trim_matches('"').to_string());
            if value.is_some() {
                found = value;
            }
        }
    }
    found
}

fn bare_name(image: &str) -> String {
    match image.rsplit_once(':') {
        Some((name, _)) => name.to_string(),
        None => image.to_string(),
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dockerfile_last_modified_extraction() {
        let contents = "FROM debian:12\nLABEL last_modified=\"2024-11-02\"\nRUN true\n";
        assert_eq!(
            dockerfile_last_modified(contents).as_deref(),
            Some("2024-11-02")
        );

        let unlabeled = "FROM debian:12\nRUN true\n";
        assert_eq!(dockerfile_last_modified(unlabeled), None);
    }

    #[tokio::test]
    async fn test_needs_update_is_false_without_a_dockerfile() {
        let docker = DockerHelper::with_binary(
            std::path::PathBuf::from("/bin/false"),
            crate::docker::Engine::Docker,
            None,
            vec![],
            None,
        );

        let needs = check_build_image_needs_update(
            &docker,
            "devlab_base",
            Path::new("/nonexistent/devlab/base.Dockerfile"),
        )
        .await
        .unwrap();

        assert!(!needs);
    }

    #[test]
    fn test_classify_image_prefers_runtime_then_external() {
        let config: DevlabConfig = serde_yaml::from_str(
            r#"
runtime_images:
  devlab_api:
    tag: "2.0"
    docker_file: docker/api.Dockerfile
"#,
        )
        .unwrap();

        let mut runtime = vec![];
        let mut external = vec![];

        classify_image(
            &ImageRef::parse("devlab_api:latest"),
            &config,
            &mut runtime,
            &mut external,
        );
        classify_image(
            &ImageRef::parse("postgres:16"),
            &config,
            &mut runtime,
            &mut external,
        );
        classify_image(
            &ImageRef::parse("devlab_base"),
            &config,
            &mut runtime,
            &mut external,
        );
        // Duplicates collapse.
        classify_image(
            &ImageRef::parse("postgres:16"),
            &config,
            &mut runtime,
            &mut external,
        );

        assert_eq!(runtime, vec!["devlab_api:2.0"]);
        assert_eq!(external, vec!["postgres:16"]);
    }
}
