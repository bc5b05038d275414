use std::{path::PathBuf, sync::LazyLock};

use crate::config::Ordinal;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The default DNS domain containers are given when none is configured.
pub const DEFAULT_DOMAIN: &str = "devlab.lab";

/// The ordinal group assigned to a component that declares none.
pub const DEFAULT_ORDINAL_GROUP: u32 = 100;

/// The ordinal number assigned to a component that declares none.
pub const DEFAULT_ORDINAL_NUMBER: u32 = 100;

/// The default driver for a project network.
pub const DEFAULT_NETWORK_DRIVER: &str = "bridge";

/// The environment variable that overrides the devlab home directory.
pub const DEVLAB_HOME_ENV: &str = "DEVLAB_HOME";

/// The directory under the operator's home where devlab keeps its own data.
pub const DEVLAB_HOME_DIR: &str = ".devlab";

/// The path where devlab's own dockerfiles and wizard state live.
pub static DEVLAB_HOME: LazyLock<PathBuf> = LazyLock::new(|| {
    std::env::var_os(DEVLAB_HOME_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| dirs::home_dir().unwrap().join(DEVLAB_HOME_DIR))
});

/// The base images devlab manages itself, built from dockerfiles under the devlab home.
pub static BASE_IMAGES: LazyLock<Vec<BaseImage>> = LazyLock::new(|| {
    vec![
        BaseImage {
            name: "devlab_base",
            tag: "latest",
            docker_file: "docker/base.Dockerfile",
            ordinal: Ordinal {
                group: 0,
                number: 1,
            },
        },
        BaseImage {
            name: "devlab_helper",
            tag: "latest",
            docker_file: "docker/helper.Dockerfile",
            ordinal: Ordinal {
                group: 1,
                number: 1,
            },
        },
    ]
});

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A devlab-managed base image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseImage {
    /// The image name.
    pub name: &'static str,

    /// The tag it is built as.
    pub tag: &'static str,

    /// The dockerfile, relative to the devlab home.
    pub docker_file: &'static str,

    /// Where the image sorts among builds.
    pub ordinal: Ordinal,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl BaseImage {
    /// Returns the image as `name:tag`.
    pub fn name_and_tag(&self) -> String {
        format!("{}:{}", self.name, self.tag)
    }

    /// Returns the absolute path to the image's dockerfile.
    pub fn docker_file_path(&self) -> PathBuf {
        DEVLAB_HOME.join(self.docker_file)
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Looks up a base image by bare name.
pub fn find_base_image(name: &str) -> Option<&'static BaseImage> {
    BASE_IMAGES.iter().find(|image| image.name == name)
}
