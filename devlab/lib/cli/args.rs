use std::path::PathBuf;

use clap::Parser;

use crate::cli::styles;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// `devlab` is a tool for orchestrating local development environments made of containers
/// and host processes
#[derive(Debug, Parser)]
#[command(name = "devlab", author, version, styles=styles::styles())]
pub struct DevlabArgs {
    /// The subcommand to run
    #[command(subcommand)]
    pub subcommand: DevlabSubcommand,

    /// Enable verbose logging
    #[arg(short = 'V', long, global = true)]
    pub verbose: bool,

    /// Run against the project at this path instead of discovering one from the current
    /// directory
    #[arg(short = 'p', long, global = true, name = "PATH")]
    pub project_root: Option<PathBuf>,
}

/// Available subcommands for managing the environment
#[derive(Debug, Parser)]
pub enum DevlabSubcommand {
    /// Bring components up
    #[command(name = "up")]
    Up {
        /// Components to bring up, all of them when omitted
        components: Vec<String>,

        /// Bind components to the host interface and reprovision when the host address
        /// changes
        #[arg(long)]
        bind_to_host: bool,

        /// Rebuild internal images and pull external ones first
        #[arg(short, long)]
        update_images: bool,

        /// Leave partially started components running when provisioning fails
        #[arg(short, long)]
        keep_up_on_error: bool,

        /// Skip one-time provisioning scripts for newly created containers
        #[arg(long)]
        skip_provision: bool,
    },

    /// Bring components down
    #[command(name = "down")]
    Down {
        /// Components to bring down, all of them when omitted
        components: Vec<String>,

        /// Also remove the stopped containers
        #[arg(short, long)]
        rm: bool,
    },

    /// Bring components down and back up
    #[command(name = "restart")]
    Restart {
        /// Components to restart, all of them when omitted
        components: Vec<String>,

        /// Rebuild images on the way, removing the old containers
        #[arg(short, long)]
        update_images: bool,
    },

    /// Wipe component state so provisioning starts from scratch
    #[command(name = "reset")]
    Reset {
        /// Components to reset, all of them when omitted. The virtual 'devlab' component
        /// resets the project-level state
        components: Vec<String>,

        /// Also wipe the project paths listed under reset_full
        #[arg(long)]
        full: bool,

        /// Clear first-run wizard markers even for enabled components
        #[arg(long)]
        reset_wizard: bool,

        /// Do not ask for confirmation before a full reset
        #[arg(short, long)]
        yes: bool,
    },

    /// Show the state of every component
    #[command(name = "status")]
    Status {},

    /// Build base and runtime images
    #[command(name = "build")]
    Build {
        /// Images to build, everything the components need when omitted
        images: Vec<String>,

        /// Remove existing images before building them
        #[arg(short, long)]
        clean: bool,

        /// Pass --pull so parent images are refreshed
        #[arg(long)]
        pull: bool,

        /// Pass --no-cache
        #[arg(long)]
        no_cache: bool,
    },

    /// Rebuild internal images and pull external ones
    #[command(name = "update-images")]
    UpdateImages {
        /// Components whose images get refreshed, all of them when omitted
        components: Vec<String>,
    },

    /// Open a shell (or run a command) inside a component's container
    #[command(name = "sh")]
    Sh {
        /// The component to enter
        component: String,

        /// Run container commands as this user
        #[arg(short, long)]
        user: Option<String>,

        /// The command to run instead of the component's shell
        #[arg(trailing_var_arg = true)]
        command: Vec<String>,
    },

    /// Act on every devlab project on this machine
    #[command(name = "global")]
    Global {
        /// The global subcommand to run
        #[command(subcommand)]
        subcommand: GlobalSubcommand,
    },
}

/// Subcommands spanning all projects on the machine
#[derive(Debug, Parser)]
pub enum GlobalSubcommand {
    /// Show every devlab-managed container, grouped by project
    #[command(name = "status")]
    Status {},

    /// Restart every devlab-managed project
    #[command(name = "restart")]
    Restart {
        /// Rebuild images on the way, removing the old containers
        #[arg(short, long)]
        update_images: bool,
    },
}
