use std::{
    collections::HashMap,
    fmt::{self, Display},
    path::PathBuf,
};

use getset::Getters;
use tracing::debug;
use typed_builder::TypedBuilder;

use crate::{
    config::NetworkConfig,
    runtime::{Command, CommandOutput},
    DevlabError, DevlabResult,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Engine binaries probed in order when building a [`DockerHelper`].
pub const ENGINE_BINARIES: &[&str] = &["docker", "podman"];

/// Registry prefixes podman prepends to image names that docker leaves bare.
const PODMAN_IMAGE_PREFIXES: &[&str] = &["localhost/", "docker.io/library/"];

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Which engine CLI the helper is driving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    /// The docker CLI.
    Docker,

    /// The podman CLI, whose image listing output gets normalized to docker's format.
    Podman,
}

/// The kind of docker object queried by [`DockerHelper::obj_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DockerObjKind {
    /// A container, matched by name.
    Container,

    /// An image, matched by `name:tag`.
    Image,

    /// An image, matched by name with the tag stripped.
    ImageBare,

    /// A network, matched by name.
    Network,
}

/// Whether a docker object exists and whether this project owns it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObjStatus {
    /// An object with the queried name exists.
    pub exists: bool,

    /// The object carries this project's filter label.
    pub owned: bool,
}

/// A container as reported by `ps`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRecord {
    /// The container id.
    pub id: String,

    /// The container name.
    pub name: String,

    /// The human readable status column.
    pub status: String,
}

/// A network as reported by `network list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkRecord {
    /// The network id.
    pub id: String,

    /// The network name.
    pub name: String,

    /// The network driver.
    pub driver: String,

    /// The network scope.
    pub scope: String,
}

/// Options for running a new container.
#[derive(Debug, Clone, TypedBuilder)]
pub struct RunContainerOpts {
    /// The image to run.
    #[builder(setter(into))]
    pub image: String,

    /// The container name, also used as its hostname.
    #[builder(setter(into))]
    pub name: String,

    /// The network to attach the container to.
    #[builder(default, setter(strip_option, into))]
    pub network: Option<String>,

    /// Ports to publish to the host.
    #[builder(default)]
    pub ports: Vec<String>,

    /// Volume mounts to pass.
    #[builder(default)]
    pub mounts: Vec<String>,

    /// Environment variables to set inside the container.
    #[builder(default)]
    pub env: HashMap<String, String>,

    /// A file of environment variables to pass through.
    #[builder(default, setter(strip_option, into))]
    pub env_file: Option<PathBuf>,

    /// Extra options appended to `run` verbatim.
    #[builder(default)]
    pub run_opts: Vec<String>,

    /// The command to run inside the container, split shell-style.
    #[builder(default, setter(strip_option, into))]
    pub cmd: Option<String>,

    /// Detach the container.
    #[builder(default = true)]
    pub background: bool,

    /// Attach our stdio to the container.
    #[builder(default)]
    pub interactive: bool,

    /// Do not log a non-zero exit status as an error.
    #[builder(default)]
    pub ignore_nonzero_rc: bool,

    /// Forward captured output to the logger.
    #[builder(default)]
    pub log_output: bool,

    /// Add the tmpfs mounts and cgroup volume systemd needs inside a container.
    #[builder(default)]
    pub systemd_support: bool,

    /// Arguments appended to each `--tmpfs` mount when systemd support is enabled.
    #[builder(default, setter(into))]
    pub systemd_tmpfs_args: String,
}

/// Options for building an image from a dockerfile.
#[derive(Debug, Clone, TypedBuilder)]
pub struct BuildImageOpts {
    /// The image name.
    #[builder(setter(into))]
    pub name: String,

    /// Tags to attach to the image.
    #[builder(setter(into))]
    pub tags: Vec<String>,

    /// The build context directory.
    #[builder(setter(into))]
    pub context: PathBuf,

    /// The dockerfile, passed to the engine on stdin.
    #[builder(setter(into))]
    pub docker_file: PathBuf,

    /// Extra options appended to `build`.
    #[builder(default)]
    pub build_opts: Vec<String>,

    /// The network for build-time containers.
    #[builder(default, setter(strip_option, into))]
    pub network: Option<String>,

    /// Label the image with the project's filter label.
    #[builder(default = true)]
    pub apply_filter_label: bool,

    /// Environment variables for the engine invocation itself, e.g. `DOCKER_BUILDKIT=0`.
    #[builder(default)]
    pub env: HashMap<String, String>,
}

/// Options for executing a command inside a running container.
#[derive(Debug, Clone, TypedBuilder)]
pub struct ExecOpts {
    /// The container to exec into.
    #[builder(setter(into))]
    pub name: String,

    /// The command to run, split shell-style.
    #[builder(setter(into))]
    pub cmd: String,

    /// Environment variables set for the exec'd command.
    #[builder(default)]
    pub env: HashMap<String, String>,

    /// Extra options appended to `exec` verbatim.
    #[builder(default)]
    pub exec_opts: Vec<String>,

    /// Detach the exec.
    #[builder(default)]
    pub background: bool,

    /// Attach our stdio to the exec'd command.
    #[builder(default = true)]
    pub interactive: bool,

    /// Do not log a non-zero exit status as an error.
    #[builder(default)]
    pub ignore_nonzero_rc: bool,

    /// Forward captured output to the logger.
    #[builder(default)]
    pub log_output: bool,
}

/// A gateway to the container engine CLI.
///
/// Every created object is tagged with the configured labels, and queries are restricted to
/// the filter label unless a caller explicitly asks for everything. That label scoping is
/// what "ownership" means throughout devlab.
#[derive(Debug, Clone, Getters)]
pub struct DockerHelper {
    /// The engine binary.
    #[getset(get = "pub with_prefix")]
    bin: PathBuf,

    /// Which engine the binary turned out to be.
    #[getset(get = "pub with_prefix")]
    engine: Engine,

    /// The label queries are filtered on.
    #[getset(get = "pub with_prefix")]
    filter_label: Option<String>,

    labels: Vec<String>,
    common_domain: Option<String>,
    opt_domainname: bool,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl DockerHelper {
    /// Finds a usable engine binary and probes its capabilities.
    pub async fn init(
        filter_label: Option<String>,
        labels: Vec<String>,
        common_domain: Option<String>,
    ) -> DevlabResult<Self> {
        let bin = Self::find_binary().ok_or(DevlabError::EngineNotFound)?;

        let engine = if bin
            .file_name()
            .map(|name| name.to_string_lossy().contains("podman"))
            .unwrap_or(false)
        {
            Engine::Podman
        } else {
            Engine::Docker
        };
        debug!("container engine found: {} ({})", bin.display(), engine);

        let check = Command::builder()
            .program(bin.to_string_lossy().into_owned())
            .args(vec!["ps".to_string()])
            .suppress_error_out(true)
            .build()
            .run()
            .await?;
        if !check.success() {
            return Err(DevlabError::EngineUnusable(check.joined()));
        }

        let help = Command::builder()
            .program(bin.to_string_lossy().into_owned())
            .args(vec!["run".to_string(), "--help".to_string()])
            .suppress_error_out(true)
            .build()
            .run()
            .await?;
        let opt_domainname = help.joined().contains("--domainname");

        Ok(Self {
            bin,
            engine,
            filter_label,
            labels,
            common_domain,
            opt_domainname,
        })
    }

    /// Builds a helper around an already known engine binary, skipping discovery and the
    /// capability probes. [`init`](Self::init) is the usual entry point; this one exists
    /// for callers that manage engine selection themselves.
    pub fn with_binary(
        bin: PathBuf,
        engine: Engine,
        filter_label: Option<String>,
        labels: Vec<String>,
        common_domain: Option<String>,
    ) -> Self {
        Self {
            bin,
            engine,
            filter_label,
            labels,
            common_domain,
            opt_domainname: false,
        }
    }

    /// Lists containers, restricted to this project unless `return_all` is set.
    pub async fn get_containers(&self, return_all: bool) -> DevlabResult<Vec<ContainerRecord>> {
        let mut args = vec!["ps".to_string(), "-a".to_string()];
        self.push_filter(&mut args, return_all);
        args.push("--format".to_string());
        args.push("{{.ID}},{{.Status}},{{.Names}}".to_string());

        let out = self.run_engine(args).await?;
        Ok(parse_container_lines(&out.stdout))
    }

    /// Lists images as `name:tag` strings, restricted to this project unless `return_all`
    /// is set. Podman output is normalized to docker's format.
    pub async fn get_images(&self, return_all: bool) -> DevlabResult<Vec<String>> {
        let mut args = vec!["images".to_string()];
        self.push_filter(&mut args, return_all);
        args.push("--format".to_string());
        args.push("{{.Repository}}:{{.Tag}}".to_string());

        let out = self.run_engine(args).await?;
        let mut images = out.stdout;
        if self.engine == Engine::Podman {
            images = normalize_podman_images(images);
        }
        Ok(images)
    }

    /// Lists networks, restricted to this project unless `return_all` is set.
    pub async fn get_networks(&self, return_all: bool) -> DevlabResult<Vec<NetworkRecord>> {
        let mut args = vec!["network".to_string(), "list".to_string()];
        self.push_filter(&mut args, return_all);
        args.push("--format".to_string());
        args.push("{{.ID}},{{.Name}},{{.Driver}},{{.Scope}}".to_string());

        let out = self.run_engine(args).await?;
        Ok(parse_network_lines(&out.stdout))
    }

    /// Returns the `inspect` data for a container, empty when it does not exist.
    pub async fn inspect_container(&self, container: &str) -> DevlabResult<Vec<serde_json::Value>> {
        self.inspect(&["container", "inspect", container]).await
    }

    /// Returns the `inspect` data for an image, empty when it does not exist.
    pub async fn inspect_image(&self, image: &str) -> DevlabResult<Vec<serde_json::Value>> {
        self.inspect(&["image", "inspect", image]).await
    }

    async fn inspect(&self, args: &[&str]) -> DevlabResult<Vec<serde_json::Value>> {
        let out = Command::builder()
            .program(self.bin.to_string_lossy().into_owned())
            .args(args.iter().map(|s| s.to_string()).collect::<Vec<_>>())
            .suppress_error_out(true)
            .build()
            .run()
            .await?;
        if !out.success() {
            return Ok(vec![]);
        }
        Ok(serde_json::from_str(&out.stdout.join("\n"))?)
    }

    /// Determines whether a docker object exists and whether this project owns it.
    pub async fn obj_status(&self, name: &str, kind: DockerObjKind) -> DevlabResult<ObjStatus> {
        let (owned, all): (Vec<String>, Vec<String>) = match kind {
            DockerObjKind::Network => (
                self.get_networks(false)
                    .await?
                    .into_iter()
                    .map(|net| net.name)
                    .collect(),
                self.get_networks(true)
                    .await?
                    .into_iter()
                    .map(|net| net.name)
                    .collect(),
            ),
            DockerObjKind::Container => (
                self.get_containers(false)
                    .await?
                    .into_iter()
                    .map(|cont| cont.name)
                    .collect(),
                self.get_containers(true)
                    .await?
                    .into_iter()
                    .map(|cont| cont.name)
                    .collect(),
            ),
            DockerObjKind::Image => (self.get_images(false).await?, self.get_images(true).await?),
            DockerObjKind::ImageBare => (
                strip_tags(self.get_images(false).await?),
                strip_tags(self.get_images(true).await?),
            ),
        };

        let name = name.to_string();
        Ok(ObjStatus {
            exists: owned.contains(&name) || all.contains(&name),
            owned: owned.contains(&name),
        })
    }

    /// Runs a new container.
    pub async fn run_container(&self, opts: RunContainerOpts) -> DevlabResult<CommandOutput> {
        let mut args = vec!["run".to_string()];
        args.extend(opts.run_opts.iter().cloned());
        self.push_labels(&mut args, true);

        if opts.background {
            args.push("--detach".to_string());
        }
        if let Some(network) = &opts.network {
            args.push(format!("--network={}", network));
        }
        for (var, val) in &opts.env {
            args.push("--env".to_string());
            args.push(format!("{}={}", var, val));
        }
        if let Some(env_file) = &opts.env_file {
            args.push(format!("--env-file={}", env_file.display()));
        }
        if opts.systemd_support {
            let tmpfs_args = if opts.systemd_tmpfs_args.is_empty() {
                String::new()
            } else {
                format!(":{}", opts.systemd_tmpfs_args)
            };
            args.push(format!("--tmpfs=/run{}", tmpfs_args));
            args.push(format!("--tmpfs=/run/lock{}", tmpfs_args));
            args.push(format!("--tmpfs=/tmp{}", tmpfs_args));
            args.push("--volume=/sys/fs/cgroup:/sys/fs/cgroup:ro".to_string());
            // Keeps 'docker logs' showing systemd output.
            args.push("-t".to_string());
        }
        for mount in &opts.mounts {
            args.push(format!("--volume={}", mount));
        }
        for port in &opts.ports {
            args.push(format!("--publish={}", port));
        }
        if opts.interactive {
            args.push("-it".to_string());
        }

        args.push("--name".to_string());
        args.push(opts.name.clone());
        match &self.common_domain {
            Some(domain) if self.opt_domainname => {
                args.push("--hostname".to_string());
                args.push(opts.name.clone());
                args.push("--domainname".to_string());
                args.push(domain.clone());
            }
            Some(domain) => {
                args.push("--hostname".to_string());
                args.push(format!("{}.{}", opts.name, domain));
            }
            None => {
                args.push("--hostname".to_string());
                args.push(opts.name.clone());
            }
        }

        args.push(opts.image.clone());
        if let Some(cmd) = &opts.cmd {
            args.extend(shlex::split(cmd).unwrap_or_default());
        }

        Command::builder()
            .program(self.bin.to_string_lossy().into_owned())
            .args(args)
            .interactive(opts.interactive)
            .ignore_nonzero_rc(opts.ignore_nonzero_rc)
            .log_output(opts.log_output)
            .build()
            .run()
            .await
    }

    /// Builds an image, feeding the dockerfile to the engine on stdin so the build context
    /// does not need to contain it.
    pub async fn build_image(&self, opts: BuildImageOpts) -> DevlabResult<CommandOutput> {
        if !opts.docker_file.is_file() {
            return Err(DevlabError::DockerfileNotFound(opts.docker_file));
        }

        let mut args = vec!["build".to_string(), "--force-rm".to_string()];
        if let Some(network) = &opts.network {
            args.push(format!("--network={}", network));
        }
        args.extend(opts.build_opts.iter().cloned());
        self.push_labels(&mut args, opts.apply_filter_label);
        for tag in &opts.tags {
            args.push("-t".to_string());
            args.push(format!("{}:{}", opts.name, tag));
        }
        args.push("-f".to_string());
        args.push("-".to_string());
        args.push(opts.context.to_string_lossy().into_owned());

        let dockerfile = tokio::fs::read(&opts.docker_file).await?;

        Command::builder()
            .program(self.bin.to_string_lossy().into_owned())
            .args(args)
            .env(opts.env)
            .stdin(dockerfile)
            .log_output(true)
            .build()
            .run()
            .await
    }

    /// Executes a command inside a running container.
    pub async fn exec_cmd(&self, opts: ExecOpts) -> DevlabResult<CommandOutput> {
        let mut args = vec!["exec".to_string()];
        args.extend(opts.exec_opts.iter().cloned());
        for (var, val) in &opts.env {
            args.push("--env".to_string());
            args.push(format!("{}={}", var, val));
        }
        if opts.background {
            args.push("--detach".to_string());
        }
        if opts.interactive {
            args.push("-it".to_string());
        }
        args.push(opts.name.clone());
        args.extend(shlex::split(&opts.cmd).unwrap_or_default());

        Command::builder()
            .program(self.bin.to_string_lossy().into_owned())
            .args(args)
            .interactive(opts.interactive)
            .ignore_nonzero_rc(opts.ignore_nonzero_rc)
            .log_output(opts.log_output)
            .build()
            .run()
            .await
    }

    /// Creates a network with this project's labels applied.
    pub async fn create_network(&self, network: &NetworkConfig) -> DevlabResult<CommandOutput> {
        let mut args = vec![
            "network".to_string(),
            "create".to_string(),
            "--driver".to_string(),
            network.get_driver().clone(),
        ];
        if let Some(cidr) = network.get_cidr() {
            args.push("--subnet".to_string());
            args.push(cidr.clone());
        }
        if let Some(gateway) = network.get_gateway() {
            args.push("--gateway".to_string());
            args.push(gateway.clone());
        }
        if let Some(ip_range) = network.get_ip_range() {
            args.push("--ip-range".to_string());
            args.push(ip_range.clone());
        }
        if *network.get_ipv6() {
            args.push("--ipv6=true".to_string());
        }
        self.push_labels(&mut args, true);
        if let Some(device_name) = network.get_device_name() {
            args.push("--opt".to_string());
            args.push(format!("com.docker.network.bridge.name={}", device_name));
        }
        if let Some(name) = network.get_name() {
            args.push(name.clone());
        }

        self.run_engine(args).await
    }

    /// Starts an already created container.
    pub async fn start_container(
        &self,
        name: &str,
        ignore_nonzero_rc: bool,
    ) -> DevlabResult<CommandOutput> {
        Command::builder()
            .program(self.bin.to_string_lossy().into_owned())
            .args(vec!["start".to_string(), name.to_string()])
            .ignore_nonzero_rc(ignore_nonzero_rc)
            .build()
            .run()
            .await
    }

    /// Stops a running container.
    pub async fn stop_container(&self, name: &str) -> DevlabResult<CommandOutput> {
        self.run_engine(vec!["stop".to_string(), name.to_string()])
            .await
    }

    /// Removes a container.
    pub async fn rm_container(&self, name: &str, force: bool) -> DevlabResult<CommandOutput> {
        let mut args = vec!["rm".to_string()];
        if force {
            args.push("-f".to_string());
        }
        args.push(name.to_string());
        self.run_engine(args).await
    }

    /// Removes an image.
    pub async fn rm_image(&self, name: &str) -> DevlabResult<CommandOutput> {
        self.run_engine(vec![
            "rmi".to_string(),
            "-f".to_string(),
            name.to_string(),
        ])
        .await
    }

    /// Prunes dangling images, restricted to this project unless `prune_all` is set.
    pub async fn prune_images(&self, prune_all: bool) -> DevlabResult<CommandOutput> {
        let mut args = vec!["image".to_string(), "prune".to_string()];
        self.push_filter(&mut args, prune_all);
        args.push("-f".to_string());
        self.run_engine(args).await
    }

    /// Pulls an image from its registry.
    pub async fn pull_image(&self, image: &str) -> DevlabResult<CommandOutput> {
        Command::builder()
            .program(self.bin.to_string_lossy().into_owned())
            .args(vec![
                "image".to_string(),
                "pull".to_string(),
                image.to_string(),
            ])
            .log_output(true)
            .build()
            .run()
            .await
    }

    async fn run_engine(&self, args: Vec<String>) -> DevlabResult<CommandOutput> {
        Command::builder()
            .program(self.bin.to_string_lossy().into_owned())
            .args(args)
            .build()
            .run()
            .await
    }

    fn push_filter(&self, args: &mut Vec<String>, return_all: bool) {
        if let Some(filter) = &self.filter_label {
            if !return_all {
                args.push("--filter".to_string());
                args.push(format!("label={}", filter));
            }
        }
    }

    fn push_labels(&self, args: &mut Vec<String>, apply_filter_label: bool) {
        for label in &self.labels {
            args.push("--label".to_string());
            args.push(label.clone());
        }
        if apply_filter_label {
            if let Some(filter) = &self.filter_label {
                args.push(format!("--label={}", filter));
            }
        }
    }

    fn find_binary() -> Option<PathBuf> {
        for candidate in ENGINE_BINARIES {
            if let Result::Ok(path) = which::which(candidate) {
                return Some(path);
            }
        }
        None
    }
}

impl ContainerRecord {
    /// Returns true when the status column reports the container as up.
    pub fn is_up(&self) -> bool {
        self.status.to_lowercase().contains("up")
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn parse_container_lines(lines: &[String]) -> Vec<ContainerRecord> {
    lines
        .iter()
        .filter_map(|line| {
            let mut parts = line.splitn(3, ',');
            Some(ContainerRecord {
                id: parts.next()?.to_string(),
                status: parts.next()?.to_string(),
                name: parts.next()?.to_string(),
            })
        })
        .collect()
}

fn parse_network_lines(lines: &[String]) -> Vec<NetworkRecord> {
    lines
        .iter()
        .filter_map(|line| {
            let mut parts = line.splitn(4, ',');
            Some(NetworkRecord {
                id: parts.next()?.to_string(),
                name: parts.next()?.to_string(),
                driver: parts.next()?.to_string(),
                scope: parts.next()?.to_string(),
            })
        })
        .collect()
}

fn normalize_podman_images(images: Vec<String>) -> Vec<String> {
    images
        .into_iter()
        .map(|image| {
            for prefix in PODMAN_IMAGE_PREFIXES {
                if let Some(stripped) = image.strip_prefix(prefix) {
                    debug!("normalized podman image: '{}' -> '{}'", image, stripped);
                    return stripped.to_string();
                }
            }
            image
        })
        .collect()
}

fn strip_tags(images: Vec<String>) -> Vec<String> {
    images
        .into_iter()
        .map(|image| match image.split_once(':') {
            Some((name, _)) => name.to_string(),
            None => image,
        })
        .collect()
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Engine::Docker => write!(f, "docker"),
            Engine::Podman => write!(f, "podman"),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_container_lines() {
        let lines = vec![
            "abc123,Up 2 hours,ledger-db-devlab".to_string(),
            "def456,Exited (0) 3 days ago,api-devlab".to_string(),
        ];

        let parsed = parse_container_lines(&lines);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].name, "ledger-db-devlab");
        assert!(parsed[0].is_up());
        assert_eq!(parsed[1].status, "Exited (0) 3 days ago");
        assert!(!parsed[1].is_up());
    }

    #[test]
    fn test_parse_network_lines() {
        let lines = vec!["net1,devlab,bridge,local".to_string()];
        let parsed = parse_network_lines(&lines);
        assert_eq!(parsed[0].name, "devlab");
        assert_eq!(parsed[0].driver, "bridge");
        assert_eq!(parsed[0].scope, "local");
    }

    #[test]
    fn test_normalize_podman_images() {
        let images = vec![
            "localhost/devlab_base:latest".to_string(),
            "docker.io/library/postgres:16".to_string(),
            "registry.example.com/app:1".to_string(),
        ];

        let normalized = normalize_podman_images(images);
        assert_eq!(
            normalized,
            vec![
                "devlab_base:latest",
                "postgres:16",
                "registry.example.com/app:1"
            ]
        );
    }

    #[test]
    fn test_strip_tags() {
        let stripped = strip_tags(vec!["devlab_base:latest".to_string()]);
        assert_eq!(stripped, vec!["devlab_base"]);
    }
}
