//! Dispatch of parsed lifecycle scripts to the right execution target.

use std::{borrow::Cow, collections::HashMap, path::Path};

use tracing::{debug, info};
use typed_builder::TypedBuilder;

use crate::{
    config::{Script, ScriptKind},
    docker::{DockerHelper, ExecOpts, RunContainerOpts},
    runtime::{Command, CommandOutput},
    DevlabError, DevlabResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// How a single script invocation behaves.
#[derive(Debug, Clone, TypedBuilder)]
pub struct ScriptOpts {
    /// Do not log a non-zero exit status as an error.
    #[builder(default)]
    pub ignore_nonzero_rc: bool,

    /// Attach the script to the terminal.
    #[builder(default = true)]
    pub interactive: bool,

    /// Forward the script's output to the logger.
    #[builder(default)]
    pub log_output: bool,

    /// Run container-mode scripts as this user, with `/root` as the working directory.
    #[builder(default, setter(strip_option, into))]
    pub user: Option<String>,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Runs one lifecycle script against its parsed target.
///
/// `container` is the component's own container, used when the script carries no target of
/// its own. Leading `KEY=VALUE` tokens in the command become environment variables for the
/// child rather than positional arguments.
pub async fn run_script(
    docker: &DockerHelper,
    project_root: &Path,
    network: Option<&str>,
    script: &Script,
    container: &str,
    opts: ScriptOpts,
) -> DevlabResult<CommandOutput> {
    let tokens = shlex::split(script.get_command())
        .ok_or_else(|| DevlabError::InvalidScript(script.get_raw().to_string()))?;
    let (env, tokens) = peel_env_assignments(tokens);
    if tokens.is_empty() {
        return Err(DevlabError::InvalidScript(script.get_raw().to_string()));
    }

    let mut script_run_opts = vec![];
    if let Some(user) = &opts.user {
        script_run_opts.push("--user".to_string());
        script_run_opts.push(user.clone());
        script_run_opts.push("--workdir".to_string());
        script_run_opts.push("/root".to_string());
    }

    match script.get_kind() {
        ScriptKind::Host => {
            info!("executing command: '{}' on local host", tokens.join(" "));
            Command::builder()
                .program(tokens[0].clone())
                .args(tokens[1..].to_vec())
                .env(env)
                .use_shell(true)
                .ignore_nonzero_rc(opts.ignore_nonzero_rc)
                .log_output(opts.log_output)
                .build()
                .run()
                .await
        }
        ScriptKind::HelperContainer {
            image,
            tag,
            container: helper_name,
        } => {
            let mut run_opts = vec!["--rm".to_string()];
            run_opts.extend(script_run_opts);
            info!(
                "executing command: '{}' inside of new container: '{}', using image: '{}:{}'",
                tokens.join(" "),
                helper_name,
                image,
                tag
            );

            let builder = RunContainerOpts::builder()
                .image(format!("{}:{}", image, tag))
                .name(helper_name.clone())
                .mounts(vec![format!("{}:/devlab", project_root.display())])
                .env(env)
                .run_opts(run_opts)
                .background(false)
                .interactive(opts.interactive)
                .ignore_nonzero_rc(opts.ignore_nonzero_rc)
                .log_output(opts.log_output)
                .cmd(quoted_command(&tokens));
            let run_container_opts = match network {
                Some(network) => builder.network(network).build(),
                None => builder.build(),
            };

            docker.run_container(run_container_opts).await
        }
        ScriptKind::RunningContainer { container: target } => {
            exec_in_container(docker, target, &tokens, env, script_run_opts, &opts).await
        }
        ScriptKind::Default => {
            exec_in_container(docker, container, &tokens, env, script_run_opts, &opts).await
        }
    }
}

/// Peels leading `KEY=VALUE` tokens off a command into an environment map, stopping at the
/// first token without an assignment.
pub fn peel_env_assignments(tokens: Vec<String>) -> (HashMap<String, String>, Vec<String>) {
    let mut env = HashMap::new();
    let mut rest = vec![];
    let mut done = false;

    for token in tokens {
        if !done {
            if let Some((var, val)) = token.split_once('=') {
                debug!("found environment variable for script: '{}'", token);
                env.insert(var.to_string(), val.to_string());
                continue;
            }
            done = true;
        }
        rest.push(token);
    }

    (env, rest)
}

async fn exec_in_container(
    docker: &DockerHelper,
    target: &str,
    tokens: &[String],
    env: HashMap<String, String>,
    exec_opts: Vec<String>,
    opts: &ScriptOpts,
) -> DevlabResult<CommandOutput> {
    info!(
        "executing command: '{}' inside of container: {}",
        tokens.join(" "),
        target
    );
    docker
        .exec_cmd(
            ExecOpts::builder()
                .name(target)
                .cmd(quoted_command(tokens))
                .env(env)
                .exec_opts(exec_opts)
                .background(false)
                .interactive(opts.interactive)
                .ignore_nonzero_rc(opts.ignore_nonzero_rc)
                .log_output(opts.log_output)
                .build(),
        )
        .await
}

/// Re-joins peeled tokens so a later shell-style split reproduces them exactly.
fn quoted_command(tokens: &[String]) -> String {
    tokens
        .iter()
        .map(|token| {
            shlex::try_quote(token)
                .map(Cow::into_owned)
                .unwrap_or_else(|_| token.clone())
        })
        .collect::<Vec<_>>()
        .join(" ")
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_peel_env_stops_at_first_command_token() {
        let (env, rest) = peel_env_assignments(strings(&[
            "DB_HOST=localhost",
            "DB_PORT=5432",
            "migrate",
            "--target=latest",
        ]));

        assert_eq!(env.get("DB_HOST").map(String::as_str), Some("localhost"));
        assert_eq!(env.get("DB_PORT").map(String::as_str), Some("5432"));
        assert_eq!(rest, strings(&["migrate", "--target=latest"]));
    }

    #[test]
    fn test_peel_env_without_assignments() {
        let (env, rest) = peel_env_assignments(strings(&["echo", "hi"]));
        assert!(env.is_empty());
        assert_eq!(rest, strings(&["echo", "hi"]));
    }

    #[test]
    fn test_quoted_command_survives_resplit() {
        let cmd = quoted_command(&strings(&["sh", "-c", "echo 'a b'"]));
        assert_eq!(shlex::split(&cmd).unwrap(), strings(&["sh", "-c", "echo 'a b'"]));
    }
}
