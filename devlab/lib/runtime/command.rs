use std::{
    collections::HashMap,
    os::unix::process::ExitStatusExt,
    path::PathBuf,
    process::{ExitStatus, Stdio},
    time::Duration,
};

use nix::{
    sys::signal::{self, Signal},
    unistd::Pid,
};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader},
    process::Child,
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};
use typed_builder::TypedBuilder;

use crate::{DevlabError, DevlabResult};

use super::sanitize_line;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// How many one-second polls a terminated process gets before it is forcefully killed.
pub const TERM_WAIT_POLLS: u32 = 20;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A child process to run, with devlab's capture and supervision conventions applied.
///
/// Output is captured line by line and sanitized, a timeout (in minutes) escalates from
/// graceful termination to a kill, and a non-zero exit status is reported through the
/// returned [`CommandOutput`] rather than as an error.
#[derive(Debug, TypedBuilder)]
pub struct Command {
    /// The executable to run.
    #[builder(setter(into))]
    program: String,

    /// Arguments passed to the executable.
    #[builder(default, setter(into))]
    args: Vec<String>,

    /// Environment variables layered on top of the current environment.
    #[builder(default)]
    env: HashMap<String, String>,

    /// The working directory for the child.
    #[builder(default, setter(strip_option, into))]
    current_dir: Option<PathBuf>,

    /// Bytes written to the child's stdin before it is closed.
    #[builder(default, setter(strip_option))]
    stdin: Option<Vec<u8>>,

    /// Do not log a non-zero exit status as an error.
    #[builder(default)]
    ignore_nonzero_rc: bool,

    /// Attach the child to our own stdio instead of capturing it.
    #[builder(default)]
    interactive: bool,

    /// Suppress error logging entirely, including a missing executable.
    #[builder(default)]
    suppress_error_out: bool,

    /// Forward captured output to the logger as it arrives.
    #[builder(default)]
    log_output: bool,

    /// Run the command through `sh -c`, deferring executable lookup to the shell.
    #[builder(default)]
    use_shell: bool,

    /// Minutes before the child is considered hung. Zero means no timeout.
    #[builder(default = 0)]
    timeout: u64,

    /// One-second polls a signaled child gets before the escalation falls back to a kill.
    #[builder(default = TERM_WAIT_POLLS)]
    term_wait_polls: u32,
}

/// A spawned [`Command`] that has not yet been waited on.
///
/// Callers that need the child's pid before it finishes (host components whose pid gets
/// persisted while they run in the foreground) spawn first, record the pid, then
/// [`wait`](Self::wait). Everyone else goes through [`Command::run`].
#[derive(Debug)]
pub struct RunningCommand {
    child: Child,
    pid: Option<i32>,
    stdout_task: Option<JoinHandle<Vec<String>>>,
    stderr_task: Option<JoinHandle<Vec<String>>>,
    display: String,
    ignore_nonzero_rc: bool,
    suppress_error_out: bool,
    log_output: bool,
    hang_timeout: Duration,
    term_wait_polls: u32,
}

/// The result of running a [`Command`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// The exit code. Negative when the process was killed by a signal or never started.
    pub code: i32,

    /// Sanitized stdout lines.
    pub stdout: Vec<String>,

    /// Sanitized stderr lines.
    pub stderr: Vec<String>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl CommandOutput {
    /// Returns true when the command exited with status zero.
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// Returns the lines a caller usually wants: stdout on success, stderr (falling back
    /// to stdout) on failure.
    pub fn lines(&self) -> &[String] {
        if self.code != 0 && !self.stderr.is_empty() {
            &self.stderr
        } else {
            &self.stdout
        }
    }

    /// Returns [`Self::lines`] joined by newlines.
    pub fn joined(&self) -> String {
        self.lines().join("\n")
    }
}

impl Command {
    /// Runs the command to completion and returns its captured output.
    ///
    /// A missing executable is reported as output with code `-1` instead of an error so
    /// that callers can treat it like any other failed command.
    pub async fn run(self) -> DevlabResult<CommandOutput> {
        if !self.use_shell && self.resolve_program().is_none() {
            let msg = format!("can't find executable: {}", self.program);
            if !self.suppress_error_out {
                error!("{}", msg);
            }
            return Ok(CommandOutput {
                code: -1,
                stdout: vec![],
                stderr: vec![msg],
            });
        }

        self.spawn().await?.wait().await
    }

    /// Spawns the command and hands back a [`RunningCommand`] for the caller to wait on.
    pub async fn spawn(self) -> DevlabResult<RunningCommand> {
        let display_str = self.display_string();

        let program = self.resolve_program().ok_or_else(|| {
            DevlabError::custom(anyhow::anyhow!("can't find executable: {}", self.program))
        })?;

        debug!("running command: '{}'", display_str);

        let mut cmd = if self.use_shell {
            let mut shell = tokio::process::Command::new("sh");
            shell.arg("-c").arg(self.shell_string());
            shell
        } else {
            let mut direct = tokio::process::Command::new(program);
            direct.args(&self.args);
            direct
        };

        cmd.envs(&self.env);
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }

        if self.interactive {
            cmd.stdin(Stdio::inherit())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit());
        } else {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
            cmd.stdin(if self.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });
        }

        let mut child = cmd.spawn()?;

        if let Some(data) = &self.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(data).await?;
                stdin.shutdown().await?;
            }
        }

        let stdout_task = child
            .stdout
            .take()
            .map(|pipe| collect_pipe(pipe, self.log_output, false));
        let stderr_task = child
            .stderr
            .take()
            .map(|pipe| collect_pipe(pipe, self.log_output, true));

        let pid = child.id().map(|id| id as i32);

        Ok(RunningCommand {
            child,
            pid,
            stdout_task,
            stderr_task,
            display: display_str,
            ignore_nonzero_rc: self.ignore_nonzero_rc,
            suppress_error_out: self.suppress_error_out,
            log_output: self.log_output,
            hang_timeout: Duration::from_secs(self.timeout * 60),
            term_wait_polls: self.term_wait_polls,
        })
    }

    /// Spawns the command fully detached: its own session, stdio connected to the null
    /// device. Returns the child's pid.
    pub fn spawn_detached(self) -> DevlabResult<i32> {
        use std::os::unix::process::CommandExt;

        let display_str = self.display_string();

        let mut cmd = if self.use_shell {
            let mut shell = std::process::Command::new("sh");
            shell.arg("-c").arg(self.shell_string());
            shell
        } else {
            match self.resolve_program() {
                Some(program) => {
                    let mut direct = std::process::Command::new(program);
                    direct.args(&self.args);
                    direct
                }
                None => {
                    return Err(DevlabError::custom(anyhow::anyhow!(
                        "can't find executable: {}",
                        self.program
                    )))
                }
            }
        };

        cmd.envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }

        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }

        debug!("spawning detached command: '{}'", display_str);
        let child = cmd.spawn()?;
        Ok(child.id() as i32)
    }

    fn resolve_program(&self) -> Option<PathBuf> {
        if self.use_shell {
            return Some(PathBuf::from(&self.program));
        }

        let path = PathBuf::from(&self.program);
        if path.components().count() > 1 {
            return path.is_file().then_some(path);
        }

        which::which(&self.program).ok()
    }

    fn display_string(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }

    fn shell_string(&self) -> String {
        let mut parts = vec![self.program.clone()];
        for arg in &self.args {
            match shlex::try_quote(arg) {
                Ok(quoted) => parts.push(quoted.into_owned()),
                Err(_) => parts.push(arg.clone()),
            }
        }
        parts.join(" ")
    }
}

impl RunningCommand {
    /// Returns the child's pid, if it is still known to the runtime.
    pub fn get_pid(&self) -> Option<i32> {
        self.pid
    }

    /// Waits for the command to finish and returns its captured output.
    ///
    /// A ctrl-c while waiting is forwarded to the child as SIGTERM, and a configured
    /// timeout escalates from graceful termination to a kill.
    pub async fn wait(mut self) -> DevlabResult<CommandOutput> {
        // Armed once before the loop. The deadline is absolute, an interrupt arriving
        // while waiting must not push it out.
        let has_timeout = !self.hang_timeout.is_zero();
        let hang_timer = tokio::time::sleep(self.hang_timeout);
        tokio::pin!(hang_timer);

        let status = loop {
            tokio::select! {
                status = self.child.wait() => {
                    break status?;
                }
                _ = tokio::signal::ctrl_c() => {
                    // Interrupted by the user. Pass the request on and keep waiting so the
                    // child can clean up its pipes.
                    if let Some(pid) = self.pid {
                        let _ = signal_process(pid, Signal::SIGTERM);
                    }
                }
                _ = hang_timer.as_mut(), if has_timeout => {
                    warn!(
                        "command '{}' (pid={:?}) appears to be hung, attempting to stop it",
                        self.display, self.pid
                    );
                    break self.escalate(Signal::SIGTERM).await?;
                }
            }
        };

        let code = exit_code(status);
        if code > 0 && !self.suppress_error_out {
            if !self.ignore_nonzero_rc {
                error!(
                    "command did not exit with successful status code ({}): '{}'",
                    code, self.display
                );
            }
        }

        self.finish(code).await
    }

    /// Stops the command, gracefully (SIGINT then polls, then a kill) or immediately.
    pub async fn die(mut self, graceful: bool) -> DevlabResult<CommandOutput> {
        let status = if graceful {
            self.escalate(Signal::SIGINT).await?
        } else {
            self.child.kill().await?;
            self.child.wait().await?
        };

        self.finish(exit_code(status)).await
    }

    async fn escalate(&mut self, first: Signal) -> DevlabResult<ExitStatus> {
        if let Some(pid) = self.pid {
            let _ = signal_process(pid, first);
        }

        for _ in 0..self.term_wait_polls {
            if let Some(status) = self.child.try_wait()? {
                return Ok(status);
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        warn!(
            "command '{}' (pid={:?}) didn't die, killing it",
            self.display, self.pid
        );
        self.child.kill().await?;
        Ok(self.child.wait().await?)
    }

    async fn finish(self, code: i32) -> DevlabResult<CommandOutput> {
        let stdout = match self.stdout_task {
            Some(task) => task.await?,
            None => vec![],
        };
        let stderr = match self.stderr_task {
            Some(task) => task.await?,
            None => vec![],
        };

        if code > 0 && !self.suppress_error_out && !self.log_output {
            for line in stdout.iter().chain(stderr.iter()) {
                error!("{}", line);
            }
        }

        Ok(CommandOutput {
            code,
            stdout,
            stderr,
        })
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Sends `signal` to the process with the given pid.
pub fn signal_process(pid: i32, signal: Signal) -> DevlabResult<()> {
    signal::kill(Pid::from_raw(pid), signal)?;
    Ok(())
}

/// Returns true when a process with the given pid exists, probed with the null signal.
pub fn process_alive(pid: i32) -> bool {
    signal::kill(Pid::from_raw(pid), None).is_ok()
}

fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|sig| -sig))
        .unwrap_or(-1)
}

fn collect_pipe<R>(pipe: R, log_output: bool, is_stderr: bool) -> JoinHandle<Vec<String>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(pipe);
        let mut lines = Vec::new();
        let mut buf = Vec::new();

        // read_until on the raw byte stream keeps lines that are not valid UTF-8, and a
        // partial trailing line is still returned at EOF.
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = sanitize_line(&buf);
                    if line.is_empty() {
                        continue;
                    }
                    if log_output {
                        if is_stderr {
                            warn!("{}", line);
                        } else {
                            info!("{}", line);
                        }
                    }
                    lines.push(line);
                }
                Err(_) => break,
            }
        }

        lines
    })
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test(tokio::test)]
    async fn test_command_captures_stdout() {
        let output = Command::builder()
            .program("sh")
            .args(vec!["-c".to_string(), "echo one; echo two".to_string()])
            .build()
            .run()
            .await
            .unwrap();

        assert!(output.success());
        assert_eq!(output.stdout, vec!["one", "two"]);
        assert!(output.stderr.is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn test_command_nonzero_exit_is_returned_not_raised() {
        let output = Command::builder()
            .program("sh")
            .args(vec!["-c".to_string(), "echo oops >&2; exit 3".to_string()])
            .suppress_error_out(true)
            .build()
            .run()
            .await
            .unwrap();

        assert_eq!(output.code, 3);
        assert_eq!(output.lines(), &["oops".to_string()]);
    }

    #[test_log::test(tokio::test)]
    async fn test_command_missing_executable_reports_failure() {
        let output = Command::builder()
            .program("definitely-not-a-real-binary-9f2d")
            .suppress_error_out(true)
            .build()
            .run()
            .await
            .unwrap();

        assert_eq!(output.code, -1);
        assert!(output.stderr[0].contains("can't find executable"));
    }

    #[test_log::test(tokio::test)]
    async fn test_command_without_timeout_runs_to_completion() {
        // A zero timeout leaves the hang timer disarmed.
        let output = Command::builder()
            .program("sh")
            .args(vec!["-c".to_string(), "sleep 0.1; echo done".to_string()])
            .build()
            .run()
            .await
            .unwrap();

        assert!(output.success());
        assert_eq!(output.stdout, vec!["done"]);
    }

    #[test_log::test(tokio::test)]
    async fn test_wait_escalates_hung_child_to_kill() {
        let mut running = Command::builder()
            .program("sh")
            .args(vec!["-c".to_string(), "trap '' TERM; sleep 5".to_string()])
            .suppress_error_out(true)
            .term_wait_polls(1)
            .build()
            .spawn()
            .await
            .unwrap();

        // Give the shell a moment to install its trap, then declare it hung right away.
        // The child ignores the SIGTERM leg, so only the kill fallback can end it.
        tokio::time::sleep(Duration::from_millis(300)).await;
        running.hang_timeout = Duration::from_millis(1);

        let output = running.wait().await.unwrap();
        assert_eq!(output.code, -(Signal::SIGKILL as i32));
    }

    #[test_log::test(tokio::test)]
    async fn test_command_use_shell_defers_lookup() {
        let output = Command::builder()
            .program("echo hello")
            .use_shell(true)
            .build()
            .run()
            .await
            .unwrap();

        assert!(output.success());
        assert_eq!(output.stdout, vec!["hello"]);
    }

    #[test_log::test(tokio::test)]
    async fn test_command_stdin_data() {
        let output = Command::builder()
            .program("cat")
            .stdin(b"piped in".to_vec())
            .build()
            .run()
            .await
            .unwrap();

        assert!(output.success());
        assert_eq!(output.stdout, vec!["piped in"]);
    }

    #[test_log::test(tokio::test)]
    async fn test_spawn_exposes_pid_before_wait() {
        let running = Command::builder()
            .program("sh")
            .args(vec!["-c".to_string(), "echo spawned".to_string()])
            .build()
            .spawn()
            .await
            .unwrap();

        assert!(running.get_pid().is_some());
        let output = running.wait().await.unwrap();
        assert!(output.success());
        assert_eq!(output.stdout, vec!["spawned"]);
    }

    #[test_log::test(tokio::test)]
    async fn test_die_graceful_interrupts_child() {
        let running = Command::builder()
            .program("sleep")
            .args(vec!["30".to_string()])
            .build()
            .spawn()
            .await
            .unwrap();

        let output = running.die(true).await.unwrap();
        assert_eq!(output.code, -(Signal::SIGINT as i32));
    }

    #[test]
    fn test_process_alive_for_own_pid() {
        assert!(process_alive(std::process::id() as i32));
        assert!(!process_alive(i32::MAX - 1));
    }
}
