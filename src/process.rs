//! Commands launched inside a sandbox and handles to them.

use std::io::{self, BufRead, BufReader};
use std::process::{Child, Command, ExitStatus};
use std::time::{Duration, Instant};

use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;

use crate::command::{Invocation, Privilege};

/// A command to run inside the innermost namespace of a topology.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SandboxCommand {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    capture_output: bool,
}

impl SandboxCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            capture_output: false,
        }
    }

    /// Build from an argv vector; `None` if it is empty.
    pub fn from_argv<I, S>(argv: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut argv = argv.into_iter();
        let program = argv.next()?;
        Some(Self::new(program).args(argv))
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable for the command (applied with `env`
    /// inside the namespace, since `sudo` resets the environment).
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Pipe stdout/stderr instead of inheriting them.
    pub fn capture_output(mut self) -> Self {
        self.capture_output = true;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn captures_output(&self) -> bool {
        self.capture_output
    }

    pub(crate) fn invocation(&self) -> Invocation {
        if self.env.is_empty() {
            return Invocation::new(&self.program, self.args.iter().cloned());
        }
        Invocation::new("env", self.env.iter().map(|(k, v)| format!("{k}={v}")))
            .arg(self.program.clone())
            .args(self.args.iter().cloned())
    }
}

/// A process running inside a sandbox namespace.
///
/// Not supervised: dropping the handle leaves the process running.
pub struct SandboxProcess {
    child: Child,
    label: String,
    privilege: Privilege,
}

impl SandboxProcess {
    pub(crate) fn new(child: Child, label: String, privilege: Privilege) -> Self {
        tracing::debug!(%label, pid = child.id(), "spawned namespace process");
        Self {
            child,
            label,
            privilege,
        }
    }

    /// PID of the launched wrapper; also its process group ID.
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn wait(&mut self) -> io::Result<ExitStatus> {
        self.child.wait()
    }

    pub fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }

    /// Wait up to `timeout`; `None` if the process is still running.
    pub fn wait_timeout(&mut self, timeout: Duration) -> io::Result<Option<ExitStatus>> {
        let start = Instant::now();
        loop {
            if let Some(status) = self.child.try_wait()? {
                return Ok(Some(status));
            }
            if start.elapsed() >= timeout {
                return Ok(None);
            }
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    pub fn is_alive(&mut self) -> bool {
        self.child.try_wait().ok().flatten().is_none()
    }

    /// Signal the whole process group, so the command receives it even
    /// when wrapped by `sudo ip netns exec`.
    pub fn signal(&self, signal: Signal) -> io::Result<()> {
        let pgid = self.child.id();
        match self.privilege {
            Privilege::Direct => {
                killpg(Pid::from_raw(pgid as i32), signal).map_err(io::Error::from)
            }
            Privilege::Sudo => {
                let name = signal.as_str().trim_start_matches("SIG");
                let status = Command::new("sudo")
                    .args(["kill", &format!("-{name}"), "--", &format!("-{pgid}")])
                    .status()?;
                if status.success() {
                    Ok(())
                } else {
                    Err(io::Error::other(format!("kill -{name} -{pgid}: {status}")))
                }
            }
        }
    }

    /// SIGTERM, then SIGKILL if still running after `grace`.
    pub fn terminate(&mut self, grace: Duration) -> io::Result<ExitStatus> {
        if let Some(status) = self.child.try_wait()? {
            return Ok(status);
        }

        // The group may already be gone between try_wait and the signal
        let _ = self.signal(Signal::SIGTERM);
        if let Some(status) = self.wait_timeout(grace)? {
            return Ok(status);
        }

        let _ = self.signal(Signal::SIGKILL);
        self.child.wait()
    }

    /// Captured stdout lines. Only meaningful after exit.
    pub fn stdout_lines(&mut self) -> Vec<String> {
        match self.child.stdout.take() {
            Some(stdout) => BufReader::new(stdout)
                .lines()
                .map_while(|l| l.ok())
                .collect(),
            None => vec![],
        }
    }

    /// Captured stderr lines. Only meaningful after exit.
    pub fn stderr_lines(&mut self) -> Vec<String> {
        match self.child.stderr.take() {
            Some(stderr) => BufReader::new(stderr)
                .lines()
                .map_while(|l| l.ok())
                .collect(),
            None => vec![],
        }
    }
}

impl std::fmt::Debug for SandboxProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxProcess")
            .field("pid", &self.child.id())
            .field("label", &self.label)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::CommandExt;
    use std::process::Stdio;

    fn local_process(program: &str, args: &[&str], capture: bool) -> SandboxProcess {
        let mut cmd = Command::new(program);
        cmd.args(args).process_group(0);
        if capture {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        }
        SandboxProcess::new(cmd.spawn().unwrap(), program.to_string(), Privilege::Direct)
    }

    #[test]
    fn test_command_invocation() {
        let cmd = SandboxCommand::new("ping").args(["-c", "3"]).arg("10.1.0.1");
        assert_eq!(cmd.invocation().to_string(), "ping -c 3 10.1.0.1");
        assert!(!cmd.captures_output());
    }

    #[test]
    fn test_command_env_uses_env_wrapper() {
        let cmd = SandboxCommand::new("server")
            .env("RUST_LOG", "debug")
            .arg("--port")
            .arg("8000");
        assert_eq!(
            cmd.invocation().to_string(),
            "env RUST_LOG=debug server --port 8000"
        );
    }

    #[test]
    fn test_from_argv() {
        let cmd = SandboxCommand::from_argv(["sleep", "1"]).unwrap();
        assert_eq!(cmd.program(), "sleep");
        assert!(SandboxCommand::from_argv(Vec::<String>::new()).is_none());
    }

    #[test]
    fn test_wait_timeout_and_terminate() {
        let mut process = local_process("sleep", &["30"], false);
        assert!(process.is_alive());
        assert!(
            process
                .wait_timeout(Duration::from_millis(50))
                .unwrap()
                .is_none()
        );

        let status = process.terminate(Duration::from_secs(2)).unwrap();
        assert!(!status.success());
        assert!(!process.is_alive());
    }

    #[test]
    fn test_captured_output() {
        let mut process = local_process("echo", &["hello"], true);
        assert!(process.wait().unwrap().success());
        assert_eq!(process.stdout_lines(), ["hello"]);
        assert!(process.stderr_lines().is_empty());
    }
}
