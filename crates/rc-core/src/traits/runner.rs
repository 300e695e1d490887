//! External command execution

use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::CommandError;

const REDACTED: &str = "********";

/// Description of a command to run
///
/// Arguments added with [`CommandSpec::secret_arg`] and the stdin text are
/// masked in `Display` and `Debug`, so specs can be logged and carried in
/// errors without leaking credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Text written to the child's stdin, which is then closed
    pub stdin: Option<String>,
    pub env: Vec<(String, String)>,
    pub current_dir: Option<PathBuf>,
    /// Where a background process sends stdout and stderr
    pub log_file: Option<PathBuf>,
    /// Indices into `args` that must never be printed
    secret: Vec<usize>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
            env: Vec::new(),
            current_dir: None,
            log_file: None,
            secret: Vec::new(),
        }
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

    /// Argument holding a credential; shown masked wherever the spec is printed
    pub fn secret_arg(mut self, arg: impl Into<String>) -> Self {
        self.secret.push(self.args.len());
        self.args.push(arg.into());
        self
    }

    /// Whether argument `index` was added as a secret
    pub fn is_secret(&self, index: usize) -> bool {
        self.secret.contains(&index)
    }

    /// Arguments as they may be shown to a user or written to a log
    pub fn display_args(&self) -> impl Iterator<Item = &str> {
        self.args
            .iter()
            .enumerate()
            .map(move |(i, arg)| if self.is_secret(i) { REDACTED } else { arg.as_str() })
    }

    /// Path argument, converted lossily
    pub fn path_arg(self, path: impl AsRef<Path>) -> Self {
        let arg = path.as_ref().to_string_lossy().into_owned();
        self.arg(arg)
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    /// Run this command as `user` through a login shell, so HOME and friends
    /// belong to that user.
    pub fn as_user(self, user: &str) -> Self {
        let script = std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(shell_quote)
            .collect::<Vec<_>>()
            .join(" ");
        // The script embeds every argument, so one secret makes it all secret
        let secret = if self.secret.is_empty() { Vec::new() } else { vec![3] };

        Self {
            program: "runuser".to_string(),
            args: vec![
                "-l".to_string(),
                user.to_string(),
                "-c".to_string(),
                script,
            ],
            secret,
            ..self
        }
    }

    /// Whether the program and leading arguments match `prefix`
    pub fn starts_with(&self, prefix: &[&str]) -> bool {
        let mut words = std::iter::once(&self.program).chain(self.args.iter());
        prefix.iter().all(|p| words.next().map(|w| w == p).unwrap_or(false))
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in self.display_args() {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSpec")
            .field("program", &self.program)
            .field("args", &self.display_args().collect::<Vec<_>>())
            .field("stdin", &self.stdin.as_ref().map(|_| REDACTED))
            .field("env", &self.env)
            .field("current_dir", &self.current_dir)
            .field("log_file", &self.log_file)
            .finish()
    }
}

/// Quote a word for `sh -c` if it needs it
fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=+,@%".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` if killed by a signal
    pub code: Option<i32>,
    /// Raw stdout; some tools (vncpasswd) emit binary data
    pub stdout: Vec<u8>,
    pub stderr: String,
}

impl CommandOutput {
    /// A successful run with the given stdout
    pub fn ok(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// A failed run with the given exit code and stderr
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: Vec::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Stdout as text
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Turn an unsuccessful exit into an error
    pub fn check(self, spec: &CommandSpec) -> Result<Self, CommandError> {
        if self.success() {
            Ok(self)
        } else {
            Err(CommandError::Failed {
                command: spec.to_string(),
                code: self.code,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// Handle to a process left running in the background
pub trait BackgroundProcess: Send {
    /// OS process id, if known
    fn id(&self) -> Option<u32>;

    /// `Some(code)` once the process has exited (`-1` for a signal)
    fn try_exit(&mut self) -> Result<Option<i32>, CommandError>;
}

/// Runs external programs on behalf of the provisioning steps
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion and capture output, whatever the exit status
    async fn output(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError>;

    /// Run to completion, calling `on_line` for each stdout line as it arrives.
    /// Like `output`, the exit status is not checked.
    async fn run_streaming(
        &self,
        spec: &CommandSpec,
        on_line: &mut (dyn for<'l> FnMut(&'l str) + Send),
    ) -> Result<CommandOutput, CommandError>;

    /// Start a detached process that outlives this program
    fn spawn(&self, spec: &CommandSpec) -> Result<Box<dyn BackgroundProcess>, CommandError>;

    /// Run to completion; a non-zero exit is an error
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        tracing::debug!("exec: {}", spec);
        self.output(spec).await?.check(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let spec = CommandSpec::new("ssh-keygen").args(["-lvf", "/etc/ssh/key.pub"]);
        assert_eq!(spec.to_string(), "ssh-keygen -lvf /etc/ssh/key.pub");
    }

    #[test]
    fn test_as_user_quotes_arguments() {
        let spec = CommandSpec::new("/opt/TurboVNC/bin/vncserver")
            .arg("-name")
            .arg("colab desktop")
            .as_user("colab");

        assert_eq!(spec.program, "runuser");
        assert_eq!(
            spec.args,
            vec![
                "-l",
                "colab",
                "-c",
                "/opt/TurboVNC/bin/vncserver -name 'colab desktop'"
            ]
        );
    }

    #[test]
    fn test_shell_quote_single_quote() {
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_starts_with() {
        let spec = CommandSpec::new("apt-get").args(["install", "-y", "bindfs"]);
        assert!(spec.starts_with(&["apt-get", "install"]));
        assert!(!spec.starts_with(&["apt-get", "update"]));
        assert!(!spec.starts_with(&["apt-get", "install", "-y", "bindfs", "x"]));
    }

    #[test]
    fn test_secret_arg_is_masked() {
        let spec = CommandSpec::new("ngrok")
            .arg("authtoken")
            .secret_arg("2abcSECRETtoken")
            .args(["--config", "/root/.ngrok2/ngrok.yml"]);

        assert_eq!(spec.args[1], "2abcSECRETtoken");
        assert_eq!(
            spec.to_string(),
            "ngrok authtoken ******** --config /root/.ngrok2/ngrok.yml"
        );
        assert!(!format!("{:?}", spec).contains("SECRET"));

        let err = CommandOutput::failed(1, "ERROR: authentication failed")
            .check(&spec)
            .unwrap_err();
        assert!(!err.to_string().contains("SECRET"));
        assert!(err.to_string().contains("authentication failed"));
    }

    #[test]
    fn test_secret_survives_as_user() {
        let spec = CommandSpec::new("tool").secret_arg("hunter2").as_user("colab");
        assert_eq!(spec.args[3], "tool hunter2");
        assert!(!spec.to_string().contains("hunter2"));
    }

    #[test]
    fn test_debug_hides_stdin() {
        let spec = CommandSpec::new("chpasswd").stdin("colab:pa55word\n");
        assert!(!format!("{:?}", spec).contains("pa55word"));
    }

    #[test]
    fn test_check_failure() {
        let spec = CommandSpec::new("useradd").arg("colab");
        let err = CommandOutput::failed(9, "user 'colab' already exists\n")
            .check(&spec)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "`useradd colab` exited with 9: user 'colab' already exists"
        );
    }
}
