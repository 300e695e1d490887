//! Real command execution on the host

use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

use crate::error::CommandError;
use crate::traits::{BackgroundProcess, CommandOutput, CommandRunner, CommandSpec};

/// Runs commands with `tokio::process`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }

    fn command(spec: &CommandSpec) -> Command {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args);
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &spec.current_dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    fn spawn_error(spec: &CommandSpec, source: std::io::Error) -> CommandError {
        CommandError::Spawn {
            program: spec.program.clone(),
            source,
        }
    }

    fn io_error(spec: &CommandSpec, source: std::io::Error) -> CommandError {
        CommandError::Io {
            command: spec.to_string(),
            source,
        }
    }

    async fn feed_stdin(
        spec: &CommandSpec,
        child: &mut tokio::process::Child,
    ) -> Result<(), CommandError> {
        if let (Some(input), Some(mut stdin)) = (&spec.stdin, child.stdin.take()) {
            stdin
                .write_all(input.as_bytes())
                .await
                .map_err(|e| Self::io_error(spec, e))?;
            // Dropping stdin closes the pipe so the child sees EOF
        }
        Ok(())
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn output(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        let mut cmd = Self::command(spec);
        cmd.stdin(if spec.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| Self::spawn_error(spec, e))?;
        Self::feed_stdin(spec, &mut child).await?;

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| Self::io_error(spec, e))?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: output.stdout,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn run_streaming(
        &self,
        spec: &CommandSpec,
        on_line: &mut (dyn for<'l> FnMut(&'l str) + Send),
    ) -> Result<CommandOutput, CommandError> {
        tracing::debug!("exec (streaming): {}", spec);

        let mut cmd = Self::command(spec);
        cmd.stdin(if spec.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| Self::spawn_error(spec, e))?;
        Self::feed_stdin(spec, &mut child).await?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let read_stdout = async {
            let mut captured = Vec::new();
            if let Some(stdout) = stdout {
                let mut lines = BufReader::new(stdout).lines();
                while let Some(line) = lines.next_line().await? {
                    on_line(&line);
                    captured.extend_from_slice(line.as_bytes());
                    captured.push(b'\n');
                }
            }
            Ok::<_, std::io::Error>(captured)
        };
        let read_stderr = async {
            let mut buf = String::new();
            if let Some(mut stderr) = stderr {
                stderr.read_to_string(&mut buf).await?;
            }
            Ok::<_, std::io::Error>(buf)
        };

        let (stdout, stderr) = tokio::try_join!(read_stdout, read_stderr)
            .map_err(|e| Self::io_error(spec, e))?;
        let status = child.wait().await.map_err(|e| Self::io_error(spec, e))?;

        Ok(CommandOutput {
            code: status.code(),
            stdout,
            stderr,
        })
    }

    fn spawn(&self, spec: &CommandSpec) -> Result<Box<dyn BackgroundProcess>, CommandError> {
        tracing::debug!("spawn: {}", spec);

        let mut cmd = std::process::Command::new(&spec.program);
        cmd.args(&spec.args).stdin(Stdio::null());
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &spec.current_dir {
            cmd.current_dir(dir);
        }

        match &spec.log_file {
            Some(path) => {
                let log = std::fs::File::create(path).map_err(|e| Self::io_error(spec, e))?;
                let log_err = log.try_clone().map_err(|e| Self::io_error(spec, e))?;
                cmd.stdout(log).stderr(log_err);
            }
            None => {
                cmd.stdout(Stdio::null()).stderr(Stdio::null());
            }
        }

        // Own process group: the process must survive the end of this program
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let child = cmd.spawn().map_err(|e| Self::spawn_error(spec, e))?;
        tracing::info!("Started {} (PID: {})", spec.program, child.id());

        Ok(Box::new(DetachedChild {
            command: spec.to_string(),
            child,
        }))
    }
}

/// A background child process; dropping it leaves the process running
struct DetachedChild {
    command: String,
    child: std::process::Child,
}

impl BackgroundProcess for DetachedChild {
    fn id(&self) -> Option<u32> {
        Some(self.child.id())
    }

    fn try_exit(&mut self) -> Result<Option<i32>, CommandError> {
        self.child
            .try_wait()
            .map(|status| status.map(|s| s.code().unwrap_or(-1)))
            .map_err(|source| CommandError::Io {
                command: self.command.clone(),
                source,
            })
    }
}
