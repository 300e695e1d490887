//! In-memory stand-ins for the OS seam
//!
//! Commands are matched by program and leading arguments; anything without a
//! registered response succeeds with empty output. Every call is recorded so
//! tests can assert on what would have run.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;

use crate::error::{CommandError, HttpError};
use crate::traits::{BackgroundProcess, CommandOutput, CommandRunner, CommandSpec, HttpClient};

struct Rule {
    prefix: Vec<String>,
    output: CommandOutput,
}

/// Recording command runner with canned responses
#[derive(Default)]
pub struct MockRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<CommandSpec>>,
    spawned: Mutex<Vec<CommandSpec>>,
    exits: Mutex<HashMap<String, i32>>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer commands starting with `prefix` with `output`; later rules win
    pub fn respond(&self, prefix: &[&str], output: CommandOutput) -> &Self {
        self.rules.lock().unwrap().push(Rule {
            prefix: prefix.iter().map(|s| s.to_string()).collect(),
            output,
        });
        self
    }

    /// Background processes of `program` report having exited with `code`
    pub fn exit_after_spawn(&self, program: &str, code: i32) -> &Self {
        self.exits.lock().unwrap().insert(program.to_string(), code);
        self
    }

    /// Every command run to completion, in order
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    /// Every background process started, in order
    pub fn spawned(&self) -> Vec<CommandSpec> {
        self.spawned.lock().unwrap().clone()
    }

    /// Completed commands starting with `prefix`
    pub fn calls_matching(&self, prefix: &[&str]) -> Vec<CommandSpec> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    pub fn was_called(&self, prefix: &[&str]) -> bool {
        !self.calls_matching(prefix).is_empty()
    }

    fn response(&self, spec: &CommandSpec) -> CommandOutput {
        self.calls.lock().unwrap().push(spec.clone());
        let rules = self.rules.lock().unwrap();
        let output = rules
            .iter()
            .rev()
            .find(|rule| {
                let prefix: Vec<&str> = rule.prefix.iter().map(String::as_str).collect();
                spec.starts_with(&prefix)
            })
            .map(|rule| rule.output.clone())
            .unwrap_or_else(|| CommandOutput::ok(Vec::new()));
        output
    }
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn output(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        Ok(self.response(spec))
    }

    async fn run_streaming(
        &self,
        spec: &CommandSpec,
        on_line: &mut (dyn for<'l> FnMut(&'l str) + Send),
    ) -> Result<CommandOutput, CommandError> {
        let output = self.response(spec);
        for line in output.stdout_str().lines() {
            on_line(line);
        }
        Ok(output)
    }

    fn spawn(&self, spec: &CommandSpec) -> Result<Box<dyn BackgroundProcess>, CommandError> {
        self.spawned.lock().unwrap().push(spec.clone());
        let exit = self.exits.lock().unwrap().get(&spec.program).copied();
        Ok(Box::new(MockProcess { exit }))
    }
}

struct MockProcess {
    exit: Option<i32>,
}

impl BackgroundProcess for MockProcess {
    fn id(&self) -> Option<u32> {
        None
    }

    fn try_exit(&mut self) -> Result<Option<i32>, CommandError> {
        Ok(self.exit)
    }
}

/// HTTP client serving canned bodies
#[derive(Default)]
pub struct MockHttp {
    texts: Mutex<HashMap<String, VecDeque<Result<String, u16>>>>,
    downloads: Mutex<HashMap<String, Vec<u8>>>,
    requests: Mutex<Vec<String>>,
}

impl MockHttp {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` for `url`; the last queued response repeats forever
    pub fn text(&self, url: &str, body: &str) -> &Self {
        self.queue(url, Ok(body.to_string()))
    }

    /// Answer `url` with an HTTP error status
    pub fn status(&self, url: &str, status: u16) -> &Self {
        self.queue(url, Err(status))
    }

    fn queue(&self, url: &str, response: Result<String, u16>) -> &Self {
        self.texts
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(response);
        self
    }

    /// Serve `bytes` when `url` is downloaded
    pub fn file(&self, url: &str, bytes: impl Into<Vec<u8>>) -> &Self {
        self.downloads
            .lock()
            .unwrap()
            .insert(url.to_string(), bytes.into());
        self
    }

    /// URLs requested so far, in order
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpClient for MockHttp {
    async fn get_text(&self, url: &str) -> Result<String, HttpError> {
        self.requests.lock().unwrap().push(url.to_string());
        let mut texts = self.texts.lock().unwrap();
        let queue = match texts.get_mut(url) {
            Some(queue) if !queue.is_empty() => queue,
            _ => {
                return Err(HttpError::Request {
                    url: url.to_string(),
                    message: "connection refused".to_string(),
                })
            }
        };
        let response = if queue.len() > 1 {
            queue.pop_front().unwrap_or(Err(500))
        } else {
            queue[0].clone()
        };
        response.map_err(|status| HttpError::Status {
            url: url.to_string(),
            status,
        })
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<(), HttpError> {
        self.requests.lock().unwrap().push(url.to_string());
        let bytes = self.downloads.lock().unwrap().get(url).cloned();
        match bytes {
            Some(bytes) => std::fs::write(dest, bytes).map_err(|source| HttpError::Write {
                path: dest.to_path_buf(),
                source,
            }),
            None => Err(HttpError::Status {
                url: url.to_string(),
                status: 404,
            }),
        }
    }
}
