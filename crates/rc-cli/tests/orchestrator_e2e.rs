//! End-to-end provisioning runs against the mock OS layer
//!
//! Every command is recorded by `MockRunner` and every download is served by
//! `MockHttp`; files land in a temporary system root.

use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use rc_core::config::RemocolabConfig;
use rc_core::mock::{MockHttp, MockRunner};
use rc_core::traits::{CommandOutput, CommandSpec, NoopProgress};
use rc_core::{ProvisionSession, Stage, SystemLayout, TunnelKind};
use rc_tunnel::argo::CLOUDFLARED_DOWNLOAD_URL;
use rc_tunnel::ngrok::{NGROK_API_URL, NGROK_DOWNLOAD_URL};

use remocolab::orchestrator::{
    setup_sshd, setup_vnc, Environment, MountRequest, SetupRequest, StageFailure,
};
use remocolab::prompt::Prompter;

const KEY: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIHGgXXRY1E9n5gMKjNkZ7g0I+XN5f3QYjXZ5+Qo0aW1t me@laptop";
const FINGERPRINT: &str = "256 SHA256:Qm9ndXMgZmluZ2VycHJpbnQ root@vm (ECDSA)\n";

/// Answers questions from a script and records what was asked
#[derive(Default)]
struct ScriptedPrompter {
    answers: Mutex<Vec<String>>,
    questions: Mutex<Vec<String>>,
}

impl ScriptedPrompter {
    fn answering(answers: &[&str]) -> Self {
        Self {
            answers: Mutex::new(answers.iter().rev().map(|a| a.to_string()).collect()),
            questions: Mutex::new(Vec::new()),
        }
    }

    fn questions(&self) -> Vec<String> {
        self.questions.lock().unwrap().clone()
    }
}

impl Prompter for ScriptedPrompter {
    fn ask(&self, question: &str) -> io::Result<String> {
        self.questions.lock().unwrap().push(question.to_string());
        Ok(self.answers.lock().unwrap().pop().unwrap_or_default())
    }
}

struct Harness {
    dir: tempfile::TempDir,
    config: RemocolabConfig,
    layout: SystemLayout,
    runner: MockRunner,
    http: MockHttp,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = RemocolabConfig {
            system_root: dir.path().join("sys"),
            work_dir: dir.path().join("work"),
            mount_root: dir.path().join("drive"),
            ..RemocolabConfig::default()
        };
        let layout = config.layout();
        fs::create_dir_all(layout.ssh_dir()).unwrap();
        fs::write(layout.sshd_config(), "Port 22\n").unwrap();

        let runner = MockRunner::new();
        runner.respond(&["ssh-keygen", "-lvf"], CommandOutput::ok(FINGERPRINT));
        // nothing is installed yet
        runner.respond(&["dpkg-query", "-W", "-f=${db:Status-Status}\\n"], CommandOutput::failed(1, ""));

        let http = MockHttp::new();
        http.file(CLOUDFLARED_DOWNLOAD_URL, b"\x7fELF".to_vec());
        http.text("http://localhost:49589/metrics", "go_threads 12\n");
        http.text(
            "http://localhost:49589/quicktunnel",
            r#"{"hostname":"bits-lazy-trout.trycloudflare.com"}"#,
        );
        http.file(NGROK_DOWNLOAD_URL, ngrok_zip());
        http.text(
            NGROK_API_URL,
            r#"{"tunnels":[{"public_url":"tcp://0.tcp.jp.ngrok.io:17642","proto":"tcp"}]}"#,
        );

        Self {
            dir,
            config,
            layout,
            runner,
            http,
        }
    }

    fn work_dir(&self) -> PathBuf {
        self.dir.path().join("work")
    }

    fn env<'a>(&'a self, prompter: &'a dyn Prompter, work_dir: &'a std::path::Path) -> Environment<'a> {
        Environment {
            session: ProvisionSession::new(&self.runner, &self.http, &NoopProgress, &self.layout, work_dir),
            prompter,
            config: &self.config,
        }
    }

    fn apt_installs(&self) -> Vec<CommandSpec> {
        self.runner
            .calls()
            .into_iter()
            .filter(|c| c.program == "apt-get" && c.args.iter().any(|a| a == "install"))
            .collect()
    }
}

fn ngrok_zip() -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(io::Cursor::new(Vec::new()));
    writer
        .start_file("ngrok", zip::write::FileOptions::default())
        .unwrap();
    writer.write_all(b"#!/bin/sh\n").unwrap();
    writer.finish().unwrap().into_inner()
}

fn argo_request() -> SetupRequest {
    SetupRequest {
        tunnel: Some(TunnelKind::Argo),
        ..SetupRequest::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_sshd_with_public_key() {
    let h = Harness::new();
    let prompter = ScriptedPrompter::default();
    let work = h.work_dir();
    let request = SetupRequest {
        public_key: Some(KEY.to_string()),
        ..argo_request()
    };

    let outcome = setup_sshd(&h.env(&prompter, &work), &request).await.unwrap();

    assert!(outcome.success);
    let sshd_config = fs::read_to_string(h.layout.sshd_config()).unwrap();
    assert!(sshd_config.starts_with("Port 22\n"));
    assert!(sshd_config.contains("ClientAliveInterval 120\n"));
    assert!(sshd_config.contains("PasswordAuthentication no\n"));

    let authorized_keys = h.layout.home("colab").join(".ssh/authorized_keys");
    assert_eq!(fs::read_to_string(&authorized_keys).unwrap(), format!("{}\n", KEY));
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(&authorized_keys).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    assert!(!h.runner.was_called(&["chpasswd"]));
    assert!(!outcome.message.contains("password:"));
    assert!(outcome.message.contains(FINGERPRINT.trim_end()));
    assert!(outcome
        .message
        .contains("colab@bits-lazy-trout.trycloudflare.com"));
    assert!(prompter.questions().is_empty());

    let installs = h.apt_installs();
    assert_eq!(installs.len(), 1);
    assert_eq!(installs[0].args.last().map(String::as_str), Some("openssh-server"));
    assert!(h.runner.was_called(&["service", "ssh", "restart"]));
}

#[tokio::test(start_paused = true)]
async fn test_sshd_with_passwords_over_ngrok() {
    let h = Harness::new();
    let prompter = ScriptedPrompter::default();
    let work = h.work_dir();
    let request = SetupRequest {
        tunnel: Some(TunnelKind::Ngrok),
        ngrok_authtoken: Some("2abcTOKEN".to_string()),
        ngrok_region: Some("jp".to_string()),
        ..SetupRequest::default()
    };

    let outcome = setup_sshd(&h.env(&prompter, &work), &request).await.unwrap();

    assert!(outcome.success);
    let sshd_config = fs::read_to_string(h.layout.sshd_config()).unwrap();
    assert!(!sshd_config.contains("PasswordAuthentication no"));

    let chpasswd = h.runner.calls_matching(&["chpasswd"]);
    assert_eq!(chpasswd.len(), 2);
    let root_line = chpasswd[0].stdin.clone().unwrap();
    let user_line = chpasswd[1].stdin.clone().unwrap();
    let root_pw = root_line.trim_end().strip_prefix("root:").unwrap();
    let user_pw = user_line.trim_end().strip_prefix("colab:").unwrap();
    assert_eq!(root_pw.len(), 43);
    assert_ne!(root_pw, user_pw);

    assert!(outcome.message.contains(&format!("root password: {}\n", root_pw)));
    assert!(outcome.message.contains(&format!("colab password: {}\n", user_pw)));
    assert!(outcome.message.contains("-p 17642 colab@0.tcp.jp.ngrok.io"));
    assert!(outcome
        .message
        .contains("-L 5901:localhost:5901 -p 17642 colab@0.tcp.jp.ngrok.io"));
}

#[tokio::test(start_paused = true)]
async fn test_gpu_check_declined() {
    let h = Harness::new();
    let prompter = ScriptedPrompter::answering(&["n"]);
    let work = h.work_dir();
    let request = SetupRequest {
        check_gpu: true,
        ..argo_request()
    };

    let outcome = setup_sshd(&h.env(&prompter, &work), &request).await.unwrap();

    assert!(!outcome.success);
    assert!(outcome.message.contains("not a runtime with GPU"));
    assert_eq!(prompter.questions(), vec!["Do you want to continue? [y/n]"]);
    assert!(!h.runner.was_called(&["apt-get"]));
    assert!(h.runner.spawned().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_weak_gpu_accepted() {
    let h = Harness::new();
    h.runner.respond(
        &["nvidia-smi", "--query-gpu=name"],
        CommandOutput::ok("Tesla K80\n"),
    );
    let prompter = ScriptedPrompter::answering(&["y"]);
    let work = h.work_dir();
    let request = SetupRequest {
        check_gpu: true,
        public_key: Some(KEY.to_string()),
        ..argo_request()
    };

    let outcome = setup_sshd(&h.env(&prompter, &work), &request).await.unwrap();

    assert!(outcome.success);
    assert_eq!(prompter.questions().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_bad_mount_provisions_nothing() {
    let h = Harness::new();
    fs::create_dir_all(h.dir.path().join("drive")).unwrap();
    let prompter = ScriptedPrompter::default();
    let work = h.work_dir();
    let request = SetupRequest {
        mount: Some(MountRequest {
            target_name: "drive".to_string(),
            source_subdir: "../sys/etc".to_string(),
        }),
        ..argo_request()
    };

    let outcome = setup_sshd(&h.env(&prompter, &work), &request).await.unwrap();

    assert!(!outcome.success);
    assert!(outcome.message.contains("outside"));
    assert!(h.runner.calls().is_empty());
    assert!(h.http.requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_mount_installs_bindfs_and_binds() {
    let h = Harness::new();
    fs::create_dir_all(h.dir.path().join("drive/projects")).unwrap();
    let prompter = ScriptedPrompter::default();
    let work = h.work_dir();
    let request = SetupRequest {
        mount: Some(MountRequest {
            target_name: "projects".to_string(),
            source_subdir: "projects".to_string(),
        }),
        public_key: Some(KEY.to_string()),
        ..argo_request()
    };

    let outcome = setup_sshd(&h.env(&prompter, &work), &request).await.unwrap();

    assert!(outcome.success);
    let installs = h.apt_installs();
    assert!(installs[0].args.ends_with(&["openssh-server".to_string(), "bindfs".to_string()]));
    assert!(h.runner.was_called(&["bindfs", "-u", "colab", "-g", "colab"]));
    assert!(h.layout.home("colab").join("projects").is_dir());
}

#[tokio::test(start_paused = true)]
async fn test_invalid_prompted_region_is_declined() {
    let h = Harness::new();
    let prompter = ScriptedPrompter::answering(&["2abcTOKEN", "mars"]);
    let work = h.work_dir();
    let request = SetupRequest {
        tunnel: Some(TunnelKind::Ngrok),
        ..SetupRequest::default()
    };

    let outcome = setup_sshd(&h.env(&prompter, &work), &request).await.unwrap();

    assert!(!outcome.success);
    assert!(outcome.message.contains("Unknown ngrok region 'mars'"));
    let questions = prompter.questions();
    assert_eq!(questions.len(), 2);
    assert!(questions[0].contains("authtoken"));
    assert!(questions[1].contains("jp - Japan (Tokyo)"));
    assert!(h.runner.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_host_failure_stops_the_run() {
    let h = Harness::new();
    h.runner
        .respond(&["useradd"], CommandOutput::failed(9, "useradd: user 'colab' already exists"));
    let prompter = ScriptedPrompter::default();
    let work = h.work_dir();

    let failure: StageFailure = setup_sshd(&h.env(&prompter, &work), &argo_request())
        .await
        .unwrap_err();

    assert_eq!(failure.stage, Stage::HostIdentity);
    assert!(failure.to_string().contains("already exists"));
    assert!(h.runner.spawned().is_empty());
    assert!(!h.runner.was_called(&["service"]));
}

#[tokio::test(start_paused = true)]
async fn test_vnc_without_gpu() {
    let h = Harness::new();
    let desktop = &h.config.desktop;
    h.http.file(&desktop.libjpeg_turbo_url(), b"deb".to_vec());
    h.http.file(&desktop.virtualgl_url(), b"deb".to_vec());
    h.http.file(&desktop.turbovnc_url(), b"deb".to_vec());
    h.runner.respond(
        &["/opt/TurboVNC/bin/vncpasswd", "-f"],
        CommandOutput::ok(vec![1, 2, 3, 4, 5, 6, 7, 8]),
    );
    let prompter = ScriptedPrompter::default();
    let work = h.work_dir();
    let request = SetupRequest {
        public_key: Some(KEY.to_string()),
        ..argo_request()
    };

    let outcome = setup_vnc(&h.env(&prompter, &work), &request).await.unwrap();

    assert!(outcome.success);
    assert!(outcome.message.contains("VNC password: "));
    assert!(outcome.message.contains("VNC view only password: "));
    assert_eq!(
        fs::read(h.layout.home("colab").join(".vnc/passwd")).unwrap(),
        vec![1, 2, 3, 4, 5, 6, 7, 8]
    );
    assert!(!h.runner.was_called(&["nvidia-xconfig"]));

    // cloudflared only; no Xorg without a GPU
    let spawned = h.runner.spawned();
    assert_eq!(spawned.len(), 1);
    assert!(spawned[0].program.ends_with("cloudflared"));
}
