//! ngrok TCP tunnel
//!
//! The v2 client is downloaded as a zip, authenticated once per VM and
//! started as `ngrok tcp 22`. Its local web API reports the public address.

use serde::Deserialize;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use rc_core::config::NgrokConfig;
use rc_core::readiness::poll_until;
use rc_core::session::set_mode;
use rc_core::traits::{CommandSpec, HttpClient};
use rc_core::{CommandError, ProvisionSession, TunnelDescriptor, TunnelKind, SSH_COMMON_OPTIONS};

use crate::error::TunnelError;
use crate::NgrokAuth;

pub const NGROK_DOWNLOAD_URL: &str =
    "https://bin.equinox.io/c/4VmDzA7iaHb/ngrok-stable-linux-amd64.zip";

/// The client's local web API
pub const NGROK_API_URL: &str = "http://localhost:4040/api/tunnels";

/// Regions accepted by `ngrok tcp -region`
pub const NGROK_REGIONS: &[(&str, &str)] = &[
    ("us", "United States (Ohio)"),
    ("eu", "Europe (Frankfurt)"),
    ("ap", "Asia/Pacific (Singapore)"),
    ("au", "Australia (Sydney)"),
    ("sa", "South America (Sao Paulo)"),
    ("jp", "Japan (Tokyo)"),
    ("in", "India (Mumbai)"),
];

/// Response of `GET /api/tunnels`
#[derive(Debug, Deserialize)]
struct TunnelList {
    tunnels: Vec<ApiTunnel>,
}

#[derive(Debug, Deserialize)]
struct ApiTunnel {
    public_url: String,
    #[serde(default)]
    proto: String,
}

pub fn validate_region(region: &str) -> Result<(), TunnelError> {
    if NGROK_REGIONS.iter().any(|(code, _)| *code == region) {
        Ok(())
    } else {
        let codes: Vec<&str> = NGROK_REGIONS.iter().map(|(code, _)| *code).collect();
        Err(TunnelError::InvalidRegion(
            region.to_string(),
            codes.join(", "),
        ))
    }
}

/// Split `tcp://host:port` into its host and port
pub fn parse_public_url(url: &str) -> Result<(String, u16), TunnelError> {
    let invalid = || TunnelError::InvalidPublicUrl(url.to_string());

    let address = url.strip_prefix("tcp://").ok_or_else(invalid)?;
    let (host, port) = address.rsplit_once(':').ok_or_else(invalid)?;
    if host.is_empty() {
        return Err(invalid());
    }
    let port = port.parse::<u16>().map_err(|_| invalid())?;
    Ok((host.to_string(), port))
}

/// First TCP public URL in an `/api/tunnels` body.
///
/// The API answers with an empty list until the tunnel is registered.
pub fn first_tcp_url(body: &str) -> Option<String> {
    let list: TunnelList = match serde_json::from_str(body) {
        Ok(list) => list,
        Err(e) => {
            tracing::debug!("Unexpected ngrok API response: {}", e);
            return None;
        }
    };
    list.tunnels
        .into_iter()
        .find(|t| t.proto == "tcp" || t.public_url.starts_with("tcp://"))
        .map(|t| t.public_url)
}

/// Unpack the `ngrok` binary from the downloaded archive into `dest_dir`
pub fn extract_ngrok(archive: &Path, dest_dir: &Path) -> Result<PathBuf, TunnelError> {
    let io_error = |path: &Path| {
        let path = path.to_path_buf();
        move |source| TunnelError::Io { path, source }
    };
    let archive_error = |source| TunnelError::Archive {
        path: archive.to_path_buf(),
        source,
    };

    let file = File::open(archive).map_err(io_error(archive))?;
    let mut zip = zip::ZipArchive::new(file).map_err(archive_error)?;
    let mut entry = zip.by_name("ngrok").map_err(archive_error)?;

    fs::create_dir_all(dest_dir).map_err(io_error(dest_dir))?;
    let binary = dest_dir.join("ngrok");
    let mut out = File::create(&binary).map_err(io_error(&binary))?;
    io::copy(&mut entry, &mut out).map_err(io_error(&binary))?;
    set_mode(&binary, 0o755).map_err(io_error(&binary))?;

    Ok(binary)
}

/// Save the auth token unless this VM already has an ngrok config
async fn configure_authtoken(
    session: &ProvisionSession<'_>,
    binary: &str,
    authtoken: &str,
) -> Result<(), TunnelError> {
    let config = session.layout.ngrok_config();
    if config.exists() {
        tracing::info!("Using existing ngrok config {:?}", config);
        return Ok(());
    }

    session
        .runner
        .run(
            &CommandSpec::new(binary)
                .arg("authtoken")
                .secret_arg(authtoken)
                .arg("--config")
                .path_arg(&config),
        )
        .await?;
    Ok(())
}

/// One look at the local API; fails if the client has already exited
async fn probe_api(
    http: &dyn HttpClient,
    exited: Result<Option<i32>, CommandError>,
    log: &Path,
) -> Result<Option<String>, TunnelError> {
    if let Some(code) = exited? {
        return Err(TunnelError::ClientExited {
            client: "ngrok",
            code,
            log: log.to_path_buf(),
        });
    }

    match http.get_text(NGROK_API_URL).await {
        Ok(body) => Ok(first_tcp_url(&body)),
        Err(e) => {
            tracing::trace!("ngrok API not up yet: {}", e);
            Ok(None)
        }
    }
}

/// Download, authenticate and start ngrok, then read the tunnel's address
pub async fn start(
    session: &ProvisionSession<'_>,
    auth: &NgrokAuth,
    config: &NgrokConfig,
) -> Result<TunnelDescriptor, TunnelError> {
    validate_region(&auth.region)?;
    if auth.authtoken.trim().is_empty() {
        return Err(TunnelError::MissingAuthToken);
    }

    tracing::info!("Downloading ngrok");
    let archive = session.download(NGROK_DOWNLOAD_URL, "ngrok.zip").await?;
    let binary = extract_ngrok(&archive, session.work_dir)?;
    let binary = binary.to_string_lossy().into_owned();

    configure_authtoken(session, &binary, auth.authtoken.trim()).await?;

    let log = session.work_path("ngrok.log");
    let spec = CommandSpec::new(binary.as_str())
        .args(["tcp", "--config"])
        .path_arg(session.layout.ngrok_config())
        .args(["-region", auth.region.as_str(), "22"])
        .log_file(&log);
    let mut process = session.runner.spawn(&spec)?;

    let url = poll_until(&config.warmup, || {
        let exited = process.try_exit();
        probe_api(session.http, exited, &log)
    })
    .await?
    .ok_or(TunnelError::NotReady {
        client: "ngrok",
        waited: config.warmup.timeout,
    })?;

    let (hostname, port) = parse_public_url(&url)?;
    Ok(TunnelDescriptor {
        kind: TunnelKind::Ngrok,
        hostname,
        port: Some(port),
        ssh_options: SSH_COMMON_OPTIONS.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rc_core::mock::{MockHttp, MockRunner};
    use rc_core::traits::{CommandOutput, NoopProgress};
    use rc_core::SystemLayout;
    use std::io::Write;

    const API_BODY: &str = r#"{"tunnels":[{"name":"command_line","public_url":"tcp://0.tcp.jp.ngrok.io:17642","proto":"tcp","config":{"addr":"localhost:22"}}],"uri":"/api/tunnels"}"#;

    fn ngrok_zip() -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(io::Cursor::new(Vec::new()));
        writer
            .start_file("ngrok", zip::write::FileOptions::default())
            .unwrap();
        writer.write_all(b"#!/bin/sh\n").unwrap();
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_parse_public_url() {
        assert_eq!(
            parse_public_url("tcp://host123:4567").unwrap(),
            ("host123".to_string(), 4567)
        );
        assert!(parse_public_url("https://host123:4567").is_err());
        assert!(parse_public_url("tcp://host123").is_err());
        assert!(parse_public_url("tcp://:4567").is_err());
        assert!(parse_public_url("tcp://host:99999").is_err());
    }

    #[test]
    fn test_validate_region() {
        assert!(validate_region("jp").is_ok());
        assert!(validate_region("in").is_ok());

        let err = validate_region("mars").unwrap_err();
        assert!(err.to_string().contains("us, eu, ap, au, sa, jp, in"));
    }

    #[test]
    fn test_first_tcp_url() {
        assert_eq!(
            first_tcp_url(API_BODY).as_deref(),
            Some("tcp://0.tcp.jp.ngrok.io:17642")
        );
        assert_eq!(first_tcp_url(r#"{"tunnels":[]}"#), None);
        assert_eq!(first_tcp_url("<html>"), None);
    }

    #[test]
    fn test_extract_ngrok() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("ngrok.zip");
        fs::write(&archive, ngrok_zip()).unwrap();

        let binary = extract_ngrok(&archive, &dir.path().join("bin")).unwrap();

        assert_eq!(fs::read(&binary).unwrap(), b"#!/bin/sh\n");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&binary).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }

    #[test]
    fn test_extract_rejects_archive_without_binary() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("ngrok.zip");
        let mut writer = zip::ZipWriter::new(File::create(&archive).unwrap());
        writer
            .start_file("README", zip::write::FileOptions::default())
            .unwrap();
        writer.finish().unwrap();

        let result = extract_ngrok(&archive, dir.path());

        assert!(matches!(result, Err(TunnelError::Archive { .. })));
    }

    struct Fixture {
        dir: tempfile::TempDir,
        layout: SystemLayout,
        runner: MockRunner,
        http: MockHttp,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let layout = SystemLayout::new(dir.path().join("sys"));
            let http = MockHttp::new();
            http.file(NGROK_DOWNLOAD_URL, ngrok_zip());
            Self {
                dir,
                layout,
                runner: MockRunner::new(),
                http,
            }
        }

        fn work_dir(&self) -> PathBuf {
            self.dir.path().join("work")
        }

        fn binary(&self) -> String {
            self.work_dir().join("ngrok").to_string_lossy().into_owned()
        }

        async fn start(&self) -> Result<TunnelDescriptor, TunnelError> {
            let work = self.work_dir();
            let session =
                ProvisionSession::new(&self.runner, &self.http, &NoopProgress, &self.layout, &work);
            let auth = NgrokAuth {
                authtoken: "2abc".to_string(),
                region: "jp".to_string(),
            };
            start(&session, &auth, &NgrokConfig::default()).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_reads_public_address() {
        let fx = Fixture::new();
        fx.http.text(NGROK_API_URL, r#"{"tunnels":[]}"#);
        fx.http.text(NGROK_API_URL, API_BODY);

        let tunnel = fx.start().await.unwrap();

        assert_eq!(tunnel.hostname, "0.tcp.jp.ngrok.io");
        assert_eq!(tunnel.port, Some(17642));
        assert_eq!(
            tunnel.ssh_command("colab", ""),
            "ssh -o UserKnownHostsFile=/dev/null -o VisualHostKey=yes -p 17642 colab@0.tcp.jp.ngrok.io"
        );

        let binary = fx.binary();
        assert!(fx.runner.was_called(&[binary.as_str(), "authtoken", "2abc"]));
        let spawned = fx.runner.spawned();
        assert_eq!(spawned.len(), 1);
        assert!(spawned[0].starts_with(&[binary.as_str(), "tcp"]));
        assert!(spawned[0].args.ends_with(&[
            "-region".to_string(),
            "jp".to_string(),
            "22".to_string()
        ]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_keeps_existing_authtoken() {
        let fx = Fixture::new();
        let config = fx.layout.ngrok_config();
        fs::create_dir_all(config.parent().unwrap()).unwrap();
        fs::write(&config, "authtoken: old\n").unwrap();
        fx.http.text(NGROK_API_URL, API_BODY);

        fx.start().await.unwrap();

        assert!(!fx.runner.was_called(&[fx.binary().as_str(), "authtoken"]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_authtoken_is_not_echoed() {
        let fx = Fixture::new();
        fx.runner.respond(
            &[fx.binary().as_str(), "authtoken"],
            CommandOutput::failed(1, "ERROR: invalid authtoken"),
        );

        let err = fx.start().await.unwrap_err();

        let message = err.to_string();
        assert!(message.contains("invalid authtoken"));
        assert!(!message.contains("2abc"));
        assert!(fx.runner.spawned().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_fails_when_client_exits() {
        let fx = Fixture::new();
        fx.runner.exit_after_spawn(&fx.binary(), 1);

        let result = fx.start().await;

        assert!(matches!(
            result,
            Err(TunnelError::ClientExited {
                client: "ngrok",
                code: 1,
                ..
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_times_out_without_api() {
        let fx = Fixture::new();

        let result = fx.start().await;

        assert!(matches!(result, Err(TunnelError::NotReady { client: "ngrok", .. })));
        assert!(fx.http.requests().iter().filter(|u| *u == NGROK_API_URL).count() > 1);
    }

    #[tokio::test]
    async fn test_invalid_region_downloads_nothing() {
        let fx = Fixture::new();
        let work = fx.work_dir();
        let session = ProvisionSession::new(&fx.runner, &fx.http, &NoopProgress, &fx.layout, &work);
        let auth = NgrokAuth {
            authtoken: "2abc".to_string(),
            region: "mars".to_string(),
        };

        let result = start(&session, &auth, &NgrokConfig::default()).await;

        assert!(matches!(result, Err(TunnelError::InvalidRegion(..))));
        assert!(fx.http.requests().is_empty());
    }
}
