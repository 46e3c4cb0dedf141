use async_trait::async_trait;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, Command};
use tracing::{debug, warn};

use super::engine::{EngineError, MediaEngine, MediaInfo, ProgressCallback, ProgressEvent};
use super::format::Capabilities;
use super::options::{CookieArgs, InvocationDescriptor};

const PROGRESS_TEMPLATE: &str = "download:mediaq-progress %(progress.status)s \
%(progress.downloaded_bytes)s %(progress.total_bytes)s \
%(progress.total_bytes_estimate)s %(progress.speed)s";

#[cfg(windows)]
const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;

static PROGRESS_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"mediaq-progress (\w+) (\S+) (\S+) (\S+) (\S+)").expect("valid progress regex")
});

/// [`MediaEngine`] backed by the `yt-dlp` executable.
pub struct YtDlpEngine {
    binary: PathBuf,
}

impl YtDlpEngine {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn from_capabilities(capabilities: &Capabilities) -> Result<Self, EngineError> {
        capabilities
            .engine
            .as_ref()
            .map(|path| Self::new(path.clone()))
            .ok_or_else(|| {
                EngineError::Unavailable(
                    "yt-dlp was not found on PATH; install it or set general.ytdlp_path".into(),
                )
            })
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    fn command(&self, descriptor: &InvocationDescriptor) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(descriptor_args(descriptor))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Keep terminal Ctrl-C away from the child; only a cooperative
        // pause or cancel may stop it.
        #[cfg(unix)]
        cmd.process_group(0);
        #[cfg(windows)]
        cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);

        cmd
    }
}

#[async_trait]
impl MediaEngine for YtDlpEngine {
    async fn resolve_metadata(
        &self,
        url: &str,
        descriptor: &InvocationDescriptor,
    ) -> Result<MediaInfo, EngineError> {
        let output = self
            .command(descriptor)
            .args(["--dump-single-json", "--no-warnings", "--"])
            .arg(url)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::Failed(
                last_error_line(&stderr)
                    .unwrap_or_else(|| format!("yt-dlp exited with {}", output.status)),
            ));
        }

        parse_metadata(&output.stdout, url)
    }

    async fn transfer(
        &self,
        url: &str,
        descriptor: &InvocationDescriptor,
        on_progress: &mut ProgressCallback<'_>,
    ) -> Result<(), EngineError> {
        if !descriptor.is_transfer() {
            return Err(EngineError::Failed(
                "descriptor carries no transfer options".into(),
            ));
        }

        let mut child = self
            .command(descriptor)
            .args(["--newline", "--continue", "--no-colors"])
            .args(["--progress-template", PROGRESS_TEMPLATE])
            .arg("--")
            .arg(url)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Failed("yt-dlp stdout unavailable".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| EngineError::Failed("yt-dlp stderr unavailable".into()))?;
        let stderr_task = tokio::spawn(forward_stderr(stderr));

        let mut stdout = BufReader::new(stdout);
        let mut buf = Vec::new();
        while let Some(line) = read_lossy_line(&mut stdout, &mut buf).await? {
            let Some(event) = parse_progress_line(&line) else {
                debug!("yt-dlp: {}", line);
                continue;
            };

            if let Err(interrupt) = on_progress(&event) {
                // Killing leaves the .part file in place for --continue.
                debug!("Stopping yt-dlp for {}: {}", url, interrupt);
                let _ = child.start_kill();
                let _ = child.wait().await;
                stderr_task.abort();
                return Err(interrupt.into());
            }
        }

        let status = child.wait().await?;
        let last_error = stderr_task.await.unwrap_or(None);

        if status.success() {
            Ok(())
        } else {
            Err(EngineError::Failed(
                last_error.unwrap_or_else(|| format!("yt-dlp exited with {}", status)),
            ))
        }
    }
}

/// Translate a descriptor into yt-dlp command-line options.
pub fn descriptor_args(descriptor: &InvocationDescriptor) -> Vec<String> {
    let mut args = vec![
        "--socket-timeout".to_string(),
        descriptor.socket_timeout.to_string(),
    ];

    if let Some(address) = &descriptor.source_address {
        args.push("--source-address".to_string());
        args.push(address.clone());
    }

    if let Some(proxy) = &descriptor.proxy {
        args.push("--proxy".to_string());
        args.push(proxy.clone());
    }

    match &descriptor.cookies {
        Some(CookieArgs::File(path)) => {
            args.push("--cookies".to_string());
            args.push(path.to_string_lossy().into_owned());
        }
        Some(CookieArgs::Browser { browser, profile }) => {
            args.push("--cookies-from-browser".to_string());
            args.push(match profile {
                Some(profile) => format!("{}:{}", browser, profile),
                None => browser.clone(),
            });
        }
        None => {}
    }

    if descriptor.no_playlist {
        args.push("--no-playlist".to_string());
    }

    if let Some(transfer) = &descriptor.transfer {
        args.push("--format".to_string());
        args.push(transfer.format.as_str().to_string());
        args.push("--output".to_string());
        args.push(transfer.output_template.to_string_lossy().into_owned());
        args.push("--merge-output-format".to_string());
        args.push(transfer.merge_output_format.clone());
    }

    args
}

/// Parse one line printed through [`PROGRESS_TEMPLATE`].
pub fn parse_progress_line(line: &str) -> Option<ProgressEvent> {
    let caps = PROGRESS_LINE.captures(line)?;

    match &caps[1] {
        "finished" => Some(ProgressEvent::Finished),
        "downloading" => {
            let downloaded = number(&caps[2]).unwrap_or(0.0);
            let total = number(&caps[3])
                .or_else(|| number(&caps[4]))
                .filter(|total| *total > 0.0);
            Some(ProgressEvent::Downloading {
                downloaded_bytes: downloaded as u64,
                total_bytes: total.map(|t| t as u64),
                speed: number(&caps[5]),
            })
        }
        _ => None,
    }
}

/// yt-dlp prints `NA` (or `None`) for missing fields.
fn number(field: &str) -> Option<f64> {
    field.parse::<f64>().ok().filter(|n| n.is_finite() && *n >= 0.0)
}

pub fn parse_metadata(json: &[u8], url: &str) -> Result<MediaInfo, EngineError> {
    let mut info: MediaInfo = serde_json::from_slice(json)?;
    info.original_url = url.to_string();
    Ok(info)
}

fn last_error_line(stderr: &str) -> Option<String> {
    stderr
        .lines()
        .filter_map(|line| line.strip_prefix("ERROR:"))
        .map(|msg| msg.trim().to_string())
        .last()
}

/// Next line without its terminator. yt-dlp writes in the locale's
/// encoding, so invalid UTF-8 is replaced rather than rejected.
async fn read_lossy_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    if reader.read_until(b'\n', buf).await? == 0 {
        return Ok(None);
    }

    let line = String::from_utf8_lossy(buf);
    Ok(Some(line.trim_end_matches(['\n', '\r']).to_string()))
}

async fn forward_stderr(stderr: ChildStderr) -> Option<String> {
    let mut last_error = None;
    let mut stderr = BufReader::new(stderr);
    let mut buf = Vec::new();

    while let Ok(Some(line)) = read_lossy_line(&mut stderr, &mut buf).await {
        if let Some(msg) = line.strip_prefix("ERROR:") {
            warn!("yt-dlp: {}", line);
            last_error = Some(msg.trim().to_string());
        } else if line.starts_with("WARNING:") {
            warn!("yt-dlp: {}", line);
        } else {
            debug!("yt-dlp: {}", line);
        }
    }

    last_error
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::format::BEST_AVAILABLE;
    use crate::download::options::TransferArgs;

    fn descriptor() -> InvocationDescriptor {
        InvocationDescriptor {
            socket_timeout: 60,
            source_address: None,
            proxy: None,
            cookies: None,
            no_playlist: true,
            transfer: None,
        }
    }

    #[test]
    fn parses_downloading_line() {
        let event = parse_progress_line("mediaq-progress downloading 50 200 NA 1048576.5");
        assert_eq!(
            event,
            Some(ProgressEvent::Downloading {
                downloaded_bytes: 50,
                total_bytes: Some(200),
                speed: Some(1048576.5),
            })
        );
    }

    #[test]
    fn falls_back_to_total_estimate() {
        let event = parse_progress_line("mediaq-progress downloading 1024 NA 4096.0 NA");
        assert_eq!(
            event,
            Some(ProgressEvent::Downloading {
                downloaded_bytes: 1024,
                total_bytes: Some(4096),
                speed: None,
            })
        );
    }

    #[test]
    fn unknown_total_stays_absent() {
        let event = parse_progress_line("mediaq-progress downloading 1024 NA NA 10");
        assert!(matches!(
            event,
            Some(ProgressEvent::Downloading { total_bytes: None, .. })
        ));
    }

    #[test]
    fn parses_finished_and_ignores_noise() {
        assert_eq!(
            parse_progress_line("mediaq-progress finished 200 200 NA NA"),
            Some(ProgressEvent::Finished)
        );
        assert_eq!(parse_progress_line("[download] Destination: a.mp4"), None);
        assert_eq!(parse_progress_line("mediaq-progress error NA NA NA NA"), None);
    }

    #[test]
    fn metadata_args_skip_transfer_fields() {
        let args = descriptor_args(&descriptor());
        assert_eq!(args, vec!["--socket-timeout", "60", "--no-playlist"]);
    }

    #[test]
    fn full_transfer_args() {
        let descriptor = InvocationDescriptor {
            socket_timeout: 15,
            source_address: Some("0.0.0.0".into()),
            proxy: Some("http://127.0.0.1:8080".into()),
            cookies: Some(CookieArgs::Browser {
                browser: "firefox".into(),
                profile: Some("work".into()),
            }),
            no_playlist: true,
            transfer: Some(TransferArgs {
                format: BEST_AVAILABLE.selector(),
                output_template: PathBuf::from("/dl/%(title)s.%(ext)s"),
                merge_output_format: "mp4".into(),
            }),
        };

        let args = descriptor_args(&descriptor);
        let joined = args.join(" ");
        assert!(joined.contains("--socket-timeout 15"));
        assert!(joined.contains("--source-address 0.0.0.0"));
        assert!(joined.contains("--proxy http://127.0.0.1:8080"));
        assert!(joined.contains("--cookies-from-browser firefox:work"));
        assert!(joined.contains("--format bestvideo*+bestaudio/best"));
        assert!(joined.contains("--output /dl/%(title)s.%(ext)s"));
        assert!(joined.ends_with("--merge-output-format mp4"));
    }

    #[test]
    fn cookie_file_arg() {
        let mut descriptor = descriptor();
        descriptor.cookies = Some(CookieArgs::File(PathBuf::from("/tmp/cookies.txt")));
        let args = descriptor_args(&descriptor);
        assert!(args.windows(2).any(|w| w == ["--cookies", "/tmp/cookies.txt"]));
    }

    #[test]
    fn metadata_json_is_parsed() {
        let json = br#"{
            "title": "A Talk",
            "uploader": "Someone",
            "thumbnail": "https://i.example/t.jpg",
            "duration": 61.5,
            "webpage_url": "https://example.com/watch?v=1",
            "formats": [
                {"format_id": "140", "ext": "m4a", "height": null, "filesize": 1000, "format_note": "medium"},
                {"format_id": "137", "ext": "mp4", "height": 1080}
            ]
        }"#;

        let info = parse_metadata(json, "https://example.com/watch?v=1").unwrap();
        assert_eq!(info.title, "A Talk");
        assert_eq!(info.uploader.as_deref(), Some("Someone"));
        assert_eq!(info.original_url, "https://example.com/watch?v=1");
        assert_eq!(info.formats.len(), 2);
        assert_eq!(info.formats[0].note.as_deref(), Some("medium"));
        assert_eq!(info.formats[1].height, Some(1080));
    }

    #[test]
    fn metadata_tolerates_null_fields() {
        let json = br#"{"title": null, "uploader": null, "formats": null}"#;

        let info = parse_metadata(json, "https://example.com/v").unwrap();
        assert_eq!(info.title, "");
        assert_eq!(info.display_title(), "Unknown");
        assert!(info.formats.is_empty());
        assert_eq!(info.original_url, "https://example.com/v");
    }

    #[test]
    fn metadata_rejects_garbage() {
        assert!(matches!(
            parse_metadata(b"not json", "u"),
            Err(EngineError::Metadata(_))
        ));
    }

    #[test]
    fn last_error_line_wins() {
        let stderr = "WARNING: slow\nERROR: first\nsomething\nERROR: [youtube] abc: Video unavailable\n";
        assert_eq!(
            last_error_line(stderr).as_deref(),
            Some("[youtube] abc: Video unavailable")
        );
        assert_eq!(last_error_line("WARNING: only"), None);
    }

    #[test]
    fn missing_engine_is_reported() {
        let err = YtDlpEngine::from_capabilities(&Capabilities::default()).err();
        assert!(matches!(err, Some(EngineError::Unavailable(_))));
    }

    #[cfg(unix)]
    mod transfers {
        use super::*;
        use crate::download::InterruptReason;
        use crate::download::engine::Interrupt;
        use std::os::unix::fs::PermissionsExt;
        use std::time::{Duration, Instant};
        use tempfile::TempDir;

        /// Install `body` as an executable stand-in for yt-dlp.
        fn fake_ytdlp(dir: &TempDir, body: &str) -> YtDlpEngine {
            let path = dir.path().join("yt-dlp");
            std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            YtDlpEngine::new(path)
        }

        fn transfer_descriptor() -> InvocationDescriptor {
            InvocationDescriptor {
                transfer: Some(TransferArgs {
                    format: BEST_AVAILABLE.selector(),
                    output_template: PathBuf::from("/dev/null"),
                    merge_output_format: "mp4".into(),
                }),
                ..descriptor()
            }
        }

        async fn run(
            engine: &YtDlpEngine,
            stop_at: Option<usize>,
        ) -> (Result<(), EngineError>, Vec<ProgressEvent>) {
            let mut events = Vec::new();
            let mut on_progress = |event: &ProgressEvent| -> Result<(), Interrupt> {
                events.push(event.clone());
                if Some(events.len()) == stop_at {
                    return Err(Interrupt {
                        reason: InterruptReason::Pause,
                    });
                }
                Ok(())
            };
            let result = engine
                .transfer("https://example.com/v", &transfer_descriptor(), &mut on_progress)
                .await;
            (result, events)
        }

        #[tokio::test]
        async fn clean_exit_is_success() {
            let dir = TempDir::new().unwrap();
            let engine = fake_ytdlp(
                &dir,
                "echo 'mediaq-progress downloading 50 200 NA 10'\n\
                 echo 'mediaq-progress finished 200 200 NA NA'\n\
                 exit 0",
            );

            let (result, events) = run(&engine, None).await;
            assert!(result.is_ok());
            assert_eq!(events.len(), 2);
            assert_eq!(events[1], ProgressEvent::Finished);
        }

        #[tokio::test]
        async fn non_utf8_output_does_not_fail_the_transfer() {
            let dir = TempDir::new().unwrap();
            let engine = fake_ytdlp(
                &dir,
                "printf '[download] Destination: caf\\351.mp4\\n'\n\
                 printf 'WARNING: caf\\351\\n' >&2\n\
                 echo 'mediaq-progress downloading 50 200 NA 10'\n\
                 echo 'WARNING: still writing' >&2\n\
                 echo 'mediaq-progress finished 200 200 NA NA'\n\
                 exit 0",
            );

            let (result, events) = run(&engine, None).await;
            assert!(result.is_ok(), "{:?}", result);
            assert_eq!(
                events[0],
                ProgressEvent::Downloading {
                    downloaded_bytes: 50,
                    total_bytes: Some(200),
                    speed: Some(10.0),
                }
            );
            assert_eq!(events.len(), 2);
        }

        #[tokio::test]
        async fn failure_reports_last_error_line() {
            let dir = TempDir::new().unwrap();
            let engine = fake_ytdlp(
                &dir,
                "printf 'junk \\377\\n' >&2\n\
                 echo 'ERROR: first' >&2\n\
                 echo 'ERROR: x' >&2\n\
                 exit 1",
            );

            let (result, events) = run(&engine, None).await;
            assert!(events.is_empty());
            match result {
                Err(EngineError::Failed(message)) => assert_eq!(message, "x"),
                other => panic!("expected failure, got {:?}", other),
            }
        }

        #[tokio::test]
        async fn interrupt_kills_the_child_promptly() {
            let dir = TempDir::new().unwrap();
            let engine = fake_ytdlp(
                &dir,
                "i=0\n\
                 while [ $i -lt 5 ]; do\n\
                 echo \"mediaq-progress downloading $i 100 NA NA\"\n\
                 i=$((i + 1))\n\
                 sleep 0.05\n\
                 done\n\
                 sleep 30",
            );

            let started = Instant::now();
            let (result, events) = run(&engine, Some(3)).await;

            assert!(matches!(
                result,
                Err(EngineError::Interrupted(InterruptReason::Pause))
            ));
            assert_eq!(events.len(), 3);
            assert!(started.elapsed() < Duration::from_secs(10));
        }

        #[cfg(target_os = "linux")]
        #[tokio::test]
        async fn child_runs_in_its_own_process_group() {
            let dir = TempDir::new().unwrap();
            // Field 5 of /proc/<pid>/stat is the process group id.
            let engine = fake_ytdlp(
                &dir,
                "pgrp=$(cut -d' ' -f5 /proc/$$/stat)\n\
                 if [ \"$pgrp\" = \"$$\" ]; then exit 0; fi\n\
                 echo \"ERROR: shares process group $pgrp\" >&2\n\
                 exit 1",
            );

            let (result, _) = run(&engine, None).await;
            assert!(result.is_ok(), "{:?}", result);
        }
    }
}
