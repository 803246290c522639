use super::*;
use crate::config::EncoderConfig;
use std::process::Stdio;
use tempfile::TempDir;

fn request(url: &str, output: &str) -> EncoderRequest {
    EncoderRequest {
        source_url: url.to_string(),
        output: PathBuf::from(output),
        log_path: None,
        geometry: FrameGeometry::new(1920, 1080, 25),
    }
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}

#[test]
fn test_build_args_matches_recording_profile() {
    let launcher = FfmpegLauncher::new(EncoderConfig::default());
    let args = launcher.build_args(&request(
        "rtsp://admin:pw@cam/1",
        "recordings/2024_01_01/Gate/Gate_2024_01_01_10_00_00.mp4",
    ));

    assert_eq!(flag_value(&args, "-rtsp_transport"), Some("tcp"));
    assert_eq!(flag_value(&args, "-i"), Some("rtsp://admin:pw@cam/1"));
    assert_eq!(flag_value(&args, "-c:v"), Some("libx264"));
    assert_eq!(flag_value(&args, "-preset"), Some("ultrafast"));
    assert_eq!(flag_value(&args, "-crf"), Some("23"));
    assert_eq!(flag_value(&args, "-g"), Some("25"));
    assert_eq!(flag_value(&args, "-f"), Some("mp4"));
    assert_eq!(
        flag_value(&args, "-movflags"),
        Some("+faststart+frag_keyframe+empty_moov")
    );
    assert!(args.contains(&"-an".to_string()));
    // Reading stdin is how the quit token arrives
    assert!(!args.contains(&"-nostdin".to_string()));
    assert_eq!(
        args.last().map(String::as_str),
        Some("recordings/2024_01_01/Gate/Gate_2024_01_01_10_00_00.mp4")
    );
}

#[test]
fn test_build_args_follow_config() {
    let config = EncoderConfig {
        rtsp_transport: "udp".to_string(),
        video_codec: "libx265".to_string(),
        crf: 28,
        keyframe_interval: 50,
        container: "matroska".to_string(),
        movflags: String::new(),
        ..EncoderConfig::default()
    };
    let args = FfmpegLauncher::new(config).build_args(&request("rtsp://cam/1", "out.mkv"));

    assert_eq!(flag_value(&args, "-rtsp_transport"), Some("udp"));
    assert_eq!(flag_value(&args, "-c:v"), Some("libx265"));
    assert_eq!(flag_value(&args, "-crf"), Some("28"));
    assert_eq!(flag_value(&args, "-g"), Some("50"));
    assert_eq!(flag_value(&args, "-f"), Some("matroska"));
    assert!(!args.contains(&"-movflags".to_string()));
}

#[tokio::test]
async fn test_missing_binary_is_spawn_error() {
    let dir = TempDir::new().unwrap();
    let config = EncoderConfig {
        ffmpeg_path: "/nonexistent/ffmpeg".to_string(),
        ..EncoderConfig::default()
    };
    let mut req = request("rtsp://cam/1", "out.mp4");
    req.log_path = Some(dir.path().join("out.log"));

    let result = FfmpegLauncher::new(config).launch(&req).await;
    assert!(matches!(result, Err(EncoderError::Spawn { .. })));
    // The log file is created before the spawn attempt
    assert!(dir.path().join("out.log").exists());
}

#[cfg(unix)]
fn spawn_shell(script: &str) -> tokio::process::Child {
    tokio::process::Command::new("sh")
        .arg("-c")
        .arg(script)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .expect("sh should be available")
}

#[cfg(unix)]
#[tokio::test]
async fn test_finish_is_graceful_when_encoder_honours_quit() {
    // Exits once stdin is closed, like ffmpeg after `q`
    let child = spawn_shell("cat > /dev/null");
    let mut encoder = FfmpegEncoder::from_child(child, "graceful.mp4".to_string());

    let outcome = encoder.finish(Duration::from_secs(5)).await.unwrap();
    assert_eq!(outcome, StopOutcome::Graceful);
}

#[cfg(unix)]
#[tokio::test]
async fn test_finish_kills_hung_encoder_after_timeout() {
    let child = spawn_shell("exec sleep 30");
    let mut encoder = FfmpegEncoder::from_child(child, "hung.mp4".to_string());

    let started = std::time::Instant::now();
    let outcome = encoder.finish(Duration::from_millis(300)).await.unwrap();
    assert_eq!(outcome, StopOutcome::Killed);
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[cfg(unix)]
#[tokio::test]
async fn test_wait_exit_reports_exit_code() {
    let child = spawn_shell("exit 3");
    let mut encoder = FfmpegEncoder::from_child(child, "crashed.mp4".to_string());

    assert_eq!(encoder.wait_exit().await.unwrap(), Some(3));
    assert_eq!(
        encoder.finish(Duration::from_secs(1)).await.unwrap(),
        StopOutcome::AlreadyExited
    );
}

#[cfg(unix)]
#[tokio::test]
async fn test_quit_signal_ends_encoder_without_its_owner() {
    let child = spawn_shell("cat > /dev/null");
    let mut encoder = FfmpegEncoder::from_child(child, "detached.mp4".to_string());

    let quit = encoder.quit_signal();
    assert!(quit.send(Duration::from_secs(1)).await);
    assert!(encoder.quit_signal().is_sent());

    let code = tokio::time::timeout(Duration::from_secs(5), encoder.wait_exit())
        .await
        .expect("encoder should exit once its input is closed")
        .unwrap();
    assert_eq!(code, Some(0));
    assert_eq!(
        encoder.finish(Duration::from_secs(1)).await.unwrap(),
        StopOutcome::AlreadyExited
    );
}

#[tokio::test]
async fn test_quit_signal_sends_once() {
    let quit = QuitSignal::new(tokio::io::sink());
    let shared = quit.clone();
    assert!(!shared.is_sent());

    assert!(quit.send(Duration::from_secs(1)).await);
    assert!(shared.is_sent());
    assert!(!shared.send(Duration::from_secs(1)).await);
}

#[tokio::test]
async fn test_default_quit_signal_never_sends() {
    let quit = QuitSignal::default();
    assert!(!quit.send(Duration::from_secs(1)).await);
    assert!(!quit.is_sent());
}
