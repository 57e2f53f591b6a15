//! Deprecated hook support: executables whose stdout is parsed like a
//! feature file.
//!
//! A hook is run without arguments.  It must exit with status 0 within
//! [`HOOK_TIMEOUT`] for its output to be accepted; its stderr is forwarded to
//! the log line by line.  A hook still running at the deadline is killed and
//! skipped.

use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use nodelabel_types::DiscoveryError;
use tracing::{debug, error, info, warn};

use super::files::list_dir;
use super::parser::{ParsedFeatures, parse_features};

/// Upper bound on the run time of one hook.
pub const HOOK_TIMEOUT: Duration = Duration::from_secs(10);

const POLL_INTERVAL: Duration = Duration::from_millis(10);

// lets the reader threads finish after a hook exits close to its deadline
const OUTPUT_GRACE: Duration = Duration::from_millis(100);

/// Run every hook in `dir`, in file-name order, and merge their output.
pub fn run_hooks(dir: &Path, now: DateTime<Utc>) -> ParsedFeatures {
    run_hooks_within(dir, now, HOOK_TIMEOUT)
}

/// [`run_hooks`] with an explicit per-hook time limit.
pub fn run_hooks_within(dir: &Path, now: DateTime<Utc>, timeout: Duration) -> ParsedFeatures {
    let mut parsed = ParsedFeatures::default();
    let hooks = match list_dir(dir) {
        Ok(hooks) => hooks,
        Err(e) => {
            debug!(dir = %dir.display(), error = %e, "hook directory not readable");
            return parsed;
        }
    };
    if !hooks.is_empty() {
        warn!(dir = %dir.display(), "hooks are deprecated, use feature files instead");
    }

    for path in hooks {
        let origin = path.display().to_string();
        match run_hook(&path, timeout) {
            Ok(stdout) => parsed.absorb(parse_features(stdout.lines(), &origin, now), &origin),
            Err(e) => error!(hook = %origin, error = %e, "skipping hook"),
        }
    }
    parsed
}

fn run_hook(path: &Path, timeout: Duration) -> Result<String, DiscoveryError> {
    let origin = path.display().to_string();
    let mut child = Command::new(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| DiscoveryError::source(super::NAME, format!("failed to run {origin}: {e}")))?;

    // drained on their own threads so a chatty hook cannot fill a pipe
    let stdout = collect(child.stdout.take());
    let stderr = collect(child.stderr.take());

    let deadline = Instant::now() + timeout;
    let status = wait_until(&mut child, deadline).map_err(|e| {
        DiscoveryError::source(super::NAME, format!("{origin}: {e}"))
    })?;

    // a background grandchild may keep the pipes open past the deadline
    let remaining = deadline.saturating_duration_since(Instant::now()).max(OUTPUT_GRACE);
    let stderr = stderr.recv_timeout(remaining).unwrap_or_default();
    for line in String::from_utf8_lossy(&stderr).lines() {
        info!(hook = %origin, "{line}");
    }

    if !status.success() {
        return Err(DiscoveryError::source(
            super::NAME,
            format!("{origin} exited with {status}"),
        ));
    }
    let remaining = deadline.saturating_duration_since(Instant::now()).max(OUTPUT_GRACE);
    let stdout = stdout.recv_timeout(remaining).map_err(|_| {
        DiscoveryError::source(super::NAME, format!("{origin} kept its output open past the deadline"))
    })?;
    Ok(String::from_utf8_lossy(&stdout).into_owned())
}

fn collect<R: Read + Send + 'static>(stream: Option<R>) -> mpsc::Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    if let Some(mut stream) = stream {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = stream.read_to_end(&mut buf);
            let _ = tx.send(buf);
        });
    }
    rx
}

fn wait_until(child: &mut Child, deadline: Instant) -> Result<ExitStatus, String> {
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                return Err("timed out, killed".to_string());
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => return Err(format!("failed to wait: {e}")),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    fn hook(dir: &Path, name: &str, script: &str) {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn successful_hook_output_is_parsed() {
        let dir = tempfile::tempdir().unwrap();
        hook(dir.path(), "gpu", "echo gpu.present\necho 'gpu.count=2'\necho noise >&2");

        let parsed = run_hooks(dir.path(), Utc::now());
        assert_eq!(parsed.labels.get("gpu.present").map(String::as_str), Some("true"));
        assert_eq!(parsed.labels.get("gpu.count").map(String::as_str), Some("2"));
    }

    #[test]
    fn failing_hook_is_skipped_without_aborting_the_pass() {
        let dir = tempfile::tempdir().unwrap();
        hook(dir.path(), "a-broken", "echo partial=1\nexit 3");
        hook(dir.path(), "b-good", "echo good=1");

        let parsed = run_hooks(dir.path(), Utc::now());
        assert!(!parsed.labels.contains_key("partial"));
        assert!(parsed.labels.contains_key("good"));
    }

    #[test]
    fn non_executable_hook_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("plain"), "echo nope=1\n").unwrap();
        let parsed = run_hooks(dir.path(), Utc::now());
        assert!(parsed.labels.is_empty());
    }

    #[test]
    fn hung_hook_is_killed_and_skipped() {
        let dir = tempfile::tempdir().unwrap();
        hook(dir.path(), "a-hung", "echo early=1\nsleep 30\necho late=1");
        hook(dir.path(), "b-good", "echo good=1");

        let started = Instant::now();
        let parsed = run_hooks_within(dir.path(), Utc::now(), Duration::from_millis(300));
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(!parsed.labels.contains_key("early"));
        assert!(!parsed.labels.contains_key("late"));
        assert!(parsed.labels.contains_key("good"));
    }

    #[test]
    fn stderr_of_a_successful_hook_does_not_block() {
        let dir = tempfile::tempdir().unwrap();
        hook(
            dir.path(),
            "noisy",
            "i=0\nwhile [ $i -lt 20000 ]; do echo \"warning line $i\" >&2; i=$((i+1)); done\necho done=1",
        );
        let parsed = run_hooks_within(dir.path(), Utc::now(), Duration::from_secs(20));
        assert!(parsed.labels.contains_key("done"));
    }

    #[test]
    fn hook_output_honours_directives() {
        let dir = tempfile::tempdir().unwrap();
        hook(dir.path(), "directives", "echo '# +no-label'\necho secret=1\necho public=1");

        let parsed = run_hooks(dir.path(), Utc::now());
        assert!(parsed.features.contains_key("secret"));
        assert!(!parsed.labels.contains_key("secret"));
        assert!(parsed.labels.contains_key("public"));
    }
}
