//! Process lifecycle: cooperative shutdown, restart by re-executing the
//! captured invocation, and the marker that lets the new process confirm it.

use std::{
    env,
    ffi::OsString,
    fs,
    path::{Component, Path, PathBuf},
    process::Command,
    sync::atomic::{AtomicBool, Ordering},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{
    domain::{ChannelId, MessageId, MessageRef},
    errors::Error,
    Result,
};

const MARKER_MAX_AGE: Duration = Duration::from_secs(30);

/// Owns the process-wide shutdown token and the restart flag.
#[derive(Debug, Default)]
pub struct LifecycleController {
    restart: AtomicBool,
    token: CancellationToken,
}

impl LifecycleController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop. Returns immediately; the run loop observes the token.
    ///
    /// Calling it again only updates the restart flag.
    pub fn shutdown(&self, restart: bool) {
        self.restart.store(restart, Ordering::SeqCst);
        if !self.token.is_cancelled() {
            tracing::info!(restart, "shutdown requested");
        }
        self.token.cancel();
    }

    pub fn restart_requested(&self) -> bool {
        self.restart.load(Ordering::SeqCst)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

/// Program path and arguments as started, reproducible on restart.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invocation {
    program: PathBuf,
    args: Vec<OsString>,
}

impl Invocation {
    /// Capture the current process invocation. Call before anything changes
    /// the working directory.
    pub fn capture() -> Result<Self> {
        let cwd = env::current_dir()?;
        let exe = env::current_exe().ok();
        Self::from_argv(env::args_os(), &cwd, exe.as_deref())
    }

    pub fn from_argv<I>(argv: I, cwd: &Path, current_exe: Option<&Path>) -> Result<Self>
    where
        I: IntoIterator<Item = OsString>,
    {
        let mut argv = argv.into_iter();
        let argv0 = argv.next().ok_or_else(|| Error::InvalidPath {
            path: PathBuf::new(),
            reason: "empty argument vector".to_string(),
        })?;
        let program = resolve_program(Path::new(&argv0), cwd, current_exe).ok_or_else(|| {
            Error::InvalidPath {
                path: PathBuf::from(&argv0),
                reason: "cannot resolve the program path".to_string(),
            }
        })?;
        Ok(Self {
            program,
            args: argv.collect(),
        })
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    /// Full argument vector, program first.
    pub fn argv(&self) -> Vec<OsString> {
        std::iter::once(self.program.clone().into_os_string())
            .chain(self.args.iter().cloned())
            .collect()
    }

    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }

    /// Replace the current process image. Only returns on failure.
    #[cfg(unix)]
    pub fn exec(&self) -> Error {
        use std::os::unix::process::CommandExt;
        tracing::info!(program = %self.program.display(), "re-executing");
        Error::Io(self.to_command().exec())
    }

    /// Spawn the invocation and wait for it; the caller exits with its status.
    #[cfg(not(unix))]
    pub fn exec(&self) -> Error {
        tracing::info!(program = %self.program.display(), "respawning");
        match self.to_command().status() {
            Ok(status) => std::process::exit(status.code().unwrap_or(1)),
            Err(e) => Error::Io(e),
        }
    }
}

fn resolve_program(argv0: &Path, cwd: &Path, current_exe: Option<&Path>) -> Option<PathBuf> {
    if argv0.as_os_str().is_empty() {
        return current_exe.map(Path::to_path_buf);
    }
    if argv0.is_absolute() {
        return Some(normalize_path(argv0));
    }
    if argv0.components().count() > 1 {
        return Some(normalize_path(&cwd.join(argv0)));
    }
    // Bare name: it was found through PATH, so ask the OS where we really are.
    current_exe
        .map(Path::to_path_buf)
        .or_else(|| which_in_path(argv0))
}

/// Lexical normalization: drop `.` and fold `..` without touching the filesystem.
fn normalize_path(p: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for c in p.components() {
        match c {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn which_in_path(binary: &Path) -> Option<PathBuf> {
    let path = env::var_os("PATH")?;
    env::split_paths(&path)
        .map(|dir| dir.join(binary))
        .find(|candidate| is_executable_file(candidate))
}

fn is_executable_file(p: &Path) -> bool {
    if !p.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(md) = fs::metadata(p) {
            return (md.permissions().mode() & 0o111) != 0;
        }
    }
    true
}

/// Written before a restart so the next process can confirm it in the same chat.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartMarker {
    pub chat_id: i64,
    pub message_id: i64,
    /// Unix milliseconds.
    pub timestamp: u64,
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

impl RestartMarker {
    pub fn new(message: MessageRef) -> Self {
        Self {
            chat_id: message.channel_id.0,
            message_id: message.message_id.0,
            timestamp: now_millis(),
        }
    }

    pub fn message(&self) -> MessageRef {
        MessageRef {
            channel_id: ChannelId(self.chat_id),
            message_id: MessageId(self.message_id),
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string(self)?)?;
        Ok(())
    }

    /// Read and delete the marker; `None` if absent, unreadable or stale.
    pub fn take_fresh(path: &Path) -> Option<Self> {
        Self::take_fresh_at(path, now_millis())
    }

    pub fn take_fresh_at(path: &Path, now_ms: u64) -> Option<Self> {
        if !path.exists() {
            return None;
        }
        let marker = fs::read_to_string(path)
            .ok()
            .and_then(|txt| serde_json::from_str::<RestartMarker>(&txt).ok());
        if let Err(e) = fs::remove_file(path) {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove restart marker");
        }
        let marker = marker?;
        let age = now_ms.saturating_sub(marker.timestamp);
        (age < MARKER_MAX_AGE.as_millis() as u64).then_some(marker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(items: &[&str]) -> Vec<OsString> {
        items.iter().map(OsString::from).collect()
    }

    #[test]
    fn relative_program_is_made_absolute_and_args_kept() {
        let inv = Invocation::from_argv(
            argv(&["./target/../bin/dozer", "--flag", "a b", ""]),
            Path::new("/srv/bot"),
            None,
        )
        .unwrap();
        assert_eq!(inv.program(), Path::new("/srv/bot/bin/dozer"));
        assert_eq!(inv.args(), argv(&["--flag", "a b", ""]).as_slice());
        assert_eq!(
            inv.argv(),
            argv(&["/srv/bot/bin/dozer", "--flag", "a b", ""])
        );
    }

    #[test]
    fn bare_name_uses_current_executable() {
        let inv = Invocation::from_argv(
            argv(&["dozer", "-v"]),
            Path::new("/home/u"),
            Some(Path::new("/usr/local/bin/dozer")),
        )
        .unwrap();
        assert_eq!(inv.program(), Path::new("/usr/local/bin/dozer"));
        assert_eq!(inv.args(), argv(&["-v"]).as_slice());
    }

    #[test]
    fn normalization_is_idempotent_across_restarts() {
        let first = Invocation::from_argv(
            argv(&["../bot/./dozer", "x"]),
            Path::new("/srv/work"),
            None,
        )
        .unwrap();
        // The restarted process sees the normalized argv and a different cwd.
        let second = Invocation::from_argv(first.argv(), Path::new("/tmp"), None).unwrap();
        assert_eq!(first, second);
        assert_eq!(second.program(), Path::new("/srv/bot/dozer"));
    }

    #[test]
    fn empty_argv_is_rejected() {
        let err = Invocation::from_argv(Vec::new(), Path::new("/"), None).unwrap_err();
        assert!(err.to_string().contains("empty argument vector"));
    }

    #[test]
    fn shutdown_is_idempotent_and_latest_flag_wins() {
        let lc = LifecycleController::new();
        let token = lc.token();
        assert!(!lc.is_shutting_down());

        lc.shutdown(true);
        assert!(token.is_cancelled());
        assert!(lc.restart_requested());

        lc.shutdown(false);
        assert!(lc.is_shutting_down());
        assert!(!lc.restart_requested());
    }

    fn tmp_marker() -> PathBuf {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        PathBuf::from(format!("/tmp/dozer-restart-test-{}-{ts}.json", std::process::id()))
    }

    #[test]
    fn restart_marker_is_consumed_once() {
        let path = tmp_marker();
        let marker = RestartMarker {
            chat_id: -100,
            message_id: 7,
            timestamp: 1_000,
        };
        marker.write(&path).unwrap();

        assert_eq!(RestartMarker::take_fresh_at(&path, 5_000), Some(marker));
        assert!(!path.exists());
        assert_eq!(RestartMarker::take_fresh_at(&path, 5_000), None);
    }

    #[test]
    fn stale_restart_marker_is_dropped() {
        let path = tmp_marker();
        let marker = RestartMarker {
            chat_id: 1,
            message_id: 2,
            timestamp: 1_000,
        };
        marker.write(&path).unwrap();
        assert_eq!(RestartMarker::take_fresh_at(&path, 31_001), None);
        assert!(!path.exists());
    }
}
