//! Backend process launcher and supervisor.
//!
//! Starts the Python telemetry backend, waits a short grace period to catch
//! immediate failures, then runs the UI program and stops the backend once
//! the UI exits.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::config::LauncherConfig;

/// Name of the UI program searched for when none is configured.
pub const UI_PROGRAM_NAME: &str = "jarvis-hud";

/// Errors that abort a launch.
#[derive(Error, Debug)]
pub enum LaunchError {
    /// The backend script is missing.
    #[error("Missing backend script.\n\nExpected:\n  {}", .0.display())]
    MissingScript(PathBuf),

    /// No usable Python interpreter.
    #[error(
        "Python not found.\n\nInstall Python 3.10+ and ensure 'python3', 'python' or 'py' is on PATH."
    )]
    PythonNotFound,

    /// The backend process could not be spawned.
    #[error("Failed to start backend process: {0}")]
    BackendSpawn(#[source] io::Error),

    /// The backend died during the startup grace period.
    #[error(
        "The backend exited immediately ({0}).\n\nCommon causes:\n\
         - Missing Python packages (torch/numpy/websockets)\n\
         - Port 8765 already in use\n\n\
         Fix packages with:\n  python -m pip install -r backend/requirements.txt"
    )]
    BackendExited(ExitStatus),

    /// The UI program could not be spawned.
    #[error("Backend started, but failed to start the UI {}: {source}", .path.display())]
    UiSpawn {
        /// Program that failed.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },

    /// Waiting on a child process failed.
    #[error("Failed to check backend status: {0}")]
    Wait(#[source] io::Error),
}

/// A Python interpreter invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PythonCommand {
    /// Interpreter executable.
    pub program: PathBuf,
    /// Arguments placed before the script path (`-3` for the `py` launcher).
    pub args: Vec<String>,
}

/// Locate a Python interpreter.
///
/// A configured interpreter is used as given (looked up on PATH if it is a
/// bare name). Otherwise `python3`, `python` and finally `py -3` are tried.
pub fn find_python(configured: Option<&str>) -> Result<PythonCommand, LaunchError> {
    if let Some(name) = configured {
        return which::which(name)
            .map(|program| PythonCommand {
                program,
                args: Vec::new(),
            })
            .map_err(|_| LaunchError::PythonNotFound);
    }

    let candidates: [(&str, &[&str]); 3] = [("python3", &[]), ("python", &[]), ("py", &["-3"])];
    candidates
        .iter()
        .find_map(|(name, args)| {
            which::which(name).ok().map(|program| PythonCommand {
                program,
                args: args.iter().map(|a| (*a).to_string()).collect(),
            })
        })
        .ok_or(LaunchError::PythonNotFound)
}

/// Locate the UI program: the configured one, else `jarvis-hud` beside the
/// current executable, else on PATH.
#[must_use]
pub fn find_ui_program(configured: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = configured {
        return which::which(path).ok();
    }

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            let beside = exe_dir.join(format!("{UI_PROGRAM_NAME}{}", std::env::consts::EXE_SUFFIX));
            if beside.is_file() {
                return Some(beside);
            }
        }
    }

    which::which(UI_PROGRAM_NAME).ok()
}

/// A running backend process. Dropping it stops the process.
#[derive(Debug)]
pub struct BackendProcess {
    child: Option<Child>,
    started_at: Instant,
}

impl BackendProcess {
    /// Spawn `python script` with `dir` as working directory. Output is
    /// inherited so backend logs stay visible.
    pub fn start(python: &PythonCommand, script: &Path, dir: &Path) -> Result<Self, LaunchError> {
        tracing::info!(
            python = %python.program.display(),
            script = %script.display(),
            dir = %dir.display(),
            "Starting backend"
        );

        let child = Command::new(&python.program)
            .args(&python.args)
            .arg(script)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(LaunchError::BackendSpawn)?;

        Ok(Self {
            child: Some(child),
            started_at: Instant::now(),
        })
    }

    /// Wait out the grace period and fail if the backend already exited.
    pub fn ensure_started(&mut self, grace: Duration) -> Result<(), LaunchError> {
        std::thread::sleep(grace.saturating_sub(self.started_at.elapsed()));

        let Some(child) = self.child.as_mut() else {
            return Ok(());
        };
        match child.try_wait().map_err(LaunchError::Wait)? {
            None => Ok(()),
            Some(status) => {
                self.child = None;
                tracing::error!(%status, "Backend exited during startup");
                Err(LaunchError::BackendExited(status))
            }
        }
    }

    /// Whether the backend is still running.
    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut().map(Child::try_wait) {
            Some(Ok(None)) => true,
            Some(Ok(Some(status))) => {
                tracing::warn!(%status, "Backend process exited");
                self.child = None;
                false
            }
            Some(Err(e)) => {
                tracing::error!(error = %e, "Failed to check backend status");
                false
            }
            None => false,
        }
    }

    /// Stop the backend and reap it.
    pub fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            tracing::info!("Stopping backend");
            let _ = child.kill();
            match child.wait() {
                Ok(status) => tracing::info!(%status, "Backend stopped"),
                Err(e) => tracing::warn!(error = %e, "Error waiting for backend to stop"),
            }
        }
    }

    /// Leave the backend running after this handle is gone.
    pub fn detach(mut self) {
        if let Some(child) = self.child.take() {
            tracing::info!(pid = child.id(), "Leaving backend running");
        }
    }

    /// How long the backend has been running.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

impl Drop for BackendProcess {
    fn drop(&mut self) {
        self.stop();
    }
}

/// How a launch ended.
#[derive(Debug)]
pub enum LaunchOutcome {
    /// The UI ran and exited with this status; the backend was stopped.
    UiExited(ExitStatus),
    /// No UI program was found; the backend was left running.
    BackendOnly,
}

/// Runs the backend and the UI with a joint lifetime.
#[derive(Debug, Clone)]
pub struct Supervisor {
    config: LauncherConfig,
}

impl Supervisor {
    /// Create a supervisor for the given launcher settings.
    #[must_use]
    pub fn new(config: LauncherConfig) -> Self {
        Self { config }
    }

    /// Start the backend, run the UI to completion, then stop the backend.
    ///
    /// On any error after the backend started, the backend is stopped
    /// before returning.
    pub fn run(&self) -> Result<LaunchOutcome, LaunchError> {
        let script = self
            .config
            .server_script
            .canonicalize()
            .ok()
            .filter(|p| p.is_file())
            .ok_or_else(|| LaunchError::MissingScript(self.config.server_script.clone()))?;

        let python = find_python(self.config.python.as_deref())?;
        let dir = match &self.config.backend_dir {
            Some(dir) => dir.clone(),
            None => script
                .parent()
                .map_or_else(|| PathBuf::from("."), Path::to_path_buf),
        };

        let mut backend = BackendProcess::start(&python, &script, &dir)?;
        backend.ensure_started(Duration::from_millis(self.config.startup_grace_ms))?;

        let Some(ui) = find_ui_program(self.config.ui_program.as_deref()) else {
            tracing::warn!(
                "Backend started, but the UI program '{}' was not found. \
                 Build it with: cargo build --release",
                UI_PROGRAM_NAME
            );
            backend.detach();
            return Ok(LaunchOutcome::BackendOnly);
        };

        tracing::info!(ui = %ui.display(), args = ?self.config.ui_args, "Starting UI");
        let status = Command::new(&ui)
            .args(&self.config.ui_args)
            .status()
            .map_err(|source| LaunchError::UiSpawn {
                path: ui.clone(),
                source,
            })?;

        tracing::info!(%status, uptime_ms = backend.uptime().as_millis() as u64, "UI exited");
        backend.stop();
        Ok(LaunchOutcome::UiExited(status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_script_is_rejected() {
        let supervisor = Supervisor::new(LauncherConfig {
            server_script: PathBuf::from("no/such/server.py"),
            ..LauncherConfig::default()
        });
        let err = supervisor.run().unwrap_err();
        assert!(matches!(err, LaunchError::MissingScript(_)));
        assert!(err.to_string().contains("no/such/server.py"));
    }

    #[test]
    fn test_unknown_configured_python() {
        let err = find_python(Some("definitely-not-a-python-interpreter")).unwrap_err();
        assert!(matches!(err, LaunchError::PythonNotFound));
    }

    #[test]
    fn test_unknown_configured_ui_program() {
        assert!(find_ui_program(Some(Path::new("definitely-not-a-hud-program"))).is_none());
    }

    #[test]
    fn test_python_not_found_message() {
        let msg = LaunchError::PythonNotFound.to_string();
        assert!(msg.starts_with("Python not found."));
    }

    #[cfg(unix)]
    mod unix {
        use super::*;
        use std::io::Write;

        fn sh() -> PythonCommand {
            PythonCommand {
                program: PathBuf::from("/bin/sh"),
                args: Vec::new(),
            }
        }

        fn script(body: &str) -> tempfile::NamedTempFile {
            let mut file = tempfile::NamedTempFile::new().unwrap();
            writeln!(file, "{body}").unwrap();
            file
        }

        #[test]
        fn test_immediate_exit_is_reported() {
            let file = script("exit 3");
            let dir = std::env::temp_dir();
            let mut backend = BackendProcess::start(&sh(), file.path(), &dir).unwrap();

            let err = backend
                .ensure_started(Duration::from_millis(300))
                .unwrap_err();
            assert!(matches!(err, LaunchError::BackendExited(status) if status.code() == Some(3)));
            assert!(err.to_string().contains("Port 8765 already in use"));
            assert!(!backend.is_running());
        }

        #[test]
        fn test_running_backend_is_stopped() {
            let file = script("sleep 30");
            let dir = std::env::temp_dir();
            let mut backend = BackendProcess::start(&sh(), file.path(), &dir).unwrap();

            backend.ensure_started(Duration::from_millis(50)).unwrap();
            assert!(backend.is_running());
            backend.stop();
            assert!(!backend.is_running());
        }

        #[test]
        fn test_supervisor_runs_ui_then_stops_backend() {
            let backend = script("sleep 30");
            let supervisor = Supervisor::new(LauncherConfig {
                python: Some("sh".to_string()),
                server_script: backend.path().to_path_buf(),
                backend_dir: None,
                startup_grace_ms: 50,
                ui_program: Some(PathBuf::from("true")),
                ui_args: Vec::new(),
            });

            match supervisor.run().unwrap() {
                LaunchOutcome::UiExited(status) => assert!(status.success()),
                LaunchOutcome::BackendOnly => panic!("UI program was not found"),
            }
        }
    }
}
