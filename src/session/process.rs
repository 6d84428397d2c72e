//! Launching the simulator as a child process
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use derive_builder::Builder;
use tokio::io::BufReader;
use tokio::process::Command;
use tracing::{debug, info};
use uuid::Uuid;

use super::bridge::{BridgeChannel, BridgeSession};
use super::{DisplayMode, Session, SessionFactory};
use crate::config::{
    BRIDGE_PLUGIN, LAUNCH_TIMEOUT, REQUEST_TIMEOUT, SIMULATOR_EXECUTABLE, XVFB_SCREEN,
};
use crate::error::{ConfigurationError, SessionError};

/// Where the simulator lives and how to run it
#[derive(Debug, Clone, Builder)]
pub struct SimulatorSettings {
    /// Simulator install directory, exported to the child as `GRASPIT`
    #[builder(setter(into))]
    pub install_dir: PathBuf,
    /// Plugin directory, exported to the child as `GRASPIT_PLUGIN_DIR`
    #[builder(setter(into))]
    pub plugin_dir: PathBuf,
    /// Simulator binary; defaults to `bin/graspit_simulator` under `install_dir`
    #[builder(default, setter(into, strip_option))]
    pub executable: Option<PathBuf>,
    #[builder(default = "BRIDGE_PLUGIN.to_string()", setter(into))]
    pub plugin_name: String,
    #[builder(default)]
    pub display_mode: DisplayMode,
    /// Forward the simulator's stderr to ours
    #[builder(default)]
    pub verbose: bool,
    #[builder(default = "LAUNCH_TIMEOUT")]
    pub launch_timeout: Duration,
    #[builder(default = "REQUEST_TIMEOUT")]
    pub request_timeout: Duration,
}

impl SimulatorSettings {
    /// Check that the install and plugin directories exist
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        check_dir("GraspIt", &self.install_dir)?;
        check_dir("plugins", &self.plugin_dir)?;
        Ok(())
    }

    /// Same settings with a different display mode
    pub fn with_display_mode(&self, display_mode: DisplayMode) -> Self {
        Self {
            display_mode,
            ..self.clone()
        }
    }

    fn executable(&self) -> PathBuf {
        self.executable
            .clone()
            .unwrap_or_else(|| self.install_dir.join(SIMULATOR_EXECUTABLE))
    }

    /// Program, arguments and environment for the configured display mode
    pub fn launch_spec(&self) -> LaunchSpec {
        let executable = self.executable();
        let mut sim_args = vec!["-p".to_string(), self.plugin_name.clone()];
        let mut env = vec![
            ("GRASPIT".to_string(), self.install_dir.display().to_string()),
            (
                "GRASPIT_PLUGIN_DIR".to_string(),
                self.plugin_dir.display().to_string(),
            ),
        ];

        match self.display_mode {
            DisplayMode::Windowed => LaunchSpec {
                program: executable,
                args: sim_args,
                env,
            },
            DisplayMode::Headless => {
                sim_args.push("--headless".to_string());
                env.push(("QT_QPA_PLATFORM".to_string(), "offscreen".to_string()));
                LaunchSpec {
                    program: executable,
                    args: sim_args,
                    env,
                }
            }
            DisplayMode::VirtualFramebuffer => {
                let mut args = vec![
                    "-a".to_string(),
                    "-s".to_string(),
                    XVFB_SCREEN.to_string(),
                    executable.display().to_string(),
                ];
                args.extend(sim_args);
                LaunchSpec {
                    program: PathBuf::from("xvfb-run"),
                    args,
                    env,
                }
            }
        }
    }
}

fn check_dir(what: &'static str, path: &Path) -> Result<(), ConfigurationError> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(ConfigurationError::MissingDirectory {
            what,
            path: path.to_path_buf(),
        })
    }
}

/// Command line of a simulator launch
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

/// Starts one simulator process per session
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    settings: SimulatorSettings,
}

impl ProcessLauncher {
    /// Create a launcher, failing if the configured directories are missing
    pub fn new(settings: SimulatorSettings) -> Result<Self, ConfigurationError> {
        settings.validate()?;
        Ok(Self { settings })
    }
}

#[async_trait]
impl SessionFactory for ProcessLauncher {
    async fn start(&self) -> Result<Box<dyn Session>, SessionError> {
        let session_id = Uuid::new_v4().to_string();
        let spec = self.settings.launch_spec();

        info!(
            "Session {}: starting simulator ({:?})",
            session_id, self.settings.display_mode
        );
        debug!("Session {}: {:?} {:?}", session_id, spec.program, spec.args);

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(if self.settings.verbose {
                Stdio::inherit()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            SessionError::Launch(format!("failed to spawn {}: {}", spec.program.display(), e))
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SessionError::Launch("simulator stdout unavailable".to_string()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SessionError::Launch("simulator stdin unavailable".to_string()))?;

        let mut channel = BridgeChannel::new(BufReader::new(stdout), stdin)
            .with_request_timeout(self.settings.request_timeout);

        // Dropping the child on failure kills it
        channel.wait_ready(self.settings.launch_timeout).await?;

        info!("Session {}: simulator ready", session_id);
        Ok(Box::new(BridgeSession::new(session_id, channel, Some(child))))
    }
}
