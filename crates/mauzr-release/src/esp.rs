//! ESP firmware builds inside the builder image.
//!
//! The repository is mounted into the ESP toolchain image and the firmware
//! makefiles run there. Output lands in `build/esp/{32,8266}` and is handed
//! back to the repository owner afterwards. MicroPython units are staged
//! under `build/<unit>` and uploaded from the host.

use crate::deploy::{read_unit_config, stage_unit, upload_plan, DeployOptions, StagedUnit};
use crate::docker::{CommandRunner, Invocation};
use mauzr_types::config::EspConfig;
use mauzr_types::error::{ReleaseError, ReleaseResult};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;

/// Supported boards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Board {
    Esp32,
    Esp8266,
    Esp8285,
}

impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Esp32 => write!(f, "esp32"),
            Self::Esp8266 => write!(f, "esp8266"),
            Self::Esp8285 => write!(f, "esp8285"),
        }
    }
}

impl FromStr for Board {
    type Err = ReleaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "esp32" => Ok(Self::Esp32),
            "esp8266" => Ok(Self::Esp8266),
            "esp8285" => Ok(Self::Esp8285),
            other => Err(ReleaseError::Config(format!("Unknown board: {other}"))),
        }
    }
}

/// Flash steps and the boards they apply to, in execution order.
const FLASH_STEPS: &[(&[Board], &str)] = &[
    (&[Board::Esp8285], "export FLASH_MODE=dout"),
    (&[Board::Esp8266, Board::Esp8285], "rm -rf esp8266/build/*"),
    (&[Board::Esp8266, Board::Esp8285], "make -C esp8266 all"),
    (&[Board::Esp32], "make -C esp32"),
];

/// Output directories created before the builder runs.
const OUTPUT_DIRS: &[&str] = &["build/esp/32", "build/esp/8266"];

/// Options for flashing a board.
#[derive(Debug, Clone)]
pub struct FlashOptions {
    pub board: Board,
    /// Serial port of the board; enables the `deploy` target.
    pub port: Option<String>,
    /// Erase the flash first (new boards).
    pub erase: bool,
}

/// Shell script that builds firmware for all boards.
pub fn build_script(mount: &str, uid: u32) -> String {
    format!(
        "make -C esp32 && rm -rf esp8266/build/* && make -C esp8266 && chown {uid} -R {mount}/build"
    )
}

/// Shell script that builds and flashes one board.
pub fn flash_script(options: &FlashOptions, mount: &str, uid: u32) -> String {
    let mut steps: Vec<String> = Vec::new();
    if let Some(port) = &options.port {
        steps.push(format!("export PORT={port}"));
    }
    steps.extend(
        FLASH_STEPS
            .iter()
            .filter(|(boards, _)| boards.contains(&options.board))
            .map(|(_, step)| step.to_string()),
    );

    // erase/deploy are extra make targets of the final step.
    if let Some(last) = steps.last_mut() {
        if options.erase {
            last.push_str(" erase");
        }
        if options.port.is_some() {
            last.push_str(" deploy");
        }
    }
    steps.push(format!("chown {uid} -R {mount}/build"));
    steps.join(" && ")
}

/// Runs the ESP builder image against a repository checkout.
pub struct FirmwareBuilder<'a> {
    runner: &'a dyn CommandRunner,
    docker: String,
    config: EspConfig,
    root: PathBuf,
}

impl<'a> FirmwareBuilder<'a> {
    pub fn new(runner: &'a dyn CommandRunner, docker: &str, config: EspConfig, root: &Path) -> Self {
        Self {
            runner,
            docker: docker.to_string(),
            config,
            root: root.to_path_buf(),
        }
    }

    fn run_invocation(&self, script: String, privileged: bool) -> Invocation {
        let mut invocation = Invocation::new(&self.docker).arg("run").arg("--rm");
        if privileged {
            invocation = invocation.arg("--privileged");
        }
        invocation
            .args([
                "-v".to_string(),
                format!("{}:{}", self.root.display(), self.config.mount),
                "-w".to_string(),
                self.config.mount.clone(),
                self.config.image.clone(),
                "sh".to_string(),
                "-c".to_string(),
                script,
            ])
    }

    /// Invocations for a full firmware build.
    pub fn build_plan(&self, pull: bool, uid: u32) -> Vec<Invocation> {
        let mut plan = Vec::new();
        if pull {
            plan.push(self.pull_invocation());
        }
        plan.push(self.run_invocation(build_script(&self.config.mount, uid), false));
        plan
    }

    /// Invocations for flashing one board. Flashing needs device access.
    pub fn flash_plan(&self, options: &FlashOptions, pull: bool, uid: u32) -> Vec<Invocation> {
        let mut plan = Vec::new();
        if pull {
            plan.push(self.pull_invocation());
        }
        plan.push(self.run_invocation(flash_script(options, &self.config.mount, uid), true));
        plan
    }

    fn pull_invocation(&self) -> Invocation {
        Invocation::new(&self.docker).args(["pull", self.config.image.as_str()])
    }

    fn prepare_output(&self) -> ReleaseResult<()> {
        for dir in OUTPUT_DIRS {
            std::fs::create_dir_all(self.root.join(dir))?;
        }
        Ok(())
    }

    async fn execute(&self, plan: Vec<Invocation>) -> ReleaseResult<()> {
        self.prepare_output()?;
        self.run_plan(plan).await
    }

    async fn run_plan(&self, plan: Vec<Invocation>) -> ReleaseResult<()> {
        for invocation in plan {
            let output = self.runner.run(&invocation).await?;
            if !output.success() {
                return Err(ReleaseError::Command(format!(
                    "{} failed: {}",
                    invocation.display(),
                    output.last_error_line()
                )));
            }
        }
        Ok(())
    }

    /// Build firmware for all boards.
    pub async fn build(&self, pull: bool) -> ReleaseResult<()> {
        info!(image = %self.config.image, "Building ESP firmware");
        self.execute(self.build_plan(pull, owner_uid(&self.root)?)).await
    }

    /// Build and flash one board.
    pub async fn flash(&self, options: &FlashOptions, pull: bool) -> ReleaseResult<()> {
        info!(board = %options.board, port = ?options.port, erase = options.erase, "Flashing ESP board");
        self.execute(self.flash_plan(options, pull, owner_uid(&self.root)?))
            .await
    }

    /// Stage a MicroPython unit under `build/<unit>` and upload it.
    pub async fn deploy(&self, options: &DeployOptions) -> ReleaseResult<StagedUnit> {
        let (source, unit) = read_unit_config(&options.config_files, &options.id)?;
        info!(unit = %options.id, config = %source.display(), port = %options.port, "Deploying unit");

        let dir = self.root.join("build").join(options.id.to_string());
        let staged = stage_unit(&dir, &unit, &options.module, &self.config.ca_cert)?;
        self.run_plan(upload_plan(&self.config.ampy, &options.port, &staged))
            .await?;
        Ok(staged)
    }
}

/// Owner of the checkout, so build output is handed back to them.
#[cfg(unix)]
fn owner_uid(root: &Path) -> ReleaseResult<u32> {
    use std::os::unix::fs::MetadataExt;
    Ok(std::fs::metadata(root)?.uid())
}

#[cfg(not(unix))]
fn owner_uid(_root: &Path) -> ReleaseResult<u32> {
    Ok(0)
}
