//! Clap CLI definitions for mauzr-release.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub const AFTER_HELP: &str = "\
\x1b[1mHint:\x1b[0m Commands suffixed with [*] have subcommands. Run `<command> --help` for details.

\x1b[1;36mExamples:\x1b[0m
  mauzr-release version             Print the version of HEAD
  mauzr-release labels              Print the provenance labels of HEAD
  mauzr-release containerfile       Print the Containerfile of the base variant
  mauzr-release build               Build every image variant locally
  mauzr-release publish             Build, push and assemble multi-arch manifests
  mauzr-release esp build           Build ESP firmware in the builder image
  mauzr-release esp deploy -i home-light -m light.py
                                    Upload a MicroPython unit and its config
  mauzr-release doctor              Check git, docker and manifest-tool

\x1b[1;36mTags:\x1b[0m
  Releases are tagged vYYMMDD.N, e.g. v240115.1. Commits after a tag
  resolve to YYMMDD.N-post<K>.";

/// Release tooling for mauzr: versioning, container images and firmware.
#[derive(Parser)]
#[command(
    name = "mauzr-release",
    version,
    about = "Release tooling for mauzr",
    after_help = AFTER_HELP,
)]
pub struct Cli {
    /// Path to config file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Repository checkout to operate on.
    #[arg(long, global = true, default_value = ".")]
    pub repo: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Resolve the version of HEAD from the nearest release tag.
    Version {
        /// Output the full resolution as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Print the provenance labels images of HEAD carry.
    Labels {
        /// Override the commit recorded as vcs-ref.
        #[arg(long)]
        vcs_ref: Option<String>,
    },
    /// Print the Containerfile for one variant.
    Containerfile {
        /// Variant to render.
        #[arg(long, default_value = "base")]
        variant: String,
    },
    /// Build image variants for this machine's architecture.
    Build {
        /// Variants to build (repeatable); all configured variants if omitted.
        #[arg(long = "variant")]
        variants: Vec<String>,
        /// Do not pull the base image.
        #[arg(long)]
        no_pull: bool,
        /// Print the release report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Build, push and assemble multi-arch manifests.
    Publish {
        /// Variants to publish (repeatable); all configured variants if omitted.
        #[arg(long = "variant")]
        variants: Vec<String>,
        /// Do not pull the base image.
        #[arg(long)]
        no_pull: bool,
        /// Write a Markdown release report to this file.
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// ESP firmware [*].
    #[command(subcommand)]
    Esp(EspCommands),
    /// Inspect the release configuration [*].
    #[command(subcommand)]
    Config(ConfigCommands),
    /// Check that required tools are available.
    Doctor {
        /// Output results as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Generate shell completion scripts.
    Completion {
        /// Shell to generate completions for.
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
pub enum EspCommands {
    /// Build firmware for all boards.
    Build {
        /// Do not pull the builder image.
        #[arg(long)]
        no_pull: bool,
    },
    /// Build and flash one board.
    Flash {
        /// Board type: esp32, esp8266 or esp8285.
        #[arg(long)]
        board: String,
        /// Serial port of the board; flashing is skipped without it.
        #[arg(long)]
        port: Option<String>,
        /// Erase the flash before deploying.
        #[arg(long)]
        erase: bool,
        /// Do not pull the builder image.
        #[arg(long)]
        no_pull: bool,
    },
    /// Upload a MicroPython unit with its config.
    Deploy {
        /// Unit id, <suit>-<agent>[-<instance>].
        #[arg(long, short = 'i')]
        id: String,
        /// Main module of the unit.
        #[arg(long, short = 'm')]
        module: PathBuf,
        /// Serial port of the unit.
        #[arg(long, short = 'p', default_value = "/dev/ttyUSB0")]
        port: String,
        /// Read unit settings from this YAML file only.
        #[arg(long)]
        unit_config: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration as TOML.
    Show,
    /// Print the path the configuration is read from.
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_build_variants() {
        let cli = Cli::parse_from([
            "mauzr-release",
            "build",
            "--variant",
            "base",
            "--variant",
            "esp",
            "--no-pull",
        ]);
        match cli.command {
            Commands::Build {
                variants, no_pull, ..
            } => {
                assert_eq!(variants, vec!["base", "esp"]);
                assert!(no_pull);
            }
            _ => panic!("expected build"),
        }
        assert_eq!(cli.repo, PathBuf::from("."));
    }

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let cli = Cli::parse_from([
            "mauzr-release",
            "version",
            "--json",
            "--repo",
            "/src/mauzr",
            "--config",
            "ci.toml",
        ]);
        assert_eq!(cli.repo, PathBuf::from("/src/mauzr"));
        assert_eq!(cli.config, Some(PathBuf::from("ci.toml")));
        assert!(matches!(cli.command, Commands::Version { json: true }));
    }

    #[test]
    fn test_parse_esp_flash() {
        let cli = Cli::parse_from([
            "mauzr-release",
            "esp",
            "flash",
            "--board",
            "esp8285",
            "--port",
            "/dev/ttyUSB0",
            "--erase",
        ]);
        match cli.command {
            Commands::Esp(EspCommands::Flash {
                board, port, erase, ..
            }) => {
                assert_eq!(board, "esp8285");
                assert_eq!(port.as_deref(), Some("/dev/ttyUSB0"));
                assert!(erase);
            }
            _ => panic!("expected esp flash"),
        }
    }

    #[test]
    fn test_parse_esp_deploy() {
        let cli = Cli::parse_from([
            "mauzr-release",
            "esp",
            "deploy",
            "-i",
            "home-light-kitchen",
            "-m",
            "units/light.py",
        ]);
        match cli.command {
            Commands::Esp(EspCommands::Deploy {
                id,
                module,
                port,
                unit_config,
            }) => {
                assert_eq!(id, "home-light-kitchen");
                assert_eq!(module, PathBuf::from("units/light.py"));
                assert_eq!(port, "/dev/ttyUSB0");
                assert!(unit_config.is_none());
            }
            _ => panic!("expected esp deploy"),
        }
        assert!(Cli::try_parse_from(["mauzr-release", "esp", "deploy", "-i", "home-light"]).is_err());
    }

    #[test]
    fn test_esp_flash_requires_board() {
        assert!(Cli::try_parse_from(["mauzr-release", "esp", "flash"]).is_err());
    }
}
