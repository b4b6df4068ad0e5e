//! mauzr-release: versioning, container images and ESP firmware for mauzr.
//!
//! Versions come from the nearest `vYYMMDD.N` tag in the commit ancestry of
//! HEAD. Images pin the package to exactly that version.

mod cli;
mod cmd;
mod ui;

use crate::cli::*;
use crate::cmd::Context;
use clap::Parser;

fn init_tracing_stderr() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();

    if let Commands::Completion { shell } = cli.command {
        cmd::system::cmd_completion(shell);
        return;
    }

    init_tracing_stderr();
    let ctx = Context::load(cli.config, cli.repo);

    match cli.command {
        Commands::Version { json } => cmd::release::cmd_version(&ctx, json),
        Commands::Labels { vcs_ref } => cmd::release::cmd_labels(&ctx, vcs_ref),
        Commands::Containerfile { variant } => cmd::release::cmd_containerfile(&ctx, &variant),
        Commands::Build {
            variants,
            no_pull,
            json,
        } => cmd::release::cmd_build(&ctx, variants, no_pull, json),
        Commands::Publish {
            variants,
            no_pull,
            report,
        } => cmd::release::cmd_publish(&ctx, variants, no_pull, report.as_deref()),
        Commands::Esp(sub) => match sub {
            EspCommands::Build { no_pull } => cmd::esp::cmd_esp_build(&ctx, no_pull),
            EspCommands::Flash {
                board,
                port,
                erase,
                no_pull,
            } => cmd::esp::cmd_esp_flash(&ctx, &board, port, erase, no_pull),
            EspCommands::Deploy {
                id,
                module,
                port,
                unit_config,
            } => cmd::esp::cmd_esp_deploy(&ctx, &id, module, port, unit_config),
        },
        Commands::Config(sub) => match sub {
            ConfigCommands::Show => cmd::config::cmd_config_show(&ctx),
            ConfigCommands::Path => cmd::config::cmd_config_path(&ctx),
        },
        Commands::Doctor { json } => cmd::system::cmd_doctor(&ctx, json),
        Commands::Completion { shell } => cmd::system::cmd_completion(shell),
    }
}
