//! ESP firmware commands.

use super::{require, runtime, Context};
use crate::ui;
use mauzr_release::deploy::{unit_config_candidates, DeployOptions, UnitId};
use mauzr_release::esp::{Board, FirmwareBuilder, FlashOptions};
use std::path::PathBuf;

pub fn cmd_esp_build(ctx: &Context, no_pull: bool) {
    let runner = ctx.runner();
    let root = ctx.repo_root();
    let builder = FirmwareBuilder::new(&runner, &ctx.config.image.docker, ctx.config.esp.clone(), &root);

    ui::step("Building ESP firmware");
    require(runtime().block_on(builder.build(!no_pull)));
    ui::success(&format!("Firmware written to {}", root.join("build/esp").display()));
}

pub fn cmd_esp_flash(ctx: &Context, board: &str, port: Option<String>, erase: bool, no_pull: bool) {
    let board: Board = require(board.parse());
    if port.is_none() {
        ui::hint("no --port given, firmware is built but not deployed");
    }
    let options = FlashOptions { board, port, erase };

    let runner = ctx.runner();
    let root = ctx.repo_root();
    let builder = FirmwareBuilder::new(&runner, &ctx.config.image.docker, ctx.config.esp.clone(), &root);

    ui::step(&format!("Flashing {board}"));
    require(runtime().block_on(builder.flash(&options, !no_pull)));
    ui::success(&format!("{board} done"));
}

pub fn cmd_esp_deploy(
    ctx: &Context,
    id: &str,
    module: PathBuf,
    port: String,
    unit_config: Option<PathBuf>,
) {
    let id: UnitId = require(id.parse());
    let root = ctx.repo_root();
    let config_files = match unit_config {
        Some(path) => vec![path],
        None => unit_config_candidates(&root),
    };
    let options = DeployOptions {
        id,
        module,
        port,
        config_files,
    };

    let runner = ctx.runner();
    let builder = FirmwareBuilder::new(&runner, &ctx.config.image.docker, ctx.config.esp.clone(), &root);

    ui::step(&format!("Deploying {} to {}", options.id, options.port));
    let staged = require(runtime().block_on(builder.deploy(&options)));
    ui::success(&format!("Uploaded {}", staged.dir.display()));
}
