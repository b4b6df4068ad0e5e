//! Configuration commands.

use super::Context;
use crate::ui;
use mauzr_release::config::default_config_path;

pub fn cmd_config_show(ctx: &Context) {
    match toml::to_string_pretty(&ctx.config) {
        Ok(text) => print!("{text}"),
        Err(e) => {
            ui::error(&format!("Failed to serialize config: {e}"));
            std::process::exit(1);
        }
    }
}

pub fn cmd_config_path(ctx: &Context) {
    let path = ctx
        .config_path
        .clone()
        .unwrap_or_else(|| default_config_path(&ctx.repo));
    println!("{}", path.display());
    if !path.exists() {
        ui::hint("file does not exist, built-in defaults apply");
    }
}
