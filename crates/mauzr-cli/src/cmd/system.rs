//! Doctor and shell completion.

use super::{runtime, Context};
use crate::cli::Cli;
use crate::ui;
use clap::CommandFactory;
use mauzr_release::config::default_config_path;
use mauzr_release::docker::{is_available, CommandRunner};
use mauzr_release::git::GitRepo;
use mauzr_release::resolver::resolve;
use mauzr_types::platform::Arch;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Status {
    Ok,
    Warn,
    Fail,
}

impl Status {
    fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Warn => "warn",
            Self::Fail => "fail",
        }
    }
}

struct Check {
    name: &'static str,
    status: Status,
    detail: String,
}

impl Check {
    fn new(name: &'static str, status: Status, detail: impl Into<String>) -> Self {
        Self {
            name,
            status,
            detail: detail.into(),
        }
    }
}

fn tool_check(
    rt: &tokio::runtime::Runtime,
    runner: &dyn CommandRunner,
    name: &'static str,
    program: &str,
    check_args: &[&str],
    missing: Status,
) -> Check {
    if rt.block_on(is_available(runner, program, check_args)) {
        Check::new(name, Status::Ok, format!("{program} available"))
    } else {
        Check::new(name, missing, format!("{program} not found or not working"))
    }
}

fn run_checks(ctx: &Context) -> Vec<Check> {
    let rt = runtime();
    let runner = ctx.runner();
    let mut checks = Vec::new();

    let config_path = ctx
        .config_path
        .clone()
        .unwrap_or_else(|| default_config_path(&ctx.repo));
    checks.push(if config_path.exists() {
        Check::new("config", Status::Ok, format!("{}", config_path.display()))
    } else {
        Check::new("config", Status::Warn, "no config file, using defaults")
    });

    checks.push(tool_check(&rt, &runner, "git", "git", &["--version"], Status::Fail));

    match GitRepo::open(&ctx.repo).and_then(|repo| repo.load_state()) {
        Ok(state) => {
            checks.push(Check::new(
                "repository",
                Status::Ok,
                format!("HEAD {}", state.head),
            ));
            checks.push(match resolve(&state) {
                Ok(resolution) => Check::new(
                    "version",
                    Status::Ok,
                    format!("{} (tag {})", resolution.version, resolution.tag),
                ),
                Err(e) => Check::new("version", Status::Fail, e.to_string()),
            });
            checks.push(if state.dirty {
                Check::new("workspace", Status::Warn, "uncommitted changes, publish will refuse")
            } else {
                Check::new("workspace", Status::Ok, "clean")
            });
        }
        Err(e) => checks.push(Check::new("repository", Status::Fail, e.to_string())),
    }

    checks.push(match Arch::current() {
        Ok(arch) => Check::new("arch", Status::Ok, arch.platform()),
        Err(e) => Check::new("arch", Status::Fail, e.to_string()),
    });

    checks.push(tool_check(
        &rt,
        &runner,
        "docker",
        &ctx.config.image.docker,
        &["version"],
        Status::Fail,
    ));
    // Only publishing needs manifest-tool.
    checks.push(tool_check(
        &rt,
        &runner,
        "manifest-tool",
        &ctx.config.publish.manifest_tool,
        &["--version"],
        Status::Warn,
    ));

    checks
}

pub fn cmd_doctor(ctx: &Context, json: bool) {
    let checks = run_checks(ctx);
    let all_ok = checks.iter().all(|c| c.status != Status::Fail);

    if json {
        let body: Vec<serde_json::Value> = checks
            .iter()
            .map(|c| {
                serde_json::json!({
                    "check": c.name,
                    "status": c.status.as_str(),
                    "detail": c.detail,
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({"ok": all_ok, "checks": body}))
                .unwrap_or_default()
        );
    } else {
        ui::step("mauzr-release doctor");
        ui::blank();
        for check in &checks {
            let line = format!("{}: {}", check.name, check.detail);
            match check.status {
                Status::Ok => ui::check_ok(&line),
                Status::Warn => ui::check_warn(&line),
                Status::Fail => ui::check_fail(&line),
            }
        }
        ui::blank();
        if all_ok {
            ui::success("Ready to release");
        } else {
            ui::hint("fix the failed checks above before building images");
        }
    }

    if !all_ok {
        std::process::exit(1);
    }
}

pub fn cmd_completion(shell: clap_complete::Shell) {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "mauzr-release", &mut std::io::stdout());
}
