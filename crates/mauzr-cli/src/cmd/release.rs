//! Version, label and image commands.

use super::{current_arch, require, runtime, Context};
use crate::ui;
use chrono::Utc;
use mauzr_release::image::render_containerfile;
use mauzr_release::pipeline::{Pipeline, ReleaseOptions, ReleaseReport};
use mauzr_release::resolver::resolve;
use mauzr_release::ReleaseError;
use mauzr_types::config::ImageConfig;
use mauzr_types::labels::{BuildLabelSet, BuildProvenance};
use mauzr_types::platform::Arch;
use std::path::Path;

pub fn cmd_version(ctx: &Context, json: bool) {
    let resolution = require(resolve(&ctx.load_state()));
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&resolution).unwrap_or_default()
        );
    } else {
        println!("{}", resolution.version);
    }
}

pub fn cmd_labels(ctx: &Context, vcs_ref: Option<String>) {
    let resolution = require(resolve(&ctx.load_state()));
    let labels = BuildLabelSet::new(&BuildProvenance {
        package: ctx.config.package.clone(),
        vcs_url: ctx.config.vcs_url.clone(),
        vcs_ref: vcs_ref.unwrap_or(resolution.head),
        version: resolution.version,
    });
    for (key, value) in labels.qualified() {
        println!("{key}={value}");
    }
}

pub fn cmd_containerfile(ctx: &Context, variant: &str) {
    let Some(variant) = ctx.config.variant(variant) else {
        super::fail(&ReleaseError::Config(format!("Unknown variant: {variant}")));
    };
    let state = ctx.load_state();
    let resolution = require(resolve(&state));
    let runner = ctx.runner();
    let index = ctx.index();
    let pipeline = Pipeline::new(&ctx.config, &runner, index.as_ref());

    let options = options(ctx, Vec::new(), false, false);
    let target = pipeline.target(variant, &resolution, &state, options.arch);
    let request = require(pipeline.request(variant, &resolution, &target, &options));
    print!("{}", render_containerfile(&request));
}

pub fn cmd_build(ctx: &Context, variants: Vec<String>, no_pull: bool, json: bool) {
    let report = run_pipeline(ctx, options(ctx, variants, no_pull, false));
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).unwrap_or_default()
        );
        return;
    }
    print_report(&report);
}

pub fn cmd_publish(ctx: &Context, variants: Vec<String>, no_pull: bool, report_path: Option<&Path>) {
    let report = run_pipeline(ctx, options(ctx, variants, no_pull, true));
    print_report(&report);

    if let Some(path) = report_path {
        match std::fs::write(path, report.to_markdown()) {
            Ok(()) => ui::success(&format!("Report written to {}", path.display())),
            Err(e) => super::fail(&ReleaseError::Io(e)),
        }
    }
}

fn options(ctx: &Context, variants: Vec<String>, no_pull: bool, publish: bool) -> ReleaseOptions {
    release_options(&ctx.config.image, variants, no_pull, publish, current_arch())
}

/// `--no-pull` can only switch pulling off, never on.
fn release_options(
    image: &ImageConfig,
    variants: Vec<String>,
    no_pull: bool,
    publish: bool,
    arch: Arch,
) -> ReleaseOptions {
    ReleaseOptions {
        variants,
        publish,
        pull: image.pull && !no_pull,
        build_date: Utc::now(),
        arch,
    }
}

fn run_pipeline(ctx: &Context, options: ReleaseOptions) -> ReleaseReport {
    let state = ctx.load_state();
    let runner = ctx.runner();
    let index = ctx.index();
    let pipeline = Pipeline::new(&ctx.config, &runner, index.as_ref());
    require(runtime().block_on(pipeline.run(&state, &options)))
}

fn print_report(report: &ReleaseReport) {
    ui::section(&format!("mauzr {}", report.resolution.version));
    ui::kv("Tag", &report.resolution.tag.to_string());
    ui::kv("Commit", &report.resolution.head);
    ui::kv("Branch", report.branch.as_deref().unwrap_or("(detached)"));
    ui::kv("Arch", &report.arch.to_string());
    ui::blank();
    for outcome in &report.outcomes {
        ui::success(&format!("{} -> {}", outcome.variant, outcome.image.tag));
        for tag in &outcome.pushed {
            ui::kv_ok("  pushed", tag);
        }
    }
}
