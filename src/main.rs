//! OpenEBS upgrade helper entry point
//!
//! Exposes image rewriting and patch generation to upgrade jobs and scripts.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use openebs_upgrade::{image, manifest, patch, Error, PatchFormat};
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "openebs-upgrade-helper", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the image reference to roll out for an upgrade
    Image {
        /// Current image reference, e.g. quay.io/openebs/jiva:1.2.0
        url: String,

        /// Registry directory the image is relocated under
        #[arg(long, env = "IMAGE_URL_PREFIX", default_value = "")]
        prefix: String,

        /// Version tag appended to the rewritten reference
        #[arg(long)]
        to_version: Option<String>,
    },
    /// Print the patch turning OLD into NEW
    Patch {
        old: PathBuf,
        new: PathBuf,

        #[arg(long, env = "PATCH_FORMAT", default_value_t = PatchFormat::Strategic)]
        format: PatchFormat,
    },
}

fn run(command: Command) -> Result<String, Error> {
    match command {
        Command::Image {
            url,
            prefix,
            to_version,
        } => match to_version {
            Some(tag) => image::upgraded_image(&url, &prefix, &tag),
            None => image::rewrite_image_url(&url, &prefix),
        },
        Command::Patch { old, new, format } => {
            let old_obj = manifest::load_object(&old)?;
            let new_obj = manifest::load_object(&new)?;
            let bytes = patch::compute_patch_as(format, &old_obj, &new_obj)?;
            if patch::is_empty_patch(&bytes) {
                info!(old = %old.display(), new = %new.display(), "objects are identical");
            }
            info!(content_type = format.content_type(), "patch computed");
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }
    }
}

fn main() -> Result<(), Error> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    // stdout carries the result, logs go to stderr
    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    let cli = Cli::parse();

    match run(cli.command) {
        Ok(output) => {
            println!("{output}");
            Ok(())
        }
        Err(e) => {
            error!(kind = e.kind(), "{}", e);
            Err(e)
        }
    }
}
