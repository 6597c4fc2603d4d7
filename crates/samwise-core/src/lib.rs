pub mod action;
pub mod backend;
pub mod calendar;
pub mod cli;
pub mod commands;
pub mod config;
pub mod datetime;
pub mod error;
pub mod focus;
pub mod model;
pub mod reducer;
pub mod render;
pub mod state;
pub mod store;
pub mod sync;

use std::ffi::OsString;

use anyhow::Context;
use clap::Parser;
use tracing::{
  debug,
  info
};

pub use error::SyncError;
pub use state::State;
pub use store::{
  Session,
  SharedStore,
  Store
};
pub use sync::SyncCoordinator;

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let pre =
    cli::preprocess_args(&raw_args)?;
  let cli = cli::GlobalCli::parse_from(
    pre.cleaned_args
  );

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting samwise CLI"
  );
  debug!(
    overrides = pre.rc_overrides.len(),
    "preprocessed rc overrides"
  );

  let mut cfg = config::Config::load(
    cli.samwiserc.as_deref()
  )?;
  cfg.apply_overrides(
    pre.rc_overrides.into_iter().chain(
      cli
        .rc_overrides
        .into_iter()
        .map(|kv| (kv.key, kv.value))
    )
  );

  let data_dir = config::resolve_data_dir(
    &cfg,
    cli.data.as_deref()
  )
  .context(
    "failed to resolve data directory"
  )?;

  let timezone = datetime::resolve_timezone(
    cfg.get("timezone").as_deref()
  );
  let renderer = render::Renderer::new(&cfg);
  let command =
    cli.command.unwrap_or(cli::Command::Backlog {
      mode:   None,
      offset: 0,
      all:    false
    });

  commands::execute(
    &cfg,
    &data_dir,
    timezone,
    &renderer,
    command
  )?;

  info!("done");
  Ok(())
}
