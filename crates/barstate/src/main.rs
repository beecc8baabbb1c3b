use anyhow::{Context, Result};
use barstate::paths::BarPaths;
use clap::CommandFactory as _;

mod opts;
mod server;

fn main() {
    let opts: opts::Opt = opts::Opt::from_env();

    let log_level_filter = if opts.log_debug { log::LevelFilter::Debug } else { log::LevelFilter::Info };
    if std::env::var("RUST_LOG").is_ok() {
        pretty_env_logger::init_timed();
    } else {
        pretty_env_logger::formatted_timed_builder()
            .filter(Some("barstate"), log_level_filter)
            .filter(Some("barstate_shared_util"), log_level_filter)
            .init();
    }

    if let opts::Action::ShellCompletions { shell } = opts.action {
        clap_complete::generate(shell, &mut opts::RawOpt::command(), "barstate", &mut std::io::stdout());
        return;
    }

    if let Err(err) = run(opts) {
        log::error!("{:?}", err);
        std::process::exit(1);
    }
}

fn run(opts: opts::Opt) -> Result<()> {
    let paths = opts
        .config_path
        .map(BarPaths::from_config_dir)
        .unwrap_or_else(BarPaths::default)
        .context("Failed to initialize barstate paths")?;

    match opts.action {
        opts::Action::ShellCompletions { .. } => unreachable!(),
        opts::Action::Daemon => server::run_daemon(paths),
        opts::Action::Cached { module } => server::print_cached(&paths, &module),
        opts::Action::ListModules => server::print_modules(&paths),
    }
}
