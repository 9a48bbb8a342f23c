use anyhow::Result;
use clap::CommandFactory as _;

mod app;
mod client;
mod config;
mod control_server;
mod device_watch;
mod events;
mod lifecycle;
mod locale;
mod notifier;
mod opts;
mod output;
mod paths;
mod scheduler;
mod server;
mod upstream;
mod util;
mod widgets;
mod worker;

fn main() {
    let opts: opts::Opt = opts::Opt::from_env();

    let log_level_filter = if opts.log_debug { log::LevelFilter::Debug } else { log::LevelFilter::Info };
    if std::env::var("RUST_LOG").is_ok() {
        pretty_env_logger::init_timed();
    } else {
        pretty_env_logger::formatted_timed_builder().filter(Some("barmux"), log_level_filter).init();
    }

    if let opts::Action::ShellCompletions { shell } = opts.action {
        clap_complete::generate(shell, &mut opts::RawOpt::command(), "barmux", &mut std::io::stdout());
        return;
    }

    if let Err(err) = run(opts) {
        eprintln!("{:?}", err);
        let code = match lifecycle::exit_code() {
            lifecycle::EXIT_OK => lifecycle::EXIT_SETUP,
            code => code,
        };
        std::process::exit(code);
    }
    std::process::exit(lifecycle::exit_code());
}

fn run(opts: opts::Opt) -> Result<()> {
    let config_file = match opts.config_path {
        Some(path) => path,
        None => paths::default_config_path()?,
    };
    match opts.action {
        opts::Action::ShellCompletions { .. } => unreachable!(),
        opts::Action::Run => server::initialize_server(config_file),
        opts::Action::Ctl(action) => {
            // clients still work without a configuration file; they only
            // need it for non-default socket locations
            let config = if config_file.exists() {
                config::BarConfig::read_from_file(&config_file)?
            } else {
                config::BarConfig::default()
            };
            let paths =
                paths::BarmuxPaths::new(config_file, config.general.socket_dir, config.general.socket_prefix)?;
            client::handle_ctl_action(&paths, action)
        }
    }
}
