use clap::{Parser, Subcommand};

use barmux_protocol::{CtlCommand, CtlRequest, BUTTON_LEFT};

/// Struct that gets generated from `RawOpt`.
#[derive(Debug, PartialEq)]
pub struct Opt {
    pub log_debug: bool,
    pub config_path: Option<std::path::PathBuf>,
    pub action: Action,
}

#[derive(Parser, Debug, PartialEq)]
#[command(version, about)]
pub struct RawOpt {
    /// Write out debug logs.
    #[arg(long = "debug", global = true)]
    log_debug: bool,

    /// Override the path to the configuration file.
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    action: Option<Action>,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Action {
    /// Run the status line on stdout. This is the default.
    #[command(name = "run")]
    Run,

    #[command(flatten)]
    Ctl(ActionCtl),

    /// Print a shell completion script.
    #[command(name = "shell-completions")]
    ShellCompletions {
        #[arg(short, long)]
        shell: clap_complete::shells::Shell,
    },
}

/// Actions sent to the control sockets of running bars.
#[derive(Subcommand, Debug, PartialEq)]
pub enum ActionCtl {
    /// Refresh the given modules in all running bars.
    #[command(name = "refresh", alias = "r")]
    Refresh {
        /// Modules to refresh, as `name` or `"name instance"`.
        #[arg(required = true)]
        modules: Vec<String>,
    },

    /// Refresh every module in all running bars.
    #[command(name = "refresh-all", alias = "ra")]
    RefreshAll,

    /// Send a click event to a module, as if it had been clicked on the bar.
    #[command(name = "click")]
    Click {
        /// Target module, as `name` or `"name instance"`.
        module: String,

        /// Mouse button number of the synthesized event.
        #[arg(short, long, default_value_t = BUTTON_LEFT)]
        button: u32,
    },

    /// Check whether any bar is running.
    #[command(name = "ping")]
    Ping,
}

impl Opt {
    pub fn from_env() -> Self {
        let raw: RawOpt = RawOpt::parse();
        raw.into()
    }
}

impl From<RawOpt> for Opt {
    fn from(other: RawOpt) -> Self {
        let RawOpt { action, log_debug, config } = other;
        Opt { action: action.unwrap_or(Action::Run), log_debug, config_path: config }
    }
}

impl ActionCtl {
    /// The wire request this action sends, or `None` for a pure probe.
    pub fn into_ctl_request(self) -> Option<CtlRequest> {
        let request = match self {
            ActionCtl::Refresh { modules } => {
                CtlRequest { command: CtlCommand::Refresh, module: modules, button: None, extra: Default::default() }
            }
            ActionCtl::RefreshAll => {
                CtlRequest { command: CtlCommand::RefreshAll, module: Vec::new(), button: None, extra: Default::default() }
            }
            ActionCtl::Click { module, button } => CtlRequest {
                command: CtlCommand::Click,
                module: vec![module],
                button: Some(button),
                extra: Default::default(),
            },
            ActionCtl::Ping => return None,
        };
        Some(request)
    }
}
