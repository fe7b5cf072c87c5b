//! muxdeck
//!
//! Manage remote screen and tmux sessions over SSH.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use muxdeck::config::{default_config_path, Config};
use muxdeck::host::SshHost;
use muxdeck::protocol::{
    AssumeYes, AuthMethod, ConfirmPrompt, ConnectionSpec, SessionKey, SessionType, SurfaceFactory,
};
use muxdeck::session::{manual, SessionController, Topic};
use muxdeck::store::{DisplayMode, PreferenceStore, SessionStore};
use muxdeck::ui::{self, ConsoleSurfaceFactory, DeckSurfaceFactory, StdinPrompt};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// muxdeck - manage remote screen and tmux sessions over SSH.
#[derive(Parser, Debug)]
#[command(name = "muxdeck")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Remote host
    #[arg(short = 'H', long, global = true, value_name = "USER@HOST[:PORT]")]
    pub host: Option<String>,

    /// Private key for SSH authentication
    #[arg(short, long, global = true, value_name = "FILE", conflicts_with = "password_env")]
    pub identity: Option<PathBuf>,

    /// Environment variable holding the SSH password (requires sshpass)
    #[arg(long, global = true, value_name = "VAR")]
    pub password_env: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// List sessions in display order
    List {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Create a detached session
    Create {
        /// Session name
        name: String,

        /// Multiplexer (defaults to screen, or the only one installed)
        #[arg(long = "type", short = 't', value_name = "screen|tmux")]
        session_type: Option<SessionType>,

        /// Command to start inside the session
        #[arg(long)]
        command: Option<String>,
    },

    /// Kill one or more sessions
    Kill {
        /// Sessions as name, id or type:id
        #[arg(required = true)]
        sessions: Vec<String>,

        /// Skip the confirmation prompt
        #[arg(long, short)]
        yes: bool,
    },

    /// Rename a session
    Rename {
        /// Session as name, id or type:id
        session: String,

        /// New name
        new_name: String,
    },

    /// Create a copy of a session with its launch command and notes
    Duplicate {
        /// Session as name, id or type:id
        session: String,
    },

    /// Detach every other client from a session
    ForceDetach {
        /// Session as name, id or type:id
        session: String,
    },

    /// Set or clear a session note
    Note {
        /// Session as name, id or type:id
        session: String,

        /// Note text; omit to clear
        text: Option<String>,
    },

    /// Change a session's position in the list
    Move {
        /// Session as name, id or type:id
        session: String,

        /// Where to move it
        #[arg(value_enum)]
        direction: MoveDirection,
    },

    /// Attach to a session in this terminal (Ctrl-] detaches)
    Attach {
        /// Session as name, id or type:id
        session: String,
    },

    /// Show several sessions at once, laid out per the display preferences
    ///
    /// Without arguments the deck opens the auto-attached sessions or, if
    /// none, the first few listed. Ctrl-] then q leaves, Ctrl-] then n/p
    /// switches focus, Ctrl-] then d detaches the focused session.
    Deck {
        /// Sessions as name, id or type:id
        sessions: Vec<String>,
    },

    /// Install screen or tmux on the remote host
    Install {
        /// screen or tmux
        tool: SessionType,
    },

    /// Remove screen or tmux from the remote host
    Uninstall {
        /// screen or tmux
        tool: SessionType,

        /// Skip the confirmation prompt
        #[arg(long, short)]
        yes: bool,
    },

    /// Show or change display preferences
    Prefs {
        /// Terminals shown side by side (1-4)
        #[arg(long, value_name = "N")]
        terminals: Option<u8>,

        /// Layout
        #[arg(long, value_name = "split|tabs")]
        mode: Option<DisplayMode>,

        /// Attach sessions automatically on start
        #[arg(long, value_name = "BOOL")]
        auto_attach: Option<bool>,
    },

    /// Screen and tmux command reference
    Manual {
        /// Which multiplexer (defaults to both)
        tool: Option<SessionType>,

        /// Only one topic: sessions, windows, panes, copy or other
        #[arg(long, short = 't', value_name = "TOPIC")]
        topic: Option<Topic>,

        /// Only entries mentioning this text
        #[arg(long, short, value_name = "TEXT", conflicts_with = "topic")]
        search: Option<String>,
    },

    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Actions for `muxdeck config`.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigAction {
    /// Write a configuration file with every default spelled out
    Init {
        /// Replace an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration
    Show,
}

impl Commands {
    fn assume_yes(&self) -> bool {
        matches!(
            self,
            Commands::Kill { yes: true, .. } | Commands::Uninstall { yes: true, .. }
        )
    }
}

/// Direction for `muxdeck move`.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveDirection {
    /// One place up
    Up,
    /// One place down
    Down,
    /// To the top
    Top,
}

/// Parsed `user@host[:port]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Login user.
    pub user: String,
    /// Host name or address, without brackets.
    pub host: String,
    /// SSH port.
    pub port: u16,
}

/// Parses `user@host[:port]`; the user falls back to `$USER`.
fn parse_target(text: &str, default_port: u16) -> Result<Target> {
    let (user, rest) = match text.rsplit_once('@') {
        Some((user, rest)) => (user.to_string(), rest),
        None => (
            std::env::var("USER")
                .context("no user in host spec and $USER is not set")?,
            text,
        ),
    };
    if user.is_empty() {
        anyhow::bail!("empty user in host spec {text:?}");
    }

    let (host, port) = if let Some(bracketed) = rest.strip_prefix('[') {
        let (host, after) = bracketed
            .split_once(']')
            .with_context(|| format!("unterminated '[' in host spec {text:?}"))?;
        let port = match after.strip_prefix(':') {
            Some(port) => Some(port),
            None if after.is_empty() => None,
            None => anyhow::bail!("unexpected {after:?} after host in {text:?}"),
        };
        (host, port)
    } else {
        match rest.split_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (rest, None),
        }
    };
    if host.is_empty() {
        anyhow::bail!("empty host in host spec {text:?}");
    }

    let port = match port {
        Some(port) => port
            .parse::<u16>()
            .ok()
            .filter(|p| *p != 0)
            .with_context(|| format!("invalid port {port:?} in host spec {text:?}"))?,
        None => default_port,
    };

    Ok(Target {
        user,
        host: host.to_string(),
        port,
    })
}

fn connection_spec(cli: &Cli, config: &Config) -> Result<ConnectionSpec> {
    let text = cli
        .host
        .as_deref()
        .context("--host USER@HOST[:PORT] is required for this command")?;
    let target = parse_target(text, config.ssh.default_port)?;

    let auth = match (&cli.identity, &cli.password_env) {
        (Some(path), _) => AuthMethod::Key { path: path.clone() },
        (None, Some(var)) => AuthMethod::Password {
            credential_ref: var.clone(),
        },
        (None, None) => AuthMethod::Agent,
    };

    Ok(ConnectionSpec {
        id: format!("{}@{}:{}", target.user, target.host, target.port),
        host: target.host,
        port: target.port,
        user: target.user,
        auth,
    })
}

/// Installs the global subscriber. The guard must outlive `main`'s work.
fn init_tracing(config: &Config, verbose: bool) -> Result<Option<WorkerGuard>> {
    let level = if verbose {
        "debug"
    } else {
        config.general.log_level.as_str()
    };
    let filter = EnvFilter::new(level);

    match &config.general.log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
            let file_name = path
                .file_name()
                .with_context(|| format!("log_file has no file name: {}", path.display()))?;
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            Ok(None)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);

    // Runs before loading so a broken file can be replaced.
    if let Commands::Config {
        action: ConfigAction::Init { force },
    } = &cli.command
    {
        Config::init_file(&config_path, *force)?;
        println!("Wrote {}", config_path.display());
        return Ok(());
    }

    // Load configuration
    let mut config = Config::load(&config_path)?;
    config.apply_env_overrides();
    config.validate()?;

    let _log_guard = init_tracing(&config, cli.verbose)?;
    if let Some(path) = &cli.config {
        tracing::debug!("Using config file: {:?}", path);
    }

    match &cli.command {
        Commands::Prefs {
            terminals,
            mode,
            auto_attach,
        } => return run_prefs(&config, *terminals, *mode, *auto_attach),
        Commands::Manual {
            tool,
            topic,
            search,
        } => {
            print!("{}", render_manual(*tool, *topic, search.as_deref()));
            return Ok(());
        }
        Commands::Config { .. } => {
            print!("{}", config.to_toml()?);
            return Ok(());
        }
        _ => {}
    }

    let spec = connection_spec(&cli, &config)?;
    let host = Arc::new(SshHost::new(config.ssh.options()));
    host.register(spec.clone());

    let prompt: Arc<dyn ConfirmPrompt> = if cli.command.assume_yes() {
        Arc::new(AssumeYes)
    } else {
        Arc::new(StdinPrompt)
    };
    let data_dir = &config.general.data_dir;
    let preferences = Arc::new(PreferenceStore::open(data_dir)?);
    let deck = matches!(cli.command, Commands::Deck { .. }).then(|| {
        Arc::new(DeckSurfaceFactory::new(ui::deck_pane_size(
            &preferences.get(),
            ui::terminal_area(),
        )))
    });
    let surfaces: Arc<dyn SurfaceFactory> = match &deck {
        Some(panes) => panes.clone(),
        None => Arc::new(ConsoleSurfaceFactory),
    };
    let controller = Arc::new(SessionController::new(
        host,
        spec.clone(),
        SessionStore::open(data_dir, &spec.id)?,
        preferences,
        surfaces,
        prompt,
        config.controller_options(),
    ));

    tracing::info!(connection_id = %spec.id, "Connecting");
    let listed = match deck {
        Some(_) => controller.mount().await,
        None => controller.refresh().await,
    };
    listed.with_context(|| format!("Failed to list sessions on {}", spec.host))?;

    let result = match (cli.command, deck) {
        (Commands::Deck { sessions }, Some(panes)) => {
            run_deck(&controller, &panes, &sessions).await
        }
        (command, _) => run_command(&controller, command).await,
    };
    controller.unmount().await;
    result
}

async fn run_deck(
    controller: &SessionController,
    panes: &DeckSurfaceFactory,
    sessions: &[String],
) -> Result<()> {
    let keys = sessions
        .iter()
        .map(|q| resolve(controller, q))
        .collect::<Result<Vec<_>>>()?;
    ui::run_deck(controller, panes, &keys).await
}

/// Text for `muxdeck manual`.
fn render_manual(tool: Option<SessionType>, topic: Option<Topic>, search: Option<&str>) -> String {
    let tools: Vec<SessionType> = match tool {
        Some(tool) => vec![tool],
        None => SessionType::ALL.to_vec(),
    };

    let mut out = String::new();
    for tool in tools {
        let manual = manual(tool);
        match search {
            Some(query) => {
                let hits = manual.search(query);
                if !hits.is_empty() {
                    out.push_str(&manual.render_matches(&hits));
                }
            }
            None => {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(&manual.render(topic));
            }
        }
    }
    if out.is_empty() {
        if let Some(query) = search {
            out = format!("Nothing in the manual mentions {query:?}\n");
        }
    }
    out
}

fn resolve(controller: &SessionController, query: &str) -> Result<SessionKey> {
    controller
        .resolve(query)
        .map(|s| s.key())
        .with_context(|| format!("No session matches {query:?}"))
}

async fn run_command(controller: &Arc<SessionController>, command: Commands) -> Result<()> {
    match command {
        Commands::List { json } => {
            let attached: Vec<SessionKey> = controller
                .attached()
                .iter()
                .map(|a| a.session.key())
                .collect();
            let rows = ui::listings(
                &controller.sessions(),
                |id| controller.metadata(id),
                &attached,
                controller.timezone_offset(),
            );
            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                print!("{}", ui::render(&rows));
                let caps = controller.capabilities();
                println!(
                    "screen: {}  tmux: {}",
                    if caps.screen_available { "installed" } else { "missing" },
                    if caps.tmux_available { "installed" } else { "missing" },
                );
            }
        }
        Commands::Create {
            name,
            session_type,
            command,
        } => match controller
            .create(session_type, &name, command.as_deref())
            .await?
        {
            Some(session) => println!("Created {}", session.key()),
            None => println!("Created {name}; it is not listed yet"),
        },
        Commands::Kill { sessions, .. } => {
            let keys = sessions
                .iter()
                .map(|q| resolve(controller, q))
                .collect::<Result<Vec<_>>>()?;
            if controller.kill_many(&keys).await? {
                for key in &keys {
                    println!("Killed {key}");
                }
            } else {
                println!("Cancelled.");
            }
        }
        Commands::Rename { session, new_name } => {
            let key = resolve(controller, &session)?;
            let renamed = controller.rename(&key, &new_name).await?;
            println!("Renamed {key} to {renamed}");
        }
        Commands::Duplicate { session } => {
            let key = resolve(controller, &session)?;
            match controller.duplicate(&key).await? {
                Some(copy) => println!("Created {} ({})", copy.key(), copy.name),
                None => println!("Created a copy of {key}; it is not listed yet"),
            }
        }
        Commands::ForceDetach { session } => {
            let key = resolve(controller, &session)?;
            controller.force_detach_remote(&key).await?;
            println!("Detached other clients from {key}");
        }
        Commands::Note { session, text } => {
            let key = resolve(controller, &session)?;
            controller.set_note(&key, text.as_deref())?;
            match text.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
                Some(_) => println!("Saved note for {key}"),
                None => println!("Cleared note for {key}"),
            }
        }
        Commands::Move { session, direction } => {
            let key = resolve(controller, &session)?;
            let moved = match direction {
                MoveDirection::Up => controller.move_up(&key)?,
                MoveDirection::Down => controller.move_down(&key)?,
                MoveDirection::Top => controller.pin_to_top(&key)?,
            };
            if !moved {
                println!("{key} cannot move further");
            }
        }
        Commands::Attach { session } => {
            let key = resolve(controller, &session)?;
            ui::run_attach(controller, &key).await?;
        }
        Commands::Install { tool } => {
            let manager = controller.install(tool).await?;
            println!("Installed {tool} with {}", manager.binary());
        }
        Commands::Uninstall { tool, .. } => {
            if controller.uninstall(tool).await? {
                println!("Uninstalled {tool}");
            } else {
                println!("Cancelled.");
            }
        }
        Commands::Deck { .. } => anyhow::bail!("deck needs a deck surface factory"),
        Commands::Prefs { .. } | Commands::Manual { .. } | Commands::Config { .. } => {
            anyhow::bail!("this command does not use a remote connection")
        }
    }
    Ok(())
}

fn run_prefs(
    config: &Config,
    terminals: Option<u8>,
    mode: Option<DisplayMode>,
    auto_attach: Option<bool>,
) -> Result<()> {
    let store = PreferenceStore::open(&config.general.data_dir)?;
    let prefs = if terminals.is_some() || mode.is_some() || auto_attach.is_some() {
        store.update(|p| {
            if let Some(n) = terminals {
                p.terminal_count = n;
            }
            if let Some(m) = mode {
                p.display_mode = m;
            }
            if let Some(a) = auto_attach {
                p.auto_attach = a;
            }
        })?
    } else {
        store.get()
    };

    println!("terminals:   {}", prefs.terminal_count);
    println!("mode:        {}", prefs.display_mode);
    println!("auto-attach: {}", prefs.auto_attach);
    println!("visible:     {}", prefs.visible_slots());
    Ok(())
}
