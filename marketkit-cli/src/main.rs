//! `marketkit`: developer CLI over `marketkit-core`.
//!
//! The session is kept in a JSON file between invocations, so `login` once
//! and then call the API, inspect notifications, or `listen` for live events.

use std::{path::PathBuf, process::ExitCode, sync::Arc};

use clap::{Parser, Subcommand};
use eyre::{eyre, WrapErr};
use marketkit_core::{
    events::ClientEvent,
    gateway::{ApiRequest, Method},
    session::Role,
    storage::FileStore,
    ClientConfig, Environment, LoginCredentials, MarketClient,
};
use tracing_subscriber::{layer::SubscriberExt, EnvFilter};

/// MarketKit developer CLI
#[derive(Parser, Debug)]
#[command(name = "marketkit", version, about)]
struct Cli {
    /// Hosted environment to talk to.
    #[arg(long, env = "MARKETKIT_ENV", default_value = "production")]
    env: Environment,

    /// Override the API base URL.
    #[arg(long, env = "MARKETKIT_API_URL")]
    api_url: Option<String>,

    /// Override the realtime WebSocket URL.
    #[arg(long, env = "MARKETKIT_WS_URL")]
    ws_url: Option<String>,

    /// Where the session is persisted.
    #[arg(long, env = "MARKETKIT_SESSION_FILE")]
    session_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in and persist the session.
    Login {
        /// Account role.
        #[arg(long, default_value = "user")]
        role: Role,
        /// Account email.
        #[arg(long)]
        email: String,
        /// Account password.
        #[arg(long, env = "MARKETKIT_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Sign out and erase the persisted session.
    Logout,
    /// Print the current session.
    Session,
    /// Send an authenticated API request and print the response.
    Request {
        /// HTTP method.
        #[arg(long, short = 'X', default_value = "GET")]
        method: Method,
        /// Path under the API base URL, e.g. `/orders`.
        path: String,
        /// JSON body.
        #[arg(long)]
        body: Option<String>,
    },
    /// Inspect and acknowledge notifications.
    #[command(subcommand)]
    Notifications(NotificationsCommand),
    /// Connect the realtime channel and print events until interrupted.
    Listen,
}

#[derive(Subcommand, Debug)]
enum NotificationsCommand {
    /// Fetch and print all notifications.
    List,
    /// Print the unread count.
    Unread,
    /// Mark one notification read.
    Read {
        /// Notification id.
        id: String,
    },
    /// Mark every notification read.
    ReadAll,
}

impl Cli {
    fn config(&self) -> eyre::Result<ClientConfig> {
        let mut config = ClientConfig::from_environment(&self.env);
        if let Some(api_url) = &self.api_url {
            config.api_base_url = api_url.trim_end_matches('/').to_string();
        }
        if let Some(ws_url) = &self.ws_url {
            config.realtime_url.clone_from(ws_url);
        }
        config.validate()?;
        Ok(config)
    }

    fn session_file(&self) -> eyre::Result<PathBuf> {
        if let Some(path) = &self.session_file {
            return Ok(path.clone());
        }
        dirs::data_dir()
            .map(|dir| dir.join("marketkit").join(format!("{}.session.json", self.env)))
            .ok_or_else(|| eyre!("no data directory; pass --session-file"))
    }
}

fn init_tracing() {
    if let Err(e) = tracing_log::LogTracer::init() {
        eprintln!("log bridge already installed: {e}");
    }
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr));
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("tracing already initialized: {e}");
    }
}

fn print_json(value: &serde_json::Value) -> eyre::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn session_json(client: &MarketClient) -> serde_json::Value {
    let session = client.session();
    serde_json::json!({
        "authenticated": session.is_authenticated(),
        "role": session.role().map(|role| role.to_string()),
        "active": session.account_active(),
        "blockReason": session.block_reason(),
    })
}

async fn run(cli: Cli) -> eyre::Result<()> {
    let path = cli.session_file()?;
    let storage = FileStore::open(&path)
        .wrap_err_with(|| format!("opening session file {}", path.display()))?;
    let client = MarketClient::new(cli.config()?, Arc::new(storage))?;
    tracing::debug!(?path, "session file");

    match cli.command {
        Command::Login {
            role,
            email,
            password,
        } => {
            client
                .login(role, &LoginCredentials { email, password })
                .await?;
            print_json(&session_json(&client))?;
        }
        Command::Logout => {
            client.logout().await;
            println!("signed out");
        }
        Command::Session => print_json(&session_json(&client))?,
        Command::Request { method, path, body } => {
            let mut request = ApiRequest::new(method, path);
            if let Some(body) = body {
                let body: serde_json::Value =
                    serde_json::from_str(&body).wrap_err("--body is not valid JSON")?;
                request = request.json(&body)?;
            }
            let response = client.send(request).await?;
            eprintln!("HTTP {}", response.status());
            match response.json::<serde_json::Value>() {
                Ok(json) => print_json(&json)?,
                Err(_) => println!("{}", response.text()),
            }
        }
        Command::Notifications(command) => notifications(&client, command).await?,
        Command::Listen => listen(&client).await?,
    }
    Ok(())
}

async fn notifications(client: &MarketClient, command: NotificationsCommand) -> eyre::Result<()> {
    let ledger = client.ledger();
    match command {
        NotificationsCommand::List => {
            for notification in ledger.fetch().await? {
                let marker = if notification.is_read { ' ' } else { '*' };
                println!(
                    "{marker} {}  {}  {}",
                    notification.created_at.format("%Y-%m-%d %H:%M"),
                    notification.id,
                    notification.title
                );
            }
        }
        NotificationsCommand::Unread => println!("{}", ledger.sync_unread_count().await?),
        NotificationsCommand::Read { id } => {
            println!("{:?}", ledger.mark_read(&id).await);
        }
        NotificationsCommand::ReadAll => println!("{:?}", ledger.mark_all_read().await),
    }
    Ok(())
}

async fn listen(client: &MarketClient) -> eyre::Result<()> {
    if !client.session().is_authenticated() {
        return Err(eyre!("not signed in; run `marketkit login` first"));
    }
    let mut events = client.events().subscribe();
    let mut state = client.realtime().subscribe_state();
    client.connect_realtime();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                eprintln!("channel: {:?}", *state.borrow_and_update());
            }
            event = events.recv() => match event {
                Ok(ClientEvent::Alert(alert)) => {
                    println!("[{:?}] {}: {}", alert.level, alert.title, alert.message);
                }
                Ok(ClientEvent::Navigate(route)) => {
                    println!("-> {route:?}");
                    break;
                }
                Err(e) => tracing::warn!("event stream: {e}"),
            },
        }
    }
    client.realtime().stop();
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
