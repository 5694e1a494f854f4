use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use domain::{Tab, TodoId};
use shared::{init_tracing, ClientConfig, LogFormat};
use std::sync::Arc;
use todo_client::{FileStorage, GuardState, Notification, TodoApp, TokenCheck};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Parser)]
#[command(name = "todo", version, about = "Manage your todos from the terminal")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create an account
    Signup {
        #[arg(long)]
        email: String,
        #[arg(long, env = "TODO_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long)]
        name: Option<String>,
    },
    /// Sign in and remember the session
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "TODO_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Forget the stored session
    Logout,
    /// Show the signed-in user
    Whoami,
    /// List todos
    List {
        /// Case-insensitive title filter
        #[arg(long, short)]
        query: Option<String>,
        #[arg(long, default_value = "all")]
        tab: Tab,
    },
    /// Add a todo
    Add { title: String },
    /// Rename a todo
    Rename { id: String, title: String },
    /// Toggle a todo between pending and completed
    Toggle { id: String },
    /// Delete a todo after the undo window
    Rm {
        id: String,
        /// Cancel the deletion right away
        #[arg(long)]
        undo: bool,
    },
    /// Validate the stored token and show the guard decision
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing(LogFormat::Compact).map_err(|e| anyhow!(e))?;

    let cli = Cli::parse();
    let config = ClientConfig::from_env()?;
    let storage = Arc::new(FileStorage::open(&config.state_dir)?);
    debug!(path = %storage.path().display(), "状態ファイル");

    let app = TodoApp::with_storage(config, storage, Arc::new(print_notification))?;
    run(&app, cli.command).await
}

fn print_notification(notification: Notification) {
    let marker = if notification.is_error() { "!" } else { "*" };
    match notification.description {
        Some(description) => println!("{marker} {}: {description}", notification.title),
        None => println!("{marker} {}", notification.title),
    }
}

async fn run(app: &TodoApp, command: Commands) -> Result<()> {
    match command {
        Commands::Signup {
            email,
            password,
            name,
        } => {
            app.session.signup(&email, &password, name.as_deref()).await?;
        }
        Commands::Login { email, password } => {
            let user = app.session.login(&email, &password).await?;
            println!("Signed in as {}", user.email);
        }
        Commands::Logout => {
            app.session.logout();
            println!("Signed out");
        }
        Commands::Check => {
            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_interrupt.cancel();
                }
            });

            let check = app.session.validate_token(&cancel).await;
            println!("token: {check:?}");
            if check == TokenCheck::Cancelled {
                return Ok(());
            }
            let state = protect(app)?;
            println!("guard: {state:?}");
        }
        command => {
            protect(app)?;
            run_protected(app, command).await?;
        }
    }
    Ok(())
}

/// ルートガードを通す。未認証ならリダイレクト先を表示して失敗させる
fn protect(app: &TodoApp) -> Result<GuardState> {
    let mut guard = app.guard(|path: &str| eprintln!("Not signed in, redirecting to {path}"));
    match guard.restore(&app.credentials) {
        GuardState::Authenticated => Ok(GuardState::Authenticated),
        state => bail!("session required (guard state: {state:?})"),
    }
}

async fn run_protected(app: &TodoApp, command: Commands) -> Result<()> {
    if let Commands::Whoami = command {
        let session = app.session.state();
        match session.user {
            Some(user) => println!("{} ({})", user.email, user.name.as_deref().unwrap_or("-")),
            None => println!("signed in without a cached profile"),
        }
        return Ok(());
    }

    app.todos.refresh().await?;

    match command {
        Commands::List { query, tab } => {
            let view = app.todos.view(query.as_deref().unwrap_or(""), tab);
            println!(
                "all {} / pending {} / completed {}",
                view.counts.all, view.counts.pending, view.counts.completed
            );
            for todo in view.items {
                let mark = if todo.completed { "x" } else { " " };
                println!("[{mark}] {}  {}", todo.id, todo.title);
            }
        }
        Commands::Add { title } => {
            let todo = app.todos.create(&title).await?;
            println!("{}", todo.id);
        }
        Commands::Rename { id, title } => {
            let id = TodoId::parse(&id)?;
            if !app.todos.rename(&id, &title).await? {
                println!("Nothing to change");
            }
        }
        Commands::Toggle { id } => {
            let id = TodoId::parse(&id)?;
            app.todos.toggle(&id).await?;
        }
        Commands::Rm { id, undo } => {
            let id = TodoId::parse(&id)?;
            app.todos.delete(&id)?;
            if undo {
                if app.todos.undo_delete(&id) {
                    println!("Deletion cancelled");
                }
            } else {
                println!("Deleting in {}s, press Ctrl-C to keep it", app.todos.grace().as_secs());
                tokio::select! {
                    _ = app.todos.settle() => {}
                    _ = tokio::signal::ctrl_c() => {
                        if app.todos.undo_delete(&id) {
                            println!("Deletion cancelled");
                        }
                    }
                }
            }
        }
        _ => {}
    }
    Ok(())
}
