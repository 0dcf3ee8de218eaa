//! Basket CLI - drive the client state layer from a terminal.
//!
//! # Usage
//!
//! ```bash
//! # Sign in (password may also come from BASKET_PASSWORD)
//! basket login -e shopper@example.com -p hunter2
//!
//! # Add two shirts and list the cart
//! basket cart add --product prod-shirt --name "Linen Shirt" --price 25.00 -q 2
//! basket cart list
//!
//! # Inspect and replay mutations queued while offline
//! basket queue list
//! basket queue drain
//! ```
//!
//! # Commands
//!
//! - `login`, `register`, `magic-link`, `logout`, `whoami`, `refresh` - session
//! - `cart list|add|remove|update|clear` - the local cart, pushed upstream
//! - `queue list|drain` - the offline mutation queue
//!
//! Configuration comes from `BASKET_*` environment variables (see
//! `basket_client::config`). Set `SENTRY_DSN` to forward errors to Sentry.

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};
use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use basket_client::{ClientConfig, ClientContext};

mod commands;
mod error;

#[derive(Parser)]
#[command(name = "basket")]
#[command(author, version, about = "Basket client state CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in with email and password
    Login {
        /// Account email
        #[arg(short, long)]
        email: String,

        /// Account password
        #[arg(short, long, env = "BASKET_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Create an account and sign in
    Register {
        /// Account email
        #[arg(short, long)]
        email: String,

        /// Display name
        #[arg(short, long)]
        name: String,

        /// Account password
        #[arg(short, long, env = "BASKET_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Email a sign-in link
    MagicLink {
        /// Account email
        #[arg(short, long)]
        email: String,
    },
    /// Sign out and forget the local session
    Logout,
    /// Show the signed-in user
    Whoami,
    /// Exchange the refresh token for a new session
    Refresh,
    /// Manage the cart
    Cart {
        #[command(subcommand)]
        action: CartAction,
    },
    /// Inspect the offline mutation queue
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },
}

#[derive(Subcommand)]
enum CartAction {
    /// List line items and totals
    List,
    /// Add an item
    Add {
        /// Product reference
        #[arg(long)]
        product: String,

        /// Display name
        #[arg(long)]
        name: String,

        /// Unit price, e.g. 25.00
        #[arg(long)]
        price: String,

        /// Quantity to add
        #[arg(short, long, default_value_t = 1)]
        quantity: u32,

        /// Image URL
        #[arg(long, default_value = "")]
        image: String,

        /// Variant as `id:name:value`, e.g. `var-l:Size:L`
        #[arg(long)]
        variant: Option<String>,

        /// Keep the change local instead of pushing it upstream
        #[arg(long)]
        local: bool,
    },
    /// Remove a line item
    Remove {
        /// Line item id
        id: String,

        /// Keep the change local
        #[arg(long)]
        local: bool,
    },
    /// Set a line item's quantity (0 removes it)
    Update {
        /// Line item id
        id: String,

        /// New quantity
        #[arg(allow_negative_numbers = true)]
        quantity: i64,

        /// Keep the change local
        #[arg(long)]
        local: bool,
    },
    /// Empty the cart
    Clear {
        /// Keep the change local
        #[arg(long)]
        local: bool,
    },
}

#[derive(Subcommand)]
enum QueueAction {
    /// List queued operations
    List,
    /// Replay queued operations now
    Drain,
}

/// Initialize Sentry error tracking when `SENTRY_DSN` is set.
fn init_sentry() -> Option<sentry::ClientInitGuard> {
    let dsn = std::env::var("SENTRY_DSN").ok().filter(|dsn| !dsn.is_empty())?;

    let guard = sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            attach_stacktrace: true,
            ..Default::default()
        },
    ));
    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR => sentry_tracing::EventFilter::Event,
        tracing::Level::WARN | tracing::Level::INFO => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

#[tokio::main]
async fn main() {
    // Load .env before anything reads the environment
    let _ = dotenvy::dotenv();

    // Initialize Sentry (must be done before tracing subscriber)
    let _sentry_guard = init_sentry();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "basket_cli=info,basket_client=info".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = ClientConfig::from_env()?;
    let ctx = ClientContext::start(config).await?;

    let result = dispatch(&ctx, cli.command).await;
    ctx.shutdown().await;
    result
}

async fn dispatch(ctx: &ClientContext, command: Commands) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Login { email, password } => commands::auth::login(ctx, &email, password).await?,
        Commands::Register {
            email,
            name,
            password,
        } => commands::auth::register(ctx, &email, &name, password).await?,
        Commands::MagicLink { email } => commands::auth::magic_link(ctx, &email).await?,
        Commands::Logout => commands::auth::logout(ctx).await,
        Commands::Whoami => commands::auth::whoami(ctx),
        Commands::Refresh => commands::auth::refresh(ctx).await,
        Commands::Cart { action } => match action {
            CartAction::List => commands::cart::list(ctx),
            CartAction::Add {
                product,
                name,
                price,
                quantity,
                image,
                variant,
                local,
            } => {
                let item = commands::cart::new_item(
                    &product,
                    &name,
                    &price,
                    quantity,
                    image,
                    variant.as_deref(),
                )?;
                commands::cart::add(ctx, item, local).await?;
            }
            CartAction::Remove { id, local } => commands::cart::remove(ctx, &id, local).await?,
            CartAction::Update {
                id,
                quantity,
                local,
            } => commands::cart::update(ctx, &id, quantity, local).await?,
            CartAction::Clear { local } => commands::cart::clear(ctx, local).await?,
        },
        Commands::Queue { action } => match action {
            QueueAction::List => commands::queue::list(ctx).await?,
            QueueAction::Drain => commands::queue::drain(ctx).await?,
        },
    }
    Ok(())
}
