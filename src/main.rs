use std::sync::Arc;

use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;

#[macro_use]
mod utils;

mod admin;
mod applemusic;
mod config;
mod crypto;
mod error;
mod guard;
mod logging;
mod models;
mod news;
mod posts;
mod service;
mod spotify;
mod stats;
mod store;
mod token;

pub use error::{Error, Result};
pub use logging::LOG;

#[derive(Parser, Debug)]
#[command(name = "music-dashboard", about = "Music dashboard api server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the http api (default)
    Serve,
    /// Promote an existing account to admin
    GrantAdmin {
        #[arg(long)]
        email: String,
        /// must match ADMIN_SECRET_CODE
        #[arg(long)]
        code: String,
    },
}

#[async_std::main]
async fn main() -> anyhow::Result<()> {
    // try sourcing a .env and server/.env if either exist
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config = config::Config::load()?;
    config.initialize();

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    let store: Arc<dyn store::Store> = Arc::new(store::PgStore::new(pool, config.enc_key.clone()));

    match cli.command.unwrap_or(Command::Serve) {
        Command::GrantAdmin { email, code } => {
            let user = admin::grant_admin(
                store.as_ref(),
                config.admin_secret_code.as_deref(),
                &email,
                &code,
            )
            .await?;
            println!("{} <{}> is now an admin", user.name, user.email);
            Ok(())
        }
        Command::Serve => {
            let api = Arc::new(spotify::SpotifyHttp::new(
                &config.spotify,
                config.provider_timeout,
            ));
            let ctx = service::Context {
                codec: token::TokenCodec::new(&config.session_secret)?,
                spotify: Arc::new(spotify::SpotifyConnector::new(
                    api,
                    store.clone(),
                    &config.spotify,
                )),
                apple: Arc::new(applemusic::AppleMusicConnector::new(
                    store.clone(),
                    &config.apple_music,
                )),
                news: Arc::new(news::NewsClient::new(
                    config.news_api_key.clone(),
                    config.provider_timeout,
                )),
                version: config.version.clone(),
                store,
            };
            service::start(ctx, &config).await
        }
    }
}
