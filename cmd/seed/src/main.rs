//! Loads a demo listing with a buyer and a seller into Postgres and prints a
//! bearer token for each, so the API can be exercised by hand.

use anyhow::Context;
use auth_adapters::JwtIdentity;
use configs::Settings;
use domains::{ListingId, UserId, UserProfile};
use secrecy::ExposeSecret;
use serde_json::json;
use storage_adapters::{PgListingDirectory, PgUserDirectory};
use tracing_subscriber::EnvFilter;

const SELLER: &str = "seller-demo";
const BUYER: &str = "buyer-demo";
const LISTING: &str = "listing-demo";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Settings::load().context("loading settings")?;
    let pool = storage_adapters::postgres::connect(
        settings.database.url.expose_secret(),
        settings.database.max_connections,
    )
    .await?;

    let users = PgUserDirectory::new(pool.clone());
    for (id, name) in [(SELLER, "Sam Seller"), (BUYER, "Bea Buyer")] {
        users
            .upsert(&UserProfile {
                id: UserId::new(id),
                display_name: name.into(),
                avatar_url: None,
            })
            .await?;
    }

    PgListingDirectory::new(pool)
        .upsert_document(
            &ListingId::new(LISTING),
            &json!({
                "title": "Two-bedroom flat with balcony",
                "images": ["listings/demo/front.jpg", "listings/demo/balcony.jpg"],
                "price": 1250.0,
                "currency": "EUR",
                "city": "Nantes",
                "owner": SELLER,
            }),
        )
        .await?;
    tracing::info!(listing = LISTING, "seed data written");

    let jwt = JwtIdentity::new(
        settings.auth.jwt_secret.expose_secret(),
        settings.auth.issuer.clone(),
        settings.auth.token_ttl_secs,
    )?;
    for user in [SELLER, BUYER] {
        println!("{user}: {}", jwt.issue(&UserId::new(user))?);
    }
    Ok(())
}
