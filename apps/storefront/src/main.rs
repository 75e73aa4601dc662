use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use client_core::{
    config::normalize_database_url, load_settings, FeedState, FeedStatus, ProductFeedController,
    SignInOutcome, Storefront,
};
use shared::domain::{ProductId, SortOrder};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Cli {
    /// Overrides the configured backend api url.
    #[arg(long)]
    api_url: Option<String>,
    #[arg(long)]
    database_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Login {
        email: String,
        #[arg(long)]
        password: String,
    },
    Verify {
        email: String,
        otp: String,
    },
    Logout,
    Whoami,
    Products {
        #[arg(long)]
        search: Option<String>,
        #[arg(long, default_value = "asc")]
        order: SortOrder,
        #[arg(long, default_value_t = 1)]
        pages: u32,
    },
    Product {
        id: String,
    },
    CartTotal {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    Profile,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let mut settings = load_settings();
    if let Some(api_url) = cli.api_url {
        settings.api_base_url = api_url;
    }
    if let Some(database_url) = cli.database_url {
        settings.database_url = normalize_database_url(&database_url);
    }
    let storefront = Storefront::open(&settings).await?;

    match cli.command {
        Command::Login { email, password } => {
            match storefront.sign_in(&email, &password).await? {
                SignInOutcome::SignedIn => println!("signed in as {email}"),
                SignInOutcome::VerificationRequired { email } => {
                    println!("email not verified; a new code was sent to {email}");
                    println!("run `storefront verify {email} <code>` and log in again");
                }
            }
        }
        Command::Verify { email, otp } => {
            storefront.verify_otp(&email, &otp).await?;
            println!("email verified, you can log in now");
        }
        Command::Logout => {
            storefront.sign_out().await;
            println!("signed out");
        }
        Command::Whoami => {
            if !storefront.session().is_authenticated() {
                println!("signed out");
            } else {
                match storefront.session().user_id() {
                    Some(user_id) => println!("signed in, user_id={user_id}"),
                    None => println!("signed in"),
                }
            }
        }
        Command::Products {
            search,
            order,
            pages,
        } => {
            let feed = storefront.feed().await?;
            let state = load_products(&feed, search, order, pages).await?;
            for product in &state.items {
                println!(
                    "{}\t{}\t{:.2}\t{}",
                    product.id,
                    product.title,
                    product.price,
                    storefront.resolve_image_url(product.primary_image())
                );
            }
            println!(
                "page {}/{} ({} items total)",
                state.pagination.current_page,
                state.pagination.total_pages,
                state.pagination.total_items
            );
            feed.shutdown().await;
        }
        Command::Product { id } => {
            let id = ProductId::new(id);
            let product = storefront.product(&id).await?;
            println!("{} ({:.2})", product.title, product.price);
            if !product.description.is_empty() {
                println!("{}", product.description);
            }
            if let Some(location) = &product.location {
                println!("location: {}", location.name);
            }
            println!("image: {}", storefront.resolve_image_url(product.primary_image()));
            println!("share: {}", storefront.product_share_url(&product.id));
            if storefront.is_own_product(&product) {
                println!("you own this listing");
            }
        }
        Command::CartTotal { ids } => {
            for id in ids {
                storefront.cart().add_to_cart(ProductId::new(id));
            }
            let summary = storefront.cart_summary().await?;
            for line in &summary.lines {
                println!(
                    "{}\tx{}\t{:.2}",
                    line.product.title,
                    line.quantity,
                    line.subtotal()
                );
            }
            for (id, err) in &summary.unresolved {
                eprintln!("skipped {id}: {err}");
            }
            println!("total: {:.2}", summary.total);
        }
        Command::Profile => {
            let profile = storefront.profile().await?;
            println!("{} <{}>", profile.display_name(), profile.email);
            if !profile.is_email_verified {
                println!("email not verified");
            }
        }
    }

    Ok(())
}

async fn load_products(
    feed: &ProductFeedController,
    search: Option<String>,
    order: SortOrder,
    pages: u32,
) -> Result<FeedState> {
    if let Some(term) = search {
        info!(term = %term, "products: searching");
        feed.submit_query(term, order).await;
    } else {
        feed.set_sort_order(order).await;
        if feed.snapshot().status == FeedStatus::Idle {
            feed.load_initial().await;
        }
    }

    let mut state = feed.snapshot();
    for _ in 1..pages {
        if !state.can_load_more() {
            break;
        }
        feed.load_more().await;
        state = feed.snapshot();
    }

    if state.status == FeedStatus::Error {
        let message = state
            .error
            .as_ref()
            .map(|failure| failure.message.clone())
            .unwrap_or_default();
        bail!("failed to load products: {message}");
    }
    if let Some(failure) = &state.load_more_error {
        eprintln!("stopped early: {}", failure.message);
    }
    Ok(state)
}
