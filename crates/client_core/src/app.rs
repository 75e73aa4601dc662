//! Composition root wiring the session, cart and feed stores to the
//! storefront backend.

use std::sync::{Arc, Weak};

use anyhow::{Context, Result};
use shared::{
    domain::{Product, ProductId, UserProfile},
    protocol::{ProductDraft, ProfileUpdate, SignupRequest},
};
use storage::Storage;
use tokio::{
    sync::{broadcast::error::RecvError, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    cart::{price_cart, CartAggregate, CartSummary},
    catalog::{AssetUrls, AuthApi, HttpStorefrontApi, ProductCatalogApi, ProfileApi},
    config::ClientSettings,
    error::{CatalogError, FeedFailure},
    feed::{FeedOptions, ProductFeedController},
    session::{SessionStore, Token},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationGraph {
    Auth,
    Main,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignInOutcome {
    SignedIn,
    /// The account exists but its email is unverified; a fresh code was sent.
    VerificationRequired { email: String },
}

pub struct StorefrontServices {
    pub catalog: Arc<dyn ProductCatalogApi>,
    pub auth: Arc<dyn AuthApi>,
    pub profile: Arc<dyn ProfileApi>,
}

impl StorefrontServices {
    pub fn http(api: Arc<HttpStorefrontApi>) -> Self {
        Self {
            catalog: api.clone(),
            auth: api.clone(),
            profile: api,
        }
    }
}

struct MountedFeed {
    controller: Arc<ProductFeedController>,
    authorization_watch: Option<JoinHandle<()>>,
}

impl MountedFeed {
    async fn unmount(self) {
        self.controller.shutdown().await;
        if let Some(watch) = self.authorization_watch {
            watch.abort();
        }
    }
}

pub struct Storefront {
    session: Arc<SessionStore>,
    cart: CartAggregate,
    services: StorefrontServices,
    assets: AssetUrls,
    feed_options: FeedOptions,
    logout_on_authorization_error: bool,
    mounted_feed: Mutex<Option<MountedFeed>>,
}

impl Storefront {
    pub fn new(
        session: Arc<SessionStore>,
        services: StorefrontServices,
        assets: AssetUrls,
        settings: &ClientSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            session,
            cart: CartAggregate::new(),
            services,
            assets,
            feed_options: settings.feed_options(),
            logout_on_authorization_error: settings.logout_on_authorization_error,
            mounted_feed: Mutex::new(None),
        })
    }

    /// Opens the sqlite store, restores the persisted session and connects
    /// the HTTP backend.
    pub async fn open(settings: &ClientSettings) -> Result<Arc<Self>> {
        let storage = Storage::new(&settings.database_url)
            .await
            .with_context(|| format!("failed to open storage at '{}'", settings.database_url))?;
        storage
            .health_check()
            .await
            .context("session storage is not usable")?;
        let session = Arc::new(SessionStore::restore(Arc::new(storage)).await);
        let api = Arc::new(HttpStorefrontApi::new(
            &settings.api_base_url,
            settings.request_timeout(),
        )?);
        let assets = AssetUrls::new(&settings.asset_base_url)?;
        info!(
            api = %settings.api_base_url,
            authenticated = session.is_authenticated(),
            "storefront: opened"
        );
        Ok(Self::new(
            session,
            StorefrontServices::http(api),
            assets,
            settings,
        ))
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    pub fn cart(&self) -> &CartAggregate {
        &self.cart
    }

    pub fn assets(&self) -> &AssetUrls {
        &self.assets
    }

    pub fn navigation_graph(&self) -> NavigationGraph {
        if self.session.is_authenticated() {
            NavigationGraph::Main
        } else {
            NavigationGraph::Auth
        }
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<SignInOutcome, CatalogError> {
        match self.services.auth.login(email, password).await {
            Ok(pair) => {
                self.session
                    .login(pair.access_token, pair.refresh_token)
                    .await;
                Ok(SignInOutcome::SignedIn)
            }
            Err(err) if err.requires_email_verification() => {
                info!(email, "storefront: email not verified, sending a new code");
                self.services.auth.resend_otp(email).await?;
                Ok(SignInOutcome::VerificationRequired {
                    email: email.to_string(),
                })
            }
            Err(err) => {
                warn!(email, "storefront: sign in failed: {err}");
                Err(err)
            }
        }
    }

    pub async fn sign_up(&self, request: &SignupRequest) -> Result<(), CatalogError> {
        self.services.auth.signup(request).await?;
        info!(email = %request.email, "storefront: account created");
        Ok(())
    }

    pub async fn verify_otp(&self, email: &str, otp: &str) -> Result<(), CatalogError> {
        self.services.auth.verify_otp(email, otp).await
    }

    pub async fn resend_otp(&self, email: &str) -> Result<(), CatalogError> {
        self.services.auth.resend_otp(email).await
    }

    pub async fn sign_out(&self) {
        self.session.logout().await;
        let mounted = self.mounted_feed.lock().await.take();
        if let Some(mounted) = mounted {
            mounted.unmount().await;
            debug!("storefront: feed unmounted");
        }
    }

    /// The feed lives on the main graph only; it is created on first use
    /// and dropped on sign out.
    pub async fn feed(self: &Arc<Self>) -> Result<Arc<ProductFeedController>, CatalogError> {
        let mut mounted = self.mounted_feed.lock().await;
        if !self.session.is_authenticated() {
            if let Some(stale) = mounted.take() {
                stale.unmount().await;
            }
            return Err(CatalogError::missing_credential());
        }
        if let Some(existing) = mounted.as_ref() {
            return Ok(existing.controller.clone());
        }

        let controller = ProductFeedController::new(
            self.services.catalog.clone(),
            self.session.clone(),
            self.feed_options.clone(),
        );
        let authorization_watch = self
            .logout_on_authorization_error
            .then(|| self.spawn_authorization_watch(&controller));
        *mounted = Some(MountedFeed {
            controller: controller.clone(),
            authorization_watch,
        });
        info!("storefront: feed mounted");
        Ok(controller)
    }

    fn spawn_authorization_watch(
        self: &Arc<Self>,
        controller: &ProductFeedController,
    ) -> JoinHandle<()> {
        let mut changes = controller.subscribe();
        let storefront: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(state) => {
                        let lost_authorization = state
                            .error
                            .iter()
                            .chain(state.load_more_error.iter())
                            .any(FeedFailure::invalidates_session);
                        if !lost_authorization {
                            continue;
                        }
                        let Some(storefront) = storefront.upgrade() else {
                            return;
                        };
                        warn!("storefront: feed lost authorization, signing out");
                        // sign_out aborts this watcher, so it runs on its own task.
                        tokio::spawn(async move { storefront.sign_out().await });
                        return;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "storefront: authorization watch lagged");
                    }
                    Err(RecvError::Closed) => return,
                }
            }
        })
    }

    fn bearer(&self) -> Result<Token, CatalogError> {
        self.session
            .access_token()
            .ok_or_else(CatalogError::missing_credential)
    }

    pub async fn profile(&self) -> Result<UserProfile, CatalogError> {
        let token = self.bearer()?;
        self.services.profile.get_profile(&token).await
    }

    pub async fn update_profile(
        &self,
        first_name: &str,
        last_name: &str,
    ) -> Result<UserProfile, CatalogError> {
        let token = self.bearer()?;
        let update = ProfileUpdate {
            first_name: first_name.trim().to_string(),
            last_name: last_name.trim().to_string(),
        };
        if update.first_name.is_empty() {
            return Err(CatalogError::Validation(
                "first name must not be empty".to_string(),
            ));
        }
        self.services.profile.update_profile(&token, &update).await
    }

    pub async fn cart_summary(&self) -> Result<CartSummary, CatalogError> {
        let token = self.bearer()?;
        Ok(price_cart(&self.cart.snapshot(), self.services.catalog.as_ref(), &token).await)
    }

    pub async fn product(&self, id: &ProductId) -> Result<Product, CatalogError> {
        let token = self.bearer()?;
        self.services.catalog.get_by_id(&token, id).await
    }

    pub async fn create_product(&self, draft: &ProductDraft) -> Result<Product, CatalogError> {
        let token = self.bearer()?;
        let product = self.services.catalog.create(&token, draft).await?;
        info!(product_id = %product.id, "storefront: product created");
        Ok(product)
    }

    pub async fn update_product(
        &self,
        id: &ProductId,
        draft: &ProductDraft,
    ) -> Result<Product, CatalogError> {
        let token = self.bearer()?;
        self.services.catalog.update(&token, id, draft).await
    }

    /// A deleted product can no longer be priced, so it also leaves the cart.
    pub async fn delete_product(&self, id: &ProductId) -> Result<(), CatalogError> {
        let token = self.bearer()?;
        self.services.catalog.delete(&token, id).await?;
        self.cart.remove_from_cart(id);
        info!(product_id = %id, "storefront: product deleted");
        Ok(())
    }

    /// Whether the signed-in user owns `product`, judged from the token claims.
    pub fn is_own_product(&self, product: &Product) -> bool {
        self.session
            .user_id()
            .is_some_and(|user_id| product.is_owned_by(&user_id))
    }

    pub fn product_share_url(&self, id: &ProductId) -> String {
        self.assets.product_share_url(id)
    }

    pub fn resolve_image_url(&self, image_url: Option<&str>) -> String {
        self.assets.resolve_image(image_url)
    }
}

#[cfg(test)]
#[path = "tests/app_tests.rs"]
mod tests;
