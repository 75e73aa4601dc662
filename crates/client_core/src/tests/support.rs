use std::collections::HashMap;

use async_trait::async_trait;
use shared::{
    domain::{Pagination, Product, ProductId, ProductOwner, UserId, UserProfile},
    protocol::{ListProductsQuery, ProductDraft, ProfileUpdate, SearchProductsQuery, SignupRequest},
};
use tokio::sync::{oneshot, Mutex};

use crate::{
    catalog::{AuthApi, ProductCatalogApi, ProductPage, ProfileApi, TokenPair},
    error::CatalogError,
    feed::FeedRequest,
    session::Token,
};

pub(crate) fn product(id: &str, price: f64) -> Product {
    Product {
        id: ProductId::new(id),
        title: format!("product {id}"),
        description: String::new(),
        price,
        images: Vec::new(),
        location: None,
        owner: Some(ProductOwner::Id(UserId::new("owner-1"))),
        created_at: None,
        updated_at: None,
    }
}

/// Scriptable catalog. List pages are synthesized from `total_pages`, with item
/// ids that encode the page and sort order. Individual calls can be failed or
/// held open by call index.
pub(crate) struct FakeCatalog {
    total_pages: u32,
    page_size: usize,
    calls: Mutex<Vec<FeedRequest>>,
    lookups: Mutex<Vec<ProductId>>,
    failures: Mutex<HashMap<usize, CatalogError>>,
    gates: Mutex<HashMap<usize, oneshot::Receiver<()>>>,
    prices: Mutex<HashMap<ProductId, f64>>,
}

impl FakeCatalog {
    pub(crate) fn new(total_pages: u32, page_size: usize) -> Self {
        Self {
            total_pages,
            page_size,
            calls: Mutex::new(Vec::new()),
            lookups: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
            prices: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) async fn fail_call(&self, index: usize, err: CatalogError) {
        self.failures.lock().await.insert(index, err);
    }

    /// Holds call `index` open until the returned sender fires or drops.
    pub(crate) async fn gate_call(&self, index: usize) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.gates.lock().await.insert(index, rx);
        tx
    }

    pub(crate) async fn set_price(&self, id: &str, price: f64) {
        self.prices.lock().await.insert(ProductId::new(id), price);
    }

    pub(crate) async fn calls(&self) -> Vec<FeedRequest> {
        self.calls.lock().await.clone()
    }

    pub(crate) async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }

    pub(crate) async fn lookups(&self) -> Vec<ProductId> {
        self.lookups.lock().await.clone()
    }

    pub(crate) async fn wait_for_calls(&self, count: usize) {
        let waited = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while self.call_count().await < count {
                tokio::task::yield_now().await;
            }
        })
        .await;
        assert!(waited.is_ok(), "timed out waiting for {count} catalog calls");
    }

    async fn record(&self, request: FeedRequest) -> Result<(), CatalogError> {
        let index = {
            let mut calls = self.calls.lock().await;
            calls.push(request);
            calls.len() - 1
        };
        let gate = self.gates.lock().await.remove(&index);
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        match self.failures.lock().await.remove(&index) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn page(&self, query: &ListProductsQuery) -> ProductPage {
        let page = query.page;
        let order = query.order.as_query_value();
        let items = (0..self.page_size)
            .map(|i| product(&format!("p{page}-{i}-{order}"), 1.0))
            .collect();
        ProductPage {
            items,
            pagination: Pagination {
                current_page: page,
                total_pages: self.total_pages,
                total_items: u64::from(self.total_pages) * self.page_size as u64,
                limit: query.limit,
                has_next_page: page < self.total_pages,
                has_prev_page: page > 1,
            },
        }
    }
}

#[async_trait]
impl ProductCatalogApi for FakeCatalog {
    async fn list(
        &self,
        _token: &Token,
        query: &ListProductsQuery,
    ) -> Result<ProductPage, CatalogError> {
        self.record(FeedRequest::List(query.clone())).await?;
        Ok(self.page(query))
    }

    async fn search(
        &self,
        _token: &Token,
        query: &SearchProductsQuery,
    ) -> Result<Vec<Product>, CatalogError> {
        self.record(FeedRequest::Search(query.clone())).await?;
        Ok(vec![
            product(&format!("s-{}-0", query.query), 1.0),
            product(&format!("s-{}-1", query.query), 1.0),
        ])
    }

    async fn get_by_id(&self, _token: &Token, id: &ProductId) -> Result<Product, CatalogError> {
        self.lookups.lock().await.push(id.clone());
        if id.as_str().starts_with("missing") {
            return Err(CatalogError::NotFound(format!("product {id}")));
        }
        let price = self.prices.lock().await.get(id).copied().unwrap_or(1.0);
        Ok(product(id.as_str(), price))
    }

    async fn create(&self, _token: &Token, draft: &ProductDraft) -> Result<Product, CatalogError> {
        let mut created = product("created", draft.price);
        created.title = draft.title.clone();
        Ok(created)
    }

    async fn update(
        &self,
        _token: &Token,
        id: &ProductId,
        draft: &ProductDraft,
    ) -> Result<Product, CatalogError> {
        let mut updated = product(id.as_str(), draft.price);
        updated.title = draft.title.clone();
        Ok(updated)
    }

    async fn delete(&self, _token: &Token, _id: &ProductId) -> Result<(), CatalogError> {
        Ok(())
    }
}

/// Accepts any password. `unverified@example.com` is rejected with the 403
/// verification error and `wrong@example.com` with a plain 401.
#[derive(Default)]
pub(crate) struct FakeAuth {
    pub(crate) resent: Mutex<Vec<String>>,
    pub(crate) verified: Mutex<Vec<(String, String)>>,
    pub(crate) signups: Mutex<Vec<SignupRequest>>,
}

#[async_trait]
impl AuthApi for FakeAuth {
    async fn signup(&self, request: &SignupRequest) -> Result<(), CatalogError> {
        self.signups.lock().await.push(request.clone());
        Ok(())
    }

    async fn login(&self, email: &str, _password: &str) -> Result<TokenPair, CatalogError> {
        match email {
            "unverified@example.com" => Err(CatalogError::Authorization {
                status: Some(403),
                message: "Please verify your email first".to_string(),
            }),
            "wrong@example.com" => Err(CatalogError::Authorization {
                status: Some(401),
                message: "Invalid credentials".to_string(),
            }),
            _ => Ok(TokenPair {
                access_token: Token::new(format!("access-{email}")),
                refresh_token: Token::new(format!("refresh-{email}")),
            }),
        }
    }

    async fn resend_otp(&self, email: &str) -> Result<(), CatalogError> {
        self.resent.lock().await.push(email.to_string());
        Ok(())
    }

    async fn verify_otp(&self, email: &str, otp: &str) -> Result<(), CatalogError> {
        if otp != "123456" {
            return Err(CatalogError::Validation("Invalid OTP".to_string()));
        }
        self.verified
            .lock()
            .await
            .push((email.to_string(), otp.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct FakeProfile {
    pub(crate) updates: Mutex<Vec<ProfileUpdate>>,
}

fn profile(first_name: &str, last_name: &str) -> UserProfile {
    UserProfile {
        id: UserId::new("u-1"),
        first_name: first_name.to_string(),
        last_name: last_name.to_string(),
        email: "ada@example.com".to_string(),
        profile_image: None,
        is_email_verified: true,
    }
}

#[async_trait]
impl ProfileApi for FakeProfile {
    async fn get_profile(&self, _token: &Token) -> Result<UserProfile, CatalogError> {
        Ok(profile("Ada", "Lovelace"))
    }

    async fn update_profile(
        &self,
        _token: &Token,
        update: &ProfileUpdate,
    ) -> Result<UserProfile, CatalogError> {
        self.updates.lock().await.push(update.clone());
        Ok(profile(&update.first_name, &update.last_name))
    }
}
