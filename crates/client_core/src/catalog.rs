use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{multipart::Form, Client, RequestBuilder};
use serde::de::DeserializeOwned;
use shared::{
    domain::{Pagination, Product, ProductId, UserProfile},
    error::ApiError,
    protocol::{
        DataResponse, EmailRequest, ListProductsQuery, LoginRequest, MessageResponse,
        ProductDraft, ProductPageResponse, ProfileResponse, ProfileUpdate, SearchProductsQuery,
        SignupRequest, TokenPairPayload, VerifyOtpRequest,
    },
};
use tracing::debug;
use url::Url;

use crate::{error::CatalogError, session::Token};

const PLACEHOLDER_IMAGE_URL: &str = "https://via.placeholder.com/150";

#[derive(Debug, Clone, PartialEq)]
pub struct ProductPage {
    pub items: Vec<Product>,
    pub pagination: Pagination,
}

#[async_trait]
pub trait ProductCatalogApi: Send + Sync {
    async fn list(
        &self,
        token: &Token,
        query: &ListProductsQuery,
    ) -> Result<ProductPage, CatalogError>;
    /// Server-side full text search; the result is never paginated.
    async fn search(
        &self,
        token: &Token,
        query: &SearchProductsQuery,
    ) -> Result<Vec<Product>, CatalogError>;
    async fn get_by_id(&self, token: &Token, id: &ProductId) -> Result<Product, CatalogError>;
    async fn create(&self, token: &Token, draft: &ProductDraft) -> Result<Product, CatalogError>;
    async fn update(
        &self,
        token: &Token,
        id: &ProductId,
        draft: &ProductDraft,
    ) -> Result<Product, CatalogError>;
    async fn delete(&self, token: &Token, id: &ProductId) -> Result<(), CatalogError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: Token,
    pub refresh_token: Token,
}

#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn signup(&self, request: &SignupRequest) -> Result<(), CatalogError>;
    async fn login(&self, email: &str, password: &str) -> Result<TokenPair, CatalogError>;
    async fn resend_otp(&self, email: &str) -> Result<(), CatalogError>;
    async fn verify_otp(&self, email: &str, otp: &str) -> Result<(), CatalogError>;
}

#[async_trait]
pub trait ProfileApi: Send + Sync {
    async fn get_profile(&self, token: &Token) -> Result<UserProfile, CatalogError>;
    async fn update_profile(
        &self,
        token: &Token,
        update: &ProfileUpdate,
    ) -> Result<UserProfile, CatalogError>;
}

/// reqwest client for the storefront REST backend.
pub struct HttpStorefrontApi {
    http: Client,
    base_url: String,
}

impl HttpStorefrontApi {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let parsed = Url::parse(base_url)
            .with_context(|| format!("invalid storefront api url '{base_url}'"))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            anyhow::bail!("storefront api url must start with http:// or https://");
        }
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, CatalogError> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let status = status.as_u16();
            let body = response.text().await.unwrap_or_default();
            debug!(status, "catalog: request rejected");
            return Err(CatalogError::from_api_error(
                status,
                ApiError::from_response(status, &body),
            ));
        }
        response
            .json::<T>()
            .await
            .map_err(|err| CatalogError::Server {
                status: status.as_u16(),
                message: format!("invalid response body: {err}"),
            })
    }

    fn product_form(draft: &ProductDraft) -> Result<Form, CatalogError> {
        let location = serde_json::to_string(&draft.location)
            .map_err(|err| CatalogError::Validation(format!("invalid location: {err}")))?;
        Ok(Form::new()
            .text("title", draft.title.clone())
            .text("description", draft.description.clone())
            .text("price", draft.price.to_string())
            .text("location", location))
    }
}

#[async_trait]
impl ProductCatalogApi for HttpStorefrontApi {
    async fn list(
        &self,
        token: &Token,
        query: &ListProductsQuery,
    ) -> Result<ProductPage, CatalogError> {
        let response: ProductPageResponse = self
            .send_json(
                self.http
                    .get(self.endpoint("products"))
                    .bearer_auth(token.as_str())
                    .query(query),
            )
            .await?;
        Ok(ProductPage {
            items: response.data,
            pagination: response.pagination,
        })
    }

    async fn search(
        &self,
        token: &Token,
        query: &SearchProductsQuery,
    ) -> Result<Vec<Product>, CatalogError> {
        let response: DataResponse<Vec<Product>> = self
            .send_json(
                self.http
                    .get(self.endpoint("products/search"))
                    .bearer_auth(token.as_str())
                    .query(query),
            )
            .await?;
        Ok(response.data)
    }

    async fn get_by_id(&self, token: &Token, id: &ProductId) -> Result<Product, CatalogError> {
        let response: DataResponse<Product> = self
            .send_json(
                self.http
                    .get(self.endpoint(&format!("products/{id}")))
                    .bearer_auth(token.as_str()),
            )
            .await?;
        Ok(response.data)
    }

    async fn create(&self, token: &Token, draft: &ProductDraft) -> Result<Product, CatalogError> {
        let response: DataResponse<Product> = self
            .send_json(
                self.http
                    .post(self.endpoint("products"))
                    .bearer_auth(token.as_str())
                    .multipart(Self::product_form(draft)?),
            )
            .await?;
        Ok(response.data)
    }

    async fn update(
        &self,
        token: &Token,
        id: &ProductId,
        draft: &ProductDraft,
    ) -> Result<Product, CatalogError> {
        let response: DataResponse<Product> = self
            .send_json(
                self.http
                    .put(self.endpoint(&format!("products/{id}")))
                    .bearer_auth(token.as_str())
                    .multipart(Self::product_form(draft)?),
            )
            .await?;
        Ok(response.data)
    }

    async fn delete(&self, token: &Token, id: &ProductId) -> Result<(), CatalogError> {
        let _: MessageResponse = self
            .send_json(
                self.http
                    .delete(self.endpoint(&format!("products/{id}")))
                    .bearer_auth(token.as_str()),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl AuthApi for HttpStorefrontApi {
    async fn signup(&self, request: &SignupRequest) -> Result<(), CatalogError> {
        let form = Form::new()
            .text("firstName", request.first_name.clone())
            .text("lastName", request.last_name.clone())
            .text("email", request.email.clone())
            .text("password", request.password.clone())
            .text("phoneNumber", request.phone_number.clone());
        let _: MessageResponse = self
            .send_json(self.http.post(self.endpoint("auth/signup")).multipart(form))
            .await?;
        Ok(())
    }

    async fn login(&self, email: &str, password: &str) -> Result<TokenPair, CatalogError> {
        let response: DataResponse<TokenPairPayload> = self
            .send_json(self.http.post(self.endpoint("auth/login")).json(&LoginRequest {
                email: email.to_string(),
                password: password.to_string(),
                token_expires_in_mins: None,
            }))
            .await?;
        Ok(TokenPair {
            access_token: Token::new(response.data.access_token),
            refresh_token: Token::new(response.data.refresh_token),
        })
    }

    async fn resend_otp(&self, email: &str) -> Result<(), CatalogError> {
        let _: MessageResponse = self
            .send_json(
                self.http
                    .post(self.endpoint("auth/resend-verification-otp"))
                    .json(&EmailRequest {
                        email: email.to_string(),
                    }),
            )
            .await?;
        Ok(())
    }

    async fn verify_otp(&self, email: &str, otp: &str) -> Result<(), CatalogError> {
        let _: MessageResponse = self
            .send_json(
                self.http
                    .post(self.endpoint("auth/verify-otp"))
                    .json(&VerifyOtpRequest {
                        email: email.to_string(),
                        otp: otp.to_string(),
                    }),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ProfileApi for HttpStorefrontApi {
    async fn get_profile(&self, token: &Token) -> Result<UserProfile, CatalogError> {
        let response: ProfileResponse = self
            .send_json(
                self.http
                    .get(self.endpoint("user/profile"))
                    .bearer_auth(token.as_str()),
            )
            .await?;
        Ok(response.data.user)
    }

    async fn update_profile(
        &self,
        token: &Token,
        update: &ProfileUpdate,
    ) -> Result<UserProfile, CatalogError> {
        let form = Form::new()
            .text("firstName", update.first_name.clone())
            .text("lastName", update.last_name.clone());
        let response: ProfileResponse = self
            .send_json(
                self.http
                    .put(self.endpoint("user/profile"))
                    .bearer_auth(token.as_str())
                    .multipart(form),
            )
            .await?;
        Ok(response.data.user)
    }
}

/// Public URLs for product assets and share links.
#[derive(Debug, Clone)]
pub struct AssetUrls {
    base: Url,
}

impl AssetUrls {
    pub fn new(asset_base_url: &str) -> Result<Self> {
        let base = Url::parse(asset_base_url)
            .with_context(|| format!("invalid asset base url '{asset_base_url}'"))?;
        Ok(Self { base })
    }

    /// Server-relative image paths are joined onto the asset host; absolute
    /// URLs pass through and a missing image falls back to a placeholder.
    pub fn resolve_image(&self, image_url: Option<&str>) -> String {
        let Some(image_url) = image_url.map(str::trim).filter(|url| !url.is_empty()) else {
            return PLACEHOLDER_IMAGE_URL.to_string();
        };
        if image_url.starts_with("http://") || image_url.starts_with("https://") {
            return image_url.to_string();
        }
        self.base
            .join(image_url)
            .map(String::from)
            .unwrap_or_else(|_| PLACEHOLDER_IMAGE_URL.to_string())
    }

    pub fn product_share_url(&self, product_id: &ProductId) -> String {
        self.base
            .join(&format!("/products/{product_id}"))
            .map(String::from)
            .unwrap_or_else(|_| format!("{}products/{product_id}", self.base))
    }
}

#[cfg(test)]
#[path = "tests/catalog_tests.rs"]
mod tests;
