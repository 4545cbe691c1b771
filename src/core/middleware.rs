use crate::app::AccessTokenManager;
use http::Extensions;
use reqwest::{header, Request, Response};
use reqwest_middleware::{Middleware, Next};

/// Attaches the app's current OAuth2 access token to outbound requests.
#[derive(Clone)]
pub struct AuthMiddleware {
    tokens: AccessTokenManager,
}

impl AuthMiddleware {
    pub fn new(tokens: AccessTokenManager) -> Self {
        Self { tokens }
    }

    async fn get_token(&self) -> Result<String, anyhow::Error> {
        let token = self.tokens.get_token(false).await?;
        Ok(token.access_token)
    }
}

#[async_trait::async_trait]
impl Middleware for AuthMiddleware {
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<Response> {

        let token = self.get_token().await.map_err(|e| {
            reqwest_middleware::Error::Middleware(anyhow::anyhow!("Failed to get auth token: {}", e))
        })?;

        let value = header::HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|e| {
            reqwest_middleware::Error::Middleware(anyhow::anyhow!("Invalid auth token: {}", e))
        })?;
        req.headers_mut().insert(header::AUTHORIZATION, value);

        next.run(req, extensions).await
    }
}
