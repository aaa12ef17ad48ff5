//! Route-protection middleware
//!
//! Server-side companion to the redirect guard: validates the session for
//! protected routes and redirects to the sign-in entry point with the
//! originating path and a machine-readable reason.
//!
//! # Example
//!
//! ```rust,ignore
//! use axum::Router;
//! use tidepool::guard::SessionGuard;
//!
//! let guard = SessionGuard::new(my_validator);
//! let protected = Router::new()
//!     .route("/dashboard", get(dashboard))
//!     .layer(axum::middleware::from_fn(move |req, next| {
//!         let guard = guard.clone();
//!         async move { guard.middleware(req, next).await }
//!     }));
//! ```

use async_trait::async_trait;
use axum::extract::Request;
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};

use crate::config::RedirectConfig;
use crate::error::Result;
use crate::redirect::{sign_in_url, RedirectReason};
use crate::session::SessionUser;

/// Trait for resolving the authenticated user from an incoming request.
#[async_trait]
pub trait SessionValidator: Clone + Send + Sync + 'static {
    /// Resolve the user behind the request's credentials.
    ///
    /// Returns `Ok(None)` when no valid session backs the request; errors
    /// mean validation itself failed (backend unreachable, malformed
    /// cookies).
    async fn validate_session(&self, parts: &Parts) -> Result<Option<SessionUser>>;
}

/// Middleware guarding routes behind a verified session.
#[derive(Clone)]
pub struct SessionGuard<V: SessionValidator> {
    validator: V,
    redirect: RedirectConfig,
}

impl<V: SessionValidator> SessionGuard<V> {
    pub fn new(validator: V) -> Self {
        Self::with_redirect(validator, RedirectConfig::default())
    }

    pub fn with_redirect(validator: V, redirect: RedirectConfig) -> Self {
        Self {
            validator,
            redirect,
        }
    }

    /// Middleware function requiring a session with a confirmed email.
    ///
    /// On success the resolved [`SessionUser`] is stored in request
    /// extensions for downstream handlers.
    pub async fn middleware(&self, request: Request, next: Next) -> Response {
        let (parts, body) = request.into_parts();
        let return_to = parts
            .uri
            .path_and_query()
            .map(|pq| pq.to_string())
            .unwrap_or_else(|| "/".to_string());

        match self.validator.validate_session(&parts).await {
            Ok(Some(user)) if user.email_confirmed_at.is_some() => {
                let mut request = Request::from_parts(parts, body);
                request.extensions_mut().insert(user);
                next.run(request).await
            }
            Ok(Some(user)) => {
                tracing::info!(
                    target: "session.guard",
                    user_id = %user.id,
                    path = %return_to,
                    "Unverified email on protected route"
                );
                self.deny(&return_to, RedirectReason::EmailUnverified)
            }
            Ok(None) => self.deny(&return_to, RedirectReason::Unauthenticated),
            Err(err) => {
                tracing::error!(
                    target: "session.guard",
                    error = %err,
                    path = %return_to,
                    "Session validation failed"
                );
                self.deny(&return_to, RedirectReason::SessionError)
            }
        }
    }

    fn deny(&self, return_to: &str, reason: RedirectReason) -> Response {
        let url = sign_in_url(&self.redirect, return_to, reason);
        Redirect::to(&url).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TidepoolError;
    use crate::testing::fake;
    use axum::body::Body;
    use axum::http::{header, Request as HttpRequest, StatusCode};
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    #[derive(Clone)]
    struct StaticValidator {
        user: Option<SessionUser>,
        fail: bool,
    }

    #[async_trait]
    impl SessionValidator for StaticValidator {
        async fn validate_session(&self, _parts: &Parts) -> Result<Option<SessionUser>> {
            if self.fail {
                return Err(TidepoolError::network("auth backend unreachable"));
            }
            Ok(self.user.clone())
        }
    }

    fn app(validator: StaticValidator) -> Router {
        let guard = SessionGuard::new(validator);
        Router::new()
            .route("/dashboard", get(|| async { "ok" }))
            .layer(axum::middleware::from_fn(move |req, next| {
                let guard = guard.clone();
                async move { guard.middleware(req, next).await }
            }))
    }

    fn location(response: &Response) -> String {
        response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    }

    #[tokio::test]
    async fn test_verified_user_passes_through() {
        let app = app(StaticValidator {
            user: Some(fake::user()),
            fail: false,
        });
        let response = app
            .oneshot(HttpRequest::get("/dashboard").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_missing_session_redirects_unauthenticated() {
        let app = app(StaticValidator {
            user: None,
            fail: false,
        });
        let response = app
            .oneshot(HttpRequest::get("/dashboard").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert!(response.status().is_redirection());
        assert_eq!(
            location(&response),
            "/auth/sign-in?returnTo=%2Fdashboard&reason=unauthenticated"
        );
    }

    #[tokio::test]
    async fn test_unverified_email_redirects() {
        let mut user = fake::user();
        user.email_confirmed_at = None;
        let app = app(StaticValidator {
            user: Some(user),
            fail: false,
        });
        let response = app
            .oneshot(HttpRequest::get("/dashboard").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert!(location(&response).contains("reason=email-unverified"));
    }

    #[tokio::test]
    async fn test_validation_failure_redirects_session_error() {
        let app = app(StaticValidator {
            user: None,
            fail: true,
        });
        let response = app
            .oneshot(HttpRequest::get("/dashboard").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert!(location(&response).contains("reason=session-error"));
    }

    #[tokio::test]
    async fn test_return_to_preserves_query() {
        let app = app(StaticValidator {
            user: None,
            fail: false,
        });
        let response = app
            .oneshot(
                HttpRequest::get("/dashboard?view=weekly")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(
            location(&response),
            "/auth/sign-in?returnTo=%2Fdashboard%3Fview%3Dweekly&reason=unauthenticated"
        );
    }
}
