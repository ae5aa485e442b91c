//! OAuth 2.0 authorization-code flow, relying-party side.
//!
//! This module implements the outbound half of the protocol: building the
//! authorization redirect, verifying the callback, and talking to the token
//! endpoint.
//!
//! # Authorization Code Flow
//!
//! The flow is implemented across several submodules:
//!
//! - [`authorize`] - Authorization redirect construction (URL + flow cookies)
//! - [`callback`] - Callback verification state machine
//! - [`cookies`] - Flow cookie names, construction and extraction
//! - [`exchange`] - Token endpoint client (code exchange, refresh grant)
//! - [`pkce`] - PKCE verifier/challenge implementation (S256)
//! - [`state`] - Codec for the anti-forgery `state` parameter
//!
//! # Example
//!
//! ```ignore
//! use latchkey_oidc::oauth::{CallbackProcessor, CallbackRequest};
//!
//! let processor = CallbackProcessor::new(connections, settings, &http)?;
//!
//! // Start a flow: emit the redirect, set its cookies.
//! let redirect = processor.begin_authorization(Some("corp-idp"), Some("/docs"))?;
//!
//! // Later, on the callback request:
//! let request = CallbackRequest::parse(request_uri, cookie_header)?;
//! let identity = processor.process_callback(&request).await?;
//! ```

pub mod authorize;
pub mod callback;
pub mod cookies;
pub mod exchange;
pub mod pkce;
pub mod state;

// Authorization redirect construction
pub use authorize::{AuthorizationRedirect, AuthorizationRequest};

// Callback processing
pub use callback::{CallbackProcessor, CallbackRequest};

// Flow cookies
pub use cookies::{
    CODE_VERIFIER_COOKIE, COOKIE_MAX_AGE_SECONDS, FlowCookies, REQUEST_KEY_COOKIE,
    create_code_verifier_cookie, create_request_key_cookie,
};

// Token endpoint client
pub use exchange::{TokenEndpointClient, TokenResponse};

// PKCE types
pub use pkce::{PkceChallenge, PkceError, PkceVerifier};

// State parameter codec
pub use state::FlowState;
