use std::backtrace::Backtrace;

use async_trait::async_trait;
use base64::Engine;
use getpaid_stripe_types::ApiErrorBody;
use reqwest::{Client, Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use crate::{
    app_error::{AppError, AppResult, CARD_DECLINED_MESSAGE},
    application::ports::stripe_api::{ApiMethod, ApiRequest, ResourceKind, StripeApi},
    domain::entities::stripe_mode::StripeMode,
    infra::{error::InfraError, http_client::try_build_client},
};

const STRIPE_API_BASE: &str = "https://api.stripe.com/v1";
const STRIPE_VERSION: &str = "2025-06-30.basil";

#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    base_url: String,
    live_key: Option<SecretString>,
    test_key: Option<SecretString>,
}

impl StripeClient {
    pub fn new(
        live_key: Option<SecretString>,
        test_key: Option<SecretString>,
    ) -> Result<Self, InfraError> {
        Ok(Self {
            client: try_build_client().map_err(InfraError::HttpClient)?,
            base_url: STRIPE_API_BASE.to_string(),
            live_key,
            test_key,
        })
    }

    fn auth_header(&self, mode: StripeMode) -> AppResult<String> {
        let key = match mode {
            StripeMode::Live => self.live_key.as_ref(),
            StripeMode::Sandbox => self.test_key.as_ref(),
        }
        .ok_or_else(|| AppError::AuthenticationFailed {
            code: "missing_api_key".into(),
            message: format!("No Stripe secret key configured for {mode} mode."),
        })?;

        let encoded = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:", key.expose_secret()));
        Ok(format!("Basic {encoded}"))
    }

    fn audit(&self, mode: StripeMode, request: &ApiRequest) {
        if request.method.is_destructive() {
            tracing::warn!(
                target: "stripe_audit",
                mode = %mode,
                resource = request.kind.path(),
                method = request.method.as_str(),
                id = request.id.as_deref().unwrap_or_default(),
                params = %request.params,
                backtrace = %Backtrace::capture(),
                "Destructive Stripe call"
            );
        }
    }
}

/// HTTP verb and path (below the API base) for a request.
pub fn route(request: &ApiRequest) -> AppResult<(Method, String)> {
    let path = request.kind.path();
    let id = match (&request.id, request.method.needs_id()) {
        (Some(id), true) if !id.is_empty() => id.as_str(),
        (_, true) => {
            return Err(AppError::invalid_argument(format!(
                "{} {path} requires an id",
                request.method.as_str()
            )));
        }
        (_, false) => "",
    };

    let route = match request.method {
        ApiMethod::Create => (Method::POST, path.to_string()),
        ApiMethod::All => (Method::GET, path.to_string()),
        ApiMethod::Retrieve => (Method::GET, format!("{path}/{id}")),
        ApiMethod::Update => (Method::POST, format!("{path}/{id}")),
        ApiMethod::Delete => (Method::DELETE, format!("{path}/{id}")),
        ApiMethod::Cancel if request.kind == ResourceKind::Subscriptions => {
            (Method::DELETE, format!("{path}/{id}"))
        }
        ApiMethod::Cancel => (Method::POST, format!("{path}/{id}/cancel")),
        ApiMethod::Confirm => (Method::POST, format!("{path}/{id}/confirm")),
        ApiMethod::Capture => (Method::POST, format!("{path}/{id}/capture")),
        ApiMethod::Attach => (Method::POST, format!("{path}/{id}/attach")),
        ApiMethod::Detach => (Method::POST, format!("{path}/{id}/detach")),
    };
    Ok(route)
}

/// Flattens JSON params into Stripe's bracketed form encoding, e.g. `items[0][price]`.
pub fn encode_form(params: &Value) -> Vec<(String, String)> {
    fn walk(prefix: &str, value: &Value, out: &mut Vec<(String, String)>) {
        match value {
            Value::Null => {}
            Value::Bool(b) => out.push((prefix.to_string(), b.to_string())),
            Value::Number(n) => out.push((prefix.to_string(), n.to_string())),
            Value::String(s) => out.push((prefix.to_string(), s.clone())),
            Value::Array(items) => {
                for (index, item) in items.iter().enumerate() {
                    walk(&format!("{prefix}[{index}]"), item, out);
                }
            }
            Value::Object(map) => {
                for (key, item) in map {
                    let key = if prefix.is_empty() {
                        key.clone()
                    } else {
                        format!("{prefix}[{key}]")
                    };
                    walk(&key, item, out);
                }
            }
        }
    }

    let mut out = Vec::new();
    walk("", params, &mut out);
    out
}

/// Maps a non-2xx Stripe response onto the remote error taxonomy.
pub fn translate_error(status: StatusCode, body: &str) -> AppError {
    let Ok(ApiErrorBody { error }) = serde_json::from_str::<ApiErrorBody>(body) else {
        return match status {
            StatusCode::TOO_MANY_REQUESTS => AppError::RateLimited {
                code: "rate_limit".into(),
                message: "Too many requests made to the API too quickly.".into(),
            },
            _ => AppError::Unknown,
        };
    };

    let code = error.code_or_type().to_string();
    let message = error.message.clone().unwrap_or_else(|| code.clone());

    match (status, error.kind.as_str()) {
        (_, "card_error") => AppError::CardDeclined {
            message: if code == "card_declined" {
                CARD_DECLINED_MESSAGE.to_string()
            } else {
                message
            },
            code,
            decline_code: error.decline_code,
        },
        (StatusCode::TOO_MANY_REQUESTS, _) => AppError::RateLimited { code, message },
        (StatusCode::UNAUTHORIZED, _) | (StatusCode::FORBIDDEN, _) => {
            AppError::AuthenticationFailed { code, message }
        }
        (_, "invalid_request_error") => AppError::InvalidRequest { code, message },
        (_, "api_connection_error") => AppError::ConnectionFailed { code, message },
        (status, _) if status.is_client_error() => AppError::InvalidRequest { code, message },
        _ => AppError::GenericApiError { code, message },
    }
}

#[async_trait]
impl StripeApi for StripeClient {
    async fn call(&self, mode: StripeMode, request: ApiRequest) -> AppResult<Value> {
        let (method, path) = route(&request)?;
        self.audit(mode, &request);

        let url = format!("{}/{path}", self.base_url);
        let form = encode_form(&request.params);
        let builder = self
            .client
            .request(method.clone(), url)
            .header("Authorization", self.auth_header(mode)?)
            .header("Stripe-Version", STRIPE_VERSION);
        let builder = if method == Method::GET {
            builder.query(&form)
        } else {
            builder.form(&form)
        };

        let response = builder.send().await.map_err(|e| {
            tracing::error!(error = %e, resource = request.kind.path(), "Stripe request failed");
            AppError::ConnectionFailed {
                code: "api_connection_error".into(),
                message: format!("Could not connect to Stripe: {e}"),
            }
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| AppError::ConnectionFailed {
            code: "api_connection_error".into(),
            message: format!("Failed to read Stripe response: {e}"),
        })?;

        if !status.is_success() {
            let error = translate_error(status, &body);
            tracing::warn!(
                status = %status,
                resource = request.kind.path(),
                method = request.method.as_str(),
                error_code = error.code().as_str(),
                error = %error,
                "Stripe API error"
            );
            return Err(error);
        }

        serde_json::from_str(&body).map_err(|e| {
            tracing::error!(error = %e, "Failed to parse Stripe response");
            AppError::GenericApiError {
                code: "invalid_response".into(),
                message: format!("Unexpected response from Stripe: {e}"),
            }
        })
    }
}
