use std::{env, thread, time::Duration};

use reqwest::{Client, StatusCode, header};
use serde_json::Value;
use tokio::{
    runtime::{Builder, Handle, Runtime, RuntimeFlavor},
    task,
};
use tracing::{debug, warn};
use url::Url;

use crate::{
    Params, Transport, TransportError,
    config::{ApiConfig, ConfigError, validate_base_url},
};

/// Blocking [`Transport`] over a reqwest client.
///
/// Each call is driven to completion before returning. Outside of a tokio runtime the
/// transport uses its own current-thread runtime. Inside a multi-threaded runtime the call
/// blocks the worker through `block_in_place`; inside a current-thread runtime (such as a
/// plain `#[tokio::test]`) it runs on a helper thread and stalls that runtime until done.
///
/// The owned runtime must not be dropped from async code, so drop the transport outside
/// of any runtime.
#[derive(Debug)]
pub struct HttpTransport {
    base_url: Url,
    http: Client,
    runtime: Runtime,
}

impl HttpTransport {
    pub fn new(config: &ApiConfig) -> Result<Self, ConfigError> {
        let base_url = validate_base_url(&config.base_url)?;

        let mut default_headers = header::HeaderMap::new();
        default_headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
        default_headers.insert(
            header::USER_AGENT,
            header::HeaderValue::from_str(&format!("tal/{}; {}", env!("CARGO_PKG_VERSION"), env::consts::OS))
                .map_err(|error| ConfigError::Client { message: error.to_string() })?,
        );
        if let Some(token) = &config.access_token {
            let mut value = header::HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|error| ConfigError::Client { message: error.to_string() })?;
            value.set_sensitive(true);
            default_headers.insert(header::AUTHORIZATION, value);
        }

        let http = Client::builder()
            .default_headers(default_headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| ConfigError::Client { message: error.to_string() })?;
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|error| ConfigError::Client { message: error.to_string() })?;

        Ok(Self { base_url, http, runtime })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    async fn fetch(http: Client, url: Url, path: String, params: Params) -> Result<Value, TransportError> {
        let response = http
            .get(url)
            .query(&params)
            .send()
            .await
            .map_err(|error| TransportError::Network {
                path: path.clone(),
                message: error.to_string(),
            })?;
        let status = response.status();
        let body = response.text().await.map_err(|error| TransportError::Network {
            path: path.clone(),
            message: error.to_string(),
        })?;

        if status.is_success() {
            return serde_json::from_str(&body).map_err(|error| TransportError::Decode {
                path,
                message: error.to_string(),
            });
        }
        Err(classify_failure(path, status, body))
    }
}

impl Transport for HttpTransport {
    fn call_method(&self, path: &str, params: &Params) -> Result<Value, TransportError> {
        let url = self.base_url.join(path).map_err(|error| TransportError::Network {
            path: path.to_string(),
            message: error.to_string(),
        })?;
        debug!(%url, params = params.len(), "calling api method");

        let future = Self::fetch(self.http.clone(), url, path.to_string(), params.clone());
        let result = match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::CurrentThread => {
                thread::scope(|scope| scope.spawn(|| self.runtime.block_on(future)).join())
                    .unwrap_or_else(|_| Err(TransportError::unexpected(format!("call to {path} panicked"))))
            }
            Ok(handle) => task::block_in_place(|| handle.block_on(future)),
            Err(_) => self.runtime.block_on(future),
        };
        if let Err(error) = &result {
            warn!(path, %error, "api method failed");
        }
        result
    }
}

/// Maps a non-success response to a [`TransportError`].
///
/// Client errors carrying a JSON body with `message` become [`TransportError::BadRequest`].
fn classify_failure(path: String, status: StatusCode, body: String) -> TransportError {
    if status.is_client_error()
        && let Ok(Value::Object(details)) = serde_json::from_str::<Value>(&body)
        && let Some(message) = details.get("message").and_then(Value::as_str)
    {
        return TransportError::BadRequest {
            path,
            error: details.get("error").and_then(Value::as_str).map(str::to_string),
            message: message.to_string(),
            param_name: details.get("param_name").and_then(Value::as_str).map(str::to_string),
        };
    }
    TransportError::Status {
        path,
        status: status.as_u16(),
        body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_error_with_details_is_bad_request() {
        let body = r#"{"message": "User 1 does not exist", "error": "object_not_found", "param_name": "user_id"}"#;
        let error = classify_failure("services/users/user".into(), StatusCode::BAD_REQUEST, body.into());
        assert_eq!(
            error,
            TransportError::bad_request("services/users/user", Some("object_not_found"), "User 1 does not exist", Some("user_id"))
        );
    }

    #[test]
    fn other_failures_keep_status() {
        let error = classify_failure("services/users/user".into(), StatusCode::BAD_GATEWAY, "<html>".into());
        assert!(matches!(error, TransportError::Status { status: 502, .. }));

        let error = classify_failure("services/users/user".into(), StatusCode::UNAUTHORIZED, "denied".into());
        assert!(matches!(error, TransportError::Status { status: 401, .. }));
    }

    #[test]
    fn rejects_plain_http_remote_base() {
        let config = ApiConfig {
            base_url: "http://usos.example.edu/".into(),
            ..ApiConfig::default()
        };
        assert!(matches!(HttpTransport::new(&config), Err(ConfigError::InvalidBaseUrl { .. })));
    }

    #[test]
    fn call_inside_current_thread_runtime_does_not_panic() {
        let config = ApiConfig {
            base_url: "http://127.0.0.1:9/".into(),
            timeout_secs: 5,
            ..ApiConfig::default()
        };
        let transport = HttpTransport::new(&config).unwrap();
        let outer = Builder::new_current_thread().enable_all().build().unwrap();

        let result = outer.block_on(async { transport.call_method("services/apisrv/now", &Params::new()) });

        assert!(matches!(result, Err(TransportError::Network { .. })), "{result:?}");
    }

    #[test]
    fn joins_method_path_onto_base() {
        let transport = HttpTransport::new(&ApiConfig::default()).unwrap();
        let url = transport.base_url().join("services/users/user").unwrap();
        assert_eq!(url.as_str(), "https://usosapps.uw.edu.pl/services/users/user");
    }
}
