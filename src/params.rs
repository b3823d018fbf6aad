//! Request-build hooks and `[placeholder]` URL substitution.

use std::collections::BTreeMap;
use std::sync::Arc;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::Value;

use crate::request::RequestConfig;

/// Characters left unescaped in a substituted path segment.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Replaces every `[key]` in `template` with the escaped value of
/// `params[key]`.
///
/// Placeholders without a matching parameter are left as they are.
pub fn substitute_url_params(template: &str, params: &BTreeMap<String, Value>) -> String {
    let mut url = template.to_owned();
    for (key, value) in params {
        let placeholder = format!("[{key}]");
        if url.contains(&placeholder) {
            let escaped = utf8_percent_encode(&param_to_string(value), COMPONENT).to_string();
            url = url.replace(&placeholder, &escaped);
        }
    }
    url
}

/// String form of a parameter value.
///
/// Strings are used verbatim; everything else uses its JSON rendering.
pub fn param_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Hook run on every request before it is keyed and dispatched.
pub trait RequestInterceptor: Send + Sync {
    fn intercept(&self, config: &mut RequestConfig);
}

impl<F> RequestInterceptor for F
where
    F: Fn(&mut RequestConfig) + Send + Sync,
{
    fn intercept(&self, config: &mut RequestConfig) {
        self(config)
    }
}

/// Shared, ordered list of request interceptors.
pub type Interceptors = Arc<Vec<Arc<dyn RequestInterceptor>>>;

/// Rewrites `[key]` placeholders in the request URL from its params.
///
/// Params consumed by a placeholder are dropped from the request so they are
/// not repeated in the query string.
#[derive(Debug, Clone, Copy, Default)]
pub struct UrlParamsInterceptor;

impl RequestInterceptor for UrlParamsInterceptor {
    fn intercept(&self, config: &mut RequestConfig) {
        let consumed: Vec<String> = config
            .params
            .keys()
            .filter(|key| config.url.contains(&format!("[{key}]")))
            .cloned()
            .collect();
        if consumed.is_empty() {
            return;
        }

        config.url = substitute_url_params(&config.url, &config.params);
        for key in consumed {
            config.params.remove(&key);
        }
    }
}
