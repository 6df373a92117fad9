//! Redaction of sensitive values from request representations.
//!
//! Only the copy handed to logging and auditing is sanitized; the outbound
//! request is never modified. Headers, query parameters and body text are
//! treated independently.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::Serialize;

/// Replacement for every redacted value.
pub const REDACTED: &str = "[REDACTED]";

/// Minimum length of a bare token treated as potentially sensitive.
const MIN_TOKEN_LEN: usize = 20;

static SENSITIVE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(auth|key|secret|token|password|credential)").unwrap());

/// `"<sensitive name>": "<string value>"`, keeping the name and separator.
static SENSITIVE_JSON_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)("[^"]*(?:auth|key|secret|token|password|credential)[^"]*"\s*:\s*)"(?:[^"\\]|\\.)*""#,
    )
    .unwrap()
});

/// A quoted JSON value (after `:`, `[` or `,`) made only of token characters.
static JSON_TOKEN_VALUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"([:\[,]\s*)"([A-Za-z0-9_\-]{20,})""#).unwrap());

/// Known credential shapes: service prefix followed by a long token.
static CREDENTIAL_SHAPES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"AIza[0-9A-Za-z_\-]{20,}",
        r"ya29\.[0-9A-Za-z_\-]{20,}(?:\.[0-9A-Za-z_\-]+)*",
        r"sk-[A-Za-z0-9_\-]{20,}",
        r"gh[pousr]_[A-Za-z0-9]{20,}",
        r"AKIA[0-9A-Z]{16}",
        r"(?i)bearer\s+[A-Za-z0-9\-._~+/]{20,}=*",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).unwrap())
    .collect()
});

/// Loggable view of an outbound request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestRepr {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl RequestRepr {
    pub fn new(method: &str, url: &str) -> Self {
        Self {
            method: method.to_string(),
            url: url.to_string(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// Return a copy of `request` with sensitive values replaced by [`REDACTED`].
///
/// Pure and idempotent: `sanitize(&sanitize(x)) == sanitize(x)`.
pub fn sanitize(request: &RequestRepr) -> RequestRepr {
    RequestRepr {
        method: request.method.clone(),
        url: sanitize_url(&request.url),
        headers: request
            .headers
            .iter()
            .map(|(name, value)| (name.clone(), sanitize_named_value(name, value)))
            .collect(),
        body: request.body.as_deref().map(sanitize_body),
    }
}

/// Whether a header or parameter name denotes a secret.
pub fn is_sensitive_name(name: &str) -> bool {
    SENSITIVE_NAME.is_match(name)
}

fn sanitize_named_value(name: &str, value: &str) -> String {
    if is_sensitive_name(name) || looks_like_token(value) {
        return REDACTED.to_string();
    }
    redact_credential_shapes(value)
}

fn sanitize_url(url: &str) -> String {
    let (without_fragment, fragment) = match url.split_once('#') {
        Some((head, fragment)) => (head, Some(fragment)),
        None => (url, None),
    };

    let mut out = match without_fragment.split_once('?') {
        Some((path, query)) => {
            let params: Vec<String> = query
                .split('&')
                .map(|pair| match pair.split_once('=') {
                    Some((name, value)) => {
                        format!("{}={}", name, sanitize_named_value(name, value))
                    }
                    None => pair.to_string(),
                })
                .collect();
            format!("{}?{}", path, params.join("&"))
        }
        None => without_fragment.to_string(),
    };

    if let Some(fragment) = fragment {
        out.push('#');
        out.push_str(fragment);
    }
    redact_credential_shapes(&out)
}

fn sanitize_body(body: &str) -> String {
    let fields = SENSITIVE_JSON_FIELD.replace_all(body, |caps: &Captures| {
        format!("{}\"{}\"", &caps[1], REDACTED)
    });
    let tokens = JSON_TOKEN_VALUE.replace_all(&fields, |caps: &Captures| {
        if looks_like_token(&caps[2]) {
            format!("{}\"{}\"", &caps[1], REDACTED)
        } else {
            caps[0].to_string()
        }
    });
    redact_credential_shapes(&tokens)
}

fn redact_credential_shapes(text: &str) -> String {
    CREDENTIAL_SHAPES
        .iter()
        .fold(text.to_string(), |acc, shape| {
            shape.replace_all(&acc, REDACTED).into_owned()
        })
}

/// A long run of token characters mixing letters and digits.
///
/// Plain words (even long ones) carry no digits and are left alone.
fn looks_like_token(value: &str) -> bool {
    value.len() >= MIN_TOKEN_LEN
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        && value.chars().any(|c| c.is_ascii_digit())
        && value.chars().any(|c| c.is_ascii_alphabetic())
}
