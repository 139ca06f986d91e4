//! Send request parsing and validation.

use std::fmt;

use serde::Deserialize;
use serde_json::Value;

use super::CommandError;
use crate::driver::ChatId;

const RECIPIENT_DIGITS: usize = 12;

/// Raw `POST /send` body. Fields are loosely typed so that numeric
/// recipients are accepted and bad shapes become `InvalidInput`.
#[derive(Debug, Default, Deserialize)]
pub struct SendRequest {
    #[serde(default)]
    pub to: Option<Value>,
    #[serde(default)]
    pub message: Option<Value>,
}

impl SendRequest {
    pub fn new(to: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            to: Some(Value::String(to.into())),
            message: Some(Value::String(message.into())),
        }
    }

    /// Check the request and extract the recipient and message body.
    pub fn validate(&self) -> Result<(Recipient, String), CommandError> {
        let (Some(to), Some(body)) = (text(self.to.as_ref()), text(self.message.as_ref())) else {
            return Err(CommandError::invalid(
                "invalid parameters: to and message are required",
            ));
        };
        let recipient = Recipient::parse(&to)?;
        Ok((recipient, body))
    }
}

/// Scalar field as text. Empty strings, `false`, zero and `null` count as
/// missing; arrays and objects are never accepted.
fn text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Bool(true) => Some("true".to_string()),
        Value::Number(n) => number_text(n),
        _ => None,
    }
}

/// Integral floats print without a fraction, so `5.2123456789e11` reads as
/// `521234567890`.
fn number_text(n: &serde_json::Number) -> Option<String> {
    if let Some(i) = n.as_i64() {
        return (i != 0).then(|| i.to_string());
    }
    if let Some(u) = n.as_u64() {
        return Some(u.to_string());
    }
    let f = n.as_f64()?;
    if f == 0.0 || !f.is_finite() {
        None
    } else if f.fract() == 0.0 && f.abs() < 1e21 {
        Some(format!("{}", f as i128))
    } else {
        Some(f.to_string())
    }
}

/// A validated recipient: exactly 12 decimal digits (country code + number).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient(String);

impl Recipient {
    pub fn parse(raw: &str) -> Result<Self, CommandError> {
        let digits = raw.trim();
        if digits.len() != RECIPIENT_DIGITS || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(CommandError::invalid(
                "recipient must be exactly 12 digits (country code + number, e.g. 52 + 10 digits for MX)",
            ));
        }
        Ok(Self(digits.to_string()))
    }

    pub fn chat_id(&self) -> ChatId {
        ChatId::user(&self.0)
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
