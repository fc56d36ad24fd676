//! Credential bodies
//!
//! Files in the `credential` category hold a small TOML document. Known
//! fields map onto [`Credential`]; any other key the user added by hand is
//! kept in [`Credential::others`] so a decode/encode cycle never drops it.

use privage_core::{PrivageError, PrivageResult};
use rand::Rng;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::Write;

/// Length of generated passwords.
pub const PASSWORD_LEN: usize = 25;

const PASSWORD_CHARSET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789!#$%&()*+,-./:;<=>?@[]^_{|}~";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Credential {
    pub login: String,
    pub password: String,
    pub email: String,
    pub url: String,
    pub api_key: String,
    pub api_secret: String,
    pub api_name: String,
    pub api_passphrase: String,
    pub verification_code: String,
    pub two_factor_auth: bool,
    pub remarks: String,
    #[serde(flatten)]
    pub others: BTreeMap<String, toml::Value>,
}

impl Credential {
    /// A fresh credential with a random password.
    pub fn generate(login: &str, email: &str) -> Self {
        Self {
            login: login.to_string(),
            email: email.to_string(),
            password: generate_password(PASSWORD_LEN),
            ..Self::default()
        }
    }

    /// Decode a credential body. Bad TOML is a [`PrivageError::Validation`].
    pub fn parse(bytes: &[u8]) -> PrivageResult<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| PrivageError::Validation(format!("credential is not UTF-8: {e}")))?;
        toml::from_str(text).map_err(|e| PrivageError::Validation(format!("invalid credential: {e}")))
    }

    /// Template form: every known field in a fixed order, then `remarks`,
    /// then any extra keys.
    pub fn to_toml(&self) -> PrivageResult<String> {
        let mut out = String::new();
        for (name, value) in self.string_fields() {
            out.push_str(&format!("{name} = {}\n", quote(value)));
        }
        out.push_str(&format!("two_factor_auth = {}\n", self.two_factor_auth));
        out.push_str(&format!("remarks = {}\n", multiline(&self.remarks)));

        if !self.others.is_empty() {
            let extra = toml::to_string(&self.others)
                .map_err(|e| PrivageError::Validation(format!("encoding extra fields: {e}")))?;
            out.push('\n');
            out.push_str(&extra);
        }
        Ok(out)
    }

    /// Human-facing view: one line per non-empty field.
    pub fn render(&self, out: &mut dyn Write) -> std::io::Result<()> {
        for (name, value) in self.string_fields() {
            if value.is_empty() {
                continue;
            }
            writeln!(out, "{} {value}", emoji(name))?;
        }
        if self.two_factor_auth {
            writeln!(out, "🔐 two factor authentication enabled")?;
        }
        if !self.remarks.trim().is_empty() {
            writeln!(out, "📝 {}", self.remarks.trim_end())?;
        }
        for (name, value) in &self.others {
            writeln!(out, "   {name}: {}", display_value(value))?;
        }
        Ok(())
    }

    /// A single field by name, known or extra. Empty known fields are `None`.
    pub fn field(&self, name: &str) -> Option<String> {
        match name {
            "two_factor_auth" => return Some(self.two_factor_auth.to_string()),
            "remarks" => return non_empty(&self.remarks),
            _ => {}
        }
        if let Some((_, value)) = self.string_fields().into_iter().find(|(n, _)| *n == name) {
            return non_empty(value);
        }
        self.others.get(name).map(display_value)
    }

    fn string_fields(&self) -> [(&'static str, &str); 9] {
        [
            ("login", self.login.as_str()),
            ("password", self.password.as_str()),
            ("email", self.email.as_str()),
            ("url", self.url.as_str()),
            ("api_key", self.api_key.as_str()),
            ("api_secret", self.api_secret.as_str()),
            ("api_name", self.api_name.as_str()),
            ("api_passphrase", self.api_passphrase.as_str()),
            ("verification_code", self.verification_code.as_str()),
        ]
    }
}

/// Random password over letters, digits and punctuation.
pub fn generate_password(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| PASSWORD_CHARSET[rng.gen_range(0..PASSWORD_CHARSET.len())] as char)
        .collect()
}

fn emoji(field: &str) -> &'static str {
    match field {
        "login" => "👤",
        "password" => "🔑",
        "email" => "📧",
        "url" => "🌐",
        "api_key" => "🗝️",
        "api_secret" => "🤫",
        "api_name" => "🏷️",
        "api_passphrase" => "🔏",
        "verification_code" => "🔢",
        _ => "•",
    }
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

fn quote(s: &str) -> String {
    toml::Value::String(s.to_string()).to_string()
}

fn display_value(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// `'''` literal block when the text allows it, a basic string otherwise.
fn multiline(s: &str) -> String {
    let literal_ok = !s.contains("'''")
        && !s.ends_with('\'')
        && s.chars().all(|c| c == '\n' || c == '\t' || !c.is_control());
    if literal_ok {
        format!("'''\n{s}'''")
    } else {
        quote(s)
    }
}
