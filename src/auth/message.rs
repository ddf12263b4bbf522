//! Sign-in challenge messages
//!
//! Parses the EIP-4361 text layout wallets display and sign:
//!
//! ```text
//! app.example.com wants you to sign in with your Ethereum account:
//! 0xAbC...
//!
//! Sign in to the dashboard
//!
//! URI: https://app.example.com
//! Version: 1
//! Chain ID: 1
//! Nonce: 9f2c...
//! Issued At: 2024-01-01T00:00:00Z
//! Expiration Time: 2024-01-01T00:10:00Z
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

const PREAMBLE_SUFFIX: &str = " wants you to sign in with your Ethereum account:";
const MIN_NONCE_LENGTH: usize = 8;

/// Message parsing errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum MessageError {
    #[error("Missing or malformed header line")]
    InvalidHeader,

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Invalid {field}: {value}")]
    InvalidField { field: &'static str, value: String },

    #[error("Unsupported message version: {0}")]
    UnsupportedVersion(String),

    #[error("Unexpected line: {0}")]
    UnexpectedLine(String),
}

/// A parsed sign-in message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignInMessage {
    pub domain: String,
    pub address: String,
    pub statement: Option<String>,
    pub uri: String,
    pub version: String,
    pub chain_id: u64,
    pub nonce: String,
    pub issued_at: DateTime<Utc>,
    pub expiration_time: Option<DateTime<Utc>>,
    pub not_before: Option<DateTime<Utc>>,
    pub request_id: Option<String>,
    pub resources: Vec<String>,
}

impl SignInMessage {
    /// True once `Expiration Time` has passed
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiration_time.is_some_and(|exp| now >= exp)
    }

    /// True while `Not Before` lies in the future
    pub fn is_premature_at(&self, now: DateTime<Utc>) -> bool {
        self.not_before.is_some_and(|nbf| now < nbf)
    }
}

/// Check the `0x` + 40 hex digit address shape
pub fn is_valid_address(address: &str) -> bool {
    address.len() == 42
        && address.starts_with("0x")
        && address[2..].chars().all(|c| c.is_ascii_hexdigit())
}

fn parse_time(field: &'static str, value: &str) -> Result<DateTime<Utc>, MessageError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| MessageError::InvalidField {
            field,
            value: value.to_string(),
        })
}

/// Line cursor over the tagged `Key: value` section
struct Fields<'a> {
    lines: std::iter::Peekable<std::str::Lines<'a>>,
}

impl<'a> Fields<'a> {
    fn optional(&mut self, tag: &str) -> Option<&'a str> {
        let prefix = format!("{tag}: ");
        let line: &'a str = self.lines.peek().copied()?;
        let value = line.strip_prefix(prefix.as_str())?;
        self.lines.next();
        Some(value)
    }

    fn required(&mut self, tag: &'static str) -> Result<&'a str, MessageError> {
        self.optional(tag).ok_or(MessageError::MissingField(tag))
    }
}

impl FromStr for SignInMessage {
    type Err = MessageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut lines = s.lines().peekable();

        let domain = lines
            .next()
            .and_then(|line| line.strip_suffix(PREAMBLE_SUFFIX))
            .filter(|domain| !domain.is_empty() && !domain.contains(char::is_whitespace))
            .ok_or(MessageError::InvalidHeader)?
            .to_string();

        let address = lines.next().ok_or(MessageError::MissingField("address"))?;
        if !is_valid_address(address) {
            return Err(MessageError::InvalidAddress(address.to_string()));
        }
        let address = address.to_string();

        match lines.next() {
            Some("") => {}
            Some(other) => return Err(MessageError::UnexpectedLine(other.to_string())),
            None => return Err(MessageError::MissingField("URI")),
        }

        // Optional statement, framed by blank lines
        let statement = match lines.peek() {
            Some(line) if line.starts_with("URI: ") => None,
            Some(&"") => {
                lines.next();
                None
            }
            Some(line) => {
                let statement = line.to_string();
                lines.next();
                match lines.next() {
                    Some("") => Some(statement),
                    Some(other) => return Err(MessageError::UnexpectedLine(other.to_string())),
                    None => return Err(MessageError::MissingField("URI")),
                }
            }
            None => return Err(MessageError::MissingField("URI")),
        };

        let mut fields = Fields { lines };

        let uri = fields.required("URI")?.to_string();

        let version = fields.required("Version")?.to_string();
        if version != "1" {
            return Err(MessageError::UnsupportedVersion(version));
        }

        let chain_id_raw = fields.required("Chain ID")?;
        let chain_id = chain_id_raw
            .parse::<u64>()
            .map_err(|_| MessageError::InvalidField {
                field: "Chain ID",
                value: chain_id_raw.to_string(),
            })?;

        let nonce = fields.required("Nonce")?;
        if nonce.len() < MIN_NONCE_LENGTH || !nonce.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(MessageError::InvalidField {
                field: "Nonce",
                value: nonce.to_string(),
            });
        }
        let nonce = nonce.to_string();

        let issued_at = parse_time("Issued At", fields.required("Issued At")?)?;
        let expiration_time = fields
            .optional("Expiration Time")
            .map(|v| parse_time("Expiration Time", v))
            .transpose()?;
        let not_before = fields
            .optional("Not Before")
            .map(|v| parse_time("Not Before", v))
            .transpose()?;
        let request_id = fields.optional("Request ID").map(str::to_string);

        let mut resources = Vec::new();
        if fields.lines.peek() == Some(&"Resources:") {
            fields.lines.next();
            while let Some(resource) = fields.lines.peek().and_then(|l| l.strip_prefix("- ")) {
                resources.push(resource.to_string());
                fields.lines.next();
            }
        }

        if let Some(extra) = fields.lines.find(|line| !line.is_empty()) {
            return Err(MessageError::UnexpectedLine(extra.to_string()));
        }

        Ok(SignInMessage {
            domain,
            address,
            statement,
            uri,
            version,
            chain_id,
            nonce,
            issued_at,
            expiration_time,
            not_before,
            request_id,
            resources,
        })
    }
}

impl fmt::Display for SignInMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let time = |t: &DateTime<Utc>| t.to_rfc3339_opts(SecondsFormat::Secs, true);

        writeln!(f, "{}{}", self.domain, PREAMBLE_SUFFIX)?;
        writeln!(f, "{}", self.address)?;
        writeln!(f)?;
        if let Some(statement) = &self.statement {
            writeln!(f, "{}", statement)?;
            writeln!(f)?;
        }
        writeln!(f, "URI: {}", self.uri)?;
        writeln!(f, "Version: {}", self.version)?;
        writeln!(f, "Chain ID: {}", self.chain_id)?;
        writeln!(f, "Nonce: {}", self.nonce)?;
        write!(f, "Issued At: {}", time(&self.issued_at))?;
        if let Some(exp) = &self.expiration_time {
            write!(f, "\nExpiration Time: {}", time(exp))?;
        }
        if let Some(nbf) = &self.not_before {
            write!(f, "\nNot Before: {}", time(nbf))?;
        }
        if let Some(request_id) = &self.request_id {
            write!(f, "\nRequest ID: {}", request_id)?;
        }
        if !self.resources.is_empty() {
            write!(f, "\nResources:")?;
            for resource in &self.resources {
                write!(f, "\n- {}", resource)?;
            }
        }
        Ok(())
    }
}
