//! Configuration data structures for Tollgate.
//!
//! These types map directly to the `gateway-config.json` document: a JSON
//! object whose keys are route names and whose values describe one upstream
//! each. They are serde-friendly and include defaults so that minimal entries
//! remain concise. Builders here are part of the public API for embedding and
//! tests.
use std::{collections::HashMap, fmt};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{
    Deserialize, Deserializer, Serialize,
    de::{self, MapAccess, Visitor},
};

/// Default request body limit applied when an entry omits `requestSizeLimit`.
pub const DEFAULT_REQUEST_SIZE_LIMIT: &str = "1mb";

static SIZE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(\d+(?:\.\d+)?)\s*(b|kb|mb|gb|tb|pb)?\s*$").expect("invalid size regex")
});

/// Maximum accepted request body size, parsed from strings such as `"5mb"`.
///
/// Units are 1024-based and case-insensitive. A bare number (string or
/// integer) is a byte count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SizeLimitRepr", into = "u64")]
pub struct RequestSizeLimit(u64);

impl RequestSizeLimit {
    pub const fn from_bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    pub fn bytes(&self) -> u64 {
        self.0
    }

    /// Limit as a `usize`, saturating on 32-bit targets.
    pub fn as_usize(&self) -> usize {
        usize::try_from(self.0).unwrap_or(usize::MAX)
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        let captures = SIZE_PATTERN
            .captures(raw)
            .ok_or_else(|| format!("invalid request size limit '{raw}'"))?;

        let value: f64 = captures[1]
            .parse()
            .map_err(|_| format!("invalid request size limit '{raw}'"))?;
        let unit = captures
            .get(2)
            .map(|m| m.as_str().to_ascii_lowercase())
            .unwrap_or_else(|| "b".to_string());

        let multiplier: u64 = match unit.as_str() {
            "b" => 1,
            "kb" => 1 << 10,
            "mb" => 1 << 20,
            "gb" => 1 << 30,
            "tb" => 1 << 40,
            "pb" => 1 << 50,
            other => return Err(format!("unknown size unit '{other}' in '{raw}'")),
        };

        Ok(Self((value * multiplier as f64).floor() as u64))
    }
}

impl Default for RequestSizeLimit {
    fn default() -> Self {
        Self(1 << 20)
    }
}

impl fmt::Display for RequestSizeLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}b", self.0)
    }
}

impl From<RequestSizeLimit> for u64 {
    fn from(limit: RequestSizeLimit) -> Self {
        limit.0
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SizeLimitRepr {
    Bytes(u64),
    Text(String),
}

impl TryFrom<SizeLimitRepr> for RequestSizeLimit {
    type Error = String;

    fn try_from(repr: SizeLimitRepr) -> Result<Self, Self::Error> {
        match repr {
            SizeLimitRepr::Bytes(bytes) => Ok(Self(bytes)),
            SizeLimitRepr::Text(text) => Self::parse(&text),
        }
    }
}

/// Authentication delegation for a protected route.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct AuthenticationConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Name of the route entry acting as identity service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
}

/// One named gateway entry, mounted under `/api/<name>`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RouteEntry {
    /// Filled from the enclosing map key.
    #[serde(skip)]
    pub name: String,
    /// Upstream base URL.
    pub url: String,
    #[serde(default)]
    pub request_size_limit: RequestSizeLimit,
    /// Forwarding timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    /// Use TLS toward the upstream.
    #[serde(default)]
    pub https: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication: Option<AuthenticationConfig>,
}

impl RouteEntry {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            request_size_limit: RequestSizeLimit::default(),
            timeout: None,
            https: false,
            authentication: None,
        }
    }

    /// Protect this route with the identity service registered as `service`.
    pub fn with_identity_service(mut self, service: impl Into<String>) -> Self {
        self.authentication = Some(AuthenticationConfig {
            enabled: true,
            service: Some(service.into()),
        });
        self
    }

    pub fn with_authentication(mut self, authentication: AuthenticationConfig) -> Self {
        self.authentication = Some(authentication);
        self
    }

    pub fn with_timeout_ms(mut self, timeout: u64) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_request_size_limit(mut self, limit: RequestSizeLimit) -> Self {
        self.request_size_limit = limit;
        self
    }

    pub fn with_https(mut self, https: bool) -> Self {
        self.https = https;
        self
    }

    pub fn auth_enabled(&self) -> bool {
        self.authentication.as_ref().is_some_and(|a| a.enabled)
    }

    /// Identity service name, only when authentication is enabled.
    pub fn identity_service(&self) -> Option<&str> {
        self.authentication
            .as_ref()
            .filter(|a| a.enabled)
            .and_then(|a| a.service.as_deref())
    }
}

/// Immutable mapping from route name to [`RouteEntry`], in document order.
///
/// Built once at startup and only ever read afterwards, so it can be shared
/// across request handlers without synchronisation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteTable {
    entries: Vec<RouteEntry>,
    index: HashMap<String, usize>,
}

impl RouteTable {
    /// Build a table from entries, rejecting duplicate names.
    pub fn from_entries(entries: impl IntoIterator<Item = RouteEntry>) -> Result<Self, String> {
        let mut table = Self::default();
        for entry in entries {
            table.push(entry)?;
        }
        Ok(table)
    }

    fn push(&mut self, entry: RouteEntry) -> Result<(), String> {
        if self.index.contains_key(&entry.name) {
            return Err(format!("duplicate route name '{}'", entry.name));
        }
        self.index.insert(entry.name.clone(), self.entries.len());
        self.entries.push(entry);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&RouteEntry> {
        self.index.get(name).map(|&i| &self.entries[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &RouteEntry> {
        self.entries.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn protected_count(&self) -> usize {
        self.entries.iter().filter(|e| e.auth_enabled()).count()
    }
}

impl<'a> IntoIterator for &'a RouteTable {
    type Item = &'a RouteEntry;
    type IntoIter = std::slice::Iter<'a, RouteEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl<'de> Deserialize<'de> for RouteTable {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct RouteTableVisitor;

        impl<'de> Visitor<'de> for RouteTableVisitor {
            type Value = RouteTable;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of route names to route entries")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut table = RouteTable::default();
                while let Some((name, mut entry)) = map.next_entry::<String, RouteEntry>()? {
                    entry.name = name;
                    table.push(entry).map_err(de::Error::custom)?;
                }
                Ok(table)
            }
        }

        deserializer.deserialize_map(RouteTableVisitor)
    }
}

impl Serialize for RouteTable {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;

        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for entry in &self.entries {
            map.serialize_entry(&entry.name, entry)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_size_limits_with_units() {
        assert_eq!(RequestSizeLimit::parse("5mb").unwrap().bytes(), 5 * 1024 * 1024);
        assert_eq!(RequestSizeLimit::parse("100KB").unwrap().bytes(), 100 * 1024);
        assert_eq!(
            RequestSizeLimit::parse("1.5mb").unwrap().bytes(),
            1024 * 1024 + 512 * 1024
        );
        assert_eq!(RequestSizeLimit::parse("512b").unwrap().bytes(), 512);
        assert_eq!(RequestSizeLimit::parse("2048").unwrap().bytes(), 2048);
        assert_eq!(RequestSizeLimit::parse(" 1 gb ").unwrap().bytes(), 1 << 30);
    }

    #[test]
    fn test_rejects_unknown_size_units() {
        assert!(RequestSizeLimit::parse("5 parsecs").is_err());
        assert!(RequestSizeLimit::parse("-5mb").is_err());
        assert!(RequestSizeLimit::parse("").is_err());
    }

    #[test]
    fn test_entry_defaults_apply() {
        let entry: RouteEntry = serde_json::from_str(r#"{"url": "http://users:4000"}"#).unwrap();
        assert_eq!(entry.request_size_limit, RequestSizeLimit::default());
        assert_eq!(entry.timeout, None);
        assert!(!entry.https);
        assert!(!entry.auth_enabled());
        assert_eq!(entry.identity_service(), None);
    }

    #[test]
    fn test_entry_accepts_numeric_size_limit() {
        let entry: RouteEntry =
            serde_json::from_str(r#"{"url": "http://users:4000", "requestSizeLimit": 4096}"#)
                .unwrap();
        assert_eq!(entry.request_size_limit.bytes(), 4096);
    }

    #[test]
    fn test_disabled_authentication_hides_service() {
        let entry = RouteEntry::new("orders", "http://orders").with_authentication(
            AuthenticationConfig {
                enabled: false,
                service: Some("identity".to_string()),
            },
        );
        assert!(!entry.auth_enabled());
        assert_eq!(entry.identity_service(), None);
    }

    #[test]
    fn test_table_keeps_document_order() {
        let json = r#"{
            "zeta": {"url": "http://zeta"},
            "alpha": {"url": "http://alpha", "authentication": {"enabled": true, "service": "zeta"}},
            "mid": {"url": "http://mid"}
        }"#;
        let table: RouteTable = serde_json::from_str(json).unwrap();
        assert_eq!(table.names().collect::<Vec<_>>(), vec!["zeta", "alpha", "mid"]);
        assert_eq!(table.get("alpha").unwrap().identity_service(), Some("zeta"));
        assert_eq!(table.protected_count(), 1);
    }

    #[test]
    fn test_table_rejects_duplicate_names() {
        let json = r#"{"a": {"url": "http://a"}, "a": {"url": "http://b"}}"#;
        let err = serde_json::from_str::<RouteTable>(json).unwrap_err();
        assert!(err.to_string().contains("duplicate route name 'a'"));
    }

    #[test]
    fn test_table_serializes_back_to_named_map() {
        let table = RouteTable::from_entries([
            RouteEntry::new("identity", "http://identity:5000"),
            RouteEntry::new("users", "http://users:4000").with_identity_service("identity"),
        ])
        .unwrap();
        let value = serde_json::to_value(&table).unwrap();
        assert_eq!(value["users"]["authentication"]["service"], "identity");
        assert_eq!(value["identity"]["requestSizeLimit"], 1024 * 1024);
    }
}
