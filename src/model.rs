//! Core entity model: origins, source tiers, discovered and registered tools.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Delimiter between the origin slug and the tool name in protocol names.
pub const PROTOCOL_NAME_DELIMITER: &str = "__";

/// A scheme+host+port tuple identifying a website.
///
/// Never carries path or query; two tools with the same name but different
/// origins are distinct entities.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Origin(String);

impl Origin {
    /// Extract the origin from a URL string.
    ///
    /// Returns `None` for URLs without a host (e.g. `about:blank`).
    pub fn parse(url: &str) -> Option<Self> {
        let parsed = url::Url::parse(url).ok()?;
        let host = parsed.host_str()?;
        let origin = match parsed.port() {
            Some(port) => format!("{}://{}:{}", parsed.scheme(), host, port),
            None => format!("{}://{}", parsed.scheme(), host),
        };
        Some(Self(origin.to_ascii_lowercase()))
    }

    /// Slug used as the protocol-name prefix.
    ///
    /// A pure function of the origin only: the scheme is dropped and every
    /// non-alphanumeric character of host+port maps to `_`, so the same
    /// origin always yields the same prefix and name collisions across
    /// origins are impossible.
    pub fn slug(&self) -> String {
        let authority = self
            .0
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.0);
        authority
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect()
    }

    /// The origin as a string, e.g. `https://example.com`.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handle of a live execution context (a browser tab).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextId(pub i64);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a tool definition came from, in ascending precedence order.
///
/// When names collide within one origin scan, the higher tier wins.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum SourceTier {
    /// Inferred from DOM heuristics (forms, search inputs).
    HeuristicInferred,
    /// Contributed through the community registry.
    CommunityContributed,
    /// Shipped with the server as a curated definition.
    ShippedBundle,
    /// Declared by the site in markup.
    SiteDeclaredMarkup,
    /// Declared by the site through its imperative API.
    SiteDeclaredImperative,
}

impl SourceTier {
    /// Whether this tier is one of the site-declared tiers.
    pub fn is_site_declared(&self) -> bool {
        matches!(
            self,
            SourceTier::SiteDeclaredMarkup | SourceTier::SiteDeclaredImperative
        )
    }
}

/// Authentication state of the origin a tool belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthState {
    /// The page reported an authenticated session.
    Authenticated,
    /// No signal either way.
    Unknown,
    /// The tool requires login before it can be used.
    LoginRequired,
}

/// Primitive type of a schema property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyKind {
    /// JSON string.
    String,
    /// JSON number.
    Number,
    /// JSON integer.
    Integer,
    /// JSON boolean.
    Boolean,
    /// JSON array of strings.
    Array,
}

impl PropertyKind {
    fn json_type(&self) -> &'static str {
        match self {
            PropertyKind::String => "string",
            PropertyKind::Number => "number",
            PropertyKind::Integer => "integer",
            PropertyKind::Boolean => "boolean",
            PropertyKind::Array => "array",
        }
    }
}

/// One named property of a tool's input schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaProperty {
    /// Property type.
    pub kind: PropertyKind,
    /// Human description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Allowed values, if enumerated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
}

impl SchemaProperty {
    /// A string property with a description.
    pub fn string(description: impl Into<String>) -> Self {
        Self {
            kind: PropertyKind::String,
            description: Some(description.into()),
            enum_values: None,
        }
    }

    /// A string property restricted to an enumerated set of values.
    pub fn enumerated(
        description: impl Into<String>,
        values: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            kind: PropertyKind::String,
            description: Some(description.into()),
            enum_values: Some(values.into_iter().map(Into::into).collect()),
        }
    }
}

/// Object-typed input schema of a tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Named properties.
    #[serde(default)]
    pub properties: BTreeMap<String, SchemaProperty>,
    /// Names of required properties.
    #[serde(default)]
    pub required: Vec<String>,
}

impl ToolSchema {
    /// Schema with no properties.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Render as a JSON Schema value for the protocol layer.
    pub fn to_json_schema(&self) -> serde_json::Value {
        let mut properties = serde_json::Map::new();
        for (name, prop) in &self.properties {
            let mut entry = serde_json::Map::new();
            entry.insert("type".into(), json!(prop.kind.json_type()));
            if prop.kind == PropertyKind::Array {
                entry.insert("items".into(), json!({"type": "string"}));
            }
            if let Some(desc) = &prop.description {
                entry.insert("description".into(), json!(desc));
            }
            if let Some(values) = &prop.enum_values {
                entry.insert("enum".into(), json!(values));
            }
            properties.insert(name.clone(), serde_json::Value::Object(entry));
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": self.required,
        })
    }
}

/// A candidate tool as reported by a page. Immutable once produced; never
/// stored directly, always converted into a [`RegisteredTool`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredTool {
    /// Tool name, non-unique across origins.
    pub name: String,
    /// Human description.
    pub description: String,
    /// Structured input schema.
    #[serde(default)]
    pub schema: ToolSchema,
    /// Source tier tag.
    pub tier: SourceTier,
    /// Opaque execution selector, meaningful only to the page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
}

/// Stable catalog identifier, always recomputable from `(origin, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ToolId(String);

impl ToolId {
    /// Derive the identifier for `(origin, name)`.
    pub fn derive(origin: &Origin, name: &str) -> Self {
        Self(format!("{}::{}", origin.as_str(), name))
    }

    /// The identifier as a string, `origin::name` exactly.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ToolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The catalog entity: a discovered tool plus its registry lifecycle state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisteredTool {
    /// Stable identifier, `origin::name`.
    pub id: ToolId,
    /// Owning origin.
    pub origin: Origin,
    /// Tool name within the origin.
    pub name: String,
    /// Human description.
    pub description: String,
    /// Structured input schema.
    pub schema: ToolSchema,
    /// Source tier tag.
    pub tier: SourceTier,
    /// Opaque execution selector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    /// Owning execution context; `None` until a live page confirms it.
    pub context: Option<ContextId>,
    /// Page URL at time of observation.
    pub url: String,
    /// When the tool was first reported.
    pub discovered_at: DateTime<Utc>,
    /// When the tool was last confirmed by a live page.
    pub last_verified_at: DateTime<Utc>,
    /// Authentication state of the owning origin.
    pub auth: AuthState,
}

impl RegisteredTool {
    /// Build a catalog entry from a page report.
    pub fn from_discovered(
        context: ContextId,
        url: impl Into<String>,
        origin: Origin,
        discovered: DiscoveredTool,
        auth: AuthState,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ToolId::derive(&origin, &discovered.name),
            origin,
            name: discovered.name,
            description: discovered.description,
            schema: discovered.schema,
            tier: discovered.tier,
            selector: discovered.selector,
            context: Some(context),
            url: url.into(),
            discovered_at: now,
            last_verified_at: now,
            auth,
        }
    }

    /// Build an unbound catalog entry from a shipped bundle definition.
    pub fn from_bundle(origin: Origin, discovered: DiscoveredTool) -> Self {
        let now = Utc::now();
        let url = origin.as_str().to_string();
        Self {
            id: ToolId::derive(&origin, &discovered.name),
            origin,
            name: discovered.name,
            description: discovered.description,
            schema: discovered.schema,
            tier: SourceTier::ShippedBundle,
            selector: discovered.selector,
            context: None,
            url,
            discovered_at: now,
            last_verified_at: now,
            auth: AuthState::Unknown,
        }
    }

    /// The collision-free name this tool is exposed under to agents.
    pub fn protocol_name(&self) -> String {
        format!(
            "{}{}{}",
            self.origin.slug(),
            PROTOCOL_NAME_DELIMITER,
            self.name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_drops_path_and_query() {
        let origin = Origin::parse("https://example.com/search?q=1#frag").unwrap();
        assert_eq!(origin.as_str(), "https://example.com");
    }

    #[test]
    fn origin_keeps_explicit_port() {
        let origin = Origin::parse("http://localhost:8080/app").unwrap();
        assert_eq!(origin.as_str(), "http://localhost:8080");
        assert_eq!(origin.slug(), "localhost_8080");
    }

    #[test]
    fn origin_rejects_hostless_urls() {
        assert!(Origin::parse("about:blank").is_none());
        assert!(Origin::parse("not a url").is_none());
    }

    #[test]
    fn slug_is_deterministic_per_origin() {
        let origin = Origin::parse("https://a.test").unwrap();
        assert_eq!(origin.slug(), "a_test");
        assert_eq!(origin.slug(), Origin::parse("https://a.test/x").unwrap().slug());
    }

    #[test]
    fn tier_ordering_prefers_site_declared() {
        assert!(SourceTier::SiteDeclaredImperative > SourceTier::SiteDeclaredMarkup);
        assert!(SourceTier::SiteDeclaredMarkup > SourceTier::ShippedBundle);
        assert!(SourceTier::ShippedBundle > SourceTier::CommunityContributed);
        assert!(SourceTier::CommunityContributed > SourceTier::HeuristicInferred);
    }

    #[test]
    fn tool_id_matches_origin_and_name() {
        let origin = Origin::parse("https://example.com").unwrap();
        let id = ToolId::derive(&origin, "search");
        assert_eq!(id.as_str(), "https://example.com::search");
    }

    #[test]
    fn schema_renders_json_schema() {
        let mut schema = ToolSchema::empty();
        schema
            .properties
            .insert("query".into(), SchemaProperty::string("Search query"));
        schema.properties.insert(
            "section".into(),
            SchemaProperty::enumerated("Site section", ["news", "docs"]),
        );
        schema.required.push("query".into());

        let value = schema.to_json_schema();
        assert_eq!(value["type"], "object");
        assert_eq!(value["properties"]["query"]["type"], "string");
        assert_eq!(value["properties"]["section"]["enum"][1], "docs");
        assert_eq!(value["required"][0], "query");
    }
}
