//! Curated shipped-bundle tool definitions.
//!
//! Registered synchronously at startup, unbound until a live page at the
//! matching origin confirms them. Live discovery always wins over these.

use crate::model::{DiscoveredTool, Origin, SchemaProperty, SourceTier, ToolSchema};
use crate::registry::ToolRegistry;

fn bundle_tool(
    name: &str,
    description: &str,
    properties: Vec<(&str, SchemaProperty)>,
    required: Vec<&str>,
    selector: &str,
) -> DiscoveredTool {
    let mut schema = ToolSchema::empty();
    for (key, prop) in properties {
        schema.properties.insert(key.into(), prop);
    }
    schema.required = required.into_iter().map(Into::into).collect();
    DiscoveredTool {
        name: name.into(),
        description: description.into(),
        schema,
        tier: SourceTier::ShippedBundle,
        selector: Some(selector.into()),
    }
}

/// The shipped bundle: well-known origins and their curated tools.
pub fn builtin_bundles() -> Vec<(Origin, Vec<DiscoveredTool>)> {
    let entries = [
        (
            "https://en.wikipedia.org",
            vec![bundle_tool(
                "search",
                "Search Wikipedia articles by keyword.",
                vec![("query", SchemaProperty::string("Search terms"))],
                vec!["query"],
                "form#searchform input[name=search]",
            )],
        ),
        (
            "https://github.com",
            vec![
                bundle_tool(
                    "search",
                    "Search GitHub repositories, code and issues.",
                    vec![
                        ("query", SchemaProperty::string("Search terms")),
                        (
                            "kind",
                            SchemaProperty::enumerated(
                                "What to search",
                                ["repositories", "code", "issues"],
                            ),
                        ),
                    ],
                    vec!["query"],
                    "form[action='/search'] input[name=q]",
                ),
                bundle_tool(
                    "open_notifications",
                    "Open the notifications inbox.",
                    vec![],
                    vec![],
                    "a[href='/notifications']",
                ),
            ],
        ),
    ];

    entries
        .into_iter()
        .filter_map(|(origin, tools)| Origin::parse(origin).map(|o| (o, tools)))
        .collect()
}

/// Register every builtin bundle with the registry.
pub fn register_builtin(registry: &ToolRegistry) {
    for (origin, tools) in builtin_bundles() {
        tracing::debug!(origin = %origin, count = tools.len(), "registering bundled tools");
        registry.register_bundled(&origin, tools);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_bundles_register_unbound() {
        let registry = ToolRegistry::new();
        register_builtin(&registry);

        assert!(registry.len() >= 3);
        assert!(registry.to_protocol_list().is_empty());
        for tool in registry.get_all() {
            assert_eq!(tool.tier, SourceTier::ShippedBundle);
            assert!(tool.context.is_none());
        }
    }
}
