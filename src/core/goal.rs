use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// One declared argument of a tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolArgument {
    pub name: String,
    #[serde(rename = "type", default = "default_arg_type")]
    pub arg_type: String,
    #[serde(default)]
    pub description: String,
}

fn default_arg_type() -> String {
    "string".to_string()
}

/// A tool the planner may select, local or remotely discovered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub arguments: Vec<ToolArgument>,
}

/// Launch description for an external stdio tool server.
///
/// This is the single canonical shape. Definitions sometimes arrive as
/// loosely-typed maps (catalog files written by hand, values relayed through
/// JSON); [`McpServerDefinition::from_value`] normalizes those at the ingress
/// boundary so the rest of the engine only ever sees this struct.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpServerDefinition {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Only these remote tools are merged into the goal catalog when
    /// non-empty.
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    /// Transport hint; absent means stdio. Anything else is rejected at
    /// session creation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<String>,
}

impl McpServerDefinition {
    /// Normalize a loosely-typed map form. Accepts the field aliases seen in
    /// hand-written catalogs (`server_name`, `cmd`, `allow`).
    pub fn from_value(value: &Value) -> Result<Self> {
        if let Ok(def) = serde_json::from_value::<McpServerDefinition>(value.clone()) {
            if !def.name.is_empty() && !def.command.is_empty() {
                return Ok(def);
            }
        }

        let obj = value
            .as_object()
            .ok_or_else(|| anyhow!("tool server definition must be an object"))?;

        let name = string_field(obj, &["name", "server_name"])
            .ok_or_else(|| anyhow!("tool server definition missing 'name'"))?;
        let command = string_field(obj, &["command", "cmd"])
            .ok_or_else(|| anyhow!("tool server definition missing 'command'"))?;

        Ok(Self {
            name,
            command,
            args: string_list(obj.get("args")),
            env: string_map(obj.get("env")),
            allowed_tools: string_list(
                obj.get("allowed_tools")
                    .or_else(|| obj.get("allow"))
                    .or_else(|| obj.get("tool_allow_list")),
            ),
            transport: obj
                .get("transport")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }

    pub fn identity(&self) -> ServerIdentity {
        ServerIdentity {
            name: self.name.clone(),
            command: self.command.clone(),
            args: self.args.clone(),
        }
    }
}

fn string_field(obj: &serde_json::Map<String, Value>, names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|n| obj.get(*n).and_then(Value::as_str))
        .map(str::to_string)
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn string_map(value: Option<&Value>) -> HashMap<String, String> {
    value
        .and_then(Value::as_object)
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

/// Pool key for a tool-server session. Two definitions address the same
/// server exactly when (name, command, args) agree, whatever shape they
/// arrived in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerIdentity {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
}

impl std::fmt::Display for ServerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.command)
    }
}

/// What an agent is trying to accomplish: the goal text, the tools it may
/// use, and optionally an external tool server to discover more from.
///
/// Catalog input is immutable; conversations work on their own copy whose
/// tool list may be append-only augmented with discovered remote tools.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentGoal {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mcp_server: Option<McpServerDefinition>,
    #[serde(default)]
    pub example_transcript: String,
    #[serde(default)]
    pub starter_prompt: String,
}

impl AgentGoal {
    pub fn tool(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.iter().find(|t| t.name == name)
    }

    /// Append-only merge of discovered remote tools, keyed by name. Calling
    /// twice with the same discovery set is a no-op the second time.
    pub fn merge_remote_tools(&mut self, discovered: Vec<ToolDefinition>) -> usize {
        let mut added = 0;
        for tool in discovered {
            if self.tool(&tool.name).is_some() {
                debug!("skipping already-known tool [{}]", tool.name);
                continue;
            }
            self.tools.push(tool);
            added += 1;
        }
        added
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_def() -> McpServerDefinition {
        McpServerDefinition {
            name: "inventory".to_string(),
            command: "uvx".to_string(),
            args: vec!["inventory-server".to_string()],
            env: HashMap::from([("API_TOKEN".to_string(), "t".to_string())]),
            allowed_tools: vec!["check_stock".to_string()],
            transport: None,
        }
    }

    #[test]
    fn loose_map_form_normalizes_to_same_identity() {
        let structured = sample_def();
        let loose = json!({
            "server_name": "inventory",
            "cmd": "uvx",
            "args": ["inventory-server"],
            "env": {"API_TOKEN": "t"},
            "allow": ["check_stock"],
        });

        let normalized = McpServerDefinition::from_value(&loose).unwrap();
        assert_eq!(normalized.identity(), structured.identity());
        assert_eq!(normalized.allowed_tools, structured.allowed_tools);
    }

    #[test]
    fn canonical_object_form_round_trips() {
        let def = sample_def();
        let value = serde_json::to_value(&def).unwrap();
        let back = McpServerDefinition::from_value(&value).unwrap();
        assert_eq!(back, def);
    }

    #[test]
    fn merge_remote_tools_is_idempotent() {
        let mut goal = AgentGoal {
            id: "g".to_string(),
            description: "demo".to_string(),
            tools: vec![ToolDefinition {
                name: "local_lookup".to_string(),
                description: String::new(),
                arguments: Vec::new(),
            }],
            ..Default::default()
        };

        let discovered = vec![
            ToolDefinition {
                name: "check_stock".to_string(),
                description: "remote".to_string(),
                arguments: Vec::new(),
            },
            ToolDefinition {
                name: "local_lookup".to_string(),
                description: "shadowed".to_string(),
                arguments: Vec::new(),
            },
        ];

        assert_eq!(goal.merge_remote_tools(discovered.clone()), 1);
        assert_eq!(goal.merge_remote_tools(discovered), 0);
        assert_eq!(goal.tools.len(), 2);
        // The local definition wins over the remote one with the same name.
        assert_eq!(goal.tool("local_lookup").unwrap().description, "");
    }
}
