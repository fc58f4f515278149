use std::path::Path;

use anyhow::Result;
use tracing::{info, warn};

use crate::core::goal::{AgentGoal, ToolArgument, ToolDefinition};

/// Provider of the static goal catalog: built-in demo goals plus any
/// `*.toml` goal files found in the data directory. Catalog entries are
/// immutable input; conversations copy the goal they activate.
pub struct GoalCatalog {
    goals: Vec<AgentGoal>,
}

impl GoalCatalog {
    pub fn builtin() -> Self {
        Self {
            goals: vec![billing_goal()],
        }
    }

    /// Extend the built-ins with goal files from `dir`. Unreadable or
    /// malformed files are skipped with a warning.
    pub async fn load(dir: &Path) -> Self {
        let mut catalog = Self::builtin();
        if let Err(e) = catalog.load_dir(dir).await {
            warn!("could not scan goal directory {dir:?}: {e}");
        }
        catalog
    }

    async fn load_dir(&mut self, dir: &Path) -> Result<()> {
        if !dir.is_dir() {
            return Ok(());
        }
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                continue;
            }
            match tokio::fs::read_to_string(&path).await {
                Ok(contents) => match toml::from_str::<AgentGoal>(&contents) {
                    Ok(goal) => {
                        info!("loaded goal [{}] from {path:?}", goal.id);
                        self.goals.retain(|g| g.id != goal.id);
                        self.goals.push(goal);
                    }
                    Err(e) => warn!("skipping malformed goal file {path:?}: {e}"),
                },
                Err(e) => warn!("skipping unreadable goal file {path:?}: {e}"),
            }
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&AgentGoal> {
        self.goals.iter().find(|g| g.id == id)
    }

    pub fn first(&self) -> Option<&AgentGoal> {
        self.goals.first()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.goals.iter().map(|g| g.id.as_str()).collect()
    }
}

fn billing_goal() -> AgentGoal {
    AgentGoal {
        id: "billing".to_string(),
        description: "Help the user look up customers and raise invoices. \
                      Always confirm before creating an invoice."
            .to_string(),
        tools: vec![
            ToolDefinition {
                name: "lookup_customer".to_string(),
                description: "Find a customer record by (partial) name".to_string(),
                arguments: vec![ToolArgument {
                    name: "name".to_string(),
                    arg_type: "string".to_string(),
                    description: "Customer name to search for".to_string(),
                }],
            },
            ToolDefinition {
                name: "create_invoice".to_string(),
                description: "Create a draft invoice for a customer. Payment \
                              terms default to 30 days unless the user asks \
                              for something else."
                    .to_string(),
                arguments: vec![
                    ToolArgument {
                        name: "customer_id".to_string(),
                        arg_type: "string".to_string(),
                        description: "Id returned by lookup_customer".to_string(),
                    },
                    ToolArgument {
                        name: "amount".to_string(),
                        arg_type: "number".to_string(),
                        description: "Invoice total".to_string(),
                    },
                ],
            },
        ],
        mcp_server: None,
        example_transcript: "user: I need to invoice Acme for 500\n\
                             agent: Let me look them up first.\n\
                             tool_result: {\"customer_id\": \"c-1001\"}\n\
                             agent: Found Acme Corp. Create a 500.00 invoice due in 30 days?\n\
                             user: yes\n\
                             tool_result: {\"invoice_id\": \"inv-1\", \"status\": \"draft\"}"
            .to_string(),
        starter_prompt: "Hi! I can look up customers and raise invoices for you. \
                         What do you need?"
            .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn goal_files_extend_and_override_builtins() {
        let tmp = tempfile::tempdir().unwrap();
        let goal_toml = r#"
id = "inventory"
description = "Check warehouse stock"

[[tools]]
name = "check_stock"
description = "Look up stock for a SKU"

[[tools.arguments]]
name = "sku"
type = "string"
description = "Item code"

[mcp_server]
name = "inventory"
command = "uvx"
args = ["inventory-server"]
"#;
        tokio::fs::write(tmp.path().join("inventory.toml"), goal_toml)
            .await
            .unwrap();

        let catalog = GoalCatalog::load(tmp.path()).await;
        assert!(catalog.get("billing").is_some());

        let inventory = catalog.get("inventory").unwrap();
        assert_eq!(inventory.tools.len(), 1);
        assert_eq!(inventory.tools[0].arguments[0].name, "sku");
        assert_eq!(inventory.mcp_server.as_ref().unwrap().command, "uvx");
    }

    #[test]
    fn builtin_billing_goal_is_selfconsistent() {
        let catalog = GoalCatalog::builtin();
        let goal = catalog.get("billing").unwrap();
        assert!(goal.tool("lookup_customer").is_some());
        assert!(goal.tool("create_invoice").is_some());
        assert!(!goal.starter_prompt.is_empty());
    }
}
