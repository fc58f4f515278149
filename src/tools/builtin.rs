use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::tools::{JsonMap, ToolHandler};

/// Demo customer directory behind the `lookup_customer` tool.
const CUSTOMERS: &[(&str, &str, &str)] = &[
    ("c-1001", "Acme Corp", "billing@acme.example"),
    ("c-1002", "Globex", "accounts@globex.example"),
    ("c-1003", "Initech", "finance@initech.example"),
];

pub struct LookupCustomerTool;

#[async_trait]
impl ToolHandler for LookupCustomerTool {
    fn name(&self) -> &str {
        "lookup_customer"
    }

    async fn invoke(&self, args: &JsonMap) -> Result<JsonMap> {
        let name = args
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("lookup_customer requires a 'name' argument"))?;

        let needle = name.to_lowercase();
        let found = CUSTOMERS
            .iter()
            .find(|(_, customer, _)| customer.to_lowercase().contains(&needle))
            .ok_or_else(|| anyhow!("no customer matching '{name}'"))?;

        let (id, customer, email) = found;
        Ok(map(json!({
            "customer_id": id,
            "name": customer,
            "email": email,
        })))
    }
}

pub struct CreateInvoiceTool;

#[async_trait]
impl ToolHandler for CreateInvoiceTool {
    fn name(&self) -> &str {
        "create_invoice"
    }

    async fn invoke(&self, args: &JsonMap) -> Result<JsonMap> {
        let customer_id = args
            .get("customer_id")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("create_invoice requires a 'customer_id' argument"))?;
        let amount = args
            .get("amount")
            .and_then(Value::as_f64)
            .ok_or_else(|| anyhow!("create_invoice requires a numeric 'amount' argument"))?;
        let due_in_days = args
            .get("due_in_days")
            .and_then(Value::as_i64)
            .ok_or_else(|| anyhow!("create_invoice requires a numeric 'due_in_days' argument"))?;

        Ok(map(json!({
            "invoice_id": format!("inv-{}", Uuid::new_v4().simple()),
            "customer_id": customer_id,
            "amount": amount,
            "due_in_days": due_in_days,
            "status": "draft",
        })))
    }
}

fn map(value: Value) -> JsonMap {
    match value {
        Value::Object(map) => map,
        _ => JsonMap::new(),
    }
}
