//! Basic shape check for generated workflow artifacts.
//!
//! Not a schema validator: it only checks the fields every workflow needs
//! so the caller has concrete validation errors to record as feedback.

use std::collections::HashSet;

use serde_json::Value;

const REQUIRED_NODE_FIELDS: [&str; 3] = ["id", "name", "type"];

/// Returns the list of shape errors; empty means the artifact passed.
pub fn check_workflow(workflow: &Value) -> Vec<String> {
    let Some(obj) = workflow.as_object() else {
        return vec!["Workflow must be a JSON object".to_string()];
    };
    if obj.is_empty() {
        return vec!["No workflow generated".to_string()];
    }

    let mut errors = Vec::new();
    if !obj.contains_key("nodes") {
        errors.push("Missing 'nodes' field".to_string());
    }
    if !obj.contains_key("connections") {
        errors.push("Missing 'connections' field".to_string());
    }

    match obj.get("nodes").and_then(Value::as_array) {
        Some(nodes) if !nodes.is_empty() => {
            let mut seen = HashSet::new();
            for (i, node) in nodes.iter().enumerate() {
                for field in REQUIRED_NODE_FIELDS {
                    if node.get(field).is_none() {
                        errors.push(format!("Node {}: missing '{}' field", i, field));
                    }
                }
                if let Some(id) = node.get("id") {
                    let key = id.to_string();
                    if !seen.insert(key) {
                        errors.push(format!("Duplicate node ID: {}", id.as_str().unwrap_or(&id.to_string())));
                    }
                }
            }
        }
        _ => errors.push("No nodes found in workflow".to_string()),
    }
    errors
}

/// Block ids (`type` fields) used by a workflow, in node order.
pub fn workflow_blocks(workflow: &Value) -> Vec<String> {
    workflow
        .get("nodes")
        .and_then(Value::as_array)
        .map(|nodes| {
            nodes
                .iter()
                .filter_map(|n| n.get("type").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_workflow() {
        let wf = json!({
            "nodes": [
                {"id": "1", "name": "Webhook", "type": "n8n-nodes-base.webhook"},
                {"id": "2", "name": "Slack", "type": "n8n-nodes-base.slack"}
            ],
            "connections": {"Webhook": {"main": [[{"node": "Slack"}]]}}
        });
        assert!(check_workflow(&wf).is_empty());
        assert_eq!(
            workflow_blocks(&wf),
            vec!["n8n-nodes-base.webhook", "n8n-nodes-base.slack"]
        );
    }

    #[test]
    fn test_missing_fields_and_duplicates() {
        let wf = json!({
            "nodes": [
                {"id": "1", "name": "A", "type": "x"},
                {"id": "1", "type": "y"}
            ]
        });
        let errors = check_workflow(&wf);
        assert!(errors.contains(&"Missing 'connections' field".to_string()));
        assert!(errors.contains(&"Node 1: missing 'name' field".to_string()));
        assert!(errors.contains(&"Duplicate node ID: 1".to_string()));
    }

    #[test]
    fn test_degenerate_inputs() {
        assert_eq!(check_workflow(&json!({})), vec!["No workflow generated"]);
        assert_eq!(check_workflow(&json!([1])), vec!["Workflow must be a JSON object"]);
        let errors = check_workflow(&json!({"nodes": [], "connections": {}}));
        assert_eq!(errors, vec!["No nodes found in workflow"]);
    }
}
