//! Entry-file and wrapper emission.
//!
//! Every runnable unit gets a small generated entry module that imports its
//! rewritten body and assigns it to the single well-known slot. The slot is
//! an explicit single-assignment binding the loader writes and the remote
//! caller reads immediately after evaluation; nothing else touches ambient
//! global state.

use serde_json::{json, Value};

use crate::resources::{InputField, InputType, ResolverDefinition};

/// The well-known runnable slot, written exactly once per bundle.
pub const ENTRY_SLOT: &str = "globalThis.__LATTICE_ENTRY__";

/// Runtime services the execution platform injects into every sandbox.
pub const RUNTIME_SLOT: &str = "globalThis.__LATTICE_RUNTIME__";

const GENERATED_BANNER: &str = "// Generated by the Lattice bundler. Do not edit.";

/// Virtual module id the entry imports its rewritten body from.
pub fn pre_module_id(unit_name: &str) -> String {
    format!("./{}.pre.js", unit_name)
}

// ═══════════════════════════════════════════════════════════════════════════════
// JOB ENTRIES
// ═══════════════════════════════════════════════════════════════════════════════

/// Entry for a workflow job. When the exported binding name is known the
/// import is direct; otherwise the unit is located by its construction
/// brand, which survives rewriting because the factory attaches it at run
/// time. A main job that is never exported on its own is only reachable
/// through its workflow's export, so the finder accepts the workflow brand
/// and descends to `mainJob`.
pub fn job_entry(job_name: &str, exported_binding: Option<&str>) -> String {
    let module = pre_module_id(job_name);
    match exported_binding {
        Some(binding) => format!(
            "{banner}\nimport {{ {binding} }} from \"{module}\";\n{slot} = {binding}.body;\n",
            banner = GENERATED_BANNER,
            binding = binding,
            module = module,
            slot = ENTRY_SLOT,
        ),
        None => format!(
            "{banner}\nimport * as __unit__ from \"{module}\";\nconst __found__ = Object.values(__unit__).find(\n  (value) => value && (\n    (value.__lattice === \"job\" && value.name === \"{name}\") ||\n    (value.__lattice === \"workflow\" && value.mainJob && value.mainJob.name === \"{name}\")\n  )\n);\n{slot} = __found__.__lattice === \"job\" ? __found__.body : __found__.mainJob.body;\n",
            banner = GENERATED_BANNER,
            module = module,
            name = job_name,
            slot = ENTRY_SLOT,
        ),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RESOLVER ENTRIES
// ═══════════════════════════════════════════════════════════════════════════════

/// Entry for a request resolver: the exported body is wrapped with
/// validation generated from the declared input shape, and database-backed
/// resolvers additionally run inside an acquired transaction-capable
/// client.
pub fn resolver_entry(def: &ResolverDefinition, exported_binding: &str) -> String {
    let module = pre_module_id(&def.name);
    let validation = input_validation(&def.name, &def.input);

    let invoke = if def.database {
        format!(
            r#"{slot} = async (input) => {{
  __validateInput(input);
  const client = await {runtime}.acquireClient();
  try {{
    await client.query("BEGIN");
    const result = await {binding}.body(input, {{ client }});
    await client.query("COMMIT");
    return result;
  }} catch (error) {{
    await client.query("ROLLBACK");
    throw error;
  }} finally {{
    client.release();
  }}
}};
"#,
            slot = ENTRY_SLOT,
            runtime = RUNTIME_SLOT,
            binding = exported_binding,
        )
    } else {
        format!(
            "{slot} = async (input) => {{\n  __validateInput(input);\n  return {binding}.body(input, {{}});\n}};\n",
            slot = ENTRY_SLOT,
            binding = exported_binding,
        )
    };

    format!(
        "{banner}\nimport {{ {binding} }} from \"{module}\";\n{validation}{invoke}",
        banner = GENERATED_BANNER,
        binding = exported_binding,
        module = module,
        validation = validation,
        invoke = invoke,
    )
}

fn input_validation(resolver_name: &str, fields: &[InputField]) -> String {
    let mut lines = String::new();
    lines.push_str("const __validateInput = (input) => {\n");
    lines.push_str(&format!(
        "  if (input === null || typeof input !== \"object\") {{\n    throw new Error(\"Resolver '{}' expects an object input.\");\n  }}\n",
        resolver_name
    ));
    for field in fields {
        if field.required {
            lines.push_str(&format!(
                "  if (input.{name} === undefined) {{\n    throw new Error(\"Missing required input field '{name}'.\");\n  }}\n",
                name = field.name
            ));
        }
        let check = match field.ty {
            InputType::Array => format!("!Array.isArray(input.{})", field.name),
            InputType::Object => format!(
                "(typeof input.{name} !== \"object\" || input.{name} === null || Array.isArray(input.{name}))",
                name = field.name
            ),
            other => format!(
                "typeof input.{} !== \"{}\"",
                field.name,
                other.js_typeof()
            ),
        };
        lines.push_str(&format!(
            "  if (input.{name} !== undefined && {check}) {{\n    throw new Error(\"Input field '{name}' must be {article}.\");\n  }}\n",
            name = field.name,
            check = check,
            article = type_label(field.ty),
        ));
    }
    lines.push_str("};\n");
    lines
}

fn type_label(ty: InputType) -> &'static str {
    match ty {
        InputType::String => "a string",
        InputType::Number => "a number",
        InputType::Boolean => "a boolean",
        InputType::Object => "an object",
        InputType::Array => "an array",
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// EXECUTOR ENTRIES
// ═══════════════════════════════════════════════════════════════════════════════

pub fn executor_entry(executor_name: &str, exported_binding: &str) -> String {
    let module = pre_module_id(executor_name);
    format!(
        "{banner}\nimport {{ {binding} }} from \"{module}\";\n{slot} = {binding}.body;\n",
        banner = GENERATED_BANNER,
        binding = exported_binding,
        module = module,
        slot = ENTRY_SLOT,
    )
}

// ═══════════════════════════════════════════════════════════════════════════════
// SEEDS
// ═══════════════════════════════════════════════════════════════════════════════

/// Example invocation payload derived from the declared input shape.
/// Written create-if-absent so a hand-edited example survives rebuilds.
pub fn resolver_example_input(def: &ResolverDefinition) -> String {
    let mut example = serde_json::Map::new();
    for field in &def.input {
        example.insert(field.name.clone(), sample_value(field.ty));
    }
    let mut rendered = serde_json::to_string_pretty(&Value::Object(example))
        .unwrap_or_else(|_| "{}".to_string());
    rendered.push('\n');
    rendered
}

fn sample_value(ty: InputType) -> Value {
    match ty {
        InputType::String => json!("text"),
        InputType::Number => json!(0),
        InputType::Boolean => json!(false),
        InputType::Object => json!({}),
        InputType::Array => json!([]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{InputField, InputType, ResolverDefinition};

    fn search_resolver(database: bool) -> ResolverDefinition {
        ResolverDefinition {
            name: "search-orders".to_string(),
            input: vec![
                InputField {
                    name: "query".to_string(),
                    ty: InputType::String,
                    required: true,
                },
                InputField {
                    name: "limit".to_string(),
                    ty: InputType::Number,
                    required: false,
                },
            ],
            database,
        }
    }

    #[test]
    fn test_job_entry_assigns_slot_once() {
        let entry = job_entry("process-order", Some("processOrder"));
        assert_eq!(entry.matches(ENTRY_SLOT).count(), 1);
        assert!(entry.contains("import { processOrder } from \"./process-order.pre.js\";"));
    }

    #[test]
    fn test_job_entry_brand_fallback() {
        let entry = job_entry("process-order", None);
        assert!(entry.contains("value.__lattice === \"job\" && value.name === \"process-order\""));
        assert!(entry.contains(
            "value.__lattice === \"workflow\" && value.mainJob && value.mainJob.name === \"process-order\""
        ));
        assert!(entry.contains("__found__.mainJob.body"));
        assert_eq!(entry.matches(ENTRY_SLOT).count(), 1);
    }

    #[test]
    fn test_resolver_entry_validates_required_field() {
        let entry = resolver_entry(&search_resolver(false), "searchOrders");
        assert!(entry.contains("Missing required input field 'query'."));
        assert!(entry.contains("typeof input.query !== \"string\""));
        assert!(entry.contains("typeof input.limit !== \"number\""));
        assert!(!entry.contains("BEGIN"));
    }

    #[test]
    fn test_database_resolver_wraps_transaction() {
        let entry = resolver_entry(&search_resolver(true), "searchOrders");
        assert!(entry.contains("acquireClient"));
        assert!(entry.contains("\"BEGIN\""));
        assert!(entry.contains("\"ROLLBACK\""));
        assert!(entry.contains("client.release()"));
    }

    #[test]
    fn test_example_input_follows_shape() {
        let seed = resolver_example_input(&search_resolver(false));
        let value: serde_json::Value = serde_json::from_str(&seed).unwrap();
        assert_eq!(value["query"], "text");
        assert_eq!(value["limit"], 0);
    }
}
