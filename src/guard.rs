//! Closure-Capture Guard
//!
//! Hook and validator scripts are re-serialized as bare function text and
//! evaluated remotely in a sandbox with no closure environment. A variable
//! captured from the defining module would silently resolve to `undefined`
//! at remote run time; this guard turns that into a build-time failure by
//! proving the script's function body references nothing outside its own
//! parameters, locals, and a small fixed allow-list of ambient built-ins.

use lazy_static::lazy_static;
#[cfg(feature = "napi")]
use napi_derive::napi;
use oxc_allocator::Allocator;
use oxc_ast::ast::{ArrowFunctionExpression, Function};
use oxc_ast_visit::{walk, Visit};
use oxc_parser::Parser;
use oxc_span::SourceType;
use oxc_syntax::scope::ScopeFlags;
use std::collections::HashSet;

use crate::diagnostics::{
    BuildError, BuildResult, ERR_FREE_VARIABLE, ERR_SCRIPT_NOT_FUNCTION, ERR_SYNTAX,
};
use crate::resources::ScriptKind;

lazy_static! {
    /// Ambient built-ins a sandboxed script may always reference.
    pub static ref AMBIENT_GLOBALS: HashSet<&'static str> = {
        let mut s = HashSet::new();
        // Numeric
        s.insert("Number");
        s.insert("Math");
        s.insert("parseInt");
        s.insert("parseFloat");
        s.insert("isNaN");
        s.insert("isFinite");
        s.insert("NaN");
        s.insert("Infinity");
        // Date / string / boolean
        s.insert("Date");
        s.insert("String");
        s.insert("Boolean");
        // Collections
        s.insert("Array");
        s.insert("Object");
        s.insert("Map");
        s.insert("Set");
        s.insert("JSON");
        // Regex / errors / promises
        s.insert("RegExp");
        s.insert("Error");
        s.insert("TypeError");
        s.insert("RangeError");
        s.insert("Promise");
        s.insert("undefined");
        s
    };
}

/// Which declared field a script belongs to; used only for error labelling.
#[derive(Debug, Clone)]
pub struct ScriptLabel {
    pub type_name: String,
    pub field_name: String,
    pub kind: ScriptKind,
}

impl ScriptLabel {
    pub fn new(type_name: impl Into<String>, field_name: impl Into<String>, kind: ScriptKind) -> Self {
        ScriptLabel {
            type_name: type_name.into(),
            field_name: field_name.into(),
            kind,
        }
    }

    fn describe(&self) -> String {
        format!("{}.{} ({})", self.type_name, self.field_name, self.kind)
    }
}

/// Verify that the first function literal in `source` captures nothing from
/// its defining scope. Passes, or fails listing every offending name,
/// sorted and comma-joined.
pub fn verify_script(source: &str, label: &ScriptLabel) -> BuildResult<()> {
    let allocator = Allocator::default();
    let source_type = SourceType::default().with_typescript(true);
    let expr = match Parser::new(&allocator, source, source_type).parse_expression() {
        Ok(expr) => expr,
        Err(error) => {
            return Err(BuildError::new(
                ERR_SYNTAX,
                format!(
                    "Script for {} is not a valid expression: {:?}",
                    label.describe(),
                    error
                ),
            ));
        }
    };

    let mut auditor = FunctionAuditor::default();
    auditor.visit_expression(&expr);

    if !auditor.found {
        return Err(BuildError::new(
            ERR_SCRIPT_NOT_FUNCTION,
            format!(
                "Script for {} must contain a function expression.",
                label.describe()
            ),
        ));
    }

    let mut free: Vec<&str> = auditor
        .references
        .iter()
        .map(String::as_str)
        .filter(|name| !auditor.bound.contains(*name) && !AMBIENT_GLOBALS.contains(*name))
        .collect();
    free.sort_unstable();
    free.dedup();

    if free.is_empty() {
        Ok(())
    } else {
        Err(BuildError::new(
            ERR_FREE_VARIABLE,
            format!(
                "Script for {} references names outside its own scope: {}",
                label.describe(),
                free.join(", ")
            ),
        ))
    }
}

/// Anchors on the first function literal (arrow or ordinary) found in the
/// expression tree and audits it in place. Bound names are collected flat:
/// parameter patterns plus every declaration anywhere in the body, nested
/// blocks and nested functions included.
#[derive(Default)]
struct FunctionAuditor {
    found: bool,
    bound: HashSet<String>,
    references: Vec<String>,
}

impl FunctionAuditor {
    fn audit<'a, N>(&mut self, node: &N)
    where
        N: AuditedFunction<'a>,
    {
        let mut bindings = BindingCollector {
            symbols: &mut self.bound,
        };
        node.accept(&mut bindings);
        let mut references = ReferenceCollector {
            names: &mut self.references,
        };
        node.accept(&mut references);
    }
}

impl<'a> Visit<'a> for FunctionAuditor {
    fn visit_arrow_function_expression(&mut self, func: &ArrowFunctionExpression<'a>) {
        if self.found {
            return;
        }
        self.found = true;
        self.audit(func);
    }

    fn visit_function(&mut self, func: &Function<'a>, _flags: ScopeFlags) {
        if self.found {
            return;
        }
        self.found = true;
        self.audit(func);
    }
}

/// Dispatch helper so both function node shapes feed the same collectors.
trait AuditedFunction<'a> {
    fn accept<V: Visit<'a>>(&self, visitor: &mut V);
}

impl<'a> AuditedFunction<'a> for ArrowFunctionExpression<'a> {
    fn accept<V: Visit<'a>>(&self, visitor: &mut V) {
        visitor.visit_arrow_function_expression(self);
    }
}

impl<'a> AuditedFunction<'a> for Function<'a> {
    fn accept<V: Visit<'a>>(&self, visitor: &mut V) {
        visitor.visit_function(self, ScopeFlags::Function);
    }
}

struct BindingCollector<'s> {
    symbols: &'s mut HashSet<String>,
}

impl<'s, 'a> Visit<'a> for BindingCollector<'s> {
    fn visit_binding_identifier(&mut self, ident: &oxc_ast::ast::BindingIdentifier<'a>) {
        self.symbols.insert(ident.name.to_string());
    }

    fn visit_function(&mut self, func: &Function<'a>, flags: ScopeFlags) {
        if let Some(id) = &func.id {
            self.symbols.insert(id.name.to_string());
        }
        walk::walk_function(self, func, flags);
    }

    fn visit_class(&mut self, class: &oxc_ast::ast::Class<'a>) {
        if let Some(id) = &class.id {
            self.symbols.insert(id.name.to_string());
        }
        walk::walk_class(self, class);
    }
}

struct ReferenceCollector<'s> {
    names: &'s mut Vec<String>,
}

impl<'s, 'a> Visit<'a> for ReferenceCollector<'s> {
    fn visit_identifier_reference(&mut self, ident: &oxc_ast::ast::IdentifierReference<'a>) {
        self.names.push(ident.name.to_string());
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// NODE BRIDGE
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(feature = "napi")]
#[napi]
pub fn verify_field_script_native(
    source: String,
    type_name: String,
    field_name: String,
    kind: String,
) -> serde_json::Value {
    let kind = match kind.as_str() {
        "validator" => ScriptKind::Validator,
        _ => ScriptKind::Hook,
    };
    match verify_script(&source, &ScriptLabel::new(type_name, field_name, kind)) {
        Ok(()) => serde_json::json!({ "ok": true }),
        Err(err) => serde_json::json!({ "ok": false, "error": err }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label() -> ScriptLabel {
        ScriptLabel::new("Customer", "email", ScriptKind::Validator)
    }

    #[test]
    fn test_parameters_and_members_pass() {
        let script = "({ value, data, user }) => value ?? data?.x ?? user.id";
        assert!(verify_script(script, &label()).is_ok());
    }

    #[test]
    fn test_free_variable_fails_naming_it() {
        let script = "({ value }) => value ?? somethingElse";
        let err = verify_script(script, &label()).unwrap_err();
        assert_eq!(err.code, ERR_FREE_VARIABLE);
        assert!(err.message.ends_with("somethingElse"));
        assert!(err.message.contains("Customer.email (validator)"));
    }

    #[test]
    fn test_unbound_helper_call_fails_naming_helper() {
        let script = "(value) => normalizeEmail(value)";
        let err = verify_script(script, &label()).unwrap_err();
        assert!(err.message.ends_with("normalizeEmail"));
    }

    #[test]
    fn test_allow_listed_globals_pass() {
        let script =
            "(value) => Math.max(Number(value), isNaN(value) ? parseInt('0', 10) : Date.now())";
        assert!(verify_script(script, &label()).is_ok());
    }

    #[test]
    fn test_destructure_with_rest_and_defaults_pass() {
        let script = "({ a = 1, ...rest }, [x, y = 2]) => a + x + y + rest.z";
        assert!(verify_script(script, &label()).is_ok());
    }

    #[test]
    fn test_locals_in_nested_blocks_pass() {
        let script = r#"(value) => {
            if (value) {
                const inner = String(value);
                return inner;
            }
            function helper(n) { return n * 2; }
            return helper(0);
        }"#;
        assert!(verify_script(script, &label()).is_ok());
    }

    #[test]
    fn test_named_function_expression_can_recurse() {
        let script = "function fact(n) { return n < 2 ? 1 : n * fact(n - 1); }";
        assert!(verify_script(script, &label()).is_ok());
    }

    #[test]
    fn test_default_value_capturing_fails() {
        let script = "({ value = FALLBACK }) => value";
        let err = verify_script(script, &label()).unwrap_err();
        assert!(err.message.ends_with("FALLBACK"));
    }

    #[test]
    fn test_offenders_sorted_and_comma_joined() {
        let script = "(value) => zulu(value) + alpha(value) + zulu(value)";
        let err = verify_script(script, &label()).unwrap_err();
        assert!(err.message.ends_with("alpha, zulu"));
    }

    #[test]
    fn test_non_function_script_rejected() {
        let err = verify_script("1 + 2", &label()).unwrap_err();
        assert_eq!(err.code, ERR_SCRIPT_NOT_FUNCTION);
    }

    #[test]
    fn test_invalid_syntax_rejected() {
        let err = verify_script("({ value ) =>", &label()).unwrap_err();
        assert_eq!(err.code, ERR_SYNTAX);
    }
}
