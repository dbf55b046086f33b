//! Call-Site Extractor
//!
//! Walks a parsed module depth-first and captures every job-factory
//! invocation whose first argument is an object literal with a string-literal
//! `name` and a function-literal `body`. Anything else that happens to call a
//! factory binding is silently ignored; partial or incidental matches are not
//! errors. For each match the extractor records byte ranges for `name`,
//! `body`, the optional `deps` property, and the nearest enclosing top-level
//! (possibly exported) variable-declaration statement so the rewriter can
//! remove the whole statement later. When no such statement exists, no
//! statement range is recorded and the rewriter falls back to a body-only
//! replacement.

use lazy_static::lazy_static;
#[cfg(feature = "napi")]
use napi_derive::napi;
use oxc_allocator::Allocator;
use oxc_ast::ast::{
    CallExpression, Declaration, Expression, ObjectPropertyKind, PropertyKey, Statement,
    VariableDeclaration,
};
use oxc_ast_visit::{walk, Visit};
use oxc_parser::Parser;
use oxc_span::{GetSpan, SourceType, Span};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::bindings::{resolve_factory_bindings, FactoryBindings, FactoryCapability};
use crate::diagnostics::{BuildError, BuildResult, ERR_INVALID_JOB_NAME, ERR_SYNTAX};

lazy_static! {
    /// Platform constraint on job names; the control plane rejects anything
    /// else at upload time, so the extractor rejects it at build time.
    static ref JOB_NAME_RE: Regex = Regex::new(r"^[a-z][a-z0-9-]*$").unwrap();
}

// ═══════════════════════════════════════════════════════════════════════════════
// CALL-SITE TYPES
// ═══════════════════════════════════════════════════════════════════════════════

/// Half-open byte range into the pristine source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    pub start: u32,
    pub end: u32,
}

impl ByteRange {
    pub fn of(span: Span) -> Self {
        ByteRange {
            start: span.start,
            end: span.end,
        }
    }

    pub fn slice<'s>(&self, source: &'s str) -> &'s str {
        &source[self.start as usize..self.end as usize]
    }
}

/// One discovered factory invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCallSite {
    pub name: String,
    pub name_range: ByteRange,
    pub body_range: ByteRange,
    pub deps_range: Option<ByteRange>,
    pub statement_range: Option<ByteRange>,
    pub exported_binding: Option<String>,
    pub source_file: String,
}

// ═══════════════════════════════════════════════════════════════════════════════
// DISCOVERY
// ═══════════════════════════════════════════════════════════════════════════════

/// Parse `source` and return every factory call site, in document order.
pub fn discover_job_sites(
    source: &str,
    file: &str,
    capability: &FactoryCapability,
) -> BuildResult<Vec<JobCallSite>> {
    let allocator = Allocator::default();
    let source_type = SourceType::default().with_typescript(true).with_module(true);
    let ret = Parser::new(&allocator, source, source_type).parse();
    if !ret.errors.is_empty() {
        return Err(BuildError::in_file(
            ERR_SYNTAX,
            format!("Failed to parse module: {:?}", ret.errors[0]),
            file,
        ));
    }

    let bindings = resolve_factory_bindings(&ret.program, capability);
    if bindings.is_empty() {
        return Ok(Vec::new());
    }

    let mut collector = CallSiteCollector {
        bindings: &bindings,
        source_file: file,
        ctx: None,
        sites: Vec::new(),
        errors: Vec::new(),
    };

    for stmt in &ret.program.body {
        match stmt {
            Statement::VariableDeclaration(decl) => {
                collector.scan_declaration(decl, decl.span);
            }
            Statement::ExportNamedDeclaration(export) => {
                if let Some(Declaration::VariableDeclaration(decl)) = &export.declaration {
                    collector.scan_declaration(decl, export.span);
                }
            }
            other => {
                collector.ctx = None;
                collector.visit_statement(other);
            }
        }
    }

    if let Some(err) = collector.errors.into_iter().next() {
        return Err(err);
    }
    Ok(collector.sites)
}

#[derive(Clone)]
struct SiteContext {
    statement_range: ByteRange,
    binding: Option<String>,
}

struct CallSiteCollector<'c> {
    bindings: &'c FactoryBindings,
    source_file: &'c str,
    ctx: Option<SiteContext>,
    sites: Vec<JobCallSite>,
    errors: Vec<BuildError>,
}

impl<'c> CallSiteCollector<'c> {
    fn scan_declaration(&mut self, decl: &VariableDeclaration, stmt_span: Span) {
        for declarator in &decl.declarations {
            let binding = match &declarator.id {
                oxc_ast::ast::BindingPattern::BindingIdentifier(id) => Some(id.name.to_string()),
                _ => None,
            };
            self.ctx = Some(SiteContext {
                statement_range: ByteRange::of(stmt_span),
                binding,
            });
            if let Some(init) = &declarator.init {
                self.visit_expression(init);
            }
        }
        self.ctx = None;
    }

    fn is_factory_callee(&self, callee: &Expression) -> bool {
        match callee {
            Expression::Identifier(id) => self.bindings.direct.contains(id.name.as_str()),
            Expression::StaticMemberExpression(member) => {
                if let Expression::Identifier(object) = &member.object {
                    self.bindings.namespace.contains(object.name.as_str())
                        && self.bindings.member_is_factory(member.property.name.as_str())
                } else {
                    false
                }
            }
            _ => false,
        }
    }

    fn try_capture(&mut self, call: &CallExpression) {
        let object = match call.arguments.first().and_then(|arg| arg.as_expression()) {
            Some(Expression::ObjectExpression(object)) => object,
            _ => return,
        };

        let mut name: Option<(String, ByteRange)> = None;
        let mut body: Option<ByteRange> = None;
        let mut deps: Option<ByteRange> = None;

        for prop in &object.properties {
            let prop = match prop {
                ObjectPropertyKind::ObjectProperty(prop) => prop,
                ObjectPropertyKind::SpreadProperty(_) => continue,
            };
            let key = match &prop.key {
                PropertyKey::StaticIdentifier(id) => id.name.to_string(),
                PropertyKey::StringLiteral(lit) => lit.value.to_string(),
                _ => continue,
            };
            match key.as_str() {
                "name" => {
                    if let Expression::StringLiteral(lit) = &prop.value {
                        name = Some((lit.value.to_string(), ByteRange::of(lit.span)));
                    }
                }
                "body" => match &prop.value {
                    Expression::ArrowFunctionExpression(_) | Expression::FunctionExpression(_) => {
                        body = Some(ByteRange::of(prop.value.span()));
                    }
                    _ => {}
                },
                "deps" => {
                    // Key through value; the trailing comma is consumed by
                    // the rewriter.
                    deps = Some(ByteRange::of(prop.span));
                }
                _ => {}
            }
        }

        let ((name, name_range), body_range) = match (name, body) {
            (Some(name), Some(body)) => (name, body),
            _ => return,
        };

        if !JOB_NAME_RE.is_match(&name) {
            self.errors.push(BuildError::in_file(
                ERR_INVALID_JOB_NAME,
                format!("Job name '{}' is not a valid platform name.", name),
                self.source_file,
            ));
            return;
        }

        let ctx = self.ctx.clone();
        self.sites.push(JobCallSite {
            name,
            name_range,
            body_range,
            deps_range: deps,
            statement_range: ctx.as_ref().map(|c| c.statement_range),
            exported_binding: ctx.as_ref().and_then(|c| c.binding.clone()),
            source_file: self.source_file.to_string(),
        });
    }
}

impl<'a, 'c> Visit<'a> for CallSiteCollector<'c> {
    fn visit_call_expression(&mut self, call: &CallExpression<'a>) {
        if self.is_factory_callee(&call.callee) {
            self.try_capture(call);
        }
        walk::walk_call_expression(self, call);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// NODE BRIDGE
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(feature = "napi")]
#[napi]
pub fn discover_job_sites_native(source: String, file: String) -> serde_json::Value {
    match discover_job_sites(&source, &file, &crate::bindings::JOB_FACTORY) {
        Ok(sites) => serde_json::json!({ "sites": sites }),
        Err(err) => serde_json::json!({ "error": err }),
    }
}
