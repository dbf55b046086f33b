//! Binding Resolver
//!
//! Finds every local name that denotes the job-factory capability, across
//! import styles: named import (with or without rename), default and
//! namespace imports accessed by member expression, dynamic `import()`
//! destructured or kept whole, and `require` used either way. Any sub-path
//! of the capability module counts (`@lattice/backend/jobs` supplies the
//! same factory as `@lattice/backend`).
//!
//! Only literal import/require right-hand sides are tracked. A later plain
//! reassignment (`const create = importedName`) is NOT tracked; this is a
//! known, accepted false negative and is pinned by a test below.

use oxc_ast::ast::{
    BindingPattern, Expression, ImportDeclaration, ImportDeclarationSpecifier, ModuleExportName,
    PropertyKey, VariableDeclarator,
};
use oxc_ast_visit::{walk, Visit};
use std::collections::HashSet;

/// One factory capability: the module that supplies it and the export name
/// under which it is published.
#[derive(Debug, Clone, Copy)]
pub struct FactoryCapability {
    pub module: &'static str,
    pub export: &'static str,
}

impl FactoryCapability {
    pub const fn new(module: &'static str, export: &'static str) -> Self {
        FactoryCapability { module, export }
    }

    /// Sub-paths of the capability module supply the same factory.
    pub fn matches_source(&self, source: &str) -> bool {
        source == self.module
            || (source.len() > self.module.len()
                && source.starts_with(self.module)
                && source.as_bytes()[self.module.len()] == b'/')
    }
}

/// The factory capabilities this deployment recognizes, one per resource
/// family.
pub const JOB_FACTORY: FactoryCapability = FactoryCapability::new("@lattice/backend", "createJob");
pub const RESOLVER_FACTORY: FactoryCapability =
    FactoryCapability::new("@lattice/backend", "createResolver");
pub const EXECUTOR_FACTORY: FactoryCapability =
    FactoryCapability::new("@lattice/backend", "createExecutor");

/// Local names resolved to the factory, split by how a call site must use
/// them: `direct` names are the factory when called, `namespace` names carry
/// the factory as a member (`ns.createJob(...)`).
#[derive(Debug)]
pub struct FactoryBindings {
    export: String,
    pub direct: HashSet<String>,
    pub namespace: HashSet<String>,
}

impl FactoryBindings {
    fn new(capability: &FactoryCapability) -> Self {
        FactoryBindings {
            export: capability.export.to_string(),
            direct: HashSet::new(),
            namespace: HashSet::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.direct.is_empty() && self.namespace.is_empty()
    }

    /// True when a member access off a namespace binding names the factory.
    pub fn member_is_factory(&self, member: &str) -> bool {
        member == self.export
    }
}

pub fn resolve_factory_bindings<'a>(
    program: &oxc_ast::ast::Program<'a>,
    capability: &FactoryCapability,
) -> FactoryBindings {
    let mut scanner = BindingScanner {
        capability: *capability,
        out: FactoryBindings::new(capability),
    };
    scanner.visit_program(program);
    scanner.out
}

struct BindingScanner {
    capability: FactoryCapability,
    out: FactoryBindings,
}

impl BindingScanner {
    /// Returns true when `init` is a literal `require('...')` or
    /// `import('...')` (possibly awaited) of the capability module.
    fn is_capability_load(&self, init: &Expression) -> bool {
        let inner = match init {
            Expression::AwaitExpression(await_expr) => &await_expr.argument,
            other => other,
        };

        match inner {
            Expression::CallExpression(call) => {
                if let Expression::Identifier(callee) = &call.callee {
                    if callee.name == "require" {
                        if let Some(arg) = call.arguments.first().and_then(|a| a.as_expression()) {
                            if let Expression::StringLiteral(lit) = arg {
                                return self.capability.matches_source(lit.value.as_str());
                            }
                        }
                    }
                }
                false
            }
            Expression::ImportExpression(import_expr) => {
                if let Expression::StringLiteral(lit) = &import_expr.source {
                    self.capability.matches_source(lit.value.as_str())
                } else {
                    false
                }
            }
            _ => false,
        }
    }

    fn bind_loaded_pattern(&mut self, pattern: &BindingPattern) {
        match pattern {
            // const ns = require('...') / const ns = await import('...')
            BindingPattern::BindingIdentifier(id) => {
                self.out.namespace.insert(id.name.to_string());
            }
            // const { createJob } / { createJob: mk } / { createJob = fallback }
            BindingPattern::ObjectPattern(obj) => {
                for prop in &obj.properties {
                    let key = match property_key_name(&prop.key) {
                        Some(key) => key,
                        None => continue,
                    };
                    if key != self.capability.export {
                        continue;
                    }
                    match &prop.value {
                        BindingPattern::BindingIdentifier(local) => {
                            self.out.direct.insert(local.name.to_string());
                        }
                        BindingPattern::AssignmentPattern(assign) => {
                            if let BindingPattern::BindingIdentifier(local) = &assign.left {
                                self.out.direct.insert(local.name.to_string());
                            }
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }
}

impl<'a> Visit<'a> for BindingScanner {
    fn visit_import_declaration(&mut self, decl: &ImportDeclaration<'a>) {
        if decl.import_kind.is_type() {
            return;
        }
        if self.capability.matches_source(decl.source.value.as_str()) {
            if let Some(specifiers) = &decl.specifiers {
                for specifier in specifiers {
                    match specifier {
                        ImportDeclarationSpecifier::ImportSpecifier(s) => {
                            let imported = match &s.imported {
                                ModuleExportName::IdentifierName(id) => id.name.to_string(),
                                ModuleExportName::StringLiteral(lit) => lit.value.to_string(),
                                _ => String::new(),
                            };
                            if imported == self.capability.export {
                                self.out.direct.insert(s.local.name.to_string());
                            }
                        }
                        ImportDeclarationSpecifier::ImportDefaultSpecifier(s) => {
                            self.out.namespace.insert(s.local.name.to_string());
                        }
                        ImportDeclarationSpecifier::ImportNamespaceSpecifier(s) => {
                            self.out.namespace.insert(s.local.name.to_string());
                        }
                    }
                }
            }
        }
        walk::walk_import_declaration(self, decl);
    }

    fn visit_variable_declarator(&mut self, decl: &VariableDeclarator<'a>) {
        if let Some(init) = &decl.init {
            if self.is_capability_load(init) {
                self.bind_loaded_pattern(&decl.id);
            }
        }
        walk::walk_variable_declarator(self, decl);
    }
}

fn property_key_name(key: &PropertyKey) -> Option<String> {
    match key {
        PropertyKey::StaticIdentifier(id) => Some(id.name.to_string()),
        PropertyKey::StringLiteral(lit) => Some(lit.value.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxc_allocator::Allocator;
    use oxc_parser::Parser;
    use oxc_span::SourceType;

    const JOBS: FactoryCapability = FactoryCapability::new("@lattice/backend", "createJob");

    fn resolve(source: &str) -> FactoryBindings {
        let allocator = Allocator::default();
        let source_type = SourceType::default().with_typescript(true).with_module(true);
        let ret = Parser::new(&allocator, source, source_type).parse();
        assert!(ret.errors.is_empty(), "fixture must parse: {:?}", ret.errors);
        resolve_factory_bindings(&ret.program, &JOBS)
    }

    #[test]
    fn test_named_import() {
        let b = resolve("import { createJob } from '@lattice/backend';");
        assert!(b.direct.contains("createJob"));
        assert!(b.namespace.is_empty());
    }

    #[test]
    fn test_renamed_import() {
        let b = resolve("import { createJob as mk } from '@lattice/backend';");
        assert!(b.direct.contains("mk"));
        assert!(!b.direct.contains("createJob"));
    }

    #[test]
    fn test_default_and_namespace_import() {
        let b = resolve(
            "import backend from '@lattice/backend';\nimport * as lattice from '@lattice/backend/jobs';",
        );
        assert!(b.namespace.contains("backend"));
        assert!(b.namespace.contains("lattice"));
    }

    #[test]
    fn test_subpath_counts() {
        let b = resolve("import { createJob } from '@lattice/backend/jobs';");
        assert!(b.direct.contains("createJob"));
    }

    #[test]
    fn test_unrelated_module_ignored() {
        let b = resolve("import { createJob } from '@lattice/backend-tools';");
        assert!(b.is_empty());
    }

    #[test]
    fn test_dynamic_import_destructured() {
        let b = resolve("const { createJob } = await import('@lattice/backend');");
        assert!(b.direct.contains("createJob"));
    }

    #[test]
    fn test_dynamic_import_namespace() {
        let b = resolve("const mod = await import('@lattice/backend');");
        assert!(b.namespace.contains("mod"));
    }

    #[test]
    fn test_require_both_ways() {
        let b = resolve(
            "const { createJob: make } = require('@lattice/backend');\nconst sdk = require('@lattice/backend');",
        );
        assert!(b.direct.contains("make"));
        assert!(b.namespace.contains("sdk"));
    }

    #[test]
    fn test_destructure_with_default() {
        let b = resolve("const { createJob = fallback } = require('@lattice/backend');");
        assert!(b.direct.contains("createJob"));
    }

    // Pins the documented false negative: plain reassignment is not tracked.
    #[test]
    fn test_plain_reassignment_not_tracked() {
        let b = resolve(
            "import { createJob } from '@lattice/backend';\nconst create = createJob;",
        );
        assert!(b.direct.contains("createJob"));
        assert!(!b.direct.contains("create"));
        assert!(!b.namespace.contains("create"));
    }
}
