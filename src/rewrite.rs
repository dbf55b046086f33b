//! Source Rewriter
//!
//! Given one target job and the full candidate list for its file, produces
//! new source text in which exactly the target job runs standalone: the
//! target keeps its body verbatim but loses its `deps` property, and every
//! sibling job declaration is removed outright (or neutered to an inert
//! no-op body when no enclosing statement range exists). All edits are
//! collected as byte-range replacements, deduplicated by exact-range
//! equality, and applied back-to-front so earlier offsets stay valid.
//!
//! Overlapping (non-identical) edits would silently mis-splice the output;
//! they are treated as a structural defect and fail loudly instead.

use oxc_allocator::Allocator;
use oxc_ast::ast::{BindingPattern, Declaration, Statement};
use oxc_parser::Parser;
use oxc_span::{GetSpan, SourceType};

use crate::diagnostics::{BuildError, BuildResult, ERR_REWRITE, ERR_SYNTAX};
use crate::extract::{ByteRange, JobCallSite};

/// One pending edit. Ephemeral, scoped to a single rewrite call.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Replacement {
    start: usize,
    end: usize,
    text: String,
}

const NOOP_BODY: &str = "() => {}";

/// Rewrite `source` for standalone execution of `target`.
///
/// `other_exports` lists exported binding names of sibling jobs the
/// call-site extractor could not classify (sourced from the tracer); their
/// declarations are removed by name lookup if not already removed.
pub fn rewrite_for_job(
    source: &str,
    target: &str,
    sites: &[JobCallSite],
    other_exports: &[String],
) -> BuildResult<String> {
    let target_site = sites.iter().find(|s| s.name == target).ok_or_else(|| {
        BuildError::new(
            ERR_REWRITE,
            format!("Target job '{}' has no discovered call site.", target),
        )
    })?;

    let mut replacements = Vec::new();

    // The target keeps its declaration and body; only its deps go away.
    if let Some(deps) = target_site.deps_range {
        replacements.push(Replacement {
            start: deps.start as usize,
            end: extend_through_comma(source, deps.end as usize),
            text: String::new(),
        });
    }

    for site in sites.iter().filter(|s| s.name != target) {
        // A multi-declarator statement can enclose the target too; removing
        // it whole would take the target with it, so such siblings get the
        // body-only fallback instead.
        let removable_stmt = site.statement_range.filter(|stmt| {
            !(stmt.start <= target_site.body_range.start
                && target_site.body_range.end <= stmt.end)
        });
        match removable_stmt {
            Some(stmt) => replacements.push(Replacement {
                start: stmt.start as usize,
                end: extend_statement_end(source, stmt.end as usize),
                text: String::new(),
            }),
            // No enclosing statement to remove; keep the declaration
            // syntactically valid with an inert body.
            None => replacements.push(Replacement {
                start: site.body_range.start as usize,
                end: site.body_range.end as usize,
                text: NOOP_BODY.to_string(),
            }),
        }
    }

    // Second pass: siblings the extractor could not classify, removed by
    // exported-binding lookup.
    if !other_exports.is_empty() {
        let target_binding = target_site.exported_binding.as_deref();
        for (binding, range) in top_level_declarations(source)? {
            if Some(binding.as_str()) == target_binding {
                continue;
            }
            if other_exports.iter().any(|name| *name == binding) {
                replacements.push(Replacement {
                    start: range.start as usize,
                    end: extend_statement_end(source, range.end as usize),
                    text: String::new(),
                });
            }
        }
    }

    apply_replacements(source, replacements)
}

/// Deduplicate by exact-range equality, sort descending by start, verify
/// non-overlap, and splice back-to-front.
fn apply_replacements(source: &str, mut replacements: Vec<Replacement>) -> BuildResult<String> {
    replacements.sort_by(|a, b| (a.start, a.end, &a.text).cmp(&(b.start, b.end, &b.text)));
    replacements.dedup();
    replacements.sort_by(|a, b| b.start.cmp(&a.start));

    let mut previous_start = source.len();
    for r in &replacements {
        if r.end > previous_start {
            return Err(BuildError::new(
                ERR_REWRITE,
                format!(
                    "Overlapping rewrite edits: [{}, {}) collides with an edit starting at {}.",
                    r.start, r.end, previous_start
                ),
            ));
        }
        previous_start = r.start;
    }

    let mut output = source.to_string();
    for r in replacements {
        output.replace_range(r.start..r.end, &r.text);
    }
    Ok(output)
}

/// Consume trailing whitespace plus at most one comma after a removed
/// object property.
fn extend_through_comma(source: &str, mut end: usize) -> usize {
    let bytes = source.as_bytes();
    while end < bytes.len() && (bytes[end] as char).is_ascii_whitespace() {
        end += 1;
    }
    if end < bytes.len() && bytes[end] == b',' {
        end += 1;
    }
    end
}

/// Consume trailing separators after a removed statement, up to and
/// including one newline.
fn extend_statement_end(source: &str, mut end: usize) -> usize {
    let bytes = source.as_bytes();
    while end < bytes.len() && matches!(bytes[end], b' ' | b'\t' | b';') {
        end += 1;
    }
    if end < bytes.len() && bytes[end] == b'\r' {
        end += 1;
    }
    if end < bytes.len() && bytes[end] == b'\n' {
        end += 1;
    }
    end
}

/// Top-level (possibly exported) variable declarations, as
/// `(binding name, statement range)` pairs.
fn top_level_declarations(source: &str) -> BuildResult<Vec<(String, ByteRange)>> {
    let allocator = Allocator::default();
    let source_type = SourceType::default().with_typescript(true).with_module(true);
    let ret = Parser::new(&allocator, source, source_type).parse();
    if !ret.errors.is_empty() {
        return Err(BuildError::new(
            ERR_SYNTAX,
            format!("Failed to parse module for rewrite: {:?}", ret.errors[0]),
        ));
    }

    let mut declarations = Vec::new();
    for stmt in &ret.program.body {
        let (decl, stmt_span) = match stmt {
            Statement::VariableDeclaration(decl) => (&**decl, stmt.span()),
            Statement::ExportNamedDeclaration(export) => match &export.declaration {
                Some(Declaration::VariableDeclaration(decl)) => (&**decl, export.span),
                _ => continue,
            },
            _ => continue,
        };
        for declarator in &decl.declarations {
            if let BindingPattern::BindingIdentifier(id) = &declarator.id {
                declarations.push((id.name.to_string(), ByteRange::of(stmt_span)));
            }
        }
    }
    Ok(declarations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bindings::JOB_FACTORY;
    use crate::extract::discover_job_sites;

    const SOURCE: &str = r#"import { createJob } from '@lattice/backend';

export const fetchCustomer = createJob({
  name: 'fetch-customer',
  body: async ({ customerId }) => ({ id: customerId }),
});

export const sendNotification = createJob({
  name: 'send-notification',
  body: async ({ email }) => ({ sent: true }),
});

export const processOrder = createJob({
  name: 'process-order',
  deps: [fetchCustomer, sendNotification],
  body: async (input, deps) => ({ ...input, done: true }),
});
"#;

    fn rewrite(target: &str) -> String {
        let sites = discover_job_sites(SOURCE, "jobs/order.ts", &JOB_FACTORY).unwrap();
        rewrite_for_job(SOURCE, target, &sites, &[]).unwrap()
    }

    #[test]
    fn test_target_deps_removed_body_preserved() {
        let out = rewrite("process-order");
        assert!(!out.contains("deps: [fetchCustomer, sendNotification]"));
        assert!(out.contains("body: async (input, deps) => ({ ...input, done: true })"));
        assert!(out.contains("'process-order'"));
    }

    #[test]
    fn test_sibling_declarations_removed_entirely() {
        let out = rewrite("process-order");
        assert!(!out.contains("fetch-customer"));
        assert!(!out.contains("send-notification"));
        assert!(!out.contains("export const fetchCustomer"));
        assert!(!out.contains("export const sendNotification"));
    }

    #[test]
    fn test_rewrite_is_idempotent_on_pristine_input() {
        assert_eq!(rewrite("process-order"), rewrite("process-order"));
        assert_eq!(rewrite("fetch-customer"), rewrite("fetch-customer"));
    }

    #[test]
    fn test_target_without_deps_left_intact() {
        let out = rewrite("fetch-customer");
        assert!(out.contains("'fetch-customer'"));
        assert!(out.contains("body: async ({ customerId }) => ({ id: customerId })"));
        assert!(!out.contains("process-order"));
    }

    #[test]
    fn test_body_only_fallback_neuters_sibling() {
        let source = r#"import { createJob } from '@lattice/backend';
registry.push(createJob({ name: 'inline-extra', body: () => 42 }));
export const keeper = createJob({ name: 'keeper', body: () => 1 });
"#;
        let sites = discover_job_sites(source, "jobs/x.ts", &JOB_FACTORY).unwrap();
        let out = rewrite_for_job(source, "keeper", &sites, &[]).unwrap();
        assert!(out.contains("body: () => {}"));
        assert!(!out.contains("() => 42"));
        assert!(out.contains("body: () => 1"));
    }

    #[test]
    fn test_shared_statement_neuters_sibling_only() {
        let source = r#"import { createJob } from '@lattice/backend';
export const a = createJob({ name: 'alpha', body: () => 1 }), b = createJob({ name: 'beta', body: () => 2 });
"#;
        let sites = discover_job_sites(source, "jobs/x.ts", &JOB_FACTORY).unwrap();
        let out = rewrite_for_job(source, "alpha", &sites, &[]).unwrap();
        assert!(out.contains("body: () => 1"));
        assert!(out.contains("'alpha'"));
        assert!(out.contains("body: () => {}"));
        assert!(!out.contains("() => 2"));
    }

    #[test]
    fn test_shared_statement_target_deps_still_removed() {
        let source = r#"import { createJob } from '@lattice/backend';
export const b = createJob({ name: 'beta', body: () => 2 }), a = createJob({ name: 'alpha', deps: [b], body: () => 1 });
"#;
        let sites = discover_job_sites(source, "jobs/x.ts", &JOB_FACTORY).unwrap();
        let out = rewrite_for_job(source, "alpha", &sites, &[]).unwrap();
        assert!(!out.contains("deps: [b]"));
        assert!(out.contains("body: () => 1"));
        assert!(out.contains("body: () => {}"));
        assert!(!out.contains("() => 2"));
    }

    #[test]
    fn test_second_pass_removes_unclassified_exports() {
        let source = r#"import { createJob } from '@lattice/backend';
export const helperJob = makeOpaque();
export const keeper = createJob({ name: 'keeper', body: () => 1 });
"#;
        let sites = discover_job_sites(source, "jobs/x.ts", &JOB_FACTORY).unwrap();
        let out =
            rewrite_for_job(source, "keeper", &sites, &["helperJob".to_string()]).unwrap();
        assert!(!out.contains("helperJob"));
        assert!(out.contains("keeper"));
    }

    #[test]
    fn test_missing_target_is_an_error() {
        let sites = discover_job_sites(SOURCE, "jobs/order.ts", &JOB_FACTORY).unwrap();
        let err = rewrite_for_job(SOURCE, "no-such-job", &sites, &[]).unwrap_err();
        assert_eq!(err.code, ERR_REWRITE);
    }

    #[test]
    fn test_overlapping_edits_fail_loudly() {
        let replacements = vec![
            Replacement {
                start: 0,
                end: 10,
                text: String::new(),
            },
            Replacement {
                start: 5,
                end: 12,
                text: String::new(),
            },
        ];
        let err = apply_replacements("0123456789abcdef", replacements).unwrap_err();
        assert_eq!(err.code, ERR_REWRITE);
    }

    #[test]
    fn test_identical_edits_deduplicated() {
        let replacements = vec![
            Replacement {
                start: 0,
                end: 4,
                text: String::new(),
            },
            Replacement {
                start: 0,
                end: 4,
                text: String::new(),
            },
        ];
        assert_eq!(
            apply_replacements("abcdefgh", replacements).unwrap(),
            "efgh"
        );
    }
}
