//! # Lattice Bundler (Native Core)
//!
//! Turns declarative backend-resource definitions into self-contained,
//! individually deployable script bundles.
//!
//! ## Bundling Invariants
//!
//! 1. **One unit, one bundle**: every workflow job, resolver, and executor
//!    in the bundle set produces its own `<name>.entry.js`, `<name>.js`,
//!    and `<name>.js.map`. Dependencies are never inlined; the remote
//!    runtime resolves `deps` results by job name.
//!
//! 2. **Targets keep their body verbatim**: rewriting strips exactly the
//!    `deps` property of the target call site and removes sibling job
//!    declarations. All edits are byte-range splices applied back to
//!    front; overlapping edits fail the build (L-ERR-REWRITE-001).
//!
//! 3. **Capability imports only**: a call is a job construction only when
//!    its callee provably binds to the factory exported by
//!    `@lattice/backend`, through any of the tracked import forms. Plain
//!    identifier reassignment is not tracked.
//!
//! 4. **Names are the graph keys**: job names are unique deployment-wide
//!    (L-ERR-GRAPH-001), match `[a-z][a-z0-9-]*` (L-ERR-NAME-001), and
//!    every job reachable via `deps` is exported (L-ERR-GRAPH-002).
//!
//! 5. **Field scripts are closed**: hook and validator scripts ship as bare
//!    function text and may reference only their own parameters, locals,
//!    and a fixed allow-list of ambient built-ins (L-ERR-SCOPE-001).
//!
//! 6. **No partial output**: a family's artifacts are planned completely
//!    before anything is written; any stage failure leaves the output
//!    directory untouched.

#[cfg(feature = "napi")]
use napi_derive::napi;

mod bindings;
mod build;
mod codegen;
mod diagnostics;
mod discovery;
mod extract;
mod guard;
mod resources;
mod rewrite;
mod trace;


pub use bindings::{
    resolve_factory_bindings, FactoryBindings, FactoryCapability, EXECUTOR_FACTORY, JOB_FACTORY,
    RESOLVER_FACTORY,
};
pub use build::{
    build_family, plan_family, write_artifacts, BuildConfig, BundleArtifact, BundlePlan, Bundler,
    ExternalPredicate, FamilyOutput, MinifiedBundle, ModuleLoader, ResourceFamily, VirtualModule,
    WriteMode,
};
pub use codegen::{
    executor_entry, job_entry, pre_module_id, resolver_entry, resolver_example_input, ENTRY_SLOT,
    RUNTIME_SLOT,
};
pub use diagnostics::{BuildError, BuildResult};
pub use discovery::expand_globs;
pub use extract::{discover_job_sites, ByteRange, JobCallSite};
pub use guard::{verify_script, ScriptLabel, AMBIENT_GLOBALS};
pub use resources::{
    ExecutorDefinition, FieldScript, InputField, InputType, JobBody, JobObject, LoadedModule,
    ResolverDefinition, ResourceValue, ScriptKind, Workflow,
};
pub use rewrite::rewrite_for_job;
pub use trace::{trace_jobs, JobSource, TraceOutcome};

#[cfg(feature = "napi")]
pub use extract::discover_job_sites_native;
#[cfg(feature = "napi")]
pub use guard::verify_field_script_native;

#[cfg(feature = "napi")]
#[napi]
pub fn bundler_bridge() -> String {
    "Lattice Native Bridge Connected".to_string()
}
