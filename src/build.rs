//! Build Orchestrator
//!
//! Drives one resource family end to end: glob expansion → dynamic load →
//! tree-shaken pre-bundle per file → family-specific transform → one entry
//! per runnable unit → minified artifact plus source map. Any stage failure
//! aborts the remaining work for the family and nothing is written; a
//! partial output directory is never considered valid.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::bindings::{FactoryCapability, EXECUTOR_FACTORY, JOB_FACTORY, RESOLVER_FACTORY};
use crate::codegen;
use crate::diagnostics::{BuildError, BuildResult, ERR_BUNDLE, ERR_MODULE_LOAD};
use crate::discovery::expand_globs;
use crate::extract::discover_job_sites;
use crate::guard::{verify_script, ScriptLabel};
use crate::resources::{FieldScript, LoadedModule, ResourceValue};
use crate::rewrite::rewrite_for_job;
use crate::trace::{trace_jobs, JobSource};

// ═══════════════════════════════════════════════════════════════════════════════
// FAMILIES & CONFIG
// ═══════════════════════════════════════════════════════════════════════════════

/// Output directory grouping is part of the deployable contract; the remote
/// control plane locates artifacts by these exact names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceFamily {
    WorkflowJobs,
    Resolvers,
    Executors,
}

impl ResourceFamily {
    pub fn dir_name(&self) -> &'static str {
        match self {
            ResourceFamily::WorkflowJobs => "workflow-jobs",
            ResourceFamily::Resolvers => "resolvers",
            ResourceFamily::Executors => "executors",
        }
    }

    pub fn capability(&self) -> &'static FactoryCapability {
        match self {
            ResourceFamily::WorkflowJobs => &JOB_FACTORY,
            ResourceFamily::Resolvers => &RESOLVER_FACTORY,
            ResourceFamily::Executors => &EXECUTOR_FACTORY,
        }
    }
}

impl std::fmt::Display for ResourceFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dir_name())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BuildConfig {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub out_dir: PathBuf,
    /// Import prefixes that resolve inside the project (tsconfig-style
    /// aliases); everything else non-relative is external.
    pub alias_prefixes: Vec<String>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        BuildConfig {
            include: Vec::new(),
            exclude: Vec::new(),
            out_dir: PathBuf::from(".lattice/build"),
            alias_prefixes: Vec::new(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// EXTERNAL SEAMS
// ═══════════════════════════════════════════════════════════════════════════════

/// Decides which module specifiers stay external to a pre-bundle.
/// Third-party code is never duplicated into intermediate artifacts.
#[derive(Debug, Clone)]
pub struct ExternalPredicate {
    alias_prefixes: Vec<String>,
}

impl ExternalPredicate {
    pub fn new(alias_prefixes: &[String]) -> Self {
        ExternalPredicate {
            alias_prefixes: alias_prefixes.to_vec(),
        }
    }

    pub fn is_external(&self, specifier: &str) -> bool {
        if specifier.starts_with("./") || specifier.starts_with("../") || specifier.starts_with('/')
        {
            return false;
        }
        !self.alias_prefixes.iter().any(|prefix| {
            specifier == prefix
                || (specifier.starts_with(prefix)
                    && specifier.as_bytes().get(prefix.len()) == Some(&b'/'))
        })
    }
}

/// Dynamic loader: imports a file by path with cache-busting so top-level
/// code re-evaluates within one process run, and returns brand-checked live
/// exports. Implemented by the Node side in production.
pub trait ModuleLoader: Sync {
    fn load(&self, path: &Path) -> Result<LoadedModule, String>;
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualModule {
    pub id: String,
    pub code: String,
}

/// Input to the final minify pass: generated entry text plus the virtual
/// modules it imports.
#[derive(Debug, Clone)]
pub struct BundlePlan {
    pub entry: String,
    pub virtual_modules: Vec<VirtualModule>,
}

#[derive(Debug, Clone)]
pub struct MinifiedBundle {
    pub code: String,
    pub source_map: String,
}

/// Module bundler seam. Implemented over the external bundler in
/// production; tests supply a mock.
pub trait Bundler: Sync {
    /// Single non-minified tree-shaken output for one file, leaving every
    /// specifier the predicate calls external unresolved.
    fn prebundle(&self, entry: &Path, externals: &ExternalPredicate) -> Result<String, String>;

    /// Minified output with a source map.
    fn minify(&self, plan: &BundlePlan) -> Result<MinifiedBundle, String>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// ARTIFACTS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Overwrite,
    /// Seed placeholders: written once, never overwritten.
    CreateIfAbsent,
}

#[derive(Debug, Clone)]
pub struct BundleArtifact {
    /// Relative to the configured output directory.
    pub path: PathBuf,
    pub content: String,
    pub mode: WriteMode,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ManifestUnit {
    name: String,
    entry: String,
    bundle: String,
    source_map: String,
    sha256: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FamilyManifest {
    family: ResourceFamily,
    units: Vec<ManifestUnit>,
    field_scripts: Vec<FieldScript>,
}

#[derive(Debug)]
pub struct FamilyOutput {
    pub artifacts: Vec<BundleArtifact>,
    /// Exported jobs no workflow reaches (jobs family only).
    pub unreachable: Vec<String>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// PIPELINE
// ═══════════════════════════════════════════════════════════════════════════════

/// Build one resource family and write its artifact directory.
pub fn build_family(
    family: ResourceFamily,
    config: &BuildConfig,
    loader: &dyn ModuleLoader,
    bundler: &dyn Bundler,
) -> BuildResult<FamilyOutput> {
    let output = plan_family(family, config, loader, bundler)?;
    write_artifacts(&config.out_dir, &output.artifacts)?;
    info!(
        family = %family.dir_name(),
        artifacts = output.artifacts.len(),
        "family build complete"
    );
    Ok(output)
}

/// Everything up to (but excluding) the filesystem writes, so a failing
/// stage leaves no partial output behind.
pub fn plan_family(
    family: ResourceFamily,
    config: &BuildConfig,
    loader: &dyn ModuleLoader,
    bundler: &dyn Bundler,
) -> BuildResult<FamilyOutput> {
    let files = expand_globs(&config.include, &config.exclude)?;
    debug!(family = %family.dir_name(), files = files.len(), "expanded source set");

    // One load task per matched file; all awaited before proceeding.
    let modules = load_all(&files, loader)?;

    // Hook/validator scripts ride along in any family's modules; every one
    // must pass the purity guard before it is carried into the manifest.
    let field_scripts = collect_field_scripts(&modules)?;

    let externals = ExternalPredicate::new(&config.alias_prefixes);
    let (mut artifacts, units, unreachable) = match family {
        ResourceFamily::WorkflowJobs => plan_jobs(family, &modules, bundler, &externals)?,
        ResourceFamily::Resolvers => plan_resolvers(family, &modules, bundler, &externals)?,
        ResourceFamily::Executors => plan_executors(family, &modules, bundler, &externals)?,
    };

    let manifest = FamilyManifest {
        family,
        units,
        field_scripts,
    };
    artifacts.push(BundleArtifact {
        path: Path::new(family.dir_name()).join("manifest.json"),
        content: serde_json::to_string_pretty(&manifest)
            .map_err(|e| BuildError::new(ERR_BUNDLE, format!("Manifest serialization: {}", e)))?,
        mode: WriteMode::Overwrite,
    });

    Ok(FamilyOutput {
        artifacts,
        unreachable,
    })
}

fn load_all(files: &[PathBuf], loader: &dyn ModuleLoader) -> BuildResult<Vec<LoadedModule>> {
    let results: Vec<Result<LoadedModule, BuildError>> = files
        .par_iter()
        .map(|path| {
            loader.load(path).map_err(|cause| {
                BuildError::in_file(
                    ERR_MODULE_LOAD,
                    format!("Failed to load module: {}", cause),
                    path.display().to_string(),
                )
            })
        })
        .collect();

    // Cross-file ordering is not guaranteed; report failures by path so the
    // first error is deterministic.
    collect_planned(results)
}

fn collect_field_scripts(modules: &[LoadedModule]) -> BuildResult<Vec<FieldScript>> {
    let mut scripts = Vec::new();
    for module in modules {
        for (_, value) in &module.exports {
            if let ResourceValue::FieldScript(script) = value {
                let label =
                    ScriptLabel::new(&script.type_name, &script.field_name, script.kind);
                verify_script(&script.source, &label)?;
                scripts.push(script.clone());
            }
        }
    }
    scripts.sort_by(|a, b| {
        (&a.type_name, &a.field_name).cmp(&(&b.type_name, &b.field_name))
    });
    Ok(scripts)
}

// ═══════════════════════════════════════════════════════════════════════════════
// FAMILY TRANSFORMERS
// ═══════════════════════════════════════════════════════════════════════════════

type PlannedUnits = (Vec<BundleArtifact>, Vec<ManifestUnit>, Vec<String>);

struct JobTarget {
    name: String,
    binding: Option<String>,
}

fn plan_jobs(
    family: ResourceFamily,
    modules: &[LoadedModule],
    bundler: &dyn Bundler,
    externals: &ExternalPredicate,
) -> BuildResult<PlannedUnits> {
    let mut declared = Vec::new();
    let mut workflows = Vec::new();
    for module in modules {
        for (export_name, value) in &module.exports {
            match value {
                ResourceValue::Job(job) => declared.push(JobSource {
                    name: job.name.clone(),
                    export_name: export_name.clone(),
                    file: module.path.display().to_string(),
                }),
                ResourceValue::Workflow(workflow) => workflows.push(workflow.clone()),
                _ => {}
            }
        }
    }

    let outcome = trace_jobs(&declared, &workflows)?;

    // Assign each bundled job to its defining file. A main job that is not
    // itself exported is bundled from the file exporting its workflow.
    let mut targets_by_file: BTreeMap<PathBuf, Vec<JobTarget>> = BTreeMap::new();
    let mut assigned: std::collections::HashSet<&str> = std::collections::HashSet::new();
    for module in modules {
        for (export_name, value) in &module.exports {
            if let ResourceValue::Job(job) = value {
                if outcome.bundle_set.contains(&job.name) && assigned.insert(job.name.as_str()) {
                    targets_by_file.entry(module.path.clone()).or_default().push(
                        JobTarget {
                            name: job.name.clone(),
                            binding: Some(export_name.clone()),
                        },
                    );
                }
            }
        }
    }
    for module in modules {
        for (_, value) in &module.exports {
            if let ResourceValue::Workflow(workflow) = value {
                let name = workflow.main_job.name.as_str();
                if outcome.bundle_set.contains(name) && assigned.insert(name) {
                    targets_by_file.entry(module.path.clone()).or_default().push(
                        JobTarget {
                            name: name.to_string(),
                            binding: None,
                        },
                    );
                }
            }
        }
    }

    let exports_by_file: BTreeMap<PathBuf, Vec<String>> = modules
        .iter()
        .map(|m| {
            let names = m
                .exports
                .iter()
                .filter(|(_, v)| matches!(v, ResourceValue::Job(_)))
                .map(|(name, _)| name.clone())
                .collect();
            (m.path.clone(), names)
        })
        .collect();

    let planned: Vec<BuildResult<Vec<(BundleArtifact, BundleArtifact, BundleArtifact, ManifestUnit)>>> =
        targets_by_file
            .par_iter()
            .map(|(path, targets)| {
                let file = path.display().to_string();
                let prebundle = bundler.prebundle(path, externals).map_err(|cause| {
                    BuildError::in_file(ERR_BUNDLE, format!("Pre-bundle failed: {}", cause), &file)
                })?;
                let sites = discover_job_sites(&prebundle, &file, family.capability())?;
                let classified: std::collections::HashSet<&str> = sites
                    .iter()
                    .filter_map(|s| s.exported_binding.as_deref())
                    .collect();
                // Exported jobs the extractor could not classify are removed
                // by name lookup in the rewriter's second pass.
                let unclassified: Vec<String> = exports_by_file
                    .get(path)
                    .map(|names| {
                        names
                            .iter()
                            .filter(|name| !classified.contains(name.as_str()))
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default();

                let mut units = Vec::new();
                for target in targets {
                    let rewritten =
                        rewrite_for_job(&prebundle, &target.name, &sites, &unclassified)?;
                    let entry = codegen::job_entry(&target.name, target.binding.as_deref());
                    let plan = BundlePlan {
                        entry: entry.clone(),
                        virtual_modules: vec![VirtualModule {
                            id: codegen::pre_module_id(&target.name),
                            code: rewritten,
                        }],
                    };
                    units.push(emit_unit(family, &target.name, entry, bundler.minify(&plan), &file)?);
                }
                Ok(units)
            })
            .collect();

    let mut artifacts = Vec::new();
    let mut units = Vec::new();
    for file_units in collect_planned(planned)? {
        for (entry, bundle, map, unit) in file_units {
            artifacts.extend([entry, bundle, map]);
            units.push(unit);
        }
    }
    units.sort_by(|a, b| a.name.cmp(&b.name));
    Ok((artifacts, units, outcome.unreachable))
}

fn plan_resolvers(
    family: ResourceFamily,
    modules: &[LoadedModule],
    bundler: &dyn Bundler,
    externals: &ExternalPredicate,
) -> BuildResult<PlannedUnits> {
    let mut artifacts = Vec::new();
    let mut units = Vec::new();
    for module in modules {
        let file = module.path.display().to_string();
        let mut prebundle: Option<String> = None;
        for (export_name, value) in &module.exports {
            let def = match value {
                ResourceValue::Resolver(def) => def,
                _ => continue,
            };
            let code = match &prebundle {
                Some(code) => code.clone(),
                None => {
                    let code = bundler.prebundle(&module.path, externals).map_err(|cause| {
                        BuildError::in_file(
                            ERR_BUNDLE,
                            format!("Pre-bundle failed: {}", cause),
                            &file,
                        )
                    })?;
                    prebundle = Some(code.clone());
                    code
                }
            };

            let entry = codegen::resolver_entry(def, export_name);
            let plan = BundlePlan {
                entry: entry.clone(),
                virtual_modules: vec![VirtualModule {
                    id: codegen::pre_module_id(&def.name),
                    code,
                }],
            };
            let (entry_artifact, bundle, map, unit) =
                emit_unit(family, &def.name, entry, bundler.minify(&plan), &file)?;
            artifacts.extend([entry_artifact, bundle, map]);
            artifacts.push(BundleArtifact {
                path: Path::new(family.dir_name())
                    .join(format!("{}.inputs.example.json", def.name)),
                content: codegen::resolver_example_input(def),
                mode: WriteMode::CreateIfAbsent,
            });
            units.push(unit);
        }
    }
    units.sort_by(|a, b| a.name.cmp(&b.name));
    Ok((artifacts, units, Vec::new()))
}

fn plan_executors(
    family: ResourceFamily,
    modules: &[LoadedModule],
    bundler: &dyn Bundler,
    externals: &ExternalPredicate,
) -> BuildResult<PlannedUnits> {
    let mut artifacts = Vec::new();
    let mut units = Vec::new();
    for module in modules {
        let file = module.path.display().to_string();
        for (export_name, value) in &module.exports {
            let def = match value {
                ResourceValue::Executor(def) => def,
                _ => continue,
            };
            let code = bundler.prebundle(&module.path, externals).map_err(|cause| {
                BuildError::in_file(ERR_BUNDLE, format!("Pre-bundle failed: {}", cause), &file)
            })?;
            let entry = codegen::executor_entry(&def.name, export_name);
            let plan = BundlePlan {
                entry: entry.clone(),
                virtual_modules: vec![VirtualModule {
                    id: codegen::pre_module_id(&def.name),
                    code,
                }],
            };
            let (entry_artifact, bundle, map, unit) =
                emit_unit(family, &def.name, entry, bundler.minify(&plan), &file)?;
            artifacts.extend([entry_artifact, bundle, map]);
            units.push(unit);
        }
    }
    units.sort_by(|a, b| a.name.cmp(&b.name));
    Ok((artifacts, units, Vec::new()))
}

fn emit_unit(
    family: ResourceFamily,
    name: &str,
    entry: String,
    minified: Result<MinifiedBundle, String>,
    file: &str,
) -> BuildResult<(BundleArtifact, BundleArtifact, BundleArtifact, ManifestUnit)> {
    let minified = minified.map_err(|cause| {
        BuildError::in_file(
            ERR_BUNDLE,
            format!("Minify failed for unit '{}': {}", name, cause),
            file,
        )
    })?;

    let dir = Path::new(family.dir_name());
    let entry_name = format!("{}.entry.js", name);
    let bundle_name = format!("{}.js", name);
    let map_name = format!("{}.js.map", name);
    let sha256 = hex_digest(&minified.code);

    Ok((
        BundleArtifact {
            path: dir.join(&entry_name),
            content: entry,
            mode: WriteMode::Overwrite,
        },
        BundleArtifact {
            path: dir.join(&bundle_name),
            content: minified.code,
            mode: WriteMode::Overwrite,
        },
        BundleArtifact {
            path: dir.join(&map_name),
            content: minified.source_map,
            mode: WriteMode::Overwrite,
        },
        ManifestUnit {
            name: name.to_string(),
            entry: entry_name,
            bundle: bundle_name,
            source_map: map_name,
            sha256,
        },
    ))
}

fn collect_planned<T>(planned: Vec<BuildResult<T>>) -> BuildResult<Vec<T>> {
    let mut out = Vec::new();
    let mut errors = Vec::new();
    for result in planned {
        match result {
            Ok(value) => out.push(value),
            Err(err) => errors.push(err),
        }
    }
    if !errors.is_empty() {
        errors.sort_by(|a, b| a.file.cmp(&b.file));
        return Err(errors.remove(0));
    }
    Ok(out)
}

fn hex_digest(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

// ═══════════════════════════════════════════════════════════════════════════════
// ARTIFACT WRITING
// ═══════════════════════════════════════════════════════════════════════════════

pub fn write_artifacts(out_dir: &Path, artifacts: &[BundleArtifact]) -> BuildResult<()> {
    for artifact in artifacts {
        let target = out_dir.join(&artifact.path);
        if artifact.mode == WriteMode::CreateIfAbsent && target.exists() {
            debug!(path = %target.display(), "seed exists, leaving untouched");
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                BuildError::in_file(
                    ERR_BUNDLE,
                    format!("Failed to create output directory: {}", e),
                    parent.display().to_string(),
                )
            })?;
        }
        fs::write(&target, &artifact.content).map_err(|e| {
            BuildError::in_file(
                ERR_BUNDLE,
                format!("Failed to write artifact: {}", e),
                target.display().to_string(),
            )
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_predicate() {
        let externals = ExternalPredicate::new(&["@app".to_string()]);
        assert!(!externals.is_external("./util"));
        assert!(!externals.is_external("../shared/db"));
        assert!(!externals.is_external("@app/helpers"));
        assert!(!externals.is_external("@app"));
        assert!(externals.is_external("@appkit/helpers"));
        assert!(externals.is_external("lodash"));
        assert!(externals.is_external("@lattice/backend"));
    }

    #[test]
    fn test_seed_artifacts_never_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let seed = BundleArtifact {
            path: PathBuf::from("resolvers/search.inputs.example.json"),
            content: "{\"generated\": true}\n".to_string(),
            mode: WriteMode::CreateIfAbsent,
        };
        write_artifacts(dir.path(), std::slice::from_ref(&seed)).unwrap();

        let target = dir.path().join("resolvers/search.inputs.example.json");
        fs::write(&target, "{\"edited\": true}\n").unwrap();
        write_artifacts(dir.path(), std::slice::from_ref(&seed)).unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "{\"edited\": true}\n");
    }

    #[test]
    fn test_overwrite_artifacts_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let mut artifact = BundleArtifact {
            path: PathBuf::from("workflow-jobs/a.js"),
            content: "first".to_string(),
            mode: WriteMode::Overwrite,
        };
        write_artifacts(dir.path(), std::slice::from_ref(&artifact)).unwrap();
        artifact.content = "second".to_string();
        write_artifacts(dir.path(), std::slice::from_ref(&artifact)).unwrap();
        let written = fs::read_to_string(dir.path().join("workflow-jobs/a.js")).unwrap();
        assert_eq!(written, "second");
    }
}
