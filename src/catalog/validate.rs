// The miette/thiserror derive macros generate code that triggers false
// positive unused_assignments warnings on enum variant fields.
#![allow(unused_assignments)]

use std::collections::{BTreeMap, HashSet};
use std::path::{Component, Path};

use miette::Diagnostic;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use thiserror::Error;

use super::model::Registry;

// ---------------------------------------------------------------------------
// CatalogDiagnostic: reasons a catalog document is rejected
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum CatalogDiagnostic {
    #[error("service entry #{index} has an empty name")]
    #[diagnostic(code(fleetvisor::empty_name))]
    EmptyName { index: usize },

    #[error("service `{service}` has an empty repo")]
    #[diagnostic(code(fleetvisor::empty_repo))]
    EmptyRepo { service: String },

    #[error("service `{service}` is declared more than once")]
    #[diagnostic(code(fleetvisor::duplicate_service))]
    DuplicateService { service: String },

    #[error("service `{service}` depends on unknown service `{dependency}`")]
    #[diagnostic(code(fleetvisor::missing_dependency))]
    MissingDependency {
        service: String,
        dependency: String,
        #[help]
        advice: Option<String>,
    },

    #[error("dependency cycle detected involving `{node}`")]
    #[diagnostic(
        code(fleetvisor::dependency_cycle),
        help("services cannot depend on themselves, directly or transitively")
    )]
    DependencyCycle { node: String },

    #[error("asset `{path}` of service `{service}` escapes the service directory")]
    #[diagnostic(
        code(fleetvisor::asset_path),
        help("asset paths must be relative and must not contain `..`")
    )]
    AssetPath { service: String, path: String },
}

/// Check a parsed catalog for structural problems. All problems are
/// collected rather than stopping at the first.
pub fn validate(registry: &Registry) -> Result<(), Vec<CatalogDiagnostic>> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();

    for (index, svc) in registry.services.iter().enumerate() {
        if svc.name.trim().is_empty() {
            errors.push(CatalogDiagnostic::EmptyName { index });
            continue;
        }
        if svc.repo.trim().is_empty() {
            errors.push(CatalogDiagnostic::EmptyRepo {
                service: svc.name.clone(),
            });
        }
        if !seen.insert(svc.name.as_str()) {
            errors.push(CatalogDiagnostic::DuplicateService {
                service: svc.name.clone(),
            });
        }
        for asset in &svc.extra_assets {
            if !is_contained(&asset.path) {
                errors.push(CatalogDiagnostic::AssetPath {
                    service: svc.name.clone(),
                    path: asset.path.clone(),
                });
            }
        }
    }

    // Dependency graph: edges point from dependency to dependent so a
    // topological sort yields start order; any cycle is reported.
    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let mut nodes: BTreeMap<&str, NodeIndex> = BTreeMap::new();
    for svc in &registry.services {
        nodes
            .entry(svc.name.as_str())
            .or_insert_with(|| graph.add_node(svc.name.as_str()));
    }

    for svc in &registry.services {
        let Some(&dependent) = nodes.get(svc.name.as_str()) else {
            continue;
        };
        for dep in &svc.dependencies {
            match nodes.get(dep.as_str()) {
                Some(&dependency) => {
                    graph.add_edge(dependency, dependent, ());
                }
                None => errors.push(CatalogDiagnostic::MissingDependency {
                    service: svc.name.clone(),
                    dependency: dep.clone(),
                    advice: closest_name(dep, nodes.keys().copied())
                        .map(|name| format!("did you mean `{name}`?")),
                }),
            }
        }
    }

    if let Err(cycle) = toposort(&graph, None) {
        errors.push(CatalogDiagnostic::DependencyCycle {
            node: graph[cycle.node_id()].to_string(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn is_contained(path: &str) -> bool {
    let path = Path::new(path);
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Suggest a known name sharing the longest common prefix with `wanted`.
fn closest_name<'a>(wanted: &str, known: impl Iterator<Item = &'a str>) -> Option<&'a str> {
    known
        .map(|name| {
            let shared = name
                .chars()
                .zip(wanted.chars())
                .take_while(|(a, b)| a == b)
                .count();
            (shared, name)
        })
        .filter(|(shared, _)| *shared >= 3)
        .max_by_key(|(shared, _)| *shared)
        .map(|(_, name)| name)
}
