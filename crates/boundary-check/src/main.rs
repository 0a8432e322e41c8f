use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;

use anyhow::{Context, Result};
use cargo_metadata::MetadataCommand;

/// Decision crates stay pure: no storage, transport or identity-provider code
/// may become reachable from them.
const RULES: &[(&str, &[&str])] = &[
    (
        "portal-contracts",
        &["portal-policy", "portal-directory", "portal-auth", "sqlx", "axum", "reqwest"],
    ),
    (
        "portal-policy",
        &["portal-directory", "portal-auth", "sqlx", "axum", "reqwest", "tokio"],
    ),
    ("portal-directory", &["portal-auth", "axum", "reqwest"]),
];

fn main() -> Result<()> {
    let metadata = MetadataCommand::new()
        .exec()
        .context("failed to run `cargo metadata`")?;

    let resolve = metadata
        .resolve
        .as_ref()
        .context("`cargo metadata` did not include a resolved dependency graph")?;

    let id_to_name: HashMap<_, _> = metadata
        .packages
        .iter()
        .map(|p| (p.id.clone(), p.name.as_str()))
        .collect();

    let adjacency: HashMap<_, _> = resolve
        .nodes
        .iter()
        .map(|node| {
            let deps: Vec<_> = node.deps.iter().map(|dep| dep.pkg.clone()).collect();
            (node.id.clone(), deps)
        })
        .collect();

    let mut failed = false;
    for (package_name, forbidden) in RULES {
        let package = metadata
            .packages
            .iter()
            .find(|p| p.name == *package_name)
            .with_context(|| format!("package `{}` not found in workspace", package_name))?;

        let violations = forbidden_reachable(&package.id, &adjacency, &id_to_name, forbidden);
        if violations.is_empty() {
            println!(
                "OK: `{}` has no dependency path to {}",
                package_name,
                forbidden.join(", ")
            );
        } else {
            failed = true;
            eprintln!(
                "FAIL: `{}` depends on forbidden crate(s): {}",
                package_name,
                violations.join(", ")
            );
        }
    }

    if failed {
        std::process::exit(1);
    }

    Ok(())
}

fn forbidden_reachable<Id>(
    root: &Id,
    adjacency: &HashMap<Id, Vec<Id>>,
    id_to_name: &HashMap<Id, &str>,
    forbidden: &[&str],
) -> Vec<String>
where
    Id: Clone + Eq + Hash,
{
    let mut visited = HashSet::new();
    let mut queue = VecDeque::new();
    queue.push_back(root.clone());
    visited.insert(root.clone());

    let mut violations = Vec::new();

    while let Some(current) = queue.pop_front() {
        let Some(deps) = adjacency.get(&current) else {
            continue;
        };

        for dep in deps.iter().cloned() {
            if !visited.insert(dep.clone()) {
                continue;
            }

            if let Some(name) = id_to_name.get(&dep)
                && forbidden.contains(name)
            {
                violations.push((*name).to_string());
            }

            queue.push_back(dep);
        }
    }

    violations.sort();
    violations.dedup();
    violations
}
