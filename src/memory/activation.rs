//! Spreading activation over the association graph.
//!
//! Seeds start at 1.0. Activation flows breadth-first along edges, scaled by
//! edge strength and a per-hop decay, and stops at the hop cap or when the
//! propagated amount drops below the pruning threshold.

use anyhow::Result;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use super::associations::{self, Neighbor};
use crate::config::ActivationConfig;
use crate::memory::types::{ItemKind, ItemRef};

/// Anything that can list an item's undirected neighbours.
pub trait NeighborSource {
    fn neighbors(&self, item: &ItemRef) -> Result<Vec<Neighbor>>;
}

impl NeighborSource for Connection {
    fn neighbors(&self, item: &ItemRef) -> Result<Vec<Neighbor>> {
        associations::get_neighbors(self, item)
    }
}

/// An item reached from the seeds, with its accumulated activation.
#[derive(Debug, Clone, Serialize)]
pub struct ActivatedItem {
    #[serde(flatten)]
    pub item: ItemRef,
    pub activation: f64,
}

/// Result of a spread: reached items, best first, and the edges that carried activation.
#[derive(Debug, Default)]
pub struct Activation {
    pub items: Vec<ActivatedItem>,
    pub edges: Vec<(ItemRef, ItemRef)>,
}

/// Spread activation from `seeds`. Seeds are excluded from the output.
///
/// Parallel edges between the same pair (several relations, or both directions)
/// count once, at the strongest.
pub fn spreading_activation<S: NeighborSource + ?Sized>(
    source: &S,
    seeds: &[ItemRef],
    config: &ActivationConfig,
) -> Result<Activation> {
    let mut activation: HashMap<ItemRef, f64> = HashMap::new();
    let mut visited: HashSet<ItemRef> = HashSet::new();
    let mut queue: VecDeque<(ItemRef, usize)> = VecDeque::new();
    let seed_set: HashSet<&ItemRef> = seeds.iter().collect();
    let mut edges = Vec::new();

    for seed in seeds {
        if visited.insert(seed.clone()) {
            activation.insert(seed.clone(), 1.0);
            queue.push_back((seed.clone(), 0));
        }
    }

    while let Some((node, hop)) = queue.pop_front() {
        if hop >= config.max_hops {
            continue;
        }
        let current = activation.get(&node).copied().unwrap_or(0.0);

        for (neighbor, strength) in strongest_edges(source.neighbors(&node)?) {
            let propagated = current * strength * config.hop_decay;
            if propagated < config.min_activation {
                continue;
            }
            if visited.insert(neighbor.clone()) {
                activation.insert(neighbor.clone(), propagated);
                queue.push_back((neighbor.clone(), hop + 1));
            } else if !seed_set.contains(&neighbor) {
                *activation.entry(neighbor.clone()).or_insert(0.0) += propagated;
            } else {
                continue;
            }
            edges.push((node.clone(), neighbor));
        }
    }

    let mut items: Vec<ActivatedItem> = activation
        .into_iter()
        .filter(|(item, _)| !seed_set.contains(item))
        .map(|(item, activation)| ActivatedItem { item, activation })
        .collect();
    items.sort_by(|a, b| {
        b.activation
            .total_cmp(&a.activation)
            .then_with(|| a.item.cmp(&b.item))
    });

    Ok(Activation { items, edges })
}

fn strongest_edges(neighbors: Vec<Neighbor>) -> BTreeMap<ItemRef, f64> {
    let mut best: BTreeMap<ItemRef, f64> = BTreeMap::new();
    for n in neighbors {
        let entry = best.entry(n.item).or_insert(n.strength);
        *entry = entry.max(n.strength);
    }
    best
}

/// Seeds for a set of files: the most recent active errors and decisions that
/// reference each file, for up to `max_files` files.
pub fn seeds_for_files(
    conn: &Connection,
    files: &[String],
    config: &ActivationConfig,
) -> Result<Vec<ItemRef>> {
    let mut seeds = Vec::new();
    let mut seen = HashSet::new();

    for file in files.iter().take(config.max_files) {
        for kind in [ItemKind::Error, ItemKind::Decision] {
            for item in items_referencing(conn, kind, file, config.seeds_per_file)? {
                if seen.insert(item.clone()) {
                    seeds.push(item);
                }
            }
        }
    }
    Ok(seeds)
}

fn items_referencing(
    conn: &Connection,
    kind: ItemKind,
    file: &str,
    limit: usize,
) -> Result<Vec<ItemRef>> {
    let spec = kind.spec();
    let Some(files_column) = spec.files_column else {
        return Ok(Vec::new());
    };
    let mut stmt = conn.prepare(&format!(
        "SELECT CAST(id AS TEXT), {files_column} FROM {table} \
         WHERE archived_at IS NULL AND instr({files_column}, ?1) > 0 \
         ORDER BY {created} DESC, id DESC",
        table = spec.table,
        created = spec.created_column,
    ))?;
    let rows = stmt
        .query_map([file], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    // instr() only narrows the scan; the JSON list decides
    Ok(rows
        .into_iter()
        .filter(|(_, raw)| {
            serde_json::from_str::<Vec<String>>(raw)
                .map(|list| list.iter().any(|f| f == file))
                .unwrap_or(false)
        })
        .take(limit)
        .map(|(id, _)| ItemRef::new(kind, id))
        .collect())
}

/// Seed from files, then spread.
pub fn activate_for_files(
    conn: &Connection,
    files: &[String],
    config: &ActivationConfig,
) -> Result<Activation> {
    let seeds = seeds_for_files(conn, files, config)?;
    if seeds.is_empty() {
        return Ok(Activation::default());
    }
    tracing::debug!(seeds = seeds.len(), "spreading activation from files");
    spreading_activation(conn, &seeds, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::associations::Relation;

    /// In-memory undirected graph.
    #[derive(Default)]
    struct Graph(HashMap<ItemRef, Vec<Neighbor>>);

    impl Graph {
        fn link(&mut self, a: &ItemRef, b: &ItemRef, strength: f64) {
            for (from, to) in [(a, b), (b, a)] {
                self.0.entry(from.clone()).or_default().push(Neighbor {
                    item: to.clone(),
                    relation: Relation::Temporal,
                    strength,
                });
            }
        }
    }

    impl NeighborSource for Graph {
        fn neighbors(&self, item: &ItemRef) -> Result<Vec<Neighbor>> {
            Ok(self.0.get(item).cloned().unwrap_or_default())
        }
    }

    fn node(id: i64) -> ItemRef {
        ItemRef::new(ItemKind::Note, id)
    }

    fn activation_of(result: &Activation, item: &ItemRef) -> Option<f64> {
        result
            .items
            .iter()
            .find(|a| &a.item == item)
            .map(|a| a.activation)
    }

    #[test]
    fn test_two_node_cycle() {
        let mut graph = Graph::default();
        graph.link(&node(1), &node(2), 1.0);
        // Same pair again under another relation
        graph.link(&node(1), &node(2), 1.0);

        let result = spreading_activation(&graph, &[node(1)], &ActivationConfig::default()).unwrap();
        assert_eq!(result.items.len(), 1);
        assert_eq!(result.items[0].item, node(2));
        assert!((result.items[0].activation - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_weak_edges_pruned() {
        let mut graph = Graph::default();
        graph.link(&node(1), &node(2), 0.1);
        graph.link(&node(2), &node(3), 1.0);

        let result = spreading_activation(&graph, &[node(1)], &ActivationConfig::default()).unwrap();
        assert!(result.items.is_empty());
        assert!(result.edges.is_empty());
    }

    #[test]
    fn test_hop_cap() {
        let mut graph = Graph::default();
        for i in 1..5 {
            graph.link(&node(i), &node(i + 1), 1.0);
        }
        let config = ActivationConfig {
            min_activation: 0.001,
            ..Default::default()
        };

        let result = spreading_activation(&graph, &[node(1)], &config).unwrap();
        assert_eq!(activation_of(&result, &node(2)), Some(0.5));
        assert_eq!(activation_of(&result, &node(3)), Some(0.25));
        assert_eq!(activation_of(&result, &node(4)), Some(0.125));
        assert_eq!(activation_of(&result, &node(5)), None);
    }

    #[test]
    fn test_converging_paths_accumulate() {
        let mut graph = Graph::default();
        graph.link(&node(1), &node(2), 1.0);
        graph.link(&node(1), &node(3), 1.0);
        graph.link(&node(2), &node(4), 1.0);
        graph.link(&node(3), &node(4), 1.0);

        let result = spreading_activation(&graph, &[node(1)], &ActivationConfig::default()).unwrap();
        assert_eq!(activation_of(&result, &node(4)), Some(0.5));
        assert_eq!(result.items.len(), 3);
        // Sorted best first
        assert!(result
            .items
            .windows(2)
            .all(|w| w[0].activation >= w[1].activation));
    }

    #[test]
    fn test_seeds_excluded_and_not_credited() {
        let mut graph = Graph::default();
        graph.link(&node(1), &node(2), 1.0);
        graph.link(&node(2), &node(3), 1.0);

        let result =
            spreading_activation(&graph, &[node(1), node(3)], &ActivationConfig::default()).unwrap();
        assert_eq!(result.items.len(), 1);
        // Reached from both seeds
        assert_eq!(activation_of(&result, &node(2)), Some(1.0));
    }

    #[test]
    fn test_seeds_for_files_from_store() {
        use crate::db;
        use crate::memory::store;
        use crate::memory::types::{NewDecision, NewError, NewItem};
        use chrono::Utc;

        let mut conn = db::open_memory_database().unwrap();
        let mut decisions = Vec::new();
        for i in 0..4 {
            let at = Utc::now() - chrono::Duration::minutes(10 - i);
            let outcome = store::insert_item(
                &mut conn,
                &NewItem::Decision(NewDecision {
                    title: format!("decision {i}"),
                    description: "d".into(),
                    files: vec!["src/main.rs".into()],
                    ..Default::default()
                }),
                None,
                0.5,
                at,
            )
            .unwrap();
            decisions.push(outcome.item);
        }
        let error = store::insert_item(
            &mut conn,
            &NewItem::Error(NewError {
                message: "boom".into(),
                files: vec!["src/main.rs".into()],
                ..Default::default()
            }),
            None,
            0.5,
            Utc::now(),
        )
        .unwrap()
        .item;

        let seeds = seeds_for_files(
            &conn,
            &["src/main.rs".to_string()],
            &ActivationConfig::default(),
        )
        .unwrap();
        assert_eq!(seeds[0], error);
        // Three most recent decisions, newest first
        assert_eq!(&seeds[1..], &[decisions[3].clone(), decisions[2].clone(), decisions[1].clone()]);

        associations::create_association(&conn, &decisions[0], &error, Relation::SameFile, 0.7)
            .unwrap();
        let result =
            activate_for_files(&conn, &["src/main.rs".to_string()], &ActivationConfig::default())
                .unwrap();
        assert_eq!(result.items.len(), 1);
        assert_eq!(result.items[0].item, decisions[0]);
        assert!((result.items[0].activation - 0.35).abs() < 1e-12);
    }
}
