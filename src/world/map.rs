//! Mermaid diagram of the exits between rooms.

use std::collections::{BTreeSet, HashMap, VecDeque};

use super::WorldDefinition;
use crate::service::movement::exit_mentions;

const UNREACHABLE: usize = 999;

/// Directed `(from, to)` edges for every `#room` mention naming an existing room.
pub fn room_edges(world: &WorldDefinition) -> BTreeSet<(String, String)> {
    let ids = world.room_ids();
    let mut edges = BTreeSet::new();
    for room in &world.rooms {
        for target in exit_mentions(&room.description) {
            if ids.contains(&target) {
                edges.insert((room.id.clone(), target));
            }
        }
    }
    edges
}

fn bfs_distances(edges: &BTreeSet<(String, String)>, start: &str) -> HashMap<String, usize> {
    let mut adjacent: HashMap<&str, BTreeSet<&str>> = HashMap::new();
    for (src, dst) in edges {
        adjacent.entry(src.as_str()).or_default().insert(dst.as_str());
        adjacent.entry(dst.as_str()).or_default().insert(src.as_str());
    }

    let mut distances = HashMap::from([(start.to_string(), 0)]);
    let mut queue = VecDeque::from([start.to_string()]);
    while let Some(node) = queue.pop_front() {
        let here = distances[&node];
        if let Some(neighbours) = adjacent.get(node.as_str()) {
            for next in neighbours {
                if !distances.contains_key(*next) {
                    distances.insert(next.to_string(), here + 1);
                    queue.push_back(next.to_string());
                }
            }
        }
    }
    distances
}

/// Render `edges` as a left-to-right Mermaid graph rooted at `entrance`.
///
/// Rooms connected both ways get a single `<-->` edge with the leaf (degree 2)
/// or the farther room on the right; one-way exits are drawn `-->`. Edges are
/// ordered by distance from the entrance so the diagram reads outward.
pub fn render_mermaid(edges: &BTreeSet<(String, String)>, entrance: &str) -> String {
    let mut lines = vec![
        "---".to_string(),
        "config:".to_string(),
        "    layout: elk".to_string(),
        "---".to_string(),
        "graph LR".to_string(),
        format!(
            "    {entrance}@{{ shape: stadium, label: \"{entrance} (entrance)\" }}"
        ),
    ];

    let dist = bfs_distances(edges, entrance);
    let distance = |node: &str| dist.get(node).copied().unwrap_or(UNREACHABLE);

    let mut degree: HashMap<&str, usize> = HashMap::new();
    for (src, dst) in edges {
        *degree.entry(src.as_str()).or_default() += 1;
        *degree.entry(dst.as_str()).or_default() += 1;
    }
    let degree_of = |node: &str| degree.get(node).copied().unwrap_or(0);

    let mut bidirectional: Vec<(&str, &str)> = Vec::new();
    let mut oneway: Vec<(&str, &str)> = Vec::new();
    for (src, dst) in edges {
        let (src, dst) = (src.as_str(), dst.as_str());
        if edges.contains(&(dst.to_string(), src.to_string())) {
            // Each two-way pair is seen twice; draw it once.
            if src > dst {
                continue;
            }
            let pair = if degree_of(dst) == 2 && degree_of(src) > 2 {
                (src, dst)
            } else if degree_of(src) == 2 && degree_of(dst) > 2 {
                (dst, src)
            } else if distance(src) <= distance(dst) {
                (src, dst)
            } else {
                (dst, src)
            };
            bidirectional.push(pair);
        } else {
            oneway.push((src, dst));
        }
    }

    let sort_key = |&(src, dst): &(&str, &str)| {
        let (a, b) = (distance(src), distance(dst));
        (a.min(b), a.max(b), src.to_string(), dst.to_string())
    };
    bidirectional.sort_by_key(sort_key);
    oneway.sort_by_key(sort_key);

    for (src, dst) in bidirectional {
        lines.push(format!("    {} <--> {}", src, dst));
    }
    for (src, dst) in oneway {
        lines.push(format!("    {} --> {}", src, dst));
    }
    lines.join("\n")
}

/// Map of `world`, using its default room as the entrance.
pub fn world_map(world: &WorldDefinition) -> Result<String, crate::errors::MuddError> {
    let entrance = world.default_room()?;
    Ok(render_mermaid(&room_edges(world), &entrance.id))
}
