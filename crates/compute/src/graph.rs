//! Related-party graph: directed ownership links between vendors.
//!
//! Ownership chains can be cyclic (A owns B, B owns A through a holding
//! company). Traversal is breadth-first with an explicit visited set and a
//! depth bound; links are followed in both directions.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use fraudit_core::{Vendor, VendorId};

#[derive(Debug, Clone, Default)]
pub struct RelatedPartyGraph {
    /// owner -> owned
    outgoing: BTreeMap<VendorId, BTreeSet<VendorId>>,
    /// owned -> owners
    incoming: BTreeMap<VendorId, BTreeSet<VendorId>>,
}

impl RelatedPartyGraph {
    pub fn from_vendors(vendors: &[Vendor]) -> Self {
        let mut graph = Self::default();
        for v in vendors {
            for owned in &v.owned_vendor_ids {
                graph.add_edge(&v.id, owned);
            }
        }
        graph
    }

    pub fn add_edge(&mut self, owner: &str, owned: &str) {
        if owner == owned {
            return;
        }
        self.outgoing
            .entry(owner.to_string())
            .or_default()
            .insert(owned.to_string());
        self.incoming
            .entry(owned.to_string())
            .or_default()
            .insert(owner.to_string());
    }

    pub fn edge_count(&self) -> usize {
        self.outgoing.values().map(BTreeSet::len).sum()
    }

    fn neighbors<'a>(&'a self, id: &str) -> impl Iterator<Item = &'a VendorId> + 'a {
        let out = self.outgoing.get(id).into_iter().flatten();
        let inc = self.incoming.get(id).into_iter().flatten();
        out.chain(inc)
    }

    /// Every vendor reachable from any of `starts` within `max_depth` hops,
    /// with its hop distance. Starts are included at depth 0.
    pub fn related<'s>(
        &self,
        starts: impl IntoIterator<Item = &'s str>,
        max_depth: u32,
    ) -> BTreeMap<VendorId, u32> {
        let mut visited: BTreeMap<VendorId, u32> = BTreeMap::new();
        let mut queue: VecDeque<(VendorId, u32)> = VecDeque::new();

        for start in starts {
            if !visited.contains_key(start) {
                visited.insert(start.to_string(), 0);
                queue.push_back((start.to_string(), 0));
            }
        }

        while let Some((node, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            for next in self.neighbors(&node) {
                if !visited.contains_key(next) {
                    visited.insert(next.clone(), depth + 1);
                    queue.push_back((next.clone(), depth + 1));
                }
            }
        }

        visited
    }

    /// Ownership links with both ends in `members`.
    pub fn links_within(&self, members: &BTreeSet<&str>) -> usize {
        self.outgoing
            .iter()
            .filter(|(owner, _)| members.contains(owner.as_str()))
            .map(|(_, owned)| owned.iter().filter(|o| members.contains(o.as_str())).count())
            .sum()
    }

    /// Connected components over ownership links plus `groups`, whose
    /// members all count as linked to each other. Single vendors are left
    /// out. Members are sorted and components are ordered by first member.
    pub fn components<'a>(
        &'a self,
        groups: impl IntoIterator<Item = &'a [VendorId]>,
    ) -> Vec<Vec<VendorId>> {
        let mut adjacency: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        let mut link = |a: &'a str, b: &'a str| {
            adjacency.entry(a).or_default().insert(b);
            adjacency.entry(b).or_default().insert(a);
        };
        for (owner, owned) in &self.outgoing {
            for o in owned {
                link(owner.as_str(), o.as_str());
            }
        }
        for group in groups {
            if let Some((first, rest)) = group.split_first() {
                for m in rest.iter().filter(|m| *m != first) {
                    link(first.as_str(), m.as_str());
                }
            }
        }

        let mut seen: BTreeSet<&str> = BTreeSet::new();
        let mut components = Vec::new();
        for &start in adjacency.keys() {
            if !seen.insert(start) {
                continue;
            }
            let mut component = vec![start];
            let mut queue = VecDeque::from([start]);
            while let Some(node) = queue.pop_front() {
                for &next in adjacency.get(node).into_iter().flatten() {
                    if seen.insert(next) {
                        component.push(next);
                        queue.push_back(next);
                    }
                }
            }
            if component.len() > 1 {
                component.sort_unstable();
                components.push(component.into_iter().map(str::to_string).collect());
            }
        }
        components
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(&str, &str)]) -> RelatedPartyGraph {
        let mut g = RelatedPartyGraph::default();
        for (a, b) in edges {
            g.add_edge(a, b);
        }
        g
    }

    #[test]
    fn follows_links_in_both_directions() {
        let g = graph(&[("HOLD", "A"), ("HOLD", "B"), ("B", "C")]);
        let related = g.related(["A"], 3);
        assert_eq!(related.get("HOLD"), Some(&1));
        assert_eq!(related.get("B"), Some(&2));
        assert_eq!(related.get("C"), Some(&3));
    }

    #[test]
    fn depth_bound_is_respected() {
        let g = graph(&[("A", "B"), ("B", "C"), ("C", "D")]);
        let related = g.related(["A"], 2);
        assert!(related.contains_key("C"));
        assert!(!related.contains_key("D"));
        assert_eq!(g.related(["A"], 0).len(), 1);
    }

    #[test]
    fn cycles_terminate() {
        let g = graph(&[("A", "B"), ("B", "C"), ("C", "A"), ("A", "A")]);
        let related = g.related(["A"], 50);
        assert_eq!(related.len(), 3);
        assert_eq!(g.edge_count(), 3);
    }

    #[test]
    fn components_join_ownership_and_groups() {
        let g = graph(&[("A", "B"), ("X", "Y"), ("Y", "X")]);
        let cluster = vec!["B".to_string(), "C".to_string()];
        let lone = vec!["Q".to_string()];
        let components = g.components([cluster.as_slice(), lone.as_slice()]);
        assert_eq!(components, vec![vec!["A", "B", "C"], vec!["X", "Y"]]);

        assert_eq!(g.links_within(&BTreeSet::from(["A", "B", "C"])), 1);
        assert_eq!(g.links_within(&BTreeSet::from(["X", "Y"])), 2);
    }

    #[test]
    fn multiple_starts_share_depth_zero() {
        let g = graph(&[("A", "X"), ("B", "Y")]);
        let related = g.related(["A", "B", "A"], 1);
        assert_eq!(related.len(), 4);
        assert_eq!(related.get("B"), Some(&0));
    }
}
