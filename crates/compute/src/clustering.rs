//! Blocked vendor clustering with union-find.
//!
//! Vendors are bucketed by the first token of their normalized name; only
//! pairs inside a bucket are compared. A pair is linked when its similarity
//! clears the threshold and enough corroborators agree. Clusters are the
//! connected components of those links (every link clears the threshold on
//! its own), so raising the threshold can only split clusters.
//!
//! Vendors are sorted by id before anything else and union-find always keeps
//! the smaller index as root, so the partition does not depend on input
//! order or on the order rayon finishes buckets in.

use std::collections::{BTreeMap, HashMap};

use fraudit_core::normalize::blocking_key;
use fraudit_core::{Vendor, VendorId};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, warn};

use crate::similarity;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VendorCluster {
    /// `C-<smallest member id>`.
    pub cluster_id: String,
    /// Member vendor ids, sorted.
    pub members: Vec<VendorId>,
    pub representative_name: String,
}

/// A blocking bucket that could not be evaluated. Other buckets are unaffected.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("bucket '{bucket}' ({size} vendors) skipped: {reason}")]
pub struct MatchingError {
    pub bucket: String,
    pub size: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Copy)]
pub struct ClusterParams {
    pub name_threshold: f64,
    pub min_corroboration: u8,
    /// Buckets above this size are skipped with a [`MatchingError`].
    pub max_bucket_size: usize,
}

/// Output of one clustering pass.
#[derive(Debug, Clone, Default)]
pub struct ClusterSet {
    clusters: Vec<VendorCluster>,
    membership: HashMap<VendorId, usize>,
    errors: Vec<MatchingError>,
}

impl ClusterSet {
    /// Clusters with two or more members, ordered by cluster id.
    pub fn clusters(&self) -> &[VendorCluster] {
        &self.clusters
    }

    pub fn cluster_of(&self, vendor_id: &str) -> Option<&VendorCluster> {
        self.membership.get(vendor_id).map(|&i| &self.clusters[i])
    }

    /// Members of the vendor's cluster, or just the vendor itself.
    pub fn members_of<'a>(&'a self, vendor_id: &'a str) -> Vec<&'a str> {
        match self.cluster_of(vendor_id) {
            Some(c) => c.members.iter().map(String::as_str).collect(),
            None => vec![vendor_id],
        }
    }

    pub fn errors(&self) -> &[MatchingError] {
        &self.errors
    }

    /// The partition as sorted member lists, for comparisons.
    pub fn partition(&self) -> Vec<Vec<VendorId>> {
        self.clusters.iter().map(|c| c.members.clone()).collect()
    }
}

// ── Union-find ──────────────────────────────────────────────────────

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    /// Union keeping the smaller root.
    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[hi] = lo;
        }
    }
}

// ── Clustering ──────────────────────────────────────────────────────

/// Links found inside one bucket, as index pairs into the sorted vendor list.
fn bucket_links(
    members: &[usize],
    vendors: &[&Vendor],
    params: &ClusterParams,
) -> Vec<(usize, usize)> {
    let mut links = Vec::new();
    for (pos, &i) in members.iter().enumerate() {
        for &j in &members[pos + 1..] {
            let s = similarity::score(vendors[i], vendors[j]);
            if s.score >= params.name_threshold && s.corroborations >= params.min_corroboration {
                links.push((i, j));
            }
        }
    }
    links
}

/// Cluster vendors by blocked pairwise similarity.
pub fn cluster(vendors: &[Vendor], params: &ClusterParams) -> ClusterSet {
    let mut sorted: Vec<&Vendor> = vendors.iter().collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));
    sorted.dedup_by(|a, b| a.id == b.id);

    let mut buckets: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (i, v) in sorted.iter().enumerate() {
        let key = blocking_key(&v.normalized_name);
        if !key.is_empty() {
            buckets.entry(key).or_default().push(i);
        }
    }

    let outcomes: Vec<Result<Vec<(usize, usize)>, MatchingError>> = buckets
        .par_iter()
        .map(|(key, members)| {
            if members.len() > params.max_bucket_size {
                return Err(MatchingError {
                    bucket: key.to_string(),
                    size: members.len(),
                    reason: format!("exceeds max bucket size {}", params.max_bucket_size),
                });
            }
            Ok(bucket_links(members, &sorted, params))
        })
        .collect();

    let mut uf = UnionFind::new(sorted.len());
    let mut errors = Vec::new();
    for outcome in outcomes {
        match outcome {
            Ok(links) => {
                for (a, b) in links {
                    uf.union(a, b);
                }
            }
            Err(e) => {
                warn!(bucket = %e.bucket, size = e.size, "skipping oversized blocking bucket");
                errors.push(e);
            }
        }
    }

    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for i in 0..sorted.len() {
        let root = uf.find(i);
        groups.entry(root).or_default().push(i);
    }

    let mut clusters = Vec::new();
    let mut membership = HashMap::new();
    for members in groups.into_values().filter(|m| m.len() >= 2) {
        let first = sorted[members[0]];
        let idx = clusters.len();
        for &m in &members {
            membership.insert(sorted[m].id.clone(), idx);
        }
        clusters.push(VendorCluster {
            cluster_id: format!("C-{}", first.id),
            members: members.iter().map(|&m| sorted[m].id.clone()).collect(),
            representative_name: first.canonical_name.clone(),
        });
    }

    debug!(
        vendors = sorted.len(),
        buckets = buckets.len(),
        clusters = clusters.len(),
        skipped = errors.len(),
        "vendor clustering complete"
    );

    ClusterSet {
        clusters,
        membership,
        errors,
    }
}
