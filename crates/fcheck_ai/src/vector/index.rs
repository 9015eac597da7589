//! Approximate-nearest-neighbour indexes keyed by caller-assigned `i64` ids.
//!
//! Searches return `min(k, len)` neighbours, padding with [`EMPTY_SLOT`] when
//! fewer candidates were reachable, as FAISS indexes do.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use fcheck_core::error::{codes, AppError};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::similarity::{dot, normalize_in_place, squared_l2};

/// Id reported for a result slot that holds no vector.
pub const EMPTY_SLOT: i64 = -1;
pub const DEFAULT_NPROBE: usize = 4;
const KMEANS_ITERATIONS: usize = 20;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Squared Euclidean distance; smaller is better.
    #[default]
    L2,
    InnerProduct,
    /// Inner product over unit vectors.
    Cosine,
}

impl Metric {
    /// Whether vectors are scaled to unit length before indexing and querying.
    pub fn normalizes(self) -> bool {
        matches!(self, Metric::InnerProduct | Metric::Cosine)
    }

    pub fn higher_is_better(self) -> bool {
        self.normalizes()
    }

    pub fn score(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::L2 => squared_l2(a, b),
            Metric::InnerProduct | Metric::Cosine => dot(a, b),
        }
    }

    /// Threshold test: `score <= threshold` for L2, `score >= threshold` otherwise.
    pub fn passes(self, score: f32, threshold: f32) -> bool {
        if self.higher_is_better() {
            score >= threshold
        } else {
            score <= threshold
        }
    }

    fn worst(self) -> f32 {
        if self.higher_is_better() {
            f32::NEG_INFINITY
        } else {
            f32::INFINITY
        }
    }

    /// Orders better scores first.
    fn rank(self, a: f32, b: f32) -> Ordering {
        let ord = a.partial_cmp(&b).unwrap_or(Ordering::Equal);
        if self.higher_is_better() {
            ord.reverse()
        } else {
            ord
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Metric::L2 => "l2",
            Metric::InnerProduct => "inner_product",
            Metric::Cosine => "cosine",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub id: i64,
    pub score: f32,
}

impl Neighbor {
    pub fn is_empty_slot(&self) -> bool {
        self.id == EMPTY_SLOT
    }
}

/// Index layout, parsed from a factory string such as `"Flat"` or `"IVF100,Flat"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexSpec {
    Flat,
    IvfFlat { nlist: usize },
}

impl Default for IndexSpec {
    fn default() -> Self {
        IndexSpec::IvfFlat { nlist: 100 }
    }
}

impl FromStr for IndexSpec {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        let invalid = || {
            AppError::new(codes::CONFIGURATION, "Unsupported index factory string")
                .with_details(format!("factory={raw}; supported=Flat, IVF<n>,Flat"))
        };
        if raw.eq_ignore_ascii_case("flat") {
            return Ok(IndexSpec::Flat);
        }
        let rest = raw.strip_prefix("IVF").ok_or_else(invalid)?;
        let (n, storage) = rest.split_once(',').ok_or_else(invalid)?;
        if storage.trim() != "Flat" {
            return Err(invalid());
        }
        let nlist: usize = n.trim().parse().map_err(|_| invalid())?;
        if nlist == 0 {
            return Err(invalid());
        }
        Ok(IndexSpec::IvfFlat { nlist })
    }
}

impl fmt::Display for IndexSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexSpec::Flat => f.write_str("Flat"),
            IndexSpec::IvfFlat { nlist } => write!(f, "IVF{nlist},Flat"),
        }
    }
}

impl IndexSpec {
    pub fn requires_training(&self) -> bool {
        matches!(self, IndexSpec::IvfFlat { .. })
    }

    pub fn build(&self, dim: usize, metric: Metric) -> IndexStructure {
        match *self {
            IndexSpec::Flat => IndexStructure::Flat(FlatIndex::new(dim, metric)),
            IndexSpec::IvfFlat { nlist } => {
                IndexStructure::IvfFlat(IvfFlatIndex::new(dim, metric, nlist))
            }
        }
    }
}

/// Operational contract every ANN index satisfies.
pub trait AnnIndex {
    fn dim(&self) -> usize;
    fn metric(&self) -> Metric;
    fn is_trained(&self) -> bool;
    /// No-op for indexes that need no training or are already trained.
    fn train(&mut self, vectors: &[Vec<f32>]) -> Result<(), AppError>;
    /// Either every vector is inserted or none is.
    fn add_with_ids(&mut self, ids: &[i64], vectors: &[Vec<f32>]) -> Result<(), AppError>;
    /// `min(k, len)` neighbours, best first, padded with [`EMPTY_SLOT`].
    fn search(&self, query: &[f32], k: usize) -> Vec<Neighbor>;
    /// Returns how many of `ids` were present. Unknown ids are ignored.
    fn remove_ids(&mut self, ids: &[i64]) -> usize;
    fn contains(&self, id: i64) -> bool;
    /// Live ids in ascending order.
    fn ids(&self) -> Vec<i64>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Structural self-check, run after deserialising.
    fn check_integrity(&self) -> Result<(), AppError>;
}

/// Exact search over positionally stored vectors, with an explicit id↔slot table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlatIndex {
    dim: usize,
    metric: Metric,
    vectors: Vec<Vec<f32>>,
    slot_ids: Vec<i64>,
    id_slots: BTreeMap<i64, usize>,
}

impl FlatIndex {
    pub fn new(dim: usize, metric: Metric) -> Self {
        Self {
            dim,
            metric,
            vectors: Vec::new(),
            slot_ids: Vec::new(),
            id_slots: BTreeMap::new(),
        }
    }
}

impl AnnIndex for FlatIndex {
    fn dim(&self) -> usize {
        self.dim
    }

    fn metric(&self) -> Metric {
        self.metric
    }

    fn is_trained(&self) -> bool {
        true
    }

    fn train(&mut self, _vectors: &[Vec<f32>]) -> Result<(), AppError> {
        Ok(())
    }

    fn add_with_ids(&mut self, ids: &[i64], vectors: &[Vec<f32>]) -> Result<(), AppError> {
        check_batch(self.dim, ids, vectors, |id| self.id_slots.contains_key(&id))?;
        for (id, v) in ids.iter().zip(vectors) {
            self.id_slots.insert(*id, self.vectors.len());
            self.slot_ids.push(*id);
            self.vectors.push(v.clone());
        }
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> Vec<Neighbor> {
        let candidates = self
            .vectors
            .iter()
            .zip(&self.slot_ids)
            .map(|(v, id)| Neighbor {
                id: *id,
                score: self.metric.score(query, v),
            })
            .collect();
        top_k(self.metric, candidates, k.min(self.len()))
    }

    fn remove_ids(&mut self, ids: &[i64]) -> usize {
        let mut removed = 0;
        for id in ids {
            let Some(slot) = self.id_slots.remove(id) else {
                continue;
            };
            self.vectors.swap_remove(slot);
            self.slot_ids.swap_remove(slot);
            if let Some(moved) = self.slot_ids.get(slot) {
                self.id_slots.insert(*moved, slot);
            }
            removed += 1;
        }
        removed
    }

    fn contains(&self, id: i64) -> bool {
        self.id_slots.contains_key(&id)
    }

    fn ids(&self) -> Vec<i64> {
        self.id_slots.keys().copied().collect()
    }

    fn len(&self) -> usize {
        self.vectors.len()
    }

    fn check_integrity(&self) -> Result<(), AppError> {
        if self.vectors.len() != self.slot_ids.len() || self.slot_ids.len() != self.id_slots.len() {
            return Err(corruption(format!(
                "flat index sizes disagree: vectors={}; slot_ids={}; id_slots={}",
                self.vectors.len(),
                self.slot_ids.len(),
                self.id_slots.len()
            )));
        }
        for (slot, id) in self.slot_ids.iter().enumerate() {
            if self.id_slots.get(id) != Some(&slot) {
                return Err(corruption(format!("id {id} does not map back to slot {slot}")));
            }
        }
        check_vector_dims(self.dim, self.vectors.iter())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
struct InvertedList {
    ids: Vec<i64>,
    vectors: Vec<Vec<f32>>,
}

/// Inverted-file index: a k-means coarse quantiser routes each vector to one
/// list, and a query scans only the `nprobe` closest lists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IvfFlatIndex {
    dim: usize,
    metric: Metric,
    nlist: usize,
    nprobe: usize,
    centroids: Vec<Vec<f32>>,
    lists: Vec<InvertedList>,
    locations: BTreeMap<i64, (usize, usize)>,
}

impl IvfFlatIndex {
    pub fn new(dim: usize, metric: Metric, nlist: usize) -> Self {
        Self {
            dim,
            metric,
            nlist: nlist.max(1),
            nprobe: DEFAULT_NPROBE,
            centroids: Vec::new(),
            lists: Vec::new(),
            locations: BTreeMap::new(),
        }
    }

    pub fn with_nprobe(mut self, nprobe: usize) -> Self {
        self.set_nprobe(nprobe);
        self
    }

    pub fn set_nprobe(&mut self, nprobe: usize) {
        self.nprobe = nprobe.max(1);
    }

    pub fn nprobe(&self) -> usize {
        self.nprobe
    }

    /// Requested list count. The trained count may be lower on small training sets.
    pub fn nlist(&self) -> usize {
        self.nlist
    }

    pub fn trained_lists(&self) -> usize {
        self.centroids.len()
    }

    /// Lists ordered from the closest centroid to the farthest.
    fn probe_order(&self, query: &[f32]) -> Vec<usize> {
        let mut order: Vec<(usize, f32)> = self
            .centroids
            .iter()
            .enumerate()
            .map(|(i, c)| (i, self.metric.score(query, c)))
            .collect();
        order.sort_by(|a, b| self.metric.rank(a.1, b.1).then(a.0.cmp(&b.0)));
        order.into_iter().map(|(i, _)| i).collect()
    }

    fn nearest_list(&self, v: &[f32]) -> usize {
        nearest_centroid(self.metric, &self.centroids, v)
    }
}

impl AnnIndex for IvfFlatIndex {
    fn dim(&self) -> usize {
        self.dim
    }

    fn metric(&self) -> Metric {
        self.metric
    }

    fn is_trained(&self) -> bool {
        !self.centroids.is_empty()
    }

    fn train(&mut self, vectors: &[Vec<f32>]) -> Result<(), AppError> {
        if self.is_trained() {
            return Ok(());
        }
        if vectors.is_empty() {
            return Err(AppError::new(
                codes::VECTOR_INPUT_INVALID,
                "IVF training requires at least one vector",
            ));
        }
        check_vector_dims(self.dim, vectors.iter()).map_err(|e| AppError {
            code: codes::DIMENSION_MISMATCH.to_string(),
            ..e
        })?;

        let k = self.nlist.min(vectors.len());
        let mut centroids: Vec<Vec<f32>> = (0..k)
            .map(|i| vectors[i * vectors.len() / k].clone())
            .collect();
        let mut assignment: Vec<usize> = vec![usize::MAX; vectors.len()];

        for _ in 0..KMEANS_ITERATIONS {
            let mut changed = false;
            for (slot, v) in vectors.iter().enumerate() {
                let c = nearest_centroid(self.metric, &centroids, v);
                if assignment[slot] != c {
                    assignment[slot] = c;
                    changed = true;
                }
            }
            if !changed {
                break;
            }

            let mut sums = vec![vec![0.0f32; self.dim]; k];
            let mut counts = vec![0usize; k];
            for (v, &c) in vectors.iter().zip(&assignment) {
                counts[c] += 1;
                for (s, x) in sums[c].iter_mut().zip(v) {
                    *s += x;
                }
            }
            for (c, (sum, count)) in sums.into_iter().zip(counts).enumerate() {
                // An emptied cluster keeps its previous centroid.
                if count == 0 {
                    continue;
                }
                let mut mean: Vec<f32> = sum.into_iter().map(|s| s / count as f32).collect();
                if self.metric.normalizes() {
                    normalize_in_place(&mut mean);
                }
                centroids[c] = mean;
            }
        }

        debug!(requested = self.nlist, trained = k, samples = vectors.len(), "ivf index trained");
        self.lists = vec![InvertedList::default(); k];
        self.centroids = centroids;
        Ok(())
    }

    fn add_with_ids(&mut self, ids: &[i64], vectors: &[Vec<f32>]) -> Result<(), AppError> {
        if !self.is_trained() {
            return Err(AppError::new(
                codes::VECTOR_INPUT_INVALID,
                "IVF index must be trained before adding vectors",
            ));
        }
        check_batch(self.dim, ids, vectors, |id| self.locations.contains_key(&id))?;
        for (id, v) in ids.iter().zip(vectors) {
            let list = self.nearest_list(v);
            let pos = self.lists[list].ids.len();
            self.lists[list].ids.push(*id);
            self.lists[list].vectors.push(v.clone());
            self.locations.insert(*id, (list, pos));
        }
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> Vec<Neighbor> {
        let mut candidates = Vec::new();
        for list in self.probe_order(query).into_iter().take(self.nprobe) {
            let inv = &self.lists[list];
            for (id, v) in inv.ids.iter().zip(&inv.vectors) {
                candidates.push(Neighbor {
                    id: *id,
                    score: self.metric.score(query, v),
                });
            }
        }
        top_k(self.metric, candidates, k.min(self.len()))
    }

    fn remove_ids(&mut self, ids: &[i64]) -> usize {
        let mut removed = 0;
        for id in ids {
            let Some((list, pos)) = self.locations.remove(id) else {
                continue;
            };
            let inv = &mut self.lists[list];
            inv.ids.swap_remove(pos);
            inv.vectors.swap_remove(pos);
            if let Some(moved) = inv.ids.get(pos) {
                self.locations.insert(*moved, (list, pos));
            }
            removed += 1;
        }
        removed
    }

    fn contains(&self, id: i64) -> bool {
        self.locations.contains_key(&id)
    }

    fn ids(&self) -> Vec<i64> {
        self.locations.keys().copied().collect()
    }

    fn len(&self) -> usize {
        self.locations.len()
    }

    fn check_integrity(&self) -> Result<(), AppError> {
        if self.lists.len() != self.centroids.len() {
            return Err(corruption(format!(
                "ivf list count {} does not match centroid count {}",
                self.lists.len(),
                self.centroids.len()
            )));
        }
        check_vector_dims(self.dim, self.centroids.iter())?;
        let mut total = 0usize;
        for (l, inv) in self.lists.iter().enumerate() {
            if inv.ids.len() != inv.vectors.len() {
                return Err(corruption(format!("ivf list {l} ids and vectors disagree")));
            }
            check_vector_dims(self.dim, inv.vectors.iter())?;
            for (pos, id) in inv.ids.iter().enumerate() {
                if self.locations.get(id) != Some(&(l, pos)) {
                    return Err(corruption(format!("id {id} is not located at list {l} position {pos}")));
                }
            }
            total += inv.ids.len();
        }
        if total != self.locations.len() {
            return Err(corruption(format!(
                "ivf lists hold {total} vectors but {} ids are located",
                self.locations.len()
            )));
        }
        Ok(())
    }
}

/// Serialisable union of the concrete index kinds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum IndexStructure {
    Flat(FlatIndex),
    IvfFlat(IvfFlatIndex),
}

impl IndexStructure {
    fn inner(&self) -> &dyn AnnIndex {
        match self {
            IndexStructure::Flat(i) => i,
            IndexStructure::IvfFlat(i) => i,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn AnnIndex {
        match self {
            IndexStructure::Flat(i) => i,
            IndexStructure::IvfFlat(i) => i,
        }
    }

    pub fn spec(&self) -> IndexSpec {
        match self {
            IndexStructure::Flat(_) => IndexSpec::Flat,
            IndexStructure::IvfFlat(i) => IndexSpec::IvfFlat { nlist: i.nlist },
        }
    }
}

impl AnnIndex for IndexStructure {
    fn dim(&self) -> usize {
        self.inner().dim()
    }

    fn metric(&self) -> Metric {
        self.inner().metric()
    }

    fn is_trained(&self) -> bool {
        self.inner().is_trained()
    }

    fn train(&mut self, vectors: &[Vec<f32>]) -> Result<(), AppError> {
        self.inner_mut().train(vectors)
    }

    fn add_with_ids(&mut self, ids: &[i64], vectors: &[Vec<f32>]) -> Result<(), AppError> {
        self.inner_mut().add_with_ids(ids, vectors)
    }

    fn search(&self, query: &[f32], k: usize) -> Vec<Neighbor> {
        self.inner().search(query, k)
    }

    fn remove_ids(&mut self, ids: &[i64]) -> usize {
        self.inner_mut().remove_ids(ids)
    }

    fn contains(&self, id: i64) -> bool {
        self.inner().contains(id)
    }

    fn ids(&self) -> Vec<i64> {
        self.inner().ids()
    }

    fn len(&self) -> usize {
        self.inner().len()
    }

    fn check_integrity(&self) -> Result<(), AppError> {
        self.inner().check_integrity()
    }
}

fn nearest_centroid(metric: Metric, centroids: &[Vec<f32>], v: &[f32]) -> usize {
    let mut best = 0usize;
    let mut best_score = metric.worst();
    for (i, c) in centroids.iter().enumerate() {
        let s = metric.score(v, c);
        if metric.rank(s, best_score) == Ordering::Less {
            best = i;
            best_score = s;
        }
    }
    best
}

/// `k` must already be capped at the index size.
fn top_k(metric: Metric, mut candidates: Vec<Neighbor>, k: usize) -> Vec<Neighbor> {
    candidates.sort_by(|a, b| metric.rank(a.score, b.score).then(a.id.cmp(&b.id)));
    candidates.truncate(k);
    while candidates.len() < k {
        candidates.push(Neighbor {
            id: EMPTY_SLOT,
            score: metric.worst(),
        });
    }
    candidates
}

fn check_batch<F>(dim: usize, ids: &[i64], vectors: &[Vec<f32>], exists: F) -> Result<(), AppError>
where
    F: Fn(i64) -> bool,
{
    if ids.len() != vectors.len() {
        return Err(AppError::new(
            codes::VECTOR_INPUT_INVALID,
            "ids and vectors must have the same length",
        )
        .with_details(format!("ids={}; vectors={}", ids.len(), vectors.len())));
    }
    let mut seen = HashSet::with_capacity(ids.len());
    for (id, v) in ids.iter().zip(vectors) {
        if *id < 0 {
            return Err(AppError::new(codes::VECTOR_INPUT_INVALID, "Document ids must be non-negative")
                .with_details(format!("id={id}")));
        }
        if v.len() != dim {
            return Err(AppError::new(codes::DIMENSION_MISMATCH, "Vector dimension does not match index")
                .with_details(format!("id={id}; expected={dim}; got={}", v.len())));
        }
        if exists(*id) || !seen.insert(*id) {
            return Err(AppError::new(codes::VECTOR_DUPLICATE_ID, "Document id is already indexed")
                .with_details(format!("id={id}")));
        }
    }
    Ok(())
}

fn check_vector_dims<'a, I>(dim: usize, vectors: I) -> Result<(), AppError>
where
    I: Iterator<Item = &'a Vec<f32>>,
{
    for (i, v) in vectors.enumerate() {
        if v.len() != dim {
            return Err(corruption(format!(
                "vector {i} has dimension {}, expected {dim}",
                v.len()
            )));
        }
    }
    Ok(())
}

fn corruption(details: String) -> AppError {
    AppError::new(codes::INDEX_CORRUPTION, "Index structure is inconsistent").with_details(details)
}
