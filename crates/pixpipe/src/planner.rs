//! Cost-aware search for the cheapest chain of prototypes serving a request.
//!
//! States are `(format, remaining operations)`. Operation edges retire the
//! earliest remaining operation; format-conversion edges change the encoding
//! and retire nothing. Nodes are ranked by `cost + (1 - quality) * K` and
//! expanded uniform-cost style until the goal `(dst, none)` comes off the heap.

use std::{
    cmp::{Ordering, Reverse},
    collections::{BinaryHeap, HashMap, HashSet},
    sync::Arc,
};

use pixpipe_core::prelude::*;
use pixpipe_transform::prelude::*;

use crate::{
    config::{PixpipeConfig, PlannerConfig},
    pipeline::{Pipeline, Stage},
    request::{CanonicalRequest, ConversionRequest, OpSet},
};

/// Errors raised while turning a request into a pipeline.
///
/// # Example
/// ```rust
/// use pixpipe::prelude::*;
///
/// let planner = Planner::new(std::sync::Arc::new(TransformRegistry::empty()));
/// let request = ConversionRequest::new(PixelFormat::Rgb24, 4, 4, PixelFormat::Grey, 4, 4);
/// let err = planner.plan(&request).unwrap_err();
/// assert_eq!(err.code(), "no_path_found");
/// ```
#[derive(Debug, thiserror::Error)]
pub enum PlanningError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("no pipeline converts {src} {input} to {dst} {output} with {ops} ({expanded} states expanded)")]
    NoPathFound {
        src: PixelFormat,
        dst: PixelFormat,
        input: Resolution,
        output: Resolution,
        ops: OpSet,
        expanded: usize,
    },
    #[error("stage {stage} ({name}) could not be bound: {source}")]
    Transform {
        stage: usize,
        name: &'static str,
        #[source]
        source: TransformError,
    },
    #[error("allocation failed: {0}")]
    Allocation(String),
}

impl PlanningError {
    /// Stable string code for error classification.
    pub fn code(&self) -> &'static str {
        match self {
            PlanningError::InvalidRequest(_) => "invalid_request",
            PlanningError::NoPathFound { .. } => "no_path_found",
            PlanningError::Transform { .. } => "transform_failed",
            PlanningError::Allocation(_) => "allocation_failed",
        }
    }

    /// Whether the error may succeed when retried.
    pub fn retryable(&self) -> bool {
        matches!(self, PlanningError::Allocation(_))
    }
}

/// One searched, not yet bound, pipeline stage.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedStage {
    pub prototype: PrototypeId,
    pub name: &'static str,
    pub impl_name: &'static str,
    pub family: Family,
    pub flags: VariantFlags,
    pub spec: StageSpec,
    pub estimate: CostEstimate,
}

/// Result of a search: the cheapest path and its totals.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub request: CanonicalRequest,
    pub stages: Vec<PlannedStage>,
    /// Summed per-pixel CPU cost.
    pub cost: u64,
    /// Product of stage quality factors.
    pub quality: f64,
    /// `cost + (1 - quality) * K`.
    pub score: f64,
    /// States taken off the heap.
    pub expanded: usize,
}

impl Plan {
    /// Stage names joined for logs.
    pub fn describe(&self) -> String {
        self.stages
            .iter()
            .map(|s| format!("{}({}->{})", s.name, s.spec.src, s.spec.dst))
            .collect::<Vec<_>>()
            .join(" > ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct StateKey {
    format: PixelFormat,
    remaining: OpSet,
}

#[derive(Debug, Clone)]
struct Node {
    cost: u64,
    quality: f64,
    score: f64,
    parent: Option<StateKey>,
    via: Option<PlannedStage>,
}

// Heap entry; `seq` keeps pops deterministic among equal scores.
#[derive(Debug, Clone, Copy)]
struct Queued {
    score: f64,
    seq: u64,
    key: StateKey,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then(self.seq.cmp(&other.seq))
    }
}

/// Builds pipelines from a sealed registry.
///
/// # Example
/// ```rust
/// use std::sync::Arc;
/// use pixpipe::prelude::*;
///
/// let planner = Planner::new(Arc::new(TransformRegistry::builtin()));
/// let request = ConversionRequest::new(PixelFormat::Nv12, 64, 48, PixelFormat::Rgb24, 48, 64)
///     .rotation(90);
/// let plan = planner.search(&request).unwrap();
/// assert_eq!(plan.stages.last().unwrap().spec.dst, PixelFormat::Rgb24);
/// ```
#[derive(Debug, Clone)]
pub struct Planner {
    registry: Arc<TransformRegistry>,
    config: PixpipeConfig,
}

impl Planner {
    /// Planner with default tunables.
    pub fn new(registry: Arc<TransformRegistry>) -> Self {
        Self::with_config(registry, PixpipeConfig::default())
    }

    pub fn with_config(registry: Arc<TransformRegistry>, config: PixpipeConfig) -> Self {
        Self { registry, config }
    }

    /// Planner over the built-in prototype set.
    pub fn builtin() -> Self {
        Self::new(Arc::new(TransformRegistry::builtin()))
    }

    pub fn registry(&self) -> &Arc<TransformRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &PixpipeConfig {
        &self.config
    }

    /// Search and bind a runnable pipeline.
    ///
    /// No partially bound pipeline is ever returned: if any stage fails to
    /// bind, every stage bound so far is released first.
    #[tracing::instrument(skip(self), fields(src = %request.src_format, dst = %request.dst_format))]
    pub fn plan(&self, request: &ConversionRequest) -> Result<Pipeline, PlanningError> {
        let plan = self.search(request)?;
        self.bind(plan)
    }

    /// Search only; nothing is bound.
    pub fn search(&self, request: &ConversionRequest) -> Result<Plan, PlanningError> {
        let canon = request.canonicalize()?;
        tracing::debug!(
            request = %canon,
            rotation = canon.rotation,
            scale = %format_args!("{}/{}", canon.scale.num, canon.scale.den),
            margins = ?canon.margins,
            "canonicalized request"
        );
        let planner = self.config.planner();
        let plan = if canon.is_identity() {
            self.identity_plan(canon)?
        } else {
            Search::new(&self.registry, &planner, &canon).run()?
        };
        tracing::debug!(
            stages = %plan.describe(),
            cost = plan.cost,
            quality = plan.quality,
            score = plan.score,
            expanded = plan.expanded,
            "pipeline planned"
        );
        Ok(plan)
    }

    fn identity_plan(&self, canon: CanonicalRequest) -> Result<Plan, PlanningError> {
        let no_path = || PlanningError::NoPathFound {
            src: canon.src,
            dst: canon.dst,
            input: canon.input,
            output: canon.output,
            ops: canon.ops,
            expanded: 0,
        };
        let proto = self
            .registry
            .lookup(Family::Identity, canon.src, canon.dst, VariantFlags::NONE)
            .map_err(|_| no_path())?;
        let spec = StageSpec::new(canon.src, canon.dst, canon.input, StageOp::Copy)
            .map_err(|_| no_path())?;
        let estimate = proto.estimate(&spec).map_err(|_| no_path())?;
        let quality = estimate.quality as f64;
        let stage = PlannedStage {
            prototype: proto.id(),
            name: proto.name(),
            impl_name: proto.descriptor().impl_name,
            family: Family::Identity,
            flags: proto.flags(),
            spec,
            estimate,
        };
        Ok(Plan {
            request: canon,
            stages: vec![stage],
            cost: estimate.cpu_cost as u64,
            quality,
            score: score(
                estimate.cpu_cost as u64,
                quality,
                self.config.planner().quality_weight,
            ),
            expanded: 0,
        })
    }

    /// Bind every stage of `plan` into a runnable pipeline.
    pub fn bind(&self, plan: Plan) -> Result<Pipeline, PlanningError> {
        let mut stages: Vec<Stage> = Vec::new();
        stages
            .try_reserve_exact(plan.stages.len())
            .map_err(|e| PlanningError::Allocation(e.to_string()))?;
        for (idx, planned) in plan.stages.iter().enumerate() {
            let bound = self
                .registry
                .get(planned.prototype)
                .ok_or_else(|| {
                    TransformError::Construction(format!(
                        "prototype {} is not registered",
                        planned.prototype
                    ))
                })
                .and_then(|proto| proto.bind(&planned.spec));
            match bound {
                Ok(transform) => stages.push(Stage::new(planned.clone(), transform)),
                Err(source) => {
                    tracing::debug!(
                        stage = idx,
                        name = planned.name,
                        error = %source,
                        released = stages.len(),
                        "binding failed, releasing bound stages"
                    );
                    for stage in &mut stages {
                        stage.release();
                    }
                    return Err(PlanningError::Transform {
                        stage: idx,
                        name: planned.name,
                        source,
                    });
                }
            }
        }
        Pipeline::from_stages(stages, &plan, self.config.executor())
    }
}

fn score(cost: u64, quality: f64, weight: f64) -> f64 {
    cost as f64 + (1.0 - quality) * weight
}

struct Search<'a> {
    registry: &'a TransformRegistry,
    config: &'a PlannerConfig,
    canon: &'a CanonicalRequest,
    best: HashMap<StateKey, Node>,
    closed: HashSet<StateKey>,
    heap: BinaryHeap<Reverse<Queued>>,
    seq: u64,
}

impl<'a> Search<'a> {
    fn new(
        registry: &'a TransformRegistry,
        config: &'a PlannerConfig,
        canon: &'a CanonicalRequest,
    ) -> Self {
        Self {
            registry,
            config,
            canon,
            best: HashMap::new(),
            closed: HashSet::new(),
            heap: BinaryHeap::new(),
            seq: 0,
        }
    }

    fn run(mut self) -> Result<Plan, PlanningError> {
        let start = StateKey {
            format: self.canon.src,
            remaining: self.canon.ops,
        };
        let goal = StateKey {
            format: self.canon.dst,
            remaining: OpSet::EMPTY,
        };
        self.best.insert(
            start,
            Node {
                cost: 0,
                quality: 1.0,
                score: 0.0,
                parent: None,
                via: None,
            },
        );
        self.push(start, 0.0);

        let mut expanded = 0usize;
        while let Some(Reverse(entry)) = self.heap.pop() {
            if !self.closed.insert(entry.key) {
                continue;
            }
            expanded += 1;
            if entry.key == goal {
                return self.reconstruct(goal, expanded);
            }
            if expanded >= self.config.max_expansions {
                tracing::debug!(expanded, "search expansion cap reached");
                break;
            }
            self.expand(entry.key);
        }
        Err(PlanningError::NoPathFound {
            src: self.canon.src,
            dst: self.canon.dst,
            input: self.canon.input,
            output: self.canon.output,
            ops: self.canon.ops,
            expanded,
        })
    }

    fn push(&mut self, key: StateKey, score: f64) {
        self.seq += 1;
        self.heap.push(Reverse(Queued {
            score,
            seq: self.seq,
            key,
        }));
    }

    fn expand(&mut self, key: StateKey) {
        let Some(node) = self.best.get(&key).cloned() else {
            return;
        };
        let registry = self.registry;
        let input = self.canon.resolution_at(key.remaining);

        if let Some(op) = key.remaining.first()
            && let Some(stage_op) = self.canon.stage_op(op)
        {
            let next = key.remaining.without(op);
            for proto in registry.from_source(stage_op.family(), key.format) {
                self.relax(key, &node, proto, input, stage_op, next);
            }
        }

        for proto in registry.from_source(Family::FormatConversion, key.format) {
            if let (Some(pinned), Some(tier)) = (self.config.quality_tier, proto.flags().tier())
                && pinned != tier
            {
                continue;
            }
            self.relax(key, &node, proto, input, StageOp::Convert, key.remaining);
        }
    }

    fn relax(
        &mut self,
        from: StateKey,
        node: &Node,
        proto: &Prototype,
        input: Resolution,
        op: StageOp,
        remaining: OpSet,
    ) {
        let next = StateKey {
            format: proto.dst(),
            remaining,
        };
        if self.closed.contains(&next) {
            return;
        }
        let estimate = StageSpec::new(from.format, proto.dst(), input, op)
            .and_then(|spec| proto.estimate(&spec).map(|est| (spec, est)));
        let (spec, estimate) = match estimate {
            Ok(pair) if pair.1.is_valid() => pair,
            Ok((_, est)) => {
                tracing::trace!(proto = proto.name(), quality = est.quality, "edge dropped, quality out of range");
                return;
            }
            Err(err) => {
                tracing::trace!(proto = proto.name(), error = %err, "edge dropped");
                return;
            }
        };
        let cost = node.cost + estimate.cpu_cost as u64;
        let quality = node.quality * estimate.quality as f64;
        let key_score = score(cost, quality, self.config.quality_weight);
        if self
            .best
            .get(&next)
            .is_some_and(|existing| existing.score <= key_score)
        {
            return;
        }
        tracing::trace!(
            from = %from.format,
            to = %next.format,
            remaining = %next.remaining,
            proto = proto.name(),
            score = key_score,
            "relaxed"
        );
        self.best.insert(
            next,
            Node {
                cost,
                quality,
                score: key_score,
                parent: Some(from),
                via: Some(PlannedStage {
                    prototype: proto.id(),
                    name: proto.name(),
                    impl_name: proto.descriptor().impl_name,
                    family: proto.family(),
                    flags: proto.flags(),
                    spec: spec.with_flags(proto.flags()),
                    estimate,
                }),
            },
        );
        self.push(next, key_score);
    }

    fn reconstruct(mut self, goal: StateKey, expanded: usize) -> Result<Plan, PlanningError> {
        let Some(last) = self.best.remove(&goal) else {
            return Err(PlanningError::NoPathFound {
                src: self.canon.src,
                dst: self.canon.dst,
                input: self.canon.input,
                output: self.canon.output,
                ops: self.canon.ops,
                expanded,
            });
        };
        let (cost, quality, total) = (last.cost, last.quality, last.score);
        let mut stages = Vec::new();
        let mut cursor = Some(last);
        while let Some(node) = cursor {
            if let Some(stage) = node.via {
                stages.push(stage);
            }
            cursor = node.parent.and_then(|key| self.best.remove(&key));
        }
        stages.reverse();
        Ok(Plan {
            request: self.canon.clone(),
            stages,
            cost,
            quality,
            score: total,
            expanded,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    use super::*;

    fn make_planner(registry: TransformRegistry) -> Planner {
        Planner::new(Arc::new(registry))
    }

    fn make_request(src: PixelFormat, dst: PixelFormat, w: u32, h: u32) -> ConversionRequest {
        ConversionRequest::new(src, w, h, dst, w, h)
    }

    /// Fixed price, built-in kernel behind it.
    struct Priced {
        estimate: CostEstimate,
        inner: PrimitiveFactory,
    }

    impl TransformFactory for Priced {
        fn estimate(&self, spec: &StageSpec) -> Result<CostEstimate, TransformError> {
            self.inner.estimate(spec)?;
            Ok(self.estimate)
        }

        fn bind(&self, spec: &StageSpec) -> Result<Box<dyn BoundTransform>, TransformError> {
            self.inner.bind(spec)
        }
    }

    /// Counts live bound instances; optionally refuses to bind.
    struct Tracked {
        live: Arc<AtomicUsize>,
        fail: bool,
        inner: PrimitiveFactory,
    }

    struct TrackedBound {
        live: Arc<AtomicUsize>,
        inner: Box<dyn BoundTransform>,
        released: bool,
    }

    impl BoundTransform for TrackedBound {
        fn src_len(&self) -> usize {
            self.inner.src_len()
        }

        fn dst_len(&self) -> usize {
            self.inner.dst_len()
        }

        fn apply(&mut self, src: &[u8], dst: &mut [u8]) -> Result<usize, TransformError> {
            self.inner.apply(src, dst)
        }

        fn release(&mut self) {
            if !self.released {
                self.released = true;
                self.live.fetch_sub(1, AtomicOrdering::SeqCst);
                self.inner.release();
            }
        }
    }

    impl TransformFactory for Tracked {
        fn estimate(&self, spec: &StageSpec) -> Result<CostEstimate, TransformError> {
            self.inner.estimate(spec)
        }

        fn bind(&self, spec: &StageSpec) -> Result<Box<dyn BoundTransform>, TransformError> {
            if self.fail {
                return Err(TransformError::Construction("refused".into()));
            }
            let inner = self.inner.bind(spec)?;
            self.live.fetch_add(1, AtomicOrdering::SeqCst);
            Ok(Box::new(TrackedBound {
                live: self.live.clone(),
                inner,
                released: false,
            }))
        }
    }

    fn make_tracked(
        builder: &mut RegistryBuilder,
        live: &Arc<AtomicUsize>,
        desc: PrototypeDescriptor,
        fail: bool,
    ) {
        let inner = PrimitiveFactory::for_descriptor(&desc).unwrap();
        builder
            .register_factory(
                desc,
                Tracked {
                    live: live.clone(),
                    fail,
                    inner,
                },
            )
            .unwrap();
    }

    /// Formats reachable from `src` through conversion prototypes alone.
    fn make_reachable(registry: &TransformRegistry, src: PixelFormat) -> HashSet<PixelFormat> {
        let mut seen = HashSet::from([src]);
        let mut frontier = vec![src];
        while let Some(format) = frontier.pop() {
            for proto in registry.from_source(Family::FormatConversion, format) {
                if seen.insert(proto.dst()) {
                    frontier.push(proto.dst());
                }
            }
        }
        seen
    }

    #[test]
    fn every_reachable_pair_plans_to_destination() {
        let planner = Planner::builtin();
        for src in PixelFormat::ALL {
            let reachable = make_reachable(planner.registry(), src);
            for dst in PixelFormat::ALL {
                let result = planner.search(&make_request(src, dst, 8, 8));
                if reachable.contains(&dst) {
                    let plan = result.unwrap_or_else(|e| panic!("{src} -> {dst}: {e}"));
                    assert!(!plan.stages.is_empty());
                    assert_eq!(plan.stages[0].spec.src, src);
                    assert_eq!(plan.stages.last().unwrap().spec.dst, dst);
                    for pair in plan.stages.windows(2) {
                        assert_eq!(pair[0].spec.dst, pair[1].spec.src);
                        assert_eq!(pair[0].spec.output, pair[1].spec.input);
                    }
                } else {
                    assert_eq!(result.unwrap_err().code(), "no_path_found", "{src} -> {dst}");
                }
            }
        }
    }

    #[test]
    fn identity_request_is_a_single_copy() {
        let planner = Planner::builtin();
        let plan = planner
            .search(&make_request(PixelFormat::Nv21, PixelFormat::Nv21, 4, 4))
            .unwrap();
        assert_eq!(plan.stages.len(), 1);
        assert_eq!(plan.stages[0].family, Family::Identity);
        assert_eq!(plan.expanded, 0);
    }

    #[test]
    fn identity_without_copy_prototype_fails() {
        let planner = make_planner(TransformRegistry::empty());
        let err = planner
            .search(&make_request(PixelFormat::Grey, PixelFormat::Grey, 4, 4))
            .unwrap_err();
        assert!(matches!(err, PlanningError::NoPathFound { expanded: 0, .. }));
    }

    #[test]
    fn packed_422_detours_for_geometry() {
        let planner = Planner::builtin();
        let request = make_request(PixelFormat::Yuyv, PixelFormat::Rgb24, 4, 4).hflip(true);
        let plan = planner.search(&request).unwrap();
        let families: Vec<_> = plan.stages.iter().map(|s| s.family).collect();
        assert_eq!(families, [Family::FormatConversion, Family::HFlip]);
        assert_eq!(plan.stages[1].spec.src, PixelFormat::Rgb24);
    }

    #[test]
    fn packed_422_destination_with_geometry_is_unreachable() {
        let planner = Planner::builtin();
        let request = make_request(PixelFormat::Yuyv, PixelFormat::Yuyv, 4, 4).vflip(true);
        let err = planner.search(&request).unwrap_err();
        assert!(matches!(
            err,
            PlanningError::NoPathFound { ops: OpSet::VFLIP, .. }
        ));
    }

    #[test]
    fn operations_follow_fixed_order_and_track_size() {
        let planner = Planner::builtin();
        let request = ConversionRequest::new(PixelFormat::Rgb24, 8, 4, PixelFormat::Rgb24, 2, 2)
            .scale(1, 2)
            .rotation(270)
            .vflip(true)
            .offsets(1, 0);
        let plan = planner.search(&request).unwrap();
        let families: Vec<_> = plan.stages.iter().map(|s| s.family).collect();
        assert_eq!(
            families,
            [Family::Scale, Family::Rotate90, Family::VFlip, Family::Crop]
        );
        let sizes: Vec<_> = plan.stages.iter().map(|s| s.spec.output.to_string()).collect();
        assert_eq!(sizes, ["4x2", "2x4", "2x4", "2x2"]);
    }

    #[test]
    fn odd_crop_on_yuv_detours_through_rgb() {
        let planner = Planner::builtin();
        let request = ConversionRequest::new(PixelFormat::Yuv420, 8, 8, PixelFormat::Rgb24, 5, 5)
            .offsets(1, 1);
        let plan = planner.search(&request).unwrap();
        let crop = plan
            .stages
            .iter()
            .find(|s| s.family == Family::Crop)
            .unwrap();
        assert_eq!(crop.spec.src, PixelFormat::Rgb24);
    }

    #[test]
    fn equivalent_scale_fractions_plan_identically() {
        let planner = Planner::builtin();
        let base = ConversionRequest::new(PixelFormat::Nv12, 8, 8, PixelFormat::Bgr24, 4, 4);
        let a = planner.search(&base.scale(4, 8)).unwrap();
        let b = planner.search(&base.scale(1, 2)).unwrap();
        assert_eq!(a.stages, b.stages);
        assert_eq!(a.score, b.score);
    }

    #[test]
    fn cheaper_scalarized_score_wins() {
        // cheap: 1 + (1 - 0.9) * K, exact: 5 + 0.
        let make_registry = || {
            let mut builder = RegistryBuilder::new();
            let desc =
                PrototypeDescriptor::new(Family::HFlip, PixelFormat::Grey, PixelFormat::Grey, "exact");
            builder
                .register_factory(
                    desc.clone(),
                    Priced {
                        estimate: CostEstimate::new(5, 1.0),
                        inner: PrimitiveFactory::geometry(Family::HFlip),
                    },
                )
                .unwrap();
            builder
                .register_factory(
                    PrototypeDescriptor {
                        name: "cheap",
                        ..desc.flags(VariantFlags::EXTERNAL)
                    },
                    Priced {
                        estimate: CostEstimate::new(1, 0.9),
                        inner: PrimitiveFactory::geometry(Family::HFlip),
                    },
                )
                .unwrap();
            Arc::new(builder.seal())
        };
        let request = make_request(PixelFormat::Grey, PixelFormat::Grey, 4, 4).hflip(true);
        for (k, expect) in [(100.0, "exact"), (10.0, "cheap"), (0.0, "cheap")] {
            let planner =
                Planner::with_config(make_registry(), PixpipeConfig::new().quality_weight(k));
            let plan = planner.search(&request).unwrap();
            assert_eq!(plan.stages.len(), 1);
            assert_eq!(plan.stages[0].name, expect, "K = {k}");
        }
    }

    #[test]
    fn pinned_tier_restricts_colorspace_variant() {
        let request = make_request(PixelFormat::Yuyv, PixelFormat::Rgb24, 4, 4);
        for tier in QualityTier::ALL {
            let planner = Planner::with_config(
                Arc::new(TransformRegistry::builtin()),
                PixpipeConfig::new().quality_tier(tier),
            );
            let plan = planner.search(&request).unwrap();
            assert_eq!(plan.stages.len(), 1);
            assert_eq!(plan.stages[0].flags.tier(), Some(tier));
            assert_eq!(plan.stages[0].spec.flags, tier.flags());
        }
    }

    #[test]
    fn missing_path_leaves_nothing_allocated() {
        let live = Arc::new(AtomicUsize::new(0));
        let mut builder = RegistryBuilder::new();
        make_tracked(
            &mut builder,
            &live,
            PrototypeDescriptor::new(Family::HFlip, PixelFormat::Grey, PixelFormat::Grey, "hflip"),
            false,
        );
        let planner = make_planner(builder.seal());
        let request = make_request(PixelFormat::Rgb24, PixelFormat::Grey, 4, 4).hflip(true);
        let err = planner.plan(&request).unwrap_err();
        assert_eq!(err.code(), "no_path_found");
        assert_eq!(live.load(AtomicOrdering::SeqCst), 0);
    }

    #[test]
    fn bind_failure_releases_earlier_stages() {
        let live = Arc::new(AtomicUsize::new(0));
        let mut builder = RegistryBuilder::new();
        make_tracked(
            &mut builder,
            &live,
            PrototypeDescriptor::new(
                Family::FormatConversion,
                PixelFormat::Rgb24,
                PixelFormat::Grey,
                "rgb-to-grey",
            ),
            false,
        );
        make_tracked(
            &mut builder,
            &live,
            PrototypeDescriptor::new(Family::VFlip, PixelFormat::Grey, PixelFormat::Grey, "vflip"),
            true,
        );
        let planner = make_planner(builder.seal());
        let request = make_request(PixelFormat::Rgb24, PixelFormat::Grey, 4, 4).vflip(true);
        let err = planner.plan(&request).unwrap_err();
        assert!(matches!(
            err,
            PlanningError::Transform { stage: 1, name: "vflip", .. }
        ));
        assert_eq!(live.load(AtomicOrdering::SeqCst), 0);
    }

    #[test]
    fn expansion_cap_stops_search() {
        let planner = Planner::with_config(
            Arc::new(TransformRegistry::builtin()),
            PixpipeConfig::new().max_expansions(1),
        );
        let err = planner
            .search(&make_request(PixelFormat::Yuyv, PixelFormat::Nv21, 4, 4))
            .unwrap_err();
        assert!(matches!(err, PlanningError::NoPathFound { expanded: 1, .. }));
    }
}
