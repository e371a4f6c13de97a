//! Bound pipelines and the ping-pong executor that runs them per frame.

use std::fmt;

use pixpipe_core::prelude::*;
use pixpipe_transform::prelude::*;

use crate::{
    config::ExecutorConfig,
    planner::{Plan, PlannedStage, PlanningError},
};

/// Errors from a single `apply`; the pipeline stays usable afterwards.
///
/// # Example
/// ```rust
/// use pixpipe::prelude::*;
///
/// let mut pipeline = Planner::builtin()
///     .plan(&ConversionRequest::new(PixelFormat::Grey, 2, 2, PixelFormat::Rgb24, 2, 2))
///     .unwrap();
/// let mut out = [0u8; 12];
/// let err = pipeline.try_apply(&[0u8; 3], &mut out).unwrap_err();
/// assert_eq!(err.code(), "input_too_short");
/// assert_eq!(pipeline.try_apply(&[7u8; 4], &mut out).unwrap(), 12);
/// ```
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("input buffer too short: need {needed} bytes, got {actual}")]
    InputTooShort { needed: usize, actual: usize },
    #[error("output buffer too short: need {needed} bytes, got {actual}")]
    OutputTooShort { needed: usize, actual: usize },
    #[error("pipeline already released")]
    Released,
    #[error("stage {stage} ({name}) wrote no bytes")]
    EmptyOutput { stage: usize, name: &'static str },
    #[error("stage {stage} ({name}) failed: {source}")]
    Stage {
        stage: usize,
        name: &'static str,
        #[source]
        source: TransformError,
    },
}

impl ExecutionError {
    /// Stable string code for error classification.
    pub fn code(&self) -> &'static str {
        match self {
            ExecutionError::InputTooShort { .. } => "input_too_short",
            ExecutionError::OutputTooShort { .. } => "output_too_short",
            ExecutionError::Released => "released",
            ExecutionError::EmptyOutput { .. } => "empty_output",
            ExecutionError::Stage { .. } => "stage_failed",
        }
    }
}

/// One bound stage of a pipeline.
pub struct Stage {
    planned: PlannedStage,
    transform: Box<dyn BoundTransform>,
    released: bool,
}

impl Stage {
    pub(crate) fn new(planned: PlannedStage, transform: Box<dyn BoundTransform>) -> Self {
        Self {
            planned,
            transform,
            released: false,
        }
    }

    pub fn name(&self) -> &'static str {
        self.planned.name
    }

    pub fn family(&self) -> Family {
        self.planned.family
    }

    pub fn spec(&self) -> &StageSpec {
        &self.planned.spec
    }

    pub fn planned(&self) -> &PlannedStage {
        &self.planned
    }

    pub fn src_len(&self) -> usize {
        self.transform.src_len()
    }

    pub fn dst_len(&self) -> usize {
        self.transform.dst_len()
    }

    pub(crate) fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.transform.release();
        }
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.planned.name)
            .field("family", &self.planned.family)
            .field("src", &self.planned.spec.src)
            .field("dst", &self.planned.spec.dst)
            .field("output", &self.planned.spec.output)
            .finish_non_exhaustive()
    }
}

/// Caller-owned buffers for one frame.
///
/// With `preserve_input` cleared the executor may reuse the input buffer as
/// scratch once the first stage has consumed it.
///
/// # Example
/// ```rust
/// use pixpipe::prelude::FrameBuffer;
///
/// let mut input = vec![0u8; 16];
/// let mut output = vec![0u8; 16];
/// let frame = FrameBuffer::new(&mut input, &mut output).preserve_input(false);
/// assert!(!frame.preserve_input);
/// ```
#[derive(Debug)]
pub struct FrameBuffer<'a> {
    pub input: &'a mut [u8],
    pub output: &'a mut [u8],
    pub preserve_input: bool,
}

impl<'a> FrameBuffer<'a> {
    pub fn new(input: &'a mut [u8], output: &'a mut [u8]) -> Self {
        Self {
            input,
            output,
            preserve_input: true,
        }
    }

    pub fn preserve_input(mut self, preserve: bool) -> Self {
        self.preserve_input = preserve;
        self
    }
}

enum FrameInput<'a> {
    Shared(&'a [u8]),
    Reusable(&'a mut [u8]),
}

impl FrameInput<'_> {
    fn as_slice(&self) -> &[u8] {
        match self {
            FrameInput::Shared(buf) => buf,
            FrameInput::Reusable(buf) => buf,
        }
    }
}

/// Where a stage reads from or writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Input,
    ScratchA,
    ScratchB,
    Output,
}

struct Buffers<'s, 'f> {
    input: &'s mut FrameInput<'f>,
    a: &'s mut ScratchBuffer,
    b: &'s mut ScratchBuffer,
    output: &'s mut [u8],
}

impl Buffers<'_, '_> {
    /// Disjoint `(read, write)` views; `None` if both name the same buffer.
    ///
    /// Reads are trimmed to `len`, the byte count the previous stage wrote.
    fn route(&mut self, read: Slot, len: usize, write: Slot) -> Option<(&[u8], &mut [u8])> {
        let head = |buf: &[u8]| len.min(buf.len());
        let (src, dst): (&[u8], &mut [u8]) = match (read, write) {
            (Slot::Input, Slot::ScratchA) => (self.input.as_slice(), self.a.as_mut_slice()),
            (Slot::Input, Slot::Output) => (self.input.as_slice(), &mut *self.output),
            (Slot::ScratchA, Slot::ScratchB) => (self.a.as_slice(), self.b.as_mut_slice()),
            (Slot::ScratchA, Slot::Output) => (self.a.as_slice(), &mut *self.output),
            (Slot::ScratchB, Slot::ScratchA) => (self.b.as_slice(), self.a.as_mut_slice()),
            (Slot::ScratchB, Slot::Output) => (self.b.as_slice(), &mut *self.output),
            (Slot::ScratchA, Slot::Input) => match &mut *self.input {
                FrameInput::Reusable(dst) => (self.a.as_slice(), &mut **dst),
                FrameInput::Shared(_) => return None,
            },
            _ => return None,
        };
        Some((&src[..head(src)], dst))
    }
}

/// A runnable chain of bound transforms.
///
/// Owns its stages and two scratch buffers sized at construction, so
/// [`Pipeline::apply`] never allocates. Not safe for concurrent use (`apply`
/// takes `&mut self`); separate pipelines may run on separate threads.
///
/// # Example
/// ```rust
/// use pixpipe::prelude::*;
///
/// let request = ConversionRequest::new(PixelFormat::Rgb24, 2, 1, PixelFormat::Rgb24, 2, 1)
///     .hflip(true);
/// let mut pipeline = Planner::builtin().plan(&request).unwrap();
/// let mut out = [0u8; 6];
/// assert_eq!(pipeline.apply(&[1, 2, 3, 4, 5, 6], &mut out), 6);
/// assert_eq!(out, [4, 5, 6, 1, 2, 3]);
/// pipeline.release();
/// assert_eq!(pipeline.apply(&[1, 2, 3, 4, 5, 6], &mut out), 0);
/// ```
pub struct Pipeline {
    stages: Vec<Stage>,
    scratch: [ScratchBuffer; 2],
    src_format: PixelFormat,
    dst_format: PixelFormat,
    input: Resolution,
    output: Resolution,
    src_len: usize,
    dst_len: usize,
    cost: u64,
    quality: f64,
    score: f64,
    counters: PipelineCounters,
    released: bool,
}

impl Pipeline {
    /// Take ownership of bound stages and allocate scratch.
    ///
    /// On allocation failure the stages are released before returning.
    pub(crate) fn from_stages(
        stages: Vec<Stage>,
        plan: &Plan,
        config: ExecutorConfig,
    ) -> Result<Self, PlanningError> {
        let (Some(first), Some(last)) = (stages.first(), stages.last()) else {
            return Err(PlanningError::InvalidRequest("empty pipeline".into()));
        };
        let mut pipeline = Self {
            src_format: first.spec().src,
            dst_format: last.spec().dst,
            input: first.spec().input,
            output: last.spec().output,
            src_len: first.src_len(),
            dst_len: last.dst_len(),
            stages,
            scratch: [ScratchBuffer::default(), ScratchBuffer::default()],
            cost: plan.cost,
            quality: plan.quality,
            score: plan.score,
            counters: PipelineCounters::default(),
            released: false,
        };
        let (even, odd) = pipeline.scratch_requirements();
        // Dropping `pipeline` on error releases its stages.
        for (slot, capacity) in [(0, even), (1, odd)] {
            pipeline.scratch[slot] = ScratchBuffer::try_new(capacity, config.canary_bytes)
                .map_err(|e| {
                    PlanningError::Allocation(format!("{capacity} byte scratch buffer: {e}"))
                })?;
        }
        tracing::debug!(
            stages = pipeline.stages.len(),
            scratch_a = even,
            scratch_b = odd,
            src = %pipeline.src_format,
            dst = %pipeline.dst_format,
            "pipeline built"
        );
        Ok(pipeline)
    }

    /// Largest output of even-indexed and odd-indexed intermediate stages.
    fn scratch_requirements(&self) -> (usize, usize) {
        let intermediate = self.stages.len().saturating_sub(1);
        self.stages[..intermediate]
            .iter()
            .enumerate()
            .fold((0, 0), |(even, odd), (idx, stage)| {
                if idx % 2 == 0 {
                    (even.max(stage.dst_len()), odd)
                } else {
                    (even, odd.max(stage.dst_len()))
                }
            })
    }

    pub fn src_format(&self) -> PixelFormat {
        self.src_format
    }

    pub fn dst_format(&self) -> PixelFormat {
        self.dst_format
    }

    pub fn input_resolution(&self) -> Resolution {
        self.input
    }

    pub fn output_resolution(&self) -> Resolution {
        self.output
    }

    /// Bytes a full input frame occupies (upper bound for compressed input).
    pub fn src_len(&self) -> usize {
        self.src_len
    }

    /// Bytes the output buffer must hold.
    pub fn dst_len(&self) -> usize {
        self.dst_len
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn cost(&self) -> u64 {
        self.cost
    }

    pub fn quality(&self) -> f64 {
        self.quality
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    /// Usable capacity of scratch A and scratch B.
    pub fn scratch_capacity(&self) -> (usize, usize) {
        (self.scratch[0].capacity(), self.scratch[1].capacity())
    }

    /// Whether every scratch canary byte is untouched.
    pub fn scratch_intact(&self) -> bool {
        self.scratch.iter().all(ScratchBuffer::intact)
    }

    pub fn counters(&self) -> &PipelineCounters {
        &self.counters
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Convert one frame; returns bytes written to `output`, or 0 on failure.
    pub fn apply(&mut self, input: &[u8], output: &mut [u8]) -> usize {
        let result = self.try_apply(input, output);
        self.settle(result)
    }

    /// Like [`Pipeline::apply`] but reports why a frame failed.
    pub fn try_apply(&mut self, input: &[u8], output: &mut [u8]) -> Result<usize, ExecutionError> {
        self.execute(FrameInput::Shared(input), output)
    }

    /// Convert one frame held in caller buffers, honouring `preserve_input`.
    pub fn apply_frame(&mut self, frame: FrameBuffer<'_>) -> usize {
        let result = self.try_apply_frame(frame);
        self.settle(result)
    }

    pub fn try_apply_frame(&mut self, frame: FrameBuffer<'_>) -> Result<usize, ExecutionError> {
        let input = if frame.preserve_input {
            FrameInput::Shared(frame.input)
        } else {
            FrameInput::Reusable(frame.input)
        };
        self.execute(input, frame.output)
    }

    fn settle(&self, result: Result<usize, ExecutionError>) -> usize {
        match result {
            Ok(written) => written,
            Err(err) => {
                tracing::warn!(error = %err, code = err.code(), "frame conversion failed");
                0
            }
        }
    }

    fn execute(&mut self, input: FrameInput<'_>, output: &mut [u8]) -> Result<usize, ExecutionError> {
        let result = self.run_stages(input, output);
        match &result {
            Ok(written) => self.counters.frame(*written),
            Err(_) => self.counters.failure(),
        }
        result
    }

    fn run_stages(
        &mut self,
        mut input: FrameInput<'_>,
        output: &mut [u8],
    ) -> Result<usize, ExecutionError> {
        if self.released {
            return Err(ExecutionError::Released);
        }
        let supplied = input.as_slice().len();
        if self.src_format.is_raw() && supplied < self.src_len {
            return Err(ExecutionError::InputTooShort {
                needed: self.src_len,
                actual: supplied,
            });
        }
        if output.len() < self.dst_len {
            return Err(ExecutionError::OutputTooShort {
                needed: self.dst_len,
                actual: output.len(),
            });
        }

        let Pipeline {
            stages, scratch, ..
        } = self;
        let [scratch_a, scratch_b] = scratch;
        // Odd stages may write into the consumed input instead of scratch B.
        let reuse_input =
            matches!(input, FrameInput::Reusable(_)) && supplied >= scratch_b.capacity();
        let mut buffers = Buffers {
            input: &mut input,
            a: scratch_a,
            b: scratch_b,
            output,
        };

        let last = stages.len() - 1;
        let mut read = Slot::Input;
        let mut written = supplied;
        for (idx, stage) in stages.iter_mut().enumerate() {
            let write = if idx == last {
                Slot::Output
            } else if idx % 2 == 0 {
                Slot::ScratchA
            } else if reuse_input {
                Slot::Input
            } else {
                Slot::ScratchB
            };
            let name = stage.name();
            let Some((src, dst)) = buffers.route(read, written, write) else {
                return Err(ExecutionError::Stage {
                    stage: idx,
                    name,
                    source: TransformError::InvalidParameters(format!(
                        "cannot route {read:?} -> {write:?}"
                    )),
                });
            };
            let result = stage.transform.apply(src, dst);
            written = match result {
                Ok(0) => return Err(ExecutionError::EmptyOutput { stage: idx, name }),
                Ok(n) => n,
                Err(source) => {
                    return Err(ExecutionError::Stage {
                        stage: idx,
                        name,
                        source,
                    });
                }
            };
            read = write;
        }
        Ok(written)
    }

    /// Release every bound transform and free scratch. Idempotent.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        for stage in &mut self.stages {
            stage.release();
        }
        let stages = self.stages.len();
        self.stages.clear();
        for scratch in &mut self.scratch {
            scratch.release();
        }
        tracing::debug!(stages, "pipeline released");
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("src", &self.src_format)
            .field("dst", &self.dst_format)
            .field("input", &self.input)
            .field("output", &self.output)
            .field("stages", &self.stages)
            .field("scratch", &self.scratch_capacity())
            .field("released", &self.released)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering as AtomicOrdering},
    };

    use super::*;
    use crate::{compile, config::PixpipeConfig, planner::Planner, request::ConversionRequest};

    fn make_frame(format: PixelFormat, w: u32, h: u32) -> Vec<u8> {
        let len = format.buffer_size(Resolution::new(w, h).unwrap());
        (0..len).map(|i| (i * 7 % 251) as u8).collect()
    }

    fn make_pipeline(request: &ConversionRequest) -> Pipeline {
        Planner::builtin().plan(request).unwrap()
    }

    fn make_run(request: &ConversionRequest, input: &[u8]) -> Vec<u8> {
        let mut pipeline = make_pipeline(request);
        let mut out = vec![0u8; pipeline.dst_len()];
        assert_eq!(pipeline.try_apply(input, &mut out).unwrap(), out.len());
        out
    }

    // Scale, rotate and flip on RGB24: three geometric stages.
    fn make_three_stage() -> ConversionRequest {
        ConversionRequest::new(PixelFormat::Rgb24, 8, 4, PixelFormat::Rgb24, 2, 4)
            .scale(1, 2)
            .rotation(90)
            .hflip(true)
    }

    #[test]
    fn identity_copies_bytes() {
        let request = ConversionRequest::new(PixelFormat::Nv12, 4, 2, PixelFormat::Nv12, 4, 2);
        let input = make_frame(PixelFormat::Nv12, 4, 2);
        let mut pipeline = make_pipeline(&request);
        assert_eq!(pipeline.len(), 1);
        assert_eq!(pipeline.scratch_capacity(), (0, 0));
        let mut out = vec![0u8; input.len()];
        assert_eq!(pipeline.apply(&input, &mut out), input.len());
        assert_eq!(out, input);
    }

    #[test]
    fn hflip_mirrors_columns() {
        let (w, h) = (4usize, 3usize);
        let input: Vec<u8> = (0..h)
            .flat_map(|y| (0..w).flat_map(move |x| [x as u8, y as u8, 9]))
            .collect();
        let request =
            ConversionRequest::new(PixelFormat::Rgb24, w as u32, h as u32, PixelFormat::Rgb24, w as u32, h as u32)
                .hflip(true);
        let out = make_run(&request, &input);
        for y in 0..h {
            for x in 0..w {
                assert_eq!(&out[(y * w + x) * 3..][..3], &[(w - 1 - x) as u8, y as u8, 9]);
            }
        }
    }

    #[test]
    fn both_flips_match_half_turn() {
        let input = make_frame(PixelFormat::Rgb24, 6, 4);
        let base = ConversionRequest::new(PixelFormat::Rgb24, 6, 4, PixelFormat::Rgb24, 6, 4);
        let flipped = make_run(&base.hflip(true).vflip(true), &input);
        let turned = make_run(&base.rotation(180), &input);
        assert_eq!(flipped, turned);
    }

    #[test]
    fn folded_flips_match_three_quarter_turn() {
        let input = make_frame(PixelFormat::Rgb24, 6, 4);
        let base = ConversionRequest::new(PixelFormat::Rgb24, 6, 4, PixelFormat::Rgb24, 4, 6);
        let folded = make_run(&base.rotation(90).hflip(true).vflip(true), &input);
        let direct = make_run(&base.rotation(270), &input);
        assert_eq!(folded, direct);
        let negative = make_run(&base.rotation(-90), &input);
        assert_eq!(folded, negative);
    }

    #[test]
    fn quarter_turn_then_half_turn_is_three_quarters() {
        let input = make_frame(PixelFormat::Rgb24, 6, 4);
        let quarter = make_run(
            &ConversionRequest::new(PixelFormat::Rgb24, 6, 4, PixelFormat::Rgb24, 4, 6).rotation(90),
            &input,
        );
        let then_half = make_run(
            &ConversionRequest::new(PixelFormat::Rgb24, 4, 6, PixelFormat::Rgb24, 4, 6).rotation(180),
            &quarter,
        );
        let direct = make_run(
            &ConversionRequest::new(PixelFormat::Rgb24, 6, 4, PixelFormat::Rgb24, 4, 6).rotation(270),
            &input,
        );
        assert_eq!(then_half, direct);
    }

    #[test]
    fn scratch_sized_by_stage_parity() {
        let pipeline = make_pipeline(&make_three_stage());
        assert_eq!(pipeline.len(), 3);
        // Scale writes 4x2 into A, rotation writes 2x4 into B.
        assert_eq!(pipeline.scratch_capacity(), (24, 24));
        assert_eq!(pipeline.src_len(), 96);
        assert_eq!(pipeline.dst_len(), 24);
    }

    #[test]
    fn canaries_survive_maximum_frames() {
        let registry = Arc::new(TransformRegistry::builtin());
        let planner = Planner::with_config(registry, PixpipeConfig::new().canary_bytes(64));
        let requests = [
            make_three_stage(),
            ConversionRequest::new(PixelFormat::Yuyv, 8, 4, PixelFormat::Rgb24, 4, 8).rotation(90),
            ConversionRequest::new(PixelFormat::Yuv420, 8, 8, PixelFormat::Grey, 4, 4)
                .scale(1, 2)
                .vflip(true),
        ];
        for request in &requests {
            let mut pipeline = planner.plan(request).unwrap();
            assert!(pipeline.len() >= 2, "{request:?}");
            let input = make_frame(request.src_format, request.src_width, request.src_height);
            let mut out = vec![0u8; pipeline.dst_len()];
            for _ in 0..3 {
                assert_eq!(pipeline.apply(&input, &mut out), pipeline.dst_len());
                assert!(pipeline.scratch_intact());
            }
        }
    }

    #[test]
    fn failed_frame_leaves_pipeline_usable() {
        let request = make_three_stage();
        let input = make_frame(PixelFormat::Rgb24, 8, 4);
        let expected = make_run(&request, &input);
        let mut pipeline = make_pipeline(&request);
        let mut out = vec![0u8; pipeline.dst_len()];

        assert_eq!(pipeline.apply(&input[..10], &mut out), 0);
        let err = pipeline.try_apply(&input, &mut out[..5]).unwrap_err();
        assert!(matches!(err, ExecutionError::OutputTooShort { needed: 24, actual: 5 }));

        assert_eq!(pipeline.apply(&input, &mut out), 24);
        assert_eq!(out, expected);
        assert_eq!(pipeline.counters().failures(), 2);
        assert_eq!(pipeline.counters().frames(), 1);
        assert_eq!(pipeline.counters().bytes(), 24);
    }

    #[test]
    fn reused_input_matches_preserved_input() {
        let request = make_three_stage();
        let original = make_frame(PixelFormat::Rgb24, 8, 4);
        let mut pipeline = make_pipeline(&request);

        let mut input = original.clone();
        let mut preserved = vec![0u8; pipeline.dst_len()];
        let n = pipeline.apply_frame(FrameBuffer::new(&mut input, &mut preserved));
        assert_eq!(n, 24);
        assert_eq!(input, original);

        let mut reused = vec![0u8; pipeline.dst_len()];
        let n = pipeline.apply_frame(FrameBuffer::new(&mut input, &mut reused).preserve_input(false));
        assert_eq!(n, 24);
        assert_eq!(reused, preserved);
        assert_ne!(input, original);
    }

    /// Stand-in decoder: fills the output with a constant and records the
    /// input length it was handed.
    struct StubDecode {
        seen: Arc<AtomicUsize>,
        write_nothing: bool,
    }

    struct StubDecodeBound {
        seen: Arc<AtomicUsize>,
        write_nothing: bool,
        src_len: usize,
        dst_len: usize,
    }

    impl BoundTransform for StubDecodeBound {
        fn src_len(&self) -> usize {
            self.src_len
        }

        fn dst_len(&self) -> usize {
            self.dst_len
        }

        fn apply(&mut self, src: &[u8], dst: &mut [u8]) -> Result<usize, TransformError> {
            self.seen.store(src.len(), AtomicOrdering::SeqCst);
            if self.write_nothing {
                return Ok(0);
            }
            dst[..self.dst_len].fill(0x42);
            Ok(self.dst_len)
        }

        fn release(&mut self) {}
    }

    impl TransformFactory for StubDecode {
        fn estimate(&self, _spec: &StageSpec) -> Result<CostEstimate, TransformError> {
            Ok(CostEstimate::new(1, 1.0))
        }

        fn bind(&self, spec: &StageSpec) -> Result<Box<dyn BoundTransform>, TransformError> {
            Ok(Box::new(StubDecodeBound {
                seen: self.seen.clone(),
                write_nothing: self.write_nothing,
                src_len: spec.src_len()?,
                dst_len: spec.dst_len()?,
            }))
        }
    }

    fn make_stub_pipeline(write_nothing: bool) -> (Pipeline, Arc<AtomicUsize>) {
        let seen = Arc::new(AtomicUsize::new(0));
        let mut builder = RegistryBuilder::new();
        let desc = PrototypeDescriptor::new(
            Family::FormatConversion,
            PixelFormat::Jpeg,
            PixelFormat::Rgb24,
            "stub-decode",
        );
        builder
            .register_factory(
                desc,
                StubDecode {
                    seen: seen.clone(),
                    write_nothing,
                },
            )
            .unwrap();
        let planner = Planner::new(Arc::new(builder.seal()));
        let request = ConversionRequest::new(PixelFormat::Jpeg, 4, 4, PixelFormat::Rgb24, 4, 4);
        (planner.plan(&request).unwrap(), seen)
    }

    #[test]
    fn compressed_input_reaches_first_stage() {
        let (mut pipeline, seen) = make_stub_pipeline(false);
        assert!(pipeline.src_len() > 3);
        let mut out = vec![0u8; pipeline.dst_len()];
        assert_eq!(pipeline.try_apply(&[0xFF, 0xD8, 0xFF], &mut out).unwrap(), 48);
        assert_eq!(seen.load(AtomicOrdering::SeqCst), 3);
        assert!(out.iter().all(|&b| b == 0x42));

        // Raw sources still enforce the full frame length.
        let mut raw = make_pipeline(&ConversionRequest::new(
            PixelFormat::Rgb24,
            4,
            4,
            PixelFormat::Rgb24,
            4,
            4,
        ));
        let err = raw.try_apply(&[0u8; 3], &mut out).unwrap_err();
        assert!(matches!(err, ExecutionError::InputTooShort { needed: 48, actual: 3 }));
    }

    #[cfg(feature = "image")]
    #[test]
    fn short_jpeg_is_judged_by_decoder() {
        let request = ConversionRequest::new(PixelFormat::Mjpeg, 4, 4, PixelFormat::Rgb24, 4, 4);
        let mut pipeline = make_pipeline(&request);
        let mut out = vec![0u8; pipeline.dst_len()];
        let err = pipeline.try_apply(&[0xFF, 0xD8], &mut out).unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::Stage {
                stage: 0,
                source: TransformError::Decode(_),
                ..
            }
        ));
    }

    #[test]
    fn stage_writing_nothing_fails_the_frame() {
        let (mut pipeline, _) = make_stub_pipeline(true);
        let mut out = vec![0u8; pipeline.dst_len()];
        let err = pipeline.try_apply(&[0xFF, 0xD8], &mut out).unwrap_err();
        assert!(matches!(err, ExecutionError::EmptyOutput { stage: 0, name: "stub-decode" }));
        assert_eq!(err.code(), "empty_output");
        assert_eq!(pipeline.counters().failures(), 1);
        assert_eq!(pipeline.apply(&[0xFF, 0xD8], &mut out), 0);
    }

    /// Check one `w`x`h` plane: `inner` sits at `(x0, y0)`, `fill` elsewhere.
    fn assert_padded(
        plane: &[u8],
        (w, h): (usize, usize),
        bps: usize,
        inner: &[u8],
        (iw, ih): (usize, usize),
        (x0, y0): (usize, usize),
        fill: u8,
    ) {
        assert_eq!(plane.len(), w * h * bps);
        assert_eq!(inner.len(), iw * ih * bps);
        for y in 0..h {
            for x in 0..w {
                let px = &plane[(y * w + x) * bps..][..bps];
                if (x0..x0 + iw).contains(&x) && (y0..y0 + ih).contains(&y) {
                    let (ix, iy) = (x - x0, y - y0);
                    assert_eq!(px, &inner[(iy * iw + ix) * bps..][..bps], "({x}, {y})");
                } else {
                    assert!(px.iter().all(|&b| b == fill), "({x}, {y}) = {px:?}");
                }
            }
        }
    }

    /// Split an I420 frame into its Y, U and V planes.
    fn make_planes(frame: &[u8], w: usize, h: usize) -> (&[u8], &[u8], &[u8]) {
        let luma = w * h;
        let chroma = (w / 2) * (h / 2);
        (
            &frame[..luma],
            &frame[luma..luma + chroma],
            &frame[luma + chroma..luma + 2 * chroma],
        )
    }

    #[test]
    fn pad_fills_rgb_border_with_black() {
        let input = make_frame(PixelFormat::Rgb24, 4, 4);
        let request = ConversionRequest::new(PixelFormat::Rgb24, 4, 4, PixelFormat::Rgb24, 8, 8)
            .offsets(-2, -2);
        let mut pipeline = compile(&request).unwrap();
        assert_eq!(pipeline.stages()[0].family(), Family::Pad);
        let mut out = vec![0xEEu8; pipeline.dst_len()];
        assert_eq!(pipeline.apply(&input, &mut out), 8 * 8 * 3);
        assert_padded(&out, (8, 8), 3, &input, (4, 4), (2, 2), 0x00);
    }

    #[test]
    fn pad_fills_yuv420_luma_black_and_chroma_neutral() {
        let input = make_frame(PixelFormat::Yuv420, 4, 4);
        let request = ConversionRequest::new(PixelFormat::Yuv420, 4, 4, PixelFormat::Yuv420, 8, 8)
            .offsets(-2, -2);
        let out = make_run(&request, &input);
        let (y_in, u_in, v_in) = make_planes(&input, 4, 4);
        let (y_out, u_out, v_out) = make_planes(&out, 8, 8);
        assert_padded(y_out, (8, 8), 1, y_in, (4, 4), (2, 2), 0x00);
        assert_padded(u_out, (4, 4), 1, u_in, (2, 2), (1, 1), 0x80);
        assert_padded(v_out, (4, 4), 1, v_in, (2, 2), (1, 1), 0x80);
    }

    #[test]
    fn pad_after_rotation_frames_rotated_image() {
        let input = make_frame(PixelFormat::Rgb24, 4, 2);
        let rotated = make_run(
            &ConversionRequest::new(PixelFormat::Rgb24, 4, 2, PixelFormat::Rgb24, 2, 4).rotation(90),
            &input,
        );
        let request = ConversionRequest::new(PixelFormat::Rgb24, 4, 2, PixelFormat::Rgb24, 6, 8)
            .rotation(90)
            .offsets(-2, -2);
        let out = make_run(&request, &input);
        assert_padded(&out, (6, 8), 3, &rotated, (2, 4), (2, 2), 0x00);
    }

    #[test]
    fn pad_after_scale_keeps_chroma_neutral() {
        let input = make_frame(PixelFormat::Yuv420, 8, 8);
        let scaled = make_run(
            &ConversionRequest::new(PixelFormat::Yuv420, 8, 8, PixelFormat::Yuv420, 4, 4).scale(1, 2),
            &input,
        );
        let request = ConversionRequest::new(PixelFormat::Yuv420, 8, 8, PixelFormat::Yuv420, 8, 8)
            .scale(1, 2)
            .offsets(-2, -2);
        let out = make_run(&request, &input);
        let (y_in, u_in, v_in) = make_planes(&scaled, 4, 4);
        let (y_out, u_out, v_out) = make_planes(&out, 8, 8);
        assert_padded(y_out, (8, 8), 1, y_in, (4, 4), (2, 2), 0x00);
        assert_padded(u_out, (4, 4), 1, u_in, (2, 2), (1, 1), 0x80);
        assert_padded(v_out, (4, 4), 1, v_in, (2, 2), (1, 1), 0x80);
    }

    #[test]
    fn released_pipeline_rejects_frames() {
        let request = ConversionRequest::new(PixelFormat::Grey, 2, 2, PixelFormat::Grey, 2, 2);
        let mut pipeline = make_pipeline(&request);
        pipeline.release();
        pipeline.release();
        assert!(pipeline.is_released());
        assert_eq!(pipeline.scratch_capacity(), (0, 0));
        let mut out = [0u8; 4];
        assert_eq!(pipeline.apply(&[1, 2, 3, 4], &mut out), 0);
        assert!(matches!(
            pipeline.try_apply(&[1, 2, 3, 4], &mut out),
            Err(ExecutionError::Released)
        ));
    }
}
