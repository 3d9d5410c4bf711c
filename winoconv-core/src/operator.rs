//! The Winograd convolution operator.
//!
//! [`WinogradConvOperator`] is an explicit state machine:
//!
//! * `configure` validates descriptors, picks a tile configuration, configures every stage and
//!   computes the scratch-buffer plan (`Unconfigured → Configured`);
//! * `prepare` permutes and transforms the weights once into persistent storage
//!   (`Configured → Prepared`);
//! * `run` pushes one input through permute → input transform → batched GEMM → output
//!   transform → permute → activation.
//!
//! Recoverable problems surface as [`ConfigurationError`]s from `configure`. Misuse at run
//! time (wrong state, wrong tensors) is a caller bug and panics with a
//! [`PreconditionViolation`] message.

use std::sync::Arc;

use log::{Level, debug, info};
use winoconv_utils::{RuntimeSettings, StageTimings, TimingGuard, timing_guard};

use crate::activation::ActivationKind;
use crate::error::{ConfigurationError, PreconditionViolation};
use crate::gemm::{GemmBackend, MatrixMultiplyGemm};
use crate::layout::LayoutAdapter;
use crate::memory::{
    AuxArena, AuxBufferId, AuxBufferPlan, AuxBufferPlanner, BufferHandle, MemoryLifetime,
    PlanInputs,
};
use crate::padding::{PadStrideInfo, compute_output_shape};
use crate::scheduler::{RayonScheduler, Scheduler, lock_chunk, partition_mut};
use crate::selector::{Size2D, WinogradConfigSelector, WinogradTileConfig};
use crate::stages::{
    BatchedMatMulStage, ConvGeometry, InputTransformStage, OutputTransformStage,
    WeightTransformStage,
};
use crate::tensor::{DataLayout, DataType, Tensor, TensorDescriptor};
use crate::transform::transform_for;

/// Everything `configure` needs to know about one convolution.
#[derive(Debug, Clone, PartialEq)]
pub struct WinogradConvInfo {
    pub input: TensorDescriptor,
    pub weights: TensorDescriptor,
    pub bias: Option<TensorDescriptor>,
    pub output: TensorDescriptor,
    pub pad_stride: PadStrideInfo,
    pub activation: Option<ActivationKind>,
    pub allow_fast_math: bool,
}

impl WinogradConvInfo {
    /// Describe a convolution, deriving the output descriptor from the input, weights and
    /// padding.
    pub fn new(
        input: TensorDescriptor,
        weights: TensorDescriptor,
        bias: Option<TensorDescriptor>,
        pad_stride: PadStrideInfo,
    ) -> Result<Self, ConfigurationError> {
        let shape = compute_output_shape(&input, &weights, &pad_stride)?;
        let output = TensorDescriptor::new(shape, input.data_type(), input.layout());
        Ok(Self {
            input,
            weights,
            bias,
            output,
            pad_stride,
            activation: None,
            allow_fast_math: false,
        })
    }

    pub fn with_activation(mut self, activation: ActivationKind) -> Self {
        self.activation = Some(activation);
        self
    }

    pub fn with_fast_math(mut self, allow: bool) -> Self {
        self.allow_fast_math = allow;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorState {
    Unconfigured,
    Configured,
    Prepared,
}

#[derive(Debug)]
enum Lifecycle {
    Unconfigured,
    Configured(Box<Pipeline>),
    Prepared(Box<Pipeline>, PreparedWeights),
}

impl Lifecycle {
    fn pipeline(&self) -> &Pipeline {
        match self {
            Lifecycle::Unconfigured => PreconditionViolation::NotConfigured.raise(),
            Lifecycle::Configured(pipeline) | Lifecycle::Prepared(pipeline, _) => &**pipeline,
        }
    }

    fn prepared(&self) -> (&Pipeline, &PreparedWeights) {
        match self {
            Lifecycle::Unconfigured => PreconditionViolation::NotConfigured.raise(),
            Lifecycle::Configured(_) => PreconditionViolation::NotPrepared.raise(),
            Lifecycle::Prepared(pipeline, weights) => (&**pipeline, weights),
        }
    }
}

/// Persistent results of `prepare`.
#[derive(Debug)]
struct PreparedWeights {
    arena: AuxArena,
    transformed: BufferHandle,
    bias: Option<Vec<f32>>,
}

impl PreparedWeights {
    fn transformed(&self) -> &[f32] {
        self.arena.slice(self.transformed)
    }
}

/// Collaborators shared by every stage.
#[derive(Debug, Clone)]
struct ExecutionContext {
    scheduler: Arc<dyn Scheduler>,
    gemm: Arc<dyn GemmBackend>,
    timings: Option<Arc<StageTimings>>,
}

impl ExecutionContext {
    fn guard(&self, label: &'static str) -> TimingGuard<'_> {
        let guard = timing_guard(label, Level::Debug);
        match self.timings.as_deref() {
            Some(timings) => guard.record_into(timings),
            None => guard,
        }
    }
}

/// Winograd 2-D convolution with prepare-once weights.
#[derive(Debug)]
pub struct WinogradConvOperator {
    context: ExecutionContext,
    lifecycle: Lifecycle,
    scratch: Option<AuxArena>,
}

impl Default for WinogradConvOperator {
    fn default() -> Self {
        Self::new(Arc::new(RayonScheduler::global()), Arc::new(MatrixMultiplyGemm))
    }
}

impl WinogradConvOperator {
    pub fn new(scheduler: Arc<dyn Scheduler>, gemm: Arc<dyn GemmBackend>) -> Self {
        Self {
            context: ExecutionContext {
                scheduler,
                gemm,
                timings: None,
            },
            lifecycle: Lifecycle::Unconfigured,
            scratch: None,
        }
    }

    /// Operator backed by a rayon pool sized from `settings.threads`.
    pub fn from_settings(settings: &RuntimeSettings) -> Result<Self, ConfigurationError> {
        let scheduler = RayonScheduler::with_threads(settings.threads)?;
        Ok(Self::new(Arc::new(scheduler), Arc::new(MatrixMultiplyGemm)))
    }

    /// Record the duration of every configure, prepare and run stage into `timings`.
    pub fn with_timings(mut self, timings: Arc<StageTimings>) -> Self {
        self.context.timings = Some(timings);
        self
    }

    pub fn state(&self) -> OperatorState {
        match self.lifecycle {
            Lifecycle::Unconfigured => OperatorState::Unconfigured,
            Lifecycle::Configured(_) => OperatorState::Configured,
            Lifecycle::Prepared(..) => OperatorState::Prepared,
        }
    }

    /// Check whether `info` describes a convolution this operator can run.
    pub fn validate(info: &WinogradConvInfo) -> Result<(), ConfigurationError> {
        check(info).map(|_| ())
    }

    /// Validate `info` and build every stage for it.
    ///
    /// Any previously prepared weights are dropped. On error the operator is left
    /// unconfigured.
    pub fn configure(&mut self, info: &WinogradConvInfo) -> Result<(), ConfigurationError> {
        let _guard = self.context.guard("winoconv::configure");
        if !matches!(self.lifecycle, Lifecycle::Unconfigured) {
            info!("Reconfiguring Winograd operator; prepared weights are released");
        }
        self.lifecycle = Lifecycle::Unconfigured;
        self.scratch = None;

        let threads = self.context.scheduler.num_threads().max(1);
        let pipeline = Pipeline::build(info, threads)?;
        debug!(
            "Configured {} ({}) for input {:?} -> output {:?}: {} coefficients, {} threads, \
             scratch peak {} bytes of {} planned",
            pipeline.config.variant(),
            pipeline.config.data_type(),
            info.input.dims(),
            info.output.dims(),
            pipeline.config.num_coeffs(),
            threads,
            pipeline.plan.peak_bytes(),
            pipeline.plan.total_bytes(),
        );
        self.lifecycle = Lifecycle::Configured(Box::new(pipeline));
        Ok(())
    }

    /// Transform `weights` (and copy `bias`) into persistent storage.
    ///
    /// A no-op once prepared; call [`release_weights`](Self::release_weights) to swap weights.
    pub fn prepare(&mut self, weights: &Tensor, bias: Option<&Tensor>) {
        let pipeline = match &self.lifecycle {
            Lifecycle::Unconfigured => PreconditionViolation::NotConfigured.raise(),
            Lifecycle::Prepared(..) => {
                debug!("Winograd weights already prepared; skipping");
                return;
            }
            Lifecycle::Configured(pipeline) => pipeline,
        };
        let _guard = self.context.guard("winoconv::prepare");
        pipeline.check_weights(weights, bias);
        let prepared = pipeline.prepare_weights(weights, bias);

        let lifecycle = std::mem::replace(&mut self.lifecycle, Lifecycle::Unconfigured);
        self.lifecycle = match lifecycle {
            Lifecycle::Configured(pipeline) => Lifecycle::Prepared(pipeline, prepared),
            other => other,
        };
    }

    /// Drop transformed weights so a different set can be prepared.
    pub fn release_weights(&mut self) {
        let lifecycle = std::mem::replace(&mut self.lifecycle, Lifecycle::Unconfigured);
        self.lifecycle = match lifecycle {
            Lifecycle::Prepared(pipeline, _) => {
                info!("Released prepared Winograd weights");
                Lifecycle::Configured(pipeline)
            }
            other => other,
        };
    }

    /// Convolve `input` into a freshly allocated output tensor.
    pub fn run(&mut self, input: &Tensor) -> Tensor {
        let descriptor = self.output_descriptor().clone();
        let mut output = Tensor::zeros(descriptor);
        self.run_into(input, &mut output);
        output
    }

    /// Convolve `input` into `output` using the operator's own scratch arena.
    pub fn run_into(&mut self, input: &Tensor, output: &mut Tensor) {
        let (pipeline, weights) = self.lifecycle.prepared();
        let mut scratch = self
            .scratch
            .take()
            .unwrap_or_else(|| pipeline.scratch_arena());
        pipeline.execute(&self.context, weights, input, &mut scratch, output);
        self.scratch = Some(scratch);
    }

    /// Prepare with `weights` and `bias` if that has not happened yet, then run.
    pub fn run_with_weights(
        &mut self,
        input: &Tensor,
        weights: &Tensor,
        bias: Option<&Tensor>,
    ) -> Tensor {
        self.prepare(weights, bias);
        self.run(input)
    }

    /// Run with caller-owned scratch, so several threads can share one prepared operator.
    ///
    /// `workspace` must come from [`new_workspace`](Self::new_workspace) on this operator.
    pub fn run_shared(&self, input: &Tensor, workspace: &mut AuxArena, output: &mut Tensor) {
        let (pipeline, weights) = self.lifecycle.prepared();
        pipeline.execute(&self.context, weights, input, workspace, output);
    }

    /// Scratch arena sized for [`run_shared`](Self::run_shared).
    pub fn new_workspace(&self) -> AuxArena {
        AuxArena::new(&self.pipeline().plan, &[MemoryLifetime::Temporary])
    }

    pub fn tile_config(&self) -> &WinogradTileConfig {
        &self.pipeline().config
    }

    pub fn aux_plan(&self) -> &AuxBufferPlan {
        &self.pipeline().plan
    }

    pub fn output_descriptor(&self) -> &TensorDescriptor {
        &self.pipeline().info.output
    }

    fn pipeline(&self) -> &Pipeline {
        self.lifecycle.pipeline()
    }
}

fn check(
    info: &WinogradConvInfo,
) -> Result<(ConvGeometry, WinogradTileConfig), ConfigurationError> {
    let data_type = info.input.data_type();
    let layout = info.input.layout();

    let mut typed = vec![("weights", &info.weights), ("output", &info.output)];
    if let Some(bias) = &info.bias {
        typed.push(("bias", bias));
    }
    for &(tensor, desc) in &typed {
        if desc.data_type() != data_type {
            return Err(ConfigurationError::DataTypeMismatch {
                tensor,
                expected: data_type,
                actual: desc.data_type(),
            });
        }
    }
    for (tensor, desc) in [("weights", &info.weights), ("output", &info.output)] {
        if desc.layout() != layout {
            return Err(ConfigurationError::LayoutMismatch {
                tensor,
                expected: layout,
                actual: desc.layout(),
            });
        }
    }

    for desc in [&info.input, &info.weights, &info.output] {
        if desc.shape().rank() != 4 {
            return Err(ConfigurationError::InvalidShape {
                dims: desc.dims().to_vec(),
                reason: "expected a 4-D tensor".to_string(),
            });
        }
    }
    let (in_channels, out_channels) = (info.input.channels(), info.weights.batches());
    if info.weights.channels() != in_channels {
        return Err(ConfigurationError::ShapeMismatch {
            tensor: "weights",
            expected: layout
                .dims(out_channels, in_channels, info.weights.height(), info.weights.width())
                .to_vec(),
            actual: info.weights.dims().to_vec(),
        });
    }
    if let Some(bias) = &info.bias {
        if bias.shape().rank() != 1 || bias.elements() != out_channels {
            return Err(ConfigurationError::ShapeMismatch {
                tensor: "bias",
                expected: vec![out_channels],
                actual: bias.dims().to_vec(),
            });
        }
    }

    let kernel = Size2D::new(info.weights.width(), info.weights.height());
    info.pad_stride.validate_for_kernel(kernel.height, kernel.width)?;

    let input = Size2D::new(info.input.width(), info.input.height());
    let config = WinogradConfigSelector::select(kernel, input, data_type, info.allow_fast_math)?;

    let expected = compute_output_shape(&info.input, &info.weights, &info.pad_stride)?;
    if info.output.shape() != &expected {
        return Err(ConfigurationError::ShapeMismatch {
            tensor: "output",
            expected: expected.dims().to_vec(),
            actual: info.output.dims().to_vec(),
        });
    }

    let geometry = ConvGeometry {
        batches: info.input.batches(),
        in_channels,
        out_channels,
        input,
        kernel,
        output: Size2D::new(info.output.width(), info.output.height()),
        padding: info.pad_stride,
    };
    Ok((geometry, config))
}

/// A fully configured convolution: stages, adapters and the scratch plan.
#[derive(Debug)]
struct Pipeline {
    info: WinogradConvInfo,
    config: WinogradTileConfig,
    input_stage: InputTransformStage,
    weight_stage: WeightTransformStage,
    matmul: BatchedMatMulStage,
    output_stage: OutputTransformStage,
    weights_adapter: LayoutAdapter,
    input_adapter: Option<LayoutAdapter>,
    output_adapter: Option<LayoutAdapter>,
    post_activation: Option<ActivationKind>,
    plan: AuxBufferPlan,
}

impl Pipeline {
    fn build(info: &WinogradConvInfo, threads: usize) -> Result<Self, ConfigurationError> {
        let (geometry, config) = check(info)?;
        let data_type = config.data_type();

        let transform = transform_for(config.variant());
        let input_stage = InputTransformStage::configure(&geometry, &config, transform.clone())?;
        let weight_stage = WeightTransformStage::configure(&geometry, &config, transform.clone())?;
        let matmul =
            BatchedMatMulStage::configure(input_stage.matrix(), weight_stage.matrix(), data_type)?;
        let output_stage = OutputTransformStage::configure(
            &geometry,
            &config,
            transform,
            matmul.output_matrix(),
            info.activation,
        )?;

        let weights_adapter =
            LayoutAdapter::weights_to_hwio(info.weights.dims(), info.weights.layout())?;
        let permute = info.input.layout() == DataLayout::Nchw;
        let (input_adapter, output_adapter) = if permute {
            (
                Some(LayoutAdapter::for_layouts(
                    info.input.dims(),
                    DataLayout::Nchw,
                    DataLayout::Nhwc,
                )?),
                Some(LayoutAdapter::for_layouts(
                    &output_stage.spatial_dims(),
                    DataLayout::Nhwc,
                    DataLayout::Nchw,
                )?),
            )
        } else {
            (None, None)
        };

        let plan = AuxBufferPlanner::plan(&PlanInputs {
            data_type,
            permute_activations: permute,
            input_elements: info.input.elements(),
            weight_elements: info.weights.elements(),
            output_elements: info.output.elements(),
            input_transformed_elements: input_stage.matrix().elements,
            weights_transformed_elements: weight_stage.matrix().elements,
            output_transformed_elements: matmul.output_matrix().elements,
            input_workspace_per_thread: input_stage.workspace_per_thread(),
            output_workspace_per_thread: output_stage.workspace_per_thread(),
            threads,
        });

        Ok(Self {
            info: info.clone(),
            config,
            input_stage,
            weight_stage,
            matmul,
            post_activation: info.activation.filter(|kind| !kind.is_fusable()),
            output_stage,
            weights_adapter,
            input_adapter,
            output_adapter,
            plan,
        })
    }

    fn data_type(&self) -> DataType {
        self.config.data_type()
    }

    /// Arena for the buffers of a single run.
    fn scratch_arena(&self) -> AuxArena {
        AuxArena::new(&self.plan, &[MemoryLifetime::Temporary])
    }

    fn check_weights(&self, weights: &Tensor, bias: Option<&Tensor>) {
        if weights.descriptor() != &self.info.weights {
            PreconditionViolation::DescriptorMismatch { tensor: "weights" }.raise();
        }
        match (bias, &self.info.bias) {
            (Some(_), None) => PreconditionViolation::BiasMismatch("given").raise(),
            (None, Some(_)) => PreconditionViolation::BiasMismatch("missing").raise(),
            (Some(bias), Some(expected)) if bias.descriptor() != expected => {
                PreconditionViolation::DescriptorMismatch { tensor: "bias" }.raise()
            }
            _ => {}
        }
    }

    /// The `PrepareOnly` staging arena is dropped before this returns.
    fn prepare_weights(&self, weights: &Tensor, bias: Option<&Tensor>) -> PreparedWeights {
        let mut arena = AuxArena::new(&self.plan, &[MemoryLifetime::Persistent]);
        let transformed = scratch_handle(&arena, AuxBufferId::WeightsTransformed);
        let mut staging = AuxArena::new(&self.plan, &[MemoryLifetime::PrepareOnly]);
        let permuted = scratch_handle(&staging, AuxBufferId::PermutedWeights);

        let hwio = staging.slice_mut(permuted);
        self.weights_adapter.run(weights.data(), hwio);
        self.weight_stage.run(hwio, arena.slice_mut(transformed));

        let bias = bias.map(|bias| {
            let mut values = bias.data().to_vec();
            self.data_type().round_slice(&mut values);
            values
        });
        debug!(
            "Prepared {} transformed weight values{}",
            self.weight_stage.matrix().elements,
            if bias.is_some() { " with bias" } else { "" }
        );
        PreparedWeights {
            arena,
            transformed,
            bias,
        }
    }

    fn check_workspace(&self, workspace: &AuxArena) {
        let compatible = self.plan.filtered(&[MemoryLifetime::Temporary]).all(|desc| {
            workspace
                .handle(desc.id)
                .is_some_and(|handle| workspace.slice(handle).len() == desc.elements)
        });
        if !compatible {
            PreconditionViolation::ForeignWorkspace.raise();
        }
    }

    fn execute(
        &self,
        context: &ExecutionContext,
        weights: &PreparedWeights,
        input: &Tensor,
        scratch: &mut AuxArena,
        output: &mut Tensor,
    ) {
        if input.descriptor() != &self.info.input {
            PreconditionViolation::DescriptorMismatch { tensor: "input" }.raise();
        }
        if output.descriptor() != &self.info.output {
            PreconditionViolation::DescriptorMismatch { tensor: "output" }.raise();
        }
        self.check_workspace(scratch);
        let _run = context.guard("winoconv::run");

        let input_transformed = scratch_handle(scratch, AuxBufferId::InputTransformed);
        let input_workspace = scratch_handle(scratch, AuxBufferId::InputWorkspace);
        match &self.input_adapter {
            Some(adapter) => {
                let permuted = scratch_handle(scratch, AuxBufferId::PermutedInput);
                let [nhwc, transformed, workspace] =
                    scratch.slices_mut([permuted, input_transformed, input_workspace]);
                {
                    let _guard = context.guard("winoconv::permute_input");
                    adapter.run(input.data(), nhwc);
                }
                self.transform_input(context, nhwc, transformed, workspace);
            }
            None => {
                let [transformed, workspace] =
                    scratch.slices_mut([input_transformed, input_workspace]);
                self.transform_input(context, input.data(), transformed, workspace);
            }
        }

        let output_transformed = scratch_handle(scratch, AuxBufferId::OutputTransformed);
        {
            let _guard = context.guard("winoconv::batched_matmul");
            let [lhs, products] = scratch.slices_mut([input_transformed, output_transformed]);
            self.matmul.run(
                lhs,
                weights.transformed(),
                products,
                context.gemm.as_ref(),
                context.scheduler.as_ref(),
            );
        }

        let output_workspace = scratch_handle(scratch, AuxBufferId::OutputWorkspace);
        let bias = weights.bias.as_deref();
        let result = output.data_mut();
        match &self.output_adapter {
            Some(adapter) => {
                let permuted = scratch_handle(scratch, AuxBufferId::PermutedOutput);
                let [products, workspace, nhwc] =
                    scratch.slices_mut([output_transformed, output_workspace, permuted]);
                self.transform_output(context, products, bias, nhwc, workspace);
                let _guard = context.guard("winoconv::permute_output");
                adapter.run(nhwc, result);
            }
            None => {
                let [products, workspace] =
                    scratch.slices_mut([output_transformed, output_workspace]);
                self.transform_output(context, products, bias, result, workspace);
            }
        }

        if let Some(kind) = self.post_activation {
            let _guard = context.guard("winoconv::activation");
            kind.apply_in_place(result);
            self.data_type().round_slice(result);
        }
    }

    fn transform_input(
        &self,
        context: &ExecutionContext,
        nhwc: &[f32],
        transformed: &mut [f32],
        workspace: &mut [f32],
    ) {
        let _guard = context.guard("winoconv::input_transform");
        let stage = &self.input_stage;
        let threads = self.plan.threads();
        let chunks = partition_mut(transformed, &stage.chunk_bounds(threads));
        let scratch = partition_mut(
            workspace,
            &per_thread_bounds(stage.workspace_per_thread(), threads),
        );
        context.scheduler.schedule(threads, &|thread, count| {
            let mut chunk = lock_chunk(&chunks[thread]);
            let mut workspace = lock_chunk(&scratch[thread]);
            stage.run(nhwc, &mut chunk, &mut workspace, thread, count);
        });
    }

    fn transform_output(
        &self,
        context: &ExecutionContext,
        products: &[f32],
        bias: Option<&[f32]>,
        nhwc: &mut [f32],
        workspace: &mut [f32],
    ) {
        let _guard = context.guard("winoconv::output_transform");
        let stage = &self.output_stage;
        let threads = self.plan.threads();
        let chunks = partition_mut(nhwc, &stage.chunk_bounds(threads));
        let scratch = partition_mut(
            workspace,
            &per_thread_bounds(stage.workspace_per_thread(), threads),
        );
        context.scheduler.schedule(threads, &|thread, count| {
            let mut chunk = lock_chunk(&chunks[thread]);
            let mut workspace = lock_chunk(&scratch[thread]);
            stage.run(products, bias, &mut chunk, &mut workspace, thread, count);
        });
    }
}

fn scratch_handle(arena: &AuxArena, id: AuxBufferId) -> BufferHandle {
    arena
        .handle(id)
        .unwrap_or_else(|| PreconditionViolation::ForeignWorkspace.raise())
}

fn per_thread_bounds(per_thread: usize, threads: usize) -> Vec<usize> {
    (0..=threads).map(|t| t * per_thread).collect()
}
