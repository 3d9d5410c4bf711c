//! Scratch-buffer planning and the arena that backs it.
//!
//! [`AuxBufferPlanner`] turns the configured geometry into a list of
//! [`AuxBufferDescriptor`]s, each tagged with a [`MemoryLifetime`] and the span of pipeline
//! steps that touch it. [`AuxArena`] packs any subset of those lifetimes into a single
//! 64-byte-aligned allocation and hands out index-based [`BufferHandle`]s. Buffers whose live
//! ranges never overlap may share storage.

use std::fmt;
use std::ops::Range;

use serde::Serialize;

use crate::tensor::DataType;

/// Alignment of every Winograd-domain matrix, in bytes.
pub const STORAGE_ALIGNMENT: usize = 64;

/// Bytes per stored element. F16 values are rounded but kept in f32 lanes.
pub(crate) const STORAGE_ELEMENT_BYTES: usize = std::mem::size_of::<f32>();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryLifetime {
    /// Valid for the duration of one run.
    Temporary,
    /// Valid across runs until the operator is reconfigured or releases its weights.
    Persistent,
    /// Valid only while weights are being prepared.
    PrepareOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuxBufferId {
    PermutedInput,
    PermutedWeights,
    InputWorkspace,
    InputTransformed,
    WeightsTransformed,
    OutputTransformed,
    OutputWorkspace,
    PermutedOutput,
}

impl fmt::Display for AuxBufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AuxBufferId::PermutedInput => "permuted_input",
            AuxBufferId::PermutedWeights => "permuted_weights",
            AuxBufferId::InputWorkspace => "input_workspace",
            AuxBufferId::InputTransformed => "input_transformed",
            AuxBufferId::WeightsTransformed => "weights_transformed",
            AuxBufferId::OutputTransformed => "output_transformed",
            AuxBufferId::OutputWorkspace => "output_workspace",
            AuxBufferId::PermutedOutput => "permuted_output",
        })
    }
}

/// Pipeline steps in execution order. `Prepare` precedes every run step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStep {
    Prepare,
    PermuteInput,
    InputTransform,
    MatMul,
    OutputTransform,
    PermuteOutput,
}

/// Inclusive span of steps during which a buffer holds live data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LiveRange {
    pub first: PipelineStep,
    pub last: PipelineStep,
}

impl LiveRange {
    pub const fn new(first: PipelineStep, last: PipelineStep) -> Self {
        Self { first, last }
    }

    pub const fn single(step: PipelineStep) -> Self {
        Self::new(step, step)
    }

    pub fn overlaps(&self, other: &LiveRange) -> bool {
        self.first <= other.last && other.first <= self.last
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuxBufferDescriptor {
    pub id: AuxBufferId,
    /// Number of elements of `data_type`.
    pub elements: usize,
    pub data_type: DataType,
    /// Required start alignment in bytes.
    pub alignment: usize,
    pub lifetime: MemoryLifetime,
    pub live: LiveRange,
}

impl AuxBufferDescriptor {
    /// Bytes the arena actually reserves, which is f32 storage for every data type.
    pub fn byte_size(&self) -> usize {
        self.elements * STORAGE_ELEMENT_BYTES
    }
}

/// Element counts the planner needs from the configured stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanInputs {
    pub data_type: DataType,
    /// The caller's layout is NCHW, so activations are permuted on the way in and out.
    pub permute_activations: bool,
    pub input_elements: usize,
    pub weight_elements: usize,
    pub output_elements: usize,
    pub input_transformed_elements: usize,
    pub weights_transformed_elements: usize,
    pub output_transformed_elements: usize,
    pub input_workspace_per_thread: usize,
    pub output_workspace_per_thread: usize,
    pub threads: usize,
}

/// Computes the scratch buffers a configured convolution needs.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuxBufferPlanner;

impl AuxBufferPlanner {
    pub fn plan(inputs: &PlanInputs) -> AuxBufferPlan {
        use AuxBufferId::*;
        use MemoryLifetime::*;
        use PipelineStep as Step;

        let dt = inputs.data_type;
        let elem = STORAGE_ELEMENT_BYTES;
        let threads = inputs.threads.max(1);
        let entry = |id, elements: usize, alignment, lifetime, live| AuxBufferDescriptor {
            id,
            elements,
            data_type: dt,
            alignment,
            lifetime,
            live,
        };

        let mut buffers = Vec::with_capacity(8);
        if inputs.permute_activations {
            buffers.push(entry(
                PermutedInput,
                inputs.input_elements,
                elem,
                Temporary,
                LiveRange::new(Step::PermuteInput, Step::InputTransform),
            ));
        }
        buffers.push(entry(
            PermutedWeights,
            inputs.weight_elements,
            elem,
            PrepareOnly,
            LiveRange::single(Step::Prepare),
        ));
        buffers.push(entry(
            InputWorkspace,
            inputs.input_workspace_per_thread * threads,
            elem,
            Temporary,
            LiveRange::single(Step::InputTransform),
        ));
        buffers.push(entry(
            InputTransformed,
            inputs.input_transformed_elements,
            STORAGE_ALIGNMENT,
            Temporary,
            LiveRange::new(Step::InputTransform, Step::MatMul),
        ));
        buffers.push(entry(
            WeightsTransformed,
            inputs.weights_transformed_elements,
            STORAGE_ALIGNMENT,
            Persistent,
            LiveRange::new(Step::Prepare, Step::PermuteOutput),
        ));
        buffers.push(entry(
            OutputTransformed,
            inputs.output_transformed_elements,
            STORAGE_ALIGNMENT,
            Temporary,
            LiveRange::new(Step::MatMul, Step::OutputTransform),
        ));
        buffers.push(entry(
            OutputWorkspace,
            inputs.output_workspace_per_thread * threads,
            elem,
            Temporary,
            LiveRange::single(Step::OutputTransform),
        ));
        if inputs.permute_activations {
            buffers.push(entry(
                PermutedOutput,
                inputs.output_elements,
                elem,
                Temporary,
                LiveRange::new(Step::OutputTransform, Step::PermuteOutput),
            ));
        }

        AuxBufferPlan {
            buffers,
            threads,
        }
    }
}

/// Ordered set of scratch-buffer requirements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuxBufferPlan {
    buffers: Vec<AuxBufferDescriptor>,
    threads: usize,
}

impl AuxBufferPlan {
    pub fn buffers(&self) -> &[AuxBufferDescriptor] {
        &self.buffers
    }

    pub fn get(&self, id: AuxBufferId) -> Option<&AuxBufferDescriptor> {
        self.buffers.iter().find(|b| b.id == id)
    }

    /// Thread count the workspaces were sized for.
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Whether two buffers may share storage.
    pub fn can_alias(&self, a: AuxBufferId, b: AuxBufferId) -> bool {
        match (self.get(a), self.get(b)) {
            (Some(a), Some(b)) => {
                a.id != b.id
                    && a.lifetime != MemoryLifetime::Persistent
                    && b.lifetime != MemoryLifetime::Persistent
                    && !a.live.overlaps(&b.live)
            }
            _ => false,
        }
    }

    /// Bytes needed with every buffer in its own storage.
    pub fn total_bytes(&self) -> usize {
        self.buffers.iter().map(AuxBufferDescriptor::byte_size).sum()
    }

    /// Bytes needed once non-overlapping scratch buffers share storage.
    pub fn peak_bytes(&self) -> usize {
        let persistent: Vec<_> = self
            .buffers
            .iter()
            .filter(|b| b.lifetime == MemoryLifetime::Persistent)
            .map(|b| Placement::bytes(b, true))
            .collect();
        let scratch: Vec<_> = self
            .buffers
            .iter()
            .filter(|b| b.lifetime != MemoryLifetime::Persistent)
            .map(|b| Placement::bytes(b, false))
            .collect();
        pack(&persistent).1 + pack(&scratch).1
    }

    pub fn filtered(&self, lifetimes: &[MemoryLifetime]) -> impl Iterator<Item = &AuxBufferDescriptor> {
        self.buffers
            .iter()
            .filter(move |b| lifetimes.contains(&b.lifetime))
    }
}

/// A buffer to be packed, in abstract units (bytes or storage elements).
#[derive(Debug, Clone, Copy)]
struct Placement {
    len: usize,
    align: usize,
    live: LiveRange,
    /// Conflicts with everything regardless of live range.
    exclusive: bool,
}

impl Placement {
    fn bytes(desc: &AuxBufferDescriptor, exclusive: bool) -> Self {
        Self {
            len: desc.byte_size(),
            align: desc.alignment.max(1),
            live: desc.live,
            exclusive,
        }
    }

    fn elements(desc: &AuxBufferDescriptor) -> Self {
        Self {
            len: desc.elements,
            align: desc.alignment.div_ceil(STORAGE_ELEMENT_BYTES).max(1),
            live: desc.live,
            exclusive: desc.lifetime == MemoryLifetime::Persistent,
        }
    }

    fn conflicts(&self, other: &Placement) -> bool {
        self.exclusive || other.exclusive || self.live.overlaps(&other.live)
    }
}

/// First-fit packing, largest buffers first. Returns each item's offset and the extent.
fn pack(items: &[Placement]) -> (Vec<usize>, usize) {
    let mut order: Vec<usize> = (0..items.len()).collect();
    order.sort_by(|&a, &b| items[b].len.cmp(&items[a].len));

    let mut offsets = vec![0usize; items.len()];
    let mut placed: Vec<usize> = Vec::with_capacity(items.len());
    let mut extent = 0usize;
    for index in order {
        let item = &items[index];
        let mut conflicts: Vec<usize> = placed
            .iter()
            .copied()
            .filter(|&other| item.conflicts(&items[other]) && items[other].len > 0)
            .collect();
        conflicts.sort_by_key(|&other| offsets[other]);

        let mut offset = 0usize;
        for other in conflicts {
            let start = offsets[other];
            let end = start + items[other].len;
            if start >= offset + item.len {
                break;
            }
            if end > offset {
                offset = end.next_multiple_of(item.align);
            }
        }
        offsets[index] = offset;
        extent = extent.max(offset + item.len);
        placed.push(index);
    }
    (offsets, extent)
}

/// Index of a buffer inside an [`AuxArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(usize);

#[derive(Debug, Clone)]
struct ArenaSlot {
    id: AuxBufferId,
    range: Range<usize>,
}

/// Single aligned allocation holding the buffers of a plan for the requested lifetimes.
#[derive(Clone)]
pub struct AuxArena {
    storage: Vec<f32>,
    base: usize,
    slots: Vec<ArenaSlot>,
}

impl AuxArena {
    pub fn new(plan: &AuxBufferPlan, lifetimes: &[MemoryLifetime]) -> Self {
        let descs: Vec<&AuxBufferDescriptor> = plan.filtered(lifetimes).collect();
        let placements: Vec<Placement> = descs.iter().map(|d| Placement::elements(d)).collect();
        let (offsets, extent) = pack(&placements);

        let align_elems = STORAGE_ALIGNMENT / STORAGE_ELEMENT_BYTES;
        let storage = vec![0.0f32; extent + align_elems];
        let base = match storage.as_ptr().align_offset(STORAGE_ALIGNMENT) {
            shift if shift < align_elems => shift,
            _ => 0,
        };
        let slots = descs
            .iter()
            .zip(offsets)
            .map(|(desc, offset)| ArenaSlot {
                id: desc.id,
                range: base + offset..base + offset + desc.elements,
            })
            .collect();

        Self {
            storage,
            base,
            slots,
        }
    }

    pub fn handle(&self, id: AuxBufferId) -> Option<BufferHandle> {
        self.slots
            .iter()
            .position(|slot| slot.id == id)
            .map(BufferHandle)
    }

    pub fn contains(&self, id: AuxBufferId) -> bool {
        self.handle(id).is_some()
    }

    /// Storage elements in use, excluding alignment slack.
    pub fn len(&self) -> usize {
        self.storage.len() - (STORAGE_ALIGNMENT / STORAGE_ELEMENT_BYTES)
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slice(&self, handle: BufferHandle) -> &[f32] {
        &self.storage[self.slots[handle.0].range.clone()]
    }

    pub fn slice_mut(&mut self, handle: BufferHandle) -> &mut [f32] {
        &mut self.storage[self.slots[handle.0].range.clone()]
    }

    /// Disjoint mutable views of several buffers at once.
    ///
    /// Panics if two of the requested buffers share storage.
    pub fn slices_mut<const N: usize>(&mut self, handles: [BufferHandle; N]) -> [&mut [f32]; N] {
        let ranges = handles.map(|h| self.slots[h.0].range.clone());
        split_disjoint_mut(&mut self.storage, ranges)
    }

    pub fn ids(&self) -> impl Iterator<Item = AuxBufferId> + '_ {
        self.slots.iter().map(|slot| slot.id)
    }

    #[cfg(test)]
    fn offset_of(&self, id: AuxBufferId) -> Option<Range<usize>> {
        self.slots
            .iter()
            .find(|slot| slot.id == id)
            .map(|slot| slot.range.start - self.base..slot.range.end - self.base)
    }
}

impl fmt::Debug for AuxArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuxArena")
            .field("elements", &self.len())
            .field("buffers", &self.slots.iter().map(|s| s.id).collect::<Vec<_>>())
            .finish()
    }
}

fn split_disjoint_mut<const N: usize>(
    storage: &mut [f32],
    ranges: [Range<usize>; N],
) -> [&mut [f32]; N] {
    let mut order: [usize; N] = std::array::from_fn(|i| i);
    order.sort_unstable_by_key(|&i| ranges[i].start);

    let mut out: [Option<&mut [f32]>; N] = std::array::from_fn(|_| None);
    let mut rest = storage;
    let mut consumed = 0usize;
    for index in order {
        let range = &ranges[index];
        assert!(
            range.start >= consumed,
            "arena buffers requested together share storage"
        );
        let (_, tail) = std::mem::take(&mut rest).split_at_mut(range.start - consumed);
        let (head, tail) = tail.split_at_mut(range.len());
        out[index] = Some(head);
        rest = tail;
        consumed = range.end;
    }
    out.map(Option::unwrap_or_default)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(permute: bool) -> PlanInputs {
        PlanInputs {
            data_type: DataType::F32,
            permute_activations: permute,
            input_elements: 100,
            weight_elements: 36,
            output_elements: 64,
            input_transformed_elements: 640,
            weights_transformed_elements: 512,
            output_transformed_elements: 1024,
            input_workspace_per_thread: 72,
            output_workspace_per_thread: 52,
            threads: 4,
        }
    }

    #[test]
    fn nhwc_plans_skip_activation_permutes() {
        let plan = AuxBufferPlanner::plan(&inputs(false));
        assert!(plan.get(AuxBufferId::PermutedInput).is_none());
        assert!(plan.get(AuxBufferId::PermutedOutput).is_none());
        let nchw = AuxBufferPlanner::plan(&inputs(true));
        assert_eq!(nchw.buffers().len(), 8);
        assert_eq!(
            nchw.get(AuxBufferId::InputWorkspace).map(|b| b.elements),
            Some(72 * 4)
        );
    }

    #[test]
    fn lifetimes_and_alignment_follow_the_pipeline() {
        let plan = AuxBufferPlanner::plan(&inputs(true));
        let weights = plan.get(AuxBufferId::WeightsTransformed).unwrap();
        assert_eq!(weights.lifetime, MemoryLifetime::Persistent);
        assert_eq!(weights.alignment, STORAGE_ALIGNMENT);
        assert_eq!(
            plan.get(AuxBufferId::PermutedWeights).unwrap().lifetime,
            MemoryLifetime::PrepareOnly
        );
        assert!(plan.can_alias(AuxBufferId::InputWorkspace, AuxBufferId::OutputWorkspace));
        assert!(plan.can_alias(AuxBufferId::PermutedInput, AuxBufferId::OutputTransformed));
        assert!(plan.can_alias(AuxBufferId::PermutedWeights, AuxBufferId::InputTransformed));
        assert!(!plan.can_alias(AuxBufferId::InputTransformed, AuxBufferId::OutputTransformed));
        assert!(!plan.can_alias(AuxBufferId::WeightsTransformed, AuxBufferId::PermutedWeights));
        assert!(plan.peak_bytes() < plan.total_bytes());
    }

    #[test]
    fn arena_places_live_buffers_apart_and_aliases_dead_ones() {
        let plan = AuxBufferPlanner::plan(&inputs(true));
        let arena = AuxArena::new(
            &plan,
            &[MemoryLifetime::Temporary, MemoryLifetime::PrepareOnly],
        );
        assert!(!arena.contains(AuxBufferId::WeightsTransformed));

        let ids: Vec<AuxBufferId> = arena.ids().collect();
        for &a in &ids {
            for &b in &ids {
                if a == b || plan.can_alias(a, b) {
                    continue;
                }
                let (ra, rb) = (arena.offset_of(a).unwrap(), arena.offset_of(b).unwrap());
                assert!(
                    ra.end <= rb.start || rb.end <= ra.start,
                    "{a} {ra:?} overlaps {b} {rb:?}"
                );
            }
        }
        let matrix = arena.offset_of(AuxBufferId::InputTransformed).unwrap();
        assert_eq!(matrix.start % (STORAGE_ALIGNMENT / 4), 0);
        let total_elements: usize = plan
            .filtered(&[MemoryLifetime::Temporary, MemoryLifetime::PrepareOnly])
            .map(|b| b.elements)
            .sum();
        assert!(arena.len() < total_elements);
    }

    #[test]
    fn half_precision_plans_report_f32_storage() {
        let half = PlanInputs {
            data_type: DataType::F16,
            ..inputs(true)
        };
        let plan = AuxBufferPlanner::plan(&half);
        let arena = AuxArena::new(
            &plan,
            &[
                MemoryLifetime::Temporary,
                MemoryLifetime::PrepareOnly,
                MemoryLifetime::Persistent,
            ],
        );
        for desc in plan.buffers() {
            let handle = arena.handle(desc.id).unwrap();
            assert_eq!(desc.byte_size(), arena.slice(handle).len() * 4, "{}", desc.id);
            assert_eq!(desc.alignment % 4, 0);
        }
        let stored: usize = plan
            .buffers()
            .iter()
            .map(|desc| arena.slice(arena.handle(desc.id).unwrap()).len() * 4)
            .sum();
        assert_eq!(plan.total_bytes(), stored);
        assert_eq!(plan.total_bytes(), AuxBufferPlanner::plan(&inputs(true)).total_bytes());
        assert_eq!(plan.peak_bytes(), AuxBufferPlanner::plan(&inputs(true)).peak_bytes());
    }

    #[test]
    fn slices_mut_returns_independent_views() {
        let plan = AuxBufferPlanner::plan(&inputs(false));
        let mut arena = AuxArena::new(&plan, &[MemoryLifetime::Temporary]);
        let input = arena.handle(AuxBufferId::InputTransformed).unwrap();
        let output = arena.handle(AuxBufferId::OutputTransformed).unwrap();
        let [a, b] = arena.slices_mut([output, input]);
        a.fill(1.0);
        b.fill(2.0);
        assert_eq!(arena.slice(output).len(), 1024);
        assert!(arena.slice(output).iter().all(|&v| v == 1.0));
        assert!(arena.slice(input).iter().all(|&v| v == 2.0));
    }

    #[test]
    #[should_panic(expected = "share storage")]
    fn slices_mut_rejects_aliased_buffers() {
        let plan = AuxBufferPlanner::plan(&inputs(false));
        let mut arena = AuxArena::new(&plan, &[MemoryLifetime::Temporary]);
        // Largest buffer goes first at offset 0; the input workspace is dead by then and
        // lands on top of it.
        let a = arena.handle(AuxBufferId::InputWorkspace).unwrap();
        let b = arena.handle(AuxBufferId::OutputTransformed).unwrap();
        assert!(plan.can_alias(AuxBufferId::InputWorkspace, AuxBufferId::OutputTransformed));
        let _ = arena.slices_mut([a, b]);
    }
}
