//! Bind table layouts, thread-affine bind pools and the sets they hand out.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::ThreadId;

use ash::vk;
use ash::vk::Handle as _;
use parking_lot::Mutex;

use super::buffer::{BufferView, DeviceBuffer};
use super::device::Device;
use super::error::check_range;
use crate::{
    BindTableLayoutInfo, BindTableVariable, BindTableVariableType, GPUError, Result,
    ShaderReflection,
};

/// A resource written into one slot of a binding set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundResource {
    Buffer {
        buffer: vk::Buffer,
        offset: u64,
        range: u64,
    },
    TexelBuffer(vk::BufferView),
    Image {
        view: vk::ImageView,
        layout: vk::ImageLayout,
    },
    Sampler(vk::Sampler),
    CombinedImageSampler {
        view: vk::ImageView,
        layout: vk::ImageLayout,
        sampler: vk::Sampler,
    },
}

impl BoundResource {
    /// Binds the whole of `buffer`.
    pub fn buffer(buffer: &DeviceBuffer) -> Self {
        BoundResource::Buffer {
            buffer: buffer.raw(),
            offset: 0,
            range: buffer.size(),
        }
    }

    pub fn buffer_range(buffer: &DeviceBuffer, offset: u64, range: u64) -> Result<Self> {
        check_range(offset, range, buffer.size())?;
        Ok(BoundResource::Buffer {
            buffer: buffer.raw(),
            offset,
            range,
        })
    }

    /// Fails with `IllegalState` if the view's buffer is gone.
    pub fn texel_buffer(view: &BufferView) -> Result<Self> {
        Ok(BoundResource::TexelBuffer(view.raw()?))
    }

    fn accepts(&self, var_type: BindTableVariableType) -> bool {
        use BindTableVariableType as T;
        match self {
            BoundResource::Buffer { .. } => matches!(
                var_type,
                T::Uniform | T::DynamicUniform | T::Storage | T::DynamicStorage
            ),
            BoundResource::TexelBuffer(_) => matches!(var_type, T::UniformTexel | T::StorageTexel),
            BoundResource::Image { .. } => matches!(var_type, T::Image | T::StorageImage),
            BoundResource::Sampler(_) => var_type == T::Sampler,
            BoundResource::CombinedImageSampler { .. } => var_type == T::SampledImage,
        }
    }
}

/// Folds every stage's variables into one entry per binding number. A binding
/// seen in several stages keeps the largest count and the union of stages.
fn merge_reflection(
    shaders: &ShaderReflection,
) -> Result<Vec<(BindTableVariable, vk::ShaderStageFlags)>> {
    let mut merged: BTreeMap<u32, (BindTableVariable, vk::ShaderStageFlags)> = BTreeMap::new();
    for shader in shaders {
        let stage = vk::ShaderStageFlags::from(shader.shader_type);
        for var in shader.variables {
            if var.count == 0 {
                return Err(GPUError::InvalidBindTableBinding {
                    binding: var.binding,
                    reason: "descriptor count must be non-zero".to_string(),
                });
            }
            match merged.get_mut(&var.binding) {
                Some((existing, stages)) => {
                    if existing.var_type != var.var_type {
                        return Err(GPUError::InvalidBindTableBinding {
                            binding: var.binding,
                            reason: format!(
                                "declared as both {:?} and {:?}",
                                existing.var_type, var.var_type
                            ),
                        });
                    }
                    existing.count = existing.count.max(var.count);
                    *stages |= stage;
                }
                None => {
                    merged.insert(var.binding, (*var, stage));
                }
            }
        }
    }
    Ok(merged.into_values().collect())
}

fn demand_of(variables: &[(BindTableVariable, vk::ShaderStageFlags)]) -> Result<[u32; 10]> {
    let mut demand = [0u32; 10];
    for (var, _) in variables {
        let slot = &mut demand[var.var_type.index()];
        *slot = slot.checked_add(var.count).ok_or_else(|| {
            GPUError::InvalidArgument(format!(
                "{:?} descriptor count overflows at binding {}",
                var.var_type, var.binding
            ))
        })?;
    }
    Ok(demand)
}

/// Shape of one binding set, shared by every set allocated with it.
pub struct BindTableLayout {
    device: Arc<dyn Device>,
    raw: vk::DescriptorSetLayout,
    debug_name: String,
    variables: Vec<(BindTableVariable, vk::ShaderStageFlags)>,
    demand: [u32; 10],
}

impl BindTableLayout {
    pub fn new(device: Arc<dyn Device>, info: &BindTableLayoutInfo) -> Result<Arc<Self>> {
        let variables = merge_reflection(info.shaders)?;
        let demand = demand_of(&variables)?;
        let raw = device.create_bind_table_layout(&variables)?;
        if !info.debug_name.is_empty() {
            device.set_debug_name(
                vk::ObjectType::DESCRIPTOR_SET_LAYOUT,
                raw.as_raw(),
                info.debug_name,
            );
        }
        Ok(Arc::new(Self {
            device,
            raw,
            debug_name: info.debug_name.to_string(),
            variables,
            demand,
        }))
    }

    pub fn raw(&self) -> vk::DescriptorSetLayout {
        self.raw
    }

    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }

    pub fn variables(&self) -> impl Iterator<Item = &BindTableVariable> {
        self.variables.iter().map(|(var, _)| var)
    }

    pub fn variable(&self, binding: u32) -> Option<&BindTableVariable> {
        self.variables()
            .find(|var| var.binding == binding)
    }

    pub fn stages(&self, binding: u32) -> Option<vk::ShaderStageFlags> {
        self.variables
            .iter()
            .find(|(var, _)| var.binding == binding)
            .map(|(_, stages)| *stages)
    }

    /// Layouts with identical bindings can stand in for each other.
    pub fn is_compatible(&self, other: &BindTableLayout) -> bool {
        self.variables().eq(other.variables())
    }

    fn demand(&self) -> [u32; 10] {
        self.demand
    }
}

impl fmt::Debug for BindTableLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindTableLayout")
            .field("raw", &self.raw)
            .field("debug_name", &self.debug_name)
            .field("variables", &self.variables)
            .finish()
    }
}

impl Drop for BindTableLayout {
    fn drop(&mut self) {
        self.device.destroy_bind_table_layout(self.raw);
    }
}

/// Per-kind descriptor capacity of a pool and how much of it is in use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingBudget {
    capacity: [u32; 10],
    used: [u32; 10],
}

impl BindingBudget {
    /// Reserves room for `max_sets` sets of the reflected signature.
    pub fn from_reflection(reflection: &ShaderReflection, max_sets: u32) -> Result<Self> {
        let per_set = demand_of(&merge_reflection(reflection)?)?;
        let mut capacity = [0u32; 10];
        for (cap, count) in capacity.iter_mut().zip(per_set) {
            *cap = count.checked_mul(max_sets).ok_or_else(|| {
                GPUError::InvalidArgument(format!(
                    "{} descriptors per set times {} sets overflows",
                    count, max_sets
                ))
            })?;
        }
        Ok(Self {
            capacity,
            used: [0; 10],
        })
    }

    pub fn capacity(&self, var_type: BindTableVariableType) -> u32 {
        self.capacity[var_type.index()]
    }

    pub fn remaining(&self, var_type: BindTableVariableType) -> u32 {
        let idx = var_type.index();
        self.capacity[idx] - self.used[idx]
    }

    /// Pool sizes for the native pool, skipping kinds with no capacity.
    pub fn pool_sizes(&self) -> Vec<vk::DescriptorPoolSize> {
        BindTableVariableType::ALL
            .iter()
            .filter(|ty| self.capacity(**ty) > 0)
            .map(|ty| vk::DescriptorPoolSize {
                ty: vk::DescriptorType::from(*ty),
                descriptor_count: self.capacity(*ty),
            })
            .collect()
    }

    /// First kind that cannot satisfy `demand`, if any.
    fn shortfall(&self, demand: &[u32; 10]) -> Option<BindTableVariableType> {
        BindTableVariableType::ALL
            .iter()
            .copied()
            .find(|ty| demand[ty.index()] > self.remaining(*ty))
    }

    fn acquire(&mut self, demand: &[u32; 10]) {
        for (used, count) in self.used.iter_mut().zip(demand) {
            *used += count;
        }
    }

    fn release(&mut self, demand: &[u32; 10]) {
        for (used, count) in self.used.iter_mut().zip(demand) {
            *used = used.saturating_sub(*count);
        }
    }

    fn clear(&mut self) {
        self.used = [0; 10];
    }
}

/// Pool identity shared with every set it allocated. The epoch moves on each
/// reset and when the pool is destroyed, invalidating older sets.
struct PoolShared {
    raw: vk::DescriptorPool,
    epoch: AtomicU64,
}

type BindingMap = BTreeMap<(u32, u32), BoundResource>;

/// Fixed-capacity allocator of [`BindingSet`]s, usable only from the thread
/// that created it.
pub struct BindingTablePool {
    device: Arc<dyn Device>,
    shared: Arc<PoolShared>,
    owner: ThreadId,
    max_sets: u32,
    live_sets: u32,
    budget: BindingBudget,
    debug_name: String,
}

impl BindingTablePool {
    pub fn new(
        device: Arc<dyn Device>,
        reflection: &ShaderReflection,
        max_sets: u32,
    ) -> Result<Self> {
        if max_sets == 0 {
            return Err(GPUError::InvalidArgument(
                "a bind pool needs room for at least one set".to_string(),
            ));
        }
        let budget = BindingBudget::from_reflection(reflection, max_sets)?;
        let raw = device.create_bind_pool(max_sets, &budget.pool_sizes())?;
        log::debug!("created bind pool {:?} for {} sets", raw, max_sets);
        Ok(Self {
            device,
            shared: Arc::new(PoolShared {
                raw,
                epoch: AtomicU64::new(0),
            }),
            owner: std::thread::current().id(),
            max_sets,
            live_sets: 0,
            budget,
            debug_name: String::new(),
        })
    }

    pub fn raw(&self) -> vk::DescriptorPool {
        self.shared.raw
    }

    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    pub fn max_sets(&self) -> u32 {
        self.max_sets
    }

    pub fn live_sets(&self) -> u32 {
        self.live_sets
    }

    pub fn budget(&self) -> &BindingBudget {
        &self.budget
    }

    pub fn set_debug_name(&mut self, name: &str) {
        self.debug_name = name.to_string();
        self.device
            .set_debug_name(vk::ObjectType::DESCRIPTOR_POOL, self.raw().as_raw(), name);
    }

    /// Allocates a set for `layout`. With a `parent`, the new set starts out
    /// holding the parent's bindings and only diverges where it is written.
    pub fn allocate(
        &mut self,
        layout: &Arc<BindTableLayout>,
        parent: Option<&Arc<BindingSet>>,
    ) -> Result<Arc<BindingSet>> {
        self.check_owner("allocate")?;

        if let Some(parent) = parent {
            parent.ensure_valid()?;
            if !Arc::ptr_eq(&parent.layout, layout) && !parent.layout.is_compatible(layout) {
                return Err(GPUError::InvalidArgument(format!(
                    "parent layout '{}' is not compatible with '{}'",
                    parent.layout.debug_name, layout.debug_name
                )));
            }
        }

        if self.live_sets >= self.max_sets {
            log::warn!(
                "bind pool '{}' is full ({} sets)",
                self.debug_name,
                self.max_sets
            );
            return Err(GPUError::ResourceExhausted(format!(
                "bind pool '{}' already holds {} sets",
                self.debug_name, self.max_sets
            )));
        }
        let demand = layout.demand();
        if let Some(ty) = self.budget.shortfall(&demand) {
            log::warn!(
                "bind pool '{}' has {} of {} {:?} descriptors left",
                self.debug_name,
                self.budget.remaining(ty),
                self.budget.capacity(ty),
                ty
            );
            return Err(GPUError::ResourceExhausted(format!(
                "bind pool '{}' cannot fit {} more {:?} descriptors",
                self.debug_name,
                demand[ty.index()],
                ty
            )));
        }

        let raw = self.device.allocate_bind_set(self.raw(), layout.raw())?;
        let bindings = match parent {
            Some(parent) => {
                let inherited = parent.bindings.lock().clone();
                if let Err(err) = copy_written_slots(&*self.device, parent.raw, raw, &inherited) {
                    if let Err(free_err) = self.device.free_bind_set(self.raw(), raw) {
                        log::warn!("releasing half-built set: {}", free_err);
                    }
                    return Err(err);
                }
                inherited
            }
            None => Arc::new(BindingMap::new()),
        };

        self.budget.acquire(&demand);
        self.live_sets += 1;
        log::trace!(
            "bind pool '{}' allocated {:?} ({}/{})",
            self.debug_name,
            raw,
            self.live_sets,
            self.max_sets
        );
        Ok(Arc::new(BindingSet {
            device: self.device.clone(),
            raw,
            layout: layout.clone(),
            pool: self.shared.clone(),
            epoch: self.shared.epoch.load(Ordering::Acquire),
            freed: AtomicBool::new(false),
            parent: parent.map(Arc::downgrade),
            bindings: Mutex::new(bindings),
        }))
    }

    /// Returns one set to the pool. No GPU work may still reference it.
    pub fn free(&mut self, set: &BindingSet) -> Result<()> {
        self.check_owner("free")?;
        if !Arc::ptr_eq(&set.pool, &self.shared) {
            return Err(GPUError::InvalidArgument(
                "binding set was allocated from another pool".to_string(),
            ));
        }
        set.ensure_valid()?;

        self.device.free_bind_set(self.raw(), set.raw)?;
        set.freed.store(true, Ordering::Release);
        self.budget.release(&set.layout.demand());
        self.live_sets -= 1;
        Ok(())
    }

    /// Frees every set at once. Outstanding handles become invalid.
    pub fn reset(&mut self) -> Result<()> {
        self.check_owner("reset")?;
        self.device.reset_bind_pool(self.raw())?;
        self.shared.epoch.fetch_add(1, Ordering::AcqRel);
        self.budget.clear();
        log::debug!(
            "reset bind pool '{}' releasing {} sets",
            self.debug_name,
            self.live_sets
        );
        self.live_sets = 0;
        Ok(())
    }

    fn check_owner(&self, op: &str) -> Result<()> {
        let current = std::thread::current().id();
        if current == self.owner {
            return Ok(());
        }
        let msg = format!(
            "bind pool '{}' {} from thread {:?}; owned by {:?}",
            self.debug_name, op, current, self.owner
        );
        log::error!("{}", msg);
        if cfg!(feature = "bindery-fail-fast") {
            panic!("{}", msg);
        }
        Err(GPUError::IllegalState(msg))
    }
}

/// Copies each contiguous run of written slots from `src` into `dst`.
fn copy_written_slots(
    device: &dyn Device,
    src: vk::DescriptorSet,
    dst: vk::DescriptorSet,
    bindings: &BindingMap,
) -> Result<()> {
    let mut run: Option<(u32, u32, u32)> = None;
    for &(binding, slot) in bindings.keys() {
        run = match run {
            Some((b, first, count)) if b == binding && first + count == slot => {
                Some((b, first, count + 1))
            }
            Some((b, first, count)) => {
                device.copy_bindings(src, dst, b, first, count)?;
                Some((binding, slot, 1))
            }
            None => Some((binding, slot, 1)),
        };
    }
    if let Some((b, first, count)) = run {
        device.copy_bindings(src, dst, b, first, count)?;
    }
    Ok(())
}

impl fmt::Debug for BindingTablePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingTablePool")
            .field("raw", &self.shared.raw)
            .field("debug_name", &self.debug_name)
            .field("owner", &self.owner)
            .field("live_sets", &self.live_sets)
            .field("max_sets", &self.max_sets)
            .finish()
    }
}

impl Drop for BindingTablePool {
    fn drop(&mut self) {
        self.shared.epoch.fetch_add(1, Ordering::AcqRel);
        self.device.destroy_bind_pool(self.shared.raw);
        log::debug!("destroyed bind pool '{}'", self.debug_name);
    }
}

/// A group of bindings allocated from a [`BindingTablePool`].
///
/// Sets are not returned on drop; hand them back with
/// [`BindingTablePool::free`] or recycle the whole pool with
/// [`BindingTablePool::reset`].
pub struct BindingSet {
    device: Arc<dyn Device>,
    raw: vk::DescriptorSet,
    layout: Arc<BindTableLayout>,
    pool: Arc<PoolShared>,
    epoch: u64,
    freed: AtomicBool,
    parent: Option<Weak<BindingSet>>,
    bindings: Mutex<Arc<BindingMap>>,
}

impl BindingSet {
    /// False once the set is freed, its pool reset, or its pool destroyed.
    pub fn is_valid(&self) -> bool {
        !self.freed.load(Ordering::Acquire) && self.pool.epoch.load(Ordering::Acquire) == self.epoch
    }

    pub fn raw(&self) -> Result<vk::DescriptorSet> {
        self.ensure_valid()?;
        Ok(self.raw)
    }

    pub fn layout(&self) -> &Arc<BindTableLayout> {
        &self.layout
    }

    pub fn parent(&self) -> Option<Arc<BindingSet>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    /// Writes `resource` into `slot` of `binding`.
    pub fn write(&self, binding: u32, slot: u32, resource: BoundResource) -> Result<()> {
        self.ensure_valid()?;
        let Some(var) = self.layout.variable(binding) else {
            return Err(GPUError::InvalidBindTableBinding {
                binding,
                reason: "binding is not part of the bind table layout".to_string(),
            });
        };
        if slot >= var.count {
            return Err(GPUError::InvalidBindTableBinding {
                binding,
                reason: format!("slot {} exceeds declared count {}", slot, var.count),
            });
        }
        if !resource.accepts(var.var_type) {
            return Err(GPUError::InvalidBindTableBinding {
                binding,
                reason: format!("{:?} cannot back a {:?} binding", resource, var.var_type),
            });
        }

        self.device
            .write_binding(self.raw, binding, slot, var.var_type.into(), &resource)?;
        let mut bindings = self.bindings.lock();
        Arc::make_mut(&mut *bindings).insert((binding, slot), resource);
        Ok(())
    }

    /// Resource visible at `(binding, slot)`, inherited from the parent unless
    /// overridden.
    pub fn binding(&self, binding: u32, slot: u32) -> Option<BoundResource> {
        self.bindings.lock().get(&(binding, slot)).copied()
    }

    /// True while no write has forked this set's bindings from its parent's.
    pub fn shares_bindings_with_parent(&self) -> bool {
        match self.parent() {
            Some(parent) => Arc::ptr_eq(&*self.bindings.lock(), &*parent.bindings.lock()),
            None => false,
        }
    }

    fn ensure_valid(&self) -> Result<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(GPUError::IllegalState(format!(
                "binding set {:?} was freed or its pool was reset",
                self.raw
            )))
        }
    }
}

impl fmt::Debug for BindingSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingSet")
            .field("raw", &self.raw)
            .field("layout", &self.layout.debug_name)
            .field("valid", &self.is_valid())
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}
