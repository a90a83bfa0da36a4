//! wgpu device management and the [`Backend`] implementation.
//!
//! Every tensor level is one storage buffer of `vec4<f32>` texels. Byte
//! (display) buffers use the same layout; quantization happens on upload and
//! in the kernel epilogue. Kernels are submitted in order on a single queue,
//! so a dispatch always sees the results of the previous one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use wgpu::util::DeviceExt;

use crate::backend::{Backend, BufferDesc, Input, Target};
use crate::error::{NeurotexError, NeurotexResult};
use crate::gpu::pipeline::{workgroup_count, PipelineCache, TARGET_BINDING};
use crate::gpu::shaders::WORKGROUP_SIDE;
use crate::gpu::uniforms::KernelUniforms;
use crate::kernel::{Program, Uniforms, MAX_INPUTS};
use crate::tensor::{Texel, CHANNELS};

/// Which adapter class to ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerPreference {
    /// Integrated adapters.
    LowPower,
    /// Discrete adapters.
    #[default]
    HighPerformance,
}

impl From<PowerPreference> for wgpu::PowerPreference {
    fn from(pref: PowerPreference) -> Self {
        match pref {
            PowerPreference::LowPower => wgpu::PowerPreference::LowPower,
            PowerPreference::HighPerformance => wgpu::PowerPreference::HighPerformance,
        }
    }
}

/// Device selection for [`WgpuBackend::init`].
#[derive(Debug, Clone)]
pub struct WgpuOptions {
    /// Adapter class.
    pub power_preference: PowerPreference,
    /// Preferred backends. `None` lets wgpu pick.
    pub backend: Option<wgpu::Backends>,
    /// Use the first adapter whose name contains this string.
    pub force_adapter_name: Option<String>,
    /// Limits the device must offer; tensor sizes are checked against them.
    pub required_limits: wgpu::Limits,
}

impl Default for WgpuOptions {
    fn default() -> Self {
        Self {
            power_preference: PowerPreference::HighPerformance,
            backend: None,
            force_adapter_name: None,
            required_limits: wgpu::Limits::default(),
        }
    }
}

impl WgpuOptions {
    /// Options for low-memory or browser-class adapters.
    pub fn low_memory() -> Self {
        Self {
            power_preference: PowerPreference::LowPower,
            required_limits: wgpu::Limits::downlevel_defaults(),
            ..Self::default()
        }
    }
}

/// Kernel backend running on a wgpu device.
///
/// # Example
///
/// ```rust,ignore
/// use neurotex::gpu::{WgpuBackend, WgpuOptions};
///
/// let backend = WgpuBackend::init(WgpuOptions::default())?;
/// log::info!("training on {}", backend.adapter_info().name);
/// ```
pub struct WgpuBackend {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    adapter_info: wgpu::AdapterInfo,
    limits: wgpu::Limits,
    pipelines: PipelineCache,
    /// Bound to input slots that read a constant or are unused.
    placeholder: wgpu::Buffer,
    lost: Arc<AtomicBool>,
    dispatches: u64,
}

impl WgpuBackend {
    /// Initializes the backend with the given options.
    ///
    /// # Errors
    ///
    /// - `NeurotexError::AdapterNotFound` - no suitable adapter.
    /// - `NeurotexError::UnsupportedLimits` - the adapter is below `required_limits`.
    /// - `NeurotexError::DeviceRequestFailed` - device creation failed.
    pub fn init(options: WgpuOptions) -> NeurotexResult<Self> {
        let backends = options.backend.unwrap_or(wgpu::Backends::all());
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });

        let adapter = pollster::block_on(Self::request_adapter(&instance, &options))?;
        let adapter_info = adapter.get_info();
        log::info!(
            "Selected GPU adapter: {} ({:?})",
            adapter_info.name,
            adapter_info.backend
        );

        Self::check_limits(&adapter.limits(), &options.required_limits)?;

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("neurotex device"),
                required_features: wgpu::Features::empty(),
                required_limits: options.required_limits.clone(),
                memory_hints: wgpu::MemoryHints::Performance,
            },
            None,
        ))?;

        let lost = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&lost);
        device.set_device_lost_callback(move |reason, message| {
            log::error!("GPU device lost ({:?}): {}", reason, message);
            flag.store(true, Ordering::SeqCst);
        });

        let device = Arc::new(device);
        let placeholder = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("neurotex placeholder"),
            contents: bytemuck::bytes_of(&Texel::ZERO),
            usage: wgpu::BufferUsages::STORAGE,
        });

        Ok(Self {
            pipelines: PipelineCache::new(Arc::clone(&device)),
            limits: device.limits(),
            device,
            queue: Arc::new(queue),
            adapter_info,
            placeholder,
            lost,
            dispatches: 0,
        })
    }

    async fn request_adapter(instance: &wgpu::Instance, options: &WgpuOptions) -> NeurotexResult<wgpu::Adapter> {
        if let Some(ref filter) = options.force_adapter_name {
            let filter = filter.to_lowercase();
            return instance
                .enumerate_adapters(options.backend.unwrap_or(wgpu::Backends::all()))
                .into_iter()
                .find(|a| a.get_info().name.to_lowercase().contains(&filter))
                .ok_or_else(|| NeurotexError::adapter_not_found(format!("No adapter matching '{}' found", filter)));
        }

        let preferred = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: options.power_preference.into(),
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await;
        match preferred {
            Some(adapter) => Ok(adapter),
            None => instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::None,
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })
                .await
                .ok_or_else(|| {
                    NeurotexError::adapter_not_found("No GPU adapters available. Ensure GPU drivers are installed.")
                }),
        }
    }

    fn check_limits(adapter: &wgpu::Limits, required: &wgpu::Limits) -> NeurotexResult<()> {
        if adapter.max_storage_buffer_binding_size < required.max_storage_buffer_binding_size {
            return Err(NeurotexError::unsupported_limits(format!(
                "max_storage_buffer_binding_size: adapter has {}, required {}",
                adapter.max_storage_buffer_binding_size, required.max_storage_buffer_binding_size
            )));
        }
        if adapter.max_storage_buffers_per_shader_stage < required.max_storage_buffers_per_shader_stage {
            return Err(NeurotexError::unsupported_limits(format!(
                "max_storage_buffers_per_shader_stage: adapter has {}, required {}",
                adapter.max_storage_buffers_per_shader_stage, required.max_storage_buffers_per_shader_stage
            )));
        }
        Ok(())
    }

    /// Information about the selected adapter.
    pub fn adapter_info(&self) -> &wgpu::AdapterInfo {
        &self.adapter_info
    }

    /// Device limits.
    pub fn limits(&self) -> &wgpu::Limits {
        &self.limits
    }

    /// Kernels submitted so far.
    pub fn dispatch_count(&self) -> u64 {
        self.dispatches
    }

    /// Compiled pipelines.
    pub fn pipelines(&self) -> &PipelineCache {
        &self.pipelines
    }

    fn check_alive(&self, what: &str) -> NeurotexResult<()> {
        if self.lost.load(Ordering::SeqCst) {
            return Err(NeurotexError::context_lost(format!("GPU device: {}", what)));
        }
        Ok(())
    }

    fn check_size(&self, desc: BufferDesc) -> NeurotexResult<u64> {
        let bytes = (desc.texels() * std::mem::size_of::<Texel>()) as u64;
        if bytes > u64::from(self.limits.max_storage_buffer_binding_size) {
            return Err(NeurotexError::unsupported_limits(format!(
                "{}x{} tensor needs {} bytes, max storage binding is {}",
                desc.width, desc.height, bytes, self.limits.max_storage_buffer_binding_size
            )));
        }
        Ok(bytes)
    }

    fn stored(desc: BufferDesc, data: &[f32]) -> NeurotexResult<Vec<f32>> {
        if data.len() != desc.texels() * CHANNELS {
            return Err(NeurotexError::DataLength {
                expected: desc.texels() * CHANNELS,
                got: data.len(),
            });
        }
        Ok(data.iter().map(|&v| desc.mode.store(v)).collect())
    }
}

impl Backend for WgpuBackend {
    type Buffer = wgpu::Buffer;

    fn name(&self) -> String {
        format!("wgpu ({}, {:?})", self.adapter_info.name, self.adapter_info.backend)
    }

    fn allocate(&mut self, desc: BufferDesc, data: Option<&[f32]>) -> NeurotexResult<wgpu::Buffer> {
        self.check_alive("allocate")?;
        let size = self.check_size(desc)?;
        let usage = wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC;
        let buffer = match data {
            Some(data) => {
                let stored = Self::stored(desc, data)?;
                self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("neurotex tensor"),
                    contents: bytemuck::cast_slice(&stored),
                    usage,
                })
            }
            None => self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("neurotex tensor"),
                size,
                usage,
                mapped_at_creation: false,
            }),
        };
        Ok(buffer)
    }

    fn upload(&mut self, buffer: &mut wgpu::Buffer, desc: BufferDesc, data: &[f32]) -> NeurotexResult<()> {
        self.check_alive("upload")?;
        let stored = Self::stored(desc, data)?;
        if buffer.size() != (stored.len() * std::mem::size_of::<f32>()) as u64 {
            return Err(NeurotexError::buffer(format!(
                "upload of {} floats into a {} byte buffer",
                stored.len(),
                buffer.size()
            )));
        }
        self.queue.write_buffer(buffer, 0, bytemuck::cast_slice(&stored));
        Ok(())
    }

    fn download(&self, buffer: &wgpu::Buffer, desc: BufferDesc) -> NeurotexResult<Vec<f32>> {
        self.check_alive("download")?;
        let size = (desc.texels() * std::mem::size_of::<Texel>()) as u64;

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("neurotex staging (download)"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("neurotex download encoder"),
        });
        encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, size);
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            // the receiver only goes away if download already failed
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);

        rx.recv()
            .map_err(|e| NeurotexError::buffer(format!("Failed to receive map result: {}", e)))??;
        self.check_alive("download")?;

        let data = bytemuck::cast_slice::<u8, f32>(&slice.get_mapped_range()).to_vec();
        staging.unmap();
        Ok(data)
    }

    fn execute(
        &mut self,
        program: Program,
        inputs: &[Input<'_, wgpu::Buffer>],
        uniforms: &Uniforms,
        target: Target<'_, wgpu::Buffer>,
    ) -> NeurotexResult<()> {
        self.check_alive(program.name())?;
        let Target { buffer, desc } = target;

        let packed = KernelUniforms::pack(uniforms, inputs, desc);
        let uniform_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("neurotex uniforms"),
            contents: bytemuck::bytes_of(&packed),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let mut entries = Vec::with_capacity(MAX_INPUTS + 2);
        entries.push(wgpu::BindGroupEntry {
            binding: 0,
            resource: uniform_buffer.as_entire_binding(),
        });
        for slot in 0..MAX_INPUTS {
            let bound = match inputs.get(slot) {
                Some(Input::Buffer(buffer, _)) => *buffer,
                _ => &self.placeholder,
            };
            entries.push(wgpu::BindGroupEntry {
                binding: 1 + slot as u32,
                resource: bound.as_entire_binding(),
            });
        }
        entries.push(wgpu::BindGroupEntry {
            binding: TARGET_BINDING,
            resource: buffer.as_entire_binding(),
        });

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(program.name()),
            layout: self.pipelines.bind_group_layout(),
            entries: &entries,
        });

        let side = WORKGROUP_SIDE as usize;
        let (groups_x, groups_y) = (workgroup_count(desc.width, side), workgroup_count(desc.height, side));
        let pipeline = self.pipelines.get(program);

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(program.name()),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(program.name()),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(groups_x, groups_y, 1);
        }
        self.queue.submit(std::iter::once(encoder.finish()));

        self.dispatches += 1;
        Ok(())
    }

    fn is_context_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for WgpuBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuBackend")
            .field("adapter", &self.adapter_info.name)
            .field("backend", &self.adapter_info.backend)
            .field("device_type", &self.adapter_info.device_type)
            .field("pipelines", &self.pipelines.len())
            .field("lost", &self.is_context_lost())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_default() {
        let opts = WgpuOptions::default();
        assert_eq!(opts.power_preference, PowerPreference::HighPerformance);
        assert!(opts.backend.is_none());
    }

    #[test]
    fn test_options_low_memory() {
        let opts = WgpuOptions::low_memory();
        assert_eq!(opts.power_preference, PowerPreference::LowPower);
        assert!(opts.force_adapter_name.is_none());
    }

    // GPU tests require an adapter, run with: cargo test --features gpu -- --ignored
    #[test]
    #[ignore]
    fn test_backend_init() {
        let backend = WgpuBackend::init(WgpuOptions::default()).expect("Failed to init backend");
        assert!(!backend.adapter_info().name.is_empty());
        assert!(!backend.is_context_lost());
        assert!(backend.pipelines().is_empty());
    }
}
