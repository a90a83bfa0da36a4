//! Compute pipeline management.
//!
//! All programs share one bind group layout (see [`crate::gpu::shaders`]),
//! so a single pipeline layout serves the whole cache. Pipelines are built
//! lazily the first time a program is dispatched.

use std::collections::HashMap;
use std::sync::Arc;

use crate::gpu::shaders;
use crate::gpu::uniforms::KernelUniforms;
use crate::kernel::{Program, MAX_INPUTS};

/// Cached compute pipelines, one per program.
pub struct PipelineCache {
    device: Arc<wgpu::Device>,
    bind_group_layout: wgpu::BindGroupLayout,
    layout: wgpu::PipelineLayout,
    pipelines: HashMap<Program, wgpu::ComputePipeline>,
}

impl PipelineCache {
    /// Creates an empty cache and the shared layouts.
    pub fn new(device: Arc<wgpu::Device>) -> Self {
        let bind_group_layout = Self::create_bind_group_layout(&device);
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("neurotex kernel layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        Self {
            device,
            bind_group_layout,
            layout,
            pipelines: HashMap::new(),
        }
    }

    fn create_bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
        let storage = |binding: u32, read_only: bool| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let mut entries = vec![wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: wgpu::BufferSize::new(KernelUniforms::size_bytes() as u64),
            },
            count: None,
        }];
        for slot in 0..MAX_INPUTS {
            entries.push(storage(1 + slot as u32, true));
        }
        entries.push(storage(TARGET_BINDING, false));

        device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("neurotex kernel bindings"),
            entries: &entries,
        })
    }

    /// Shared bind group layout.
    pub fn bind_group_layout(&self) -> &wgpu::BindGroupLayout {
        &self.bind_group_layout
    }

    /// Gets or builds the pipeline of a program.
    pub fn get(&mut self, program: Program) -> &wgpu::ComputePipeline {
        let device = &self.device;
        let layout = &self.layout;
        self.pipelines.entry(program).or_insert_with(|| {
            log::debug!("compiling kernel '{}'", program);
            let label = program.to_string();
            let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&label),
                source: wgpu::ShaderSource::Wgsl(shaders::source(program).into()),
            });
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(&label),
                layout: Some(layout),
                module: &module,
                entry_point: Some("main"),
                compilation_options: Default::default(),
                cache: None,
            })
        })
    }

    /// Number of compiled pipelines.
    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    /// Whether nothing has been compiled yet.
    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }
}

impl std::fmt::Debug for PipelineCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineCache")
            .field("pipelines", &self.pipelines.len())
            .finish()
    }
}

/// Binding index of the target buffer.
pub const TARGET_BINDING: u32 = 1 + MAX_INPUTS as u32;

/// Workgroups needed to cover `total` items.
#[inline]
pub fn workgroup_count(total: usize, workgroup_size: usize) -> u32 {
    total.div_ceil(workgroup_size) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workgroup_count() {
        assert_eq!(workgroup_count(1, 8), 1);
        assert_eq!(workgroup_count(8, 8), 1);
        assert_eq!(workgroup_count(9, 8), 2);
        assert_eq!(workgroup_count(256, 8), 32);
    }

    #[test]
    fn test_target_binding_follows_inputs() {
        assert_eq!(TARGET_BINDING, 5);
    }
}
