//! wgpu compute backend
//!
//! One compute pipeline per kernel, all built from the same shader module
//! with layouts derived from the entry points. Each dispatch is its own
//! submission; fences map onto submission indices.

use crate::capabilities::{query_capabilities, DeviceCapabilities};
use crate::{workgroup_count, SHADER_SOURCE};
use ripple_core::backend::{check_transfer, BufferId, Fence, FrameUniforms, KernelId};
use ripple_core::memory::AllocationLedger;
use ripple_core::{BackendError, ComputeBackend};
use std::collections::HashMap;
use std::sync::mpsc;

pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    capabilities: DeviceCapabilities,
    max_workgroups: u32,
    pipelines: HashMap<KernelId, wgpu::ComputePipeline>,
    uniforms: wgpu::Buffer,
    buffers: HashMap<BufferId, wgpu::Buffer>,
    /// Invalidated whenever a buffer is allocated or released.
    bind_groups: HashMap<KernelId, wgpu::BindGroup>,
    ledger: AllocationLedger,
    in_flight: Vec<(Fence, wgpu::SubmissionIndex)>,
    issued: u64,
}

impl WgpuBackend {
    /// Pick an adapter, open a device and build every kernel pipeline.
    pub fn new() -> Result<Self, BackendError> {
        pollster::block_on(Self::new_async())
    }

    pub async fn new_async() -> Result<Self, BackendError> {
        let instance = wgpu::Instance::default();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface: None,
            })
            .await
            .ok_or(BackendError::AdapterUnavailable)?;

        let capabilities = query_capabilities(&adapter);
        capabilities.check_solver_support()?;
        tracing::info!(
            "GPU adapter: {} ({:?})",
            capabilities.adapter_name,
            capabilities.backend
        );

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("ripple device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default().using_resolution(adapter.limits()),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await
            .map_err(|e| BackendError::DeviceRequest(e.to_string()))?;

        let pipelines = build_pipelines(&device).await?;
        let uniforms = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("frame uniforms"),
            size: std::mem::size_of::<FrameUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let max_workgroups = device.limits().max_compute_workgroups_per_dimension;

        Ok(Self {
            device,
            queue,
            capabilities,
            max_workgroups,
            pipelines,
            uniforms,
            buffers: HashMap::new(),
            bind_groups: HashMap::new(),
            ledger: AllocationLedger::new(),
            in_flight: Vec::new(),
            issued: 0,
        })
    }

    pub fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    pub fn ledger(&self) -> &AllocationLedger {
        &self.ledger
    }

    fn buffer(&self, id: BufferId) -> Result<&wgpu::Buffer, BackendError> {
        self.buffers.get(&id).ok_or(BackendError::UnallocatedBuffer(id))
    }

    fn check_bindings(&self, kernel: KernelId, u: &FrameUniforms, grid_size: u32) -> Result<(), BackendError> {
        let expected_grid = kernel.grid_size(u);
        if grid_size != expected_grid {
            return Err(BackendError::InvalidDispatch {
                kernel,
                reason: format!("grid size {grid_size}, expected {expected_grid}"),
            });
        }
        if workgroup_count(grid_size) > self.max_workgroups {
            return Err(BackendError::InvalidDispatch {
                kernel,
                reason: format!(
                    "{} workgroups exceed the device limit of {}",
                    workgroup_count(grid_size),
                    self.max_workgroups
                ),
            });
        }
        for &id in kernel.bindings() {
            let held = self.ledger.size_of(id).ok_or(BackendError::UnallocatedBuffer(id))?;
            let needed = id.bytes(u);
            if held != needed {
                return Err(BackendError::InvalidDispatch {
                    kernel,
                    reason: format!("{id} holds {held} bytes, expected {needed}"),
                });
            }
        }
        Ok(())
    }

    fn ensure_bind_group(&mut self, kernel: KernelId) -> Result<(), BackendError> {
        if self.bind_groups.contains_key(&kernel) {
            return Ok(());
        }
        let pipeline = self.pipeline(kernel)?;
        let mut entries = vec![wgpu::BindGroupEntry {
            binding: 0,
            resource: self.uniforms.as_entire_binding(),
        }];
        for &id in kernel.bindings() {
            entries.push(wgpu::BindGroupEntry {
                binding: id.binding(),
                resource: self.buffer(id)?.as_entire_binding(),
            });
        }
        let group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(kernel.entry_point()),
            layout: &pipeline.get_bind_group_layout(0),
            entries: &entries,
        });
        self.bind_groups.insert(kernel, group);
        Ok(())
    }

    fn pipeline(&self, kernel: KernelId) -> Result<&wgpu::ComputePipeline, BackendError> {
        self.pipelines
            .get(&kernel)
            .ok_or_else(|| BackendError::ShaderCompilation(format!("no pipeline for {kernel}")))
    }

    fn invalidate_bind_groups(&mut self) {
        self.bind_groups.clear();
    }
}

async fn build_pipelines(device: &wgpu::Device) -> Result<HashMap<KernelId, wgpu::ComputePipeline>, BackendError> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("pbf kernels"),
        source: wgpu::ShaderSource::Wgsl(SHADER_SOURCE.into()),
    });
    let pipelines = KernelId::ALL
        .iter()
        .map(|&kernel| {
            let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(kernel.entry_point()),
                layout: None,
                module: &module,
                entry_point: Some(kernel.entry_point()),
                compilation_options: Default::default(),
                cache: None,
            });
            (kernel, pipeline)
        })
        .collect();
    if let Some(error) = device.pop_error_scope().await {
        return Err(BackendError::ShaderCompilation(error.to_string()));
    }
    Ok(pipelines)
}

impl ComputeBackend for WgpuBackend {
    fn name(&self) -> &str {
        "wgpu"
    }

    fn allocate(&mut self, id: BufferId, elements: usize) -> Result<(), BackendError> {
        let bytes = elements * id.element_size();
        let limit = self.capabilities.max_storage_buffer_binding_size;
        if bytes as u64 > limit {
            return Err(BackendError::BufferTooLarge {
                buffer: id,
                bytes: bytes as u64,
                limit,
            });
        }
        self.ledger.record_allocation(id, bytes)?;
        // Zero-sized bindings are invalid; the ledger keeps the logical size.
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(id.label()),
            size: bytes.max(4) as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        self.buffers.insert(id, buffer);
        self.invalidate_bind_groups();
        tracing::debug!("allocated {id}: {bytes} bytes");
        Ok(())
    }

    fn upload(&mut self, id: BufferId, data: &[u8]) -> Result<(), BackendError> {
        let held = self.ledger.size_of(id).ok_or(BackendError::UnallocatedBuffer(id))?;
        check_transfer(id, held, data.len())?;
        self.queue.write_buffer(self.buffer(id)?, 0, data);
        Ok(())
    }

    fn download(&mut self, id: BufferId, out: &mut [u8]) -> Result<(), BackendError> {
        let held = self.ledger.size_of(id).ok_or(BackendError::UnallocatedBuffer(id))?;
        check_transfer(id, held, out.len())?;
        if held == 0 {
            return Ok(());
        }

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback staging"),
            size: held as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("readback") });
        encoder.copy_buffer_to_buffer(self.buffer(id)?, 0, &staging, 0, held as u64);
        self.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);

        match rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(BackendError::Readback {
                    buffer: id,
                    reason: e.to_string(),
                })
            }
            Err(e) => {
                return Err(BackendError::Readback {
                    buffer: id,
                    reason: e.to_string(),
                })
            }
        }
        {
            let data = slice.get_mapped_range();
            out.copy_from_slice(&data);
        }
        staging.unmap();
        Ok(())
    }

    fn dispatch(
        &mut self,
        kernel: KernelId,
        uniforms: &FrameUniforms,
        grid_size: u32,
    ) -> Result<Fence, BackendError> {
        self.check_bindings(kernel, uniforms, grid_size)?;
        self.queue
            .write_buffer(&self.uniforms, 0, bytemuck::bytes_of(uniforms));

        self.ensure_bind_group(kernel)?;
        let pipeline = self.pipeline(kernel)?;
        let bind_group = self
            .bind_groups
            .get(&kernel)
            .ok_or_else(|| BackendError::InvalidDispatch {
                kernel,
                reason: "bind group missing".into(),
            })?;

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(kernel.entry_point()),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(kernel.entry_point()),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, bind_group, &[]);
            pass.dispatch_workgroups(workgroup_count(grid_size), 1, 1);
        }
        let index = self.queue.submit(Some(encoder.finish()));

        self.issued += 1;
        let fence = Fence(self.issued);
        self.in_flight.push((fence, index));
        Ok(fence)
    }

    fn barrier(&mut self, fence: Fence) -> Result<(), BackendError> {
        if fence.0 == 0 || fence.0 > self.issued {
            return Err(BackendError::UnknownFence(fence));
        }
        // Submissions complete in order, so everything up to `fence` is done too.
        let split = self.in_flight.partition_point(|(f, _)| *f <= fence);
        if let Some((_, index)) = self.in_flight.drain(..split).last() {
            let _ = self.device.poll(wgpu::Maintain::WaitForSubmissionIndex(index));
        }
        Ok(())
    }

    fn release(&mut self, id: BufferId) -> Result<(), BackendError> {
        self.ledger.record_release(id)?;
        if let Some(buffer) = self.buffers.remove(&id) {
            buffer.destroy();
        }
        self.invalidate_bind_groups();
        if self.ledger.live_bytes() == 0 {
            tracing::debug!(
                peak_bytes = self.ledger.peak_bytes(),
                allocations = self.ledger.total_allocations(),
                "all device buffers released"
            );
        }
        Ok(())
    }

    fn is_allocated(&self, id: BufferId) -> bool {
        self.ledger.is_live(id)
    }

    fn live_bytes(&self) -> usize {
        self.ledger.live_bytes()
    }

    fn max_buffer_bytes(&self) -> Option<u64> {
        Some(self.capabilities.max_storage_buffer_binding_size)
    }
}
