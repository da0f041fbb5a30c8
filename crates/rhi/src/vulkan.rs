//! [`GpuBackend`] implementation on top of Vulkan 1.3.
//!
//! The backend owns one surface, one swapchain and at most one depth target.
//! Rendering uses dynamic rendering and synchronization2 barriers, so there
//! are no render pass or framebuffer objects.
//!
//! Objects handed out as raw `vk` handles are owned by lookup tables inside
//! [`VulkanBackend`]; `destroy_*` removes the entry and the RAII wrapper
//! releases the Vulkan object. Whatever is still alive when the backend is
//! dropped is released after a device-wide idle wait.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use tracing::{debug, info, warn};

use crate::backend::{
    AcquireResult, BufferUsage, ClearValues, DrawCall, FenceStatus, GpuBackend, ImageState,
    MeshBinding, PipelineDesc, PresentResult, SlotHandles, SubmitDesc, SurfaceInfo,
    SwapchainDesc,
};
use crate::buffer::{Buffer, BufferPlacement};
use crate::command::{CommandBuffer, CommandPool};
use crate::depth::{DEPTH_FORMAT, DepthTarget};
use crate::descriptor::{DescriptorPool, DescriptorSetLayout, write_uniform_sets};
use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;
use crate::physical_device::select_physical_device;
use crate::pipeline::{GraphicsPipelineBuilder, Pipeline, PipelineLayout};
use crate::shader::{Shader, ShaderStage};
use crate::swapchain::Swapchain;
use crate::sync::{Fence, Semaphore};
use crate::vertex;

/// A pipeline together with the layouts its descriptor sets are built from.
struct GraphicsPipeline {
    pipeline: Pipeline,
    layout: PipelineLayout,
    set_layout: DescriptorSetLayout,
}

struct DescriptorSetGroup {
    _pool: DescriptorPool,
    sets: Vec<vk::DescriptorSet>,
}

/// Static buffer copies recorded but not yet submitted.
struct PendingUpload {
    command_buffer: vk::CommandBuffer,
    staging: Vec<Buffer>,
}

/// A submitted upload batch. Staging memory is released once the fence
/// signals. The semaphore lives until a frame submission has waited on it
/// and the device has gone idle after that.
struct InFlightUpload {
    command_buffer: Option<vk::CommandBuffer>,
    staging: Vec<Buffer>,
    fence: Fence,
    semaphore: Semaphore,
    consumed: bool,
}

/// Vulkan implementation of [`GpuBackend`].
pub struct VulkanBackend {
    command_buffers: HashSet<vk::CommandBuffer>,
    fences: HashMap<vk::Fence, Fence>,
    semaphores: HashMap<vk::Semaphore, Semaphore>,
    buffers: HashMap<vk::Buffer, Buffer>,
    pipelines: HashMap<vk::Pipeline, GraphicsPipeline>,
    descriptor_sets: HashMap<vk::DescriptorPool, DescriptorSetGroup>,
    pending_upload: Option<PendingUpload>,
    uploads: Vec<InFlightUpload>,
    depth: Option<DepthTarget>,
    swapchain: Option<Swapchain>,
    command_pool: Option<CommandPool>,
    device: Arc<Device>,
    surface: vk::SurfaceKHR,
    surface_loader: ash::khr::surface::Instance,
    instance: Instance,
    device_name: String,
}

impl VulkanBackend {
    /// Creates the instance, a surface for the window, picks a GPU and
    /// creates the logical device and command pool.
    ///
    /// No swapchain exists until [`GpuBackend::create_swapchain`] is called.
    ///
    /// # Errors
    ///
    /// [`RhiError::LoadingError`] when no Vulkan loader is installed,
    /// [`RhiError::SurfaceError`] when the window cannot be rendered to,
    /// [`RhiError::NoSuitableGpu`] when no device qualifies.
    pub fn new(
        display: RawDisplayHandle,
        window: RawWindowHandle,
        enable_validation: bool,
    ) -> RhiResult<Self> {
        let instance = Instance::new(Some(display), enable_validation)?;

        let surface = unsafe {
            ash_window::create_surface(instance.entry(), instance.handle(), display, window, None)
        }
        .map_err(|e| RhiError::SurfaceError(format!("failed to create surface: {}", e)))?;
        let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());

        let setup = select_physical_device(instance.handle(), surface, &surface_loader)
            .and_then(|info| {
                let device = Device::new(&instance, &info)?;
                let pool = CommandPool::new(device.clone(), device.queue_families().graphics)?;
                Ok((info, device, pool))
            });
        let (info, device, command_pool) = match setup {
            Ok(setup) => setup,
            Err(e) => {
                unsafe { surface_loader.destroy_surface(surface, None) };
                return Err(e);
            }
        };

        info!("Vulkan backend ready on '{}'", info.device_name());

        Ok(Self {
            command_buffers: HashSet::new(),
            fences: HashMap::new(),
            semaphores: HashMap::new(),
            buffers: HashMap::new(),
            pipelines: HashMap::new(),
            descriptor_sets: HashMap::new(),
            pending_upload: None,
            uploads: Vec::new(),
            depth: None,
            swapchain: None,
            command_pool: Some(command_pool),
            device,
            surface,
            surface_loader,
            device_name: info.device_name().to_owned(),
            instance,
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn swapchain_format(&self) -> Option<vk::Format> {
        self.swapchain.as_ref().map(Swapchain::format)
    }

    pub fn has_validation(&self) -> bool {
        self.instance.has_validation()
    }

    fn swapchain(&self) -> RhiResult<&Swapchain> {
        self.swapchain
            .as_ref()
            .ok_or_else(|| RhiError::InvalidOperation("no swapchain".into()))
    }

    fn command_pool(&self) -> RhiResult<&CommandPool> {
        self.command_pool
            .as_ref()
            .ok_or_else(|| RhiError::InvalidOperation("command pool destroyed".into()))
    }

    fn recorder(&self, cmd: vk::CommandBuffer) -> RhiResult<CommandBuffer> {
        if self.command_buffers.contains(&cmd) {
            Ok(CommandBuffer::from_handle(self.device.clone(), cmd))
        } else {
            Err(RhiError::InvalidHandle(format!("command buffer {:?}", cmd)))
        }
    }

    fn pipeline(&self, pipeline: vk::Pipeline) -> RhiResult<&GraphicsPipeline> {
        self.pipelines
            .get(&pipeline)
            .ok_or_else(|| RhiError::InvalidHandle(format!("pipeline {:?}", pipeline)))
    }

    fn is_upload_semaphore(&self, semaphore: vk::Semaphore) -> bool {
        self.uploads.iter().any(|u| u.semaphore.handle() == semaphore)
    }

    /// Releases staging memory and command buffers of finished uploads.
    fn reclaim_finished_uploads(&mut self) -> RhiResult<()> {
        for upload in &mut self.uploads {
            if upload.command_buffer.is_some() && upload.fence.is_signaled()? {
                if let (Some(cmd), Some(pool)) =
                    (upload.command_buffer.take(), self.command_pool.as_ref())
                {
                    pool.free(&[cmd]);
                }
                let released = upload.staging.len();
                upload.staging.clear();
                debug!("Released {} staging buffer(s)", released);
            }
        }
        Ok(())
    }

    fn color_barrier(
        image: vk::Image,
        from: ImageState,
        to: ImageState,
    ) -> RhiResult<vk::ImageMemoryBarrier2<'static>> {
        let range = vk::ImageSubresourceRange::default()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .level_count(1)
            .layer_count(1);
        let barrier = match (from, to) {
            // The previous contents are cleared, so the old layout is discarded.
            (ImageState::Present, ImageState::RenderTarget) => vk::ImageMemoryBarrier2::default()
                .src_stage_mask(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT)
                .src_access_mask(vk::AccessFlags2::NONE)
                .dst_stage_mask(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT)
                .dst_access_mask(vk::AccessFlags2::COLOR_ATTACHMENT_WRITE)
                .old_layout(vk::ImageLayout::UNDEFINED)
                .new_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
            (ImageState::RenderTarget, ImageState::Present) => vk::ImageMemoryBarrier2::default()
                .src_stage_mask(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT)
                .src_access_mask(vk::AccessFlags2::COLOR_ATTACHMENT_WRITE)
                .dst_stage_mask(vk::PipelineStageFlags2::BOTTOM_OF_PIPE)
                .dst_access_mask(vk::AccessFlags2::NONE)
                .old_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                .new_layout(vk::ImageLayout::PRESENT_SRC_KHR),
            (from, to) => {
                return Err(RhiError::InvalidOperation(format!(
                    "no transition from {:?} to {:?}",
                    from, to
                )));
            }
        };
        Ok(barrier.image(image).subresource_range(range))
    }
}

impl GpuBackend for VulkanBackend {
    type CommandBuffer = vk::CommandBuffer;
    type Fence = vk::Fence;
    type Semaphore = vk::Semaphore;
    type Buffer = vk::Buffer;
    type Pipeline = vk::Pipeline;
    type DescriptorSets = vk::DescriptorPool;

    fn name(&self) -> &'static str {
        "vulkan"
    }

    fn create_swapchain(&mut self, desc: &SwapchainDesc) -> RhiResult<SurfaceInfo> {
        if self.swapchain.is_some() {
            return Err(RhiError::InvalidOperation(
                "swapchain already exists".into(),
            ));
        }
        let swapchain = Swapchain::new(
            &self.instance,
            self.device.clone(),
            self.surface,
            &self.surface_loader,
            desc,
        )?;
        let info = SurfaceInfo {
            extent: swapchain.extent().into(),
            image_count: swapchain.image_count(),
        };
        self.swapchain = Some(swapchain);
        Ok(info)
    }

    fn destroy_swapchain(&mut self) {
        self.swapchain = None;
    }

    fn create_depth_target(&mut self) -> RhiResult<()> {
        let extent = self.swapchain()?.extent();
        self.depth = Some(DepthTarget::new(self.device.clone(), extent)?);
        Ok(())
    }

    fn destroy_depth_target(&mut self) {
        self.depth = None;
    }

    fn allocate_command_slots(
        &mut self,
        count: usize,
    ) -> RhiResult<Vec<SlotHandles<Self::CommandBuffer, Self::Fence, Self::Semaphore>>> {
        let command_buffers = self.command_pool()?.allocate(count as u32)?;
        let mut slots = Vec::with_capacity(count);
        for command_buffer in command_buffers {
            self.command_buffers.insert(command_buffer);
            let fence = Fence::new(self.device.clone(), false)?;
            let semaphore = Semaphore::new(self.device.clone())?;
            slots.push(SlotHandles {
                command_buffer,
                fence: fence.handle(),
                semaphore: semaphore.handle(),
            });
            self.fences.insert(fence.handle(), fence);
            self.semaphores.insert(semaphore.handle(), semaphore);
        }
        debug!("Allocated {} frame slot(s)", slots.len());
        Ok(slots)
    }

    fn release_command_slots(
        &mut self,
        slots: &[SlotHandles<Self::CommandBuffer, Self::Fence, Self::Semaphore>],
    ) {
        let handles: Vec<vk::CommandBuffer> = slots
            .iter()
            .map(|slot| slot.command_buffer)
            .filter(|cmd| self.command_buffers.remove(cmd))
            .collect();
        if let Some(pool) = self.command_pool.as_ref() {
            pool.free(&handles);
        }
        for slot in slots {
            self.fences.remove(&slot.fence);
            self.semaphores.remove(&slot.semaphore);
        }
    }

    fn create_semaphore(&mut self) -> RhiResult<Self::Semaphore> {
        let semaphore = Semaphore::new(self.device.clone())?;
        let handle = semaphore.handle();
        self.semaphores.insert(handle, semaphore);
        Ok(handle)
    }

    fn destroy_semaphore(&mut self, semaphore: Self::Semaphore) {
        if self.semaphores.remove(&semaphore).is_none() {
            warn!("destroy_semaphore: unknown semaphore {:?}", semaphore);
        }
    }

    fn fence_status(&mut self, fence: Self::Fence) -> RhiResult<FenceStatus> {
        let fence = self
            .fences
            .get(&fence)
            .ok_or_else(|| RhiError::InvalidHandle(format!("fence {:?}", fence)))?;
        Ok(if fence.is_signaled()? {
            FenceStatus::Signaled
        } else {
            FenceStatus::Unsignaled
        })
    }

    fn wait_for_fence(&mut self, fence: Self::Fence) -> RhiResult<()> {
        self.fences
            .get(&fence)
            .ok_or_else(|| RhiError::InvalidHandle(format!("fence {:?}", fence)))?
            .wait(u64::MAX)
    }

    fn reset_fence(&mut self, fence: Self::Fence) -> RhiResult<()> {
        self.fences
            .get(&fence)
            .ok_or_else(|| RhiError::InvalidHandle(format!("fence {:?}", fence)))?
            .reset()
    }

    fn wait_idle(&mut self) -> RhiResult<()> {
        self.device.wait_idle()?;
        let pool = self.command_pool.as_ref();
        for upload in &mut self.uploads {
            if let (Some(cmd), Some(pool)) = (upload.command_buffer.take(), pool) {
                pool.free(&[cmd]);
            }
            upload.staging.clear();
        }
        // A semaphore nobody has waited on yet is still owed to a frame.
        let before = self.uploads.len();
        self.uploads.retain(|upload| !upload.consumed);
        let reclaimed = before - self.uploads.len();
        if reclaimed > 0 {
            debug!("Reclaimed {} upload batch(es)", reclaimed);
        }
        Ok(())
    }

    fn create_uniform_buffer(&mut self, size: u64) -> RhiResult<Self::Buffer> {
        let buffer = Buffer::new(self.device.clone(), BufferPlacement::Uniform, size)?;
        let handle = buffer.handle();
        self.buffers.insert(handle, buffer);
        Ok(handle)
    }

    fn update_mapped_buffer(&mut self, buffer: Self::Buffer, data: &[u8]) -> RhiResult<()> {
        let target = self
            .buffers
            .get(&buffer)
            .ok_or_else(|| RhiError::InvalidHandle(format!("buffer {:?}", buffer)))?;
        if target.placement() != BufferPlacement::Uniform {
            return Err(RhiError::InvalidOperation(format!(
                "{} buffer is not host-visible",
                target.placement().name()
            )));
        }
        target.write_data(0, data)
    }

    fn upload_static_buffer(
        &mut self,
        usage: BufferUsage,
        data: &[u8],
    ) -> RhiResult<Self::Buffer> {
        let staging =
            Buffer::new_with_data(self.device.clone(), BufferPlacement::Staging, data)?;
        let buffer = Buffer::new(
            self.device.clone(),
            BufferPlacement::Static(usage),
            data.len() as vk::DeviceSize,
        )?;

        if self.pending_upload.is_none() {
            let command_buffer = self
                .command_pool()?
                .allocate(1)?
                .into_iter()
                .next()
                .ok_or_else(|| RhiError::InvalidOperation("no upload command buffer".into()))?;
            CommandBuffer::from_handle(self.device.clone(), command_buffer).begin()?;
            self.pending_upload = Some(PendingUpload {
                command_buffer,
                staging: Vec::new(),
            });
        }
        if let Some(pending) = self.pending_upload.as_mut() {
            CommandBuffer::from_handle(self.device.clone(), pending.command_buffer).copy_buffer(
                staging.handle(),
                buffer.handle(),
                buffer.size(),
            );
            pending.staging.push(staging);
        }

        let handle = buffer.handle();
        debug!("Queued {} byte {} upload", data.len(), usage.name());
        self.buffers.insert(handle, buffer);
        Ok(handle)
    }

    fn flush_resource_updates(&mut self) -> RhiResult<Option<Self::Semaphore>> {
        self.reclaim_finished_uploads()?;
        let Some(pending) = self.pending_upload.take() else {
            return Ok(None);
        };

        CommandBuffer::from_handle(self.device.clone(), pending.command_buffer).end()?;
        let fence = Fence::new(self.device.clone(), false)?;
        let semaphore = Semaphore::new(self.device.clone())?;

        let command_buffers = [pending.command_buffer];
        let signal = [semaphore.handle()];
        let submit = vk::SubmitInfo::default()
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal);
        unsafe { self.device.submit_graphics(&[submit], fence.handle())? };

        info!(
            "Submitted upload batch with {} buffer copy(ies)",
            pending.staging.len()
        );
        let handle = semaphore.handle();
        self.uploads.push(InFlightUpload {
            command_buffer: Some(pending.command_buffer),
            staging: pending.staging,
            fence,
            semaphore,
            consumed: false,
        });
        Ok(Some(handle))
    }

    fn destroy_buffer(&mut self, buffer: Self::Buffer) {
        if self.buffers.remove(&buffer).is_none() {
            warn!("destroy_buffer: unknown buffer {:?}", buffer);
        }
    }

    fn create_pipeline(&mut self, desc: &PipelineDesc<'_>) -> RhiResult<Self::Pipeline> {
        let color_format = self.swapchain()?.format();

        let vertex_shader =
            Shader::from_glsl(self.device.clone(), desc.vertex_shader, ShaderStage::Vertex)?;
        let fragment_shader = Shader::from_glsl(
            self.device.clone(),
            desc.fragment_shader,
            ShaderStage::Fragment,
        )?;
        let set_layout = DescriptorSetLayout::uniform_buffer(self.device.clone())?;
        let layout = PipelineLayout::new(self.device.clone(), &[set_layout.handle()])?;

        let binding = vertex::binding_description(&desc.vertex_layout);
        let attributes = vertex::attribute_descriptions(&desc.vertex_layout);
        let mut builder = GraphicsPipelineBuilder::new()
            .label(desc.label)
            .vertex_shader(&vertex_shader)
            .fragment_shader(&fragment_shader)
            .vertex_input(binding, &attributes)
            .cull_mode(desc.cull_mode)
            .color_attachment_format(color_format);
        if let Some(depth) = desc.depth {
            builder = builder.depth(depth, DEPTH_FORMAT);
        }
        let pipeline = builder.build(self.device.clone(), &layout)?;

        let handle = pipeline.handle();
        self.pipelines.insert(
            handle,
            GraphicsPipeline {
                pipeline,
                layout,
                set_layout,
            },
        );
        Ok(handle)
    }

    fn destroy_pipeline(&mut self, pipeline: Self::Pipeline) {
        match self.pipelines.remove(&pipeline) {
            Some(entry) => debug!("Releasing pipeline {:?}", entry.pipeline.handle()),
            None => warn!("destroy_pipeline: unknown pipeline {:?}", pipeline),
        }
    }

    fn create_descriptor_sets(
        &mut self,
        pipeline: Self::Pipeline,
        uniform_buffers: &[Self::Buffer],
    ) -> RhiResult<Self::DescriptorSets> {
        for buffer in uniform_buffers {
            if !self.buffers.contains_key(buffer) {
                return Err(RhiError::InvalidHandle(format!("buffer {:?}", buffer)));
            }
        }
        let set_layout = self.pipeline(pipeline)?.set_layout.handle();
        let pool = DescriptorPool::for_uniform_sets(
            self.device.clone(),
            uniform_buffers.len() as u32,
        )?;
        let layouts = vec![set_layout; uniform_buffers.len()];
        let sets = pool.allocate(&layouts)?;
        write_uniform_sets(&self.device, &sets, uniform_buffers);

        let handle = pool.handle();
        self.descriptor_sets
            .insert(handle, DescriptorSetGroup { _pool: pool, sets });
        Ok(handle)
    }

    fn destroy_descriptor_sets(&mut self, sets: Self::DescriptorSets) {
        if self.descriptor_sets.remove(&sets).is_none() {
            warn!("destroy_descriptor_sets: unknown group {:?}", sets);
        }
    }

    fn reset_command_buffer(&mut self, cmd: Self::CommandBuffer) -> RhiResult<()> {
        self.recorder(cmd)?.reset()
    }

    fn begin_commands(&mut self, cmd: Self::CommandBuffer) -> RhiResult<()> {
        self.recorder(cmd)?.begin()
    }

    fn end_commands(&mut self, cmd: Self::CommandBuffer) -> RhiResult<()> {
        self.recorder(cmd)?.end()
    }

    fn cmd_transition_image(
        &mut self,
        cmd: Self::CommandBuffer,
        image_index: u32,
        from: ImageState,
        to: ImageState,
    ) -> RhiResult<()> {
        let (image, _) = self.swapchain()?.image(image_index)?;
        let barrier = Self::color_barrier(image, from, to)?;
        self.recorder(cmd)?.image_barriers(&[barrier]);
        Ok(())
    }

    fn cmd_begin_pass(
        &mut self,
        cmd: Self::CommandBuffer,
        image_index: u32,
        clear: &ClearValues,
    ) -> RhiResult<()> {
        let recorder = self.recorder(cmd)?;
        let swapchain = self.swapchain()?;
        let (_, view) = swapchain.image(image_index)?;
        let extent = swapchain.extent();

        let color_attachments = [vk::RenderingAttachmentInfo::default()
            .image_view(view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: clear.color,
                },
            })];

        let depth_attachment = match (self.depth.as_ref(), clear.depth) {
            (Some(depth), Some(clear_depth)) => {
                let barrier = vk::ImageMemoryBarrier2::default()
                    .src_stage_mask(vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS)
                    .src_access_mask(vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE)
                    .dst_stage_mask(vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS)
                    .dst_access_mask(
                        vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ
                            | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
                    )
                    .old_layout(vk::ImageLayout::UNDEFINED)
                    .new_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
                    .image(depth.image())
                    .subresource_range(DepthTarget::subresource_range());
                recorder.image_barriers(&[barrier]);

                Some(
                    vk::RenderingAttachmentInfo::default()
                        .image_view(depth.image_view())
                        .image_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
                        .load_op(vk::AttachmentLoadOp::CLEAR)
                        .store_op(vk::AttachmentStoreOp::DONT_CARE)
                        .clear_value(vk::ClearValue {
                            depth_stencil: vk::ClearDepthStencilValue {
                                depth: clear_depth,
                                stencil: 0,
                            },
                        }),
                )
            }
            _ => None,
        };

        let mut rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .layer_count(1)
            .color_attachments(&color_attachments);
        if let Some(depth_attachment) = depth_attachment.as_ref() {
            rendering_info = rendering_info.depth_attachment(depth_attachment);
        }

        recorder.begin_rendering(&rendering_info);
        recorder.set_viewport_and_scissor(extent);
        Ok(())
    }

    fn cmd_bind_pipeline(
        &mut self,
        cmd: Self::CommandBuffer,
        pipeline: Self::Pipeline,
    ) -> RhiResult<()> {
        let handle = self.pipeline(pipeline)?.pipeline.handle();
        self.recorder(cmd)?.bind_graphics_pipeline(handle);
        Ok(())
    }

    fn cmd_bind_mesh(
        &mut self,
        cmd: Self::CommandBuffer,
        mesh: &MeshBinding<Self::Buffer>,
    ) -> RhiResult<()> {
        let recorder = self.recorder(cmd)?;
        if !self.buffers.contains_key(&mesh.vertex_buffer) {
            return Err(RhiError::InvalidHandle(format!(
                "vertex buffer {:?}",
                mesh.vertex_buffer
            )));
        }
        recorder.bind_vertex_buffer(mesh.vertex_buffer);
        if let Some((index_buffer, format)) = mesh.index_buffer {
            if !self.buffers.contains_key(&index_buffer) {
                return Err(RhiError::InvalidHandle(format!(
                    "index buffer {:?}",
                    index_buffer
                )));
            }
            recorder.bind_index_buffer(index_buffer, vertex::index_format_to_vk(format));
        }
        Ok(())
    }

    fn cmd_bind_descriptor_set(
        &mut self,
        cmd: Self::CommandBuffer,
        pipeline: Self::Pipeline,
        sets: Self::DescriptorSets,
        index: u32,
    ) -> RhiResult<()> {
        let layout = self.pipeline(pipeline)?.layout.handle();
        let set = self
            .descriptor_sets
            .get(&sets)
            .and_then(|group| group.sets.get(index as usize).copied())
            .ok_or_else(|| {
                RhiError::InvalidHandle(format!("descriptor set {} of {:?}", index, sets))
            })?;
        self.recorder(cmd)?.bind_descriptor_set(layout, set);
        Ok(())
    }

    fn cmd_draw(&mut self, cmd: Self::CommandBuffer, draw: DrawCall) -> RhiResult<()> {
        let recorder = self.recorder(cmd)?;
        match draw {
            DrawCall::Vertices { count } => recorder.draw(count),
            DrawCall::Indexed { count } => recorder.draw_indexed(count),
        }
        Ok(())
    }

    fn cmd_end_pass(&mut self, cmd: Self::CommandBuffer) -> RhiResult<()> {
        self.recorder(cmd)?.end_rendering();
        Ok(())
    }

    fn acquire_next_image(&mut self, semaphore: Self::Semaphore) -> RhiResult<AcquireResult> {
        if !self.semaphores.contains_key(&semaphore) {
            return Err(RhiError::InvalidHandle(format!(
                "semaphore {:?}",
                semaphore
            )));
        }
        self.swapchain()?.acquire_next_image(semaphore)
    }

    fn submit(
        &mut self,
        desc: &SubmitDesc<'_, Self::CommandBuffer, Self::Fence, Self::Semaphore>,
    ) -> RhiResult<()> {
        self.recorder(desc.command_buffer)?;
        let wait_stages: Vec<vk::PipelineStageFlags> = desc
            .wait_semaphores
            .iter()
            .map(|&semaphore| {
                if self.is_upload_semaphore(semaphore) {
                    vk::PipelineStageFlags::ALL_COMMANDS
                } else {
                    vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                }
            })
            .collect();
        let fence = match desc.signal_fence {
            Some(fence) if !self.fences.contains_key(&fence) => {
                return Err(RhiError::InvalidHandle(format!("fence {:?}", fence)));
            }
            Some(fence) => fence,
            None => vk::Fence::null(),
        };

        let command_buffers = [desc.command_buffer];
        let submit = vk::SubmitInfo::default()
            .wait_semaphores(desc.wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(desc.signal_semaphores);
        unsafe { self.device.submit_graphics(&[submit], fence)? };

        for upload in &mut self.uploads {
            if desc.wait_semaphores.contains(&upload.semaphore.handle()) {
                upload.consumed = true;
            }
        }
        Ok(())
    }

    fn present(
        &mut self,
        image_index: u32,
        wait_semaphores: &[Self::Semaphore],
    ) -> RhiResult<PresentResult> {
        let queue = self.device.present_queue();
        self.swapchain()?
            .present(queue, image_index, wait_semaphores)
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            warn!("wait_idle failed during backend teardown: {}", e);
        }
        self.pending_upload = None;
        self.uploads.clear();
        self.descriptor_sets.clear();
        self.pipelines.clear();
        self.buffers.clear();
        self.semaphores.clear();
        self.fences.clear();
        self.command_buffers.clear();
        self.depth = None;
        self.swapchain = None;
        self.command_pool = None;
        unsafe {
            self.surface_loader.destroy_surface(self.surface, None);
        }
        info!("Vulkan backend destroyed");
    }
}
