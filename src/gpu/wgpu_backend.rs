//! wgpu-backed texture allocation.

use anyhow::Result;
use log::debug;
use std::any::Any;
use std::sync::Arc;
use wgpu::{
    Device, Extent3d, ImageCopyTexture, ImageDataLayout, Origin3d, Queue, Texture, TextureAspect,
    TextureDescriptor, TextureDimension, TextureFormat, TextureUsages, TextureView,
    TextureViewDescriptor,
};

use super::{GpuBackend, TextureBacking, TextureHandle};

/// Texture and default view owned by a `TextureHandle`
pub struct WgpuTexture {
    pub texture: Texture,
    pub view: TextureView,
}

impl TextureBacking for WgpuTexture {
    fn destroy(&self) -> Result<()> {
        self.texture.destroy();
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Uploads slide images with `queue.write_texture`
pub struct WgpuBackend {
    device: Arc<Device>,
    queue: Arc<Queue>,
    format: TextureFormat,
}

impl WgpuBackend {
    pub fn new(device: Arc<Device>, queue: Arc<Queue>) -> Self {
        Self {
            device,
            queue,
            format: TextureFormat::Rgba8UnormSrgb,
        }
    }

    /// Returns the wgpu view behind a handle created by this backend
    pub fn view_of(texture: &TextureHandle) -> Option<&TextureView> {
        texture
            .backing()
            .as_any()
            .downcast_ref::<WgpuTexture>()
            .map(|t| &t.view)
    }
}

impl GpuBackend for WgpuBackend {
    fn name(&self) -> &str {
        "wgpu"
    }

    fn create_texture(&self, label: &str, width: u32, height: u32, rgba: &[u8]) -> Result<TextureHandle> {
        if width == 0 || height == 0 {
            anyhow::bail!("texture '{}' has zero size", label);
        }

        let limit = self.device.limits().max_texture_dimension_2d;
        if width > limit || height > limit {
            anyhow::bail!(
                "texture '{}' is {}x{}, device limit is {}",
                label,
                width,
                height,
                limit
            );
        }

        let size = Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };

        let texture = self.device.create_texture(&TextureDescriptor {
            label: Some(label),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format: self.format,
            usage: TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST,
            view_formats: &[],
        });

        self.queue.write_texture(
            ImageCopyTexture {
                texture: &texture,
                mip_level: 0,
                origin: Origin3d::ZERO,
                aspect: TextureAspect::All,
            },
            rgba,
            ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4 * width),
                rows_per_image: None,
            },
            size,
        );

        let view = texture.create_view(&TextureViewDescriptor::default());
        debug!("🆕 wgpu texture '{}' {}x{}", label, width, height);

        Ok(TextureHandle::new(
            label,
            width,
            height,
            Box::new(WgpuTexture { texture, view }),
        ))
    }
}
