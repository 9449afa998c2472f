use ash::vk;

/// Region copies between two images.
#[derive(Clone, Debug)]
pub struct ImageCopy {
    pub src: vk::Image,
    pub src_layout: vk::ImageLayout,
    pub dst: vk::Image,
    pub dst_layout: vk::ImageLayout,
    pub regions: Vec<vk::ImageCopy>,
}

impl ImageCopy {
    pub fn new(src: vk::Image, dst: vk::Image) -> Self {
        Self {
            src,
            src_layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            dst,
            dst_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            regions: Vec::new(),
        }
    }

    pub fn with_layouts(mut self, src_layout: vk::ImageLayout, dst_layout: vk::ImageLayout) -> Self {
        self.src_layout = src_layout;
        self.dst_layout = dst_layout;
        self
    }

    /// Copies a full color mip level of `extent`.
    pub fn color_level(mut self, mip_level: u32, extent: vk::Extent3D) -> Self {
        let subresource = vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level,
            base_array_layer: 0,
            layer_count: 1,
        };
        self.regions.push(vk::ImageCopy {
            src_subresource: subresource,
            src_offset: vk::Offset3D::default(),
            dst_subresource: subresource,
            dst_offset: vk::Offset3D::default(),
            extent,
        });
        self
    }

    pub fn region(mut self, region: vk::ImageCopy) -> Self {
        self.regions.push(region);
        self
    }
}

/// Scaled region copies between two images. Blits execute on the graphics queue.
#[derive(Clone, Debug)]
pub struct ImageBlit {
    pub src: vk::Image,
    pub src_layout: vk::ImageLayout,
    pub dst: vk::Image,
    pub dst_layout: vk::ImageLayout,
    pub regions: Vec<vk::ImageBlit>,
    pub filter: vk::Filter,
}

impl ImageBlit {
    pub fn new(src: vk::Image, dst: vk::Image, filter: vk::Filter) -> Self {
        Self {
            src,
            src_layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            dst,
            dst_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            regions: Vec::new(),
            filter,
        }
    }

    pub fn with_layouts(mut self, src_layout: vk::ImageLayout, dst_layout: vk::ImageLayout) -> Self {
        self.src_layout = src_layout;
        self.dst_layout = dst_layout;
        self
    }

    /// Blits the color rectangle `src` of `src_level` onto `dst` of `dst_level`.
    pub fn color_rect(mut self, src_level: u32, src: vk::Rect2D, dst_level: u32, dst: vk::Rect2D) -> Self {
        let subresource = |mip_level| vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level,
            base_array_layer: 0,
            layer_count: 1,
        };
        let corners = |rect: vk::Rect2D| [
            vk::Offset3D { x: rect.offset.x, y: rect.offset.y, z: 0 },
            vk::Offset3D { x: rect.offset.x + rect.extent.width as i32, y: rect.offset.y + rect.extent.height as i32, z: 1 },
        ];

        self.regions.push(vk::ImageBlit {
            src_subresource: subresource(src_level),
            src_offsets: corners(src),
            dst_subresource: subresource(dst_level),
            dst_offsets: corners(dst),
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blit_rect_corners() {
        let rect = vk::Rect2D {
            offset: vk::Offset2D { x: 2, y: 4 },
            extent: vk::Extent2D { width: 16, height: 8 },
        };
        let blit = ImageBlit::new(vk::Image::null(), vk::Image::null(), vk::Filter::LINEAR).color_rect(0, rect, 1, rect);

        let region = &blit.regions[0];
        assert_eq!((region.src_offsets[1].x, region.src_offsets[1].y, region.src_offsets[1].z), (18, 12, 1));
        assert_eq!(region.dst_subresource.mip_level, 1);
    }
}
