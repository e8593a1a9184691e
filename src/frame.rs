//! Frames delivered by the capture pipeline and the metadata of saved ones

use image::{GrayImage, ImageBuffer, Luma};

pub type Gray16Image = ImageBuffer<Luma<u16>, Vec<u16>>;

#[derive(Debug, Clone)]
pub enum FramePayload {
    Gray8(GrayImage),
    Gray16(Gray16Image),
}

/// One frame as handed over by the frame source.
#[derive(Debug, Clone)]
pub struct Frame {
    pub payload: FramePayload,
}

impl Frame {
    pub fn gray8(image: GrayImage) -> Self {
        Self {
            payload: FramePayload::Gray8(image),
        }
    }

    pub fn gray16(image: Gray16Image) -> Self {
        Self {
            payload: FramePayload::Gray16(image),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        match &self.payload {
            FramePayload::Gray8(img) => img.dimensions(),
            FramePayload::Gray16(img) => img.dimensions(),
        }
    }
}

/// Metadata attached to a frame admitted by the acquisition gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameRecord {
    pub sequence: u64,
    pub timestamp_ns: i64,
    pub prefix: String,
}

impl FrameRecord {
    /// `{prefix}_{timestamp_us}_{sequence}`
    pub fn file_stem(&self) -> String {
        format!(
            "{}_{}_{}",
            self.prefix,
            self.timestamp_ns.div_euclid(1000),
            self.sequence
        )
    }
}
