//! Test doubles for the camera and the persistence sink

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use image::GrayImage;
use parking_lot::Mutex;

use crate::camera::{CameraControl, Property, PropertyKind, PropertyValue};
use crate::error::CameraError;
use crate::frame::{Frame, FrameRecord};
use crate::sink::PersistenceSink;

type TriggerHook = Box<dyn Fn(u32) + Send + Sync>;

pub fn test_frame() -> Frame {
    Frame::gray8(GrayImage::new(4, 3))
}

/// Records property writes; software triggers are counted separately.
pub struct MockCamera {
    trigger_mode: PropertyKind,
    exposure_auto: PropertyKind,
    writes: Mutex<Vec<(Property, PropertyValue)>>,
    triggers: AtomicU32,
    fail_trigger_at: Option<u32>,
    on_trigger: Option<TriggerHook>,
}

impl MockCamera {
    pub fn enumerated() -> Self {
        MockCameraBuilder::new()
            .trigger_mode(PropertyKind::Enumerated)
            .build()
    }

    pub fn writes(&self) -> Vec<(Property, PropertyValue)> {
        self.writes.lock().clone()
    }

    pub fn triggers(&self) -> u32 {
        self.triggers.load(Ordering::SeqCst)
    }

    /// The last value written to `property`, if any.
    pub fn last(&self, property: Property) -> Option<PropertyValue> {
        self.writes
            .lock()
            .iter()
            .rev()
            .find(|(p, _)| *p == property)
            .map(|(_, v)| v.clone())
    }
}

impl CameraControl for MockCamera {
    fn property_kind(&self, property: Property) -> Result<PropertyKind, CameraError> {
        Ok(match property {
            Property::TriggerMode => self.trigger_mode,
            Property::SoftwareTrigger => PropertyKind::Button,
            Property::ExposureMax => PropertyKind::Integer,
            Property::ExposureAuto => self.exposure_auto,
            Property::GainAuto => PropertyKind::Boolean,
        })
    }

    fn set_property(&self, property: Property, value: PropertyValue) -> bool {
        if property != Property::SoftwareTrigger {
            self.writes.lock().push((property, value));
            return true;
        }
        let n = self.triggers.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_trigger_at == Some(n) {
            return false;
        }
        if let Some(hook) = &self.on_trigger {
            hook(n);
        }
        true
    }
}

pub struct MockCameraBuilder {
    trigger_mode: PropertyKind,
    exposure_auto: PropertyKind,
    fail_trigger_at: Option<u32>,
    on_trigger: Option<TriggerHook>,
}

impl MockCameraBuilder {
    pub fn new() -> Self {
        Self {
            trigger_mode: PropertyKind::Boolean,
            exposure_auto: PropertyKind::Boolean,
            fail_trigger_at: None,
            on_trigger: None,
        }
    }

    pub fn trigger_mode(mut self, kind: PropertyKind) -> Self {
        self.trigger_mode = kind;
        self
    }

    pub fn exposure_auto(mut self, kind: PropertyKind) -> Self {
        self.exposure_auto = kind;
        self
    }

    /// The n-th trigger (1-based) reports failure.
    pub fn fail_trigger_at(mut self, n: u32) -> Self {
        self.fail_trigger_at = Some(n);
        self
    }

    /// Called with the trigger number after every successful trigger.
    pub fn on_trigger(mut self, hook: impl Fn(u32) + Send + Sync + 'static) -> Self {
        self.on_trigger = Some(Box::new(hook));
        self
    }

    pub fn build(self) -> MockCamera {
        MockCamera {
            trigger_mode: self.trigger_mode,
            exposure_auto: self.exposure_auto,
            writes: Mutex::new(Vec::new()),
            triggers: AtomicU32::new(0),
            fail_trigger_at: self.fail_trigger_at,
            on_trigger: self.on_trigger,
        }
    }
}

/// Keeps records in memory; clones share the same list.
#[derive(Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<FrameRecord>>>,
    fail: bool,
}

impl MemorySink {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn records(&self) -> Vec<FrameRecord> {
        self.records.lock().clone()
    }
}

impl PersistenceSink for MemorySink {
    fn persist(&mut self, _frame: &Frame, record: &FrameRecord) -> Result<PathBuf> {
        if self.fail {
            bail!("disk full");
        }
        self.records.lock().push(record.clone());
        Ok(PathBuf::from(format!("{}.npy", record.file_stem())))
    }
}
