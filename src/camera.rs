//! Camera property surface used by the trigger controller
//!
//! The core only needs to know a control's kind and to write values. The
//! V4L2 backend drives the camera through the `v4l2-ctl` command.

use std::fmt;
use std::process::{Command, Output};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::CameraError;

/// Controls the daemon touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Property {
    TriggerMode,
    GainAuto,
    ExposureAuto,
    /// Write-only; writing `true` fires one exposure.
    SoftwareTrigger,
    /// Exposure ceiling in microseconds.
    ExposureMax,
}

impl Property {
    pub fn v4l2_name(self) -> &'static str {
        match self {
            Property::TriggerMode => "trigger_mode",
            Property::GainAuto => "gain_auto",
            Property::ExposureAuto => "exposure_auto",
            Property::SoftwareTrigger => "software_trigger",
            Property::ExposureMax => "exposure_time_max",
        }
    }

    /// Menu entry names for the on and off states of a switch control.
    fn menu_labels(self) -> (&'static str, &'static str) {
        match self {
            Property::ExposureAuto => ("Auto", "Manual"),
            _ => ("On", "Off"),
        }
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Property::TriggerMode => "Trigger Mode",
            Property::GainAuto => "Gain Auto",
            Property::ExposureAuto => "Exposure Auto",
            Property::SoftwareTrigger => "Software Trigger",
            Property::ExposureMax => "Exposure Max",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    Bool(bool),
    Enum(String),
    Int(i64),
}

/// Declared type of a control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    Boolean,
    Enumerated,
    Integer,
    Button,
}

/// How an on/off control has to be written, resolved once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Switch {
    property: Property,
    enumerated: bool,
}

impl Switch {
    pub fn resolve(camera: &dyn CameraControl, property: Property) -> Result<Self, CameraError> {
        let enumerated = match camera.property_kind(property)? {
            PropertyKind::Boolean => false,
            PropertyKind::Enumerated => true,
            other => {
                return Err(CameraError::UnsupportedKind {
                    name: property.to_string(),
                    kind: format!("{:?}", other),
                })
            }
        };
        Ok(Self {
            property,
            enumerated,
        })
    }

    /// Like [`Switch::resolve`], but a missing or odd control is written as
    /// a boolean and left to fail at write time.
    pub fn resolve_or_boolean(camera: &dyn CameraControl, property: Property) -> Self {
        Self::resolve(camera, property).unwrap_or_else(|e| {
            warn!("{}; writing {} as a boolean", e, property);
            Self {
                property,
                enumerated: false,
            }
        })
    }

    pub fn is_enumerated(&self) -> bool {
        self.enumerated
    }

    pub fn value(self, on: bool) -> PropertyValue {
        if !self.enumerated {
            return PropertyValue::Bool(on);
        }
        let (on_label, off_label) = self.property.menu_labels();
        PropertyValue::Enum(if on { on_label } else { off_label }.to_string())
    }
}

/// Narrow contract offered by the capture pipeline.
pub trait CameraControl: Send + Sync {
    fn property_kind(&self, property: Property) -> Result<PropertyKind, CameraError>;

    /// Returns `false` when the camera rejected the write.
    fn set_property(&self, property: Property, value: PropertyValue) -> bool;
}

/// Camera handle shared by the trigger controller and the idle watchdog.
#[derive(Clone)]
pub struct CameraSettings {
    camera: Arc<dyn CameraControl>,
    trigger_mode: Switch,
    gain_auto: Switch,
    exposure_auto: Switch,
}

impl CameraSettings {
    /// Looks up the switch control kinds; they are not queried again
    /// afterwards.
    pub fn new(camera: Arc<dyn CameraControl>) -> Result<Self, CameraError> {
        let trigger_mode = Switch::resolve(camera.as_ref(), Property::TriggerMode)?;
        let gain_auto = Switch::resolve_or_boolean(camera.as_ref(), Property::GainAuto);
        let exposure_auto = Switch::resolve_or_boolean(camera.as_ref(), Property::ExposureAuto);
        info!(
            "Trigger mode control is {}",
            if trigger_mode.is_enumerated() { "a menu" } else { "a boolean" }
        );
        Ok(Self {
            camera,
            trigger_mode,
            gain_auto,
            exposure_auto,
        })
    }

    /// Startup configuration: resolve control kinds and cap the exposure.
    pub fn open(camera: Arc<dyn CameraControl>, exposure_max_us: u32) -> Result<Self, CameraError> {
        let settings = Self::new(camera)?;
        settings.limit_exposure(exposure_max_us);
        Ok(settings)
    }

    fn set(&self, property: Property, value: PropertyValue) -> bool {
        debug!("{} <- {:?}", property, value);
        let ok = self.camera.set_property(property, value);
        if !ok {
            warn!("Camera rejected write to {}", property);
        }
        ok
    }

    pub fn limit_exposure(&self, max_us: u32) -> bool {
        self.set(Property::ExposureMax, PropertyValue::Int(i64::from(max_us)))
    }

    pub fn set_trigger_mode(&self, on: bool) -> bool {
        self.set(Property::TriggerMode, self.trigger_mode.value(on))
    }

    pub fn force_auto(&self) {
        self.set(Property::GainAuto, self.gain_auto.value(true));
        self.set(Property::ExposureAuto, self.exposure_auto.value(true));
    }

    /// Free-running, auto gain, auto exposure.
    pub fn restore_defaults(&self) {
        self.set_trigger_mode(false);
        self.force_auto();
    }

    pub fn trigger(&self) -> bool {
        self.camera
            .set_property(Property::SoftwareTrigger, PropertyValue::Bool(true))
    }
}

/// V4L2 backend driving controls through `v4l2-ctl`.
pub struct V4l2Camera {
    device: String,
}

impl V4l2Camera {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
        }
    }

    fn run_ctl(&self, args: &[&str]) -> Result<Output, CameraError> {
        let output = Command::new("v4l2-ctl")
            .args(["-d", &self.device])
            .args(args)
            .output()?;
        Ok(output)
    }
}

impl CameraControl for V4l2Camera {
    fn property_kind(&self, property: Property) -> Result<PropertyKind, CameraError> {
        let output = self.run_ctl(&["--list-ctrls"])?;
        if !output.status.success() {
            return Err(CameraError::Command(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        parse_control_kind(&String::from_utf8_lossy(&output.stdout), property.v4l2_name())
    }

    /// Tries each candidate encoding of `value` until one is accepted.
    fn set_property(&self, property: Property, value: PropertyValue) -> bool {
        for candidate in v4l2_values(property, &value) {
            let arg = format!("{}={}", property.v4l2_name(), candidate);
            match self.run_ctl(&["--set-ctrl", &arg]) {
                Ok(output) if output.status.success() => return true,
                Ok(output) => debug!(
                    "v4l2-ctl --set-ctrl {}: {}",
                    arg,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
                Err(e) => {
                    warn!("Could not run v4l2-ctl: {}", e);
                    return false;
                }
            }
        }
        false
    }
}

/// Menu controls take indices. Switch menus are `0 = Off, 1 = On`, except
/// `exposure_auto` where 0 is auto and 1 is manual; cameras without the
/// plain auto entry (most UVC devices) use 3, aperture priority.
fn v4l2_values(property: Property, value: &PropertyValue) -> Vec<String> {
    let index = |i: u8| vec![i.to_string()];
    match (property, value) {
        (_, PropertyValue::Bool(b)) => index(u8::from(*b)),
        (_, PropertyValue::Int(i)) => vec![i.to_string()],
        (Property::ExposureAuto, PropertyValue::Enum(s)) if s == "Auto" => {
            vec!["0".to_string(), "3".to_string()]
        }
        (Property::ExposureAuto, PropertyValue::Enum(s)) if s == "Manual" => index(1),
        (_, PropertyValue::Enum(s)) if s == "On" => index(1),
        (_, PropertyValue::Enum(s)) if s == "Off" => index(0),
        (_, PropertyValue::Enum(s)) => vec![s.clone()],
    }
}

/// Find `name` in `v4l2-ctl --list-ctrls` output, e.g.
/// `trigger_mode 0x0199e208 (bool)   : default=0 value=0`.
fn parse_control_kind(listing: &str, name: &str) -> Result<PropertyKind, CameraError> {
    let line = listing
        .lines()
        .find(|line| line.split_whitespace().next() == Some(name))
        .ok_or_else(|| CameraError::UnknownProperty(name.to_string()))?;

    let kind = line
        .split_once('(')
        .and_then(|(_, rest)| rest.split_once(')'))
        .map(|(kind, _)| kind.trim())
        .unwrap_or_default();

    match kind {
        "bool" => Ok(PropertyKind::Boolean),
        "menu" | "intmenu" => Ok(PropertyKind::Enumerated),
        "int" | "int64" => Ok(PropertyKind::Integer),
        "button" => Ok(PropertyKind::Button),
        other => Err(CameraError::UnsupportedKind {
            name: name.to_string(),
            kind: other.to_string(),
        }),
    }
}
