use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::ValidationError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DriveSlot {
    pub system: String,
    pub controller: String,
    #[serde(default)]
    pub enclosure: Option<String>,
    pub slot: String,
}

impl DriveSlot {
    pub fn parse(descriptor: &str) -> Result<Self, ValidationError> {
        let parts = split_descriptor(descriptor)?;
        match parts.as_slice() {
            [system, controller, slot] => Ok(Self {
                system: system.to_string(),
                controller: controller.to_string(),
                enclosure: None,
                slot: slot.to_string(),
            }),
            [system, controller, enclosure, slot] => Ok(Self {
                system: system.to_string(),
                controller: controller.to_string(),
                enclosure: Some(enclosure.to_string()),
                slot: slot.to_string(),
            }),
            _ => Err(invalid(
                descriptor,
                format!("expected 3 or 4 `:`-separated fields, found {}", parts.len()),
            )),
        }
    }

    /// Parses `descriptor` using the field order named by `format`. An empty
    /// format falls back to the positional layouts of [`DriveSlot::parse`].
    pub fn parse_with_format(descriptor: &str, format: &str) -> Result<Self, ValidationError> {
        if format.trim().is_empty() {
            return Self::parse(descriptor);
        }

        let names = split_descriptor(format)?;
        let values = split_descriptor(descriptor)?;
        if names.len() != values.len() {
            return Err(invalid(
                descriptor,
                format!(
                    "location format `{format}` has {} fields, descriptor has {}",
                    names.len(),
                    values.len()
                ),
            ));
        }

        let mut system = None;
        let mut controller = None;
        let mut enclosure = None;
        let mut slot = None;
        for (name, value) in names.iter().zip(values.iter()) {
            let target = match name.to_ascii_lowercase().as_str() {
                "system" => &mut system,
                "controller" => &mut controller,
                "enclosure" => &mut enclosure,
                "slot" | "bay" => &mut slot,
                other => {
                    return Err(invalid(
                        descriptor,
                        format!("unknown location field `{other}` in format `{format}`"),
                    ))
                }
            };
            *target = Some(value.to_string());
        }

        let require = |field: Option<String>, name: &str| {
            field.ok_or_else(|| invalid(descriptor, format!("location format `{format}` has no {name}")))
        };
        Ok(Self {
            system: require(system, "System")?,
            controller: require(controller, "Controller")?,
            enclosure,
            slot: require(slot, "Slot")?,
        })
    }
}

impl FromStr for DriveSlot {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl fmt::Display for DriveSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.enclosure {
            Some(enclosure) => write!(
                f,
                "[{}:{}:{}:{}]",
                self.system, self.controller, enclosure, self.slot
            ),
            None => write!(f, "[{}:{}:{}]", self.system, self.controller, self.slot),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DiskGroup {
    pub slots: Vec<DriveSlot>,
    #[serde(default)]
    pub drive_ids: Vec<String>,
}

impl DiskGroup {
    pub fn new(slots: Vec<DriveSlot>) -> Self {
        Self {
            slots,
            drive_ids: Vec::new(),
        }
    }

    pub fn parse<I, S>(descriptors: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let slots = descriptors
            .into_iter()
            .map(|descriptor| DriveSlot::parse(descriptor.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(slots))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MediaKind {
    Hdd,
    Ssd,
    Nvme,
    Unknown,
}

impl MediaKind {
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "hdd" => MediaKind::Hdd,
            "ssd" => MediaKind::Ssd,
            "nvme" => MediaKind::Nvme,
            _ => MediaKind::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Hdd => "HDD",
            MediaKind::Ssd => "SSD",
            MediaKind::Nvme => "NVMe",
            MediaKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Drive {
    #[serde(default, alias = "@odata.id")]
    pub id: String,
    pub location_descriptor: String,
    #[serde(default)]
    pub location_format: String,
    #[serde(default)]
    pub media_type: String,
}

impl Drive {
    pub fn slot(&self) -> Result<DriveSlot, ValidationError> {
        DriveSlot::parse_with_format(&self.location_descriptor, &self.location_format)
    }

    pub fn media(&self) -> MediaKind {
        MediaKind::from_label(&self.media_type)
    }
}

fn split_descriptor(descriptor: &str) -> Result<Vec<&str>, ValidationError> {
    let trimmed = descriptor.trim();
    let inner = trimmed
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(trimmed);
    if inner.contains('[') || inner.contains(']') {
        return Err(invalid(descriptor, "unbalanced brackets".to_string()));
    }

    let parts = inner.split(':').map(str::trim).collect::<Vec<_>>();
    if parts.iter().any(|part| part.is_empty()) {
        return Err(invalid(descriptor, "empty location field".to_string()));
    }
    Ok(parts)
}

fn invalid(descriptor: &str, reason: String) -> ValidationError {
    ValidationError::InvalidLocation {
        descriptor: descriptor.to_string(),
        reason,
    }
}
