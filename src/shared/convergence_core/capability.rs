use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::config::SlotResolutionMode;
use super::disk_group::{DiskGroup, Drive, DriveSlot, MediaKind};
use super::error::ValidationError;

/// Controllers that only build volumes spanning whole disk groups.
pub const FULL_DISK_ONLY_MODELS: &[&str] = &["PDUAL CP100"];

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityConstraint {
    pub raid_type: String,
    #[serde(default)]
    pub stripe_sizes: Vec<u64>,
    #[serde(default, rename = "stripeSizesHDD")]
    pub stripe_sizes_hdd: Vec<u64>,
    #[serde(default, rename = "stripeSizesSSD")]
    pub stripe_sizes_ssd: Vec<u64>,
    #[serde(default, rename = "stripeSizesNVMe")]
    pub stripe_sizes_nvme: Vec<u64>,
    #[serde(default)]
    pub minimum_drive_count: u32,
    #[serde(default)]
    pub maximum_drive_count: u32,
    #[serde(default)]
    pub minimum_span_count: u32,
    #[serde(default)]
    pub maximum_span_count: u32,
}

impl CapabilityConstraint {
    pub fn has_span_bounds(&self) -> bool {
        self.minimum_span_count != 0 || self.maximum_span_count != 0
    }

    /// A zero maximum leaves the span count unbounded above.
    pub fn allows_span_count(&self, count: usize) -> bool {
        let minimum = self.minimum_span_count as usize;
        let maximum = self.maximum_span_count as usize;
        count >= minimum && (maximum == 0 || count <= maximum)
    }

    pub fn sizes_for(&self, media: MediaKind) -> &[u64] {
        match media {
            MediaKind::Hdd => &self.stripe_sizes_hdd,
            MediaKind::Ssd => &self.stripe_sizes_ssd,
            MediaKind::Nvme => &self.stripe_sizes_nvme,
            MediaKind::Unknown => &[],
        }
    }

    pub fn minimum_drives_per_group(&self) -> u32 {
        self.minimum_drive_count / self.minimum_span_count.max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityList {
    #[serde(default)]
    pub raid_levels: Vec<CapabilityConstraint>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeRequest {
    pub raid_type: String,
    pub stripe_size: u64,
    pub disk_groups: Vec<DiskGroup>,
    #[serde(default)]
    pub capacity_bytes: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerInventory {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub drives: Vec<Drive>,
    #[serde(default)]
    pub capabilities: Vec<CapabilityConstraint>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CapabilityValidator {
    slot_resolution: SlotResolutionMode,
}

impl CapabilityValidator {
    pub fn new(slot_resolution: SlotResolutionMode) -> Self {
        Self { slot_resolution }
    }

    pub fn validate(
        &self,
        request: &VolumeRequest,
        controller: &ControllerInventory,
    ) -> Result<Vec<DiskGroup>, ValidationError> {
        let (groups, media) = self.resolve_slots(&request.disk_groups, &controller.drives)?;
        let constraint = find_constraint(&request.raid_type, &controller.capabilities)?;
        check_stripe_size(constraint, request.stripe_size, &media)?;
        check_span_layout(constraint, &groups)?;
        check_model_capacity(&controller.model, request.capacity_bytes)?;

        debug!(
            raid_type = %constraint.raid_type,
            stripe_size = request.stripe_size,
            groups = groups.len(),
            "volume request validated"
        );
        Ok(groups)
    }

    fn resolve_slots(
        &self,
        requested: &[DiskGroup],
        drives: &[Drive],
    ) -> Result<(Vec<DiskGroup>, BTreeSet<MediaKind>), ValidationError> {
        if requested.is_empty() {
            return Err(ValidationError::NoDiskGroups);
        }

        let inventory = index_inventory(drives);
        let mut media = BTreeSet::new();
        let mut groups = Vec::with_capacity(requested.len());

        for (group_index, group) in requested.iter().enumerate() {
            if group.is_empty() {
                return Err(ValidationError::EmptyGroup { group: group_index });
            }

            let mut resolved = DiskGroup::new(group.slots.clone());
            for slot in &group.slots {
                match inventory.iter().find(|(candidate, _)| candidate == slot) {
                    Some((_, drive)) => {
                        resolved.drive_ids.push(drive.id.clone());
                        media.insert(drive.media());
                    }
                    None => match self.slot_resolution {
                        SlotResolutionMode::Strict => {
                            return Err(ValidationError::UnresolvedSlot {
                                group: group_index,
                                slot: slot.to_string(),
                            });
                        }
                        SlotResolutionMode::Lenient => {
                            warn!(
                                group = group_index,
                                %slot,
                                "requested slot does not match any controller drive"
                            );
                        }
                    },
                }
            }
            groups.push(resolved);
        }

        Ok((groups, media))
    }
}

/// Lenient slot resolution, no model restriction and no explicit capacity.
/// The RAID type must equal an advertised `raidType` exactly, case included.
pub fn validate_volume_request(
    raid_type: &str,
    stripe_size: u64,
    groups: &[DiskGroup],
    inventory: &[Drive],
    capabilities: &[CapabilityConstraint],
) -> Result<Vec<DiskGroup>, ValidationError> {
    let request = VolumeRequest {
        raid_type: raid_type.to_string(),
        stripe_size,
        disk_groups: groups.to_vec(),
        capacity_bytes: None,
    };
    let controller = ControllerInventory {
        model: String::new(),
        drives: inventory.to_vec(),
        capabilities: capabilities.to_vec(),
    };
    CapabilityValidator::default().validate(&request, &controller)
}

fn index_inventory(drives: &[Drive]) -> Vec<(DriveSlot, &Drive)> {
    drives
        .iter()
        .filter_map(|drive| match drive.slot() {
            Ok(slot) => Some((slot, drive)),
            Err(error) => {
                warn!(drive = %drive.id, %error, "skipping drive with unreadable location");
                None
            }
        })
        .collect()
}

fn find_constraint<'c>(
    raid_type: &str,
    capabilities: &'c [CapabilityConstraint],
) -> Result<&'c CapabilityConstraint, ValidationError> {
    capabilities
        .iter()
        .find(|constraint| constraint.raid_type == raid_type)
        .ok_or_else(|| ValidationError::UnsupportedRaidType {
            raid_type: raid_type.to_string(),
            supported: capabilities
                .iter()
                .map(|constraint| constraint.raid_type.clone())
                .collect(),
        })
}

fn check_stripe_size(
    constraint: &CapabilityConstraint,
    requested: u64,
    media: &BTreeSet<MediaKind>,
) -> Result<(), ValidationError> {
    let (allowed, media_label) = if !constraint.stripe_sizes.is_empty() {
        (constraint.stripe_sizes.as_slice(), "any".to_string())
    } else {
        let kind = single_media_kind(constraint, media)?;
        (constraint.sizes_for(kind), kind.to_string())
    };

    if allowed.contains(&requested) {
        return Ok(());
    }
    Err(ValidationError::StripeSizeNotAllowed {
        raid_type: constraint.raid_type.clone(),
        requested,
        media: media_label,
        allowed: allowed.to_vec(),
    })
}

fn single_media_kind(
    constraint: &CapabilityConstraint,
    media: &BTreeSet<MediaKind>,
) -> Result<MediaKind, ValidationError> {
    let undetermined = |reason: String| ValidationError::MediaTypeUndetermined {
        raid_type: constraint.raid_type.clone(),
        reason,
    };

    let mut kinds = media.iter().copied();
    let kind = match (kinds.next(), kinds.next()) {
        (None, _) => return Err(undetermined("none of the requested drives was resolved".to_string())),
        (Some(kind), None) => kind,
        (Some(_), Some(_)) => {
            let labels = media
                .iter()
                .map(|kind| kind.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            return Err(undetermined(format!("requested drives mix media types ({labels})")));
        }
    };

    if kind == MediaKind::Unknown {
        return Err(undetermined(
            "requested drives report a media type other than HDD, SSD or NVMe".to_string(),
        ));
    }
    Ok(kind)
}

fn check_span_layout(
    constraint: &CapabilityConstraint,
    groups: &[DiskGroup],
) -> Result<(), ValidationError> {
    if !constraint.has_span_bounds() {
        if groups.len() != 1 {
            return Err(ValidationError::SingleGroupRequired {
                raid_type: constraint.raid_type.clone(),
                actual: groups.len(),
            });
        }
        return Ok(());
    }

    if !constraint.allows_span_count(groups.len()) {
        return Err(ValidationError::SpanCountOutOfRange {
            raid_type: constraint.raid_type.clone(),
            minimum: constraint.minimum_span_count,
            maximum: constraint.maximum_span_count,
            actual: groups.len(),
        });
    }

    let minimum = constraint.minimum_drives_per_group();
    for (index, group) in groups.iter().enumerate() {
        if group.len() < minimum as usize {
            return Err(ValidationError::TooFewDrivesInGroup {
                raid_type: constraint.raid_type.clone(),
                group: index,
                minimum,
                actual: group.len(),
            });
        }
    }
    Ok(())
}

fn check_model_capacity(model: &str, capacity_bytes: Option<u64>) -> Result<(), ValidationError> {
    let model = model.trim();
    let full_disk_only = FULL_DISK_ONLY_MODELS
        .iter()
        .any(|restricted| restricted.eq_ignore_ascii_case(model));
    if full_disk_only && capacity_bytes.is_some() {
        return Err(ValidationError::CapacityNotSupported {
            model: model.to_string(),
        });
    }
    Ok(())
}
