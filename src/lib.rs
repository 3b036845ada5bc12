pub mod shared;

pub use shared::convergence_core::capability::{
    validate_volume_request, CapabilityConstraint, CapabilityList, CapabilityValidator,
    ControllerInventory, VolumeRequest,
};
pub use shared::convergence_core::client::{
    read_json, ClientFuture, ClientRequest, ClientResponse, HttpManagementClient,
    HttpSessionConnector, ManagementClient, RequestMethod, SessionConnector,
};
pub use shared::convergence_core::config::{BmcTargetConfig, SlotResolutionMode, SupervisionSettings};
pub use shared::convergence_core::disk_group::{DiskGroup, Drive, DriveSlot, MediaKind};
pub use shared::convergence_core::endpoint_lock::{EndpointLockGuard, EndpointLockRegistry, LockKey};
pub use shared::convergence_core::error::{ConvergeError, ValidationError};
pub use shared::convergence_core::poller::{
    diff_desired, poll_until_converged, ConvergencePoller, FieldMismatch,
};
pub use shared::convergence_core::reconnect::ReconnectSupervisor;
pub use shared::convergence_core::service::{ChangeOutcome, Completion, ConvergenceService};
pub use shared::convergence_core::task::{JobLog, TaskSupervisor};
pub use shared::convergence_core::wait::{PollStep, WaitBudget, Waiter};
pub use shared::convergence_core::{
    ChangeRequest, CompletionSignal, DesiredFields, JobState, TrackedJob,
};
