//! steward-controller — the reconcile loop of the Steward control plane.
//!
//! Accepts application submissions, tracks every replica it has assigned,
//! and turns declared state plus lifecycle reports into documents that
//! replica managers and routers watch through long-poll.
//!
//! # Data Flow
//!
//! ```text
//! deploy_application / delete_application
//!   └── ControlState (applications → deployments → replicas)
//!
//! report_replica (started / stopped / start_failed / health_check)
//!   └── DeploymentStateMachine → ApplicationStateMachine
//!
//! reconcile_all
//!   ├── Autoscaler::desired_replicas → target
//!   ├── VersionReconciler::reconcile → plan
//!   └── VersionedKeyStore::put_json_if_changed
//!       ├── replicas:{app}/{deployment}
//!       ├── running_replicas:{app}/{deployment}
//!       ├── deployment_config:{app}/{deployment}
//!       └── endpoints
//! ```

pub mod controller;
pub mod error;
pub mod events;

pub use controller::{Controller, ControllerBuilder};
pub use error::{ControllerError, ControllerResult};
pub use events::{LoadSample, ReplicaEvent, ReplicaEventKind};
