//! Core domain types and port traits

pub mod model;
pub mod ports;

pub use model::{
    HostContext, MountInfo, Provisioning, ScheduleSpec, Snapshot, Volume, VolumeOptions,
};
pub use ports::{
    ArrayClient, ArrayClientRef, ArrayVolumeDetail, ArrayVolumeSpec, HostAttach, HostAttachRef,
    MetadataRepository, MetadataRepositoryRef, ReachabilityProbe, ReachabilityProbeRef,
    TaskStatus,
};
