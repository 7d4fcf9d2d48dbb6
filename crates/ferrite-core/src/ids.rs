//! Strongly-typed identifiers for domain entities.
//!
//! All entity identifiers are store-assigned integers; the newtypes keep a
//! resource id from ever being passed where a job id is expected.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! define_id {
    ($name:ident) => {
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            Serialize,
            Deserialize,
            JsonSchema,
        )]
        #[serde(transparent)]
        pub struct $name(pub i32);

        impl $name {
            pub fn as_i32(&self) -> i32 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i32> for $name {
            fn from(id: i32) -> Self {
                Self(id)
            }
        }
    };
}

define_id!(PipelineId);
define_id!(JobId);
define_id!(ResourceId);
define_id!(VersionId);
define_id!(BuildId);

/// Identifier for an advisory lock in the shared store.
///
/// The high 32 bits carry the lock family, the low 32 bits the entity id,
/// so the named lease families can never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct LockId(pub i64);

impl LockId {
    const SCHEDULING: i64 = 1;
    const RESOURCE_CHECKING: i64 = 2;
    const BUILD_SCHEDULING: i64 = 3;

    pub fn pipeline_scheduling(pipeline: PipelineId) -> Self {
        Self::pack(Self::SCHEDULING, pipeline.0)
    }

    pub fn resource_checking_for_job(job: JobId) -> Self {
        Self::pack(Self::RESOURCE_CHECKING, job.0)
    }

    pub fn build_scheduling(build: BuildId) -> Self {
        Self::pack(Self::BUILD_SCHEDULING, build.0)
    }

    fn pack(family: i64, id: i32) -> Self {
        Self((family << 32) | (id as u32 as i64))
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_families_are_disjoint() {
        let scheduling = LockId::pipeline_scheduling(PipelineId(7));
        let checking = LockId::resource_checking_for_job(JobId(7));
        let build = LockId::build_scheduling(BuildId(7));

        assert_ne!(scheduling, checking);
        assert_ne!(scheduling, build);
        assert_ne!(checking, build);
    }

    #[test]
    fn test_lock_id_preserves_entity_id() {
        let lock = LockId::build_scheduling(BuildId(42));
        assert_eq!(lock.as_i64() & 0xffff_ffff, 42);
    }
}
