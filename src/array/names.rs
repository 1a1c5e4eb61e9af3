//! Deterministic array-side naming
//!
//! Array-side objects are named from the metadata record's UUID, not the
//! user's display name: display names can exceed the array's length limit
//! or collide after truncation. The UUID bytes are base64url-encoded
//! without padding (22 characters) and prefixed by object type, which keeps
//! every generated name fixed-length, collision-resistant, and within the
//! array's 31-character limit.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use uuid::Uuid;

/// Maximum object name length accepted by the array
pub const ARRAY_NAME_MAX_LEN: usize = 31;

/// Prefix for volumes
const VOLUME_PREFIX: &str = "dcv-";

/// Prefix for snapshots
const SNAPSHOT_PREFIX: &str = "dcs-";

/// Prefix for volume-sets
const VOLUME_SET_PREFIX: &str = "vvs-";

fn encode(id: &Uuid) -> String {
    URL_SAFE_NO_PAD.encode(id.as_bytes())
}

/// Array-side name for a volume record
pub fn volume_name(id: &Uuid) -> String {
    format!("{}{}", VOLUME_PREFIX, encode(id))
}

/// Array-side name for a snapshot record
pub fn snapshot_name(id: &Uuid) -> String {
    format!("{}{}", SNAPSHOT_PREFIX, encode(id))
}

/// Array-side name for a QoS/flash-cache volume-set
pub fn volume_set_name(id: &Uuid) -> String {
    format!("{}{}", VOLUME_SET_PREFIX, encode(id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_stable() {
        let id = Uuid::parse_str("67e55044-10b1-426f-9247-bb680e5fe0c8").unwrap();
        assert_eq!(volume_name(&id), volume_name(&id));
        assert_eq!(volume_name(&id), "dcv-Z-VQRBCxQm-SR7toDl_gyA");
    }

    #[test]
    fn test_names_fit_array_limit() {
        for _ in 0..100 {
            let id = Uuid::new_v4();
            for name in [volume_name(&id), snapshot_name(&id), volume_set_name(&id)] {
                assert!(name.len() <= ARRAY_NAME_MAX_LEN, "{} too long", name);
            }
        }
    }

    #[test]
    fn test_prefixes_distinguish_object_types() {
        let id = Uuid::new_v4();
        assert!(volume_name(&id).starts_with("dcv-"));
        assert!(snapshot_name(&id).starts_with("dcs-"));
        assert!(volume_set_name(&id).starts_with("vvs-"));
        assert_ne!(volume_name(&id), snapshot_name(&id));
    }

    #[test]
    fn test_distinct_ids_distinct_names() {
        let a = volume_name(&Uuid::new_v4());
        let b = volume_name(&Uuid::new_v4());
        assert_ne!(a, b);
    }
}
