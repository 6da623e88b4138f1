use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Declares a string-backed identifier with the usual conversions.
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::new(s)
            }
        }
    };
}

string_id!(
    /// Identifier of a delivery consignment, assigned by the upstream delivery system.
    ///
    /// # Examples
    ///
    /// ```
    /// use claim_engine::core::ids::ConsignmentId;
    ///
    /// let a = ConsignmentId::new("CNS-0001");
    /// let b = ConsignmentId::new("CNS-0002");
    /// assert_ne!(a, b);
    /// ```
    ConsignmentId
);

string_id!(
    /// Identifier of a depot-to-station route. Equalisation points are keyed by route.
    RouteId
);

string_id!(DepotId);

string_id!(StationId);

string_id!(VehicleId);

string_id!(
    /// Identifier of a regulator pricing window (e.g. `W2025-01`).
    WindowId
);

string_id!(
    /// Petroleum product code (`PMS`, `AGO`, `KEROSENE`, `LPG`, ...).
    ///
    /// Kept open-ended rather than an enum: the regulator adds products
    /// and the tariff table is configuration, not code.
    ProductCode
);

string_id!(
    /// Road category of a route (`HIGHWAY`, `URBAN`, `RURAL`, ...), used to
    /// pick the tariff multiplier.
    RoadCategory
);

/// Unique identifier of a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClaimId(Uuid);

impl ClaimId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ClaimId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClaimId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
