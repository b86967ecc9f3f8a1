use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

id_newtype!(CustomerId);
id_newtype!(BookingId);
id_newtype!(LocationId);

/// Status values the backend writes on a booking record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Accepted,
    Rejected,
}

impl BookingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }

    /// Exact, case-sensitive match on the wire value.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "accepted" => Some(Self::Accepted),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Accepted | Self::Rejected)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub id: LocationId,
    pub name: String,
    pub description: String,
    pub image_url: String,
    pub is_active: bool,
}

pub const KOLKATA_ID: &str = "kolkata";
pub const BOMBAY_ID: &str = "bombay";

impl Location {
    pub fn kolkata() -> Self {
        Self {
            id: LocationId::from(KOLKATA_ID),
            name: "Kolkata".into(),
            description: "Experience the cultural capital of India with its rich heritage and vibrant atmosphere".into(),
            image_url: "kolkata_image".into(),
            is_active: true,
        }
    }

    pub fn bombay() -> Self {
        Self {
            id: LocationId::from(BOMBAY_ID),
            name: "Bombay".into(),
            description: "The city of dreams offering endless opportunities and coastal beauty".into(),
            image_url: "bombay_image".into(),
            is_active: true,
        }
    }

    /// The fixed catalog. Membership never changes; only `is_active` is
    /// overridden by backend data.
    pub fn catalog() -> Vec<Self> {
        vec![Self::kolkata(), Self::bombay()]
    }
}
