use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);
    };
}

macro_rules! ref_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }
    };
}

id_newtype!(MessageId);

ref_newtype!(RoomId);
ref_newtype!(BlockId);
ref_newtype!(UserRef);

impl BlockId {
    /// Mints the control identifier for a freshly sent message. The
    /// millisecond timestamp keeps identifiers roughly ordered; the random
    /// suffix avoids same-millisecond collisions between concurrent sends.
    pub fn mint() -> Self {
        Self(format!(
            "{}-{}",
            Utc::now().timestamp_millis(),
            Uuid::new_v4().simple()
        ))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
