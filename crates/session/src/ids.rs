use std::fmt;

use uuid::Uuid;

macro_rules! define_session_id {
    ($name:ident, $generate:expr) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new(raw: Uuid) -> Self {
                Self(raw)
            }

            pub fn generate() -> Self {
                Self($generate)
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(formatter, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self::new(value)
            }
        }

        impl From<$name> for Uuid {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

// Time-ordered so ids sort by creation.
define_session_id!(ConversationId, Uuid::now_v7());
define_session_id!(AnonymousId, Uuid::new_v4());

impl AnonymousId {
    /// First eight hex characters, used wherever the id is shown to the user.
    pub fn short(&self) -> String {
        self.0.simple().to_string().chars().take(8).collect()
    }
}
