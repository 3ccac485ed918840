use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(ProjectId);
string_id!(ProfileId);
string_id!(ChainSessionId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_id_round_trips_as_string() {
        let id = ProjectId::new("proj-1");
        let serialized = serde_json::to_string(&id).expect("serialize project id");
        let deserialized: ProjectId =
            serde_json::from_str(&serialized).expect("deserialize project id");

        assert_eq!(serialized, "\"proj-1\"");
        assert_eq!(deserialized, id);
    }

    #[test]
    fn ids_display_their_inner_value() {
        assert_eq!(ProfileId::new("default").to_string(), "default");
    }
}
