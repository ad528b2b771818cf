use crate::factors::LevelValue;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

/// One concrete assignment of a level to every factor, in factor order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Trial {
    values: Vec<(String, LevelValue)>,
}

impl Trial {
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, LevelValue)>,
    {
        Self {
            values: pairs.into_iter().collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&LevelValue> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &LevelValue)> {
        self.values.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Serialize for Trial {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (name, value) in &self.values {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_object_in_factor_order() {
        let trial = Trial::from_pairs([
            ("target".to_string(), LevelValue::from("T")),
            ("cue_validity".to_string(), LevelValue::from(false)),
            ("onset".to_string(), LevelValue::from(300i64)),
        ]);
        let text = serde_json::to_string(&trial).expect("serialize trial");
        assert_eq!(text, r#"{"target":"T","cue_validity":false,"onset":300}"#);
        assert_eq!(trial.names().collect::<Vec<_>>(), vec!["target", "cue_validity", "onset"]);
        assert_eq!(trial.get("onset").and_then(LevelValue::as_i64), Some(300));
        assert!(trial.get("missing").is_none());
    }
}
