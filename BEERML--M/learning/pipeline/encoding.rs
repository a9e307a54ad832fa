use indexmap::{IndexMap, IndexSet};

use crate::schema::Value;

/// Value ↔ key dictionary built in first-seen order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyMapping {
    values: IndexMap<String, Value>,
}

impl KeyMapping {
    /// Fits a mapping over the observed values.
    pub fn fit<'a>(values: impl IntoIterator<Item = &'a Value>) -> Self {
        let mut mapping = Self::default();
        for value in values {
            mapping
                .values
                .entry(value.category())
                .or_insert_with(|| value.clone());
        }
        mapping
    }

    /// Key of a value seen while fitting.
    #[must_use]
    pub fn to_key(&self, value: &Value) -> Option<u32> {
        self.values
            .get_index_of(&value.category())
            .and_then(|idx| u32::try_from(idx).ok())
    }

    /// Value a key was assigned from.
    #[must_use]
    pub fn to_value(&self, key: u32) -> Option<&Value> {
        self.values
            .get_index(key as usize)
            .map(|(_, value)| value)
    }

    /// Number of distinct values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether nothing was observed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Values in key order.
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.values.values()
    }
}

/// Indicator encoder sized to the categories seen while fitting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OneHotEncoder {
    categories: IndexSet<String>,
}

impl OneHotEncoder {
    /// Fits the category set in first-seen order.
    pub fn fit<'a>(values: impl IntoIterator<Item = &'a Value>) -> Self {
        Self {
            categories: values.into_iter().map(Value::category).collect(),
        }
    }

    /// Output width.
    #[must_use]
    pub fn cardinality(&self) -> usize {
        self.categories.len()
    }

    /// Indicator vector; unseen categories map to all zeros.
    #[must_use]
    pub fn encode(&self, value: &Value) -> Vec<f32> {
        let mut encoded = vec![0.0; self.categories.len()];
        if let Some(slot) = self.categories.get_index_of(&value.category()) {
            encoded[slot] = 1.0;
        }
        encoded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(raw: &[&str]) -> Vec<Value> {
        raw.iter().map(|v| Value::from(*v)).collect()
    }

    #[test]
    fn keys_follow_first_seen_order_and_round_trip() {
        let observed = values(&["Beer", "Wine", "Beer", "Whisky"]);
        let mapping = KeyMapping::fit(&observed);
        assert_eq!(mapping.len(), 3);
        assert_eq!(mapping.to_key(&Value::from("Wine")), Some(1));
        for value in &observed {
            let key = mapping.to_key(value).unwrap();
            assert_eq!(mapping.to_value(key), Some(value));
        }
        assert_eq!(mapping.to_key(&Value::from("Cider")), None);
        assert_eq!(mapping.to_value(3), None);
    }

    #[test]
    fn one_hot_width_matches_cardinality() {
        let encoder = OneHotEncoder::fit(&values(&["Sweden", "Italy", "Sweden", "France"]));
        assert_eq!(encoder.cardinality(), 3);
        assert_eq!(encoder.encode(&Value::from("Italy")), vec![0.0, 1.0, 0.0]);
        assert_eq!(encoder.encode(&Value::from("")), vec![0.0; 3]);
    }

    #[test]
    fn numeric_categories_are_distinct_by_value() {
        let encoder = OneHotEncoder::fit(&[Value::Int32(1), Value::Int32(12), Value::Int32(1)]);
        assert_eq!(encoder.cardinality(), 2);
        assert_eq!(encoder.encode(&Value::Int32(12)), vec![0.0, 1.0]);
    }
}
