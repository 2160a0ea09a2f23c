//! Module that allows to (de-)serialize maps with non-string keys (e.g. tuples) with `serde`.
//!
//! JSON only supports string keys, so the map is written as a sequence of `{key, val}` entries.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Deserialize, Serialize)]
struct Entry<K, V> {
    key: K,
    val: V,
}

/// Serialize any map whose key is a tuple of serializable
pub fn serialize<'a, M, K, V, S>(map: &'a M, serializer: S) -> Result<S::Ok, S::Error>
where
    &'a M: IntoIterator<Item = (&'a K, &'a V)>,
    K: Serialize + 'a,
    V: Serialize + 'a,
    S: Serializer,
{
    serializer.collect_seq(map.into_iter().map(|(key, val)| Entry { key, val }))
}

/// Deserialize any map whose key is a tuple of serializable
///
/// NOTE: taken from <https://github.com/serde-rs/json/issues/456>
pub fn deserialize<'de, M, K, V, D>(deserializer: D) -> Result<M, D::Error>
where
    M: FromIterator<(K, V)>,
    K: Deserialize<'de>,
    V: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Vec::<Entry<K, V>>::deserialize(deserializer)
        .map(|v| v.into_iter().map(|entry| (entry.key, entry.val)).collect())
}

#[cfg(test)]
mod test {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Targets {
        #[serde(with = "super")]
        targets: BTreeMap<(usize, usize), f64>,
    }

    #[test]
    fn test_tuple_keys_survive_json() {
        let targets = Targets {
            targets: BTreeMap::from([((1, 3), -2.0), ((2, 7), 0.5)]),
        };
        let json = serde_json::to_string(&targets).unwrap();
        assert!(json.contains("\"key\":[1,3]"));
        let back: Targets = serde_json::from_str(&json).unwrap();
        assert_eq!(back, targets);
    }
}
