use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::Error;

fn with_path<E: std::fmt::Display>(err: serde_path_to_error::Error<E>) -> Error {
    let path = err.path().to_string();
    Error::Deserialize { path, message: err.into_inner().to_string() }
}

/// Deserialize with JSON-path context in error messages.
pub fn from_str_with_path<T: DeserializeOwned>(src: &str) -> Result<T, Error> {
    let de = &mut serde_json::Deserializer::from_str(src);
    serde_path_to_error::deserialize::<_, T>(de).map_err(with_path)
}

pub fn from_slice_with_path<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, Error> {
    let de = &mut serde_json::Deserializer::from_slice(bytes);
    serde_path_to_error::deserialize::<_, T>(de).map_err(with_path)
}

/// Same as [`from_str_with_path`] for an already decoded document.
pub fn from_value_with_path<T: DeserializeOwned>(value: Value) -> Result<T, Error> {
    serde_path_to_error::deserialize::<_, T>(value).map_err(with_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    #[allow(unused)]
    struct Outer {
        inner: Vec<Inner>,
    }

    #[derive(Debug, Deserialize)]
    #[allow(unused)]
    struct Inner {
        n: i64,
    }

    #[test]
    fn errors_carry_the_json_path() {
        let err = from_value_with_path::<Outer>(json!({"inner": [{"n": 1}, {"n": "two"}]})).unwrap_err();
        let Error::Deserialize { path, .. } = err else { panic!("expected a deserialize error") };
        assert_eq!(path, "inner[1].n");

        let err = from_str_with_path::<Outer>(r#"{"inner": {}}"#).unwrap_err();
        assert!(err.to_string().starts_with("at JSON path inner"));
    }
}
