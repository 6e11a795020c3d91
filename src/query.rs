//! Query string building from explicitly declared fields.
//!
//! Types describe their query parameters by implementing [`ToQuery`]:
//!
//! ```
//! use kit_http::{parse_query_params, QueryParams, ToQuery};
//!
//! struct UserFilter {
//!     name: String,
//!     page: u32,
//!     role: Option<String>,
//!     ids: Vec<u64>,
//! }
//!
//! impl ToQuery for UserFilter {
//!     fn to_query(&self, query: &mut QueryParams) {
//!         query
//!             .add_str("name", &self.name)
//!             .add("page", self.page)
//!             .add_opt("role", self.role.as_ref())
//!             .add_all("id", &self.ids);
//!     }
//! }
//!
//! let filter = UserFilter { name: String::new(), page: 2, role: None, ids: vec![4, 9] };
//! assert_eq!(parse_query_params("users", &filter), "users?id=4&id=9&page=2");
//! ```

use std::{collections::BTreeMap, fmt::Display};

use url::form_urlencoded;

/// Contributes query parameters.
pub trait ToQuery {
    fn to_query(&self, query: &mut QueryParams);
}

/// Query parameters, keyed in sorted order with values kept in insertion order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryParams {
    pairs: BTreeMap<String, Vec<String>>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses an existing `a=1&b=2` query.
    pub fn parse(query: &str) -> Self {
        let mut params = Self::new();
        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            params.push(key.into_owned(), value.into_owned());
        }
        params
    }

    fn push(&mut self, key: String, value: String) {
        self.pairs.entry(key).or_default().push(value);
    }

    /// Always adds `key=value`.
    pub fn add(&mut self, key: &str, value: impl Display) -> &mut Self {
        self.push(key.to_owned(), value.to_string());
        self
    }

    /// Adds `key=value` unless `value` is empty.
    pub fn add_str(&mut self, key: &str, value: &str) -> &mut Self {
        if !value.is_empty() {
            self.push(key.to_owned(), value.to_owned());
        }
        self
    }

    /// Adds `key=value` when `value` is set.
    pub fn add_opt<V: Display>(&mut self, key: &str, value: Option<V>) -> &mut Self {
        if let Some(value) = value {
            self.push(key.to_owned(), value.to_string());
        }
        self
    }

    /// Adds one `key=value` per element.
    pub fn add_all<I>(&mut self, key: &str, values: I) -> &mut Self
    where
        I: IntoIterator,
        I::Item: Display,
    {
        for value in values {
            self.push(key.to_owned(), value.to_string());
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.pairs.get(key).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Form-urlencoded query without the leading `?`.
    pub fn encode(&self) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (key, values) in &self.pairs {
            for value in values {
                serializer.append_pair(key, value);
            }
        }
        serializer.finish()
    }
}

/// Appends the parameters of `params` to `path`, merged with any query
/// already present on it.
pub fn parse_query_params(path: &str, params: &impl ToQuery) -> String {
    let (rest, fragment) = match path.split_once('#') {
        Some((rest, fragment)) => (rest, Some(fragment)),
        None => (path, None),
    };
    let (base, existing) = rest.split_once('?').unwrap_or((rest, ""));

    let mut query = QueryParams::parse(existing);
    params.to_query(&mut query);

    let mut url = base.to_owned();
    if !query.is_empty() {
        url.push('?');
        url.push_str(&query.encode());
    }
    if let Some(fragment) = fragment {
        url.push('#');
        url.push_str(fragment);
    }
    url
}

#[cfg(test)]
mod tests {
    use super::{parse_query_params, QueryParams, ToQuery};

    struct Filter {
        search: String,
        status: Option<&'static str>,
        tags: Vec<&'static str>,
        limit: u32,
    }

    impl ToQuery for Filter {
        fn to_query(&self, query: &mut QueryParams) {
            query
                .add_str("search", &self.search)
                .add_opt("status", self.status)
                .add_all("tag", &self.tags)
                .add("limit", self.limit);
        }
    }

    #[test]
    fn empty_and_missing_fields_are_skipped() {
        let filter = Filter {
            search: String::new(),
            status: None,
            tags: vec![],
            limit: 0,
        };
        assert_eq!(
            parse_query_params("http://svc/users", &filter),
            "http://svc/users?limit=0"
        );
    }

    #[test]
    fn repeated_values_keep_order_and_keys_are_sorted() {
        let filter = Filter {
            search: "ann lee".to_owned(),
            status: Some("active"),
            tags: vec!["b", "a"],
            limit: 10,
        };
        assert_eq!(
            parse_query_params("/users", &filter),
            "/users?limit=10&search=ann+lee&status=active&tag=b&tag=a"
        );
    }

    #[test]
    fn merges_existing_query_and_keeps_fragment() {
        let filter = Filter {
            search: String::new(),
            status: Some("x&y"),
            tags: vec![],
            limit: 5,
        };
        assert_eq!(
            parse_query_params("/users?page=2#top", &filter),
            "/users?limit=5&page=2&status=x%26y#top"
        );
    }

    #[test]
    fn parse_round_trips_pairs() {
        let params = QueryParams::parse("a=1&a=2&b=three");
        assert_eq!(params.get("a"), Some(&["1".to_owned(), "2".to_owned()][..]));
        assert_eq!(params.encode(), "a=1&a=2&b=three");
    }
}
