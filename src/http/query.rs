//! URL query string parser with flexible collection support.

use memchr::memchr;
use std::collections::HashMap;

/// URL query string parser.
///
/// Splits on `&`, then on the first `=` of each fragment. A fragment
/// without `=` becomes a key with an empty value and empty fragments
/// (`a=1&&b=2`) are skipped. Parsing never fails.
///
/// Values are kept as they appear on the wire: there is no
/// percent-decoding (`%20`, `%40`, ...).
///
/// # Examples
/// ```rust
/// use wirehttp::query::Query;
/// use std::collections::HashMap;
///
/// // Parse into Vec (preserves order)
/// let params: Vec<(String, String)> = Query::parse("name=john&age=25&city");
/// assert_eq!(params.len(), 3);
/// assert_eq!(params[2], ("city".to_string(), String::new()));
///
/// // Parse into HashMap (last duplicate wins)
/// let params: HashMap<String, String> = Query::parse("key=1&key=2");
/// assert_eq!(params["key"], "2");
/// ```
pub struct Query;

impl Query {
    /// Parses a query string into a new collection.
    ///
    /// A leading `?` is ignored, so `?a=1` and `a=1` are equivalent.
    #[inline(always)]
    pub fn parse<C: QueryCollector>(query: &str) -> C {
        let mut result = C::default();
        Self::parse_into(&mut result, query);
        result
    }

    /// Parses a query string, appending parameters to `result`.
    ///
    /// ```
    /// use wirehttp::query::Query;
    ///
    /// let mut collector: Vec<(String, String)> = Vec::new();
    ///
    /// Query::parse_into(&mut collector, "a=1&b=2");
    /// Query::parse_into(&mut collector, "c=3&d=4");
    /// assert_eq!(collector.len(), 4); // parameters are appended
    ///
    /// // Only the first '=' splits
    /// let mut collector: Vec<(String, String)> = Vec::new();
    /// Query::parse_into(&mut collector, "expr=a=b");
    /// assert_eq!(collector[0].1, "a=b");
    /// ```
    pub fn parse_into<C: QueryCollector>(result: &mut C, query: &str) {
        let data = query.strip_prefix('?').unwrap_or(query);
        let bytes = data.as_bytes();

        let mut start = 0;
        while start < bytes.len() {
            // Find next '&' or end of string
            let end = memchr(b'&', &bytes[start..])
                .map(|pos| start + pos)
                .unwrap_or(bytes.len());

            if end > start {
                // '&' and '=' are ASCII, so both split points are char boundaries
                let fragment = &data[start..end];
                match fragment.split_once('=') {
                    Some((key, value)) => result.add_param(key, value),
                    None => result.add_param(fragment, ""),
                }
            }

            start = end + 1;
        }
    }
}

/// A collection that parsed query parameters can be written into.
///
/// # Examples
/// ```rust
/// use wirehttp::query::{Query, QueryCollector};
///
/// #[derive(Default)]
/// struct Keys(Vec<String>);
///
/// impl QueryCollector for Keys {
///     fn add_param(&mut self, key: &str, _: &str) {
///         self.0.push(key.to_string());
///     }
/// }
///
/// let keys: Keys = Query::parse("a=1&b&c=");
/// assert_eq!(keys.0, ["a", "b", "c"]);
/// ```
pub trait QueryCollector: Default {
    /// Adds a parsed parameter to the collection.
    fn add_param(&mut self, key: &str, value: &str);
}

// Preserves parameter order
impl QueryCollector for Vec<(String, String)> {
    #[inline(always)]
    fn add_param(&mut self, key: &str, value: &str) {
        self.push((key.to_string(), value.to_string()));
    }
}

// Deduplicates parameters (last wins)
impl QueryCollector for HashMap<String, String> {
    #[inline(always)]
    fn add_param(&mut self, key: &str, value: &str) {
        self.insert(key.to_string(), value.to_string());
    }
}
