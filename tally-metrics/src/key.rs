use std::collections::BTreeMap;
use std::fmt;

/// A set of dimensional tags attached to a metric or event.
///
/// Tags are kept sorted by key, so two tag sets compare equal regardless of the order in which
/// they were built.
pub type Tags = BTreeMap<String, String>;

/// An error returned by [`build_tags`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TagsError {
    /// The flat list of tag arguments has an odd length.
    #[error("tags must be given as key/value pairs, got {0} arguments")]
    OddLength(usize),
}

/// Builds a tag map from a flat list of alternating keys and values.
///
/// Later pairs overwrite earlier pairs with the same key.
///
/// # Example
///
/// ```
/// let tags = tally_metrics::build_tags(&["a", "1", "b", "2"]).unwrap();
/// assert_eq!(tags["a"], "1");
///
/// assert!(tally_metrics::build_tags(&["a"]).is_err());
/// ```
pub fn build_tags<S: AsRef<str>>(pairs: &[S]) -> Result<Tags, TagsError> {
    if pairs.len() % 2 != 0 {
        return Err(TagsError::OddLength(pairs.len()));
    }

    Ok(pairs
        .chunks_exact(2)
        .map(|pair| (pair[0].as_ref().to_owned(), pair[1].as_ref().to_owned()))
        .collect())
}

/// Merges tag sets from left to right, the rightmost source wins on collisions.
pub fn merge_tags<'a>(sources: impl IntoIterator<Item = &'a Tags>) -> Tags {
    let mut merged = Tags::new();
    for tags in sources {
        merged.extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    merged
}

/// Creates a [`Tags`] map from literal key/value pairs.
///
/// ```
/// let tags = tally_metrics::tags! { "host" => "web1", "dc" => "east" };
/// assert_eq!(tags.len(), 2);
/// ```
#[macro_export]
macro_rules! tags {
    () => {
        $crate::Tags::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut tags = $crate::Tags::new();
        $(tags.insert(::std::string::ToString::to_string(&$key), ::std::string::ToString::to_string(&$value));)+
        tags
    }};
}

/// The identity of a metric: its name and full tag set.
///
/// Keys are compared by value. Every cache in a [`Registry`](crate::Registry) is keyed by a
/// `MetricKey`.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MetricKey {
    name: String,
    tags: Tags,
}

impl MetricKey {
    /// Creates a new key.
    pub fn new(name: impl Into<String>, tags: Tags) -> Self {
        Self {
            name: name.into(),
            tags,
        }
    }

    /// Creates a key without tags.
    pub fn untagged(name: impl Into<String>) -> Self {
        Self::new(name, Tags::new())
    }

    /// The metric name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The tag set of the metric.
    pub fn tags(&self) -> &Tags {
        &self.tags
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if !self.tags.is_empty() {
            f.write_str("{")?;
            write_tags(f, &self.tags)?;
            f.write_str("}")?;
        }
        Ok(())
    }
}

/// Writes `k1=v1,k2=v2` to the formatter.
pub(crate) fn write_tags(f: &mut fmt::Formatter<'_>, tags: &Tags) -> fmt::Result {
    for (i, (key, value)) in tags.iter().enumerate() {
        if i > 0 {
            f.write_str(",")?;
        }
        write!(f, "{key}={value}")?;
    }
    Ok(())
}
