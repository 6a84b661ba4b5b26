use std::collections::BTreeSet;
use std::fmt::{Display, Formatter, Result as FmtResult};

use url::Url;

/// Topic key of the fallback handler.
pub const WILDCARD_TOPIC: &str = "*";

/// Prefix brokers use for their own bookkeeping topics.
pub const INTERNAL_TOPIC_PREFIX: &str = "__";

/// Separator between a topic's namespace and its name.
pub const NAMESPACE_SEPARATOR: char = '.';

/// Whether a broker-reported topic is internal to the broker.
///
/// Internal topics start with [`INTERNAL_TOPIC_PREFIX`] and have no namespace.
#[must_use]
pub fn is_internal_topic(topic: &str) -> bool {
    topic.starts_with(INTERNAL_TOPIC_PREFIX) && !topic.contains(NAMESPACE_SEPARATOR)
}

/// A deduplicated set of concrete topics to subscribe to.
///
/// Never contains the wildcard marker. Iteration order is sorted, which is
/// stable but carries no meaning for the broker.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TopicSet(BTreeSet<String>);

impl TopicSet {
    /// Builds the subscription topics from explicitly configured topics.
    ///
    /// When `explicit` contains the wildcard and `public` is given, the
    /// broker's public topics are added, minus broker-internal ones. The
    /// result is a point-in-time snapshot.
    pub fn resolve<I, P>(explicit: I, public: Option<P>) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        P: IntoIterator,
        P::Item: Into<String>,
    {
        let mut has_wildcard = false;
        let mut topics = BTreeSet::new();

        for topic in explicit {
            let topic = topic.into();
            if topic == WILDCARD_TOPIC {
                has_wildcard = true;
            } else {
                topics.insert(topic);
            }
        }

        if has_wildcard {
            if let Some(public) = public {
                topics.extend(
                    public
                        .into_iter()
                        .map(Into::into)
                        .filter(|topic| topic != WILDCARD_TOPIC && !is_internal_topic(topic)),
                );
            }
        }

        Self(topics)
    }

    /// Whether the set contains `topic`.
    #[must_use]
    pub fn contains(&self, topic: &str) -> bool {
        self.0.contains(topic)
    }

    /// Iterates over the topics.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Number of topics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Joins the topics with `separator`.
    #[must_use]
    pub fn join(&self, separator: &str) -> String {
        self.iter().collect::<Vec<_>>().join(separator)
    }
}

impl Display for TopicSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(&self.join(","))
    }
}

impl<'a> IntoIterator for &'a TopicSet {
    type Item = &'a String;
    type IntoIter = std::collections::btree_set::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Appends comma-separated topics to a base URL, e.g.
/// `kafka://kafka.scimma.org/` + `{a, b}` gives `kafka://kafka.scimma.org/a,b`.
///
/// # Errors
///
/// Returns an error if the combined string is not a valid URL.
pub fn subscription_url(base: &Url, topics: &TopicSet) -> Result<Url, url::ParseError> {
    let mut target = base.as_str().to_string();

    if !target.ends_with('/') {
        target.push('/');
    }
    target.push_str(&topics.join(","));

    Url::parse(&target)
}
