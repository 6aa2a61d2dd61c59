use metrics::{counter, Counter, Label, SharedString};

mod private {
    use metrics::SharedString;

    pub trait Sealed {}

    impl Sealed for &'static str {}
    impl Sealed for String {}
    impl<T> Sealed for (&'static str, T) where T: Into<SharedString> {}
}

/// A metric tag.
///
/// Marker trait for types which can be used as a metric tag. Tags are written either as a single `key:value` string,
/// or as a key/value tuple.
///
/// This trait is sealed and cannot be implemented outside of this crate.
pub trait MetricTag: private::Sealed {
    /// Consumes `self` and converts it to a label.
    fn into_label(self) -> Label;
}

impl MetricTag for &'static str {
    fn into_label(self) -> Label {
        match self.split_once(':') {
            Some((key, value)) => Label::from_static_parts(key, value),
            None => Label::from_static_parts(self, ""),
        }
    }
}

impl MetricTag for String {
    fn into_label(self) -> Label {
        match self.split_once(':') {
            Some((key, value)) => Label::new(key.to_string(), value.to_string()),
            None => Label::new(self, ""),
        }
    }
}

impl<T> MetricTag for (&'static str, T)
where
    T: Into<SharedString>,
{
    fn into_label(self) -> Label {
        Label::new(SharedString::const_str(self.0), self.1.into())
    }
}

/// Builder for constructing metrics with a consistent set of default tags.
///
/// Used where the set of metrics isn't static enough for `static_metrics!`, such as per-endpoint sink telemetry.
#[derive(Clone, Debug, Default)]
pub struct MetricsBuilder {
    default_tags: Vec<Label>,
}

impl MetricsBuilder {
    /// Adds an additional default tag to use when constructing metrics.
    ///
    /// Tags can be provided as individual tags (`"tag_name"` or `"tag_name:tag_value"`, either as `&'static str` or
    /// `String`) or as key/value tuples (`("tag_name", "tag_value")`).
    pub fn add_default_tag<T>(mut self, tag: T) -> Self
    where
        T: MetricTag,
    {
        self.default_tags.push(tag.into_label());
        self
    }

    /// Registers a counter with the default tags.
    pub fn register_counter(&self, metric_name: &'static str) -> Counter {
        counter!(metric_name, self.default_tags.clone())
    }
}
