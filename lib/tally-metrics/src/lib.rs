//! Internal telemetry helpers.
//!
//! tally reports on itself through the [`metrics`] facade. Nothing in this crate installs a recorder: without one,
//! every handle is a no-op, and applications decide whether and where to export.

mod builder;
pub use self::builder::{MetricTag, MetricsBuilder};

mod macros;


/// A type that can be converted into a `SharedString`.
///
/// Blanket trait used by `static_metrics!` to turn label values of any displayable type into metric labels. It should
/// not need to be implemented manually.
pub trait Stringable {
    /// Renders `self` as a shared label value.
    fn to_shared_string(&self) -> ::metrics::SharedString;
}

impl<T> Stringable for T
where
    T: std::fmt::Display,
{
    fn to_shared_string(&self) -> ::metrics::SharedString {
        std::string::ToString::to_string(&self).into()
    }
}
