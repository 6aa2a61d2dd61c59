#[doc(hidden)]
#[macro_export]
macro_rules! metric_type_from_lower {
    (counter) => {
        ::metrics::Counter
    };
    (gauge) => {
        ::metrics::Gauge
    };
    (histogram) => {
        ::metrics::Histogram
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! register_metric {
    (counter, $metric_name:expr, $labels:expr) => {
        ::metrics::counter!($metric_name, $labels)
    };
    (gauge, $metric_name:expr, $labels:expr) => {
        ::metrics::gauge!($metric_name, $labels)
    };
    (histogram, $metric_name:expr, $labels:expr) => {
        ::metrics::histogram!($metric_name, $labels)
    };
    ($($other:tt)*) => {
        compile_error!("metric type must be `counter`, `gauge`, or `histogram`");
    };
}

/// Creates statically-defined metrics within a dedicated container struct.
///
/// When the metrics of a component are known up front, and only a fixed set of labels is needed, declaring them in one
/// place avoids repeating string-y metric names and labels at every callsite. The generated struct registers every
/// metric on construction, with the same labels, and exposes one accessor per metric.
///
/// Metric names are rendered as `<prefix>_<metric name>`.
///
/// ## Example
///
/// ```rust
/// # use tally_metrics::static_metrics;
/// static_metrics!(
///    name => FlushMetrics,
///    prefix => flush,
///    labels => [registry: String],
///    metrics => [
///        counter(batches_total),
///        gauge(last_flush_timestamp_ms),
///    ],
/// );
///
/// let metrics = FlushMetrics::new("default".to_string());
/// metrics.batches_total().increment(1);
/// ```
#[macro_export]
macro_rules! static_metrics {
    (name => $name:ident, prefix => $prefix:ident, metrics => [$($metric_type:ident($metric_name:ident)),+ $(,)?] $(,)?) => {
        $crate::static_metrics!(name => $name, prefix => $prefix, labels => [], metrics => [$($metric_type($metric_name)),+]);
    };
    (name => $name:ident, prefix => $prefix:ident, labels => [$($label_key:ident: $label_ty:ty),*], metrics => [$($metric_type:ident($metric_name:ident)),+ $(,)?] $(,)?) => {
        #[derive(Clone)]
        pub(crate) struct $name {
            $(
                $metric_name: $crate::metric_type_from_lower!($metric_type),
            )*
        }

        #[allow(dead_code)]
        impl $name {
            pub fn new($($label_key: $label_ty,)*) -> Self
            where
                Self: Sized,
            $(
                $label_ty: $crate::Stringable,
            )*
            {
                #[allow(unused_imports)]
                use $crate::Stringable;

                let labels = vec![
                    $(
                        ::metrics::Label::new(stringify!($label_key), $label_key.to_shared_string()),
                    )*
                ];

                Self {
                $(
                    $metric_name: $crate::register_metric!($metric_type, concat!(stringify!($prefix), "_", stringify!($metric_name)), labels.iter()),
                )*
                }
            }

            $(
                pub fn $metric_name(&self) -> &$crate::metric_type_from_lower!($metric_type) {
                    &self.$metric_name
                }
            )*
        }

        impl ::std::fmt::Debug for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                write!(f, stringify!($name))
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use metrics::{Key, Label};

    use crate::test::TestRecorder;

    static_metrics!(
        name => SinkMetrics,
        prefix => sink,
        labels => [endpoint: &'static str],
        metrics => [
            counter(payloads_sent),
            gauge(queue_depth),
            histogram(payload_bytes),
        ],
    );

    #[test]
    fn registers_with_prefix_and_labels() {
        let recorder = TestRecorder::default();
        let metrics = metrics::with_local_recorder(&recorder, || SinkMetrics::new("primary"));

        metrics.payloads_sent().increment(2);
        metrics.queue_depth().set(5.0);
        metrics.payload_bytes().record(128.0);

        let labels = vec![Label::new("endpoint", "primary")];
        assert_eq!(
            recorder.counter(Key::from_parts("sink_payloads_sent", labels.clone())),
            Some(2)
        );
        assert_eq!(
            recorder.gauge(Key::from_parts("sink_queue_depth", labels.clone())),
            Some(5.0)
        );
        assert_eq!(
            recorder.histogram(Key::from_parts("sink_payload_bytes", labels)),
            Some(vec![128.0])
        );
    }
}
