//! Per-task detail stream: poll-time and scheduled-time histograms.
//!
//! The remote sends each histogram as an opaque serialized buffer. Decoding
//! is delegated to a [`HistogramDecoder`], which turns the bytes into
//! percentiles and display buckets for a chart `width` columns wide. Values
//! come back in nanoseconds and are converted to [`Duration`] here.
//! [`HdrDecoder`] reads the HdrHistogram V2 encoding the remote emits.

use std::io::Cursor;

use hdrhistogram::Histogram;
use hdrhistogram::serialization::Deserializer;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::ids::SpanId;
use crate::time::{Duration, Timestamp};
use crate::transport::{Connector, DetailStream};
use crate::wire;

/// Decodes a serialized histogram.
pub trait HistogramDecoder: Send + Sync {
    /// Decode `bytes`, bucketing for a chart `width` units wide.
    fn decode(&self, bytes: &[u8], width: u32) -> Result<DecodedHistogram>;
}

/// Decoder output; all values in nanoseconds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedHistogram {
    pub min: u64,
    pub max: u64,
    /// `(percentile, value)` pairs, e.g. `(99.0, 1_200)`.
    pub percentiles: Vec<(f64, u64)>,
    /// `(bucket upper bound, count)` pairs in ascending order.
    pub buckets: Vec<(u64, u64)>,
}

/// Percentiles reported for every decoded histogram.
pub const PERCENTILES: [f64; 7] = [10.0, 25.0, 50.0, 75.0, 90.0, 95.0, 99.0];

/// HdrHistogram-backed decoder.
///
/// Buckets are linear over `min..=max`, one per chart column, and leading
/// empty buckets are dropped so the chart starts at the first sample.
#[derive(Debug, Clone, Copy, Default)]
pub struct HdrDecoder;

impl HistogramDecoder for HdrDecoder {
    fn decode(&self, bytes: &[u8], width: u32) -> Result<DecodedHistogram> {
        let histogram: Histogram<u64> = Deserializer::new()
            .deserialize(&mut Cursor::new(bytes))
            .map_err(|e| Error::Histogram(e.to_string()))?;
        if histogram.is_empty() {
            return Ok(DecodedHistogram::default());
        }

        let (min, max) = (histogram.min(), histogram.max());
        let step = (max - min).div_ceil(u64::from(width.max(1))) + 1;
        let buckets = histogram
            .iter_linear(step)
            .skip_while(|v| v.count_since_last_iteration() == 0)
            .map(|v| (v.value_iterated_to(), v.count_since_last_iteration()))
            .collect();
        let percentiles = PERCENTILES
            .iter()
            .map(|&p| (p, histogram.value_at_percentile(p)))
            .collect();

        Ok(DecodedHistogram {
            min,
            max,
            percentiles,
            buckets,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PercentileDuration {
    pub percentile: f64,
    pub duration: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DurationCount {
    pub duration: Duration,
    pub count: u64,
}

/// One decoded histogram.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TimesDetails {
    pub percentiles: Vec<PercentileDuration>,
    pub histogram: Vec<DurationCount>,
    pub min: Duration,
    pub max: Duration,
}

impl From<DecodedHistogram> for TimesDetails {
    fn from(decoded: DecodedHistogram) -> Self {
        Self {
            percentiles: decoded
                .percentiles
                .into_iter()
                .map(|(percentile, value)| PercentileDuration {
                    percentile,
                    duration: Duration::from_nanos(value),
                })
                .collect(),
            histogram: decoded
                .buckets
                .into_iter()
                .map(|(value, count)| DurationCount {
                    duration: Duration::from_nanos(value),
                    count,
                })
                .collect(),
            min: Duration::from_nanos(decoded.min),
            max: Duration::from_nanos(decoded.max),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TaskDetails {
    pub poll_times: TimesDetails,
    /// Only sent by remotes that track scheduling delay.
    pub scheduled_times: Option<TimesDetails>,
}

impl TaskDetails {
    /// Decode one detail snapshot. A snapshot without a poll-time histogram
    /// yields empty poll times.
    pub fn from_wire(
        details: &wire::TaskDetails,
        width: u32,
        decoder: &impl HistogramDecoder,
    ) -> Result<Self> {
        let poll_times = match &details.poll_times_histogram {
            Some(wire::PollTimesHistogram::Histogram(h)) => {
                decoder.decode(&h.raw_histogram, width)?.into()
            }
            Some(wire::PollTimesHistogram::LegacyHistogram(bytes)) => {
                decoder.decode(bytes, width)?.into()
            }
            None => TimesDetails::default(),
        };
        let scheduled_times = match &details.scheduled_times_histogram {
            Some(h) if !h.raw_histogram.is_empty() => Some(decoder.decode(&h.raw_histogram, width)?.into()),
            _ => None,
        };
        Ok(Self {
            poll_times,
            scheduled_times,
        })
    }
}

/// What a details consumer observes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskDetailsView {
    /// No snapshot received yet.
    pub pending: bool,
    pub details: TaskDetails,
    /// Server time of the latest snapshot.
    pub updated_at: Option<Timestamp>,
}

impl Default for TaskDetailsView {
    fn default() -> Self {
        Self {
            pending: true,
            details: TaskDetails::default(),
            updated_at: None,
        }
    }
}

/// Stream details for `task` into `sink` until the stream ends or the
/// consumer sets `closed`.
///
/// `closed` is checked each time a snapshot arrives; the loop never
/// interrupts an in-flight receive. Transport and decode failures end the
/// loop with an error and are not retried. `pending` is cleared on every
/// exit path.
pub async fn watch_task_details<C, D>(
    connector: &C,
    task: SpanId,
    width: u32,
    decoder: &D,
    closed: watch::Receiver<bool>,
    sink: &watch::Sender<TaskDetailsView>,
) -> Result<()>
where
    C: Connector,
    D: HistogramDecoder,
{
    let result = stream_details(connector, task, width, decoder, &closed, sink).await;
    sink.send_modify(|view| view.pending = false);
    result
}

async fn stream_details<C, D>(
    connector: &C,
    task: SpanId,
    width: u32,
    decoder: &D,
    closed: &watch::Receiver<bool>,
    sink: &watch::Sender<TaskDetailsView>,
) -> Result<()>
where
    C: Connector,
    D: HistogramDecoder,
{
    let mut stream = connector.connect_details(task).await?;
    info!(span_id = %task, "watching task details");

    while let Some(message) = stream.next_details().await {
        let snapshot = message?;
        if *closed.borrow() {
            debug!(span_id = %task, "details consumer closed");
            return Ok(());
        }
        let details = TaskDetails::from_wire(&snapshot, width, decoder)?;
        sink.send_replace(TaskDetailsView {
            pending: false,
            details,
            updated_at: snapshot.now,
        });
    }

    debug!(span_id = %task, "details stream ended");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, TransportError};
    use crate::transport::UpdateStream;
    use crate::wire::{DurationHistogram, PollTimesHistogram, Update};
    use hdrhistogram::serialization::{Serializer, V2Serializer};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Interprets the buffer as a list of nanosecond samples.
    struct SampleDecoder;

    impl HistogramDecoder for SampleDecoder {
        fn decode(&self, bytes: &[u8], width: u32) -> Result<DecodedHistogram> {
            if bytes.is_empty() {
                return Err(Error::Histogram("empty buffer".into()));
            }
            let min = u64::from(*bytes.iter().min().unwrap_or(&0));
            let max = u64::from(*bytes.iter().max().unwrap_or(&0));
            Ok(DecodedHistogram {
                min,
                max,
                percentiles: vec![(50.0, max)],
                buckets: vec![(max, u64::from(width))],
            })
        }
    }

    struct Scripted(VecDeque<Result<wire::TaskDetails>>);

    impl DetailStream for Scripted {
        async fn next_details(&mut self) -> Option<Result<wire::TaskDetails>> {
            self.0.pop_front()
        }
    }

    struct NoUpdates;

    impl UpdateStream for NoUpdates {
        async fn next_update(&mut self) -> Option<Result<Update>> {
            None
        }
    }

    struct DetailsOnly(Mutex<Option<Scripted>>);

    impl Connector for DetailsOnly {
        type Updates = NoUpdates;
        type Details = Scripted;

        fn target(&self) -> String {
            "scripted".into()
        }

        async fn connect_updates(&self) -> Result<NoUpdates> {
            Ok(NoUpdates)
        }

        async fn connect_details(&self, _task: SpanId) -> Result<Scripted> {
            self.0
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| TransportError::Connect {
                    target: "scripted".into(),
                    reason: "already used".into(),
                }
                .into())
        }
    }

    fn connector(messages: Vec<Result<wire::TaskDetails>>) -> DetailsOnly {
        DetailsOnly(Mutex::new(Some(Scripted(messages.into()))))
    }

    fn snapshot(secs: i64, samples: &[u8]) -> wire::TaskDetails {
        wire::TaskDetails {
            task_id: Some(SpanId(1)),
            now: Some(Timestamp::new(secs, 0)),
            poll_times_histogram: Some(PollTimesHistogram::Histogram(DurationHistogram {
                raw_histogram: samples.to_vec(),
                ..DurationHistogram::default()
            })),
            scheduled_times_histogram: None,
        }
    }

    fn serialized(values: &[u64]) -> Vec<u8> {
        let mut histogram = Histogram::<u64>::new(3).unwrap();
        for &value in values {
            histogram.record(value).unwrap();
        }
        let mut bytes = Vec::new();
        V2Serializer::new().serialize(&histogram, &mut bytes).unwrap();
        bytes
    }

    #[test]
    fn hdr_decoder_reports_range_and_percentiles() {
        let bytes = serialized(&[100, 200, 200, 300, 1_900]);
        let decoded = HdrDecoder.decode(&bytes, 40).unwrap();

        assert_eq!(decoded.min, 100);
        assert_eq!(decoded.max, 1_900);
        let at: Vec<f64> = decoded.percentiles.iter().map(|(p, _)| *p).collect();
        assert_eq!(at, PERCENTILES.to_vec());
        assert_eq!(decoded.percentiles[0], (10.0, 100));
        assert_eq!(decoded.percentiles[2], (50.0, 200));
        assert_eq!(decoded.percentiles[6], (99.0, 1_900));
    }

    #[test]
    fn hdr_decoder_buckets_skip_leading_empties() {
        let bytes = serialized(&[1_000, 1_100, 1_900]);
        let decoded = HdrDecoder.decode(&bytes, 4).unwrap();

        assert!(decoded.buckets[0].1 > 0);
        assert!(decoded.buckets.windows(2).all(|w| w[0].0 < w[1].0));
        assert_eq!(decoded.buckets.iter().map(|(_, count)| count).sum::<u64>(), 3);
        assert!(decoded.buckets.last().unwrap().0 >= 1_900);
    }

    #[test]
    fn hdr_decoder_handles_empty_and_garbage() {
        let empty = HdrDecoder.decode(&serialized(&[]), 40).unwrap();
        assert_eq!(empty, DecodedHistogram::default());

        let err = HdrDecoder.decode(&[1, 2, 3], 40).unwrap_err();
        assert!(matches!(err, Error::Histogram(_)));
    }

    #[test]
    fn decoded_values_become_durations() {
        let times = TimesDetails::from(DecodedHistogram {
            min: 1_000,
            max: 2_000_000_000,
            percentiles: vec![(99.0, 1_500_000)],
            buckets: vec![(10, 3)],
        });
        assert_eq!(times.min, Duration::new(0, 1_000));
        assert_eq!(times.max, Duration::from_secs(2));
        assert_eq!(times.percentiles[0].duration, Duration::from_millis(1) + Duration::new(0, 500_000));
        assert_eq!(times.histogram[0], DurationCount { duration: Duration::new(0, 10), count: 3 });
    }

    #[test]
    fn legacy_and_scheduled_histograms_decode() {
        let details = wire::TaskDetails {
            poll_times_histogram: Some(PollTimesHistogram::LegacyHistogram(vec![3, 9])),
            scheduled_times_histogram: Some(DurationHistogram {
                raw_histogram: vec![4],
                ..DurationHistogram::default()
            }),
            ..wire::TaskDetails::default()
        };
        let decoded = TaskDetails::from_wire(&details, 40, &SampleDecoder).unwrap();
        assert_eq!(decoded.poll_times.max, Duration::new(0, 9));
        assert_eq!(decoded.poll_times.histogram[0].count, 40);
        assert_eq!(decoded.scheduled_times.unwrap().min, Duration::new(0, 4));
    }

    #[test]
    fn missing_histograms_are_empty() {
        let decoded = TaskDetails::from_wire(&wire::TaskDetails::default(), 40, &SampleDecoder).unwrap();
        assert_eq!(decoded, TaskDetails::default());
    }

    #[tokio::test]
    async fn publishes_each_snapshot_until_end() {
        let connector = connector(vec![Ok(snapshot(1, &[5])), Ok(snapshot(2, &[7]))]);
        let (_close_tx, close_rx) = watch::channel(false);
        let (sink, view) = watch::channel(TaskDetailsView::default());

        watch_task_details(&connector, SpanId(1), 10, &SampleDecoder, close_rx, &sink)
            .await
            .unwrap();

        let view = view.borrow();
        assert!(!view.pending);
        assert_eq!(view.updated_at, Some(Timestamp::new(2, 0)));
        assert_eq!(view.details.poll_times.max, Duration::new(0, 7));
    }

    #[tokio::test]
    async fn serialized_histogram_reaches_the_view() {
        let mut message = snapshot(3, &[]);
        message.poll_times_histogram = Some(PollTimesHistogram::Histogram(DurationHistogram {
            raw_histogram: serialized(&[1_500, 1_500, 2_000]),
            ..DurationHistogram::default()
        }));
        let connector = connector(vec![Ok(message)]);
        let (_close_tx, close_rx) = watch::channel(false);
        let (sink, view) = watch::channel(TaskDetailsView::default());

        watch_task_details(&connector, SpanId(1), 40, &HdrDecoder, close_rx, &sink)
            .await
            .unwrap();

        let view = view.borrow();
        assert_eq!(view.details.poll_times.min, Duration::from_nanos(1_500));
        assert_eq!(view.details.poll_times.max, Duration::from_nanos(2_000));
        assert_eq!(view.details.poll_times.percentiles.len(), PERCENTILES.len());
    }

    #[tokio::test]
    async fn closed_consumer_stops_at_next_message() {
        let connector = connector(vec![Ok(snapshot(1, &[5])), Ok(snapshot(2, &[7]))]);
        let (close_tx, close_rx) = watch::channel(false);
        close_tx.send(true).unwrap();
        let (sink, view) = watch::channel(TaskDetailsView::default());

        watch_task_details(&connector, SpanId(1), 10, &SampleDecoder, close_rx, &sink)
            .await
            .unwrap();

        let view = view.borrow();
        assert!(!view.pending);
        assert!(view.updated_at.is_none());
    }

    #[tokio::test]
    async fn stream_error_is_returned_and_clears_pending() {
        let connector = connector(vec![
            Ok(snapshot(1, &[5])),
            Err(TransportError::Stream("reset".into()).into()),
        ]);
        let (_close_tx, close_rx) = watch::channel(false);
        let (sink, view) = watch::channel(TaskDetailsView::default());

        let err = watch_task_details(&connector, SpanId(1), 10, &SampleDecoder, close_rx, &sink)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(TransportError::Stream(_))));
        assert_eq!(view.borrow().updated_at, Some(Timestamp::new(1, 0)));
        assert!(!view.borrow().pending);
    }

    #[tokio::test]
    async fn undecodable_histogram_is_an_error() {
        let connector = connector(vec![Ok(snapshot(1, &[]))]);
        let (_close_tx, close_rx) = watch::channel(false);
        let (sink, _view) = watch::channel(TaskDetailsView::default());

        let err = watch_task_details(&connector, SpanId(1), 10, &SampleDecoder, close_rx, &sink)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Histogram(_)));
    }
}
