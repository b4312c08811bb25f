//! Segment routing (spec.md §4/§6 "SegmentationSchema"): decides which
//! model partition(s) an event belongs to before scoring begins. Routing
//! itself does not touch a `DataContext` — it reads raw field values
//! directly, the same way `RawInputProvider` does, since segmentation
//! happens upstream of any per-model cast/treatment pipeline.

use pmml_common::FieldValue;
use pmml_document::Closure;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DimensionOp {
    Equal,
    NotEqual,
}

/// `Selection` over a discrete field (spec.md §6 "EnumeratedDimension").
#[derive(Debug, Clone)]
pub struct EnumeratedDimension {
    pub field: String,
    pub op: DimensionOp,
    pub value: FieldValue,
}

impl EnumeratedDimension {
    fn matches(&self, observed: &FieldValue) -> bool {
        match self.op {
            DimensionOp::Equal => observed == &self.value,
            DimensionOp::NotEqual => observed != &self.value,
        }
    }
}

/// `Partition` over a continuous field (spec.md §6 "PartitionedDimension"):
/// `[low, high]` divided into `divisions` equal-width buckets, the segment
/// matching whichever bucket the observed value falls in.
#[derive(Debug, Clone)]
pub struct PartitionedDimension {
    pub field: String,
    pub low: f64,
    pub high: f64,
    pub closure: Closure,
    pub divisions: u32,
    pub bucket: u32,
}

impl PartitionedDimension {
    fn matches(&self, observed: f64) -> bool {
        if self.divisions == 0 || self.high <= self.low {
            return false;
        }
        let in_range = match self.closure {
            Closure::OpenOpen => observed > self.low && observed < self.high,
            Closure::OpenClosed => observed > self.low && observed <= self.high,
            Closure::ClosedOpen => observed >= self.low && observed < self.high,
            Closure::ClosedClosed => observed >= self.low && observed <= self.high,
        };
        if !in_range {
            return false;
        }
        let width = (self.high - self.low) / self.divisions as f64;
        let bucket = (((observed - self.low) / width).floor() as u32).min(self.divisions - 1);
        bucket == self.bucket
    }
}

#[derive(Debug, Clone)]
pub enum Dimension {
    Enumerated(EnumeratedDimension),
    Partitioned(PartitionedDimension),
}

impl Dimension {
    fn matches(&self, get: &dyn Fn(&str) -> FieldValue) -> bool {
        match self {
            Dimension::Enumerated(d) => d.matches(&get(&d.field)),
            Dimension::Partitioned(d) => match get(&d.field).as_f64() {
                Some(v) => d.matches(v),
                None => false,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    /// Matches only when every dimension matches.
    Specific,
    /// Matches when every dimension matches, but excludes the event from
    /// consideration entirely rather than selecting a model for it.
    Blacklisted,
    /// Matches unconditionally; the fallback segment for events no
    /// `Specific`/`Blacklisted` segment claimed.
    Generic,
}

#[derive(Debug, Clone)]
pub struct Segment {
    pub id: String,
    pub kind: SegmentKind,
    pub dimensions: Vec<Dimension>,
    pub model_name: String,
}

impl Segment {
    fn matches(&self, get: &dyn Fn(&str) -> FieldValue) -> bool {
        match self.kind {
            SegmentKind::Generic => true,
            SegmentKind::Specific | SegmentKind::Blacklisted => {
                self.dimensions.iter().all(|d| d.matches(get))
            }
        }
    }
}

/// `SegmentationSchema` / `ExternalSegmentationSchema` (spec.md §6).
#[derive(Debug, Clone, Default)]
pub struct SegmentationSchema {
    pub segments: Vec<Segment>,
}

impl SegmentationSchema {
    /// Returns the model name an event routes to, or `None` if no segment
    /// claims it (including the case where a `Blacklisted` segment excludes
    /// it). `Specific` segments are checked in document order and win over
    /// `Generic`; a matching `Blacklisted` segment takes precedence over
    /// both, per spec.md's named-first evaluation order.
    pub fn route(&self, get: &dyn Fn(&str) -> FieldValue) -> Option<&str> {
        for segment in &self.segments {
            if segment.kind == SegmentKind::Blacklisted && segment.matches(get) {
                return None;
            }
        }
        for segment in &self.segments {
            if segment.kind == SegmentKind::Specific && segment.matches(get) {
                return Some(&segment.model_name);
            }
        }
        self.segments
            .iter()
            .find(|s| s.kind == SegmentKind::Generic)
            .map(|s| s.model_name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(map: &HashMap<&str, FieldValue>) -> impl Fn(&str) -> FieldValue + '_ {
        move |name| map.get(name).cloned().unwrap_or(FieldValue::Missing)
    }

    #[test]
    fn specific_segment_wins_over_generic() {
        let schema = SegmentationSchema {
            segments: vec![
                Segment {
                    id: "s1".into(),
                    kind: SegmentKind::Specific,
                    dimensions: vec![Dimension::Enumerated(EnumeratedDimension {
                        field: "region".into(),
                        op: DimensionOp::Equal,
                        value: FieldValue::String("west".into()),
                    })],
                    model_name: "west_model".into(),
                },
                Segment { id: "g".into(), kind: SegmentKind::Generic, dimensions: vec![], model_name: "default_model".into() },
            ],
        };
        let mut map = HashMap::new();
        map.insert("region", FieldValue::String("west".into()));
        assert_eq!(schema.route(&lookup(&map)), Some("west_model"));

        let mut other = HashMap::new();
        other.insert("region", FieldValue::String("east".into()));
        assert_eq!(schema.route(&lookup(&other)), Some("default_model"));
    }

    #[test]
    fn blacklisted_segment_excludes_the_event() {
        let schema = SegmentationSchema {
            segments: vec![
                Segment {
                    id: "bl".into(),
                    kind: SegmentKind::Blacklisted,
                    dimensions: vec![Dimension::Enumerated(EnumeratedDimension {
                        field: "region".into(),
                        op: DimensionOp::Equal,
                        value: FieldValue::String("test".into()),
                    })],
                    model_name: String::new(),
                },
                Segment { id: "g".into(), kind: SegmentKind::Generic, dimensions: vec![], model_name: "default_model".into() },
            ],
        };
        let mut map = HashMap::new();
        map.insert("region", FieldValue::String("test".into()));
        assert_eq!(schema.route(&lookup(&map)), None);
    }

    #[test]
    fn partitioned_dimension_selects_correct_bucket() {
        let dim = PartitionedDimension { field: "x".into(), low: 0.0, high: 10.0, closure: Closure::ClosedOpen, divisions: 2, bucket: 1 };
        assert!(dim.matches(7.5));
        assert!(!dim.matches(2.5));
        assert!(!dim.matches(10.0));
    }
}
